//! Sequential and fan-out probe runners
//!
//! A probe is a canned query executed N times on one connection, every
//! row printed as it arrives. The fan-out runner repeats that exact
//! loop across independent tokio tasks, one connection per worker,
//! with no shared state and no ordering between workers' output. A
//! failing worker is logged and recorded; the others run to the end.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgConnection, PgRow};
use sqlx::Connection;
use tracing::{debug, info, warn};

use crate::db;
use crate::error::{ProbeError, Result};
use crate::render::{decode_row, render_row, render_worker_row, OutputFormat};

/// One planned probe: the query, its bindings, and how often to run it.
#[derive(Debug, Clone)]
pub struct ProbePlan {
    pub query: String,
    /// Positional text parameters bound as $1..$n
    pub params: Vec<String>,
    pub iterations: u32,
    pub format: OutputFormat,
}

impl ProbePlan {
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(ProbeError::config("query must not be empty"));
        }
        if self.iterations == 0 {
            return Err(ProbeError::config("iterations must be at least 1"));
        }
        Ok(())
    }
}

/// Outcome of one sequential probe run
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub iterations: u32,
    pub rows_fetched: u64,
    pub elapsed: Duration,
}

/// Per-worker outcome of a fan-out run
#[derive(Debug)]
pub struct WorkerOutcome {
    pub worker: usize,
    pub result: std::result::Result<ProbeReport, ProbeError>,
}

/// Joined results of a fan-out run
#[derive(Debug)]
pub struct FanoutReport {
    pub outcomes: Vec<WorkerOutcome>,
}

impl FanoutReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn rows_fetched(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|r| r.rows_fetched)
            .sum()
    }
}

/// Run the probe on a single connection: connect, execute the query
/// `plan.iterations` times printing every row, close the connection.
pub async fn run_sequential(database_url: &str, plan: &ProbePlan) -> Result<ProbeReport> {
    plan.validate()?;
    probe_connection(database_url, plan, None).await
}

/// Fan the sequential loop out across `workers` independent tasks,
/// each opening its own connection. Workers are isolated: one failure
/// is recorded in its outcome and does not stop the rest.
///
/// # Errors
///
/// Returns `AllWorkersFailed` only when no worker succeeded; partial
/// failure is reported through the `FanoutReport`.
pub async fn run_fanout(
    database_url: &str,
    plan: &ProbePlan,
    workers: usize,
) -> Result<FanoutReport> {
    plan.validate()?;
    if workers == 0 {
        return Err(ProbeError::config("workers must be at least 1"));
    }

    info!(workers, "starting fan-out probe");

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let url = database_url.to_string();
        let plan = plan.clone();
        handles.push(tokio::spawn(async move {
            probe_connection(&url, &plan, Some(worker)).await
        }));
    }

    let mut outcomes = Vec::with_capacity(workers);
    for (worker, handle) in handles.into_iter().enumerate() {
        let result = match handle.await {
            Ok(Ok(report)) => {
                debug!(worker, rows = report.rows_fetched, "worker complete");
                Ok(report)
            }
            Ok(Err(err)) => {
                warn!(worker, error = %err, "worker failed");
                Err(err)
            }
            Err(join_err) => {
                warn!(worker, error = %join_err, "worker panicked");
                Err(ProbeError::worker_panic(worker, join_err.to_string()))
            }
        };
        outcomes.push(WorkerOutcome { worker, result });
    }

    let report = FanoutReport { outcomes };
    if report.succeeded() == 0 {
        let first = report
            .outcomes
            .iter()
            .find_map(|o| o.result.as_ref().err())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        return Err(ProbeError::AllWorkersFailed { workers, first });
    }

    Ok(report)
}

async fn probe_connection(
    database_url: &str,
    plan: &ProbePlan,
    worker: Option<usize>,
) -> Result<ProbeReport> {
    let mut conn = db::connect(database_url).await?;
    let started = Instant::now();
    let mut rows_fetched = 0u64;

    for iteration in 1..=plan.iterations {
        let rows = fetch_rows(&mut conn, plan).await?;
        for row in &rows {
            let fields = decode_row(row)?;
            let line = match worker {
                Some(id) => render_worker_row(id, &fields, plan.format),
                None => render_row(&fields, plan.format),
            };
            println!("{}", line);
        }
        rows_fetched += rows.len() as u64;
        debug!(iteration, rows = rows.len(), "iteration complete");
    }

    conn.close().await?;
    info!("connection closed");

    Ok(ProbeReport {
        iterations: plan.iterations,
        rows_fetched,
        elapsed: started.elapsed(),
    })
}

async fn fetch_rows(conn: &mut PgConnection, plan: &ProbePlan) -> Result<Vec<PgRow>> {
    let mut query = sqlx::query(&plan.query);
    for param in &plan.params {
        query = query.bind(param.as_str());
    }
    Ok(query.fetch_all(&mut *conn).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(query: &str, iterations: u32) -> ProbePlan {
        ProbePlan {
            query: query.to_string(),
            params: Vec::new(),
            iterations,
            format: OutputFormat::Text,
        }
    }

    #[test]
    fn test_validate_rejects_empty_query() {
        let err = plan("   ", 10).validate().unwrap_err();
        assert!(err.to_string().contains("query"));
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let err = plan("SELECT 1", 0).validate().unwrap_err();
        assert!(err.to_string().contains("iterations"));
    }

    #[test]
    fn test_fanout_report_accounting() {
        let report = FanoutReport {
            outcomes: vec![
                WorkerOutcome {
                    worker: 0,
                    result: Ok(ProbeReport {
                        iterations: 10,
                        rows_fetched: 10,
                        elapsed: Duration::from_millis(5),
                    }),
                },
                WorkerOutcome {
                    worker: 1,
                    result: Err(ProbeError::config("boom")),
                },
                WorkerOutcome {
                    worker: 2,
                    result: Ok(ProbeReport {
                        iterations: 10,
                        rows_fetched: 20,
                        elapsed: Duration::from_millis(7),
                    }),
                },
            ],
        };

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.rows_fetched(), 30);
    }

    #[tokio::test]
    async fn test_fanout_rejects_zero_workers() {
        let result = run_fanout("postgres://localhost/ignored", &plan("SELECT 1", 1), 0).await;
        assert!(matches!(result, Err(ProbeError::Config { .. })));
    }
}
