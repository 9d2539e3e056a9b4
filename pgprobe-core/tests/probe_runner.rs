//! Runner integration tests against a live Postgres
//!
//! Run with: DATABASE_URL=postgres://... cargo test -p pgprobe-core -- --ignored

use pgprobe_core::{run_fanout, run_sequential, OutputFormat, ProbeError, ProbePlan};

fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL required")
}

fn plan(query: &str) -> ProbePlan {
    ProbePlan {
        query: query.to_string(),
        params: Vec::new(),
        iterations: 10,
        format: OutputFormat::Text,
    }
}

#[tokio::test]
#[ignore = "requires database"]
async fn sequential_runs_ten_iterations() {
    let report = run_sequential(&database_url(), &plan("SELECT 1 AS one"))
        .await
        .expect("probe failed");

    assert_eq!(report.iterations, 10);
    // One row per iteration for SELECT 1
    assert_eq!(report.rows_fetched, 10);
}

#[tokio::test]
#[ignore = "requires database"]
async fn sequential_binds_text_params() {
    let mut plan = plan("SELECT $1::text AS echoed");
    plan.params = vec!["hello".to_string()];
    plan.iterations = 2;

    let report = run_sequential(&database_url(), &plan)
        .await
        .expect("probe failed");

    assert_eq!(report.rows_fetched, 2);
}

#[tokio::test]
#[ignore = "requires database"]
async fn sequential_fails_on_bad_query() {
    let result = run_sequential(&database_url(), &plan("SELECT * FROM no_such_table_here")).await;
    assert!(matches!(result, Err(ProbeError::Database { .. })));
}

#[tokio::test]
#[ignore = "requires database"]
async fn fanout_joins_every_worker() {
    let report = run_fanout(&database_url(), &plan("SELECT 1"), 4)
        .await
        .expect("fan-out failed");

    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.succeeded(), 4);
    assert_eq!(report.rows_fetched(), 40);
}

#[tokio::test]
#[ignore = "requires database"]
async fn fanout_reports_all_failed() {
    let result = run_fanout(&database_url(), &plan("SELECT * FROM no_such_table_here"), 3).await;

    match result {
        Err(ProbeError::AllWorkersFailed { workers, .. }) => assert_eq!(workers, 3),
        other => panic!("expected AllWorkersFailed, got {:?}", other.map(|_| ())),
    }
}
