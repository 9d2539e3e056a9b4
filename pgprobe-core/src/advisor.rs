//! Client-side index advisor
//!
//! Watches the plans of a repeatedly executed query for sequential
//! scans, keeps per-(table, column) counters for the columns used in
//! each scan's filter, and recommends
//! `CREATE INDEX IF NOT EXISTS idx_<table>_<column>` once the
//! accumulated benefit of avoided scans outweighs the one-time build
//! cost (`benefit * num_queries > cost`). A second mode drains an
//! externally maintained stats table of candidates that already
//! crossed the threshold.
//!
//! Only plain lower-case identifiers are eligible: table and column
//! names are interpolated into DDL, so anything that would need
//! quoting is skipped with a warning instead.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Row};
use tracing::{debug, info, warn};

use crate::db;
use crate::error::{ProbeError, Result};

/// Benefit credited to one avoided sequential scan
pub const DEFAULT_BENEFIT: f64 = 40.0;
/// One-time cost charged for building an index
pub const DEFAULT_COST: f64 = 120.0;

/// Per-column scan counters and the indexing decision inputs
#[derive(Debug, Clone, Copy)]
pub struct ColumnStats {
    pub num_queries: u32,
    pub benefit: f64,
    pub cost: f64,
    pub indexed: bool,
}

impl ColumnStats {
    fn new(benefit: f64, cost: f64, indexed: bool) -> Self {
        Self {
            num_queries: 1,
            benefit,
            cost,
            indexed,
        }
    }

    /// Strict threshold: the accumulated benefit must exceed the cost.
    pub fn should_index(&self) -> bool {
        !self.indexed && self.benefit * f64::from(self.num_queries) > self.cost
    }
}

/// Nested table -> column -> stats map backing the advisor
#[derive(Debug)]
pub struct AdvisorLedger {
    benefit: f64,
    cost: f64,
    entries: BTreeMap<String, BTreeMap<String, ColumnStats>>,
}

impl AdvisorLedger {
    pub fn new(benefit: f64, cost: f64) -> Self {
        Self {
            benefit,
            cost,
            entries: BTreeMap::new(),
        }
    }

    pub fn contains(&self, table: &str, column: &str) -> bool {
        self.entries
            .get(table)
            .is_some_and(|columns| columns.contains_key(column))
    }

    /// First observation of a column. `indexed` carries the result of
    /// the catalog check so existing indexes are never recommended.
    pub fn seed(&mut self, table: &str, column: &str, indexed: bool) -> ColumnStats {
        let stats = ColumnStats::new(self.benefit, self.cost, indexed);
        self.entries
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string(), stats);
        stats
    }

    /// Subsequent observation; returns the updated counters.
    pub fn observe(&mut self, table: &str, column: &str) -> ColumnStats {
        *self
            .entries
            .entry(table.to_string())
            .or_default()
            .entry(column.to_string())
            .and_modify(|stats| stats.num_queries += 1)
            .or_insert_with(|| ColumnStats::new(self.benefit, self.cost, false))
    }

    /// Stop a candidate from being recommended again.
    pub fn mark_indexed(&mut self, table: &str, column: &str) {
        if let Some(stats) = self
            .entries
            .get_mut(table)
            .and_then(|columns| columns.get_mut(column))
        {
            stats.indexed = true;
        }
    }
}

/// A sequential scan found in an EXPLAIN plan tree
#[derive(Debug, PartialEq, Eq)]
pub struct SeqScanSite {
    pub relation: String,
    pub columns: Vec<String>,
}

/// Walk `EXPLAIN (FORMAT JSON)` output for sequential scans whose
/// filter references at least one column. Catalog and toast relations
/// are never candidates.
pub fn seq_scans_in(explain: &Value) -> Vec<SeqScanSite> {
    let mut sites = Vec::new();
    if let Some(items) = explain.as_array() {
        for item in items {
            if let Some(plan) = item.get("Plan") {
                walk_plan(plan, &mut sites);
            }
        }
    }
    sites
}

fn walk_plan(node: &Value, sites: &mut Vec<SeqScanSite>) {
    if node.get("Node Type").and_then(Value::as_str) == Some("Seq Scan") {
        if let Some(relation) = node.get("Relation Name").and_then(Value::as_str) {
            if !relation.starts_with("pg_") {
                let columns = node
                    .get("Filter")
                    .and_then(Value::as_str)
                    .map(filter_columns)
                    .unwrap_or_default();
                if !columns.is_empty() {
                    sites.push(SeqScanSite {
                        relation: relation.to_string(),
                        columns,
                    });
                }
            }
        }
    }

    if let Some(children) = node.get("Plans").and_then(Value::as_array) {
        for child in children {
            walk_plan(child, sites);
        }
    }
}

// Left operand of a comparison in a filter expression, e.g. `i_id` in
// `(i_id = '123'::text)`. The leading boundary keeps cast names like
// `'123'::text` from matching.
static FILTER_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[(\s])([A-Za-z_][A-Za-z0-9_]*)\s*(?:=|<>|!=|<=|>=|<|>|~~)").unwrap()
});

/// Extract candidate column names from an EXPLAIN filter expression,
/// deduplicated in order of first appearance.
pub fn filter_columns(filter: &str) -> Vec<String> {
    let mut columns = Vec::new();
    for caps in FILTER_COLUMN.captures_iter(filter) {
        let name = caps[1].to_string();
        if !columns.contains(&name) {
            columns.push(name);
        }
    }
    columns
}

/// Plain lower-case identifier, safe to interpolate into DDL unquoted.
pub fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Build the index DDL for a candidate, rejecting anything that is
/// not a plain identifier.
pub fn index_statement(table: &str, column: &str) -> Result<String> {
    if !valid_identifier(table) || !valid_identifier(column) {
        return Err(ProbeError::config(format!(
            "cannot build index statement for {}.{}: not a plain identifier",
            table, column
        )));
    }
    Ok(format!(
        "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {} ({})",
        table, column, table, column
    ))
}

/// One planned advisor run over a single query's plan
#[derive(Debug, Clone)]
pub struct AdvisePlan {
    pub query: String,
    /// Positional text parameters bound as $1..$n
    pub params: Vec<String>,
    pub observations: u32,
    pub benefit: f64,
    pub cost: f64,
    /// Execute the CREATE INDEX statements instead of only reporting them
    pub apply: bool,
}

impl AdvisePlan {
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(ProbeError::config("query must not be empty"));
        }
        if self.observations == 0 {
            return Err(ProbeError::config("observations must be at least 1"));
        }
        if self.benefit <= 0.0 {
            return Err(ProbeError::config("benefit must be positive"));
        }
        if self.cost < 0.0 {
            return Err(ProbeError::config("cost must not be negative"));
        }
        Ok(())
    }
}

/// An index the advisor decided on
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub table: String,
    pub column: String,
    pub statement: String,
    pub applied: bool,
}

/// Outcome of one advisor run
#[derive(Debug)]
pub struct AdviseReport {
    pub observations: u32,
    pub recommendations: Vec<Recommendation>,
}

/// Observe the query's plan `plan.observations` times on one
/// connection and recommend (or, with `plan.apply`, create) an index
/// for every filter column that crosses the benefit threshold. Each
/// candidate is recommended at most once.
pub async fn run_advise(database_url: &str, plan: &AdvisePlan) -> Result<AdviseReport> {
    plan.validate()?;

    let mut conn = db::connect(database_url).await?;
    let mut ledger = AdvisorLedger::new(plan.benefit, plan.cost);
    let mut recommendations = Vec::new();

    for observation in 1..=plan.observations {
        let explain = explain_query(&mut conn, &plan.query, &plan.params).await?;
        for site in seq_scans_in(&explain) {
            debug!(observation, relation = %site.relation, "sequential scan observed");
            for column in &site.columns {
                let stats = if ledger.contains(&site.relation, column) {
                    ledger.observe(&site.relation, column)
                } else {
                    let indexed = is_column_indexed(&mut conn, &site.relation, column).await?;
                    if indexed {
                        debug!(table = %site.relation, column = %column, "column already indexed");
                    }
                    ledger.seed(&site.relation, column, indexed)
                };

                if !stats.should_index() {
                    continue;
                }

                let statement = match index_statement(&site.relation, column) {
                    Ok(statement) => statement,
                    Err(err) => {
                        warn!(error = %err, "skipping candidate");
                        ledger.mark_indexed(&site.relation, column);
                        continue;
                    }
                };

                if plan.apply {
                    sqlx::query(&statement).execute(&mut conn).await?;
                    info!(table = %site.relation, column = %column,
                          queries = stats.num_queries, "index created");
                } else {
                    info!(table = %site.relation, column = %column,
                          queries = stats.num_queries, "index recommended");
                }

                ledger.mark_indexed(&site.relation, column);
                recommendations.push(Recommendation {
                    table: site.relation.clone(),
                    column: column.clone(),
                    statement,
                    applied: plan.apply,
                });
            }
        }
    }

    conn.close().await?;
    info!("connection closed");

    Ok(AdviseReport {
        observations: plan.observations,
        recommendations,
    })
}

/// Single drain pass over an externally maintained stats table:
/// create an index for every row past the threshold, then delete the
/// row. Rows with non-plain identifiers are skipped with a warning.
pub async fn run_stats_drain(database_url: &str, stats_table: &str) -> Result<Vec<Recommendation>> {
    if !valid_identifier(stats_table) {
        return Err(ProbeError::config(format!(
            "'{}' is not a plain table identifier",
            stats_table
        )));
    }

    let mut conn = db::connect(database_url).await?;

    let due_sql = format!(
        "SELECT tablename, colname FROM {} WHERE benefit * num_queries > cost",
        stats_table
    );
    let rows = sqlx::query(&due_sql).fetch_all(&mut conn).await?;
    debug!(due = rows.len(), "stats rows past threshold");

    let mut created = Vec::new();
    for row in &rows {
        let table: String = row.try_get("tablename")?;
        let column: String = row.try_get("colname")?;

        let statement = match index_statement(&table, &column) {
            Ok(statement) => statement,
            Err(err) => {
                warn!(error = %err, "skipping stats row");
                continue;
            }
        };

        sqlx::query(&statement).execute(&mut conn).await?;
        info!(table = %table, column = %column, "index created");

        let delete_sql = format!(
            "DELETE FROM {} WHERE tablename = $1 AND colname = $2",
            stats_table
        );
        sqlx::query(&delete_sql)
            .bind(&table)
            .bind(&column)
            .execute(&mut conn)
            .await?;

        created.push(Recommendation {
            table,
            column,
            statement,
            applied: true,
        });
    }

    conn.close().await?;
    info!("connection closed");

    Ok(created)
}

async fn explain_query(conn: &mut PgConnection, query: &str, params: &[String]) -> Result<Value> {
    let explain_sql = format!("EXPLAIN (FORMAT JSON) {}", query);
    let mut explain = sqlx::query(&explain_sql);
    for param in params {
        explain = explain.bind(param.as_str());
    }
    let row = explain.fetch_one(&mut *conn).await?;
    Ok(row.try_get::<Value, _>(0)?)
}

async fn is_column_indexed(conn: &mut PgConnection, table: &str, column: &str) -> Result<bool> {
    let indexed: bool = sqlx::query_scalar(
        "SELECT EXISTS ( \
           SELECT 1 \
           FROM pg_index i \
           JOIN pg_class t ON t.oid = i.indrelid \
           JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(i.indkey) \
           WHERE t.relname = $1 AND a.attname = $2)",
    )
    .bind(table)
    .bind(column)
    .fetch_one(&mut *conn)
    .await?;
    Ok(indexed)
}
