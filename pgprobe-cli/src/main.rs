//! pgprobe CLI - repeated-query probe for PostgreSQL
//!
//! Two commands:
//! - `run`: open one connection and execute a canned query N times,
//!   printing every row
//! - `fanout`: run the identical loop across W concurrent workers,
//!   each with its own connection, joined at the end
//!
//! The connection string comes from `--database-url`, DATABASE_URL
//! (optionally via .env), or the config file, in that order.

use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use pgprobe_core::{
    load_dotenv, run_advise, run_fanout, run_sequential, run_stats_drain, AdvisePlan,
    OutputFormat, ProbeConfig, ProbePlan,
};
use tracing::{info, warn};

mod tracing_setup;

#[derive(Parser, Debug)]
#[command(
    name = "pgprobe",
    author,
    version,
    about = "Repeated-query probe for PostgreSQL",
    long_about = "Execute a canned SELECT against PostgreSQL, either repeatedly on a \
                  single connection or fanned out across concurrent workers that each \
                  own a connection. Rows are printed as they arrive."
)]
struct Cli {
    /// Suppress the post-run summary
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Enable debug logging (equivalent to RUST_LOG=debug)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute the query repeatedly on a single connection
    Run(ProbeArgs),
    /// Execute the same loop across concurrent workers, one connection each
    Fanout(FanoutArgs),
    /// Recommend or create indexes for sequentially scanned filter columns
    Advise(AdviseArgs),
}

#[derive(Args, Debug)]
struct AdviseArgs {
    #[command(subcommand)]
    command: AdviseCommand,
}

#[derive(Subcommand, Debug)]
enum AdviseCommand {
    /// Observe a query's plan repeatedly and recommend indexes
    Query(AdviseQueryArgs),
    /// Drain a stats table of candidates past the benefit threshold
    Stats(AdviseStatsArgs),
}

#[derive(Args, Debug)]
struct AdviseQueryArgs {
    /// SQL to analyze (defaults to the configured query)
    #[arg(long, short = 'Q', value_name = "SQL")]
    query: Option<String>,

    /// Text parameter bound as $1..$n (repeatable)
    #[arg(long = "param", short = 'p', value_name = "VALUE")]
    params: Vec<String>,

    /// Number of plan observations
    #[arg(long, short = 'n', value_name = "COUNT")]
    observations: Option<u32>,

    /// Benefit credited per avoided sequential scan
    #[arg(long, value_name = "VALUE")]
    benefit: Option<f64>,

    /// One-time cost charged for building an index
    #[arg(long, value_name = "VALUE")]
    cost: Option<f64>,

    /// Execute the CREATE INDEX statements instead of only printing them
    #[arg(long)]
    apply: bool,

    /// Connection string (overrides DATABASE_URL and config file)
    #[arg(long, value_name = "URL")]
    database_url: Option<String>,
}

#[derive(Args, Debug)]
struct AdviseStatsArgs {
    /// Stats table to drain (defaults to the configured table)
    #[arg(long, value_name = "TABLE")]
    stats_table: Option<String>,

    /// Keep polling instead of a single drain pass
    #[arg(long)]
    watch: bool,

    /// Seconds between polls in watch mode
    #[arg(long, default_value = "5", value_name = "SECONDS")]
    interval_secs: u64,

    /// Connection string (overrides DATABASE_URL and config file)
    #[arg(long, value_name = "URL")]
    database_url: Option<String>,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// SQL to execute (defaults to the configured query)
    #[arg(long, short = 'Q', value_name = "SQL")]
    query: Option<String>,

    /// Text parameter bound as $1..$n (repeatable)
    #[arg(long = "param", short = 'p', value_name = "VALUE")]
    params: Vec<String>,

    /// Number of times to execute the query
    #[arg(long, short = 'n', value_name = "COUNT")]
    iterations: Option<u32>,

    /// Row output format
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Connection string (overrides DATABASE_URL and config file)
    #[arg(long, value_name = "URL")]
    database_url: Option<String>,
}

#[derive(Args, Debug)]
struct FanoutArgs {
    #[command(flatten)]
    probe: ProbeArgs,

    /// Number of concurrent workers
    #[arg(long, short = 'w', value_name = "COUNT")]
    workers: Option<usize>,
}

/// Merge CLI flags over config-file defaults into a probe plan.
fn build_plan(args: &ProbeArgs, config: &ProbeConfig) -> Result<ProbePlan> {
    let format = match args.format {
        Some(format) => format,
        None => config.output.format.parse::<OutputFormat>()?,
    };

    Ok(ProbePlan {
        query: args
            .query
            .clone()
            .unwrap_or_else(|| config.probe.query.clone()),
        params: args.params.clone(),
        iterations: args.iterations.unwrap_or(config.probe.iterations),
        format,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_setup::init(&tracing_setup::TracingConfig { debug: cli.debug })?;
    load_dotenv().ok();
    let config = ProbeConfig::load();

    match cli.command {
        Commands::Run(args) => {
            let url = config.resolve_database_url(args.database_url.as_deref())?;
            let plan = build_plan(&args, &config)?;

            let report = run_sequential(&url, &plan).await?;
            if !cli.quiet {
                info!(
                    iterations = report.iterations,
                    rows = report.rows_fetched,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "probe complete"
                );
            }
        }
        Commands::Fanout(args) => {
            let url = config.resolve_database_url(args.probe.database_url.as_deref())?;
            let plan = build_plan(&args.probe, &config)?;
            let workers = args.workers.unwrap_or(config.probe.workers);

            let report = run_fanout(&url, &plan, workers).await?;
            if report.failed() > 0 {
                warn!(failed = report.failed(), "some workers did not complete");
            }
            if !cli.quiet {
                info!(
                    workers = report.outcomes.len(),
                    succeeded = report.succeeded(),
                    rows = report.rows_fetched(),
                    "fan-out complete"
                );
            }
        }
        Commands::Advise(args) => match args.command {
            AdviseCommand::Query(query_args) => {
                let url = config.resolve_database_url(query_args.database_url.as_deref())?;
                let plan = AdvisePlan {
                    query: query_args
                        .query
                        .clone()
                        .unwrap_or_else(|| config.probe.query.clone()),
                    params: query_args.params.clone(),
                    observations: query_args.observations.unwrap_or(config.probe.iterations),
                    benefit: query_args.benefit.unwrap_or(config.advisor.benefit),
                    cost: query_args.cost.unwrap_or(config.advisor.cost),
                    apply: query_args.apply,
                };

                let report = run_advise(&url, &plan).await?;
                for rec in &report.recommendations {
                    println!("{}", rec.statement);
                }
                if !cli.quiet {
                    info!(
                        observations = report.observations,
                        recommendations = report.recommendations.len(),
                        applied = plan.apply,
                        "advise complete"
                    );
                }
            }
            AdviseCommand::Stats(stats_args) => {
                let url = config.resolve_database_url(stats_args.database_url.as_deref())?;
                let stats_table = stats_args
                    .stats_table
                    .clone()
                    .unwrap_or_else(|| config.advisor.stats_table.clone());

                loop {
                    match run_stats_drain(&url, &stats_table).await {
                        Ok(created) => {
                            for rec in &created {
                                println!("{}", rec.statement);
                            }
                            if !cli.quiet {
                                info!(created = created.len(), "stats drain complete");
                            }
                        }
                        Err(err) if stats_args.watch => {
                            warn!(error = %err, "stats drain failed; retrying on next tick");
                        }
                        Err(err) => return Err(err.into()),
                    }

                    if !stats_args.watch {
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs(stats_args.interval_secs)).await;
                }
            }
        },
    }

    Ok(())
}
