pub mod advisor;
pub mod config;
pub mod db;
pub mod error;
pub mod render;
pub mod runner;

pub use advisor::{run_advise, run_stats_drain, AdvisePlan, AdviseReport, Recommendation};
pub use config::{load_dotenv, ProbeConfig};
pub use error::{ProbeError, Result};
pub use render::OutputFormat;
pub use runner::{run_fanout, run_sequential, FanoutReport, ProbePlan, ProbeReport, WorkerOutcome};
