use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ProbeError;

/// Load environment variables from .env files in multiple locations
///
/// Priority order (highest to lowest):
/// 1. Current directory .env
/// 2. ~/.pgprobe/.env
/// 3. Environment variables already set
///
/// This allows:
/// - Global installation: `cargo install --path pgprobe-cli`
/// - Global config: ~/.pgprobe/.env
/// - Local overrides: ./.env in any directory
pub fn load_dotenv() -> Result<()> {
    let mut loaded_from = Vec::new();

    // Check current directory first (highest priority)
    if let Ok(path) = dotenvy::dotenv() {
        loaded_from.push(format!("current directory ({})", path.display()));
        debug!("Loaded .env from current directory: {}", path.display());
    }

    // Check ~/.pgprobe/.env
    if let Some(home_dir) = dirs::home_dir() {
        let env_file = home_dir.join(".pgprobe").join(".env");

        if env_file.exists() {
            // dotenvy doesn't overwrite existing vars, so this is safe
            match dotenvy::from_path(&env_file) {
                Ok(_) => {
                    loaded_from.push(format!("~/.pgprobe/.env ({})", env_file.display()));
                    debug!("Loaded .env from ~/.pgprobe: {}", env_file.display());
                }
                Err(e) => {
                    debug!("Failed to load ~/.pgprobe/.env: {}", e);
                }
            }
        }
    }

    if loaded_from.is_empty() {
        debug!("No .env files found (current dir or ~/.pgprobe)");
    } else {
        info!("Loaded configuration from: {}", loaded_from.join(", "));
    }

    Ok(())
}

/// Get the pgprobe config directory path (~/.pgprobe)
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pgprobe"))
}

// ============================================================================
// TOML Configuration
// ============================================================================

/// pgprobe TOML configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProbeConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub probe: ProbeDefaults,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub advisor: AdvisorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectionConfig {
    /// Connection string fallback when DATABASE_URL is not set.
    /// Prefer the environment variable; keeping credentials in a
    /// world-readable TOML file is on you.
    #[serde(default)]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeDefaults {
    #[serde(default = "default_query")]
    pub query: String,

    #[serde(default = "default_iterations")]
    pub iterations: u32,

    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ProbeDefaults {
    fn default() -> Self {
        Self {
            query: default_query(),
            iterations: default_iterations(),
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_format")]
    pub format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_output_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// Benefit credited per avoided sequential scan
    #[serde(default = "default_benefit")]
    pub benefit: f64,

    /// One-time cost charged for building an index
    #[serde(default = "default_cost")]
    pub cost: f64,

    /// Stats table drained by `advise stats`
    #[serde(default = "default_stats_table")]
    pub stats_table: String,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            benefit: default_benefit(),
            cost: default_cost(),
            stats_table: default_stats_table(),
        }
    }
}

// Default value functions for serde
fn default_query() -> String {
    "SELECT 1".to_string()
}

fn default_iterations() -> u32 {
    10
}

fn default_workers() -> usize {
    4
}

fn default_output_format() -> String {
    "text".to_string()
}

fn default_benefit() -> f64 {
    crate::advisor::DEFAULT_BENEFIT
}

fn default_cost() -> f64 {
    crate::advisor::DEFAULT_COST
}

fn default_stats_table() -> String {
    "aidx_queries".to_string()
}

impl ProbeConfig {
    /// Load config from TOML files
    ///
    /// Priority order (highest to lowest):
    /// 1. ./pgprobe.toml (project-specific)
    /// 2. ~/.pgprobe/config.toml (user defaults)
    /// 3. Built-in defaults
    pub fn load() -> Self {
        let mut config = ProbeConfig::default();

        // Try global config first (~/.pgprobe/config.toml)
        if let Some(global_config_path) = config_dir().map(|d| d.join("config.toml")) {
            if global_config_path.exists() {
                match std::fs::read_to_string(&global_config_path) {
                    Ok(contents) => match toml::from_str::<ProbeConfig>(&contents) {
                        Ok(global_config) => {
                            debug!("Loaded global config from {}", global_config_path.display());
                            config = global_config;
                        }
                        Err(e) => {
                            warn!("Failed to parse {}: {}", global_config_path.display(), e);
                        }
                    },
                    Err(e) => {
                        debug!("Failed to read {}: {}", global_config_path.display(), e);
                    }
                }
            }
        }

        // Try local config (./pgprobe.toml) - overrides global
        let local_config_path = PathBuf::from("pgprobe.toml");
        if local_config_path.exists() {
            match std::fs::read_to_string(&local_config_path) {
                Ok(contents) => match toml::from_str::<ProbeConfig>(&contents) {
                    Ok(local_config) => {
                        debug!("Loaded local config from {}", local_config_path.display());
                        config = local_config;
                    }
                    Err(e) => {
                        warn!("Failed to parse {}: {}", local_config_path.display(), e);
                    }
                },
                Err(e) => {
                    debug!("Failed to read {}: {}", local_config_path.display(), e);
                }
            }
        }

        config
    }

    /// Resolve the connection string.
    ///
    /// Priority order (highest to lowest):
    /// 1. Explicit override (the `--database-url` flag)
    /// 2. DATABASE_URL environment variable
    /// 3. `[connection] database_url` from the config file
    pub fn resolve_database_url(
        &self,
        override_url: Option<&str>,
    ) -> crate::error::Result<String> {
        if let Some(url) = override_url {
            return Ok(url.to_string());
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                return Ok(url);
            }
        }

        self.connection
            .database_url
            .clone()
            .ok_or(ProbeError::MissingDatabaseUrl)
    }
}
