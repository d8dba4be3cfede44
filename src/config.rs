//! Reconstruction and merge configuration from environment variables

use solana_pubkey::Pubkey;
use std::env;
use std::str::FromStr;

pub const DEFAULT_DCA_PROGRAM_ID: &str = "DCA265Vj8a9CEuX1eb1LWRnDT7uK6q1xMipnNyatn23M";

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration consumed by the builder, the merge window runtime and the gates
#[derive(Debug, Clone)]
pub struct ReconstructConfig {
    /// Drain tick interval in milliseconds
    pub merge_interval_ms: u64,

    /// Minimum legs in a one-direction group before fan collapsing is attempted
    pub fan_group_min_size: usize,

    /// Program id that routes a record to the DCA short-circuit path
    pub dca_program_id: String,

    /// Extra `(program_id, label)` venue entries on top of the built-in registry
    pub dex_programs: Vec<(String, String)>,

    pub rate_limit_window_secs: i64,
    pub rate_limit_max_events: usize,

    /// SQLite database with the `monitor_address` table; `None` allows all
    pub permission_db_path: Option<String>,

    pub output_path: String,
    pub output_max_size_mb: u64,
    pub output_max_rotations: u32,

    pub rust_log: String,
}

impl Default for ReconstructConfig {
    fn default() -> Self {
        Self {
            merge_interval_ms: 10_000,
            fan_group_min_size: 4,
            dca_program_id: DEFAULT_DCA_PROGRAM_ID.to_string(),
            dex_programs: Vec::new(),
            rate_limit_window_secs: 3_600,
            rate_limit_max_events: 200,
            permission_db_path: None,
            output_path: "streams/recon/events.jsonl".to_string(),
            output_max_size_mb: 100,
            output_max_rotations: 10,
            rust_log: "info".to_string(),
        }
    }
}

impl ReconstructConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `MERGE_INTERVAL_MS` (default: 10000)
    /// - `FAN_GROUP_MIN_SIZE` (default: 4)
    /// - `DCA_PROGRAM_ID` (default: Jupiter DCA)
    /// - `DEX_PROGRAMS` (comma list of `program_id:Label`)
    /// - `RATE_LIMIT_WINDOW_SECS` (default: 3600)
    /// - `RATE_LIMIT_MAX_EVENTS` (default: 200)
    /// - `PERMISSION_DB_PATH` (unset: allow all)
    /// - `OUTPUT_PATH`, `OUTPUT_MAX_SIZE_MB`, `OUTPUT_MAX_ROTATIONS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let dex_programs = match env::var("DEX_PROGRAMS") {
            Ok(raw) => parse_dex_programs(&raw)?,
            Err(_) => Vec::new(),
        };

        let config = Self {
            merge_interval_ms: env::var("MERGE_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.merge_interval_ms),

            fan_group_min_size: env::var("FAN_GROUP_MIN_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.fan_group_min_size),

            dca_program_id: env::var("DCA_PROGRAM_ID").unwrap_or(defaults.dca_program_id),

            dex_programs,

            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rate_limit_window_secs),

            rate_limit_max_events: env::var("RATE_LIMIT_MAX_EVENTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rate_limit_max_events),

            permission_db_path: env::var("PERMISSION_DB_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty()),

            output_path: env::var("OUTPUT_PATH").unwrap_or(defaults.output_path),

            output_max_size_mb: env::var("OUTPUT_MAX_SIZE_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.output_max_size_mb),

            output_max_rotations: env::var("OUTPUT_MAX_ROTATIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.output_max_rotations),

            rust_log: env::var("RUST_LOG").unwrap_or(defaults.rust_log),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Pubkey::from_str(&self.dca_program_id).map_err(|e| {
            ConfigError::InvalidValue(format!(
                "DCA_PROGRAM_ID '{}' is not a valid pubkey: {}",
                self.dca_program_id, e
            ))
        })?;

        if self.fan_group_min_size < 2 {
            return Err(ConfigError::InvalidValue(format!(
                "FAN_GROUP_MIN_SIZE must be at least 2, got {}",
                self.fan_group_min_size
            )));
        }

        if self.merge_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "MERGE_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_window_secs <= 0 || self.rate_limit_max_events == 0 {
            return Err(ConfigError::InvalidValue(
                "rate limit window and max events must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_dex_programs(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, label) = entry.split_once(':').ok_or_else(|| {
                ConfigError::InvalidValue(format!("DEX_PROGRAMS entry '{}' must be id:Label", entry))
            })?;
            Pubkey::from_str(id.trim()).map_err(|e| {
                ConfigError::InvalidValue(format!("DEX_PROGRAMS id '{}': {}", id, e))
            })?;
            Ok((id.trim().to_string(), label.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 6] = [
        "MERGE_INTERVAL_MS",
        "FAN_GROUP_MIN_SIZE",
        "DCA_PROGRAM_ID",
        "DEX_PROGRAMS",
        "PERMISSION_DB_PATH",
        "RATE_LIMIT_MAX_EVENTS",
    ];

    // Env vars are process-global, so every env scenario runs in one test
    #[test]
    fn test_from_env_scenarios() {
        for var in VARS {
            env::remove_var(var);
        }

        let config = ReconstructConfig::from_env().unwrap();
        assert_eq!(config.merge_interval_ms, 10_000);
        assert_eq!(config.fan_group_min_size, 4);
        assert_eq!(config.dca_program_id, DEFAULT_DCA_PROGRAM_ID);
        assert!(config.dex_programs.is_empty());
        assert!(config.permission_db_path.is_none());
        assert_eq!(config.rate_limit_max_events, 200);

        env::set_var("MERGE_INTERVAL_MS", "250");
        env::set_var("FAN_GROUP_MIN_SIZE", "2");
        env::set_var(
            "DEX_PROGRAMS",
            "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4:Jupiter, ",
        );
        env::set_var("PERMISSION_DB_PATH", "/tmp/monitor.db");
        let config = ReconstructConfig::from_env().unwrap();
        assert_eq!(config.merge_interval_ms, 250);
        assert_eq!(config.fan_group_min_size, 2);
        assert_eq!(config.dex_programs.len(), 1);
        assert_eq!(config.dex_programs[0].1, "Jupiter");
        assert_eq!(config.permission_db_path.as_deref(), Some("/tmp/monitor.db"));

        env::set_var("FAN_GROUP_MIN_SIZE", "1");
        assert!(ReconstructConfig::from_env().is_err());
        env::remove_var("FAN_GROUP_MIN_SIZE");

        env::set_var("DCA_PROGRAM_ID", "not-a-pubkey");
        assert!(ReconstructConfig::from_env().is_err());
        env::remove_var("DCA_PROGRAM_ID");

        env::set_var("DEX_PROGRAMS", "missing_label");
        assert!(ReconstructConfig::from_env().is_err());

        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_validate_zero_interval() {
        let config = ReconstructConfig {
            merge_interval_ms: 0,
            ..ReconstructConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(ReconstructConfig::default().validate().is_ok());
    }
}
