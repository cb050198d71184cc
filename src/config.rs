//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;
use crate::pool::Specialization;

/// Worker pool configuration.
///
/// Bands are applied in order: the first `count` workers get the first
/// specialization, the next band follows, and so on. Band counts must sum to
/// `size` exactly; [`crate::pool::WorkerPool::new`] rejects anything else.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Total number of workers.
    pub size: usize,
    /// Specialization bands, in creation order.
    pub bands: Vec<(Specialization, usize)>,
    /// Baseline rolling average seeded into every worker, in milliseconds.
    pub baseline_avg_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 70,
            bands: vec![
                (Specialization::CodeFixer, 20),
                (Specialization::FeatureGenerator, 20),
                (Specialization::SecurityAuditor, 15),
                (Specialization::PerformanceTuner, 15),
            ],
            baseline_avg_ms: 500,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Worker pool shape.
    pub pool: PoolConfig,
    /// Interval between pool-health broadcasts.
    pub health_interval: Duration,
    /// HTTP/WS listen port.
    pub port: u16,
    /// Path to the libsql database file.
    pub db_path: String,
    /// Base duration for the simulated executor, in milliseconds.
    pub executor_base_ms: u64,
    /// Random jitter added on top of the base, in milliseconds.
    pub executor_jitter_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            health_interval: Duration::from_secs(5),
            port: 8080,
            db_path: "./data/agent-dispatch.db".to_string(),
            executor_base_ms: 500,
            executor_jitter_ms: 2000,
        }
    }
}

impl DispatchConfig {
    /// Build configuration from `AGENT_DISPATCH_*` environment variables,
    /// falling back to defaults for anything unset. Malformed values are
    /// startup errors, not silent fallbacks.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let size = parse_env("AGENT_DISPATCH_POOL_SIZE", defaults.pool.size)?;
        let baseline_avg_ms =
            parse_env("AGENT_DISPATCH_BASELINE_AVG_MS", defaults.pool.baseline_avg_ms)?;

        let bands = match std::env::var("AGENT_DISPATCH_BANDS") {
            Ok(raw) => parse_bands(&raw)?,
            Err(_) => defaults.pool.bands,
        };

        let health_secs = parse_env("AGENT_DISPATCH_HEALTH_INTERVAL_SECS", 5u64)?;
        let port = parse_env("AGENT_DISPATCH_PORT", defaults.port)?;
        let db_path =
            std::env::var("AGENT_DISPATCH_DB_PATH").unwrap_or(defaults.db_path);
        let executor_base_ms =
            parse_env("AGENT_DISPATCH_EXECUTOR_BASE_MS", defaults.executor_base_ms)?;
        let executor_jitter_ms = parse_env(
            "AGENT_DISPATCH_EXECUTOR_JITTER_MS",
            defaults.executor_jitter_ms,
        )?;

        Ok(Self {
            pool: PoolConfig {
                size,
                bands,
                baseline_avg_ms,
            },
            health_interval: Duration::from_secs(health_secs),
            port,
            db_path,
            executor_base_ms,
            executor_jitter_ms,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

/// Parse a band list of the form `CodeFixer:20,FeatureGenerator:20,...`.
fn parse_bands(raw: &str) -> Result<Vec<(Specialization, usize)>, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "AGENT_DISPATCH_BANDS".to_string(),
        message,
    };

    let mut bands = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, count) = entry
            .split_once(':')
            .ok_or_else(|| invalid(format!("expected Specialization:count, got {entry:?}")))?;
        let specialization = name.trim().parse().map_err(invalid)?;
        let count = count
            .trim()
            .parse()
            .map_err(|_| invalid(format!("invalid count in {entry:?}")))?;
        bands.push((specialization, count));
    }

    if bands.is_empty() {
        return Err(invalid("no bands given".to_string()));
    }
    Ok(bands)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bands_cover_default_size() {
        let config = PoolConfig::default();
        let covered: usize = config.bands.iter().map(|(_, c)| c).sum();
        assert_eq!(covered, config.size);
        assert_eq!(config.size, 70);
    }

    #[test]
    fn parse_bands_accepts_standard_layout() {
        let bands = parse_bands("CodeFixer:20, FeatureGenerator:20, SecurityAuditor:15, PerformanceTuner:15").unwrap();
        assert_eq!(bands.len(), 4);
        assert_eq!(bands[0], (Specialization::CodeFixer, 20));
        assert_eq!(bands[3], (Specialization::PerformanceTuner, 15));
    }

    #[test]
    fn parse_bands_rejects_unknown_specialization() {
        assert!(matches!(
            parse_bands("Wizard:20"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn parse_bands_rejects_missing_count() {
        assert!(parse_bands("CodeFixer").is_err());
        assert!(parse_bands("CodeFixer:lots").is_err());
        assert!(parse_bands("").is_err());
    }
}
