use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::drift::TimePeriod;
use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub paths: PathConfig,
    pub anomalies: AnomalyConfig,
    pub drift: DriftConfig,
    pub patterns: PatternConfig,
    pub scheduler: SchedulerConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Path engine configuration
#[derive(Debug, Clone)]
pub struct PathConfig {
    /// Minimum edge trust used by inferred trust lookups.
    pub default_min_trust: f64,
    /// Maximum hops used by inferred trust lookups.
    pub default_max_length: usize,
    /// Upper bound on any caller-supplied path length.
    pub max_length_limit: usize,
}

/// Anomaly detection thresholds
#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    /// Edges below this score are flagged.
    pub low_trust_threshold: f64,
    /// Flagged edges below this score are high severity.
    pub critical_trust_threshold: f64,
    /// Forward/backward difference that counts as asymmetric.
    pub asymmetry_threshold: f64,
    /// Deviation of an entity's mean incoming trust from the graph mean.
    pub incoming_deviation: f64,
}

/// Drift calculation and alert thresholds
#[derive(Debug, Clone)]
pub struct DriftConfig {
    /// Magnitude below which a drift is stable.
    pub stable_threshold: f64,
    /// Magnitude above which a decreasing drift raises `rapid_trust_decrease`.
    pub rapid_decrease_magnitude: f64,
    /// Magnitude above which an increasing drift raises `unusual_trust_increase`.
    pub unusual_increase_magnitude: f64,
    /// Incoming/outgoing average gap that raises `trust_asymmetry`.
    pub asymmetry_threshold: f64,
    /// Per-counterpart delta that raises `significant_relationship_changes`.
    pub relationship_change_threshold: f64,
}

/// Drift pattern detection thresholds
#[derive(Debug, Clone)]
pub struct PatternConfig {
    /// Minimum |r| for a trend to be reported.
    pub min_correlation: f64,
    /// Maximum p-value for a trend to be reported.
    pub significance_level: f64,
    /// Minimum points before searching for cycles.
    pub min_points_for_cycles: usize,
    /// Minimum autocorrelation for a cycle.
    pub cycle_correlation: f64,
    /// Mean per-drift asymmetry that counts as persistent.
    pub persistent_asymmetry: f64,
    /// Combined average drift beyond which the trajectory is not stable.
    pub trajectory_threshold: f64,
}

/// Scheduled sweep configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Seconds between snapshot sweeps (0 disables).
    pub snapshot_interval_secs: u64,
    /// Seconds between drift sweeps (0 disables).
    pub drift_interval_secs: u64,
    /// Period used by the drift sweep.
    pub drift_period: TimePeriod,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/trust.db".to_string()),
            ),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let defaults = PathConfig::default();
        let paths = PathConfig {
            default_min_trust: env_or("PATH_DEFAULT_MIN_TRUST", defaults.default_min_trust),
            default_max_length: env_or("PATH_DEFAULT_MAX_LENGTH", defaults.default_max_length),
            max_length_limit: env_or("PATH_MAX_LENGTH_LIMIT", defaults.max_length_limit),
        };
        if paths.default_max_length == 0 || paths.default_max_length > paths.max_length_limit {
            return Err(AppError::Config {
                message: format!(
                    "PATH_DEFAULT_MAX_LENGTH must be within 1-{}",
                    paths.max_length_limit
                ),
            });
        }

        let defaults = AnomalyConfig::default();
        let anomalies = AnomalyConfig {
            low_trust_threshold: env_or("ANOMALY_LOW_TRUST", defaults.low_trust_threshold),
            critical_trust_threshold: env_or(
                "ANOMALY_CRITICAL_TRUST",
                defaults.critical_trust_threshold,
            ),
            asymmetry_threshold: env_or("ANOMALY_ASYMMETRY", defaults.asymmetry_threshold),
            incoming_deviation: env_or("ANOMALY_INCOMING_DEVIATION", defaults.incoming_deviation),
        };

        let drift = DriftConfig {
            stable_threshold: env_or("DRIFT_STABLE_THRESHOLD", 0.05),
            ..DriftConfig::default()
        };

        let drift_period = match env::var("DRIFT_SWEEP_PERIOD") {
            Ok(label) => TimePeriod::from_str(&label).map_err(|message| AppError::Config {
                message: format!("DRIFT_SWEEP_PERIOD: {}", message),
            })?,
            Err(_) => TimePeriod::Week,
        };

        let scheduler = SchedulerConfig {
            snapshot_interval_secs: env_or("SNAPSHOT_INTERVAL_SECS", 86_400),
            drift_interval_secs: env_or("DRIFT_INTERVAL_SECS", 86_400),
            drift_period,
        };

        Ok(Config {
            database,
            logging,
            paths,
            anomalies,
            drift,
            patterns: PatternConfig::default(),
            scheduler,
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            default_min_trust: 0.0,
            default_max_length: 5,
            max_length_limit: 10,
        }
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            low_trust_threshold: 0.2,
            critical_trust_threshold: 0.1,
            asymmetry_threshold: 0.5,
            incoming_deviation: 0.3,
        }
    }
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            stable_threshold: 0.05,
            rapid_decrease_magnitude: 0.2,
            unusual_increase_magnitude: 0.3,
            asymmetry_threshold: 0.25,
            relationship_change_threshold: 0.3,
        }
    }
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_correlation: 0.5,
            significance_level: 0.05,
            min_points_for_cycles: 10,
            cycle_correlation: 0.5,
            persistent_asymmetry: 0.2,
            trajectory_threshold: 0.05,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: 86_400,
            drift_interval_secs: 86_400,
            drift_period: TimePeriod::Week,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: PathBuf::from("./data/trust.db"),
                max_connections: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            paths: PathConfig::default(),
            anomalies: AnomalyConfig::default(),
            drift: DriftConfig::default(),
            patterns: PatternConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}
