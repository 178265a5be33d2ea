//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides. Config::from_env() also loads a .env file
//! via dotenvy when present, so each test sets what it asserts on.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use std::env;

use serial_test::serial;
use trust_graph_monitor::config::{Config, LogFormat};
use trust_graph_monitor::drift::TimePeriod;
use trust_graph_monitor::AppError;

#[test]
#[serial]
fn test_config_from_env_loads_successfully() {
    let result = Config::from_env();
    assert!(result.is_ok(), "Config::from_env() should succeed with defaults");
}

#[test]
#[serial]
fn test_config_from_env_custom_database() {
    env::set_var("DATABASE_PATH", "/custom/trust.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/trust.db");
    assert_eq!(config.database.max_connections, 10);

    env::remove_var("DATABASE_PATH");
    env::remove_var("DATABASE_MAX_CONNECTIONS");
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    env::set_var("LOG_FORMAT", "JSON");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);

    env::set_var("LOG_FORMAT", "anything-else");
    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Pretty);

    env::remove_var("LOG_FORMAT");
}

#[test]
#[serial]
fn test_config_from_env_path_bounds() {
    env::set_var("PATH_DEFAULT_MIN_TRUST", "0.3");
    env::set_var("PATH_DEFAULT_MAX_LENGTH", "4");
    env::set_var("PATH_MAX_LENGTH_LIMIT", "8");

    let config = Config::from_env().unwrap();
    assert_eq!(config.paths.default_min_trust, 0.3);
    assert_eq!(config.paths.default_max_length, 4);
    assert_eq!(config.paths.max_length_limit, 8);

    env::remove_var("PATH_DEFAULT_MIN_TRUST");
    env::remove_var("PATH_DEFAULT_MAX_LENGTH");
    env::remove_var("PATH_MAX_LENGTH_LIMIT");
}

#[test]
#[serial]
fn test_config_from_env_default_length_over_limit() {
    env::set_var("PATH_DEFAULT_MAX_LENGTH", "12");
    env::set_var("PATH_MAX_LENGTH_LIMIT", "10");

    let result = Config::from_env();
    assert!(matches!(result, Err(AppError::Config { .. })));

    env::remove_var("PATH_DEFAULT_MAX_LENGTH");
    env::remove_var("PATH_MAX_LENGTH_LIMIT");
}

#[test]
#[serial]
fn test_config_from_env_scheduler() {
    env::set_var("SNAPSHOT_INTERVAL_SECS", "0");
    env::set_var("DRIFT_INTERVAL_SECS", "3600");
    env::set_var("DRIFT_SWEEP_PERIOD", "30d");

    let config = Config::from_env().unwrap();
    assert_eq!(config.scheduler.snapshot_interval_secs, 0);
    assert_eq!(config.scheduler.drift_interval_secs, 3600);
    assert_eq!(config.scheduler.drift_period, TimePeriod::Month);

    env::remove_var("SNAPSHOT_INTERVAL_SECS");
    env::remove_var("DRIFT_INTERVAL_SECS");
    env::remove_var("DRIFT_SWEEP_PERIOD");
}

#[test]
#[serial]
fn test_config_from_env_bad_sweep_period() {
    env::set_var("DRIFT_SWEEP_PERIOD", "fortnight");

    let result = Config::from_env();
    match result {
        Err(AppError::Config { message }) => assert!(message.contains("DRIFT_SWEEP_PERIOD")),
        other => panic!("Expected config error, got {:?}", other.map(|_| ())),
    }

    env::remove_var("DRIFT_SWEEP_PERIOD");
}

#[test]
#[serial]
fn test_config_from_env_unparseable_number_uses_default() {
    env::set_var("DATABASE_MAX_CONNECTIONS", "many");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.max_connections, 5);

    env::remove_var("DATABASE_MAX_CONNECTIONS");
}
