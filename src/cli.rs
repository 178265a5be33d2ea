//! Command-line interface.
//!
//! With no subcommand the binary serves MCP over stdio. The remaining
//! subcommands run one operation against the configured database and print
//! a human-readable report.

use std::fmt::Write as _;

use clap::{Parser, Subcommand};

use crate::drift::{DriftOutcome, PatternOutcome, TimePeriod};
use crate::graph::PathQuery;
use crate::scheduler::{run_drift_sweep, run_snapshot_sweep};
use crate::server::AppState;
use crate::storage::{AlertFilter, Severity};

/// Trust graph monitor.
#[derive(Parser, Debug, Clone)]
#[command(name = "trust-graph-monitor", version, about)]
pub struct Cli {
    /// Command to run (defaults to `serve`).
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Trust graph monitor subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Serve MCP over stdio with the scheduled sweeps running
    Serve,

    /// Snapshot one entity, or every entity when none is given
    Snapshot {
        /// Entity to snapshot
        #[arg(long)]
        entity: Option<String>,
    },

    /// Calculate drift for one entity, or every entity when none is given
    Drift {
        /// Entity to analyze
        #[arg(long)]
        entity: Option<String>,

        /// Lookback window: 1d, 7d or 30d
        #[arg(long, default_value = "7d")]
        period: TimePeriod,
    },

    /// Analyze the drift history of an entity
    Patterns {
        /// Entity to analyze
        #[arg(long)]
        entity: String,
    },

    /// Show recent drift alerts
    Alerts {
        /// Only alerts for this entity
        #[arg(long)]
        entity: Option<String>,

        /// Only alerts of this severity: low, medium, high
        #[arg(long)]
        severity: Option<String>,

        /// Maximum number of alerts to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Find trust paths between two entities
    Paths {
        /// Entity the paths start at
        #[arg(long)]
        source: String,

        /// Entity the paths end at
        #[arg(long)]
        target: String,

        /// Maximum edges per path
        #[arg(long, default_value = "5")]
        max_length: usize,

        /// Ignore edges scoring below this
        #[arg(long, default_value = "0.0")]
        min_trust: f64,
    },

    /// Show graph anomalies
    Anomalies,

    /// Show graph statistics
    Stats,
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a one-shot CLI command.
///
/// `Serve` is handled by the binary and reported as an error here.
pub async fn execute_command(command: Commands, state: &AppState) -> CliResult {
    match command {
        Commands::Serve => CliResult::error("serve must be run by the binary"),
        Commands::Snapshot { entity } => execute_snapshot(state, entity).await,
        Commands::Drift { entity, period } => execute_drift(state, entity, period).await,
        Commands::Patterns { entity } => execute_patterns(state, &entity).await,
        Commands::Alerts {
            entity,
            severity,
            limit,
        } => execute_alerts(state, entity, severity, limit).await,
        Commands::Paths {
            source,
            target,
            max_length,
            min_trust,
        } => execute_paths(state, source, target, max_length, min_trust).await,
        Commands::Anomalies => execute_anomalies(state).await,
        Commands::Stats => execute_stats(state).await,
    }
}

async fn execute_snapshot(state: &AppState, entity: Option<String>) -> CliResult {
    match entity {
        Some(entity_id) => match state.snapshots.create_snapshot(&entity_id).await {
            Ok(s) => CliResult::success(format!(
                "Snapshot {} of {}: {} incoming (avg {:.3}), {} outgoing (avg {:.3})",
                s.id,
                s.entity_id,
                s.incoming_trust.len(),
                s.avg_incoming_trust,
                s.outgoing_trust.len(),
                s.avg_outgoing_trust
            )),
            Err(e) => CliResult::error(format!("Snapshot failed: {}", e)),
        },
        None => match run_snapshot_sweep(&state.graph, &state.snapshots).await {
            Ok(count) => CliResult::success(format!("Created {} snapshots", count)),
            Err(e) => CliResult::error(format!("Snapshot sweep failed: {}", e)),
        },
    }
}

async fn execute_drift(state: &AppState, entity: Option<String>, period: TimePeriod) -> CliResult {
    let Some(entity_id) = entity else {
        return match run_drift_sweep(&state.graph, &state.drift, period).await {
            Ok(sweep) => CliResult::success(format!(
                "Drift ({}): {} calculated, {} with insufficient data, {} alerts",
                period,
                sweep.calculated.len(),
                sweep.insufficient_data.len(),
                sweep.alert_count()
            )),
            Err(e) => CliResult::error(format!("Drift sweep failed: {}", e)),
        };
    };

    match state.drift.calculate_drift(&entity_id, period).await {
        Ok(DriftOutcome::Calculated(report)) => {
            let drift = &report.drift;
            let mut output = format!(
                "Drift of {} over {}: magnitude {:.3}, {} (incoming {:+.3}, outgoing {:+.3})\n",
                entity_id,
                period,
                drift.drift_magnitude,
                drift.drift_direction,
                drift.avg_incoming_drift,
                drift.avg_outgoing_drift
            );
            for alert in &report.alerts {
                let _ = writeln!(
                    output,
                    "  [{}] {}: {}",
                    alert.severity, alert.alert_type, alert.description
                );
            }
            CliResult::success(output.trim_end())
        }
        Ok(DriftOutcome::InsufficientData {
            available_snapshots,
            ..
        }) => CliResult::success(format!(
            "Insufficient data for {}: {} snapshot(s), need at least 2",
            entity_id, available_snapshots
        )),
        Err(e) => CliResult::error(format!("Drift calculation failed: {}", e)),
    }
}

async fn execute_patterns(state: &AppState, entity_id: &str) -> CliResult {
    match state.patterns.analyze_drift_patterns(entity_id).await {
        Ok(PatternOutcome::Analyzed(report)) => {
            let mut output = format!(
                "Patterns for {} over {} drifts: trajectory {:?}\n",
                entity_id, report.drift_count, report.trajectory
            );
            if report.patterns.is_empty() {
                output.push_str("  No significant patterns\n");
            }
            for pattern in &report.patterns {
                let _ = writeln!(
                    output,
                    "  {:?} (strength {:.2}): {}",
                    pattern.pattern_type, pattern.strength, pattern.description
                );
            }
            CliResult::success(output.trim_end())
        }
        Ok(PatternOutcome::InsufficientData {
            available_drifts, ..
        }) => CliResult::success(format!(
            "Insufficient data for {}: {} drift(s), need at least 2",
            entity_id, available_drifts
        )),
        Err(e) => CliResult::error(format!("Pattern analysis failed: {}", e)),
    }
}

async fn execute_alerts(
    state: &AppState,
    entity: Option<String>,
    severity: Option<String>,
    limit: usize,
) -> CliResult {
    let severity = match severity.map(|s| s.parse::<Severity>()).transpose() {
        Ok(s) => s,
        Err(e) => return CliResult::error(e),
    };
    let filter = AlertFilter {
        entity_id: entity,
        severity,
        limit: Some(limit),
        ..Default::default()
    };

    match state.drift.list_alerts(&filter).await {
        Ok(alerts) if alerts.is_empty() => CliResult::success("No alerts"),
        Ok(alerts) => {
            let mut output = format!("{} alert(s)\n", alerts.len());
            for alert in &alerts {
                let _ = writeln!(
                    output,
                    "  {} [{}] {} {}: {}",
                    alert.timestamp.format("%Y-%m-%d %H:%M"),
                    alert.severity,
                    alert.entity_id,
                    alert.alert_type,
                    alert.description
                );
            }
            CliResult::success(output.trim_end())
        }
        Err(e) => CliResult::error(format!("Failed to list alerts: {}", e)),
    }
}

async fn execute_paths(
    state: &AppState,
    source: String,
    target: String,
    max_length: usize,
    min_trust: f64,
) -> CliResult {
    let query = PathQuery::new(source, target, max_length).with_min_trust(min_trust);

    match state.graph.find_paths(&query).await {
        Ok(paths) if paths.is_empty() => CliResult::success(format!(
            "No path from {} to {}",
            query.source_id, query.target_id
        )),
        Ok(paths) => {
            let mut output = format!("{} path(s)\n", paths.len());
            for path in &paths {
                let _ = writeln!(
                    output,
                    "  {:.4}  {}",
                    path.aggregate_trust,
                    path.entity_ids.join(" -> ")
                );
            }
            CliResult::success(output.trim_end())
        }
        Err(e) => CliResult::error(format!("Path search failed: {}", e)),
    }
}

async fn execute_anomalies(state: &AppState) -> CliResult {
    let anomalies = state.graph.detect_anomalies().await;
    if anomalies.is_empty() {
        return CliResult::success("No anomalies");
    }

    let mut output = format!("{} anomalies\n", anomalies.len());
    for anomaly in &anomalies {
        let _ = writeln!(
            output,
            "  [{}] {}: {}",
            anomaly.severity, anomaly.anomaly_type, anomaly.description
        );
    }
    CliResult::success(output.trim_end())
}

async fn execute_stats(state: &AppState) -> CliResult {
    let stats = state.graph.graph_stats().await;
    let fmt_score = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.3}", v));

    let output = format!(
        "Entities: {}\nRelationships: {}\nTrust mean/min/max: {} / {} / {}\n\
         Most trusted: {}\nMost trusting: {}",
        stats.entity_count,
        stats.relationship_count,
        fmt_score(stats.mean_trust),
        fmt_score(stats.min_trust),
        fmt_score(stats.max_trust),
        stats.most_trusted_entity.as_deref().unwrap_or("-"),
        stats.most_trusting_entity.as_deref().unwrap_or("-"),
    );
    CliResult::success(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::Notifier;
    use crate::storage::{Entity, SharedStorage, SqliteStorage, TrustRelationship};
    use std::sync::Arc;

    async fn create_state() -> AppState {
        let storage: SharedStorage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let state = AppState::new(Config::default(), storage, Notifier::noop())
            .await
            .unwrap();
        for id in ["a", "b"] {
            state
                .graph
                .add_entity(Entity::new(id, "agent").with_id(id))
                .await
                .unwrap();
        }
        state
            .graph
            .add_relationship(TrustRelationship::new("a", "b", 0.9))
            .await
            .unwrap();
        state
    }

    #[test]
    fn test_parse_defaults_to_no_command() {
        let cli = Cli::try_parse_from(["trust-graph-monitor"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_drift_period() {
        let cli = Cli::try_parse_from([
            "trust-graph-monitor",
            "drift",
            "--entity",
            "a",
            "--period",
            "30d",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Drift {
                entity: Some("a".to_string()),
                period: TimePeriod::Month,
            })
        );
    }

    #[test]
    fn test_parse_rejects_bad_period() {
        let result =
            Cli::try_parse_from(["trust-graph-monitor", "drift", "--period", "fortnight"]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_and_drift_commands() {
        let state = create_state().await;

        let result = execute_command(Commands::Snapshot { entity: None }, &state).await;
        assert_eq!(result.exit_code, 0);
        assert!(result.message.contains("2 snapshots"));

        let result = execute_command(
            Commands::Drift {
                entity: Some("a".to_string()),
                period: TimePeriod::Week,
            },
            &state,
        )
        .await;
        assert_eq!(result.exit_code, 0);
        assert!(result.message.contains("Insufficient data"));
    }

    #[tokio::test]
    async fn test_snapshot_unknown_entity_fails() {
        let state = create_state().await;
        let result = execute_command(
            Commands::Snapshot {
                entity: Some("ghost".to_string()),
            },
            &state,
        )
        .await;
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_paths_and_stats_commands() {
        let state = create_state().await;

        let result = execute_command(
            Commands::Paths {
                source: "a".to_string(),
                target: "b".to_string(),
                max_length: 3,
                min_trust: 0.0,
            },
            &state,
        )
        .await;
        assert!(result.message.contains("a -> b"));

        let result = execute_command(Commands::Stats, &state).await;
        assert!(result.message.contains("Relationships: 1"));
    }

    #[tokio::test]
    async fn test_alerts_rejects_bad_severity() {
        let state = create_state().await;
        let result = execute_command(
            Commands::Alerts {
                entity: None,
                severity: Some("extreme".to_string()),
                limit: 5,
            },
            &state,
        )
        .await;
        assert_eq!(result.exit_code, 1);
    }
}
