//! Integration tests for snapshots, drift calculation and pattern detection
//!
//! Builds a full application state over an in-memory store and walks trust
//! changes from snapshot capture through alerts and drift patterns.

use std::sync::Arc;

use chrono::{Duration, Utc};

use trust_graph_monitor::config::Config;
use trust_graph_monitor::drift::{
    DriftOutcome, PatternOutcome, PatternType, TimePeriod, Trajectory,
};
use trust_graph_monitor::events::Notifier;
use trust_graph_monitor::graph::RelationshipUpdate;
use trust_graph_monitor::server::AppState;
use trust_graph_monitor::storage::{
    AlertFilter, AlertType, DriftDirection, Entity, Severity, SharedStorage, SqliteStorage, Storage,
    TrustDrift, TrustMap, TrustRelationship,
};

async fn create_state() -> AppState {
    create_state_with_storage().await.0
}

/// State plus a handle on the concrete store, for tests that reach into SQL.
async fn create_state_with_storage() -> (AppState, SqliteStorage) {
    let sqlite = SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage");
    let storage: SharedStorage = Arc::new(sqlite.clone());
    let state = AppState::new(Config::default(), storage, Notifier::noop())
        .await
        .expect("Failed to build state");
    (state, sqlite)
}

/// Entities "a" and "b" with a single a -> b relationship.
async fn create_pair(state: &AppState, score: f64) {
    for id in ["a", "b"] {
        state
            .graph
            .add_entity(Entity::new(id.to_uppercase(), "agent").with_id(id))
            .await
            .unwrap();
    }
    state
        .graph
        .add_relationship(TrustRelationship::new("a", "b", score).with_id("ab"))
        .await
        .unwrap();
}

/// Snapshot `a` a week ago, move the score, then snapshot again.
async fn record_change(state: &AppState, from: f64, to: f64) {
    create_pair(state, from).await;
    state
        .snapshots
        .create_snapshot_at("a", Utc::now() - Duration::days(7))
        .await
        .unwrap();
    state
        .graph
        .update_relationship("ab", RelationshipUpdate::score(to))
        .await
        .unwrap();
    state.snapshots.create_snapshot("a").await.unwrap();
}

fn backfilled_drift(entity_id: &str, days_ago: i64, avg_outgoing: f64) -> TrustDrift {
    let end = Utc::now() - Duration::days(days_ago);
    let mut outgoing = TrustMap::new();
    outgoing.insert("b".to_string(), avg_outgoing);
    TrustDrift {
        id: format!("{}-{}", entity_id, days_ago),
        entity_id: entity_id.to_string(),
        start_snapshot_id: format!("start-{}", days_ago),
        end_snapshot_id: format!("end-{}", days_ago),
        time_period: "7d".to_string(),
        start_timestamp: end - Duration::days(7),
        end_timestamp: end,
        incoming_trust_drift: TrustMap::new(),
        outgoing_trust_drift: outgoing,
        avg_incoming_drift: 0.0,
        avg_outgoing_drift: avg_outgoing,
        drift_magnitude: 0.1,
        drift_direction: DriftDirection::Decreasing,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod snapshot_tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_captures_both_directions() {
        let state = create_state().await;
        create_pair(&state, 0.8).await;

        let snap_a = state.snapshots.create_snapshot("a").await.unwrap();
        let snap_b = state.snapshots.create_snapshot("b").await.unwrap();

        assert_eq!(snap_a.outgoing_trust.get("b"), Some(&0.8));
        assert!(snap_a.incoming_trust.is_empty());
        assert_eq!(snap_b.incoming_trust.get("a"), Some(&0.8));
        assert_eq!(snap_b.avg_incoming_trust, 0.8);
    }

    #[tokio::test]
    async fn test_snapshot_unknown_entity_fails() {
        let state = create_state().await;
        assert!(state.snapshots.create_snapshot("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_all_covers_every_entity() {
        let state = create_state().await;
        create_pair(&state, 0.5).await;

        let taken = state.snapshots.snapshot_all().await.unwrap();
        assert_eq!(taken.len(), 2);

        let latest = state.snapshots.get_latest_snapshot("b").await.unwrap().unwrap();
        assert_eq!(latest.entity_id, "b");
    }
}

#[cfg(test)]
mod calculation_tests {
    use super::*;

    #[tokio::test]
    async fn test_single_snapshot_is_insufficient() {
        let state = create_state().await;
        create_pair(&state, 0.9).await;
        state.snapshots.create_snapshot("a").await.unwrap();

        let outcome = state.drift.calculate_drift("a", TimePeriod::Week).await.unwrap();
        assert_eq!(
            outcome,
            DriftOutcome::InsufficientData {
                entity_id: "a".to_string(),
                available_snapshots: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_trust_drop_raises_alerts() {
        let state = create_state().await;
        record_change(&state, 0.9, 0.3).await;

        let outcome = state.drift.calculate_drift("a", TimePeriod::Week).await.unwrap();
        let report = outcome.report().expect("drift should be calculated");
        let drift = &report.drift;

        assert!((drift.outgoing_trust_drift["b"] + 0.6).abs() < 1e-9);
        assert!((drift.drift_magnitude - 0.6).abs() < 1e-9);
        assert_eq!(drift.drift_direction, DriftDirection::Decreasing);
        assert_eq!(drift.time_period, "7d");

        let kinds: Vec<(AlertType, Severity)> = report
            .alerts
            .iter()
            .map(|a| (a.alert_type, a.severity))
            .collect();
        assert!(kinds.contains(&(AlertType::RapidTrustDecrease, Severity::High)));
        assert!(kinds.contains(&(AlertType::TrustAsymmetry, Severity::Medium)));
        assert!(kinds.contains(&(AlertType::SignificantRelationshipChanges, Severity::Medium)));
        assert!(!kinds.iter().any(|(t, _)| *t == AlertType::UnusualTrustIncrease));

        let stored = state
            .drift
            .list_alerts(&AlertFilter {
                entity_id: Some("a".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(stored.len(), report.alerts.len());
        assert!(stored.iter().all(|a| a.drift_id == drift.id));
    }

    #[tokio::test]
    async fn test_small_change_is_stable() {
        let state = create_state().await;
        record_change(&state, 0.5, 0.52).await;

        let outcome = state.drift.calculate_drift("a", TimePeriod::Week).await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.drift.drift_direction, DriftDirection::Stable);
        assert!(report.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_trust_rise_is_unusual() {
        let state = create_state().await;
        record_change(&state, 0.2, 0.7).await;

        let outcome = state.drift.calculate_drift("b", TimePeriod::Week).await.unwrap();
        // Only "a" was snapshotted
        assert!(outcome.report().is_none());

        let outcome = state.drift.calculate_drift("a", TimePeriod::Week).await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.drift.drift_direction, DriftDirection::Increasing);
        assert!(report
            .alerts
            .iter()
            .any(|a| a.alert_type == AlertType::UnusualTrustIncrease));
    }

    #[tokio::test]
    async fn test_drift_all_splits_outcomes() {
        let state = create_state().await;
        record_change(&state, 0.9, 0.3).await;

        let ids = state.graph.entity_ids().await;
        let sweep = state
            .drift
            .calculate_drift_all(&ids, TimePeriod::Week)
            .await
            .unwrap();
        assert_eq!(sweep.calculated.len(), 1);
        assert_eq!(sweep.insufficient_data, vec!["b"]);
        assert_eq!(sweep.alert_count(), sweep.calculated[0].alerts.len());

        let drifts = state.drift.list_drifts("a", None).await.unwrap();
        assert_eq!(drifts.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_alert_write_leaves_no_drift() {
        let (state, sqlite) = create_state_with_storage().await;
        record_change(&state, 0.9, 0.3).await;
        sqlx::query("DROP TABLE drift_alerts")
            .execute(sqlite.pool())
            .await
            .unwrap();

        let result = state.drift.calculate_drift("a", TimePeriod::Week).await;
        assert!(result.is_err());
        assert!(state.drift.list_drifts("a", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_relationship_counts_as_full_drop() {
        let state = create_state().await;
        create_pair(&state, 0.6).await;
        state
            .snapshots
            .create_snapshot_at("a", Utc::now() - Duration::days(1))
            .await
            .unwrap();
        state.graph.delete_relationship("ab").await.unwrap();
        state.snapshots.create_snapshot("a").await.unwrap();

        let outcome = state.drift.calculate_drift("a", TimePeriod::Day).await.unwrap();
        let drift = &outcome.report().unwrap().drift;
        assert!((drift.outgoing_trust_drift["b"] + 0.6).abs() < 1e-9);
        assert_eq!(drift.time_period, "1d");
    }
}

#[cfg(test)]
mod pattern_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_patterns_need_two_drifts() {
        let state = create_state().await;
        state
            .storage
            .create_drift(&backfilled_drift("a", 0, -0.1))
            .await
            .unwrap();

        let outcome = state.patterns.analyze_drift_patterns("a").await.unwrap();
        assert_eq!(
            outcome,
            PatternOutcome::InsufficientData {
                entity_id: "a".to_string(),
                available_drifts: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_declining_history_detected() {
        let state = create_state().await;
        for (days_ago, avg) in [(30, -0.1), (20, -0.2), (10, -0.3), (0, -0.4)] {
            state
                .storage
                .create_drift(&backfilled_drift("a", days_ago, avg))
                .await
                .unwrap();
        }

        let outcome = state.patterns.analyze_drift_patterns("a").await.unwrap();
        let PatternOutcome::Analyzed(report) = outcome else {
            panic!("Expected an analysed report");
        };

        assert_eq!(report.drift_count, 4);
        assert_eq!(report.trajectory, Trajectory::Declining);
        assert!((report.combined_average_drift + 0.125).abs() < 1e-9);

        let kinds: Vec<PatternType> = report.patterns.iter().map(|p| p.pattern_type).collect();
        assert_eq!(
            kinds,
            vec![
                PatternType::DecreasingOutgoingTrust,
                PatternType::PersistentTrustAsymmetry,
            ]
        );
        assert!(report.patterns[0].slope.unwrap() < 0.0);
    }
}
