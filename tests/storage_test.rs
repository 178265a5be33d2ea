//! Integration tests for SQLite storage layer
//!
//! Tests record persistence against in-memory and file-backed databases.

use chrono::{Duration, Utc};
use serde_json::json;

use trust_graph_monitor::config::DatabaseConfig;
use trust_graph_monitor::storage::{
    AlertFilter, AlertType, DriftAlert, DriftDirection, Entity, Severity, SqliteStorage, Storage,
    TrustDrift, TrustMap, TrustRelationship, TrustSnapshot,
};

/// Create an in-memory storage instance for testing
async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

async fn seed_entities(storage: &SqliteStorage, ids: &[&str]) {
    for id in ids {
        storage
            .create_entity(&Entity::new(id.to_uppercase(), "agent").with_id(*id))
            .await
            .unwrap();
    }
}

fn trust_map(entries: &[(&str, f64)]) -> TrustMap {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn sample_drift(entity_id: &str, end_offset_days: i64) -> TrustDrift {
    let end = Utc::now() - Duration::days(end_offset_days);
    TrustDrift {
        id: format!("drift-{}", end_offset_days),
        entity_id: entity_id.to_string(),
        start_snapshot_id: "s1".to_string(),
        end_snapshot_id: "s2".to_string(),
        time_period: "7d".to_string(),
        start_timestamp: end - Duration::days(7),
        end_timestamp: end,
        incoming_trust_drift: TrustMap::new(),
        outgoing_trust_drift: trust_map(&[("b", -0.6)]),
        avg_incoming_drift: 0.0,
        avg_outgoing_drift: -0.6,
        drift_magnitude: 0.6,
        drift_direction: DriftDirection::Decreasing,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod entity_tests {
    use super::*;

    #[tokio::test]
    async fn test_entity_round_trip_with_attributes() {
        let storage = create_test_storage().await;
        let entity = Entity::new("Alice", "person")
            .with_id("alice")
            .with_attribute("team", json!("red"))
            .with_attribute("level", json!(3));

        storage.create_entity(&entity).await.unwrap();
        let fetched = storage.get_entity("alice").await.unwrap().unwrap();

        assert_eq!(fetched.name, "Alice");
        assert_eq!(fetched.attributes["team"], "red");
        assert_eq!(fetched.attributes["level"], 3);
    }

    #[tokio::test]
    async fn test_duplicate_entity_rejected() {
        let storage = create_test_storage().await;
        seed_entities(&storage, &["a"]).await;

        let result = storage
            .create_entity(&Entity::new("again", "agent").with_id("a"))
            .await;
        assert!(result.is_err(), "Duplicate primary key should fail");
    }

    #[tokio::test]
    async fn test_update_missing_entity_returns_false() {
        let storage = create_test_storage().await;
        let updated = storage
            .update_entity(&Entity::new("ghost", "agent").with_id("ghost"))
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_list_entities_in_registration_order() {
        let storage = create_test_storage().await;
        seed_entities(&storage, &["c", "a", "b"]).await;

        let ids: Vec<String> = storage
            .list_entities()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_delete_entity_cascade() {
        let storage = create_test_storage().await;
        seed_entities(&storage, &["a", "b", "c"]).await;
        for (id, s, t) in [("ab", "a", "b"), ("ba", "b", "a"), ("bc", "b", "c")] {
            storage
                .create_relationship(&TrustRelationship::new(s, t, 0.5).with_id(id))
                .await
                .unwrap();
        }

        let removed = storage.delete_entity_cascade("a").await.unwrap().unwrap();
        assert_eq!(removed, vec!["ab", "ba"]);
        assert!(storage.get_entity("a").await.unwrap().is_none());

        let remaining = storage.list_relationships().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "bc");
    }

    #[tokio::test]
    async fn test_delete_missing_entity_touches_nothing() {
        let storage = create_test_storage().await;
        assert!(storage.delete_entity_cascade("ghost").await.unwrap().is_none());
    }
}

#[cfg(test)]
mod relationship_tests {
    use super::*;

    #[tokio::test]
    async fn test_relationship_round_trip_with_expiration() {
        let storage = create_test_storage().await;
        seed_entities(&storage, &["a", "b"]).await;
        let expiration = Utc::now() + Duration::days(30);
        let rel = TrustRelationship::new("a", "b", 0.75)
            .with_id("ab")
            .with_type("code_review")
            .with_expiration(expiration);

        storage.create_relationship(&rel).await.unwrap();
        let fetched = storage.get_relationship("ab").await.unwrap().unwrap();

        assert_eq!(fetched.trust_score, 0.75);
        assert_eq!(fetched.relationship_type, "code_review");
        assert_eq!(
            fetched.expiration.unwrap().timestamp_millis(),
            expiration.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_relationship_to_unknown_entity_rejected() {
        let storage = create_test_storage().await;
        seed_entities(&storage, &["a"]).await;

        let result = storage
            .create_relationship(&TrustRelationship::new("a", "ghost", 0.5))
            .await;
        assert!(result.is_err(), "Foreign key should reject unknown target");
    }

    #[tokio::test]
    async fn test_update_and_delete_relationship() {
        let storage = create_test_storage().await;
        seed_entities(&storage, &["a", "b"]).await;
        let mut rel = TrustRelationship::new("a", "b", 0.5).with_id("ab");
        storage.create_relationship(&rel).await.unwrap();

        rel.trust_score = 0.2;
        assert!(storage.update_relationship(&rel).await.unwrap());
        assert_eq!(
            storage.get_relationship("ab").await.unwrap().unwrap().trust_score,
            0.2
        );

        assert!(storage.delete_relationship("ab").await.unwrap());
        assert!(!storage.delete_relationship("ab").await.unwrap());
    }
}

#[cfg(test)]
mod history_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_snapshot_round_trip_and_ordering() {
        let storage = create_test_storage().await;
        let now = Utc::now();
        let older = TrustSnapshot::new(
            "a",
            now - Duration::days(2),
            trust_map(&[("c", 0.4)]),
            trust_map(&[("b", 0.9)]),
        );
        let newer = TrustSnapshot::new("a", now, TrustMap::new(), trust_map(&[("b", 0.3)]));

        storage.create_snapshot(&newer).await.unwrap();
        storage.create_snapshot(&older).await.unwrap();

        let listed = storage.list_snapshots("a").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, older.id);
        assert_eq!(listed[0].outgoing_trust, older.outgoing_trust);

        let latest = storage.get_latest_snapshot("a").await.unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
        assert!(storage.get_latest_snapshot("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_survives_entity_deletion() {
        let storage = create_test_storage().await;
        seed_entities(&storage, &["a"]).await;
        let snapshot = TrustSnapshot::new("a", Utc::now(), TrustMap::new(), TrustMap::new());
        storage.create_snapshot(&snapshot).await.unwrap();

        storage.delete_entity_cascade("a").await.unwrap();
        assert!(storage.get_snapshot(&snapshot.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_drift_round_trip_ordered_by_end() {
        let storage = create_test_storage().await;
        let recent = sample_drift("a", 1);
        let old = sample_drift("a", 10);

        storage.create_drift(&recent).await.unwrap();
        storage.create_drift(&old).await.unwrap();

        let drifts = storage.list_drifts("a").await.unwrap();
        let ids: Vec<&str> = drifts.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["drift-10", "drift-1"]);

        let fetched = storage.get_drift("drift-1").await.unwrap().unwrap();
        assert_eq!(fetched.drift_direction, DriftDirection::Decreasing);
        assert_eq!(fetched.outgoing_trust_drift["b"], -0.6);
    }

    #[tokio::test]
    async fn test_drift_with_alerts_written_together() {
        let storage = create_test_storage().await;
        let drift = sample_drift("a", 1);
        let alerts = vec![
            DriftAlert::new(&drift, AlertType::RapidTrustDecrease, Severity::High, "fell"),
            DriftAlert::new(&drift, AlertType::TrustAsymmetry, Severity::Medium, "skewed"),
        ];

        storage.create_drift_with_alerts(&drift, &alerts).await.unwrap();

        assert!(storage.get_drift(&drift.id).await.unwrap().is_some());
        let stored = storage.list_alerts(&AlertFilter::default()).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|a| a.drift_id == drift.id));
    }

    #[tokio::test]
    async fn test_drift_rolled_back_when_alert_fails() {
        let storage = create_test_storage().await;
        let drift = sample_drift("a", 1);
        let alert = DriftAlert::new(&drift, AlertType::RapidTrustDecrease, Severity::High, "fell");
        // Same primary key twice makes the second insert fail
        let alerts = vec![alert.clone(), alert];

        let result = storage.create_drift_with_alerts(&drift, &alerts).await;
        assert!(result.is_err());

        assert!(storage.get_drift(&drift.id).await.unwrap().is_none());
        assert!(storage.list_drifts("a").await.unwrap().is_empty());
        assert!(storage
            .list_alerts(&AlertFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_alerts_filtered_newest_first() {
        let storage = create_test_storage().await;
        let drift_a = sample_drift("a", 1);
        let drift_b = sample_drift("b", 1);

        let mut first = DriftAlert::new(
            &drift_a,
            AlertType::RapidTrustDecrease,
            Severity::High,
            "fell",
        );
        first.timestamp = Utc::now() - Duration::hours(2);
        let second = DriftAlert::new(
            &drift_a,
            AlertType::SignificantRelationshipChanges,
            Severity::Medium,
            "changed",
        )
        .with_details(json!({"outgoing": ["b"]}));
        let other = DriftAlert::new(
            &drift_b,
            AlertType::TrustAsymmetry,
            Severity::Medium,
            "skewed",
        );
        for alert in [&first, &second, &other] {
            storage.create_alert(alert).await.unwrap();
        }

        let for_a = storage
            .list_alerts(&AlertFilter {
                entity_id: Some("a".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[0].id, second.id);
        assert_eq!(for_a[0].details, Some(json!({"outgoing": ["b"]})));

        let medium = storage
            .list_alerts(&AlertFilter {
                severity: Some(Severity::Medium),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(medium.len(), 1);

        let recent = storage
            .list_alerts(&AlertFilter {
                since: Some(Utc::now() - Duration::hours(1)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(recent.iter().all(|a| a.id != first.id));
    }
}

#[cfg(test)]
mod file_storage_tests {
    use super::*;

    #[tokio::test]
    async fn test_file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested").join("trust.db"),
            max_connections: 2,
        };

        {
            let storage = SqliteStorage::new(&config).await.unwrap();
            seed_entities(&storage, &["a", "b"]).await;
            storage
                .create_relationship(&TrustRelationship::new("a", "b", 0.8).with_id("ab"))
                .await
                .unwrap();
            storage.pool().close().await;
        }

        let reopened = SqliteStorage::new(&config).await.unwrap();
        assert_eq!(reopened.list_entities().await.unwrap().len(), 2);
        let rel = reopened.get_relationship("ab").await.unwrap().unwrap();
        assert_eq!(rel.trust_score, 0.8);
    }
}
