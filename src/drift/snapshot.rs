//! Snapshot capture and history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{DriftError, DriftResult, GraphError};
use crate::events::{Notifier, TrustEvent, TrustEventType};
use crate::graph::TrustGraph;
use crate::storage::{SharedStorage, TrustSnapshot};

/// Captures immutable trust snapshots from the live graph.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    graph: Arc<TrustGraph>,
    storage: SharedStorage,
    notifier: Notifier,
}

impl SnapshotManager {
    /// Create a manager reading from `graph` and persisting to `storage`.
    pub fn new(graph: Arc<TrustGraph>, storage: SharedStorage, notifier: Notifier) -> Self {
        Self {
            graph,
            storage,
            notifier,
        }
    }

    /// Capture the entity's current trust neighborhood.
    pub async fn create_snapshot(&self, entity_id: &str) -> DriftResult<TrustSnapshot> {
        self.create_snapshot_at(entity_id, Utc::now()).await
    }

    /// Capture the entity's current trust neighborhood, stamped with
    /// `timestamp` (used for backfills).
    pub async fn create_snapshot_at(
        &self,
        entity_id: &str,
        timestamp: DateTime<Utc>,
    ) -> DriftResult<TrustSnapshot> {
        let neighborhood = self.graph.neighborhood(entity_id).await.map_err(|e| match e {
            GraphError::Storage(e) => DriftError::Storage(e),
            _ => DriftError::EntityNotFound {
                entity_id: entity_id.to_string(),
            },
        })?;

        let snapshot = TrustSnapshot::new(
            entity_id,
            timestamp,
            neighborhood.incoming,
            neighborhood.outgoing,
        );
        self.storage.create_snapshot(&snapshot).await?;

        info!(
            entity_id = %entity_id,
            snapshot_id = %snapshot.id,
            incoming = snapshot.incoming_trust.len(),
            outgoing = snapshot.outgoing_trust.len(),
            "Snapshot created"
        );
        self.notifier.emit(
            TrustEvent::new(TrustEventType::SnapshotCreated)
                .with_entity(entity_id)
                .with_snapshot(&snapshot.id)
                .with_details(json!({
                    "avg_incoming_trust": snapshot.avg_incoming_trust,
                    "avg_outgoing_trust": snapshot.avg_outgoing_trust,
                })),
        );
        Ok(snapshot)
    }

    /// Snapshot every entity currently in the graph.
    ///
    /// Entities deleted while the sweep runs are skipped.
    pub async fn snapshot_all(&self) -> DriftResult<Vec<TrustSnapshot>> {
        let entity_ids = self.graph.entity_ids().await;
        let timestamp = Utc::now();
        let mut snapshots = Vec::with_capacity(entity_ids.len());

        for entity_id in &entity_ids {
            match self.create_snapshot_at(entity_id, timestamp).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(DriftError::EntityNotFound { .. }) => {
                    debug!(entity_id = %entity_id, "Entity vanished during snapshot sweep");
                }
                Err(e) => return Err(e),
            }
        }

        info!(snapshots = snapshots.len(), "Snapshot sweep complete");
        Ok(snapshots)
    }

    /// Fetch a snapshot by ID.
    pub async fn get_snapshot(&self, id: &str) -> DriftResult<Option<TrustSnapshot>> {
        Ok(self.storage.get_snapshot(id).await?)
    }

    /// Most recent snapshot of an entity.
    pub async fn get_latest_snapshot(&self, entity_id: &str) -> DriftResult<Option<TrustSnapshot>> {
        Ok(self.storage.get_latest_snapshot(entity_id).await?)
    }

    /// Snapshots of an entity, oldest first, keeping only the most recent
    /// `limit` when given.
    pub async fn list_snapshots(
        &self,
        entity_id: &str,
        limit: Option<usize>,
    ) -> DriftResult<Vec<TrustSnapshot>> {
        let mut snapshots = self.storage.list_snapshots(entity_id).await?;
        if let Some(limit) = limit {
            let skip = snapshots.len().saturating_sub(limit);
            snapshots.drain(..skip);
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelPublisher;
    use crate::graph::RelationshipUpdate;
    use crate::storage::{Entity, SqliteStorage, TrustRelationship};
    use chrono::Duration;

    async fn setup() -> (Arc<TrustGraph>, SnapshotManager) {
        let storage: SharedStorage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let graph = Arc::new(TrustGraph::new(storage.clone(), Notifier::noop()));
        for id in ["a", "b", "c"] {
            graph
                .add_entity(Entity::new(id, "agent").with_id(id))
                .await
                .unwrap();
        }
        let manager = SnapshotManager::new(graph.clone(), storage, Notifier::noop());
        (graph, manager)
    }

    #[tokio::test]
    async fn test_create_snapshot_captures_neighborhood() {
        let (graph, manager) = setup().await;
        graph
            .add_relationship(TrustRelationship::new("a", "b", 0.9))
            .await
            .unwrap();
        graph
            .add_relationship(TrustRelationship::new("a", "c", 0.5))
            .await
            .unwrap();
        graph
            .add_relationship(TrustRelationship::new("c", "a", 0.4))
            .await
            .unwrap();

        let snapshot = manager.create_snapshot("a").await.unwrap();
        assert_eq!(snapshot.outgoing_trust.len(), 2);
        assert!((snapshot.avg_outgoing_trust - 0.7).abs() < 1e-9);
        assert_eq!(snapshot.incoming_trust["c"], 0.4);
        assert!((snapshot.avg_incoming_trust - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_snapshot_is_immutable_record() {
        let (graph, manager) = setup().await;
        let rel = graph
            .add_relationship(TrustRelationship::new("a", "b", 0.9))
            .await
            .unwrap();

        let first = manager.create_snapshot("a").await.unwrap();
        graph
            .update_relationship(&rel.id, RelationshipUpdate::score(0.3))
            .await
            .unwrap();

        let stored = manager.get_snapshot(&first.id).await.unwrap().unwrap();
        assert_eq!(stored.outgoing_trust["b"], 0.9);
    }

    #[tokio::test]
    async fn test_create_snapshot_unknown_entity() {
        let (_, manager) = setup().await;
        let err = manager.create_snapshot("ghost").await.unwrap_err();
        assert!(matches!(err, DriftError::EntityNotFound { .. }));
    }

    #[tokio::test]
    async fn test_latest_and_list_with_limit() {
        let (_, manager) = setup().await;
        let base = Utc::now() - Duration::days(3);
        for day in 0..3 {
            manager
                .create_snapshot_at("a", base + Duration::days(day))
                .await
                .unwrap();
        }

        let latest = manager.get_latest_snapshot("a").await.unwrap().unwrap();
        let all = manager.list_snapshots("a", None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].id, latest.id);

        let recent = manager.list_snapshots("a", Some(2)).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].id, latest.id);

        assert!(manager.get_latest_snapshot("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_all_emits_events() {
        let storage: SharedStorage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let graph = Arc::new(TrustGraph::new(storage.clone(), Notifier::noop()));
        for id in ["a", "b"] {
            graph
                .add_entity(Entity::new(id, "agent").with_id(id))
                .await
                .unwrap();
        }
        let (publisher, mut receiver) = ChannelPublisher::channel();
        let manager = SnapshotManager::new(graph, storage, Notifier::new(Arc::new(publisher)));

        let snapshots = manager.snapshot_all().await.unwrap();
        assert_eq!(snapshots.len(), 2);

        let mut events = 0;
        while let Ok(event) = receiver.try_recv() {
            assert_eq!(event.event_type, TrustEventType::SnapshotCreated);
            events += 1;
        }
        assert_eq!(events, 2);
    }
}
