//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state wiring the graph and drift components

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::drift::{DriftCalculator, PatternDetector, SnapshotManager};
use crate::error::AppResult;
use crate::events::Notifier;
use crate::graph::TrustGraph;
use crate::scheduler::Scheduler;
use crate::storage::SharedStorage;

/// Application state shared across handlers.
///
/// Every component shares the same backing store and notifier; the
/// snapshot manager reads the same graph instance the handlers mutate.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Injected backing store.
    pub storage: SharedStorage,
    /// Live trust graph.
    pub graph: Arc<TrustGraph>,
    /// Snapshot capture and history.
    pub snapshots: SnapshotManager,
    /// Drift calculation and alerting.
    pub drift: DriftCalculator,
    /// Drift pattern analysis.
    pub patterns: PatternDetector,
}

impl AppState {
    /// Hydrate the graph from `storage` and build the drift components.
    pub async fn new(
        config: Config,
        storage: SharedStorage,
        notifier: Notifier,
    ) -> AppResult<Self> {
        let graph = TrustGraph::load(storage.clone(), notifier.clone())
            .await?
            .with_path_config(config.paths.clone())
            .with_anomaly_config(config.anomalies.clone());
        let graph = Arc::new(graph);

        let snapshots = SnapshotManager::new(graph.clone(), storage.clone(), notifier.clone());
        let drift =
            DriftCalculator::new(storage.clone(), notifier).with_config(config.drift.clone());
        let patterns = PatternDetector::new(storage.clone()).with_config(config.patterns.clone());

        info!(
            max_path_length = config.paths.max_length_limit,
            drift_period = %config.scheduler.drift_period,
            "Application state initialized"
        );

        Ok(Self {
            config,
            storage,
            graph,
            snapshots,
            drift,
            patterns,
        })
    }

    /// Spawn the scheduled sweeps configured for this state.
    pub fn start_scheduler(&self) -> Scheduler {
        Scheduler::start(
            &self.config.scheduler,
            self.graph.clone(),
            self.snapshots.clone(),
            self.drift.clone(),
        )
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PathConfig, SchedulerConfig};
    use crate::drift::TimePeriod;
    use crate::storage::{Entity, SqliteStorage, Storage, TrustRelationship};

    async fn create_storage() -> SharedStorage {
        Arc::new(SqliteStorage::new_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_app_state_new_applies_config() {
        let config = Config {
            paths: PathConfig {
                default_min_trust: 0.0,
                default_max_length: 2,
                max_length_limit: 4,
            },
            ..Config::default()
        };

        let state = AppState::new(config, create_storage().await, Notifier::noop())
            .await
            .unwrap();

        assert_eq!(state.graph.path_config().default_max_length, 2);
        assert_eq!(state.graph.path_config().max_length_limit, 4);
    }

    #[tokio::test]
    async fn test_app_state_hydrates_graph_from_storage() {
        let storage = create_storage().await;
        storage
            .create_entity(&Entity::new("Alice", "person").with_id("alice"))
            .await
            .unwrap();
        storage
            .create_entity(&Entity::new("Bob", "person").with_id("bob"))
            .await
            .unwrap();
        storage
            .create_relationship(&TrustRelationship::new("alice", "bob", 0.7))
            .await
            .unwrap();

        let state = AppState::new(Config::default(), storage, Notifier::noop())
            .await
            .unwrap();

        assert_eq!(state.graph.direct_trust("alice", "bob").await, Some(0.7));
    }

    #[tokio::test]
    async fn test_snapshots_share_graph_with_state() {
        let state = AppState::new(Config::default(), create_storage().await, Notifier::noop())
            .await
            .unwrap();
        state
            .graph
            .add_entity(Entity::new("Alice", "person").with_id("alice"))
            .await
            .unwrap();

        let snapshot = state.snapshots.create_snapshot("alice").await.unwrap();
        let stored = state.storage.get_snapshot(&snapshot.id).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_shared_state_type() {
        let state = AppState::new(Config::default(), create_storage().await, Notifier::noop())
            .await
            .unwrap();
        let shared: SharedState = Arc::new(state);

        let shared2 = Arc::clone(&shared);
        assert_eq!(Arc::strong_count(&shared), 2);
        drop(shared2);
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[tokio::test]
    async fn test_start_scheduler_respects_disabled_sweeps() {
        let config = Config {
            scheduler: SchedulerConfig {
                snapshot_interval_secs: 0,
                drift_interval_secs: 60,
                drift_period: TimePeriod::Day,
            },
            ..Config::default()
        };
        let state = AppState::new(config, create_storage().await, Notifier::noop())
            .await
            .unwrap();

        let scheduler = state.start_scheduler();
        assert_eq!(scheduler.task_count(), 1);
        scheduler.shutdown().await;
    }
}
