//! Scheduled snapshot and drift sweeps.
//!
//! The snapshot sweep purges expired relationships and then snapshots every
//! entity; the drift sweep calculates drift for every entity at the
//! configured period. Each runs on its own `tokio` interval until
//! [`Scheduler::shutdown`] is called.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::drift::{DriftCalculator, DriftSweep, SnapshotManager, TimePeriod};
use crate::error::DriftResult;
use crate::graph::TrustGraph;

/// Purge expired relationships, then snapshot every entity.
///
/// A failed purge is logged and does not stop the snapshots.
pub async fn run_snapshot_sweep(
    graph: &TrustGraph,
    snapshots: &SnapshotManager,
) -> DriftResult<usize> {
    match graph.purge_expired(Utc::now()).await {
        Ok(purged) if !purged.is_empty() => {
            debug!(purged = purged.len(), "Purged expired relationships before snapshot sweep");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Failed to purge expired relationships"),
    }
    Ok(snapshots.snapshot_all().await?.len())
}

/// Calculate drift for every entity in the graph.
pub async fn run_drift_sweep(
    graph: &TrustGraph,
    calculator: &DriftCalculator,
    period: TimePeriod,
) -> DriftResult<DriftSweep> {
    let entity_ids = graph.entity_ids().await;
    calculator.calculate_drift_all(&entity_ids, period).await
}

/// Handle to the background sweep tasks.
#[derive(Debug)]
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the sweeps enabled in `config` (an interval of 0 disables one).
    pub fn start(
        config: &SchedulerConfig,
        graph: Arc<TrustGraph>,
        snapshots: SnapshotManager,
        calculator: DriftCalculator,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut handles = Vec::new();

        if config.snapshot_interval_secs > 0 {
            let period = Duration::from_secs(config.snapshot_interval_secs);
            let mut stop = shutdown.subscribe();
            let graph = Arc::clone(&graph);
            handles.push(tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match run_snapshot_sweep(&graph, &snapshots).await {
                                Ok(count) => info!(snapshots = count, "Snapshot sweep finished"),
                                Err(e) => error!(error = %e, "Scheduled snapshot sweep failed"),
                            }
                        }
                        _ = stop.changed() => break,
                    }
                }
                debug!("Snapshot sweep stopped");
            }));
        }

        if config.drift_interval_secs > 0 {
            let period = Duration::from_secs(config.drift_interval_secs);
            let drift_period = config.drift_period;
            let mut stop = shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match run_drift_sweep(&graph, &calculator, drift_period).await {
                                Ok(sweep) => info!(
                                    calculated = sweep.calculated.len(),
                                    alerts = sweep.alert_count(),
                                    "Scheduled drift sweep finished"
                                ),
                                Err(e) => error!(error = %e, "Scheduled drift sweep failed"),
                            }
                        }
                        _ = stop.changed() => break,
                    }
                }
                debug!("Drift sweep stopped");
            }));
        }

        info!(
            snapshot_interval_secs = config.snapshot_interval_secs,
            drift_interval_secs = config.drift_interval_secs,
            drift_period = %config.drift_period,
            "Scheduler started"
        );
        Self { shutdown, handles }
    }

    /// Number of running sweep tasks.
    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Signal every sweep to stop and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sweep task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Notifier;
    use crate::graph::RelationshipUpdate;
    use crate::storage::{Entity, SharedStorage, SqliteStorage, TrustRelationship};
    use chrono::Duration as ChronoDuration;

    async fn setup() -> (Arc<TrustGraph>, SnapshotManager, DriftCalculator) {
        let storage: SharedStorage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let graph = Arc::new(TrustGraph::new(storage.clone(), Notifier::noop()));
        for id in ["a", "b"] {
            graph
                .add_entity(Entity::new(id, "agent").with_id(id))
                .await
                .unwrap();
        }
        let snapshots = SnapshotManager::new(graph.clone(), storage.clone(), Notifier::noop());
        let calculator = DriftCalculator::new(storage, Notifier::noop());
        (graph, snapshots, calculator)
    }

    #[tokio::test]
    async fn test_snapshot_sweep_purges_expired_first() {
        let (graph, snapshots, _) = setup().await;
        graph
            .add_relationship(
                TrustRelationship::new("a", "b", 0.8)
                    .with_id("stale")
                    .with_expiration(Utc::now() - ChronoDuration::minutes(1)),
            )
            .await
            .unwrap();

        let count = run_snapshot_sweep(&graph, &snapshots).await.unwrap();
        assert_eq!(count, 2);
        assert!(graph.get_relationship("stale").await.is_none());

        let latest = snapshots.get_latest_snapshot("a").await.unwrap().unwrap();
        assert!(latest.outgoing_trust.is_empty());
    }

    #[tokio::test]
    async fn test_drift_sweep_counts_insufficient() {
        let (graph, snapshots, calculator) = setup().await;
        let rel = graph
            .add_relationship(TrustRelationship::new("a", "b", 0.9))
            .await
            .unwrap();

        run_snapshot_sweep(&graph, &snapshots).await.unwrap();
        let sweep = run_drift_sweep(&graph, &calculator, TimePeriod::Day).await.unwrap();
        assert!(sweep.calculated.is_empty());
        assert_eq!(sweep.insufficient_data, vec!["a", "b"]);

        graph
            .update_relationship(&rel.id, RelationshipUpdate::score(0.3))
            .await
            .unwrap();
        run_snapshot_sweep(&graph, &snapshots).await.unwrap();
        let sweep = run_drift_sweep(&graph, &calculator, TimePeriod::Day).await.unwrap();
        assert_eq!(sweep.calculated.len(), 2);
        assert!(sweep.alert_count() > 0);
    }

    #[tokio::test]
    async fn test_scheduler_start_and_shutdown() {
        let (graph, snapshots, calculator) = setup().await;
        let config = SchedulerConfig {
            snapshot_interval_secs: 3600,
            drift_interval_secs: 0,
            drift_period: TimePeriod::Week,
        };

        let scheduler = Scheduler::start(&config, graph, snapshots, calculator);
        assert_eq!(scheduler.task_count(), 1);
        scheduler.shutdown().await;
    }
}
