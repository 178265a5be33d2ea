//! Drift calculation between snapshots and threshold alerts.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use super::timeseries::mean;
use super::TimePeriod;
use crate::config::DriftConfig;
use crate::error::DriftResult;
use crate::events::{Notifier, TrustEvent, TrustEventType};
use crate::storage::{
    AlertFilter, AlertType, DriftAlert, DriftDirection, Severity, SharedStorage, TrustDrift,
    TrustMap, TrustSnapshot,
};

/// A calculated drift and the alerts it raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    /// The stored drift record.
    pub drift: TrustDrift,
    /// Alerts raised by the drift, possibly none.
    pub alerts: Vec<DriftAlert>,
}

/// Result of a drift request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriftOutcome {
    /// Two snapshots were compared.
    Calculated(DriftReport),
    /// Fewer than two snapshots exist for the entity.
    InsufficientData {
        /// Entity requested.
        entity_id: String,
        /// Snapshots available.
        available_snapshots: usize,
    },
}

impl DriftOutcome {
    /// The report, if a drift was calculated.
    pub fn report(&self) -> Option<&DriftReport> {
        match self {
            DriftOutcome::Calculated(report) => Some(report),
            DriftOutcome::InsufficientData { .. } => None,
        }
    }
}

/// Totals from a drift sweep over many entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftSweep {
    /// Drifts calculated.
    pub calculated: Vec<DriftReport>,
    /// Entities with fewer than two snapshots.
    pub insufficient_data: Vec<String>,
}

impl DriftSweep {
    /// Total alerts raised across the sweep.
    pub fn alert_count(&self) -> usize {
        self.calculated.iter().map(|r| r.alerts.len()).sum()
    }
}

/// Compares snapshots, persists drifts and raises alerts.
#[derive(Debug, Clone)]
pub struct DriftCalculator {
    storage: SharedStorage,
    notifier: Notifier,
    config: DriftConfig,
}

impl DriftCalculator {
    /// Create a calculator with default thresholds.
    pub fn new(storage: SharedStorage, notifier: Notifier) -> Self {
        Self {
            storage,
            notifier,
            config: DriftConfig::default(),
        }
    }

    /// Use the given thresholds.
    pub fn with_config(mut self, config: DriftConfig) -> Self {
        self.config = config;
        self
    }

    /// Compare the entity's latest snapshot with the one closest to one
    /// `period` earlier.
    pub async fn calculate_drift(
        &self,
        entity_id: &str,
        period: TimePeriod,
    ) -> DriftResult<DriftOutcome> {
        let snapshots = self.storage.list_snapshots(entity_id).await?;
        let Some((start, end)) = select_snapshots(&snapshots, period) else {
            debug!(
                entity_id = %entity_id,
                available = snapshots.len(),
                "Insufficient snapshots for drift"
            );
            return Ok(DriftOutcome::InsufficientData {
                entity_id: entity_id.to_string(),
                available_snapshots: snapshots.len(),
            });
        };

        let drift = compute_drift(start, end, period, &self.config);
        let alerts = evaluate_alerts(&drift, &self.config);
        self.storage.create_drift_with_alerts(&drift, &alerts).await?;

        info!(
            entity_id = %entity_id,
            drift_id = %drift.id,
            magnitude = drift.drift_magnitude,
            direction = %drift.drift_direction,
            alerts = alerts.len(),
            "Drift calculated"
        );
        self.notifier.emit(
            TrustEvent::new(TrustEventType::DriftCalculated)
                .with_entity(entity_id)
                .with_drift(&drift.id)
                .with_details(json!({
                    "time_period": drift.time_period,
                    "drift_magnitude": drift.drift_magnitude,
                    "drift_direction": drift.drift_direction,
                })),
        );
        for alert in &alerts {
            self.notifier.emit(
                TrustEvent::new(TrustEventType::AlertCreated)
                    .with_entity(entity_id)
                    .with_drift(&drift.id)
                    .with_alert(&alert.id)
                    .with_details(json!({
                        "alert_type": alert.alert_type,
                        "severity": alert.severity,
                    })),
            );
        }

        Ok(DriftOutcome::Calculated(DriftReport { drift, alerts }))
    }

    /// Calculate drift for each entity in turn.
    pub async fn calculate_drift_all(
        &self,
        entity_ids: &[String],
        period: TimePeriod,
    ) -> DriftResult<DriftSweep> {
        let mut sweep = DriftSweep::default();
        for entity_id in entity_ids {
            match self.calculate_drift(entity_id, period).await? {
                DriftOutcome::Calculated(report) => sweep.calculated.push(report),
                DriftOutcome::InsufficientData { entity_id, .. } => {
                    sweep.insufficient_data.push(entity_id)
                }
            }
        }

        info!(
            calculated = sweep.calculated.len(),
            insufficient = sweep.insufficient_data.len(),
            alerts = sweep.alert_count(),
            period = %period,
            "Drift sweep complete"
        );
        Ok(sweep)
    }

    /// Fetch a drift by ID.
    pub async fn get_drift(&self, id: &str) -> DriftResult<Option<TrustDrift>> {
        Ok(self.storage.get_drift(id).await?)
    }

    /// Drifts of an entity, oldest first, keeping only the most recent
    /// `limit` when given.
    pub async fn list_drifts(
        &self,
        entity_id: &str,
        limit: Option<usize>,
    ) -> DriftResult<Vec<TrustDrift>> {
        let mut drifts = self.storage.list_drifts(entity_id).await?;
        if let Some(limit) = limit {
            let skip = drifts.len().saturating_sub(limit);
            drifts.drain(..skip);
        }
        Ok(drifts)
    }

    /// Alerts matching `filter`, newest first.
    pub async fn list_alerts(&self, filter: &AlertFilter) -> DriftResult<Vec<DriftAlert>> {
        Ok(self.storage.list_alerts(filter).await?)
    }
}

/// Pick the (start, end) pair: end is the latest snapshot, start is the
/// earlier snapshot closest to `end - period`, the older one on ties.
///
/// `snapshots` must be ordered oldest first.
pub fn select_snapshots(
    snapshots: &[TrustSnapshot],
    period: TimePeriod,
) -> Option<(&TrustSnapshot, &TrustSnapshot)> {
    let (end, earlier) = snapshots.split_last()?;
    let target = end.timestamp - period.duration();

    let mut best: Option<(&TrustSnapshot, i64)> = None;
    for snapshot in earlier {
        let distance = distance_ms(snapshot.timestamp, target);
        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((snapshot, distance));
        }
    }
    best.map(|(start, _)| (start, end))
}

fn distance_ms(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    (a - b).num_milliseconds().abs()
}

/// Per-counterpart `end - start` over the union of both maps.
fn deltas(start: &TrustMap, end: &TrustMap) -> TrustMap {
    let keys: BTreeSet<&String> = start.keys().chain(end.keys()).collect();
    keys.into_iter()
        .map(|k| {
            let delta = end.get(k).copied().unwrap_or(0.0) - start.get(k).copied().unwrap_or(0.0);
            (k.clone(), delta)
        })
        .collect()
}

/// Build the drift record between two snapshots of the same entity.
pub fn compute_drift(
    start: &TrustSnapshot,
    end: &TrustSnapshot,
    period: TimePeriod,
    config: &DriftConfig,
) -> TrustDrift {
    let incoming = deltas(&start.incoming_trust, &end.incoming_trust);
    let outgoing = deltas(&start.outgoing_trust, &end.outgoing_trust);

    let incoming_values: Vec<f64> = incoming.values().copied().collect();
    let outgoing_values: Vec<f64> = outgoing.values().copied().collect();
    let absolute: Vec<f64> = incoming_values
        .iter()
        .chain(&outgoing_values)
        .map(|d| d.abs())
        .collect();

    let avg_incoming_drift = mean(&incoming_values);
    let avg_outgoing_drift = mean(&outgoing_values);
    let drift_magnitude = mean(&absolute);

    let drift_direction = if drift_magnitude < config.stable_threshold {
        DriftDirection::Stable
    } else if (avg_incoming_drift + avg_outgoing_drift) / 2.0 > 0.0 {
        DriftDirection::Increasing
    } else {
        DriftDirection::Decreasing
    };

    TrustDrift {
        id: Uuid::new_v4().to_string(),
        entity_id: end.entity_id.clone(),
        start_snapshot_id: start.id.clone(),
        end_snapshot_id: end.id.clone(),
        time_period: period.label().to_string(),
        start_timestamp: start.timestamp,
        end_timestamp: end.timestamp,
        incoming_trust_drift: incoming,
        outgoing_trust_drift: outgoing,
        avg_incoming_drift,
        avg_outgoing_drift,
        drift_magnitude,
        drift_direction,
        created_at: Utc::now(),
    }
}

/// Threshold checks, each evaluated independently.
pub fn evaluate_alerts(drift: &TrustDrift, config: &DriftConfig) -> Vec<DriftAlert> {
    let mut alerts = Vec::new();

    if drift.drift_magnitude > config.rapid_decrease_magnitude
        && drift.drift_direction == DriftDirection::Decreasing
    {
        alerts.push(DriftAlert::new(
            drift,
            AlertType::RapidTrustDecrease,
            Severity::High,
            format!(
                "Rapid trust decrease for entity {} (magnitude {:.2})",
                drift.entity_id, drift.drift_magnitude
            ),
        ));
    }

    if drift.drift_magnitude > config.unusual_increase_magnitude
        && drift.drift_direction == DriftDirection::Increasing
    {
        alerts.push(DriftAlert::new(
            drift,
            AlertType::UnusualTrustIncrease,
            Severity::Medium,
            format!(
                "Unusual trust increase for entity {} (magnitude {:.2})",
                drift.entity_id, drift.drift_magnitude
            ),
        ));
    }

    let asymmetry = (drift.avg_incoming_drift - drift.avg_outgoing_drift).abs();
    if asymmetry > config.asymmetry_threshold {
        alerts.push(
            DriftAlert::new(
                drift,
                AlertType::TrustAsymmetry,
                Severity::Medium,
                format!(
                    "Incoming and outgoing trust drift diverge for entity {} ({:+.2} vs {:+.2})",
                    drift.entity_id, drift.avg_incoming_drift, drift.avg_outgoing_drift
                ),
            )
            .with_details(json!({ "asymmetry": asymmetry })),
        );
    }

    let significant = |map: &TrustMap| -> TrustMap {
        map.iter()
            .filter(|(_, d)| d.abs() > config.relationship_change_threshold)
            .map(|(k, d)| (k.clone(), *d))
            .collect()
    };
    let incoming = significant(&drift.incoming_trust_drift);
    let outgoing = significant(&drift.outgoing_trust_drift);
    if !incoming.is_empty() || !outgoing.is_empty() {
        let counterparts: BTreeSet<&String> = incoming.keys().chain(outgoing.keys()).collect();
        let names: Vec<&str> = counterparts.iter().map(|s| s.as_str()).collect();
        alerts.push(
            DriftAlert::new(
                drift,
                AlertType::SignificantRelationshipChanges,
                Severity::Medium,
                format!(
                    "Significant trust changes for entity {} with: {}",
                    drift.entity_id,
                    names.join(", ")
                ),
            )
            .with_details(json!({ "incoming": incoming, "outgoing": outgoing })),
        );
    }

    alerts
}
