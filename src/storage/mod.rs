//! Storage layer for trust graph persistence.
//!
//! This module provides the record types shared by the graph, snapshot and
//! drift components, and the [`Storage`] trait they are constructed with.
//! [`SqliteStorage`] is the SQLite-backed implementation.

mod sqlite;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use sqlite::SqliteStorage;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// Open key-value attribute map carried by entities and relationships.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Per-counterpart trust scores, keyed by counterpart entity ID.
pub type TrustMap = BTreeMap<String, f64>;

/// A node in the trust graph: an agent, service, or user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique entity identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Free-form category (e.g., "agent", "service", "user").
    pub entity_type: String,
    /// Open attribute map.
    #[serde(default)]
    pub attributes: Attributes,
    /// When the entity was registered.
    pub created_at: DateTime<Utc>,
    /// When the entity was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A directed, weighted trust edge from `source_id` to `target_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustRelationship {
    /// Unique relationship identifier.
    pub id: String,
    /// Entity that extends trust.
    pub source_id: String,
    /// Entity that is trusted.
    pub target_id: String,
    /// Trust score (0.0-1.0).
    pub trust_score: f64,
    /// Free-form relationship type (e.g., "delegation", "verification").
    pub relationship_type: String,
    /// Open attribute map.
    #[serde(default)]
    pub attributes: Attributes,
    /// Optional instant after which the relationship no longer carries trust.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
    /// When the relationship was created.
    pub created_at: DateTime<Utc>,
    /// When the relationship was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Immutable capture of one entity's trust neighborhood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustSnapshot {
    /// Unique snapshot identifier.
    pub id: String,
    /// Entity the snapshot describes.
    pub entity_id: String,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Trust others extend to this entity, keyed by source.
    pub incoming_trust: TrustMap,
    /// Trust this entity extends to others, keyed by target.
    pub outgoing_trust: TrustMap,
    /// Mean of `incoming_trust` (0.0 when empty).
    pub avg_incoming_trust: f64,
    /// Mean of `outgoing_trust` (0.0 when empty).
    pub avg_outgoing_trust: f64,
}

/// Overall direction of a trust drift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftDirection {
    /// Trust rose across the neighborhood.
    Increasing,
    /// Trust fell across the neighborhood.
    Decreasing,
    /// Change below the stability threshold.
    #[default]
    Stable,
}

impl std::fmt::Display for DriftDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftDirection::Increasing => write!(f, "increasing"),
            DriftDirection::Decreasing => write!(f, "decreasing"),
            DriftDirection::Stable => write!(f, "stable"),
        }
    }
}

impl std::str::FromStr for DriftDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "increasing" => Ok(DriftDirection::Increasing),
            "decreasing" => Ok(DriftDirection::Decreasing),
            "stable" => Ok(DriftDirection::Stable),
            _ => Err(format!("Unknown drift direction: {}", s)),
        }
    }
}

/// Difference between two snapshots of the same entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustDrift {
    /// Unique drift identifier.
    pub id: String,
    /// Entity the drift describes.
    pub entity_id: String,
    /// Earlier snapshot.
    pub start_snapshot_id: String,
    /// Later snapshot.
    pub end_snapshot_id: String,
    /// Period label the drift was requested for (e.g., "7d").
    pub time_period: String,
    /// Capture time of the start snapshot.
    pub start_timestamp: DateTime<Utc>,
    /// Capture time of the end snapshot.
    pub end_timestamp: DateTime<Utc>,
    /// Incoming trust delta per counterpart (end - start).
    pub incoming_trust_drift: TrustMap,
    /// Outgoing trust delta per counterpart (end - start).
    pub outgoing_trust_drift: TrustMap,
    /// Mean incoming delta.
    pub avg_incoming_drift: f64,
    /// Mean outgoing delta.
    pub avg_outgoing_drift: f64,
    /// Mean absolute delta across all counterparts.
    pub drift_magnitude: f64,
    /// Overall direction.
    pub drift_direction: DriftDirection,
    /// When the drift was calculated.
    pub created_at: DateTime<Utc>,
}

/// Severity shared by drift alerts and graph anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Worth noting.
    Low,
    /// Needs review.
    Medium,
    /// Needs action.
    High,
}

impl Severity {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// Kind of drift alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Large drift in the decreasing direction.
    RapidTrustDecrease,
    /// Large drift in the increasing direction.
    UnusualTrustIncrease,
    /// Incoming and outgoing drift diverge.
    TrustAsymmetry,
    /// One or more counterparts changed sharply.
    SignificantRelationshipChanges,
}

impl AlertType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::RapidTrustDecrease => "rapid_trust_decrease",
            AlertType::UnusualTrustIncrease => "unusual_trust_increase",
            AlertType::TrustAsymmetry => "trust_asymmetry",
            AlertType::SignificantRelationshipChanges => "significant_relationship_changes",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rapid_trust_decrease" => Ok(AlertType::RapidTrustDecrease),
            "unusual_trust_increase" => Ok(AlertType::UnusualTrustIncrease),
            "trust_asymmetry" => Ok(AlertType::TrustAsymmetry),
            "significant_relationship_changes" => Ok(AlertType::SignificantRelationshipChanges),
            _ => Err(format!("Unknown alert type: {}", s)),
        }
    }
}

/// Alert raised as a side effect of drift calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAlert {
    /// Unique alert identifier.
    pub id: String,
    /// Drift that triggered the alert.
    pub drift_id: String,
    /// Entity the drift describes.
    pub entity_id: String,
    /// Kind of alert.
    pub alert_type: AlertType,
    /// Alert severity.
    pub severity: Severity,
    /// Human-readable description.
    pub description: String,
    /// Structured context (e.g., the counterparts involved).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,
}

/// Filter for listing alerts. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertFilter {
    /// Only alerts for this entity.
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Only alerts of this kind.
    #[serde(default)]
    pub alert_type: Option<AlertType>,
    /// Only alerts of this severity.
    #[serde(default)]
    pub severity: Option<Severity>,
    /// Only alerts raised at or after this instant.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Maximum number of alerts (newest first).
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Entity {
    /// Create a new entity with a generated ID.
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            entity_type: entity_type.into(),
            attributes: Attributes::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Use a caller-chosen ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set one attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Replace the attribute map.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

impl TrustRelationship {
    /// Create a new relationship with a generated ID and the "general" type.
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        trust_score: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            trust_score,
            relationship_type: "general".to_string(),
            attributes: Attributes::new(),
            expiration: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Use a caller-chosen ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the relationship type.
    pub fn with_type(mut self, relationship_type: impl Into<String>) -> Self {
        self.relationship_type = relationship_type.into();
        self
    }

    /// Set one attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Set the expiration instant.
    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Whether the relationship has expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|exp| exp <= now)
    }
}

impl TrustSnapshot {
    /// Build a snapshot from captured trust maps, computing the averages.
    pub fn new(
        entity_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        incoming_trust: TrustMap,
        outgoing_trust: TrustMap,
    ) -> Self {
        let avg_incoming_trust = mean_of(&incoming_trust);
        let avg_outgoing_trust = mean_of(&outgoing_trust);
        Self {
            id: Uuid::new_v4().to_string(),
            entity_id: entity_id.into(),
            timestamp,
            incoming_trust,
            outgoing_trust,
            avg_incoming_trust,
            avg_outgoing_trust,
        }
    }
}

impl DriftAlert {
    /// Create a new alert for a drift.
    pub fn new(
        drift: &TrustDrift,
        alert_type: AlertType,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            drift_id: drift.id.clone(),
            entity_id: drift.entity_id.clone(),
            alert_type,
            severity,
            description: description.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl AlertFilter {
    /// Whether an alert passes every set criterion (ignores `limit`).
    pub fn matches(&self, alert: &DriftAlert) -> bool {
        self.entity_id
            .as_ref()
            .is_none_or(|id| &alert.entity_id == id)
            && self.alert_type.is_none_or(|t| alert.alert_type == t)
            && self.severity.is_none_or(|s| alert.severity == s)
            && self.since.is_none_or(|since| alert.timestamp >= since)
    }
}

fn mean_of(values: &TrustMap) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.values().sum::<f64>() / values.len() as f64
    }
}

/// Storage trait for the injected backing store.
///
/// Entities and relationships are written through by the graph; snapshots,
/// drifts and alerts are append-only records.
#[async_trait]
pub trait Storage: Send + Sync {
    // Entity operations

    /// Insert a new entity.
    async fn create_entity(&self, entity: &Entity) -> StorageResult<()>;
    /// Overwrite an existing entity. Returns `false` if it does not exist.
    async fn update_entity(&self, entity: &Entity) -> StorageResult<bool>;
    /// Fetch an entity by ID.
    async fn get_entity(&self, id: &str) -> StorageResult<Option<Entity>>;
    /// All entities in registration order.
    async fn list_entities(&self) -> StorageResult<Vec<Entity>>;
    /// Delete an entity and every incident relationship in one transaction.
    ///
    /// Returns the IDs of the deleted relationships, or `None` if the entity
    /// does not exist (in which case nothing is touched).
    async fn delete_entity_cascade(&self, id: &str) -> StorageResult<Option<Vec<String>>>;

    // Relationship operations

    /// Insert a new relationship.
    async fn create_relationship(&self, relationship: &TrustRelationship) -> StorageResult<()>;
    /// Overwrite an existing relationship. Returns `false` if it does not exist.
    async fn update_relationship(&self, relationship: &TrustRelationship) -> StorageResult<bool>;
    /// Fetch a relationship by ID.
    async fn get_relationship(&self, id: &str) -> StorageResult<Option<TrustRelationship>>;
    /// All relationships in creation order.
    async fn list_relationships(&self) -> StorageResult<Vec<TrustRelationship>>;
    /// Delete a relationship. Returns `false` if it did not exist.
    async fn delete_relationship(&self, id: &str) -> StorageResult<bool>;

    // Snapshot operations

    /// Persist a snapshot.
    async fn create_snapshot(&self, snapshot: &TrustSnapshot) -> StorageResult<()>;
    /// Fetch a snapshot by ID.
    async fn get_snapshot(&self, id: &str) -> StorageResult<Option<TrustSnapshot>>;
    /// Snapshots for an entity, oldest first.
    async fn list_snapshots(&self, entity_id: &str) -> StorageResult<Vec<TrustSnapshot>>;
    /// Most recent snapshot for an entity.
    async fn get_latest_snapshot(&self, entity_id: &str) -> StorageResult<Option<TrustSnapshot>>;

    // Drift operations

    /// Persist a drift.
    async fn create_drift(&self, drift: &TrustDrift) -> StorageResult<()>;
    /// Persist a drift together with the alerts it raised, all or nothing.
    async fn create_drift_with_alerts(
        &self,
        drift: &TrustDrift,
        alerts: &[DriftAlert],
    ) -> StorageResult<()>;
    /// Fetch a drift by ID.
    async fn get_drift(&self, id: &str) -> StorageResult<Option<TrustDrift>>;
    /// Drifts for an entity, oldest (by end snapshot time) first.
    async fn list_drifts(&self, entity_id: &str) -> StorageResult<Vec<TrustDrift>>;

    // Alert operations

    /// Persist an alert.
    async fn create_alert(&self, alert: &DriftAlert) -> StorageResult<()>;
    /// Alerts matching the filter, newest first.
    async fn list_alerts(&self, filter: &AlertFilter) -> StorageResult<Vec<DriftAlert>>;
}

impl std::fmt::Debug for dyn Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Storage")
    }
}

/// Shared handle to the injected backing store.
pub type SharedStorage = Arc<dyn Storage>;
