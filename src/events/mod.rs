//! Outbound trust events.
//!
//! Every graph mutation and every snapshot, drift and alert creation emits one
//! [`TrustEvent`] to the external notification collaborator. Publication is
//! fire-and-forget: [`Notifier`] logs and swallows publisher failures so they
//! never affect graph or drift state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::PublishError;

/// Kind of trust event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustEventType {
    /// An entity was registered.
    EntityCreated,
    /// An entity was updated in place.
    EntityUpdated,
    /// An entity (and its relationships) was deleted.
    EntityDeleted,
    /// A relationship was created.
    RelationshipCreated,
    /// A relationship was updated.
    RelationshipUpdated,
    /// A relationship was deleted, directly or by cascade.
    RelationshipDeleted,
    /// A snapshot was captured.
    SnapshotCreated,
    /// A drift was calculated.
    DriftCalculated,
    /// A drift alert was raised.
    AlertCreated,
}

impl TrustEventType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustEventType::EntityCreated => "entity_created",
            TrustEventType::EntityUpdated => "entity_updated",
            TrustEventType::EntityDeleted => "entity_deleted",
            TrustEventType::RelationshipCreated => "relationship_created",
            TrustEventType::RelationshipUpdated => "relationship_updated",
            TrustEventType::RelationshipDeleted => "relationship_deleted",
            TrustEventType::SnapshotCreated => "snapshot_created",
            TrustEventType::DriftCalculated => "drift_calculated",
            TrustEventType::AlertCreated => "alert_created",
        }
    }
}

impl std::fmt::Display for TrustEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One outbound event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustEvent {
    /// What happened.
    pub event_type: TrustEventType,
    /// Entity the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Relationship the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_id: Option<String>,
    /// Snapshot the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    /// Drift the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift_id: Option<String>,
    /// Alert the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
    /// Event-specific payload.
    #[serde(default)]
    pub details: serde_json::Value,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

impl TrustEvent {
    /// Create a new event with no references.
    pub fn new(event_type: TrustEventType) -> Self {
        Self {
            event_type,
            entity_id: None,
            relationship_id: None,
            snapshot_id: None,
            drift_id: None,
            alert_id: None,
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Set the entity reference.
    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Set the relationship reference.
    pub fn with_relationship(mut self, relationship_id: impl Into<String>) -> Self {
        self.relationship_id = Some(relationship_id.into());
        self
    }

    /// Set the snapshot reference.
    pub fn with_snapshot(mut self, snapshot_id: impl Into<String>) -> Self {
        self.snapshot_id = Some(snapshot_id.into());
        self
    }

    /// Set the drift reference.
    pub fn with_drift(mut self, drift_id: impl Into<String>) -> Self {
        self.drift_id = Some(drift_id.into());
        self
    }

    /// Set the alert reference.
    pub fn with_alert(mut self, alert_id: impl Into<String>) -> Self {
        self.alert_id = Some(alert_id.into());
        self
    }

    /// Attach a payload.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// External notification collaborator.
///
/// Implementations must not block; slow transports should queue internally.
pub trait EventPublisher: Send + Sync {
    /// Hand one event to the transport.
    fn publish(&self, event: TrustEvent) -> Result<(), PublishError>;
}

/// Publisher that writes each event as a structured log line.
#[derive(Debug, Clone, Default)]
pub struct TracingPublisher;

impl EventPublisher for TracingPublisher {
    fn publish(&self, event: TrustEvent) -> Result<(), PublishError> {
        info!(
            event_type = %event.event_type,
            entity_id = ?event.entity_id,
            relationship_id = ?event.relationship_id,
            snapshot_id = ?event.snapshot_id,
            drift_id = ?event.drift_id,
            alert_id = ?event.alert_id,
            details = %event.details,
            "Trust event"
        );
        Ok(())
    }
}

/// Publisher that forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    sender: mpsc::UnboundedSender<TrustEvent>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TrustEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, event: TrustEvent) -> Result<(), PublishError> {
        self.sender
            .send(event)
            .map_err(|_| PublishError::ChannelClosed)
    }
}

/// Publisher that drops every event.
#[derive(Debug, Clone, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: TrustEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Fire-and-forget wrapper around the configured publisher.
#[derive(Clone)]
pub struct Notifier {
    publisher: Arc<dyn EventPublisher>,
}

impl Notifier {
    /// Wrap a publisher.
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    /// Notifier that drops every event.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopPublisher))
    }

    /// Publish an event, logging and discarding any failure.
    pub fn emit(&self, event: TrustEvent) {
        let event_type = event.event_type;
        if let Err(e) = self.publisher.publish(event) {
            warn!(event_type = %event_type, error = %e, "Failed to publish trust event");
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}
