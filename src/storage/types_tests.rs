//! Unit tests for storage record types.

use super::*;
use chrono::Duration;
use serde_json::json;

// ============================================================================
// Entity
// ============================================================================

#[test]
fn test_entity_new_generates_id() {
    let a = Entity::new("alice", "agent");
    let b = Entity::new("alice", "agent");

    assert_ne!(a.id, b.id);
    assert_eq!(a.name, "alice");
    assert_eq!(a.entity_type, "agent");
    assert!(a.attributes.is_empty());
    assert_eq!(a.created_at, a.updated_at);
}

#[test]
fn test_entity_builders() {
    let entity = Entity::new("billing", "service")
        .with_id("svc-billing")
        .with_attribute("region", json!("eu-west-1"));

    assert_eq!(entity.id, "svc-billing");
    assert_eq!(entity.attributes["region"], "eu-west-1");
}

#[test]
fn test_entity_serialization_roundtrip_fields() {
    let entity = Entity::new("bob", "user").with_id("u-1");
    let value = serde_json::to_value(&entity).unwrap();

    assert_eq!(value["id"], "u-1");
    assert_eq!(value["entity_type"], "user");
    assert!(value["attributes"].is_object());
}

// ============================================================================
// TrustRelationship
// ============================================================================

#[test]
fn test_relationship_defaults() {
    let rel = TrustRelationship::new("a", "b", 0.8);

    assert_eq!(rel.source_id, "a");
    assert_eq!(rel.target_id, "b");
    assert_eq!(rel.trust_score, 0.8);
    assert_eq!(rel.relationship_type, "general");
    assert!(rel.expiration.is_none());
}

#[test]
fn test_relationship_expiration() {
    let now = Utc::now();
    let rel = TrustRelationship::new("a", "b", 0.5).with_expiration(now - Duration::hours(1));
    assert!(rel.is_expired(now));

    let rel = TrustRelationship::new("a", "b", 0.5).with_expiration(now + Duration::hours(1));
    assert!(!rel.is_expired(now));

    let rel = TrustRelationship::new("a", "b", 0.5);
    assert!(!rel.is_expired(now));
}

#[test]
fn test_relationship_expiration_skipped_when_absent() {
    let rel = TrustRelationship::new("a", "b", 0.5).with_type("delegation");
    let serialized = serde_json::to_string(&rel).unwrap();

    assert!(!serialized.contains("expiration"));
    assert!(serialized.contains("\"relationship_type\":\"delegation\""));
}

// ============================================================================
// TrustSnapshot
// ============================================================================

#[test]
fn test_snapshot_averages() {
    let incoming = TrustMap::from([("b".to_string(), 0.4), ("c".to_string(), 0.8)]);
    let outgoing = TrustMap::from([("d".to_string(), 0.9)]);

    let snapshot = TrustSnapshot::new("a", Utc::now(), incoming, outgoing);

    assert!((snapshot.avg_incoming_trust - 0.6).abs() < 1e-9);
    assert!((snapshot.avg_outgoing_trust - 0.9).abs() < 1e-9);
}

#[test]
fn test_snapshot_empty_averages_are_zero() {
    let snapshot = TrustSnapshot::new("a", Utc::now(), TrustMap::new(), TrustMap::new());

    assert_eq!(snapshot.avg_incoming_trust, 0.0);
    assert_eq!(snapshot.avg_outgoing_trust, 0.0);
}

// ============================================================================
// Enums
// ============================================================================

#[test]
fn test_drift_direction_display_and_parse() {
    for direction in [
        DriftDirection::Increasing,
        DriftDirection::Decreasing,
        DriftDirection::Stable,
    ] {
        let parsed: DriftDirection = direction.to_string().parse().unwrap();
        assert_eq!(parsed, direction);
    }
    assert_eq!("STABLE".parse::<DriftDirection>(), Ok(DriftDirection::Stable));
    assert!("sideways".parse::<DriftDirection>().is_err());
}

#[test]
fn test_severity_ordering() {
    assert!(Severity::Low < Severity::Medium);
    assert!(Severity::Medium < Severity::High);
    assert_eq!(serde_json::to_value(Severity::High).unwrap(), json!("high"));
}

#[test]
fn test_alert_type_strings() {
    assert_eq!(AlertType::RapidTrustDecrease.as_str(), "rapid_trust_decrease");
    assert_eq!(
        "significant_relationship_changes".parse::<AlertType>(),
        Ok(AlertType::SignificantRelationshipChanges)
    );
    assert_eq!(
        serde_json::to_value(AlertType::UnusualTrustIncrease).unwrap(),
        json!("unusual_trust_increase")
    );
    assert!("nope".parse::<AlertType>().is_err());
}

// ============================================================================
// AlertFilter
// ============================================================================

fn sample_alert(entity_id: &str, alert_type: AlertType, severity: Severity) -> DriftAlert {
    DriftAlert {
        id: "alert-1".to_string(),
        drift_id: "drift-1".to_string(),
        entity_id: entity_id.to_string(),
        alert_type,
        severity,
        description: "test".to_string(),
        details: None,
        timestamp: Utc::now(),
    }
}

#[test]
fn test_alert_filter_default_matches_everything() {
    let alert = sample_alert("a", AlertType::TrustAsymmetry, Severity::Medium);
    assert!(AlertFilter::default().matches(&alert));
}

#[test]
fn test_alert_filter_criteria() {
    let alert = sample_alert("a", AlertType::RapidTrustDecrease, Severity::High);

    let filter = AlertFilter {
        entity_id: Some("a".to_string()),
        severity: Some(Severity::High),
        ..Default::default()
    };
    assert!(filter.matches(&alert));

    let filter = AlertFilter {
        entity_id: Some("b".to_string()),
        ..Default::default()
    };
    assert!(!filter.matches(&alert));

    let filter = AlertFilter {
        alert_type: Some(AlertType::TrustAsymmetry),
        ..Default::default()
    };
    assert!(!filter.matches(&alert));

    let filter = AlertFilter {
        since: Some(Utc::now() + Duration::minutes(5)),
        ..Default::default()
    };
    assert!(!filter.matches(&alert));
}
