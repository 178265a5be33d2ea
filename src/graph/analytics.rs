//! Graph-wide statistics, per-entity centrality and anomaly detection.
//!
//! Everything here is a pure read under the shared graph lock.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::view::GraphView;
use super::{GraphState, TrustGraph};
use crate::config::AnomalyConfig;
use crate::error::{GraphError, GraphResult};
use crate::storage::{Severity, TrustRelationship};

/// Summary of the whole graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    /// Number of entities.
    pub entity_count: usize,
    /// Number of unexpired relationships.
    pub relationship_count: usize,
    /// Mean trust score (absent with no relationships).
    pub mean_trust: Option<f64>,
    /// Highest trust score.
    pub max_trust: Option<f64>,
    /// Lowest trust score.
    pub min_trust: Option<f64>,
    /// Entity with the highest mean incoming trust.
    pub most_trusted_entity: Option<String>,
    /// Entity with the highest mean outgoing trust.
    pub most_trusting_entity: Option<String>,
}

/// Trust and centrality figures for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTrustMetrics {
    /// Entity described.
    pub entity_id: String,
    /// Number of incoming relationships.
    pub incoming_count: usize,
    /// Number of outgoing relationships.
    pub outgoing_count: usize,
    /// Mean incoming trust (0.0 with none).
    pub avg_incoming_trust: f64,
    /// Mean outgoing trust (0.0 with none).
    pub avg_outgoing_trust: f64,
    /// Distinct entities trusting this one.
    pub in_degree: usize,
    /// Distinct entities this one trusts.
    pub out_degree: usize,
    /// Normalised betweenness centrality.
    pub betweenness_centrality: f64,
    /// Trust-weighted PageRank.
    pub importance: f64,
}

/// Kind of structural or statistical irregularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    /// Entity with no relationships at all.
    IsolatedEntity,
    /// Relationship with a very low score.
    LowTrustRelationship,
    /// Pair whose forward and backward trust differ widely.
    TrustAsymmetry,
    /// Entity whose mean incoming trust is far from the graph mean.
    UnusualIncomingTrust,
}

impl AnomalyType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::IsolatedEntity => "isolated_entity",
            AnomalyType::LowTrustRelationship => "low_trust_relationship",
            AnomalyType::TrustAsymmetry => "trust_asymmetry",
            AnomalyType::UnusualIncomingTrust => "unusual_incoming_trust",
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One detected anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Kind of anomaly.
    pub anomaly_type: AnomalyType,
    /// How much attention it needs.
    pub severity: Severity,
    /// Human-readable description.
    pub description: String,
    /// Entities involved.
    pub entity_ids: Vec<String>,
    /// Relationships involved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationship_ids: Vec<String>,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Entity ID with the strictly highest value, first-seen wins ties.
fn first_max(candidates: impl Iterator<Item = (String, f64)>) -> Option<String> {
    let mut best: Option<(String, f64)> = None;
    for (id, value) in candidates {
        if best.as_ref().is_none_or(|(_, top)| value > *top) {
            best = Some((id, value));
        }
    }
    best.map(|(id, _)| id)
}

impl GraphState {
    fn mean_incoming(&self, entity_id: &str, active: &HashSet<&str>) -> Option<f64> {
        let scores: Vec<f64> = self
            .incoming_of(entity_id)
            .filter(|r| active.contains(r.id.as_str()))
            .map(|r| r.trust_score)
            .collect();
        mean(&scores)
    }

    fn mean_outgoing(&self, entity_id: &str, active: &HashSet<&str>) -> Option<f64> {
        let scores: Vec<f64> = self
            .outgoing_of(entity_id)
            .filter(|r| active.contains(r.id.as_str()))
            .map(|r| r.trust_score)
            .collect();
        mean(&scores)
    }

    fn stats(&self, active: &[&TrustRelationship]) -> GraphStats {
        let ids: HashSet<&str> = active.iter().map(|r| r.id.as_str()).collect();
        let scores: Vec<f64> = active.iter().map(|r| r.trust_score).collect();

        let most_trusted_entity = first_max(self.entity_order.iter().filter_map(|id| {
            self.mean_incoming(id, &ids).map(|m| (id.clone(), m))
        }));
        let most_trusting_entity = first_max(self.entity_order.iter().filter_map(|id| {
            self.mean_outgoing(id, &ids).map(|m| (id.clone(), m))
        }));

        GraphStats {
            entity_count: self.entities.len(),
            relationship_count: active.len(),
            mean_trust: mean(&scores),
            max_trust: scores.iter().copied().max_by(f64::total_cmp),
            min_trust: scores.iter().copied().min_by(f64::total_cmp),
            most_trusted_entity,
            most_trusting_entity,
        }
    }

    fn anomalies(&self, active: &[&TrustRelationship], config: &AnomalyConfig) -> Vec<Anomaly> {
        let ids: HashSet<&str> = active.iter().map(|r| r.id.as_str()).collect();
        let mut anomalies = Vec::new();

        // Isolated entities
        for id in &self.entity_order {
            let connected = self
                .incoming_of(id)
                .chain(self.outgoing_of(id))
                .any(|r| ids.contains(r.id.as_str()));
            if !connected {
                anomalies.push(Anomaly {
                    anomaly_type: AnomalyType::IsolatedEntity,
                    severity: Severity::Low,
                    description: format!("Entity {} has no trust relationships", id),
                    entity_ids: vec![id.clone()],
                    relationship_ids: Vec::new(),
                });
            }
        }

        // Low-trust relationships
        for rel in active.iter().filter(|r| r.trust_score < config.low_trust_threshold) {
            let severity = if rel.trust_score < config.critical_trust_threshold {
                Severity::High
            } else {
                Severity::Medium
            };
            anomalies.push(Anomaly {
                anomaly_type: AnomalyType::LowTrustRelationship,
                severity,
                description: format!(
                    "Very low trust ({:.2}) from {} to {}",
                    rel.trust_score, rel.source_id, rel.target_id
                ),
                entity_ids: vec![rel.source_id.clone(), rel.target_id.clone()],
                relationship_ids: vec![rel.id.clone()],
            });
        }

        // Asymmetric pairs, each unordered pair reported once
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        for rel in active {
            let (a, b) = (rel.source_id.as_str(), rel.target_id.as_str());
            if a == b {
                continue;
            }
            let pair = if a < b { (a, b) } else { (b, a) };
            if !seen.insert(pair) {
                continue;
            }
            let forward = self.pair_max(a, b, &ids);
            let backward = self.pair_max(b, a, &ids);
            if let (Some(forward), Some(backward)) = (forward, backward) {
                let difference = (forward - backward).abs();
                if difference > config.asymmetry_threshold {
                    anomalies.push(Anomaly {
                        anomaly_type: AnomalyType::TrustAsymmetry,
                        severity: Severity::Medium,
                        description: format!(
                            "Asymmetric trust between {} and {} ({:.2} vs {:.2})",
                            a, b, forward, backward
                        ),
                        entity_ids: vec![a.to_string(), b.to_string()],
                        relationship_ids: Vec::new(),
                    });
                }
            }
        }

        // Unusual average incoming trust
        let scores: Vec<f64> = active.iter().map(|r| r.trust_score).collect();
        if let Some(graph_mean) = mean(&scores) {
            for id in &self.entity_order {
                let Some(avg) = self.mean_incoming(id, &ids) else {
                    continue;
                };
                let deviation = avg - graph_mean;
                if deviation.abs() > config.incoming_deviation {
                    let (severity, relation) = if deviation < 0.0 {
                        (Severity::Medium, "below")
                    } else {
                        (Severity::Low, "above")
                    };
                    anomalies.push(Anomaly {
                        anomaly_type: AnomalyType::UnusualIncomingTrust,
                        severity,
                        description: format!(
                            "Entity {} receives average trust {:.2}, {} the graph mean {:.2}",
                            id, avg, relation, graph_mean
                        ),
                        entity_ids: vec![id.clone()],
                        relationship_ids: Vec::new(),
                    });
                }
            }
        }

        anomalies
    }

    fn pair_max(&self, source_id: &str, target_id: &str, active: &HashSet<&str>) -> Option<f64> {
        self.pair_relationships(source_id, target_id)
            .filter(|r| active.contains(r.id.as_str()))
            .map(|r| r.trust_score)
            .max_by(f64::total_cmp)
    }
}

impl TrustGraph {
    /// Counts and trust extremes across the whole graph.
    pub async fn graph_stats(&self) -> GraphStats {
        let state = self.state.read().await;
        let active: Vec<&TrustRelationship> = state.active_relationships(Utc::now()).collect();
        state.stats(&active)
    }

    /// Trust figures and centrality for one entity.
    pub async fn entity_metrics(&self, entity_id: &str) -> GraphResult<EntityTrustMetrics> {
        let state = self.state.read().await;
        if !state.entities.contains_key(entity_id) {
            return Err(GraphError::EntityNotFound {
                entity_id: entity_id.to_string(),
            });
        }

        let now = Utc::now();
        let incoming: Vec<f64> = state
            .incoming_of(entity_id)
            .filter(|r| !r.is_expired(now))
            .map(|r| r.trust_score)
            .collect();
        let outgoing: Vec<f64> = state
            .outgoing_of(entity_id)
            .filter(|r| !r.is_expired(now))
            .map(|r| r.trust_score)
            .collect();

        let view = state.view(now, |_| true);
        let betweenness = view.betweenness();
        let rank = view.rank();

        Ok(EntityTrustMetrics {
            entity_id: entity_id.to_string(),
            incoming_count: incoming.len(),
            outgoing_count: outgoing.len(),
            avg_incoming_trust: mean(&incoming).unwrap_or(0.0),
            avg_outgoing_trust: mean(&outgoing).unwrap_or(0.0),
            in_degree: view.in_degree(entity_id),
            out_degree: view.out_degree(entity_id),
            betweenness_centrality: betweenness.get(entity_id).copied().unwrap_or(0.0),
            importance: rank.get(entity_id).copied().unwrap_or(0.0),
        })
    }

    /// Scan the graph for isolated entities, low-trust edges, asymmetric
    /// pairs and outlier incoming trust.
    pub async fn detect_anomalies(&self) -> Vec<Anomaly> {
        let state = self.state.read().await;
        let active: Vec<&TrustRelationship> = state.active_relationships(Utc::now()).collect();
        state.anomalies(&active, &self.anomaly_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        let value = mean(&[0.2, 0.4]).unwrap();
        assert!((value - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_first_max_prefers_first_on_tie() {
        let candidates = vec![
            ("a".to_string(), 0.5),
            ("b".to_string(), 0.9),
            ("c".to_string(), 0.9),
        ];
        assert_eq!(first_max(candidates.into_iter()), Some("b".to_string()));
        assert_eq!(first_max(std::iter::empty()), None);
    }

    #[test]
    fn test_anomaly_type_strings() {
        assert_eq!(AnomalyType::IsolatedEntity.as_str(), "isolated_entity");
        assert_eq!(
            serde_json::to_value(AnomalyType::UnusualIncomingTrust).unwrap(),
            serde_json::json!("unusual_incoming_trust")
        );
    }
}
