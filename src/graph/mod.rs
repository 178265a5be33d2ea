//! Trust relationship graph.
//!
//! [`TrustGraph`] owns entities and relationships in memory, writes every
//! mutation through to the injected [`Storage`](crate::storage::Storage), and
//! serves path queries and analytics. A single reader-writer lock guards the
//! graph: mutations take it exclusively and bump the generation that the path
//! cache is keyed on, queries share it.
//!
//! Expired relationships stay stored until purged but carry no trust: they
//! are left out of path finding, direct trust, analytics and snapshots.

pub mod analytics;
pub mod paths;
pub mod view;


pub use analytics::{Anomaly, AnomalyType, EntityTrustMetrics, GraphStats};
pub use paths::{PathCacheStats, PathQuery, TrustPath};
pub use view::{EdgePath, GraphView, PetgraphView, TrustEdge};

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{AnomalyConfig, PathConfig};
use crate::error::{GraphError, GraphResult};
use crate::events::{Notifier, TrustEvent, TrustEventType};
use crate::storage::{Attributes, Entity, SharedStorage, TrustMap, TrustRelationship};
use paths::PathCache;

/// Filter for listing relationships. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipFilter {
    /// Only relationships extended by this entity.
    #[serde(default)]
    pub source_id: Option<String>,
    /// Only relationships extended to this entity.
    #[serde(default)]
    pub target_id: Option<String>,
    /// Only relationships of this type.
    #[serde(default)]
    pub relationship_type: Option<String>,
    /// Only relationships scoring at least this much.
    #[serde(default)]
    pub min_trust: Option<f64>,
}

impl RelationshipFilter {
    /// Whether a relationship passes every set criterion.
    pub fn matches(&self, rel: &TrustRelationship) -> bool {
        self.source_id.as_ref().is_none_or(|id| &rel.source_id == id)
            && self.target_id.as_ref().is_none_or(|id| &rel.target_id == id)
            && self
                .relationship_type
                .as_ref()
                .is_none_or(|t| &rel.relationship_type == t)
            && self.min_trust.is_none_or(|min| rel.trust_score >= min)
    }
}

/// Partial update for an entity. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityUpdate {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New category.
    #[serde(default)]
    pub entity_type: Option<String>,
    /// Replacement attribute map.
    #[serde(default)]
    pub attributes: Option<Attributes>,
}

/// Partial update for a relationship. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipUpdate {
    /// New source entity.
    #[serde(default)]
    pub source_id: Option<String>,
    /// New target entity.
    #[serde(default)]
    pub target_id: Option<String>,
    /// New trust score.
    #[serde(default)]
    pub trust_score: Option<f64>,
    /// New relationship type.
    #[serde(default)]
    pub relationship_type: Option<String>,
    /// Replacement attribute map.
    #[serde(default)]
    pub attributes: Option<Attributes>,
    /// New expiration instant.
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    /// Make the relationship permanent. Takes precedence over `expiration`.
    #[serde(default)]
    pub clear_expiration: bool,
}

impl RelationshipUpdate {
    /// Update only the trust score.
    pub fn score(trust_score: f64) -> Self {
        Self {
            trust_score: Some(trust_score),
            ..Default::default()
        }
    }
}

/// Trust one entity extends and receives, keyed by counterpart.
///
/// Parallel relationships to the same counterpart collapse to the highest
/// score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighborhood {
    /// Trust others extend to the entity.
    pub incoming: TrustMap,
    /// Trust the entity extends to others.
    pub outgoing: TrustMap,
}

#[derive(Debug, Default)]
struct GraphState {
    entities: HashMap<String, Entity>,
    entity_order: Vec<String>,
    relationships: HashMap<String, TrustRelationship>,
    relationship_order: Vec<String>,
    outgoing: HashMap<String, Vec<String>>,
    incoming: HashMap<String, Vec<String>>,
    pairs: HashMap<(String, String), Vec<String>>,
    generation: u64,
}

impl GraphState {
    fn insert_entity(&mut self, entity: Entity) {
        if !self.entities.contains_key(&entity.id) {
            self.entity_order.push(entity.id.clone());
        }
        self.entities.insert(entity.id.clone(), entity);
    }

    fn remove_entity(&mut self, id: &str) {
        self.entities.remove(id);
        self.entity_order.retain(|e| e != id);
        self.outgoing.remove(id);
        self.incoming.remove(id);
    }

    fn insert_relationship(&mut self, rel: TrustRelationship) {
        let id = rel.id.clone();
        self.outgoing
            .entry(rel.source_id.clone())
            .or_default()
            .push(id.clone());
        self.incoming
            .entry(rel.target_id.clone())
            .or_default()
            .push(id.clone());
        self.pairs
            .entry((rel.source_id.clone(), rel.target_id.clone()))
            .or_default()
            .push(id.clone());
        self.relationship_order.push(id.clone());
        self.relationships.insert(id, rel);
    }

    fn remove_relationship(&mut self, id: &str) -> Option<TrustRelationship> {
        let rel = self.relationships.remove(id)?;
        self.relationship_order.retain(|r| r != id);
        if let Some(ids) = self.outgoing.get_mut(&rel.source_id) {
            ids.retain(|r| r != id);
        }
        if let Some(ids) = self.incoming.get_mut(&rel.target_id) {
            ids.retain(|r| r != id);
        }
        let pair = (rel.source_id.clone(), rel.target_id.clone());
        if let Some(ids) = self.pairs.get_mut(&pair) {
            ids.retain(|r| r != id);
            if ids.is_empty() {
                self.pairs.remove(&pair);
            }
        }
        Some(rel)
    }

    /// Replace a relationship in place, keeping its creation order.
    fn replace_relationship(&mut self, rel: TrustRelationship) {
        let endpoints_changed = self
            .relationships
            .get(&rel.id)
            .is_some_and(|old| old.source_id != rel.source_id || old.target_id != rel.target_id);
        if endpoints_changed {
            let position = self.relationship_order.iter().position(|r| r == &rel.id);
            self.remove_relationship(&rel.id);
            self.insert_relationship(rel.clone());
            if let Some(position) = position {
                self.relationship_order.pop();
                self.relationship_order.insert(position, rel.id);
            }
        } else {
            self.relationships.insert(rel.id.clone(), rel);
        }
    }

    fn incident_relationships(&self, entity_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .outgoing
            .get(entity_id)
            .into_iter()
            .chain(self.incoming.get(entity_id))
            .flatten()
            .cloned()
            .collect();
        ids.sort_by_key(|id| {
            self.relationship_order
                .iter()
                .position(|r| r == id)
                .unwrap_or(usize::MAX)
        });
        ids.dedup();
        ids
    }

    fn lookup<'a>(
        &'a self,
        ids: Option<&'a Vec<String>>,
    ) -> impl Iterator<Item = &'a TrustRelationship> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.relationships.get(id))
    }

    fn outgoing_of<'a>(&'a self, entity_id: &str) -> impl Iterator<Item = &'a TrustRelationship> {
        self.lookup(self.outgoing.get(entity_id))
    }

    fn incoming_of<'a>(&'a self, entity_id: &str) -> impl Iterator<Item = &'a TrustRelationship> {
        self.lookup(self.incoming.get(entity_id))
    }

    fn pair_relationships<'a>(
        &'a self,
        source_id: &str,
        target_id: &str,
    ) -> impl Iterator<Item = &'a TrustRelationship> {
        self.lookup(
            self.pairs
                .get(&(source_id.to_string(), target_id.to_string())),
        )
    }

    /// Relationships in creation order.
    fn ordered_relationships(&self) -> impl Iterator<Item = &TrustRelationship> {
        self.relationship_order
            .iter()
            .filter_map(|id| self.relationships.get(id))
    }

    /// Unexpired relationships in creation order.
    fn active_relationships(&self, now: DateTime<Utc>) -> impl Iterator<Item = &TrustRelationship> {
        self.ordered_relationships()
            .filter(move |rel| !rel.is_expired(now))
    }

    /// Every entity as a node plus each unexpired relationship accepted by
    /// `keep` as an edge.
    fn view<F>(&self, now: DateTime<Utc>, keep: F) -> PetgraphView
    where
        F: Fn(&TrustRelationship) -> bool,
    {
        let mut view = PetgraphView::new();
        for id in &self.entity_order {
            view.add_node(id);
        }
        for rel in self.active_relationships(now).filter(|rel| keep(rel)) {
            view.add_edge(
                &rel.source_id,
                &rel.target_id,
                TrustEdge {
                    relationship_id: rel.id.clone(),
                    trust_score: rel.trust_score,
                },
            );
        }
        view
    }

    fn ensure_entity(&self, field: &str, entity_id: &str) -> GraphResult<()> {
        if self.entities.contains_key(entity_id) {
            Ok(())
        } else {
            Err(GraphError::DanglingReference {
                field: field.to_string(),
                entity_id: entity_id.to_string(),
            })
        }
    }
}

fn validate_score(score: f64) -> GraphResult<()> {
    if (0.0..=1.0).contains(&score) {
        Ok(())
    } else {
        Err(GraphError::InvalidTrustScore { score })
    }
}

/// In-memory trust graph backed by write-through storage.
pub struct TrustGraph {
    state: RwLock<GraphState>,
    cache: Mutex<PathCache>,
    storage: SharedStorage,
    notifier: Notifier,
    path_config: PathConfig,
    anomaly_config: AnomalyConfig,
}

impl TrustGraph {
    /// Create an empty graph over `storage`.
    pub fn new(storage: SharedStorage, notifier: Notifier) -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            cache: Mutex::new(PathCache::default()),
            storage,
            notifier,
            path_config: PathConfig::default(),
            anomaly_config: AnomalyConfig::default(),
        }
    }

    /// Create a graph hydrated with every entity and relationship in `storage`.
    pub async fn load(storage: SharedStorage, notifier: Notifier) -> GraphResult<Self> {
        let entities = storage.list_entities().await?;
        let relationships = storage.list_relationships().await?;

        let mut state = GraphState::default();
        for entity in entities {
            state.insert_entity(entity);
        }
        for rel in relationships {
            if state.entities.contains_key(&rel.source_id)
                && state.entities.contains_key(&rel.target_id)
            {
                state.insert_relationship(rel);
            } else {
                warn!(
                    relationship_id = %rel.id,
                    "Skipping stored relationship with missing endpoint"
                );
            }
        }
        info!(
            entities = state.entities.len(),
            relationships = state.relationships.len(),
            "Trust graph loaded"
        );

        let graph = Self::new(storage, notifier);
        *graph.state.write().await = state;
        Ok(graph)
    }

    /// Use the given path engine bounds.
    pub fn with_path_config(mut self, config: PathConfig) -> Self {
        self.path_config = config;
        self
    }

    /// Use the given anomaly thresholds.
    pub fn with_anomaly_config(mut self, config: AnomalyConfig) -> Self {
        self.anomaly_config = config;
        self
    }

    /// Path engine bounds in use.
    pub fn path_config(&self) -> &PathConfig {
        &self.path_config
    }

    // ------------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------------

    /// Register an entity.
    pub async fn add_entity(&self, entity: Entity) -> GraphResult<Entity> {
        let mut state = self.state.write().await;
        if state.entities.contains_key(&entity.id) {
            return Err(GraphError::DuplicateId { id: entity.id });
        }

        self.storage.create_entity(&entity).await?;
        state.insert_entity(entity.clone());
        self.invalidate(&mut state);
        drop(state);

        info!(entity_id = %entity.id, entity_type = %entity.entity_type, "Entity created");
        self.notifier.emit(
            TrustEvent::new(TrustEventType::EntityCreated)
                .with_entity(&entity.id)
                .with_details(json!({ "name": entity.name, "entity_type": entity.entity_type })),
        );
        Ok(entity)
    }

    /// Apply a partial update to an entity.
    pub async fn update_entity(&self, id: &str, update: EntityUpdate) -> GraphResult<Entity> {
        let mut state = self.state.write().await;
        let mut entity = state
            .entities
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::EntityNotFound {
                entity_id: id.to_string(),
            })?;

        if let Some(name) = update.name {
            entity.name = name;
        }
        if let Some(entity_type) = update.entity_type {
            entity.entity_type = entity_type;
        }
        if let Some(attributes) = update.attributes {
            entity.attributes = attributes;
        }
        entity.updated_at = Utc::now();

        if !self.storage.update_entity(&entity).await? {
            return Err(GraphError::EntityNotFound {
                entity_id: id.to_string(),
            });
        }
        state.insert_entity(entity.clone());
        self.invalidate(&mut state);
        drop(state);

        info!(entity_id = %id, "Entity updated");
        self.notifier
            .emit(TrustEvent::new(TrustEventType::EntityUpdated).with_entity(id));
        Ok(entity)
    }

    /// Look up an entity.
    pub async fn get_entity(&self, id: &str) -> Option<Entity> {
        self.state.read().await.entities.get(id).cloned()
    }

    /// Entities in registration order, optionally of one type.
    pub async fn list_entities(&self, entity_type: Option<&str>) -> Vec<Entity> {
        let state = self.state.read().await;
        state
            .entity_order
            .iter()
            .filter_map(|id| state.entities.get(id))
            .filter(|e| entity_type.is_none_or(|t| e.entity_type == t))
            .cloned()
            .collect()
    }

    /// IDs of every entity in registration order.
    pub async fn entity_ids(&self) -> Vec<String> {
        self.state.read().await.entity_order.clone()
    }

    /// Delete an entity and every relationship it takes part in.
    ///
    /// Returns the IDs of the relationships removed by the cascade.
    pub async fn delete_entity(&self, id: &str) -> GraphResult<Vec<String>> {
        let mut state = self.state.write().await;
        if !state.entities.contains_key(id) {
            return Err(GraphError::EntityNotFound {
                entity_id: id.to_string(),
            });
        }

        let incident = state.incident_relationships(id);
        if self.storage.delete_entity_cascade(id).await?.is_none() {
            return Err(GraphError::EntityNotFound {
                entity_id: id.to_string(),
            });
        }
        for rel_id in &incident {
            state.remove_relationship(rel_id);
        }
        state.remove_entity(id);
        self.invalidate(&mut state);
        drop(state);

        info!(entity_id = %id, relationships = incident.len(), "Entity deleted");
        for rel_id in &incident {
            self.notifier.emit(
                TrustEvent::new(TrustEventType::RelationshipDeleted)
                    .with_relationship(rel_id)
                    .with_entity(id)
                    .with_details(json!({ "cascade": true })),
            );
        }
        self.notifier.emit(
            TrustEvent::new(TrustEventType::EntityDeleted)
                .with_entity(id)
                .with_details(json!({ "relationships_deleted": incident.len() })),
        );
        Ok(incident)
    }

    // ------------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------------

    /// Add a relationship between two existing entities.
    pub async fn add_relationship(&self, rel: TrustRelationship) -> GraphResult<TrustRelationship> {
        validate_score(rel.trust_score)?;

        let mut state = self.state.write().await;
        state.ensure_entity("source_id", &rel.source_id)?;
        state.ensure_entity("target_id", &rel.target_id)?;
        if state.relationships.contains_key(&rel.id) {
            return Err(GraphError::DuplicateId { id: rel.id });
        }

        self.storage.create_relationship(&rel).await?;
        state.insert_relationship(rel.clone());
        self.invalidate(&mut state);
        drop(state);

        info!(
            relationship_id = %rel.id,
            source_id = %rel.source_id,
            target_id = %rel.target_id,
            trust_score = rel.trust_score,
            "Relationship created"
        );
        self.notifier.emit(
            TrustEvent::new(TrustEventType::RelationshipCreated)
                .with_relationship(&rel.id)
                .with_entity(&rel.source_id)
                .with_details(json!({
                    "source_id": rel.source_id,
                    "target_id": rel.target_id,
                    "trust_score": rel.trust_score,
                    "relationship_type": rel.relationship_type,
                })),
        );
        Ok(rel)
    }

    /// Apply a partial update to a relationship.
    pub async fn update_relationship(
        &self,
        id: &str,
        update: RelationshipUpdate,
    ) -> GraphResult<TrustRelationship> {
        if let Some(score) = update.trust_score {
            validate_score(score)?;
        }

        let mut state = self.state.write().await;
        let mut rel = state
            .relationships
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::RelationshipNotFound {
                relationship_id: id.to_string(),
            })?;
        let previous_score = rel.trust_score;

        if let Some(source_id) = update.source_id {
            rel.source_id = source_id;
        }
        if let Some(target_id) = update.target_id {
            rel.target_id = target_id;
        }
        state.ensure_entity("source_id", &rel.source_id)?;
        state.ensure_entity("target_id", &rel.target_id)?;

        if let Some(score) = update.trust_score {
            rel.trust_score = score;
        }
        if let Some(relationship_type) = update.relationship_type {
            rel.relationship_type = relationship_type;
        }
        if let Some(attributes) = update.attributes {
            rel.attributes = attributes;
        }
        if update.clear_expiration {
            rel.expiration = None;
        } else if let Some(expiration) = update.expiration {
            rel.expiration = Some(expiration);
        }
        rel.updated_at = Utc::now();

        if !self.storage.update_relationship(&rel).await? {
            return Err(GraphError::RelationshipNotFound {
                relationship_id: id.to_string(),
            });
        }
        state.replace_relationship(rel.clone());
        self.invalidate(&mut state);
        drop(state);

        info!(
            relationship_id = %id,
            previous_score,
            trust_score = rel.trust_score,
            "Relationship updated"
        );
        self.notifier.emit(
            TrustEvent::new(TrustEventType::RelationshipUpdated)
                .with_relationship(id)
                .with_entity(&rel.source_id)
                .with_details(json!({
                    "previous_score": previous_score,
                    "trust_score": rel.trust_score,
                })),
        );
        Ok(rel)
    }

    /// Look up a relationship.
    pub async fn get_relationship(&self, id: &str) -> Option<TrustRelationship> {
        self.state.read().await.relationships.get(id).cloned()
    }

    /// Relationships in creation order that pass `filter`.
    pub async fn list_relationships(&self, filter: &RelationshipFilter) -> Vec<TrustRelationship> {
        let state = self.state.read().await;
        state
            .ordered_relationships()
            .filter(|rel| filter.matches(rel))
            .cloned()
            .collect()
    }

    /// Delete a relationship.
    pub async fn delete_relationship(&self, id: &str) -> GraphResult<()> {
        let mut state = self.state.write().await;
        if !state.relationships.contains_key(id) {
            return Err(GraphError::RelationshipNotFound {
                relationship_id: id.to_string(),
            });
        }

        self.storage.delete_relationship(id).await?;
        let removed = state.remove_relationship(id);
        self.invalidate(&mut state);
        drop(state);

        info!(relationship_id = %id, "Relationship deleted");
        let mut event = TrustEvent::new(TrustEventType::RelationshipDeleted).with_relationship(id);
        if let Some(rel) = removed {
            event = event.with_entity(rel.source_id);
        }
        self.notifier.emit(event);
        Ok(())
    }

    /// Delete every relationship that has expired as of `now`.
    ///
    /// Returns the IDs of the deleted relationships.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> GraphResult<Vec<String>> {
        let mut state = self.state.write().await;
        let expired: Vec<String> = state
            .ordered_relationships()
            .filter(|rel| rel.is_expired(now))
            .map(|rel| rel.id.clone())
            .collect();
        if expired.is_empty() {
            return Ok(expired);
        }

        let mut purged = Vec::with_capacity(expired.len());
        let mut failure = None;
        for id in expired {
            match self.storage.delete_relationship(&id).await {
                Ok(_) => {
                    state.remove_relationship(&id);
                    purged.push(id);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if !purged.is_empty() {
            self.invalidate(&mut state);
        }
        drop(state);

        info!(purged = purged.len(), "Expired relationships purged");
        for id in &purged {
            self.notifier.emit(
                TrustEvent::new(TrustEventType::RelationshipDeleted)
                    .with_relationship(id)
                    .with_details(json!({ "expired": true })),
            );
        }
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(purged),
        }
    }

    // ------------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------------

    /// Consistent read of an entity's current incoming and outgoing trust.
    pub async fn neighborhood(&self, entity_id: &str) -> GraphResult<Neighborhood> {
        let state = self.state.read().await;
        if !state.entities.contains_key(entity_id) {
            return Err(GraphError::EntityNotFound {
                entity_id: entity_id.to_string(),
            });
        }

        let now = Utc::now();
        let mut neighborhood = Neighborhood::default();
        for rel in state.incoming_of(entity_id).filter(|r| !r.is_expired(now)) {
            keep_max(&mut neighborhood.incoming, &rel.source_id, rel.trust_score);
        }
        for rel in state.outgoing_of(entity_id).filter(|r| !r.is_expired(now)) {
            keep_max(&mut neighborhood.outgoing, &rel.target_id, rel.trust_score);
        }
        Ok(neighborhood)
    }

    fn invalidate(&self, state: &mut GraphState) {
        state.generation += 1;
        self.cache().invalidate(state.generation);
    }
}

fn keep_max(map: &mut TrustMap, key: &str, score: f64) {
    map.entry(key.to_string())
        .and_modify(|current| *current = current.max(score))
        .or_insert(score);
}

impl std::fmt::Debug for TrustGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustGraph")
            .field("path_config", &self.path_config)
            .field("anomaly_config", &self.anomaly_config)
            .finish_non_exhaustive()
    }
}
