//! Path engine: bounded simple-path enumeration with multiplicative trust
//! aggregation, memoised per graph generation.

use std::collections::HashMap;
use std::sync::PoisonError;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::view::{EdgePath, GraphView};
use super::TrustGraph;
use crate::error::{GraphError, GraphResult};

/// Parameters of a path search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathQuery {
    /// Entity the paths start at.
    pub source_id: String,
    /// Entity the paths end at.
    pub target_id: String,
    /// Edges below this score are ignored.
    #[serde(default)]
    pub min_trust: f64,
    /// Maximum number of edges per path.
    pub max_length: usize,
    /// Only edges of these types are followed (all types when unset or empty).
    #[serde(default)]
    pub relationship_types: Option<Vec<String>>,
}

impl PathQuery {
    /// Query with no trust or type filter.
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        max_length: usize,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            min_trust: 0.0,
            max_length,
            relationship_types: None,
        }
    }

    /// Set the minimum edge score.
    pub fn with_min_trust(mut self, min_trust: f64) -> Self {
        self.min_trust = min_trust;
        self
    }

    /// Restrict the relationship types followed.
    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relationship_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    fn key(&self) -> PathKey {
        let relationship_types = self
            .relationship_types
            .as_ref()
            .filter(|types| !types.is_empty())
            .map(|types| {
                let mut sorted = types.clone();
                sorted.sort();
                sorted.dedup();
                sorted
            });
        PathKey {
            source_id: self.source_id.clone(),
            target_id: self.target_id.clone(),
            min_trust_bits: self.min_trust.to_bits(),
            max_length: self.max_length,
            relationship_types,
        }
    }
}

/// One path found between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustPath {
    /// Entity IDs from source to target.
    pub entity_ids: Vec<String>,
    /// Relationship IDs along the path.
    pub relationship_ids: Vec<String>,
    /// Product of the edge scores.
    pub aggregate_trust: f64,
    /// Number of edges.
    pub path_length: usize,
}

impl From<EdgePath> for TrustPath {
    fn from(path: EdgePath) -> Self {
        let aggregate_trust = path.edges.iter().map(|e| e.trust_score).product();
        Self {
            path_length: path.edges.len(),
            relationship_ids: path.edges.into_iter().map(|e| e.relationship_id).collect(),
            entity_ids: path.nodes,
            aggregate_trust,
        }
    }
}

/// Path cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCacheStats {
    /// Graph generation the cache is tracking.
    pub generation: u64,
    /// Cached query results.
    pub entries: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that had to enumerate paths.
    pub misses: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PathKey {
    source_id: String,
    target_id: String,
    min_trust_bits: u64,
    max_length: usize,
    relationship_types: Option<Vec<String>>,
}

#[derive(Debug)]
struct CachedPaths {
    generation: u64,
    paths: Vec<TrustPath>,
}

/// Memoised path results tagged with the graph generation they were
/// computed against.
#[derive(Debug, Default)]
pub(crate) struct PathCache {
    generation: u64,
    entries: HashMap<PathKey, CachedPaths>,
    hits: u64,
    misses: u64,
}

impl PathCache {
    fn get(&mut self, key: &PathKey, generation: u64) -> Option<Vec<TrustPath>> {
        match self.entries.get(key) {
            Some(cached) if cached.generation == generation => {
                self.hits += 1;
                Some(cached.paths.clone())
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    fn insert(&mut self, key: PathKey, generation: u64, paths: Vec<TrustPath>) {
        // A mutation may have landed since the lookup started.
        if generation < self.generation {
            return;
        }
        self.generation = generation;
        self.entries.insert(key, CachedPaths { generation, paths });
    }

    /// Drop every entry and start tracking `generation`.
    pub(crate) fn invalidate(&mut self, generation: u64) {
        self.generation = generation;
        self.entries.clear();
    }

    fn stats(&self) -> PathCacheStats {
        PathCacheStats {
            generation: self.generation,
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

impl TrustGraph {
    /// Enumerate simple paths from `query.source_id` to `query.target_id`,
    /// best aggregate trust first.
    ///
    /// Returns an empty list when no path exists or when source and target
    /// are the same entity.
    pub async fn find_paths(&self, query: &PathQuery) -> GraphResult<Vec<TrustPath>> {
        let limit = self.path_config.max_length_limit;
        if query.max_length == 0 || query.max_length > limit {
            return Err(GraphError::InvalidPathLength {
                length: query.max_length,
                limit,
            });
        }

        let state = self.state.read().await;
        for id in [&query.source_id, &query.target_id] {
            if !state.entities.contains_key(id) {
                return Err(GraphError::EntityNotFound {
                    entity_id: id.clone(),
                });
            }
        }
        if query.source_id == query.target_id {
            return Ok(Vec::new());
        }

        let key = query.key();
        let generation = state.generation;
        let cached = self.cache().get(&key, generation);
        if let Some(paths) = cached {
            debug!(source_id = %query.source_id, target_id = %query.target_id, "Path cache hit");
            return Ok(paths);
        }

        let types = key.relationship_types.as_deref();
        let view = state.view(Utc::now(), |rel| {
            rel.trust_score >= query.min_trust
                && types.is_none_or(|types| types.contains(&rel.relationship_type))
        });

        let mut paths: Vec<TrustPath> = view
            .simple_paths(&query.source_id, &query.target_id, query.max_length)
            .into_iter()
            .map(TrustPath::from)
            .collect();
        // Stable sort keeps discovery order for equal scores
        paths.sort_by(|a, b| b.aggregate_trust.total_cmp(&a.aggregate_trust));

        debug!(
            source_id = %query.source_id,
            target_id = %query.target_id,
            paths = paths.len(),
            generation,
            "Path cache miss"
        );
        self.cache().insert(key, generation, paths.clone());
        Ok(paths)
    }

    /// Score of the direct edge from `source_id` to `target_id`, if any.
    ///
    /// When several relationships join the pair the highest score wins.
    pub async fn direct_trust(&self, source_id: &str, target_id: &str) -> Option<f64> {
        let state = self.state.read().await;
        let now = Utc::now();
        state
            .pair_relationships(source_id, target_id)
            .filter(|rel| !rel.is_expired(now))
            .map(|rel| rel.trust_score)
            .max_by(f64::total_cmp)
    }

    /// Aggregate trust of the best path under the default bounds.
    pub async fn inferred_trust(
        &self,
        source_id: &str,
        target_id: &str,
    ) -> GraphResult<Option<f64>> {
        let query = PathQuery::new(source_id, target_id, self.path_config.default_max_length)
            .with_min_trust(self.path_config.default_min_trust);
        let paths = self.find_paths(&query).await?;
        Ok(paths.first().map(|p| p.aggregate_trust))
    }

    /// Current path cache counters.
    pub fn path_cache_stats(&self) -> PathCacheStats {
        self.cache().stats()
    }

    pub(crate) fn cache(&self) -> std::sync::MutexGuard<'_, PathCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::view::TrustEdge;

    #[test]
    fn test_trust_path_from_edge_path() {
        let path = EdgePath {
            nodes: vec!["a".into(), "b".into(), "c".into()],
            edges: vec![
                TrustEdge {
                    relationship_id: "ab".into(),
                    trust_score: 0.9,
                },
                TrustEdge {
                    relationship_id: "bc".into(),
                    trust_score: 0.8,
                },
            ],
        };
        let path = TrustPath::from(path);

        assert_eq!(path.path_length, 2);
        assert_eq!(path.relationship_ids, vec!["ab", "bc"]);
        assert!((path.aggregate_trust - 0.72).abs() < 1e-9);
    }

    #[test]
    fn test_query_key_normalises_types() {
        let a = PathQuery::new("a", "b", 3).with_types(["verification", "delegation"]);
        let b =
            PathQuery::new("a", "b", 3).with_types(["delegation", "verification", "delegation"]);
        assert_eq!(a.key(), b.key());

        let empty = PathQuery::new("a", "b", 3).with_types(Vec::<String>::new());
        assert_eq!(empty.key(), PathQuery::new("a", "b", 3).key());
    }

    #[test]
    fn test_cache_generation_mismatch_is_miss() {
        let mut cache = PathCache::default();
        let key = PathQuery::new("a", "b", 3).key();

        cache.insert(key.clone(), 0, Vec::new());
        assert!(cache.get(&key, 0).is_some());
        assert!(cache.get(&key, 1).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_cache_rejects_stale_insert() {
        let mut cache = PathCache::default();
        cache.invalidate(3);

        let key = PathQuery::new("a", "b", 3).key();
        cache.insert(key.clone(), 2, Vec::new());
        assert_eq!(cache.stats().entries, 0);

        cache.insert(key, 3, Vec::new());
        assert_eq!(cache.stats().entries, 1);
    }
}
