use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::SharedState;
use crate::drift::TimePeriod;
use crate::error::{GraphError, McpError, McpResult};
use crate::graph::{EntityUpdate, PathQuery, RelationshipFilter, RelationshipUpdate};
use crate::scheduler::run_drift_sweep;
use crate::storage::{AlertFilter, Attributes, Entity, TrustRelationship};

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        // Entities
        "trust_entity_create" => handle_entity_create(state, arguments).await,
        "trust_entity_get" => handle_entity_get(state, arguments).await,
        "trust_entity_update" => handle_entity_update(state, arguments).await,
        "trust_entity_list" => handle_entity_list(state, arguments).await,
        "trust_entity_delete" => handle_entity_delete(state, arguments).await,
        // Relationships
        "trust_relationship_create" => handle_relationship_create(state, arguments).await,
        "trust_relationship_get" => handle_relationship_get(state, arguments).await,
        "trust_relationship_update" => handle_relationship_update(state, arguments).await,
        "trust_relationship_list" => handle_relationship_list(state, arguments).await,
        "trust_relationship_delete" => handle_relationship_delete(state, arguments).await,
        "trust_purge_expired" => handle_purge_expired(state).await,
        // Paths and analytics
        "trust_find_paths" => handle_find_paths(state, arguments).await,
        "trust_direct" => handle_direct(state, arguments).await,
        "trust_inferred" => handle_inferred(state, arguments).await,
        "trust_graph_stats" => handle_graph_stats(state).await,
        "trust_entity_metrics" => handle_entity_metrics(state, arguments).await,
        "trust_detect_anomalies" => handle_detect_anomalies(state).await,
        // Snapshots
        "trust_snapshot_create" => handle_snapshot_create(state, arguments).await,
        "trust_snapshot_get" => handle_snapshot_get(state, arguments).await,
        "trust_snapshot_latest" => handle_snapshot_latest(state, arguments).await,
        "trust_snapshot_list" => handle_snapshot_list(state, arguments).await,
        "trust_snapshot_all" => handle_snapshot_all(state).await,
        // Drift, patterns and alerts
        "trust_drift_calculate" => handle_drift_calculate(state, arguments).await,
        "trust_drift_get" => handle_drift_get(state, arguments).await,
        "trust_drift_list" => handle_drift_list(state, arguments).await,
        "trust_drift_all" => handle_drift_all(state, arguments).await,
        "trust_drift_patterns" => handle_drift_patterns(state, arguments).await,
        "trust_alerts_list" => handle_alerts_list(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

// ============================================================================
// Parameter types
// ============================================================================

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Debug, Deserialize)]
struct EntityIdParams {
    entity_id: String,
}

#[derive(Debug, Deserialize)]
struct PairParams {
    source_id: String,
    target_id: String,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    entity_id: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PeriodParams {
    #[serde(default)]
    time_period: Option<String>,
}

impl PeriodParams {
    fn period(&self) -> TimePeriod {
        self.time_period
            .as_deref()
            .map(TimePeriod::from_label)
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct CreateEntityParams {
    #[serde(default)]
    id: Option<String>,
    name: String,
    entity_type: String,
    #[serde(default)]
    attributes: Option<Attributes>,
}

#[derive(Debug, Deserialize)]
struct UpdateEntityParams {
    id: String,
    #[serde(flatten)]
    update: EntityUpdate,
}

#[derive(Debug, Default, Deserialize)]
struct ListEntitiesParams {
    #[serde(default)]
    entity_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateRelationshipParams {
    #[serde(default)]
    id: Option<String>,
    source_id: String,
    target_id: String,
    trust_score: f64,
    #[serde(default)]
    relationship_type: Option<String>,
    #[serde(default)]
    attributes: Option<Attributes>,
    #[serde(default)]
    expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct UpdateRelationshipParams {
    id: String,
    #[serde(flatten)]
    update: RelationshipUpdate,
}

#[derive(Debug, Deserialize)]
struct FindPathsParams {
    source_id: String,
    target_id: String,
    #[serde(default)]
    min_trust: Option<f64>,
    #[serde(default)]
    max_length: Option<usize>,
    #[serde(default)]
    relationship_types: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct DriftParams {
    entity_id: String,
    #[serde(flatten)]
    period: PeriodParams,
}

#[derive(Debug, Serialize)]
struct TrustScoreResult {
    source_id: String,
    target_id: String,
    trust: Option<f64>,
}

// ============================================================================
// Entity handlers
// ============================================================================

/// Handle trust_entity_create tool call
async fn handle_entity_create(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "trust_entity_create",
        arguments,
        |params: CreateEntityParams| async move {
            let mut entity = Entity::new(params.name, params.entity_type);
            if let Some(id) = params.id {
                entity = entity.with_id(id);
            }
            if let Some(attributes) = params.attributes {
                entity = entity.with_attributes(attributes);
            }
            state.graph.add_entity(entity).await
        },
    )
    .await
}

/// Handle trust_entity_get tool call
async fn handle_entity_get(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: IdParams = parse_arguments("trust_entity_get", arguments)?;

    let entity = state.graph.get_entity(&params.id).await.ok_or_else(|| {
        execution_failed(GraphError::EntityNotFound {
            entity_id: params.id.clone(),
        })
    })?;

    serde_json::to_value(entity).map_err(McpError::Json)
}

/// Handle trust_entity_update tool call
async fn handle_entity_update(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "trust_entity_update",
        arguments,
        |params: UpdateEntityParams| async move {
            state.graph.update_entity(&params.id, params.update).await
        },
    )
    .await
}

/// Handle trust_entity_list tool call
async fn handle_entity_list(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: ListEntitiesParams = parse_optional_arguments("trust_entity_list", arguments)?;

    let entities = state.graph.list_entities(params.entity_type.as_deref()).await;

    Ok(json!({
        "count": entities.len(),
        "entities": entities,
    }))
}

/// Handle trust_entity_delete tool call.
///
/// Incident relationships are removed with the entity.
async fn handle_entity_delete(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: IdParams = parse_arguments("trust_entity_delete", arguments)?;

    let removed = state
        .graph
        .delete_entity(&params.id)
        .await
        .map_err(execution_failed)?;

    Ok(json!({
        "deleted": params.id,
        "relationships_removed": removed,
    }))
}

// ============================================================================
// Relationship handlers
// ============================================================================

/// Handle trust_relationship_create tool call
async fn handle_relationship_create(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    execute_handler(
        "trust_relationship_create",
        arguments,
        |params: CreateRelationshipParams| async move {
            let mut rel =
                TrustRelationship::new(params.source_id, params.target_id, params.trust_score);
            if let Some(id) = params.id {
                rel = rel.with_id(id);
            }
            if let Some(relationship_type) = params.relationship_type {
                rel = rel.with_type(relationship_type);
            }
            if let Some(attributes) = params.attributes {
                rel.attributes = attributes;
            }
            if let Some(expiration) = params.expiration {
                rel = rel.with_expiration(expiration);
            }
            state.graph.add_relationship(rel).await
        },
    )
    .await
}

/// Handle trust_relationship_get tool call
async fn handle_relationship_get(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let params: IdParams = parse_arguments("trust_relationship_get", arguments)?;

    let rel = state.graph.get_relationship(&params.id).await.ok_or_else(|| {
        execution_failed(GraphError::RelationshipNotFound {
            relationship_id: params.id.clone(),
        })
    })?;

    serde_json::to_value(rel).map_err(McpError::Json)
}

/// Handle trust_relationship_update tool call
async fn handle_relationship_update(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    execute_handler(
        "trust_relationship_update",
        arguments,
        |params: UpdateRelationshipParams| async move {
            state
                .graph
                .update_relationship(&params.id, params.update)
                .await
        },
    )
    .await
}

/// Handle trust_relationship_list tool call
async fn handle_relationship_list(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let filter: RelationshipFilter =
        parse_optional_arguments("trust_relationship_list", arguments)?;

    let relationships = state.graph.list_relationships(&filter).await;

    Ok(json!({
        "count": relationships.len(),
        "relationships": relationships,
    }))
}

/// Handle trust_relationship_delete tool call
async fn handle_relationship_delete(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let params: IdParams = parse_arguments("trust_relationship_delete", arguments)?;

    state
        .graph
        .delete_relationship(&params.id)
        .await
        .map_err(execution_failed)?;

    Ok(json!({ "deleted": params.id }))
}

/// Handle trust_purge_expired tool call
async fn handle_purge_expired(state: &SharedState) -> McpResult<Value> {
    let purged = state
        .graph
        .purge_expired(Utc::now())
        .await
        .map_err(execution_failed)?;

    Ok(json!({
        "count": purged.len(),
        "purged": purged,
    }))
}

// ============================================================================
// Path and analytics handlers
// ============================================================================

/// Handle trust_find_paths tool call.
///
/// Unset bounds fall back to the configured defaults.
async fn handle_find_paths(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: FindPathsParams = parse_arguments("trust_find_paths", arguments)?;
    let defaults = state.graph.path_config();

    let mut query = PathQuery::new(
        params.source_id,
        params.target_id,
        params.max_length.unwrap_or(defaults.default_max_length),
    )
    .with_min_trust(params.min_trust.unwrap_or(defaults.default_min_trust));
    if let Some(types) = params.relationship_types {
        query = query.with_types(types);
    }

    let paths = state
        .graph
        .find_paths(&query)
        .await
        .map_err(execution_failed)?;

    Ok(json!({
        "source_id": query.source_id,
        "target_id": query.target_id,
        "count": paths.len(),
        "paths": paths,
    }))
}

/// Handle trust_direct tool call
async fn handle_direct(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: PairParams = parse_arguments("trust_direct", arguments)?;

    let trust = state
        .graph
        .direct_trust(&params.source_id, &params.target_id)
        .await;

    serde_json::to_value(TrustScoreResult {
        source_id: params.source_id,
        target_id: params.target_id,
        trust,
    })
    .map_err(McpError::Json)
}

/// Handle trust_inferred tool call
async fn handle_inferred(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: PairParams = parse_arguments("trust_inferred", arguments)?;

    let trust = state
        .graph
        .inferred_trust(&params.source_id, &params.target_id)
        .await
        .map_err(execution_failed)?;

    serde_json::to_value(TrustScoreResult {
        source_id: params.source_id,
        target_id: params.target_id,
        trust,
    })
    .map_err(McpError::Json)
}

/// Handle trust_graph_stats tool call
async fn handle_graph_stats(state: &SharedState) -> McpResult<Value> {
    let stats = state.graph.graph_stats().await;

    Ok(json!({
        "stats": stats,
        "path_cache": state.graph.path_cache_stats(),
    }))
}

/// Handle trust_entity_metrics tool call
async fn handle_entity_metrics(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "trust_entity_metrics",
        arguments,
        |params: EntityIdParams| async move {
            state.graph.entity_metrics(&params.entity_id).await
        },
    )
    .await
}

/// Handle trust_detect_anomalies tool call
async fn handle_detect_anomalies(state: &SharedState) -> McpResult<Value> {
    let anomalies = state.graph.detect_anomalies().await;

    Ok(json!({
        "count": anomalies.len(),
        "anomalies": anomalies,
    }))
}

// ============================================================================
// Snapshot handlers
// ============================================================================

/// Handle trust_snapshot_create tool call
async fn handle_snapshot_create(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "trust_snapshot_create",
        arguments,
        |params: EntityIdParams| async move {
            state.snapshots.create_snapshot(&params.entity_id).await
        },
    )
    .await
}

/// Handle trust_snapshot_get tool call
async fn handle_snapshot_get(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: IdParams = parse_arguments("trust_snapshot_get", arguments)?;

    let snapshot = state
        .snapshots
        .get_snapshot(&params.id)
        .await
        .map_err(execution_failed)?
        .ok_or_else(|| execution_failed(format!("Snapshot not found: {}", params.id)))?;

    serde_json::to_value(snapshot).map_err(McpError::Json)
}

/// Handle trust_snapshot_latest tool call.
///
/// Returns `null` when the entity has never been snapshotted.
async fn handle_snapshot_latest(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "trust_snapshot_latest",
        arguments,
        |params: EntityIdParams| async move {
            state.snapshots.get_latest_snapshot(&params.entity_id).await
        },
    )
    .await
}

/// Handle trust_snapshot_list tool call
async fn handle_snapshot_list(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: HistoryParams = parse_arguments("trust_snapshot_list", arguments)?;

    let snapshots = state
        .snapshots
        .list_snapshots(&params.entity_id, params.limit)
        .await
        .map_err(execution_failed)?;

    Ok(json!({
        "entity_id": params.entity_id,
        "count": snapshots.len(),
        "snapshots": snapshots,
    }))
}

/// Handle trust_snapshot_all tool call
async fn handle_snapshot_all(state: &SharedState) -> McpResult<Value> {
    let snapshots = state
        .snapshots
        .snapshot_all()
        .await
        .map_err(execution_failed)?;

    Ok(json!({
        "count": snapshots.len(),
        "snapshot_ids": snapshots.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
    }))
}

// ============================================================================
// Drift handlers
// ============================================================================

/// Handle trust_drift_calculate tool call.
///
/// Unrecognised period labels fall back to seven days.
async fn handle_drift_calculate(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "trust_drift_calculate",
        arguments,
        |params: DriftParams| async move {
            let period = params.period.period();
            state.drift.calculate_drift(&params.entity_id, period).await
        },
    )
    .await
}

/// Handle trust_drift_get tool call
async fn handle_drift_get(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: IdParams = parse_arguments("trust_drift_get", arguments)?;

    let drift = state
        .drift
        .get_drift(&params.id)
        .await
        .map_err(execution_failed)?
        .ok_or_else(|| execution_failed(format!("Drift not found: {}", params.id)))?;

    serde_json::to_value(drift).map_err(McpError::Json)
}

/// Handle trust_drift_list tool call
async fn handle_drift_list(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: HistoryParams = parse_arguments("trust_drift_list", arguments)?;

    let drifts = state
        .drift
        .list_drifts(&params.entity_id, params.limit)
        .await
        .map_err(execution_failed)?;

    Ok(json!({
        "entity_id": params.entity_id,
        "count": drifts.len(),
        "drifts": drifts,
    }))
}

/// Handle trust_drift_all tool call
async fn handle_drift_all(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: PeriodParams = parse_optional_arguments("trust_drift_all", arguments)?;

    let sweep = run_drift_sweep(&state.graph, &state.drift, params.period())
        .await
        .map_err(execution_failed)?;

    Ok(json!({
        "time_period": params.period().label(),
        "alert_count": sweep.alert_count(),
        "calculated": sweep.calculated,
        "insufficient_data": sweep.insufficient_data,
    }))
}

/// Handle trust_drift_patterns tool call
async fn handle_drift_patterns(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "trust_drift_patterns",
        arguments,
        |params: EntityIdParams| async move {
            state
                .patterns
                .analyze_drift_patterns(&params.entity_id)
                .await
        },
    )
    .await
}

/// Handle trust_alerts_list tool call
async fn handle_alerts_list(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let filter: AlertFilter = parse_optional_arguments("trust_alerts_list", arguments)?;

    let alerts = state
        .drift
        .list_alerts(&filter)
        .await
        .map_err(execution_failed)?;

    Ok(json!({
        "count": alerts.len(),
        "alerts": alerts,
    }))
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Like [`parse_arguments`], treating missing arguments as an empty object.
fn parse_optional_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    parse_arguments(tool_name, Some(arguments.unwrap_or_else(|| json!({}))))
}

fn execution_failed(e: impl std::fmt::Display) -> McpError {
    McpError::ExecutionFailed {
        message: e.to_string(),
    }
}

/// Generic handler that executes a graph or drift operation with consistent
/// error handling.
///
/// This helper reduces boilerplate by handling:
/// - Argument parsing with typed deserialization
/// - Error conversion to McpError
/// - Result serialization to JSON Value
async fn execute_handler<P, R, E, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    E: std::fmt::Display,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;

    let result = operation(params).await.map_err(execution_failed)?;

    serde_json::to_value(result).map_err(McpError::Json)
}
