//! MCP protocol implementation for JSON-RPC 2.0 communication.
//!
//! This module provides the core MCP server implementation including:
//! - JSON-RPC 2.0 request/response handling
//! - Tool definitions and schemas
//! - Stdio-based server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use super::{handle_tool_call, SharedState};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier (null for notifications; always serialized).
    pub id: Value,
    /// The result on success (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (negative for predefined errors).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// MCP server information returned during initialization.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// The server name identifier.
    pub name: String,
    /// The server version string.
    pub version: String,
}

/// MCP server capabilities advertised to clients.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Tool-related capabilities.
    pub tools: ToolCapabilities,
}

/// Tool-specific capabilities.
#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change dynamically.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Result of the MCP initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    /// The MCP protocol version supported.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    pub capabilities: Capabilities,
    /// Server identification information.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP tool definition with JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    /// Unique tool name (used in tool calls).
    pub name: String,
    /// Human-readable description of the tool.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Parameters for a tools/call request.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    /// The name of the tool to invoke.
    pub name: String,
    /// Optional arguments for the tool.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Content item within a tool result.
#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    /// The content type (e.g., "text").
    #[serde(rename = "type")]
    pub content_type: String,
    /// The text content of the result.
    pub text: String,
}

/// Result of a tool invocation.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    /// The result content items.
    pub content: Vec<ToolResultContent>,
    /// Whether the result represents an error.
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// MCP Server running over stdio.
///
/// Handles JSON-RPC 2.0 messages over stdin/stdout for MCP protocol
/// communication with clients.
pub struct McpServer {
    /// Shared application state.
    state: SharedState,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Run the server using async stdio
    pub async fn run(&self) -> std::io::Result<()> {
        info!("Trust graph MCP server listening on stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
    }

    /// Serve newline-delimited JSON-RPC from `reader` until EOF, writing
    /// responses to `writer`.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            // EOF reached
            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    error!(error = %e, "Failed to parse request");
                    Some(JsonRpcResponse::error(
                        None,
                        -32700,
                        format!("Parse error: {}", e),
                    ))
                }
            };

            // Notifications get no response
            if let Some(response) = response {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                writer.write_all(response_json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle a single JSON-RPC request.
    ///
    /// Returns `None` for notifications (requests without an id).
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        // Check if this is a notification (no id = no response required)
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" => {
                // Notification - no response per JSON-RPC 2.0
                debug!("Received initialized notification");
                None
            }
            "notifications/cancelled" => {
                // Notification - no response
                debug!("Received cancelled notification");
                None
            }
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => Some(self.handle_tool_call(request.id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                // For unknown methods, only respond if it's a request (has id)
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    /// Handle initialize request
    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "trust-graph-monitor".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    /// Handle tools/list request
    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");

        let tools = tool_definitions();

        JsonRpcResponse::success(
            id,
            serde_json::json!({
                "tools": tools
            }),
        )
    }

    /// Handle tools/call request
    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
                }
            },
            None => {
                return JsonRpcResponse::error(id, -32602, "Missing params");
            }
        };

        info!(tool = %params.name, "Handling tool call");

        let (content, is_error) =
            match handle_tool_call(&self.state, &params.name, params.arguments).await {
                Ok(result) => {
                    let text = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
                        error!(error = %e, "Failed to serialize tool result");
                        format!("{{\"error\": \"Serialization failed: {}\"}}", e)
                    });
                    (
                        ToolResultContent {
                            content_type: "text".to_string(),
                            text,
                        },
                        None,
                    )
                }
                Err(e) => (
                    ToolResultContent {
                        content_type: "text".to_string(),
                        text: format!("Error: {}", e),
                    },
                    Some(true),
                ),
            };

        let tool_result = ToolCallResult {
            content: vec![content],
            is_error,
        };

        match serde_json::to_value(tool_result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize tool call result");
                JsonRpcResponse::error(id.clone(), -32603, format!("Internal error: {}", e))
            }
        }
    }
}

/// Every tool the server exposes, in listing order.
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        // Entities
        get_entity_create_tool(),
        get_entity_get_tool(),
        get_entity_update_tool(),
        get_entity_list_tool(),
        get_entity_delete_tool(),
        // Relationships
        get_relationship_create_tool(),
        get_relationship_get_tool(),
        get_relationship_update_tool(),
        get_relationship_list_tool(),
        get_relationship_delete_tool(),
        get_purge_expired_tool(),
        // Paths and analytics
        get_find_paths_tool(),
        get_direct_tool(),
        get_inferred_tool(),
        get_graph_stats_tool(),
        get_entity_metrics_tool(),
        get_detect_anomalies_tool(),
        // Snapshots
        get_snapshot_create_tool(),
        get_snapshot_get_tool(),
        get_snapshot_latest_tool(),
        get_snapshot_list_tool(),
        get_snapshot_all_tool(),
        // Drift, patterns and alerts
        get_drift_calculate_tool(),
        get_drift_get_tool(),
        get_drift_list_tool(),
        get_drift_all_tool(),
        get_drift_patterns_tool(),
        get_alerts_list_tool(),
    ]
}

fn no_arguments_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "additionalProperties": false
    })
}

fn entity_id_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "entity_id": {
                "type": "string",
                "description": description
            }
        },
        "required": ["entity_id"],
        "additionalProperties": false
    })
}

fn id_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "id": {
                "type": "string",
                "description": description
            }
        },
        "required": ["id"],
        "additionalProperties": false
    })
}

fn pair_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "source_id": {
                "type": "string",
                "description": "Entity extending trust"
            },
            "target_id": {
                "type": "string",
                "description": "Entity receiving trust"
            }
        },
        "required": ["source_id", "target_id"],
        "additionalProperties": false
    })
}

fn history_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "entity_id": {
                "type": "string",
                "description": description
            },
            "limit": {
                "type": "integer",
                "minimum": 1,
                "description": "Keep only the most recent N records"
            }
        },
        "required": ["entity_id"],
        "additionalProperties": false
    })
}

fn time_period_property() -> Value {
    serde_json::json!({
        "type": "string",
        "enum": ["1d", "7d", "30d", "day", "week", "month"],
        "default": "7d",
        "description": "Lookback window; unrecognised labels fall back to 7d"
    })
}

fn get_entity_create_tool() -> Tool {
    Tool {
        name: "trust_entity_create".to_string(),
        description: "Register an entity (agent, service, person) in the trust graph.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Optional caller-chosen ID (generated when omitted)"
                },
                "name": {
                    "type": "string",
                    "description": "Display name"
                },
                "entity_type": {
                    "type": "string",
                    "description": "Category of the entity"
                },
                "attributes": {
                    "type": "object",
                    "description": "Free-form attributes"
                }
            },
            "required": ["name", "entity_type"],
            "additionalProperties": false
        }),
    }
}

fn get_entity_get_tool() -> Tool {
    Tool {
        name: "trust_entity_get".to_string(),
        description: "Fetch an entity by ID.".to_string(),
        input_schema: id_schema("Entity ID"),
    }
}

fn get_entity_update_tool() -> Tool {
    Tool {
        name: "trust_entity_update".to_string(),
        description: "Update an entity's name, type or attributes. Omitted fields are unchanged."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Entity ID"
                },
                "name": { "type": "string" },
                "entity_type": { "type": "string" },
                "attributes": {
                    "type": "object",
                    "description": "Replacement attribute map"
                }
            },
            "required": ["id"],
            "additionalProperties": false
        }),
    }
}

fn get_entity_list_tool() -> Tool {
    Tool {
        name: "trust_entity_list".to_string(),
        description: "List entities in registration order, optionally filtered by type."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "entity_type": {
                    "type": "string",
                    "description": "Only entities of this type"
                }
            },
            "additionalProperties": false
        }),
    }
}

fn get_entity_delete_tool() -> Tool {
    Tool {
        name: "trust_entity_delete".to_string(),
        description: "Delete an entity together with every relationship it takes part in."
            .to_string(),
        input_schema: id_schema("Entity ID"),
    }
}

fn get_relationship_create_tool() -> Tool {
    Tool {
        name: "trust_relationship_create".to_string(),
        description: "Record that one entity trusts another with a score between 0 and 1. Both entities must already exist.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Optional caller-chosen ID (generated when omitted)"
                },
                "source_id": {
                    "type": "string",
                    "description": "Entity extending trust"
                },
                "target_id": {
                    "type": "string",
                    "description": "Entity receiving trust"
                },
                "trust_score": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Trust score (0.0-1.0)"
                },
                "relationship_type": {
                    "type": "string",
                    "default": "general",
                    "description": "Kind of trust (e.g. code_review, payments)"
                },
                "attributes": {
                    "type": "object",
                    "description": "Free-form attributes"
                },
                "expiration": {
                    "type": "string",
                    "format": "date-time",
                    "description": "RFC 3339 instant after which the relationship carries no trust"
                }
            },
            "required": ["source_id", "target_id", "trust_score"],
            "additionalProperties": false
        }),
    }
}

fn get_relationship_get_tool() -> Tool {
    Tool {
        name: "trust_relationship_get".to_string(),
        description: "Fetch a relationship by ID.".to_string(),
        input_schema: id_schema("Relationship ID"),
    }
}

fn get_relationship_update_tool() -> Tool {
    Tool {
        name: "trust_relationship_update".to_string(),
        description: "Update a relationship. Omitted fields are unchanged; new endpoints must exist.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "Relationship ID"
                },
                "source_id": { "type": "string" },
                "target_id": { "type": "string" },
                "trust_score": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1
                },
                "relationship_type": { "type": "string" },
                "attributes": { "type": "object" },
                "expiration": {
                    "type": "string",
                    "format": "date-time"
                },
                "clear_expiration": {
                    "type": "boolean",
                    "description": "Remove the expiration so the relationship never lapses",
                    "default": false
                }
            },
            "required": ["id"],
            "additionalProperties": false
        }),
    }
}

fn get_relationship_list_tool() -> Tool {
    Tool {
        name: "trust_relationship_list".to_string(),
        description: "List relationships in creation order, optionally filtered.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "source_id": { "type": "string" },
                "target_id": { "type": "string" },
                "relationship_type": { "type": "string" },
                "min_trust": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1
                }
            },
            "additionalProperties": false
        }),
    }
}

fn get_relationship_delete_tool() -> Tool {
    Tool {
        name: "trust_relationship_delete".to_string(),
        description: "Delete a relationship by ID.".to_string(),
        input_schema: id_schema("Relationship ID"),
    }
}

fn get_purge_expired_tool() -> Tool {
    Tool {
        name: "trust_purge_expired".to_string(),
        description: "Delete every relationship whose expiration has passed.".to_string(),
        input_schema: no_arguments_schema(),
    }
}

fn get_find_paths_tool() -> Tool {
    Tool {
        name: "trust_find_paths".to_string(),
        description: "Enumerate simple trust paths between two entities, best aggregate trust (product of edge scores) first.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "source_id": {
                    "type": "string",
                    "description": "Entity the paths start at"
                },
                "target_id": {
                    "type": "string",
                    "description": "Entity the paths end at"
                },
                "min_trust": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Ignore edges scoring below this (default 0.0)"
                },
                "max_length": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum edges per path (default 5)"
                },
                "relationship_types": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Only follow edges of these types"
                }
            },
            "required": ["source_id", "target_id"],
            "additionalProperties": false
        }),
    }
}

fn get_direct_tool() -> Tool {
    Tool {
        name: "trust_direct".to_string(),
        description: "Score of the direct relationship between two entities, or null.".to_string(),
        input_schema: pair_schema(),
    }
}

fn get_inferred_tool() -> Tool {
    Tool {
        name: "trust_inferred".to_string(),
        description: "Aggregate trust of the best path between two entities, or null when none exists.".to_string(),
        input_schema: pair_schema(),
    }
}

fn get_graph_stats_tool() -> Tool {
    Tool {
        name: "trust_graph_stats".to_string(),
        description: "Graph-wide statistics: counts, trust distribution, most trusted and most trusting entities.".to_string(),
        input_schema: no_arguments_schema(),
    }
}

fn get_entity_metrics_tool() -> Tool {
    Tool {
        name: "trust_entity_metrics".to_string(),
        description: "Per-entity metrics: degrees, average trust, betweenness centrality and importance.".to_string(),
        input_schema: entity_id_schema("Entity to analyze"),
    }
}

fn get_detect_anomalies_tool() -> Tool {
    Tool {
        name: "trust_detect_anomalies".to_string(),
        description: "Find isolated entities, low-trust edges, asymmetric pairs and unusual incoming trust.".to_string(),
        input_schema: no_arguments_schema(),
    }
}

fn get_snapshot_create_tool() -> Tool {
    Tool {
        name: "trust_snapshot_create".to_string(),
        description: "Capture an immutable snapshot of an entity's incoming and outgoing trust."
            .to_string(),
        input_schema: entity_id_schema("Entity to snapshot"),
    }
}

fn get_snapshot_get_tool() -> Tool {
    Tool {
        name: "trust_snapshot_get".to_string(),
        description: "Fetch a snapshot by ID.".to_string(),
        input_schema: id_schema("Snapshot ID"),
    }
}

fn get_snapshot_latest_tool() -> Tool {
    Tool {
        name: "trust_snapshot_latest".to_string(),
        description: "Most recent snapshot of an entity, or null.".to_string(),
        input_schema: entity_id_schema("Entity ID"),
    }
}

fn get_snapshot_list_tool() -> Tool {
    Tool {
        name: "trust_snapshot_list".to_string(),
        description: "Snapshot history of an entity, oldest first.".to_string(),
        input_schema: history_schema("Entity ID"),
    }
}

fn get_snapshot_all_tool() -> Tool {
    Tool {
        name: "trust_snapshot_all".to_string(),
        description: "Snapshot every entity in the graph.".to_string(),
        input_schema: no_arguments_schema(),
    }
}

fn get_drift_calculate_tool() -> Tool {
    Tool {
        name: "trust_drift_calculate".to_string(),
        description: "Compare an entity's latest snapshot against the one closest to the start of the period, record the drift and raise alerts.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "entity_id": {
                    "type": "string",
                    "description": "Entity to analyze"
                },
                "time_period": time_period_property()
            },
            "required": ["entity_id"],
            "additionalProperties": false
        }),
    }
}

fn get_drift_get_tool() -> Tool {
    Tool {
        name: "trust_drift_get".to_string(),
        description: "Fetch a recorded drift by ID.".to_string(),
        input_schema: id_schema("Drift ID"),
    }
}

fn get_drift_list_tool() -> Tool {
    Tool {
        name: "trust_drift_list".to_string(),
        description: "Drift history of an entity, oldest first.".to_string(),
        input_schema: history_schema("Entity ID"),
    }
}

fn get_drift_all_tool() -> Tool {
    Tool {
        name: "trust_drift_all".to_string(),
        description: "Calculate drift for every entity; entities without enough snapshots are reported separately.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "time_period": time_period_property()
            },
            "additionalProperties": false
        }),
    }
}

fn get_drift_patterns_tool() -> Tool {
    Tool {
        name: "trust_drift_patterns".to_string(),
        description: "Detect trends, cycles and persistent asymmetry across an entity's drift history.".to_string(),
        input_schema: entity_id_schema("Entity to analyze"),
    }
}

fn get_alerts_list_tool() -> Tool {
    Tool {
        name: "trust_alerts_list".to_string(),
        description: "List drift alerts, newest first.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "entity_id": { "type": "string" },
                "alert_type": {
                    "type": "string",
                    "enum": [
                        "rapid_trust_decrease",
                        "unusual_trust_increase",
                        "trust_asymmetry",
                        "significant_relationship_changes"
                    ]
                },
                "severity": {
                    "type": "string",
                    "enum": ["low", "medium", "high"]
                },
                "since": {
                    "type": "string",
                    "format": "date-time",
                    "description": "Only alerts raised at or after this instant"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1
                }
            },
            "additionalProperties": false
        }),
    }
}
