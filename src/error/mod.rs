use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Drift error: {0}")]
    Drift(#[from] DriftError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Trust graph errors (store, path engine, analytics)
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Dangling reference: {field} points to unknown entity {entity_id}")]
    DanglingReference { field: String, entity_id: String },

    #[error("Invalid trust score: {score} (must be within 0.0-1.0)")]
    InvalidTrustScore { score: f64 },

    #[error("Invalid path length: {length} (must be within 1-{limit})")]
    InvalidPathLength { length: usize, limit: usize },

    #[error("Entity not found: {entity_id}")]
    EntityNotFound { entity_id: String },

    #[error("Relationship not found: {relationship_id}")]
    RelationshipNotFound { relationship_id: String },

    #[error("Duplicate identifier: {id}")]
    DuplicateId { id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Snapshot, drift and pattern errors
#[derive(Debug, Error)]
pub enum DriftError {
    #[error("Entity not found: {entity_id}")]
    EntityNotFound { entity_id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Notification collaborator errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Event channel closed")]
    ChannelClosed,

    #[error("Publish failed: {message}")]
    Failed { message: String },
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

impl GraphError {
    /// Whether this error reports a missing entity or relationship.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GraphError::EntityNotFound { .. } | GraphError::RelationshipNotFound { .. }
        )
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for drift operations
pub type DriftResult<T> = Result<T, DriftError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;
