//! # Trust Graph Monitor
//!
//! A directed trust graph between entities with multi-hop trust inference,
//! topology analytics, and detection of how trust shifts over time, served
//! as a Model Context Protocol (MCP) tool server.
//!
//! ## Features
//!
//! - **Graph Store**: Entities and scored, typed relationships with
//!   write-through persistence and cascading deletes
//! - **Path Engine**: Simple-path enumeration with aggregate trust, cached per
//!   graph generation
//! - **Analytics**: Graph statistics, betweenness centrality, trust-weighted
//!   importance and anomaly detection
//! - **Snapshots**: Immutable captures of an entity's trust neighborhood
//! - **Drift**: Snapshot comparison over 1/7/30 day windows with alerts
//! - **Patterns**: Trend, cycle and asymmetry detection over drift history
//! - **Scheduler**: Periodic snapshot and drift sweeps
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (stdio) → TrustGraph ──→ Storage (SQLite)
//!                    ↓                   ↑
//!              Snapshot / Drift / Pattern components
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use trust_graph_monitor::{AppState, Config, McpServer};
//! use trust_graph_monitor::events::{Notifier, TracingPublisher};
//! use trust_graph_monitor::storage::{SharedStorage, SqliteStorage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage: SharedStorage = Arc::new(SqliteStorage::new(&config.database).await?);
//!     let notifier = Notifier::new(Arc::new(TracingPublisher));
//!     let state = Arc::new(AppState::new(config, storage, notifier).await?);
//!     let scheduler = state.start_scheduler();
//!     McpServer::new(state).run().await?;
//!     scheduler.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Command-line interface.
pub mod cli;
/// Configuration management.
pub mod config;
/// Snapshots, drift calculation and pattern detection.
pub mod drift;
/// Error types and result aliases for the application.
pub mod error;
/// Trust events and the notification collaborator.
pub mod events;
/// Trust relationship graph, path engine and analytics.
pub mod graph;
/// Scheduled snapshot and drift sweeps.
pub mod scheduler;
/// MCP server implementation and request handling.
pub mod server;
/// Storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use graph::TrustGraph;
pub use server::{AppState, McpServer, SharedState};
