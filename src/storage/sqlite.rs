use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{info, warn};

use super::{
    AlertFilter, Attributes, DriftAlert, Entity, Storage, TrustDrift, TrustMap, TrustRelationship,
    TrustSnapshot,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory instance (single connection, for tests and scratch use)
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        // Every connection to :memory: is its own database, so the pool must
        // never open a second one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_entity(&self, entity: &Entity) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO entities (id, name, entity_type, attributes, created_at, updated_at, seq)
            VALUES (?, ?, ?, ?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM entities))
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.name)
        .bind(&entity.entity_type)
        .bind(to_json(&entity.attributes)?)
        .bind(format_ts(&entity.created_at))
        .bind(format_ts(&entity.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_entity(&self, entity: &Entity) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE entities
            SET name = ?, entity_type = ?, attributes = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&entity.name)
        .bind(&entity.entity_type)
        .bind(to_json(&entity.attributes)?)
        .bind(format_ts(&entity.updated_at))
        .bind(&entity.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_entity(&self, id: &str) -> StorageResult<Option<Entity>> {
        let row: Option<EntityRow> = sqlx::query_as(
            r#"
            SELECT id, name, entity_type, attributes, created_at, updated_at
            FROM entities
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list_entities(&self) -> StorageResult<Vec<Entity>> {
        let rows: Vec<EntityRow> = sqlx::query_as(
            r#"
            SELECT id, name, entity_type, attributes, created_at, updated_at
            FROM entities
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn delete_entity_cascade(&self, id: &str) -> StorageResult<Option<Vec<String>>> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM entities WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let incident: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM relationships
            WHERE source_id = ? OR target_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(id)
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM relationships WHERE source_id = ? OR target_id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM entities WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(incident.into_iter().map(|(rid,)| rid).collect()))
    }

    async fn create_relationship(&self, relationship: &TrustRelationship) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO relationships (id, source_id, target_id, trust_score, relationship_type,
                                       attributes, expiration, created_at, updated_at, seq)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM relationships))
            "#,
        )
        .bind(&relationship.id)
        .bind(&relationship.source_id)
        .bind(&relationship.target_id)
        .bind(relationship.trust_score)
        .bind(&relationship.relationship_type)
        .bind(to_json(&relationship.attributes)?)
        .bind(relationship.expiration.as_ref().map(format_ts))
        .bind(format_ts(&relationship.created_at))
        .bind(format_ts(&relationship.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_relationship(&self, relationship: &TrustRelationship) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE relationships
            SET source_id = ?, target_id = ?, trust_score = ?, relationship_type = ?,
                attributes = ?, expiration = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&relationship.source_id)
        .bind(&relationship.target_id)
        .bind(relationship.trust_score)
        .bind(&relationship.relationship_type)
        .bind(to_json(&relationship.attributes)?)
        .bind(relationship.expiration.as_ref().map(format_ts))
        .bind(format_ts(&relationship.updated_at))
        .bind(&relationship.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_relationship(&self, id: &str) -> StorageResult<Option<TrustRelationship>> {
        let row: Option<RelationshipRow> = sqlx::query_as(
            r#"
            SELECT id, source_id, target_id, trust_score, relationship_type, attributes,
                   expiration, created_at, updated_at
            FROM relationships
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list_relationships(&self) -> StorageResult<Vec<TrustRelationship>> {
        let rows: Vec<RelationshipRow> = sqlx::query_as(
            r#"
            SELECT id, source_id, target_id, trust_score, relationship_type, attributes,
                   expiration, created_at, updated_at
            FROM relationships
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn delete_relationship(&self, id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM relationships WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_snapshot(&self, snapshot: &TrustSnapshot) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trust_snapshots (id, entity_id, timestamp, incoming_trust, outgoing_trust,
                                         avg_incoming_trust, avg_outgoing_trust)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.entity_id)
        .bind(format_ts(&snapshot.timestamp))
        .bind(to_json(&snapshot.incoming_trust)?)
        .bind(to_json(&snapshot.outgoing_trust)?)
        .bind(snapshot.avg_incoming_trust)
        .bind(snapshot.avg_outgoing_trust)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_snapshot(&self, id: &str) -> StorageResult<Option<TrustSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT id, entity_id, timestamp, incoming_trust, outgoing_trust,
                   avg_incoming_trust, avg_outgoing_trust
            FROM trust_snapshots
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list_snapshots(&self, entity_id: &str) -> StorageResult<Vec<TrustSnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT id, entity_id, timestamp, incoming_trust, outgoing_trust,
                   avg_incoming_trust, avg_outgoing_trust
            FROM trust_snapshots
            WHERE entity_id = ?
            ORDER BY timestamp ASC, rowid ASC
            "#,
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn get_latest_snapshot(&self, entity_id: &str) -> StorageResult<Option<TrustSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT id, entity_id, timestamp, incoming_trust, outgoing_trust,
                   avg_incoming_trust, avg_outgoing_trust
            FROM trust_snapshots
            WHERE entity_id = ?
            ORDER BY timestamp DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn create_drift(&self, drift: &TrustDrift) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_drift(&mut *conn, drift).await
    }

    async fn create_drift_with_alerts(
        &self,
        drift: &TrustDrift,
        alerts: &[DriftAlert],
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        insert_drift(&mut *tx, drift).await?;
        for alert in alerts {
            insert_alert(&mut *tx, alert).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_drift(&self, id: &str) -> StorageResult<Option<TrustDrift>> {
        let row: Option<DriftRow> = sqlx::query_as(
            r#"
            SELECT id, entity_id, start_snapshot_id, end_snapshot_id, time_period,
                   start_timestamp, end_timestamp, incoming_trust_drift, outgoing_trust_drift,
                   avg_incoming_drift, avg_outgoing_drift, drift_magnitude, drift_direction,
                   created_at
            FROM trust_drifts
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list_drifts(&self, entity_id: &str) -> StorageResult<Vec<TrustDrift>> {
        let rows: Vec<DriftRow> = sqlx::query_as(
            r#"
            SELECT id, entity_id, start_snapshot_id, end_snapshot_id, time_period,
                   start_timestamp, end_timestamp, incoming_trust_drift, outgoing_trust_drift,
                   avg_incoming_drift, avg_outgoing_drift, drift_magnitude, drift_direction,
                   created_at
            FROM trust_drifts
            WHERE entity_id = ?
            ORDER BY end_timestamp ASC, rowid ASC
            "#,
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn create_alert(&self, alert: &DriftAlert) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_alert(&mut *conn, alert).await
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> StorageResult<Vec<DriftAlert>> {
        let mut sql = String::from(
            "SELECT id, drift_id, entity_id, alert_type, severity, description, details, timestamp \
             FROM drift_alerts WHERE 1 = 1",
        );
        if filter.entity_id.is_some() {
            sql.push_str(" AND entity_id = ?");
        }
        if filter.alert_type.is_some() {
            sql.push_str(" AND alert_type = ?");
        }
        if filter.severity.is_some() {
            sql.push_str(" AND severity = ?");
        }
        if filter.since.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        sql.push_str(" ORDER BY timestamp DESC, rowid DESC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query_as::<_, AlertRow>(&sql);
        if let Some(entity_id) = &filter.entity_id {
            query = query.bind(entity_id.clone());
        }
        if let Some(alert_type) = filter.alert_type {
            query = query.bind(alert_type.as_str());
        }
        if let Some(severity) = filter.severity {
            query = query.bind(severity.as_str());
        }
        if let Some(since) = &filter.since {
            query = query.bind(format_ts(since));
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit as i64);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

async fn insert_drift(conn: &mut SqliteConnection, drift: &TrustDrift) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO trust_drifts (id, entity_id, start_snapshot_id, end_snapshot_id, time_period,
                                  start_timestamp, end_timestamp, incoming_trust_drift,
                                  outgoing_trust_drift, avg_incoming_drift, avg_outgoing_drift,
                                  drift_magnitude, drift_direction, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&drift.id)
    .bind(&drift.entity_id)
    .bind(&drift.start_snapshot_id)
    .bind(&drift.end_snapshot_id)
    .bind(&drift.time_period)
    .bind(format_ts(&drift.start_timestamp))
    .bind(format_ts(&drift.end_timestamp))
    .bind(to_json(&drift.incoming_trust_drift)?)
    .bind(to_json(&drift.outgoing_trust_drift)?)
    .bind(drift.avg_incoming_drift)
    .bind(drift.avg_outgoing_drift)
    .bind(drift.drift_magnitude)
    .bind(drift.drift_direction.to_string())
    .bind(format_ts(&drift.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_alert(conn: &mut SqliteConnection, alert: &DriftAlert) -> StorageResult<()> {
    let details = alert.details.as_ref().map(to_json).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO drift_alerts (id, drift_id, entity_id, alert_type, severity, description,
                                  details, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&alert.id)
    .bind(&alert.drift_id)
    .bind(&alert.entity_id)
    .bind(alert.alert_type.as_str())
    .bind(alert.severity.as_str())
    .bind(&alert.description)
    .bind(&details)
    .bind(format_ts(&alert.timestamp))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// Fixed-width UTC text so lexical ordering matches chronological ordering.
fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!(value = %s, error = %e, "Unparsable timestamp in database, using now");
            Utc::now()
        })
}

fn to_json<T: serde::Serialize>(value: &T) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Serialization {
        message: e.to_string(),
    })
}

fn parse_attributes(s: &str) -> Attributes {
    serde_json::from_str(s).unwrap_or_default()
}

fn parse_trust_map(s: &str) -> TrustMap {
    serde_json::from_str(s).unwrap_or_default()
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct EntityRow {
    id: String,
    name: String,
    entity_type: String,
    attributes: String,
    created_at: String,
    updated_at: String,
}

impl From<EntityRow> for Entity {
    fn from(row: EntityRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            entity_type: row.entity_type,
            attributes: parse_attributes(&row.attributes),
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct RelationshipRow {
    id: String,
    source_id: String,
    target_id: String,
    trust_score: f64,
    relationship_type: String,
    attributes: String,
    expiration: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<RelationshipRow> for TrustRelationship {
    fn from(row: RelationshipRow) -> Self {
        Self {
            id: row.id,
            source_id: row.source_id,
            target_id: row.target_id,
            trust_score: row.trust_score,
            relationship_type: row.relationship_type,
            attributes: parse_attributes(&row.attributes),
            expiration: row.expiration.as_deref().map(parse_ts),
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: String,
    entity_id: String,
    timestamp: String,
    incoming_trust: String,
    outgoing_trust: String,
    avg_incoming_trust: f64,
    avg_outgoing_trust: f64,
}

impl From<SnapshotRow> for TrustSnapshot {
    fn from(row: SnapshotRow) -> Self {
        Self {
            id: row.id,
            entity_id: row.entity_id,
            timestamp: parse_ts(&row.timestamp),
            incoming_trust: parse_trust_map(&row.incoming_trust),
            outgoing_trust: parse_trust_map(&row.outgoing_trust),
            avg_incoming_trust: row.avg_incoming_trust,
            avg_outgoing_trust: row.avg_outgoing_trust,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DriftRow {
    id: String,
    entity_id: String,
    start_snapshot_id: String,
    end_snapshot_id: String,
    time_period: String,
    start_timestamp: String,
    end_timestamp: String,
    incoming_trust_drift: String,
    outgoing_trust_drift: String,
    avg_incoming_drift: f64,
    avg_outgoing_drift: f64,
    drift_magnitude: f64,
    drift_direction: String,
    created_at: String,
}

impl From<DriftRow> for TrustDrift {
    fn from(row: DriftRow) -> Self {
        Self {
            id: row.id,
            entity_id: row.entity_id,
            start_snapshot_id: row.start_snapshot_id,
            end_snapshot_id: row.end_snapshot_id,
            time_period: row.time_period,
            start_timestamp: parse_ts(&row.start_timestamp),
            end_timestamp: parse_ts(&row.end_timestamp),
            incoming_trust_drift: parse_trust_map(&row.incoming_trust_drift),
            outgoing_trust_drift: parse_trust_map(&row.outgoing_trust_drift),
            avg_incoming_drift: row.avg_incoming_drift,
            avg_outgoing_drift: row.avg_outgoing_drift,
            drift_magnitude: row.drift_magnitude,
            drift_direction: row.drift_direction.parse().unwrap_or_default(),
            created_at: parse_ts(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: String,
    drift_id: String,
    entity_id: String,
    alert_type: String,
    severity: String,
    description: String,
    details: Option<String>,
    timestamp: String,
}

impl From<AlertRow> for DriftAlert {
    fn from(row: AlertRow) -> Self {
        use super::{AlertType, Severity};

        Self {
            id: row.id,
            drift_id: row.drift_id,
            entity_id: row.entity_id,
            alert_type: row
                .alert_type
                .parse()
                .unwrap_or(AlertType::SignificantRelationshipChanges),
            severity: row.severity.parse().unwrap_or(Severity::Medium),
            description: row.description,
            details: row.details.and_then(|s| serde_json::from_str(&s).ok()),
            timestamp: parse_ts(&row.timestamp),
        }
    }
}
