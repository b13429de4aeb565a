//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked by the node tasks writing measurements
//! - **Connection pooling**: Every insert runs in its own pooled transaction
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Measurement timestamps are stored as Unix milliseconds.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, trace, warn};

use super::backend::{HealthStatus, StorageBackend, check_range};
use super::error::{StorageError, StorageResult};
use crate::{Device, DeviceId, Measurement, Node, NodeId, Range, Sensor, User};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path` and run migrations
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use senseye::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./senseye.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn millis_to_timestamp(millis: i64) -> StorageResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            StorageError::InvalidRow(format!("measurement time {millis} ms out of range"))
        })
    }

    fn node_from_row(row: &SqliteRow) -> StorageResult<Node> {
        let port: i64 = row.try_get("port")?;
        Ok(Node {
            id: row.try_get("id")?,
            room: row.try_get("room")?,
            address: row.try_get("address")?,
            port: u16::try_from(port)
                .map_err(|_| StorageError::InvalidRow(format!("node port {port} out of range")))?,
        })
    }

    fn measurement_from_row(row: &SqliteRow) -> StorageResult<Measurement> {
        Ok(Measurement {
            device: row.try_get("device")?,
            sensor: row.try_get("sensor")?,
            parameter: row.try_get("parameter")?,
            time: Self::millis_to_timestamp(row.try_get("time")?)?,
            value: row.try_get("value")?,
        })
    }

    fn user_from_row(row: &SqliteRow) -> StorageResult<User> {
        Ok(User {
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            group: row.try_get("group")?,
            password_hash: row.try_get("password_hash")?,
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn list_nodes(&self) -> StorageResult<Vec<Node>> {
        let rows = sqlx::query("SELECT id, room, address, port FROM nodes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::node_from_row).collect()
    }

    async fn get_node(&self, id: NodeId) -> StorageResult<Option<Node>> {
        let row = sqlx::query("SELECT id, room, address, port FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::node_from_row).transpose()
    }

    async fn attached_sensors(&self, node: NodeId) -> StorageResult<Vec<Sensor>> {
        let rows = sqlx::query(
            r#"
            SELECT id, mac, device, node
            FROM sensors
            WHERE node = ? AND device IS NOT NULL
            ORDER BY id
            "#,
        )
        .bind(node)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Sensor {
                    id: row.try_get("id")?,
                    mac: row.try_get("mac")?,
                    device: row.try_get("device")?,
                    node: row.try_get("node")?,
                })
            })
            .collect()
    }

    async fn get_device(&self, id: DeviceId) -> StorageResult<Option<Device>> {
        let row = sqlx::query(r#"SELECT id, type, room, "group" FROM devices WHERE id = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(Device {
                id: row.try_get("id")?,
                kind: row.try_get("type")?,
                room: row.try_get("room")?,
                group: row.try_get("group")?,
            })
        })
        .transpose()
    }

    async fn list_ranges(&self) -> StorageResult<Vec<Range>> {
        let rows = sqlx::query("SELECT device, parameter, lower, upper FROM ranges")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Range {
                    device: row.try_get("device")?,
                    parameter: row.try_get("parameter")?,
                    lower: row.try_get("lower")?,
                    upper: row.try_get("upper")?,
                })
            })
            .collect()
    }

    async fn users_in_group(&self, group: &str) -> StorageResult<Vec<User>> {
        let rows = sqlx::query(
            r#"SELECT username, email, password_hash, "group" FROM users WHERE "group" = ? ORDER BY username"#,
        )
        .bind(group)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::user_from_row).collect()
    }

    async fn count_users(&self) -> StorageResult<usize> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as usize)
    }

    #[instrument(skip(self, measurement), fields(device = measurement.device, sensor = measurement.sensor, parameter = %measurement.parameter))]
    async fn insert_measurement(&self, measurement: &Measurement) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO measurements (device, sensor, parameter, time, value)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(measurement.device)
        .bind(measurement.sensor)
        .bind(&measurement.parameter)
        .bind(measurement.time.timestamp_millis())
        .bind(measurement.value)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        trace!("measurement stored");
        Ok(())
    }

    async fn latest_measurements(
        &self,
        device: DeviceId,
        parameter: &str,
        limit: usize,
    ) -> StorageResult<Vec<Measurement>> {
        let rows = sqlx::query(
            r#"
            SELECT device, sensor, parameter, time, value
            FROM measurements
            WHERE device = ? AND parameter = ?
            ORDER BY time DESC
            LIMIT ?
            "#,
        )
        .bind(device)
        .bind(parameter)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::measurement_from_row).collect()
    }

    async fn count_measurements(&self) -> StorageResult<usize> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM measurements")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as usize)
    }

    async fn upsert_node(&self, node: &Node) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO nodes (id, room, address, port) VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                room = excluded.room,
                address = excluded.address,
                port = excluded.port
            "#,
        )
        .bind(node.id)
        .bind(&node.room)
        .bind(&node.address)
        .bind(node.port as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_device(&self, device: &Device) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (id, type, room, "group") VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                type = excluded.type,
                room = excluded.room,
                "group" = excluded."group"
            "#,
        )
        .bind(device.id)
        .bind(&device.kind)
        .bind(&device.room)
        .bind(&device.group)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_sensor(&self, sensor: &Sensor) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sensors (id, mac, device, node) VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                mac = excluded.mac,
                device = excluded.device,
                node = excluded.node
            "#,
        )
        .bind(sensor.id)
        .bind(&sensor.mac)
        .bind(sensor.device)
        .bind(sensor.node)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_range(&self, range: &Range) -> StorageResult<()> {
        check_range(range)?;
        sqlx::query(
            r#"
            INSERT INTO ranges (device, parameter, lower, upper) VALUES (?, ?, ?, ?)
            ON CONFLICT (device, parameter) DO UPDATE SET
                lower = excluded.lower,
                upper = excluded.upper
            "#,
        )
        .bind(range.device)
        .bind(&range.parameter)
        .bind(range.lower)
        .bind(range.upper)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> StorageResult<()> {
        sqlx::query(
            r#"INSERT INTO users (username, email, password_hash, "group") VALUES (?, ?, ?, ?)"#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.group)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
