//! `DataStore` implementation over SQLite.

use async_trait::async_trait;

use super::db::{unix_millis, Database, DatabaseError};
use super::models::{AuthStatus, DeviceMetadata, DeviceRecord, DeviceRow, MetricPoint};
use super::DataStore;

#[async_trait]
impl DataStore for Database {
    async fn init_device(&self, uuid: &str, meta: &DeviceMetadata) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO devices \
             (uuid, name, serial_number, mac_address, hw_version, sw_version, config_version, \
              token, auth_status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid)
        .bind(&meta.name)
        .bind(&meta.serial_number)
        .bind(&meta.mac_address)
        .bind(&meta.hw_version)
        .bind(&meta.sw_version)
        .bind(&meta.config_version)
        .bind(meta.token.as_deref())
        .bind(meta.auth_status.as_str())
        .bind(unix_millis())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn destroy_device(&self, uuid: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM devices WHERE uuid = ?")
            .bind(uuid)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Device {uuid}")));
        }
        Ok(())
    }

    async fn load_config(&self, uuid: &str) -> Result<DeviceMetadata, DatabaseError> {
        sqlx::query_as::<_, DeviceRow>("SELECT * FROM devices WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(self.pool())
            .await?
            .map(DeviceMetadata::from)
            .ok_or_else(|| DatabaseError::NotFound(format!("Device {uuid}")))
    }

    async fn save_metadata(&self, uuid: &str, meta: &DeviceMetadata) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE devices SET name = ?, serial_number = ?, mac_address = ?, hw_version = ?, \
             sw_version = ?, config_version = ?, token = ?, auth_status = ? WHERE uuid = ?",
        )
        .bind(&meta.name)
        .bind(&meta.serial_number)
        .bind(&meta.mac_address)
        .bind(&meta.hw_version)
        .bind(&meta.sw_version)
        .bind(&meta.config_version)
        .bind(meta.token.as_deref())
        .bind(meta.auth_status.as_str())
        .bind(uuid)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Device {uuid}")));
        }
        Ok(())
    }

    async fn get_device_by_token(
        &self,
        token: &str,
    ) -> Result<(String, AuthStatus), DatabaseError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT uuid, auth_status FROM devices WHERE token = ?")
                .bind(token)
                .fetch_optional(self.pool())
                .await?;

        row.map(|(uuid, status)| (uuid, AuthStatus::parse(&status)))
            .ok_or_else(|| DatabaseError::NotFound("token".into()))
    }

    async fn update_token(&self, uuid: &str, token: Option<&str>) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE devices SET token = ? WHERE uuid = ?")
            .bind(token)
            .bind(uuid)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Device {uuid}")));
        }
        Ok(())
    }

    async fn append_metric(&self, uuid: &str, point: &MetricPoint) -> Result<(), DatabaseError> {
        sqlx::query("INSERT INTO metrics (uuid, timestamp_ms, value, kind) VALUES (?, ?, ?, ?)")
            .bind(uuid)
            .bind(point.timestamp_ms)
            .bind(point.value)
            .bind(point.kind)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    async fn batch_append_metrics(
        &self,
        uuid: &str,
        points: &[MetricPoint],
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;

        for point in points {
            sqlx::query(
                "INSERT INTO metrics (uuid, timestamp_ms, value, kind) VALUES (?, ?, ?, ?)",
            )
            .bind(uuid)
            .bind(point.timestamp_ms)
            .bind(point.value)
            .bind(point.kind)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query_metrics(
        &self,
        uuid: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<MetricPoint>, DatabaseError> {
        let points = sqlx::query_as::<_, MetricPoint>(
            "SELECT timestamp_ms, value, kind FROM metrics \
             WHERE uuid = ? AND timestamp_ms BETWEEN ? AND ? ORDER BY timestamp_ms",
        )
        .bind(uuid)
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(self.pool())
        .await?;

        Ok(points)
    }

    async fn write_log(
        &self,
        uuid: &str,
        level: &str,
        message: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query("INSERT INTO device_logs (uuid, level, message, logged_at) VALUES (?, ?, ?, ?)")
            .bind(uuid)
            .bind(level)
            .bind(message)
            .bind(unix_millis())
            .execute(self.pool())
            .await?;

        Ok(())
    }

    async fn list_devices(&self, page: u32, size: u32) -> Result<Vec<DeviceRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            "SELECT * FROM devices ORDER BY created_at LIMIT ? OFFSET ?",
        )
        .bind(size)
        .bind(page.saturating_mul(size))
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(DeviceRecord::from).collect())
    }
}
