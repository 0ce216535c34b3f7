use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("failed to create database directory: {0}")]
    Dir(#[source] std::io::Error),
}

/// A device that passed verification and holds a live credential.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TrustedDevice {
    pub token_id: String,
    pub device_id: String,
    pub verification_timestamp: String,
}

/// SQLite-backed record of issued trusted-device credentials, keyed by token id.
///
/// Owned by the service state and passed to handlers; nothing else holds a
/// connection.
#[derive(Clone)]
pub struct DeviceStore {
    conn: Connection,
}

impl DeviceStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if db_path != Path::new(":memory:") {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent).map_err(StoreError::Dir)?;
            }
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS devices (
                     token_id TEXT PRIMARY KEY,
                     device_id TEXT NOT NULL,
                     verification_timestamp TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_devices_device ON devices(device_id);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    pub async fn insert(&self, device: &TrustedDevice) -> Result<(), StoreError> {
        let device = device.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO devices (token_id, device_id, verification_timestamp)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![
                        device.token_id,
                        device.device_id,
                        device.verification_timestamp
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get(&self, token_id: &str) -> Result<Option<TrustedDevice>, StoreError> {
        let token_id = token_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT token_id, device_id, verification_timestamp
                     FROM devices WHERE token_id = ?1",
                )?;
                let mut rows = stmt.query_map([&token_id], |row| {
                    Ok(TrustedDevice {
                        token_id: row.get(0)?,
                        device_id: row.get(1)?,
                        verification_timestamp: row.get(2)?,
                    })
                })?;
                Ok(rows.next().transpose()?)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Credentials currently held by one device, oldest first.
    pub async fn list_by_device(&self, device_id: &str) -> Result<Vec<TrustedDevice>, StoreError> {
        let device_id = device_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT token_id, device_id, verification_timestamp
                     FROM devices WHERE device_id = ?1 ORDER BY verification_timestamp",
                )?;
                let rows = stmt.query_map([&device_id], |row| {
                    Ok(TrustedDevice {
                        token_id: row.get(0)?,
                        device_id: row.get(1)?,
                        verification_timestamp: row.get(2)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Delete a record by token id. Returns whether anything was removed.
    pub async fn remove(&self, token_id: &str) -> Result<bool, StoreError> {
        let token_id = token_id.to_string();
        self.conn
            .call(move |conn| {
                let affected = conn.execute("DELETE FROM devices WHERE token_id = ?1", [&token_id])?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn count_all(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }
}
