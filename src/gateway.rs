use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::models::Application;

pub const BLOB_KEY: &str = "job-applications";

/// Opaque asynchronous key/value storage for the serialized collection.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>>;

    async fn save(&self, key: &str, blob: &str) -> Result<()>;
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| anyhow!("database lock poisoned"))?;
            let result: rusqlite::Result<String> =
                conn.query_row("SELECT value FROM kv WHERE key = ?1", [&key], |row| row.get(0));
            match result {
                Ok(value) => Ok(Some(value)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }

    async fn save(&self, key: &str, blob: &str) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        let blob = blob.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| anyhow!("database lock poisoned"))?;
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, blob],
            )
            .context("Failed to write applications")?;
            Ok(())
        })
        .await?
    }
}

/// What a session starts from: the saved collection and when it was saved.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub applications: Vec<Application>,
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlobOut<'a> {
    applications: &'a [Application],
    last_sync: DateTime<Utc>,
}

// Records are decoded one by one so a single bad entry doesn't discard the rest.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobIn {
    #[serde(default)]
    applications: Vec<serde_json::Value>,
    #[serde(default)]
    last_sync: Option<serde_json::Value>,
}

/// Encodes the collection as `{applications, lastSync}` JSON under a single
/// key of a [`KvStore`].
pub struct Gateway {
    store: Arc<dyn KvStore>,
    key: String,
}

impl Gateway {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            key: BLOB_KEY.to_string(),
        }
    }

    /// Never fails: a missing, unreadable or corrupt blob starts an empty
    /// collection and is only logged.
    pub async fn load(&self) -> Snapshot {
        let blob = match self.store.load(&self.key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                info!("No saved applications, starting empty");
                return Snapshot::default();
            }
            Err(e) => {
                warn!(error = %e, "Failed to load saved applications, starting empty");
                return Snapshot::default();
            }
        };

        let raw: BlobIn = match serde_json::from_str(&blob) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Saved applications are corrupt, starting empty");
                return Snapshot::default();
            }
        };

        let mut applications = Vec::with_capacity(raw.applications.len());
        for (index, value) in raw.applications.into_iter().enumerate() {
            match serde_json::from_value::<Application>(value) {
                Ok(app) => applications.push(app),
                Err(e) => warn!(index, error = %e, "Skipping unreadable saved application"),
            }
        }

        let last_sync = raw
            .last_sync
            .as_ref()
            .and_then(serde_json::Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        info!(count = applications.len(), "Loaded saved applications");
        Snapshot {
            applications,
            last_sync,
        }
    }

    pub async fn save(&self, applications: &[Application], at: DateTime<Utc>) -> Result<()> {
        let blob = serde_json::to_string(&BlobOut {
            applications,
            last_sync: at,
        })
        .context("Failed to encode applications")?;
        self.store.save(&self.key, &blob).await
    }
}
