//! libSQL backend for the duplicate index.
//!
//! Local file database in production, `:memory:` in tests. First-write-wins
//! is enforced at the storage layer: insert is `INSERT OR IGNORE` against
//! the (channel, code) primary key, and the affected-row count decides the
//! outcome.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use tracing::info;

use crate::error::IndexError;
use crate::pipeline::types::ChannelId;
use crate::store::traits::{DuplicateIndex, IndexEntry, InsertOutcome};

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "dedup_entries",
    sql: r#"
        CREATE TABLE IF NOT EXISTS dedup_entries (
            channel TEXT NOT NULL,
            code TEXT NOT NULL,
            message_id INTEGER NOT NULL,
            first_seen_at TEXT NOT NULL,
            PRIMARY KEY (channel, code)
        );
        CREATE INDEX IF NOT EXISTS idx_dedup_channel ON dedup_entries(channel);
    "#,
}];

/// libSQL duplicate-index backend.
///
/// Holds a single connection reused for all operations;
/// `libsql::Connection` is safe for concurrent async use.
pub struct LibSqlIndex {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
}

impl LibSqlIndex {
    /// Open (or create) a local index file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| IndexError::Open(format!("Failed to create index directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| IndexError::Open(format!("Failed to open index database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| IndexError::Open(format!("Failed to create connection: {e}")))?;

        let index = Self {
            db: Arc::new(db),
            conn,
        };
        index.run_migrations().await?;
        info!(path = %path.display(), "Duplicate index opened");
        Ok(index)
    }

    /// Create an in-memory index (for tests).
    pub async fn new_memory() -> Result<Self, IndexError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| IndexError::Open(format!("Failed to create in-memory index: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| IndexError::Open(format!("Failed to create connection: {e}")))?;

        let index = Self {
            db: Arc::new(db),
            conn,
        };
        index.run_migrations().await?;
        Ok(index)
    }

    async fn run_migrations(&self) -> Result<(), IndexError> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS _migrations (
                    version INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                (),
            )
            .await
            .map_err(|e| IndexError::Open(format!("Failed to create _migrations table: {e}")))?;

        let current = self.current_version().await?;

        for migration in MIGRATIONS {
            if migration.version > current {
                info!(
                    version = migration.version,
                    name = migration.name,
                    "Applying index migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    IndexError::Open(format!(
                        "Migration V{} ({}) failed: {e}",
                        migration.version, migration.name
                    ))
                })?;
                self.conn
                    .execute(
                        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
                        params![migration.version, migration.name],
                    )
                    .await
                    .map_err(|e| IndexError::Open(format!("Failed to record migration: {e}")))?;
            }
        }

        Ok(())
    }

    async fn current_version(&self) -> Result<i64, IndexError> {
        let mut rows = self
            .conn
            .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
            .await
            .map_err(|e| IndexError::Query(format!("Failed to query migration version: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| IndexError::Query(format!("Failed to read migration version: {e}")))?
        {
            Some(row) => row
                .get(0)
                .map_err(|e| IndexError::Query(format!("Failed to parse migration version: {e}"))),
            None => Ok(0),
        }
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(ndt.and_utc());
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(ndt.and_utc());
    }
    None
}

#[async_trait]
impl DuplicateIndex for LibSqlIndex {
    async fn lookup(
        &self,
        channel: &ChannelId,
        code: &str,
    ) -> Result<Option<IndexEntry>, IndexError> {
        let mut rows = self
            .conn
            .query(
                "SELECT message_id, first_seen_at FROM dedup_entries
                 WHERE channel = ?1 AND code = ?2",
                params![channel.as_str(), code],
            )
            .await
            .map_err(|e| IndexError::Query(format!("Lookup failed: {e}")))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| IndexError::Query(format!("Lookup read failed: {e}")))?
        else {
            return Ok(None);
        };

        let message_id: i64 = row
            .get(0)
            .map_err(|e| IndexError::Query(format!("Lookup parse failed: {e}")))?;
        let first_seen_raw: String = row
            .get(1)
            .map_err(|e| IndexError::Query(format!("Lookup parse failed: {e}")))?;
        let first_seen_at =
            parse_datetime(&first_seen_raw).ok_or_else(|| IndexError::Corrupt {
                channel: channel.to_string(),
                code: code.to_string(),
                reason: format!("unparseable timestamp '{first_seen_raw}'"),
            })?;

        Ok(Some(IndexEntry {
            channel: channel.clone(),
            code: code.to_string(),
            message_id,
            first_seen_at,
        }))
    }

    async fn insert(
        &self,
        channel: &ChannelId,
        code: &str,
        message_id: i64,
        first_seen_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, IndexError> {
        let affected = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO dedup_entries (channel, code, message_id, first_seen_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    channel.as_str(),
                    code,
                    message_id,
                    first_seen_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| IndexError::Query(format!("Insert failed: {e}")))?;

        if affected == 0 {
            Ok(InsertOutcome::AlreadyPresent)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn reset(&self, channel: Option<&ChannelId>) -> Result<usize, IndexError> {
        let affected = match channel {
            Some(channel) => self
                .conn
                .execute(
                    "DELETE FROM dedup_entries WHERE channel = ?1",
                    params![channel.as_str()],
                )
                .await
                .map_err(|e| IndexError::Query(format!("Reset failed: {e}")))?,
            None => self
                .conn
                .execute("DELETE FROM dedup_entries", ())
                .await
                .map_err(|e| IndexError::Query(format!("Reset failed: {e}")))?,
        };

        info!(
            channel = channel.map(ChannelId::as_str).unwrap_or("*"),
            removed = affected,
            "Duplicate index reset"
        );
        Ok(affected as usize)
    }
}
