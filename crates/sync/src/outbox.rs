//! Ordered outbox of remote writes, persisted next to the cache.
//!
//! Writes issued while the session is cloud-active are recorded here before
//! they are sent. A successful commit removes the entry; a failed one stays
//! (status `Failed`) and is replayed, in order, the next time the store is
//! reachable at startup. Batches the store can never accept are parked as
//! `Dead` and skipped from then on.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use smartmaint_events::Collection;

use crate::cache::{CacheError, LocalCache};
use crate::remote::WriteOp;
use crate::types::{PendingStatus, PendingWrite};

/// Outbox sharing the cache's SQLite connection.
#[derive(Debug, Clone)]
pub struct PendingWrites {
    cache: LocalCache,
}

impl PendingWrites {
    pub fn attach(cache: &LocalCache) -> Result<Self, CacheError> {
        cache.connection()?.execute(
            r#"
            CREATE TABLE IF NOT EXISTS pending_writes (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                collection   TEXT NOT NULL,
                ops          TEXT NOT NULL,
                status       TEXT NOT NULL,
                created_at   TEXT NOT NULL,
                attempted_at TEXT NULL,
                error        TEXT NULL
            )
            "#,
            [],
        )?;

        Ok(Self { cache: cache.clone() })
    }

    /// Record a batch; returns its sequence number.
    pub fn enqueue(&self, collection: Collection, ops: &[WriteOp]) -> Result<i64, CacheError> {
        let payload = serde_json::to_string(ops).map_err(|source| CacheError::Serialization {
            key: format!("pending_writes/{collection}"),
            source,
        })?;

        let conn = self.cache.connection()?;
        conn.execute(
            r#"
            INSERT INTO pending_writes (collection, ops, status, created_at, attempted_at, error)
            VALUES (?1, ?2, ?3, ?4, NULL, NULL)
            "#,
            params![
                collection.name(),
                payload,
                PendingStatus::Pending.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Every live entry, oldest first.
    ///
    /// Rows that no longer decode are parked as `Dead` so they stop counting
    /// towards [`len`](Self::len).
    pub fn list_pending(&self) -> Result<Vec<PendingWrite>, CacheError> {
        let conn = self.cache.connection()?;
        let mut out = Vec::new();
        let mut unreadable = Vec::new();
        {
            let mut stmt = conn.prepare(
                r#"
                SELECT seq, collection, ops, status, created_at, attempted_at, error
                FROM pending_writes
                WHERE status != ?1
                ORDER BY seq ASC
                "#,
            )?;
            let rows = stmt.query_map(params![PendingStatus::Dead.as_str()], |row| {
                Ok((row.get::<_, i64>(0)?, row_to_pending(row)))
            })?;
            for row in rows {
                match row? {
                    (_, Ok(write)) => out.push(write),
                    (seq, Err(err)) => unreadable.push((seq, err)),
                }
            }
        }

        for (seq, err) in unreadable {
            tracing::error!(seq, error = %err, "parking unreadable outbox row");
            set_status(&conn, seq, PendingStatus::Dead, &err)?;
        }
        Ok(out)
    }

    /// Acknowledged by the remote store; forget it.
    pub fn mark_done(&self, seq: i64) -> Result<(), CacheError> {
        self.cache
            .connection()?
            .execute("DELETE FROM pending_writes WHERE seq = ?1", params![seq])?;
        Ok(())
    }

    pub fn mark_failed(&self, seq: i64, error: &str) -> Result<(), CacheError> {
        set_status(&*self.cache.connection()?, seq, PendingStatus::Failed, error)
    }

    /// The remote store refused the batch for good; never replay it.
    pub fn mark_dead(&self, seq: i64, error: &str) -> Result<(), CacheError> {
        set_status(&*self.cache.connection()?, seq, PendingStatus::Dead, error)
    }

    /// Live entries (pending or failed).
    pub fn len(&self) -> Result<usize, CacheError> {
        self.count("SELECT COUNT(*) FROM pending_writes WHERE status != ?1")
    }

    /// Entries parked as `Dead`.
    pub fn dead_count(&self) -> Result<usize, CacheError> {
        self.count("SELECT COUNT(*) FROM pending_writes WHERE status = ?1")
    }

    fn count(&self, sql: &str) -> Result<usize, CacheError> {
        let n: i64 = self
            .cache
            .connection()?
            .query_row(sql, params![PendingStatus::Dead.as_str()], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}

fn set_status(conn: &Connection, seq: i64, status: PendingStatus, error: &str) -> Result<(), CacheError> {
    conn.execute(
        "UPDATE pending_writes SET status = ?1, attempted_at = ?2, error = ?3 WHERE seq = ?4",
        params![status.as_str(), Utc::now().to_rfc3339(), error, seq],
    )?;
    Ok(())
}

/// Map a row; the inner error describes a row whose content cannot be decoded.
fn row_to_pending(row: &Row<'_>) -> Result<PendingWrite, String> {
    let seq: i64 = row.get(0).map_err(|e| e.to_string())?;
    let collection: String = row.get(1).map_err(|e| e.to_string())?;
    let ops: String = row.get(2).map_err(|e| e.to_string())?;
    let status: String = row.get(3).map_err(|e| e.to_string())?;
    let created_at: String = row.get(4).map_err(|e| e.to_string())?;
    let attempted_at: Option<String> = row.get(5).map_err(|e| e.to_string())?;
    let error: Option<String> = row.get(6).map_err(|e| e.to_string())?;

    let collection = Collection::ALL
        .into_iter()
        .find(|c| c.name() == collection)
        .ok_or_else(|| format!("seq {seq}: unknown collection {collection:?}"))?;
    let ops: Vec<WriteOp> = serde_json::from_str(&ops).map_err(|e| format!("seq {seq}: {e}"))?;
    let status = PendingStatus::parse(&status).ok_or_else(|| format!("seq {seq}: invalid status {status:?}"))?;

    Ok(PendingWrite {
        seq,
        collection,
        ops,
        status,
        created_at: parse_ts(&created_at).ok_or_else(|| format!("seq {seq}: bad created_at"))?,
        attempted_at: attempted_at.as_deref().and_then(parse_ts),
        error,
    })
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}
