//! SQLite-backed storage for the Tollgate gateway.
//!
//! Provides [`Store`], the single transactional store holding idempotency
//! records and the admission event log. Every other gateway component reads
//! and writes through it.
//!
//! All SQL lives in `sql/*.sql` files, loaded via `include_str!`. Times are
//! unix milliseconds supplied by the caller, so expiry is deterministic under
//! test.

pub use error::{Result, StoreError};
pub use record::{
    Claim, EventRecord, IdempotencyRecord, IdempotencyStatus, LeaseToken, SweepStats,
};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::path::Path;

mod error;
mod record;
mod sql;

/// Path value selecting an ephemeral in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Embedded transactional store for idempotency records and events.
///
/// Wraps a `rusqlite::Connection` in a `Mutex`; each operation runs in its
/// own transaction, so check-then-insert sequences are atomic across
/// concurrent requests.
pub struct Store {
    conn: Mutex<Option<Connection>>,
}

impl Store {
    /// Open or create a SQLite database at the given path.
    ///
    /// The path [`IN_MEMORY`] opens an in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == IN_MEMORY {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        Self::init(conn)
    }

    /// Create an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(sql::SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Run `f` against the open connection.
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        f(conn)
    }

    /// Check that the database answers queries.
    pub fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }

    /// Close the connection. Later calls return [`StoreError::Closed`];
    /// closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let Some(conn) = self.conn.lock().take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }

    /// Atomically claim `key` for `fingerprint`, or report what holds it.
    ///
    /// Runs in one immediate transaction:
    /// 1. drop the record for `key` if it expired at or before `now`
    /// 2. insert a pending record; the primary key rejects a second insert
    /// 3. on rejection, read the existing record and decide: a different
    ///    fingerprint conflicts, a failed record is reclaimed, anything else
    ///    is returned as-is
    pub fn claim_idempotency(
        &self,
        key: &str,
        fingerprint: &str,
        now: i64,
        ttl_ms: i64,
    ) -> Result<Claim> {
        let expires_at = now.saturating_add(ttl_ms);
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(sql::DELETE_EXPIRED_KEY, params![key, now])?;

            let inserted = tx.execute(
                sql::INSERT_PENDING,
                params![key, fingerprint, now, expires_at],
            )?;
            let claim = if inserted == 1 {
                Claim::Claimed(LeaseToken {
                    generation: 1,
                    created_at: now,
                })
            } else {
                let record =
                    tx.query_row(sql::SELECT_IDEMPOTENCY, [key], IdempotencyRecord::from_row)?;
                if record.fingerprint != fingerprint {
                    Claim::Conflict(record)
                } else {
                    match record.status {
                        IdempotencyStatus::Completed => Claim::Completed(record),
                        IdempotencyStatus::Pending => Claim::Pending(record),
                        IdempotencyStatus::Failed => {
                            tx.execute(sql::RECLAIM, params![key, now, expires_at])?;
                            Claim::Claimed(LeaseToken {
                                generation: record.generation + 1,
                                created_at: now,
                            })
                        }
                    }
                }
            };
            tx.commit()?;
            Ok(claim)
        })
    }

    /// Read the record for `key`, if any. Expired records are still
    /// returned until a sweep or a later claim removes them.
    pub fn idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(sql::SELECT_IDEMPOTENCY, [key], IdempotencyRecord::from_row)
                .optional()?)
        })
    }

    /// Mark the pending record held by `token` completed and cache the
    /// response. Returns `false` if the lease no longer holds the key.
    pub fn complete_idempotency(
        &self,
        key: &str,
        token: LeaseToken,
        status: u16,
        body: &[u8],
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                sql::COMPLETE,
                params![key, token.generation, token.created_at, status, body],
            )?;
            Ok(changed == 1)
        })
    }

    /// Mark the pending record held by `token` failed. Returns `false` if
    /// the lease no longer holds the key.
    pub fn fail_idempotency(&self, key: &str, token: LeaseToken, status: u16) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                sql::FAIL,
                params![key, token.generation, token.created_at, status],
            )?;
            Ok(changed == 1)
        })
    }

    /// Append one admission event, returning its id.
    pub fn append_event(&self, identity: &str, path: &str, now: i64, ttl_ms: i64) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                sql::INSERT_EVENT,
                params![identity, path, now, now.saturating_add(ttl_ms)],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Events with an id greater than `after`, in id order.
    pub fn events(&self, after: i64, limit: usize) -> Result<Vec<EventRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(sql::SELECT_EVENTS)?;
            let rows = stmt.query_map(params![after, limit], |row| {
                Ok(EventRecord {
                    id: row.get(0)?,
                    identity: row.get(1)?,
                    path: row.get(2)?,
                    accepted_at: row.get(3)?,
                    expires_at: row.get(4)?,
                })
            })?;
            let events = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(events)
        })
    }

    /// Delete every idempotency record and event with `expires_at <= now`.
    pub fn sweep(&self, now: i64) -> Result<SweepStats> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let idempotency = tx.execute(sql::SWEEP_IDEMPOTENCY, [now])?;
            let events = tx.execute(sql::SWEEP_EVENTS, [now])?;
            tx.commit()?;
            Ok(SweepStats {
                idempotency,
                events,
            })
        })
    }

    /// Delete expired events only.
    pub fn sweep_events(&self, now: i64) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute(sql::SWEEP_EVENTS, [now])?))
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("failed to close store: {e}");
        }
    }
}
