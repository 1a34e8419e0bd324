//! Row types persisted by the store.

use crate::StoreError;
use std::{fmt, str::FromStr};

/// Lifecycle of an idempotency record.
///
/// A record is created `Pending` and moves exactly once to `Completed` or
/// `Failed`. Only `Failed` records may be reclaimed before they expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStatus {
    /// A handler holds the lease and has not finished yet.
    Pending,
    /// The handler finished and its response is cached.
    Completed,
    /// The handler failed; a retry with the same fingerprint may reclaim it.
    Failed,
}

impl IdempotencyStatus {
    /// The value stored in the `status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdempotencyStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Corrupt(format!(
                "unknown idempotency status '{other}'"
            ))),
        }
    }
}

/// One row of the `idempotency` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    /// Client-supplied idempotency key (unique).
    pub key: String,
    /// Hash binding the key to one request payload.
    pub fingerprint: String,
    /// Current lifecycle state.
    pub status: IdempotencyStatus,
    /// Cached HTTP status, set on completion (and on failure).
    pub response_status: Option<u16>,
    /// Cached response body, set on completion.
    pub response_body: Option<Vec<u8>>,
    /// Generation counter, bumped every time the key is reclaimed.
    pub generation: i64,
    /// Creation time in unix milliseconds.
    pub created_at: i64,
    /// Expiry time in unix milliseconds.
    pub expires_at: i64,
}

impl IdempotencyRecord {
    /// Token identifying the current holder of this record.
    pub fn token(&self) -> LeaseToken {
        LeaseToken {
            generation: self.generation,
            created_at: self.created_at,
        }
    }

    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get(2)?;
        let status = status.parse::<IdempotencyStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let response_status: Option<i64> = row.get(3)?;
        Ok(Self {
            key: row.get(0)?,
            fingerprint: row.get(1)?,
            status,
            response_status: response_status.and_then(|s| u16::try_from(s).ok()),
            response_body: row.get(4)?,
            generation: row.get(5)?,
            created_at: row.get(6)?,
            expires_at: row.get(7)?,
        })
    }
}

/// Identifies one claim of an idempotency key.
///
/// A key deleted after expiry and inserted again restarts at generation 1
/// but always with a later `created_at`, so a stale holder never matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseToken {
    /// Reclaim generation of the record.
    pub generation: i64,
    /// Creation time of the claim in unix milliseconds.
    pub created_at: i64,
}

/// Outcome of [`Store::claim_idempotency`](crate::Store::claim_idempotency).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The caller now owns the key and must finalize it with this token.
    Claimed(LeaseToken),
    /// A completed record with the same fingerprint exists.
    Completed(IdempotencyRecord),
    /// Another request with the same fingerprint is still in flight.
    Pending(IdempotencyRecord),
    /// The key is bound to a different fingerprint.
    Conflict(IdempotencyRecord),
}

/// One row of the `events` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Monotonic row id.
    pub id: i64,
    /// Client identity the request was admitted for.
    pub identity: String,
    /// Request path.
    pub path: String,
    /// Admission time in unix milliseconds.
    pub accepted_at: i64,
    /// Expiry time in unix milliseconds.
    pub expires_at: i64,
}

/// Row counts removed by one [`Store::sweep`](crate::Store::sweep).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired idempotency records removed.
    pub idempotency: usize,
    /// Expired event rows removed.
    pub events: usize,
}
