//! SQL queries loaded from `sql/*.sql` files via `include_str!`.

pub(crate) const SCHEMA: &str = include_str!("../sql/schema.sql");
pub(crate) const DELETE_EXPIRED_KEY: &str = include_str!("../sql/delete_expired_key.sql");
pub(crate) const INSERT_PENDING: &str = include_str!("../sql/insert_pending.sql");
pub(crate) const SELECT_IDEMPOTENCY: &str = include_str!("../sql/select_idempotency.sql");
pub(crate) const RECLAIM: &str = include_str!("../sql/reclaim.sql");
pub(crate) const COMPLETE: &str = include_str!("../sql/complete.sql");
pub(crate) const FAIL: &str = include_str!("../sql/fail.sql");
pub(crate) const INSERT_EVENT: &str = include_str!("../sql/insert_event.sql");
pub(crate) const SELECT_EVENTS: &str = include_str!("../sql/select_events.sql");
pub(crate) const SWEEP_IDEMPOTENCY: &str = include_str!("../sql/sweep_idempotency.sql");
pub(crate) const SWEEP_EVENTS: &str = include_str!("../sql/sweep_events.sql");
