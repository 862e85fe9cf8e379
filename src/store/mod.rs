//! Session persistence with a ticket reverse index.
//!
//! Each session lives under `session:<id>`. When a CAS ticket established the
//! session, `ticket:<ticket>` points back at the session key so the session can
//! be destroyed by ticket (single sign-out). Both entries are written in one
//! atomic batch and share one absolute expiry; the backend's TTL is the only
//! thing that ever prunes them.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::future::Future;
use std::time::Duration;

use time::OffsetDateTime;

use crate::error::Error;
use crate::types::{CasTicket, SessionId};

pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use redis::{RedisBackend, RedisConfig};

/// Session lifetime when the caller does not specify one.
pub const DEFAULT_EXPIRE_AFTER: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const SESSION_PREFIX: &str = "session:";
const TICKET_PREFIX: &str = "ticket:";

/// One command inside an atomic [`KvBackend::batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Set { key: String, value: String },
    /// Absolute expiry in Unix seconds.
    ExpireAt { key: String, at: i64 },
    Del { key: String },
}

impl BatchOp {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn expire_at(key: impl Into<String>, at: i64) -> Self {
        Self::ExpireAt { key: key.into(), at }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self::Del { key: key.into() }
    }

    /// Whether `reply` reports this command as fully applied.
    #[must_use]
    pub fn acknowledged_by(&self, reply: &BatchReply) -> bool {
        matches!(
            (self, reply),
            (Self::Set { .. }, BatchReply::Ok)
                | (Self::ExpireAt { .. }, BatchReply::Applied(true))
                | (Self::Del { .. }, BatchReply::Removed(_))
        )
    }
}

/// Per-command result of a batch, in command order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReply {
    /// `SET` succeeded.
    Ok,
    /// `EXPIREAT` result: `false` when the key did not exist.
    Applied(bool),
    /// `DEL` result: number of keys removed.
    Removed(u64),
    /// The backend rejected this command; the rest of the batch still ran.
    Failed(String),
}

/// Key-value backend the session store runs on.
///
/// Implementations must make [`batch`](KvBackend::batch) atomic: no concurrent
/// reader may observe part of a batch.
pub trait KvBackend: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, Error>> + Send;

    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    fn expire_at(&self, key: &str, at: i64) -> impl Future<Output = Result<bool, Error>> + Send;

    fn del(&self, key: &str) -> impl Future<Output = Result<u64, Error>> + Send;

    fn batch(
        &self,
        ops: &[BatchOp],
    ) -> impl Future<Output = Result<Vec<BatchReply>, Error>> + Send;

    /// Current Unix time on the clock the backend expires keys against.
    fn now(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }
}

/// Session store over a [`KvBackend`].
#[derive(Debug, Clone)]
pub struct SessionStore<B> {
    backend: B,
    session_prefix: String,
    ticket_prefix: String,
}

impl<B: KvBackend> SessionStore<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            session_prefix: SESSION_PREFIX.into(),
            ticket_prefix: TICKET_PREFIX.into(),
        }
    }

    /// Override the key prefixes (default `session:` and `ticket:`).
    #[must_use]
    pub fn with_key_prefixes(
        mut self,
        session_prefix: impl Into<String>,
        ticket_prefix: impl Into<String>,
    ) -> Self {
        self.session_prefix = session_prefix.into();
        self.ticket_prefix = ticket_prefix.into();
        self
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn session_key(&self, session_id: &SessionId) -> String {
        format!("{}{}", self.session_prefix, session_id)
    }

    #[must_use]
    pub fn ticket_key(&self, ticket: &CasTicket) -> String {
        format!("{}{}", self.ticket_prefix, ticket)
    }

    /// Fetch the encoded payload of a session. `None` if absent or expired.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn find(&self, session_id: &SessionId) -> Result<Option<String>, Error> {
        let data = self.backend.get(&self.session_key(session_id)).await?;
        tracing::trace!(session_id = %session_id, found = data.is_some(), "session lookup");
        Ok(data)
    }

    /// Write a session payload and, when a ticket is given, its reverse index.
    ///
    /// Everything goes out as one atomic batch with a single expiry timestamp
    /// (`now + expire_after`, default 30 days). Returns the session id when every
    /// command was acknowledged, `None` otherwise. Commands that did apply are
    /// not rolled back.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn write(
        &self,
        session_id: &SessionId,
        data: &str,
        cas_ticket: Option<&CasTicket>,
        expire_after: Option<Duration>,
    ) -> Result<Option<SessionId>, Error> {
        let expire_at = expiry_timestamp(
            self.backend.now(),
            expire_after.unwrap_or(DEFAULT_EXPIRE_AFTER),
        );
        let session_key = self.session_key(session_id);

        let mut ops = vec![
            BatchOp::set(&session_key, data),
            BatchOp::expire_at(&session_key, expire_at),
        ];
        if let Some(ticket) = cas_ticket.filter(|t| !t.as_str().is_empty()) {
            let ticket_key = self.ticket_key(ticket);
            ops.push(BatchOp::set(&ticket_key, &session_key));
            ops.push(BatchOp::expire_at(ticket_key, expire_at));
        }

        let replies = self.backend.batch(&ops).await?;
        let acknowledged = replies.len() == ops.len()
            && ops
                .iter()
                .zip(&replies)
                .all(|(op, reply)| op.acknowledged_by(reply));

        if acknowledged {
            tracing::debug!(session_id = %session_id, expire_at, "session written");
            Ok(Some(session_id.clone()))
        } else {
            tracing::warn!(session_id = %session_id, ?replies, "session write not acknowledged");
            Ok(None)
        }
    }

    /// Delete the session a ticket points at, together with the ticket entry.
    ///
    /// Returns the number of session keys removed (0 or 1). An unknown ticket
    /// deletes nothing. A pointer outside the session namespace is never
    /// followed; only the ticket entry is dropped.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn destroy_by_ticket(&self, ticket: &CasTicket) -> Result<u64, Error> {
        let ticket_key = self.ticket_key(ticket);
        let Some(pointer) = self.backend.get(&ticket_key).await? else {
            tracing::debug!(ticket = %ticket, "destroy by unknown ticket");
            return Ok(0);
        };

        let mut ops = vec![BatchOp::del(&ticket_key)];
        if self.is_session_key(&pointer) {
            ops.push(BatchOp::del(pointer));
        } else {
            tracing::warn!(ticket = %ticket, %pointer, "ticket index points outside session namespace");
        }

        let replies = self.backend.batch(&ops).await?;
        let removed = match replies.get(1) {
            Some(BatchReply::Removed(n)) => *n,
            _ => 0,
        };
        tracing::debug!(ticket = %ticket, removed, "session destroyed by ticket");
        Ok(removed)
    }

    /// Whether [`destroy_by_ticket`](Self::destroy_by_ticket) removed exactly one session.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn destroy_session_by_ticket(&self, ticket: &CasTicket) -> Result<bool, Error> {
        Ok(self.destroy_by_ticket(ticket).await? == 1)
    }

    /// Delete the session key only. Its ticket entry, if any, is left to expire.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub async fn delete(&self, session_id: &SessionId) -> Result<u64, Error> {
        let removed = self.backend.del(&self.session_key(session_id)).await?;
        tracing::debug!(session_id = %session_id, removed, "session deleted");
        Ok(removed)
    }

    /// No-op: the backend expires keys on its own.
    pub fn prune(&self) {}

    fn is_session_key(&self, key: &str) -> bool {
        key.len() > self.session_prefix.len() && key.starts_with(self.session_prefix.as_str())
    }
}

/// Unix timestamp `expire_after` past `now`, saturating on overflow.
fn expiry_timestamp(now: i64, expire_after: Duration) -> i64 {
    now.saturating_add(i64::try_from(expire_after.as_secs()).unwrap_or(i64::MAX))
}
