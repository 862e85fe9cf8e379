//! Per-request session handle and its load/commit cycle against the store.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;

use super::types::{CAS_KEY, CasData};
use crate::codec;
use crate::error::Error;
use crate::store::{KvBackend, SessionStore};
use crate::types::{CasTicket, SessionData, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Untouched,
    Modified,
    Destroyed,
}

#[derive(Debug)]
struct Inner {
    id: SessionId,
    data: SessionData,
    status: Status,
}

/// The current request's session.
///
/// Inserted into request extensions for in-scope requests; extract it in
/// handlers with `Session` or `Option<Session>`. Mutations are persisted once
/// the response has been produced.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Mutex<Inner>>,
}

impl Session {
    fn with(id: SessionId, data: SessionData) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                id,
                data,
                status: Status::Untouched,
            })),
        }
    }

    pub(crate) fn fresh() -> Self {
        Self::with(SessionId::generate(), SessionData::new())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.lock().id.clone()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().data.get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        let mut inner = self.lock();
        inner.data.insert(key.into(), value);
        inner.status = Status::Modified;
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut inner = self.lock();
        let removed = inner.data.remove(key);
        if removed.is_some() {
            inner.status = Status::Modified;
        }
        removed
    }

    /// Snapshot of the whole payload.
    #[must_use]
    pub fn data(&self) -> SessionData {
        self.lock().data.clone()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().data.is_empty()
    }

    /// Empty the payload but keep the session.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.data.clear();
        inner.status = Status::Modified;
    }

    /// Empty the payload and delete the stored session on commit.
    pub fn destroy(&self) {
        let mut inner = self.lock();
        inner.data.clear();
        inner.status = Status::Destroyed;
    }

    /// The authenticated CAS principal, if any.
    #[must_use]
    pub fn cas(&self) -> Option<CasData> {
        let value = self.get(CAS_KEY)?;
        serde_json::from_value(value).ok()
    }

    pub(crate) fn set_cas(&self, cas: &CasData) {
        match serde_json::to_value(cas) {
            Ok(value) => self.insert(CAS_KEY, value),
            Err(e) => tracing::error!(error = %e, "CAS data not serializable"),
        }
    }
}

/// What [`commit`] did with the session.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Commit {
    /// Nothing changed; nothing written.
    Unchanged,
    /// Payload (and ticket index) durably written.
    Written(SessionId),
    /// The store did not acknowledge the write.
    Dropped,
    /// Session deleted from the store.
    Destroyed,
}

/// Load the session named by the cookie value.
///
/// A missing, unknown or expired id yields a fresh session with a new id, so a
/// client can never pick the id of a session it does not hold. An undecodable
/// payload is discarded the same way.
pub(crate) async fn load<B: KvBackend>(
    store: &SessionStore<B>,
    cookie_value: Option<&str>,
) -> Result<Session, Error> {
    let Some(raw) = cookie_value.filter(|v| !v.is_empty()) else {
        return Ok(Session::fresh());
    };
    let id = SessionId::from(raw);

    let Some(encoded) = store.find(&id).await? else {
        tracing::debug!(session_id = %id, "session not found, issuing a new id");
        return Ok(Session::fresh());
    };

    match codec::decode(Some(&encoded)) {
        Ok(data) => Ok(Session::with(id, data.unwrap_or_default())),
        Err(e) => {
            tracing::warn!(session_id = %id, error = %e, "discarding undecodable session");
            Ok(Session::fresh())
        }
    }
}

/// Persist whatever happened to the session during the request.
pub(crate) async fn commit<B: KvBackend>(
    store: &SessionStore<B>,
    session: &Session,
    expire_after: Duration,
) -> Result<Commit, Error> {
    let (id, data, status) = {
        let inner = session.lock();
        (inner.id.clone(), inner.data.clone(), inner.status)
    };

    match status {
        Status::Untouched => Ok(Commit::Unchanged),
        Status::Destroyed => {
            store.delete(&id).await?;
            Ok(Commit::Destroyed)
        }
        Status::Modified => {
            let Some(encoded) = codec::encode(Some(&data))? else {
                return Ok(Commit::Unchanged);
            };
            let ticket = session
                .cas()
                .and_then(|cas| cas.ticket)
                .map(CasTicket::from);

            match store
                .write(&id, &encoded, ticket.as_ref(), Some(expire_after))
                .await?
            {
                Some(written) => Ok(Commit::Written(written)),
                None => {
                    tracing::warn!(session_id = %id, "session write failed, content dropped");
                    Ok(Commit::Dropped)
                }
            }
        }
    }
}
