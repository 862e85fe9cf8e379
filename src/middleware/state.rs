use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use super::config::CasSettings;
use super::upstream::UpstreamSession;
use crate::store::{KvBackend, SessionStore};

/// Shared state for the CAS middleware.
pub(super) struct CasState<B> {
    pub(super) store: Arc<SessionStore<B>>,
    pub(super) upstream: UpstreamSession,
    pub(super) settings: Arc<CasSettings>,
}

// Manual Clone: avoid derive adding a `B: Clone` bound.
impl<B> Clone for CasState<B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            upstream: self.upstream.clone(),
            settings: self.settings.clone(),
        }
    }
}

// PrivateCookieJar requires Key to be extractable from state
impl<B: KvBackend> FromRef<CasState<B>> for Key {
    fn from_ref(state: &CasState<B>) -> Self {
        state.settings.cookie_key.clone()
    }
}
