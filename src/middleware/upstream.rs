use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Principal used when a CAS session is mocked without an explicit email.
pub const DEFAULT_EMAIL: &str = "email@example.com";

/// Identity the fake CAS server believes is logged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasPrincipal {
    pub email: String,
}

/// Whether a CAS-side session is established, as seen by the fake CAS server.
///
/// Stands in for the single-sign-on cookie a real CAS server would hold. One
/// handle is shared by every request a [`protect`](super::protect)ed router
/// serves; clones share state. Create a fresh handle per test, or call
/// [`unmock`](Self::unmock) between tests that share one.
#[derive(Debug, Clone, Default)]
pub struct UpstreamSession {
    principal: Arc<Mutex<Option<CasPrincipal>>>,
}

impl UpstreamSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<CasPrincipal>> {
        self.principal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pretend `email` has logged in at the CAS server.
    pub fn mock(&self, email: impl Into<String>) {
        self.establish(CasPrincipal {
            email: email.into(),
        });
    }

    /// Pretend [`DEFAULT_EMAIL`] has logged in at the CAS server.
    pub fn mock_default(&self) {
        self.mock(DEFAULT_EMAIL);
    }

    /// Forget any CAS-side session.
    pub fn unmock(&self) {
        *self.lock() = None;
    }

    pub(crate) fn establish(&self, principal: CasPrincipal) {
        *self.lock() = Some(principal);
    }

    #[must_use]
    pub fn current(&self) -> Option<CasPrincipal> {
        self.lock().clone()
    }

    #[must_use]
    pub fn is_established(&self) -> bool {
        self.lock().is_some()
    }
}
