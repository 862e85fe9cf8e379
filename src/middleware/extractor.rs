use std::convert::Infallible;

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;

use super::error::CasError;
use super::session::Session;
use super::types::CasData;
use crate::types::SessionData;

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = CasError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or(CasError::Unauthenticated)
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<Session>().cloned())
    }
}

/// Authenticated CAS user extracted from the session.
///
/// Rejects with `401 Unauthorized` when the session holds no CAS principal.
/// On a [`protect`](super::protect)ed router that 401 is turned into a
/// redirect to the CAS login page.
///
/// # Example
///
/// ```rust,ignore
/// async fn private(user: CasUser) -> impl IntoResponse {
///     format!("Hello, {}", user.user)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CasUser {
    pub user: String,
    pub extra_attributes: SessionData,
    /// Service ticket that established the session.
    pub ticket: Option<String>,
}

impl From<CasData> for CasUser {
    fn from(cas: CasData) -> Self {
        Self {
            user: cas.user,
            extra_attributes: cas.extra_attributes,
            ticket: cas.ticket,
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CasUser {
    type Rejection = CasError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = <Session as FromRequestParts<S>>::from_request_parts(parts, state).await?;
        session
            .cas()
            .map(CasUser::from)
            .ok_or(CasError::Unauthenticated)
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for CasUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Session>()
            .and_then(Session::cas)
            .map(CasUser::from))
    }
}
