use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};

/// Errors surfaced by the CAS middleware layer.
#[derive(Debug, thiserror::Error)]
pub enum CasError {
    /// No authenticated CAS principal in the session.
    #[error("Authorization Required")]
    Unauthenticated,

    /// Malformed CAS request (missing `service`, oversized body, ...).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Session store operation failed.
    #[error("Session store error: {0}")]
    Store(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for CasError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                [(CONTENT_TYPE, "text/plain")],
                self.to_string(),
            )
                .into_response(),
            Self::BadRequest(_) => {
                tracing::debug!(error = %self, "Rejected CAS request");
                (
                    StatusCode::BAD_REQUEST,
                    [(CONTENT_TYPE, "text/plain")],
                    self.to_string(),
                )
                    .into_response()
            }
            Self::Store(_) | Self::Config(_) => {
                tracing::error!(error = %self, "CAS internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl From<crate::error::Error> for CasError {
    fn from(e: crate::error::Error) -> Self {
        match e {
            crate::error::Error::Config(msg) => Self::Config(msg),
            other => Self::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    async fn body_of(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn unauthenticated_is_401() {
        let response = CasError::Unauthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_of(response).await, "Authorization Required");
    }

    #[tokio::test]
    async fn store_error_hides_detail() {
        let response = CasError::Store("connection refused to 10.0.0.7:6379".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_of(response).await, "Internal error");
    }

    #[test]
    fn backend_errors_map_to_store() {
        let err = CasError::from(crate::error::Error::Backend("down".into()));
        assert!(matches!(err, CasError::Store(_)));
        let err = CasError::from(crate::error::Error::Config("bad".into()));
        assert!(matches!(err, CasError::Config(_)));
    }
}
