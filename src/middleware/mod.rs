//! Plug-and-play CAS single sign-on for Axum.
//!
//! [`protect`] wraps an application router with a fake CAS server and
//! store-backed sessions. The fake server speaks the browser side of the CAS
//! protocol (`/login`, `/logged_in`, `/logout`, ticket validation and
//! back-channel single sign-out) so applications can be developed and tested
//! without a real CAS deployment.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use cas_session::middleware::{CasConfig, CasUser, UpstreamSession, protect};
//! use cas_session::store::{MemoryBackend, SessionStore};
//!
//! async fn private(user: CasUser) -> String {
//!     format!("Hello, {}", user.user)
//! }
//!
//! let app = axum::Router::new().route("/private", axum::routing::get(private));
//! let app = protect(
//!     app,
//!     CasConfig::from_env()?,
//!     SessionStore::new(MemoryBackend::new()),
//!     UpstreamSession::new(),
//! );
//! ```

mod action;
mod config;
mod cookies;
mod error;
mod extractor;
mod request;
mod routes;
mod session;
mod state;
mod types;
mod upstream;

pub use action::CasAction;
pub use config::CasConfig;
pub use error::CasError;
pub use extractor::CasUser;
pub use routes::{FAKE_TICKET, protect};
pub use session::Session;
pub use types::CasData;
pub use upstream::{CasPrincipal, DEFAULT_EMAIL, UpstreamSession};

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
