use std::collections::HashMap;
use std::time::Duration;

use axum_extra::extract::cookie::Key;

use super::error::CasError;
use crate::classifier::ExcludeRule;
use crate::store::DEFAULT_EXPIRE_AFTER;
use crate::types::SessionData;

/// Shared CAS settings used by both config and runtime state.
#[derive(Clone)]
pub(crate) struct CasSettings {
    pub(crate) exclude_paths: Option<ExcludeRule>,
    pub(crate) expire_after: Duration,
    pub(crate) attributes_config: HashMap<String, SessionData>,
    pub(crate) cookie_key: Key,
    pub(crate) session_cookie_name: String,
    pub(crate) secure_cookies: bool,
    pub(crate) fake_username: String,
    pub(crate) body_limit: usize,
}

impl CasSettings {
    fn defaults() -> Self {
        Self {
            exclude_paths: None,
            expire_after: DEFAULT_EXPIRE_AFTER,
            attributes_config: HashMap::new(),
            cookie_key: Key::generate(),
            session_cookie_name: "cas_session".into(),
            secure_cookies: true,
            fake_username: "fake-username".into(),
            body_limit: 64 * 1024,
        }
    }
}

/// CAS middleware configuration.
///
/// Use [`from_env()`](CasConfig::from_env) for convention-based setup,
/// or [`new()`](CasConfig::new) with `with_*` methods for full control.
#[derive(Clone)]
pub struct CasConfig {
    pub(super) settings: CasSettings,
}

impl Default for CasConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CasConfig {
    /// Create config with defaults: nothing excluded, 30-day sessions, secure cookies.
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: CasSettings::defaults(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `CAS_EXCLUDE_PATHS`: comma-separated path prefixes; `re:` marks a regex
    /// - `CAS_EXPIRE_AFTER_SECS`: session lifetime in seconds
    /// - `CAS_ATTRIBUTES`: JSON object mapping principal email to extra attributes
    /// - `CAS_SESSION_COOKIE`: session cookie name
    /// - `CAS_INSECURE_COOKIES`: `"1"` or `"true"` to drop the `Secure` flag (local HTTP)
    /// - `COOKIE_KEY`: cookie encryption key bytes
    ///
    /// # Errors
    ///
    /// Returns [`CasError::Config`] if a variable is set but invalid.
    pub fn from_env() -> Result<Self, CasError> {
        let mut config = Self::new();

        if let Ok(list) = std::env::var("CAS_EXCLUDE_PATHS") {
            config = config.with_exclude_paths(ExcludeRule::parse_list(&list)?);
        }
        if let Ok(secs) = std::env::var("CAS_EXPIRE_AFTER_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| CasError::Config(format!("CAS_EXPIRE_AFTER_SECS: {e}")))?;
            config = config.with_expire_after(Duration::from_secs(secs));
        }
        if let Ok(json) = std::env::var("CAS_ATTRIBUTES") {
            let attributes: HashMap<String, SessionData> = serde_json::from_str(&json)
                .map_err(|e| CasError::Config(format!("CAS_ATTRIBUTES: {e}")))?;
            config = config.with_attributes_config(attributes);
        }
        if let Ok(name) = std::env::var("CAS_SESSION_COOKIE") {
            config = config.with_session_cookie_name(name);
        }

        let insecure = matches!(
            std::env::var("CAS_INSECURE_COOKIES").as_deref(),
            Ok("1") | Ok("true"),
        );
        config = config.with_secure_cookies(!insecure);

        if let Ok(k) = std::env::var("COOKIE_KEY") {
            let key = Key::try_from(k.as_bytes()).map_err(|_| {
                CasError::Config(
                    "COOKIE_KEY is set but invalid (must be at least 64 bytes). \
                     Remove the env var to use an ephemeral key, or provide a valid key."
                        .into(),
                )
            })?;
            config = config.with_cookie_key(key);
        }

        Ok(config)
    }

    /// Paths that skip CAS handling (and session loading) entirely.
    #[must_use]
    pub fn with_exclude_paths(mut self, rule: impl Into<ExcludeRule>) -> Self {
        self.settings.exclude_paths = Some(rule.into());
        self
    }

    #[must_use]
    pub fn with_expire_after(mut self, expire_after: Duration) -> Self {
        self.settings.expire_after = expire_after;
        self
    }

    /// Extra attributes per principal email, copied into the session on ticket validation.
    #[must_use]
    pub fn with_attributes_config(mut self, attributes: HashMap<String, SessionData>) -> Self {
        self.settings.attributes_config = attributes;
        self
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.session_cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    /// Username the fake CAS server reports for every validated ticket.
    #[must_use]
    pub fn with_fake_username(mut self, username: impl Into<String>) -> Self {
        self.settings.fake_username = username.into();
        self
    }

    /// Largest form body read when looking for CAS parameters.
    #[must_use]
    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.settings.body_limit = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CasConfig::new();
        assert!(config.settings.exclude_paths.is_none());
        assert_eq!(config.settings.expire_after, DEFAULT_EXPIRE_AFTER);
        assert_eq!(config.settings.session_cookie_name, "cas_session");
        assert_eq!(config.settings.fake_username, "fake-username");
        assert!(config.settings.secure_cookies);
    }

    #[test]
    fn builder_overrides() {
        let config = CasConfig::new()
            .with_exclude_paths("/public")
            .with_expire_after(Duration::from_secs(60))
            .with_session_cookie_name("sid")
            .with_secure_cookies(false)
            .with_fake_username("jdoe");

        let rule = config.settings.exclude_paths.as_ref().unwrap();
        assert!(rule.matches("/public/x"));
        assert_eq!(config.settings.expire_after, Duration::from_secs(60));
        assert_eq!(config.settings.session_cookie_name, "sid");
        assert!(!config.settings.secure_cookies);
        assert_eq!(config.settings.fake_username, "jdoe");
    }
}
