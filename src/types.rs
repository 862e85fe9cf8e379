use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use derive_more::{Display, From, Into};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Open-ended session payload.
///
/// Applications may store any JSON object; the CAS layer only owns the `cas` key.
pub type SessionData = serde_json::Map<String, serde_json::Value>;

/// Opaque session identifier carried in the session cookie.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generates a fresh random session id.
    ///
    /// 32 random bytes, base64url without padding (43 characters).
    #[must_use]
    pub fn generate() -> Self {
        let random_bytes: [u8; 32] = rand::rng().random();
        Self(URL_SAFE_NO_PAD.encode(random_bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Service ticket issued by the CAS server after a successful login.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct CasTicket(pub String);

impl CasTicket {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CasTicket {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_session_id_length() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), 43);
    }

    #[test]
    fn generated_session_id_url_safe() {
        let id = SessionId::generate();
        assert!(
            id.as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "session id should be URL-safe: {id}"
        );
    }

    #[test]
    fn generated_session_ids_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn session_id_serde_transparent() {
        let id = SessionId::from("sess-abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sess-abc\"");
        let parsed: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn newtypes_prevent_mixing() {
        fn takes_session_id(_: &SessionId) {}
        fn takes_ticket(_: &CasTicket) {}

        let session = SessionId::from("id");
        let ticket = CasTicket::from("id");

        takes_session_id(&session);
        takes_ticket(&ticket);
        assert_eq!(session.to_string(), ticket.to_string());
    }
}
