//! Session payload codec.
//!
//! Payloads are serialized to JSON and wrapped in standard base64 so they can
//! be stored as a single string value in any backend.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::Error;
use crate::types::SessionData;

/// Encodes a session payload. `None` encodes to `None`.
///
/// # Errors
///
/// Returns [`Error::Codec`] if the payload cannot be serialized.
pub fn encode(data: Option<&SessionData>) -> Result<Option<String>, Error> {
    let Some(data) = data else {
        return Ok(None);
    };
    let json = serde_json::to_vec(data).map_err(|e| Error::Codec(e.to_string()))?;
    Ok(Some(STANDARD.encode(json)))
}

/// Decodes a payload produced by [`encode`]. `None` decodes to `None`.
///
/// # Errors
///
/// Returns [`Error::Codec`] if the input is not valid base64 or does not hold
/// a JSON object.
pub fn decode(raw: Option<&str>) -> Result<Option<SessionData>, Error> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let bytes = STANDARD
        .decode(raw.trim())
        .map_err(|e| Error::Codec(format!("invalid base64: {e}")))?;
    let data = serde_json::from_slice::<SessionData>(&bytes)
        .map_err(|e| Error::Codec(format!("invalid payload: {e}")))?;
    Ok(Some(data))
}
