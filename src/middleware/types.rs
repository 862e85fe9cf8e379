use serde::{Deserialize, Serialize};

use crate::types::SessionData;

/// Session key the CAS layer owns.
pub(crate) const CAS_KEY: &str = "cas";

/// Authenticated principal stored under the `cas` key of the session.
///
/// Written by the ticket validation step. `ticket` is the service ticket that
/// established the session; committing the session indexes it so single
/// sign-out can find the session again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
    pub user: String,
    #[serde(default)]
    pub extra_attributes: SessionData,
}
