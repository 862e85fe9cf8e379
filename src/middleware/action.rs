//! Per-request CAS transition table.

use std::sync::LazyLock;

use axum::http::Method;
use regex::Regex;

use super::request::CasRequest;
use crate::types::CasTicket;

static SESSION_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<samlp:SessionIndex>\s*([^<\s]+)\s*</samlp:SessionIndex>")
        .expect("valid SessionIndex pattern")
});

/// What the fake CAS server does with a request, decided once up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasAction {
    /// `/login`: bounce back with a ticket, or show the login form.
    Login,
    /// `/logged_in`: the login form was submitted.
    LoggedIn,
    /// `/logout`: end both the CAS and the local session.
    Logout,
    /// Back-channel logout from the CAS server naming a ticket.
    SingleSignOut { ticket: CasTicket },
    /// Any other path carrying a non-empty `ticket` parameter.
    TicketValidation { ticket: CasTicket },
    /// Hand the request to the application.
    PassThrough,
}

impl CasAction {
    pub(crate) fn classify(request: &CasRequest) -> Self {
        match request.path.as_str() {
            "/login" => Self::Login,
            "/logged_in" => Self::LoggedIn,
            "/logout" => Self::Logout,
            _ => {
                if request.method == Method::POST {
                    if let Some(ticket) = request.param("logoutRequest").and_then(session_index) {
                        return Self::SingleSignOut { ticket };
                    }
                }
                match request.param("ticket").filter(|t| !t.is_empty()) {
                    Some(ticket) => Self::TicketValidation {
                        ticket: CasTicket::from(ticket),
                    },
                    None => Self::PassThrough,
                }
            }
        }
    }
}

/// Ticket named by a SAML `LogoutRequest`.
fn session_index(logout_request: &str) -> Option<CasTicket> {
    SESSION_INDEX
        .captures(logout_request)
        .and_then(|c| c.get(1))
        .map(|m| CasTicket::from(m.as_str()))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::header::CONTENT_TYPE;

    use super::*;

    async fn classify(method: Method, uri: &str, form: Option<&str>) -> CasAction {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if form.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/x-www-form-urlencoded");
        }
        let request = builder
            .body(form.map_or_else(Body::empty, |f| Body::from(f.to_string())))
            .unwrap();
        let (_, cas) = CasRequest::read(request, 4096).await.unwrap();
        CasAction::classify(&cas)
    }

    fn logout_request(ticket: &str) -> String {
        let xml = format!(
            r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="LR-1" Version="2.0"><saml:NameID>@NOT_USED@</saml:NameID><samlp:SessionIndex>{ticket}</samlp:SessionIndex></samlp:LogoutRequest>"#
        );
        format!("logoutRequest={}", urlencoding::encode(&xml))
    }

    #[tokio::test]
    async fn fixed_paths() {
        assert_eq!(classify(Method::GET, "/login?service=x", None).await, CasAction::Login);
        assert_eq!(classify(Method::POST, "/logged_in", None).await, CasAction::LoggedIn);
        assert_eq!(classify(Method::GET, "/logout", None).await, CasAction::Logout);
    }

    #[tokio::test]
    async fn fixed_paths_win_over_ticket() {
        assert_eq!(classify(Method::GET, "/login?ticket=ST-1", None).await, CasAction::Login);
    }

    #[tokio::test]
    async fn ticket_on_other_path_is_validation() {
        assert_eq!(
            classify(Method::GET, "/private?ticket=abc", None).await,
            CasAction::TicketValidation {
                ticket: CasTicket::from("abc")
            }
        );
    }

    #[tokio::test]
    async fn empty_ticket_passes_through() {
        assert_eq!(classify(Method::GET, "/private?ticket=", None).await, CasAction::PassThrough);
        assert_eq!(classify(Method::GET, "/private", None).await, CasAction::PassThrough);
    }

    #[tokio::test]
    async fn only_exact_paths_are_cas_endpoints() {
        assert_eq!(classify(Method::GET, "/login/help", None).await, CasAction::PassThrough);
        assert_eq!(classify(Method::GET, "/app/logout", None).await, CasAction::PassThrough);
    }

    #[tokio::test]
    async fn posted_logout_request_is_single_sign_out() {
        let form = logout_request("ST-42");
        assert_eq!(
            classify(Method::POST, "/", Some(&form)).await,
            CasAction::SingleSignOut {
                ticket: CasTicket::from("ST-42")
            }
        );
    }

    #[tokio::test]
    async fn logout_request_without_session_index_passes_through() {
        assert_eq!(
            classify(Method::POST, "/", Some("logoutRequest=%3Cnothing%2F%3E")).await,
            CasAction::PassThrough
        );
    }

    #[tokio::test]
    async fn logout_request_by_get_is_ignored() {
        let query = logout_request("ST-42");
        assert_eq!(
            classify(Method::GET, &format!("/?{query}"), None).await,
            CasAction::PassThrough
        );
    }

    #[test]
    fn session_index_tolerates_whitespace() {
        let xml = "<samlp:SessionIndex>\n  ST-7-abc \n</samlp:SessionIndex>";
        assert_eq!(session_index(xml), Some(CasTicket::from("ST-7-abc")));
    }
}
