use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{Html, IntoResponse, Response};
use axum_extra::extract::PrivateCookieJar;
use url::Url;

use super::action::CasAction;
use super::config::CasConfig;
use super::cookies;
use super::error::CasError;
use super::request::CasRequest;
use super::session::{self, Commit, Session};
use super::state::CasState;
use super::types::CasData;
use super::upstream::{CasPrincipal, DEFAULT_EMAIL, UpstreamSession};
use crate::classifier;
use crate::store::{KvBackend, SessionStore};
use crate::types::CasTicket;

/// Ticket the fake CAS server hands out on every login.
pub const FAKE_TICKET: &str = "some-value";

const REDIRECT_BODY: &str = "Redirecting you...";

/// Wrap `app` with the fake CAS server and CAS-backed sessions.
///
/// Requests to excluded paths reach `app` untouched. Every other request gets
/// a [`Session`] in its extensions; a `401` from `app` sends the browser to the
/// login page.
///
/// # Example
///
/// ```rust,ignore
/// let store = SessionStore::new(RedisBackend::connect(&RedisConfig::from_env()?).await?);
/// let app = protect(app, CasConfig::from_env()?, store, UpstreamSession::new());
/// ```
pub fn protect<B: KvBackend>(
    app: Router,
    config: CasConfig,
    store: SessionStore<B>,
    upstream: UpstreamSession,
) -> Router {
    let state = CasState {
        store: Arc::new(store),
        upstream,
        settings: Arc::new(config.settings),
    };

    app.layer(from_fn_with_state(state, cas_middleware::<B>))
}

async fn cas_middleware<B: KvBackend>(
    State(state): State<CasState<B>>,
    jar: PrivateCookieJar,
    request: Request,
    next: Next,
) -> Response {
    if !classifier::in_scope(request.uri().path(), state.settings.exclude_paths.as_ref()) {
        return next.run(request).await;
    }

    let (request, cas_request) = match CasRequest::read(request, state.settings.body_limit).await {
        Ok(read) => read,
        Err(e) => return e.into_response(),
    };

    let cookie_name = &state.settings.session_cookie_name;
    let cookie_value = jar.get(cookie_name).map(|c| c.value().to_string());
    let session = match session::load(&state.store, cookie_value.as_deref()).await {
        Ok(session) => session,
        Err(e) => return CasError::from(e).into_response(),
    };

    let action = CasAction::classify(&cas_request);
    tracing::debug!(path = %cas_request.path, ?action, "CAS request");

    let response = match action {
        CasAction::Login => login(&state, &cas_request),
        CasAction::LoggedIn => logged_in(&state, &cas_request),
        CasAction::Logout => logout(&state, &cas_request, &session),
        CasAction::SingleSignOut { ticket } => single_sign_out(&state, &ticket).await,
        CasAction::TicketValidation { ticket } => {
            validate_ticket(&state, &cas_request, &session, ticket)
        }
        CasAction::PassThrough => pass_through(&cas_request, &session, request, next).await,
    };

    match session::commit(&state.store, &session, state.settings.expire_after).await {
        Ok(Commit::Written(id)) => {
            let cookie = cookies::session_cookie(
                cookie_name,
                id.as_str(),
                state.settings.expire_after,
                state.settings.secure_cookies,
            );
            (jar.add(cookie), response).into_response()
        }
        Ok(Commit::Destroyed) => {
            (jar.remove(cookies::clear_session_cookie(cookie_name)), response).into_response()
        }
        Ok(Commit::Unchanged | Commit::Dropped) => response,
        Err(e) => CasError::from(e).into_response(),
    }
}

// ── Login ──────────────────────────────────────────────────────────

fn login<B>(state: &CasState<B>, request: &CasRequest) -> Response {
    let service = request.param("service");

    if state.upstream.is_established() {
        let Some(service) = service else {
            return CasError::BadRequest("missing service parameter".into()).into_response();
        };
        return redirect_to(&append_ticket(service, FAKE_TICKET));
    }

    if request.ajax {
        // AJAX clients cannot follow an interactive login page.
        return render_status(StatusCode::UNAUTHORIZED);
    }

    Html(login_page(&request.script_name, service.unwrap_or_default())).into_response()
}

fn logged_in<B>(state: &CasState<B>, request: &CasRequest) -> Response {
    let Some(service) = request.param("service") else {
        return CasError::BadRequest("missing service parameter".into()).into_response();
    };
    let email = request
        .param("email")
        .filter(|e| !e.is_empty())
        .unwrap_or(DEFAULT_EMAIL);

    state.upstream.establish(CasPrincipal {
        email: email.to_string(),
    });
    tracing::info!(email = %email, "CAS session established");

    redirect_to(service)
}

// ── Logout ─────────────────────────────────────────────────────────

fn logout<B>(state: &CasState<B>, request: &CasRequest, session: &Session) -> Response {
    state.upstream.unmock();
    session.destroy();
    tracing::info!(session_id = %session.id(), "CAS logout");

    redirect_to(&format!("{}/", request.script_name))
}

async fn single_sign_out<B: KvBackend>(state: &CasState<B>, ticket: &CasTicket) -> Response {
    match state.store.destroy_session_by_ticket(ticket).await {
        Ok(destroyed) => {
            tracing::info!(ticket = %ticket, destroyed, "CAS single sign-out");
            StatusCode::OK.into_response()
        }
        Err(e) => CasError::from(e).into_response(),
    }
}

// ── Ticket validation ──────────────────────────────────────────────

fn validate_ticket<B>(
    state: &CasState<B>,
    request: &CasRequest,
    session: &Session,
    ticket: CasTicket,
) -> Response {
    // The fake server accepts any non-empty ticket.
    let extra_attributes = state
        .upstream
        .current()
        .and_then(|principal| state.settings.attributes_config.get(&principal.email).cloned())
        .unwrap_or_default();

    session.set_cas(&CasData {
        ticket: Some(ticket.to_string()),
        user: state.settings.fake_username.clone(),
        extra_attributes,
    });
    tracing::info!(ticket = %ticket, session_id = %session.id(), "CAS ticket validated");

    redirect_to(&request.url_without("ticket"))
}

// ── Pass-through ───────────────────────────────────────────────────

async fn pass_through(
    cas_request: &CasRequest,
    session: &Session,
    mut request: Request,
    next: Next,
) -> Response {
    request.extensions_mut().insert(session.clone());
    let response = next.run(request).await;

    if response.status() == StatusCode::UNAUTHORIZED {
        let service = urlencoding::encode(&cas_request.url()).into_owned();
        return redirect_to(&format!(
            "{}{}/login?service={service}",
            cas_request.base_url, cas_request.script_name
        ));
    }
    response
}

// ── Helpers ────────────────────────────────────────────────────────

/// Append `ticket` to `service`, after any query parameters it already has.
fn append_ticket(service: &str, ticket: &str) -> String {
    match Url::parse(service) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("ticket", ticket);
            url.into()
        }
        Err(_) => {
            let separator = if service.contains('?') { '&' } else { '?' };
            format!("{service}{separator}ticket={}", urlencoding::encode(ticket))
        }
    }
}

fn redirect_to(url: &str) -> Response {
    (
        StatusCode::FOUND,
        [(LOCATION, url), (CONTENT_TYPE, "text/plain")],
        REDIRECT_BODY,
    )
        .into_response()
}

fn render_status(status: StatusCode) -> Response {
    (status, [(CONTENT_TYPE, "text/plain")]).into_response()
}

fn login_page(script_name: &str, service: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8"/>
    <title>Fake CAS</title>
  </head>
  <body>
    <form action="{action}/logged_in" method="post">
      <input type="hidden" name="service" value="{service}"/>
      <label for="email">Email</label>
      <input id="email" name="email" type="text"/>
      <label for="password">Password</label>
      <input id="password" name="password" type="password"/>
      <input type="submit" value="Login"/>
    </form>
  </body>
</html>
"#,
        action = html_escape(script_name),
        service = html_escape(service),
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_ticket_without_query() {
        assert_eq!(
            append_ticket("http://example.org/private", "some-value"),
            "http://example.org/private?ticket=some-value"
        );
    }

    #[test]
    fn append_ticket_after_existing_params() {
        assert_eq!(
            append_ticket("http://h/private?a=1", "some-value"),
            "http://h/private?a=1&ticket=some-value"
        );
    }

    #[test]
    fn append_ticket_keeps_fragment_last() {
        assert_eq!(
            append_ticket("http://h/p?a=1#top", "t"),
            "http://h/p?a=1&ticket=t#top"
        );
    }

    #[test]
    fn append_ticket_to_relative_service() {
        assert_eq!(append_ticket("/private", "t"), "/private?ticket=t");
        assert_eq!(append_ticket("/private?a=1", "t"), "/private?a=1&ticket=t");
    }

    #[test]
    fn login_page_escapes_service() {
        let page = login_page("/app", r#"http://h/"><script>"#);
        assert!(page.contains(r#"action="/app/logged_in""#));
        assert!(page.contains("value=\"http://h/&quot;&gt;&lt;script&gt;\""));
        assert!(page.contains("email"));
        assert!(page.contains("password"));
    }
}
