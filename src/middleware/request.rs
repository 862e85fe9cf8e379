//! The view of an inbound request the CAS state machine works from.

use axum::body::{Body, HttpBody, to_bytes};
use axum::extract::{OriginalUri, Request};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use url::form_urlencoded;

use super::error::CasError;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Path, parameters and location of a request, relative to where the
/// protected router is mounted.
#[derive(Debug, Clone)]
pub(crate) struct CasRequest {
    pub(crate) method: Method,
    /// Path within the mount point.
    pub(crate) path: String,
    /// Mount prefix stripped by the outer router (empty at the root).
    pub(crate) script_name: String,
    /// `scheme://host[:port]`.
    pub(crate) base_url: String,
    query: Option<String>,
    /// Query parameters followed by form body parameters.
    params: Vec<(String, String)>,
    pub(crate) ajax: bool,
}

impl CasRequest {
    /// Collect request details, buffering a form body so its fields become
    /// parameters. The returned request carries the same body.
    ///
    /// Only form bodies whose size is known to fit `body_limit` are buffered.
    /// Larger or unsized bodies reach the application untouched and
    /// contribute no parameters.
    pub(crate) async fn read(request: Request, body_limit: usize) -> Result<(Request, Self), CasError> {
        let (parts, body) = request.into_parts();
        let mut params = parse_pairs(parts.uri.query().unwrap_or_default().as_bytes());

        let form_post = parts.method == Method::POST && is_form(&parts.headers);
        let buffer = form_post && fits_limit(&body, body_limit);
        if form_post && !buffer {
            tracing::debug!(
                path = %parts.uri.path(),
                size_hint = ?body.size_hint().upper(),
                "form body not inspected"
            );
        }

        let body = if buffer {
            let bytes = to_bytes(body, body_limit)
                .await
                .map_err(|e| CasError::BadRequest(format!("unreadable form body: {e}")))?;
            params.extend(parse_pairs(&bytes));
            Body::from(bytes)
        } else {
            body
        };

        let cas_request = Self::from_parts(&parts, params);
        Ok((Request::from_parts(parts, body), cas_request))
    }

    fn from_parts(parts: &Parts, params: Vec<(String, String)>) -> Self {
        let path = parts.uri.path().to_string();
        let script_name = parts
            .extensions
            .get::<OriginalUri>()
            .and_then(|original| mount_prefix(original.path(), &path))
            .unwrap_or_default();

        Self {
            method: parts.method.clone(),
            script_name,
            base_url: base_url(parts),
            query: parts.uri.query().map(str::to_string),
            params,
            ajax: is_ajax(&parts.headers),
            path,
        }
    }

    /// First value of a query or form parameter.
    pub(crate) fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Absolute URL of this request, including its query string.
    pub(crate) fn url(&self) -> String {
        let mut url = format!("{}{}{}", self.base_url, self.script_name, self.path);
        if let Some(query) = self.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Absolute URL of this request with every `name` query parameter removed.
    pub(crate) fn url_without(&self, name: &str) -> String {
        let mut url = format!("{}{}{}", self.base_url, self.script_name, self.path);
        let remaining = parse_pairs(self.query.as_deref().unwrap_or_default().as_bytes())
            .into_iter()
            .filter(|(key, _)| key != name)
            .fold(form_urlencoded::Serializer::new(String::new()), |mut s, (k, v)| {
                s.append_pair(&k, &v);
                s
            })
            .finish();
        if !remaining.is_empty() {
            url.push('?');
            url.push_str(&remaining);
        }
        url
    }
}

/// Prefix the outer router stripped from `original` to leave `inner`.
///
/// A request for the mount point itself (`/app`) reaches the nested router
/// as `/`, which is not a suffix of the original path.
fn mount_prefix(original: &str, inner: &str) -> Option<String> {
    original
        .strip_suffix(inner)
        .or_else(|| (inner == "/").then(|| original.trim_end_matches('/')))
        .map(str::to_string)
}

fn fits_limit(body: &Body, limit: usize) -> bool {
    body.size_hint()
        .upper()
        .is_some_and(|upper| upper <= limit as u64)
}

fn parse_pairs(input: &[u8]) -> Vec<(String, String)> {
    form_urlencoded::parse(input).into_owned().collect()
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with(FORM_CONTENT_TYPE))
}

fn is_ajax(headers: &HeaderMap) -> bool {
    headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
}

fn base_url(parts: &Parts) -> String {
    let scheme = parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| parts.uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".into());

    let host = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
        .unwrap_or_else(|| "localhost".into());

    format!("{scheme}://{host}")
}
