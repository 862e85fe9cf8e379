use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

/// Create session cookie. Lives as long as the stored session.
pub(super) fn session_cookie(
    name: &str,
    session_id: &str,
    ttl: std::time::Duration,
    secure: bool,
) -> Cookie<'static> {
    let max_age = Duration::try_from(ttl).unwrap_or(Duration::MAX);
    Cookie::build((name.to_string(), session_id.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(max_age)
        .build()
}

/// Create removal cookie for session.
pub(super) fn clear_session_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), ""))
        .path("/".to_string())
        .max_age(Duration::ZERO)
        .build()
}
