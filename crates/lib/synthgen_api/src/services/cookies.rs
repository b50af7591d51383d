//! Cookie service: set and clear the httpOnly session cookies.

use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

/// Cookie name for the access token.
pub const ACCESS_COOKIE: &str = "sg_access";
/// Cookie name for the refresh token.
pub const REFRESH_COOKIE: &str = "sg_refresh";

fn session_cookie(name: &'static str, value: String, max_age: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age)
        .build()
}

/// Access token cookie living as long as the token.
pub fn access_cookie(token: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    session_cookie(ACCESS_COOKIE, token.to_string(), Duration::seconds(max_age_secs), secure)
}

/// Refresh token cookie living as long as the token.
pub fn refresh_cookie(token: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    session_cookie(REFRESH_COOKIE, token.to_string(), Duration::seconds(max_age_secs), secure)
}

/// Expired cookies that make the browser drop both tokens.
pub fn clear_cookies(secure: bool) -> [Cookie<'static>; 2] {
    [
        session_cookie(ACCESS_COOKIE, String::new(), Duration::ZERO, secure),
        session_cookie(REFRESH_COOKIE, String::new(), Duration::ZERO, secure),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookies_are_http_only_and_scoped() {
        let c = access_cookie("tok", 900, true);
        assert_eq!(c.name(), ACCESS_COOKIE);
        assert_eq!(c.http_only(), Some(true));
        assert_eq!(c.secure(), Some(true));
        assert_eq!(c.path(), Some("/"));
        assert_eq!(c.max_age(), Some(Duration::seconds(900)));
    }

    #[test]
    fn cleared_cookies_expire_immediately() {
        for c in clear_cookies(false) {
            assert_eq!(c.value(), "");
            assert_eq!(c.max_age(), Some(Duration::ZERO));
        }
    }
}
