//! Cookie header helpers.
//!
//! Values are percent-encoded on the way out and decoded on the way in, so
//! any string can be stored.

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};

use crate::error::AppError;

/// Session ID cookie.
pub const SESSION_COOKIE: &str = "privbeta_session";

/// Signed invitation code cookie, set by `/beta/verify/{code}`.
pub const CODE_COOKIE: &str = "privbeta_code";

/// Read a cookie from the request's `Cookie` headers.
#[must_use]
pub fn read(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .and_then(|(_, v)| urlencoding::decode(v).ok())
        .map(std::borrow::Cow::into_owned)
        .filter(|v| !v.is_empty())
}

/// `Set-Cookie` value that stores `value`. Without `max_age` the cookie
/// lasts for the browser session.
///
/// # Errors
///
/// Returns [`AppError::Internal`] if the header value is malformed.
pub fn set(
    name: &str,
    value: &str,
    max_age: Option<i64>,
    secure: bool,
) -> Result<HeaderValue, AppError> {
    let mut cookie = format!(
        "{name}={}; Path=/; HttpOnly; SameSite=Lax",
        urlencoding::encode(value)
    );
    if let Some(secs) = max_age {
        cookie.push_str(&format!("; Max-Age={secs}"));
    }
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
        .map_err(|e| AppError::Internal(format!("invalid Set-Cookie header: {e}")))
}

/// `Set-Cookie` value that removes the cookie from the client.
#[must_use]
pub fn removal(name: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"))
        .unwrap_or_else(|_| HeaderValue::from_static("privbeta=; Path=/; Max-Age=0"))
}

/// Whether the response already sets (or removes) the cookie.
#[must_use]
pub fn is_set(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split_once('=').is_some_and(|(k, _)| k == name))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn reads_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; privbeta_code=abc%3A12; privbeta_session=s1"),
        );
        assert_eq!(read(&headers, CODE_COOKIE).as_deref(), Some("abc:12"));
        assert_eq!(read(&headers, SESSION_COOKIE).as_deref(), Some("s1"));
        assert_eq!(read(&headers, "missing"), None);
    }

    #[test]
    fn reads_across_multiple_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1"));
        headers.append(COOKIE, HeaderValue::from_static("privbeta_session=s2"));
        assert_eq!(read(&headers, SESSION_COOKIE).as_deref(), Some("s2"));
    }

    #[test]
    fn set_and_remove() {
        let v = set(CODE_COOKIE, "a b;c", None, false).unwrap();
        let v = v.to_str().unwrap();
        assert!(v.starts_with("privbeta_code=a%20b%3Bc; Path=/"));
        assert!(!v.contains("Max-Age"));

        let v = set(SESSION_COOKIE, "s", Some(60), true).unwrap();
        let v = v.to_str().unwrap();
        assert!(v.contains("Max-Age=60"));
        assert!(v.ends_with("; Secure"));

        let r = removal(CODE_COOKIE);
        assert!(r.to_str().unwrap().contains("Max-Age=0"));

        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, r);
        assert!(is_set(&headers, CODE_COOKIE));
        assert!(!is_set(&headers, SESSION_COOKIE));
    }
}
