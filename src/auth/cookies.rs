//! Cookie contract between the broker and the HTTP layer.
//!
//! The broker never touches `HeaderMap` directly; it reads and writes named
//! values through [`CookieStore`]. The request-scoped implementation parses
//! the inbound `Cookie` header once and accumulates `Set-Cookie` values to be
//! applied to the response.

use axum::http::header::{InvalidHeaderValue, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    Strict,
}

impl SameSite {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Lax => "Lax",
            Self::Strict => "Strict",
        }
    }
}

/// Attributes for a stored value.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub max_age_seconds: i64,
    pub same_site: SameSite,
    pub http_only: bool,
    pub secure: bool,
}

impl CookieOptions {
    /// `HttpOnly; Path=/; SameSite=Lax` session-value defaults.
    #[must_use]
    pub fn new(max_age_seconds: i64) -> Self {
        Self {
            max_age_seconds,
            same_site: SameSite::Lax,
            http_only: true,
            secure: false,
        }
    }

    #[must_use]
    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

/// Scoped read/write/delete of named values with expiry.
pub trait CookieStore: Send {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&mut self, name: &str, value: &str, options: &CookieOptions);
    fn delete(&mut self, name: &str);
}

/// Request-scoped [`CookieStore`] over the HTTP cookie headers.
#[derive(Debug, Default)]
pub struct RequestCookies {
    values: HashMap<String, String>,
    pending: Vec<String>,
}

impl RequestCookies {
    /// Parse the inbound `Cookie` header.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut values = HashMap::new();
        if let Some(header) = headers.get(COOKIE).and_then(|value| value.to_str().ok()) {
            for pair in header.split(';') {
                let trimmed = pair.trim();
                let mut parts = trimmed.splitn(2, '=');
                if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
                    values.insert(key.trim().to_string(), value.trim().to_string());
                }
            }
        }
        Self {
            values,
            pending: Vec::new(),
        }
    }

    /// Append the accumulated `Set-Cookie` values to a response header map.
    ///
    /// # Errors
    /// Returns an error if a cookie value is not a valid header value.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), InvalidHeaderValue> {
        for cookie in &self.pending {
            headers.append(SET_COOKIE, HeaderValue::from_str(cookie)?);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> &[String] {
        &self.pending
    }
}

impl CookieStore for RequestCookies {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: &str, options: &CookieOptions) {
        let mut cookie = format!(
            "{name}={value}; Path=/; Max-Age={}; SameSite={}",
            options.max_age_seconds,
            options.same_site.as_str()
        );
        if options.http_only {
            cookie.push_str("; HttpOnly");
        }
        if options.secure {
            cookie.push_str("; Secure");
        }
        // Reads within the same request observe the new value.
        self.values.insert(name.to_string(), value.to_string());
        self.pending.push(cookie);
    }

    fn delete(&mut self, name: &str) {
        self.values.remove(name);
        self.pending
            .push(format!("{name}=; Path=/; Max-Age=0; HttpOnly"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_cookie(value: &str) -> RequestCookies {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(value).expect("cookie"));
        RequestCookies::from_headers(&headers)
    }

    #[test]
    fn parses_multiple_pairs() {
        let cookies = request_with_cookie("access_token=abc; refresh_token=def;  extra=1");
        assert_eq!(cookies.get("access_token").as_deref(), Some("abc"));
        assert_eq!(cookies.get("refresh_token").as_deref(), Some("def"));
        assert_eq!(cookies.get("extra").as_deref(), Some("1"));
        assert_eq!(cookies.get("missing"), None);
    }

    #[test]
    fn set_builds_attributes_and_is_readable() {
        let mut cookies = RequestCookies::default();
        let options = CookieOptions::new(960).same_site(SameSite::Strict).secure(true);
        cookies.set("refresh_token", "tok", &options);

        assert_eq!(cookies.get("refresh_token").as_deref(), Some("tok"));
        let pending = cookies.pending();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].contains("refresh_token=tok"));
        assert!(pending[0].contains("Max-Age=960"));
        assert!(pending[0].contains("SameSite=Strict"));
        assert!(pending[0].contains("HttpOnly"));
        assert!(pending[0].contains("Secure"));
    }

    #[test]
    fn delete_expires_and_hides_the_value() {
        let mut cookies = request_with_cookie("access_token=abc");
        cookies.delete("access_token");
        assert_eq!(cookies.get("access_token"), None);
        assert!(cookies.pending()[0].contains("Max-Age=0"));
    }

    #[test]
    fn apply_appends_set_cookie_headers() {
        let mut cookies = RequestCookies::default();
        cookies.set("a", "1", &CookieOptions::new(60));
        cookies.delete("b");

        let mut headers = HeaderMap::new();
        cookies.apply(&mut headers).expect("valid header values");
        assert_eq!(headers.get_all(SET_COOKIE).iter().count(), 2);
    }
}
