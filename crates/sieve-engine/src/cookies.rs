//! Per-attempt cookie jar over [`cookie_store::CookieStore`].
//!
//! The store applies RFC 6265 domain, path and expiry rules; [`CookieJar`]
//! adds the script-facing pieces: `name=value` pairs from `COOKIE` lines,
//! `<data.cookies>` iteration, and the plain [`Cookie`] rows exchanged with
//! the browser.

use cookie_store::{CookieStore, RawCookie};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Host the cookie belongs to, without a leading dot.
    pub domain: String,
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    store: CookieStore,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.store.iter_unexpired().next().is_none()
    }

    /// Unexpired `(name, value)` pairs in insertion order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.store.iter_unexpired().map(|c| c.name_value())
    }

    /// Unexpired cookies as plain rows.
    pub fn iter(&self) -> impl Iterator<Item = Cookie> + '_ {
        self.store.iter_unexpired().map(|c| Cookie {
            name: c.name().to_string(),
            value: c.value().to_string(),
            domain: String::from(&c.domain),
            path: String::from(&c.path),
        })
    }

    /// Insert a cookie read from the browser as a host-only cookie.
    pub fn insert(&mut self, cookie: Cookie) {
        let domain = cookie.domain.trim_start_matches('.');
        let path = if cookie.path.starts_with('/') { cookie.path.as_str() } else { "/" };
        let Ok(url) = Url::parse(&format!("https://{}{}", domain, path)) else {
            tracing::debug!(domain = %cookie.domain, name = %cookie.name, "Skipping cookie with unusable domain");
            return;
        };
        let mut raw = RawCookie::new(cookie.name, cookie.value);
        raw.set_path(path.to_string());
        if let Err(e) = self.store.insert_raw(&raw, &url) {
            tracing::debug!(error = %e, url = %url, "Cookie rejected");
        }
    }

    /// Store a `name=value` pair for the host of `url`.
    pub fn insert_pair(&mut self, url: &Url, pair: &str) {
        let Some((name, value)) = pair.split_once('=') else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let mut raw = RawCookie::new(name.to_string(), value.trim().to_string());
        raw.set_path("/");
        if let Err(e) = self.store.insert_raw(&raw, url) {
            tracing::debug!(error = %e, url = %url, "Cookie rejected");
        }
    }

    /// Apply one `Set-Cookie` header received from `url`. Expired cookies
    /// remove their stored counterpart; foreign domains are ignored.
    pub fn store_set_cookie(&mut self, url: &Url, header: &str) {
        if let Err(e) = self.store.parse(header, url) {
            tracing::debug!(error = %e, url = %url, "Set-Cookie ignored");
        }
    }

    /// `Cookie` header value for a request to `url`, if any cookie applies.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let header = self
            .store
            .get_request_values(url)
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        (!header.is_empty()).then_some(header)
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }
}
