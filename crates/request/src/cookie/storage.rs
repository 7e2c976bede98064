use cookie_store::{CookieStore, RawCookie};
use parking_lot::RwLock;
use std::fmt;
use tracing::debug;
use url::Url;

/// Domain and public-suffix aware cookie storage for one jar.
///
/// Safe for concurrent readers and writers; every jar in the store owns
/// exactly one of these.
pub struct CookieStorage {
    inner: RwLock<CookieStore>,
}

impl CookieStorage {
    pub fn new() -> Self {
        Self { inner: RwLock::new(CookieStore::default()) }
    }

    /// Stores cookies received from `url`, dropping those whose `Domain`
    /// attribute names a public suffix other than the host itself.
    pub fn set_cookies(&self, url: &Url, cookies: Vec<RawCookie<'static>>) {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let accepted = cookies.into_iter().filter_map(|mut cookie| {
            let Some(domain) = cookie.domain().map(|d| d.trim_start_matches('.').to_ascii_lowercase()) else {
                return Some(cookie);
            };
            if psl::suffix_str(&domain) != Some(domain.as_str()) {
                return Some(cookie);
            }
            if domain == host {
                // a public suffix may only set host-only cookies on itself
                cookie.unset_domain();
                return Some(cookie);
            }
            debug!(domain = %domain, name = cookie.name(), "rejected cookie for public suffix");
            None
        });

        self.inner.write().store_response_cookies(accepted, url);
    }

    /// Unexpired cookies that domain- and path-match `url`.
    pub fn cookies(&self, url: &Url) -> Vec<RawCookie<'static>> {
        self.inner.read().matches(url).into_iter().map(|cookie| RawCookie::clone(cookie)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().iter_any().next().is_none()
    }
}

impl Default for CookieStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CookieStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieStorage").field("cookies", &self.inner.read().iter_any().count()).finish()
    }
}
