use crate::cookie::{JarStore, TrackedJar};
use cookie_store::RawCookie;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use url::Url;

/// A value handle onto a tagged jar with its own read/write gates.
///
/// Handles are never mutated: every `with_*`/`as_*` method returns a handle,
/// and handles with the same tag from the same store share one cookie storage.
#[derive(Clone)]
pub struct FlexibleJar {
    store: Arc<JarStore>,
    jar: Arc<TrackedJar>,
    readable: bool,
    writable: bool,
    tag: Arc<str>,
}

impl FlexibleJar {
    /// A readable and writable handle onto the global store's jar for `tag`.
    pub fn new(tag: &str) -> Self {
        Self::in_store(&JarStore::global(), tag)
    }

    pub fn in_store(store: &Arc<JarStore>, tag: &str) -> Self {
        Self { store: Arc::clone(store), jar: store.acquire(tag, false), readable: true, writable: true, tag: Arc::from(tag) }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Returns true if both handles read and write the same storage.
    pub fn shares_storage_with(&self, other: &FlexibleJar) -> bool {
        Arc::ptr_eq(&self.jar, &other.jar)
    }

    pub fn set_cookies(&self, url: &Url, cookies: Vec<RawCookie<'static>>) {
        if !self.writable {
            return;
        }
        self.jar.set_cookies(url, cookies);
    }

    pub fn cookies(&self, url: &Url) -> Vec<RawCookie<'static>> {
        if !self.readable {
            return Vec::new();
        }
        self.jar.cookies(url)
    }

    /// The `Cookie` request header value for `url`, if any cookie applies.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let cookies = self.cookies(url);
        if cookies.is_empty() {
            return None;
        }
        let pairs: Vec<String> = cookies.iter().map(|c| format!("{}={}", c.name(), c.value())).collect();
        Some(pairs.join("; "))
    }

    fn require(&self, readable: bool, writable: bool) -> Self {
        if self.readable == readable && self.writable == writable {
            return self.clone();
        }
        Self { readable, writable, ..self.clone() }
    }

    pub fn with_read(&self, readable: bool) -> Self {
        self.require(readable, self.writable)
    }

    pub fn with_write(&self, writable: bool) -> Self {
        self.require(self.readable, writable)
    }

    pub fn with_read_write(&self, readable: bool, writable: bool) -> Self {
        self.require(readable, writable)
    }

    pub fn as_read_only(&self) -> Self {
        self.require(true, false)
    }

    pub fn as_write_only(&self) -> Self {
        self.require(false, true)
    }

    pub fn as_read_write(&self) -> Self {
        self.require(true, true)
    }

    pub fn as_none(&self) -> Self {
        self.require(false, false)
    }

    /// Rebinds the handle to the jar for `tag`. The new handle is readable
    /// and writable.
    pub fn same_tag(&self, tag: &str) -> Self {
        if *self.tag == *tag {
            return self.clone();
        }
        Self::in_store(&self.store, tag)
    }

    /// Empties the jar of the current tag for every holder of that tag.
    pub fn clear(&self) -> Self {
        Self { jar: self.store.acquire(&self.tag, true), ..self.clone() }
    }

    /// Stores raw `Set-Cookie` header values, each paired with the URL it
    /// was received from.
    ///
    /// A pair whose URL does not parse, or whose header yields no cookie, is
    /// dropped without error. The writable gate applies.
    pub fn set_cookies_manually<U, C>(&self, url_cookie_pairs: impl IntoIterator<Item = (U, C)>)
    where
        U: AsRef<str>,
        C: AsRef<str>,
    {
        let mut grouped: HashMap<String, (Url, Vec<RawCookie<'static>>)> = HashMap::new();

        for (raw_url, raw_cookie) in url_cookie_pairs {
            let raw_url = raw_url.as_ref();
            let url = match Url::parse(raw_url) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = raw_url, cause = %e, "skip manual cookie with invalid url");
                    continue;
                }
            };
            let cookie = match RawCookie::parse(raw_cookie.as_ref().to_owned()) {
                Ok(cookie) => cookie,
                Err(e) => {
                    warn!(url = raw_url, cause = %e, "skip unparseable manual cookie");
                    continue;
                }
            };
            grouped.entry(raw_url.to_owned()).or_insert_with(|| (url, Vec::new())).1.push(cookie);
        }

        for (url, cookies) in grouped.into_values() {
            self.set_cookies(&url, cookies);
        }
    }
}

impl fmt::Debug for FlexibleJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlexibleJar")
            .field("tag", &self.tag)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<JarStore> {
        Arc::new(JarStore::new())
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn cookie(s: &str) -> Vec<RawCookie<'static>> {
        vec![RawCookie::parse(s.to_owned()).unwrap()]
    }

    #[test]
    fn gates_compose_in_call_order() {
        let jar = FlexibleJar::in_store(&store(), "t");
        assert!(jar.is_readable() && jar.is_writable());

        let jar = jar.with_read(false).with_write(false).with_read(true);
        assert!(jar.is_readable());
        assert!(!jar.is_writable());

        let jar = jar.with_read_write(false, true);
        assert!(!jar.is_readable());
        assert!(jar.is_writable());

        let none = jar.as_none();
        assert!(!none.is_readable() && !none.is_writable());
        assert!(none.as_read_only().is_readable() && !none.as_read_only().is_writable());
        assert!(!none.as_write_only().is_readable() && none.as_write_only().is_writable());

        let same = none.as_none();
        assert!(same.shares_storage_with(&none));
        assert_eq!(same.tag(), none.tag());
    }

    #[test]
    fn unreadable_jar_returns_nothing() {
        let jar = FlexibleJar::in_store(&store(), "t");
        jar.set_cookies(&url("http://example.com/"), cookie("a=1"));
        assert_eq!(jar.cookies(&url("http://example.com/")).len(), 1);

        let blind = jar.with_read(false);
        assert!(blind.cookies(&url("http://example.com/")).is_empty());
        assert!(blind.cookie_header(&url("http://example.com/")).is_none());
    }

    #[test]
    fn unwritable_jar_ignores_writes() {
        let jar = FlexibleJar::in_store(&store(), "t");
        jar.as_read_only().set_cookies(&url("http://example.com/"), cookie("a=1"));
        assert!(jar.cookies(&url("http://example.com/")).is_empty());
    }

    #[test]
    fn same_tag_is_keyed_by_tag() {
        let store = store();
        let t1 = FlexibleJar::in_store(&store, "t1");
        t1.set_cookies(&url("http://example.com/"), cookie("first=1"));

        let again = t1.same_tag("t1");
        assert!(again.shares_storage_with(&t1));

        let t2 = t1.same_tag("t2");
        assert!(!t2.shares_storage_with(&t1));
        assert!(t2.cookies(&url("http://example.com/")).is_empty());

        let back = t2.as_none().same_tag("t1");
        assert!(back.is_readable() && back.is_writable());
        back.set_cookies(&url("http://example.com/"), cookie("second=2"));
        let names: Vec<String> = t1.cookies(&url("http://example.com/")).iter().map(|c| c.name().to_owned()).collect();
        assert!(names.contains(&"first".to_owned()));
        assert!(names.contains(&"second".to_owned()));
    }

    #[test]
    fn clear_is_visible_to_all_holders() {
        let store = store();
        let a = FlexibleJar::in_store(&store, "sess");
        let b = FlexibleJar::in_store(&store, "sess").as_read_only();
        a.set_cookies(&url("http://example.com/"), cookie("a=1"));
        assert_eq!(b.cookies(&url("http://example.com/")).len(), 1);

        let cleared = a.clear();
        assert!(cleared.cookies(&url("http://example.com/")).is_empty());
        assert!(b.cookies(&url("http://example.com/")).is_empty());
        assert!(a.cookies(&url("http://example.com/")).is_empty());
    }

    #[test]
    fn manual_ingestion_drops_bad_pairs() {
        let jar = FlexibleJar::in_store(&store(), "manual");
        jar.set_cookies_manually([
            ("not a url", "a=1"),
            ("http://example.com/", ""),
            ("http://example.com/", "token=abc; Path=/"),
            ("http://example.com/", "lang=en"),
        ]);

        let header = jar.cookie_header(&url("http://example.com/")).unwrap();
        assert!(header.contains("token=abc"));
        assert!(header.contains("lang=en"));
        assert_eq!(jar.cookies(&url("http://example.com/")).len(), 2);
    }

    #[test]
    fn manual_ingestion_respects_write_gate() {
        let jar = FlexibleJar::in_store(&store(), "manual");
        jar.as_read_only().set_cookies_manually([("http://example.com/", "a=1")]);
        assert!(jar.cookies(&url("http://example.com/")).is_empty());
    }
}
