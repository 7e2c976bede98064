//! Process-wide registry of tagged cookie jars.
//!
//! Every tag maps to one [`TrackedJar`]. Jars are evicted lazily: once the map
//! grows past the high-water mark, a sweep removes every tag idle for longer
//! than the idle threshold. There are no per-entry timers.

use crate::cookie::CookieStorage;
use arc_swap::ArcSwap;
use cookie_store::RawCookie;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(300);
pub const DEFAULT_HIGH_WATER_MARK: usize = 100_000;

static GLOBAL_STORE: Lazy<Arc<JarStore>> = Lazy::new(|| Arc::new(JarStore::new()));

/// Cookie storage plus the time it was last touched.
#[derive(Debug)]
pub struct TrackedJar {
    epoch: Instant,
    last_access_millis: AtomicU64,
    storage: ArcSwap<CookieStorage>,
}

impl TrackedJar {
    fn new(epoch: Instant) -> Self {
        let jar = Self { epoch, last_access_millis: AtomicU64::new(0), storage: ArcSwap::from_pointee(CookieStorage::new()) };
        jar.touch();
        jar
    }

    fn touch(&self) {
        self.last_access_millis.store(millis_since(self.epoch), Ordering::Relaxed);
    }

    fn idle_for(&self, now_millis: u64) -> Duration {
        Duration::from_millis(now_millis.saturating_sub(self.last_access_millis.load(Ordering::Relaxed)))
    }

    fn reset(&self) {
        self.storage.store(Arc::new(CookieStorage::new()));
    }

    pub fn set_cookies(&self, url: &Url, cookies: Vec<RawCookie<'static>>) {
        self.touch();
        self.storage.load().set_cookies(url, cookies);
    }

    pub fn cookies(&self, url: &Url) -> Vec<RawCookie<'static>> {
        self.touch();
        self.storage.load().cookies(url)
    }
}

/// A registry of cookie jars keyed by an opaque tag.
#[derive(Debug)]
pub struct JarStore {
    entries: Mutex<HashMap<String, Arc<TrackedJar>>>,
    epoch: Instant,
    idle_threshold: Duration,
    high_water_mark: usize,
}

impl JarStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_IDLE_THRESHOLD, DEFAULT_HIGH_WATER_MARK)
    }

    pub fn with_limits(idle_threshold: Duration, high_water_mark: usize) -> Self {
        Self { entries: Mutex::new(HashMap::new()), epoch: Instant::now(), idle_threshold, high_water_mark }
    }

    /// The store shared by every jar that was not bound to a store explicitly.
    pub fn global() -> Arc<JarStore> {
        Arc::clone(&GLOBAL_STORE)
    }

    /// Returns the jar for `tag`, creating it when absent.
    ///
    /// With `force_new` the jar's storage is replaced by an empty one; the
    /// replacement is visible to every holder of the tag.
    pub fn acquire(&self, tag: &str, force_new: bool) -> Arc<TrackedJar> {
        let mut entries = self.entries.lock();

        let jar = match entries.get(tag) {
            Some(jar) => {
                if force_new {
                    jar.reset();
                }
                jar.touch();
                Arc::clone(jar)
            }
            None => {
                let jar = Arc::new(TrackedJar::new(self.epoch));
                entries.insert(tag.to_owned(), Arc::clone(&jar));
                jar
            }
        };

        if entries.len() > self.high_water_mark {
            self.sweep(&mut entries);
        }

        jar
    }

    fn sweep(&self, entries: &mut HashMap<String, Arc<TrackedJar>>) {
        let now = millis_since(self.epoch);
        let before = entries.len();
        entries.retain(|_, jar| jar.idle_for(now) <= self.idle_threshold);
        let evicted = before - entries.len();
        if evicted > 0 {
            warn!(evicted, remaining = entries.len(), "evicted idle cookie jars");
        } else {
            debug!(size = before, "cookie jar sweep found nothing idle");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.lock().contains_key(tag)
    }
}

impl Default for JarStore {
    fn default() -> Self {
        Self::new()
    }
}

fn millis_since(epoch: Instant) -> u64 {
    u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
}
