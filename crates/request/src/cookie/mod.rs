//! Cookie jars shared between requests by tag.
//!
//! - [`JarStore`]: the tag registry with idle eviction
//! - [`FlexibleJar`]: a copy-on-change handle with read/write gates
//! - [`CookieStorage`]: the per-jar cookie storage
//!
//! Requests that use the same tag share cookies. That includes the empty tag:
//! every `FlexibleJar::new("")` reads and writes one global jar. Use a unique
//! tag, or [`FlexibleJar::as_none`], to isolate a request.

mod jar;
mod storage;
mod store;

pub use jar::FlexibleJar;
pub use storage::CookieStorage;
pub use store::JarStore;
pub use store::TrackedJar;
pub use store::{DEFAULT_HIGH_WATER_MARK, DEFAULT_IDLE_THRESHOLD};

pub use cookie_store::RawCookie as Cookie;
