//! An asynchronous micro HTTP request core
//!
//! This crate lets a caller describe a request once and read the response
//! through several views (a raw stream, the buffered bytes, decoded text,
//! JSON, an HTML document) while the request is sent at most once.
//!
//! # Features
//!
//! - Lazy, memoized views sharing one exchange
//! - Cancellation before or during the exchange
//! - Cookie jars shared by tag, with per-request read/write gates
//! - Idle eviction of unused jars
//! - Pooled transports and clients
//! - Redirects, proxies (explicit or from the environment) and timeouts
//! - JSON round trip of the request configuration
//!
//! # Example
//!
//! ```no_run
//! use micro_request::Request;
//! use micro_request::cookie::FlexibleJar;
//! use tracing::{error, info};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut request = Request::get("https://example.com/");
//!     request.cookie_jar = Some(FlexibleJar::new("session"));
//!
//!     // both views share one exchange
//!     let (text, document) = tokio::join!(request.text(), request.html());
//!     match (text, document) {
//!         (Ok(text), Ok(document)) => {
//!             info!(len = text.len(), title = ?document.title(), "fetched");
//!         }
//!         (Err(e), _) | (_, Err(e)) => error!(cause = %e, "request failed"),
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`request`]: the request descriptor and its views
//! - [`pipeline`]: the task graph behind the views
//! - [`builder`]: derives body, headers, timeouts, proxy and jar from a request
//! - [`client`] and [`transport`]: redirects and cookies over single round trips
//! - [`cookie`]: tagged jar store and flexible jars
//! - [`agent`] and [`pool`]: pooled transports and clients
//!
//! # Limitations
//!
//! - Requests are never retried
//! - The write timeout is only bounded by the total deadline with the
//!   reqwest transport

pub mod agent;
pub mod body;
pub mod builder;
pub mod charset;
pub mod client;
pub mod context;
pub mod cookie;
pub mod error;
pub mod markup;
pub mod pipeline;
pub mod pool;
pub mod proxy;
pub mod request;
pub mod task;
pub mod transport;

mod serde_ext;
mod utils;

pub use agent::Agent;
pub use error::{RequestError, Result};
pub use pipeline::{Outcome, ResponseStream};
pub use request::Request;
