//! The transport collaborator: one literal HTTP round trip.
//!
//! A [`Transport`] never follows redirects and never touches cookies; the
//! pooled [`Client`](crate::client::Client) does both on top of it. Transports
//! are pooled too, so [`Transport::configure`] is called on every checkout and
//! should be cheap when the configuration has not changed.

use crate::body::OutgoingBody;
use crate::error::{RequestError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use http::{Method, StatusCode};
use std::fmt;
use std::io;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

/// A response body as a stream of chunks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Connection level settings applied to a transport on checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub proxy: Option<Url>,
}

/// A fully built request. Headers are sent in order, duplicates included.
#[derive(Debug)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: OutgoingBody,
}

pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: ByteStream,
}

impl TransportResponse {
    /// Values of every header named `name`, compared case-insensitively.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers.iter().filter(move |(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse").field("status", &self.status).field("headers", &self.headers).finish_non_exhaustive()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    fn configure(&mut self, config: &TransportConfig) -> Result<()>;

    async fn round_trip(&self, request: OutgoingRequest) -> Result<TransportResponse>;
}

/// A [`Transport`] backed by `reqwest`.
///
/// The inner client, with its connection pool, is rebuilt only when a
/// checkout asks for a different configuration.
#[derive(Debug, Default)]
pub struct ReqwestTransport {
    client: Option<reqwest::Client>,
    built_for: Option<TransportConfig>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn build(config: &TransportConfig) -> Result<reqwest::Client> {
        let builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout);

        // write timeout has no reqwest counterpart; the total deadline bounds it
        let builder = match &config.proxy {
            Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy.as_str()).map_err(RequestError::transport)?),
            None => builder.no_proxy(),
        };

        builder.build().map_err(RequestError::transport)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn configure(&mut self, config: &TransportConfig) -> Result<()> {
        if self.client.is_some() && self.built_for.as_ref() == Some(config) {
            return Ok(());
        }

        debug!(proxy = ?config.proxy, connect_timeout = ?config.connect_timeout, "building reqwest client");
        self.client = Some(Self::build(config)?);
        self.built_for = Some(config.clone());
        Ok(())
    }

    async fn round_trip(&self, request: OutgoingRequest) -> Result<TransportResponse> {
        let client = self.client.as_ref().ok_or_else(|| RequestError::transport("transport used before configure"))?;

        let mut builder = client.request(request.method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body {
            OutgoingBody::Empty => builder,
            OutgoingBody::Bytes(bytes) => builder.body(bytes),
            OutgoingBody::File { path, .. } => {
                let file = tokio::fs::File::open(&path).await?;
                builder.body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            }
            OutgoingBody::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream)),
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_owned(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();
        let body = response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other)).boxed();

        Ok(TransportResponse { status, headers, body })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> RequestError {
    if e.is_timeout() { RequestError::TimedOut } else { RequestError::transport(e) }
}
