//! Derives everything an exchange needs from a request descriptor.
//!
//! The derivation is pure: the same descriptor always yields the same
//! [`Plan`]. Only [`Plan::outgoing`] touches the outside world, to measure a
//! file body or take a one-shot body source.

use crate::agent::Agent;
use crate::body::{self, BodyPlan};
use crate::client::ClientConfig;
use crate::cookie::FlexibleJar;
use crate::error::{RequestError, Result};
use crate::proxy::{self, Proxy};
use crate::request::Request;
use crate::transport::{OutgoingRequest, TransportConfig};
use http::Method;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(20);
/// Shared by connect, read and write when a request is a quick test.
pub const QUICK_TEST_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_FOLLOW_REDIRECT: bool = true;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const TEXT_CONTENT_TYPE: &str = "text/plain;charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
    pub total: Duration,
}

impl Timeouts {
    /// Fills unset timeouts with the defaults. The total defaults to the sum
    /// of the other three; a quick test overrides all of them.
    pub fn resolve(request: &Request) -> Self {
        if request.quick_test {
            return Self::uniform(QUICK_TEST_TIMEOUT);
        }

        let connect = request.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let read = request.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT);
        let write = request.write_timeout.unwrap_or(DEFAULT_WRITE_TIMEOUT);
        let total = request.timeout.unwrap_or_else(|| connect.saturating_add(read).saturating_add(write));
        Self { connect, read, write, total }
    }

    fn uniform(each: Duration) -> Self {
        Self { connect: each, read: each, write: each, total: each.saturating_mul(3) }
    }
}

/// The resolved shape of one exchange.
#[derive(Debug)]
pub(crate) struct Plan {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) body: BodyPlan,
    pub(crate) content_type: Option<String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) timeouts: Timeouts,
    pub(crate) follow_redirect: bool,
    pub(crate) proxy: Option<Proxy>,
    pub(crate) cookie_jar: Option<FlexibleJar>,
    pub(crate) agent: Arc<Agent>,
}

impl Plan {
    /// Snapshot of `request`. Form encoding happens here, so a form that can't
    /// be encoded fails the exchange rather than this call.
    pub(crate) fn from_request(request: &Request) -> Result<Self> {
        let (body, inferred) = select_body(request)?;
        let content_type = declared_content_type(request).or_else(|| inferred.map(str::to_owned));
        if let Some(content_type) = &content_type {
            check_header(CONTENT_TYPE.as_str(), content_type)?;
        }
        for (name, value) in &request.headers {
            check_header(name, value)?;
        }

        Ok(Self {
            method: request.method.clone().unwrap_or(Method::GET),
            url: request.url.clone(),
            body,
            content_type,
            headers: request.headers.clone(),
            timeouts: Timeouts::resolve(request),
            follow_redirect: request.follow_redirect.unwrap_or(DEFAULT_FOLLOW_REDIRECT),
            proxy: request.proxy.clone(),
            cookie_jar: effective_jar(request),
            agent: request.agent(),
        })
    }

    pub(crate) fn target(&self) -> Result<Url> {
        Url::parse(&self.url).map_err(|e| RequestError::invalid_url(&self.url, e))
    }

    /// The explicit proxy if one is set, else whatever the environment
    /// configures for `target`.
    pub(crate) fn proxy_url(&self, target: &Url) -> Option<Url> {
        match &self.proxy {
            Some(proxy) => proxy.url(),
            None => proxy::proxy_from_env(target),
        }
    }

    pub(crate) fn transport_config(&self, target: &Url) -> TransportConfig {
        TransportConfig {
            connect_timeout: self.timeouts.connect,
            read_timeout: self.timeouts.read,
            write_timeout: self.timeouts.write,
            proxy: self.proxy_url(target),
        }
    }

    pub(crate) fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: self.timeouts.total,
            follow_redirect: self.follow_redirect,
            cookie_jar: self.cookie_jar.clone(),
        }
    }

    /// Builds the message to send. Headers go out as content type, content
    /// length, then the custom headers in insertion order.
    pub(crate) async fn outgoing(&self, target: Url) -> Result<OutgoingRequest> {
        let body = self.body.open().await?;

        let mut headers = Vec::with_capacity(self.headers.len() + 2);
        if let Some(content_type) = &self.content_type {
            headers.push((CONTENT_TYPE.as_str().to_owned(), content_type.clone()));
        }
        if let Some(len) = body.announced_len() {
            headers.push((CONTENT_LENGTH.as_str().to_owned(), len.to_string()));
        }
        headers.extend(self.headers.iter().cloned());

        Ok(OutgoingRequest { method: self.method.clone(), url: target, headers, body })
    }
}

/// Rejects a header a transport could not put on the wire.
fn check_header(name: &str, value: &str) -> Result<()> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| RequestError::invalid_header(format!("name {name:?}: {e}")))?;
    HeaderValue::from_str(value).map_err(|e| RequestError::invalid_header(format!("value of {name}: {e}")))?;
    Ok(())
}

fn declared_content_type(request: &Request) -> Option<String> {
    match &request.content_type {
        Some(mime) => Some(mime.to_string()),
        None if !request.content_type_header.is_empty() => Some(request.content_type_header.clone()),
        None => None,
    }
}

/// The first non-empty source in the order form, text, binary, file,
/// generic source, with the content type it implies.
fn select_body(request: &Request) -> Result<(BodyPlan, Option<&'static str>)> {
    if !request.form.is_empty() {
        let encoded = body::encode_form(&request.form)?;
        if !encoded.is_empty() {
            return Ok((BodyPlan::Text(encoded), Some(FORM_CONTENT_TYPE)));
        }
    }
    if !request.text.is_empty() {
        return Ok((BodyPlan::Text(request.text.clone()), Some(TEXT_CONTENT_TYPE)));
    }
    if let Some(binary) = request.binary.as_ref().filter(|b| !b.is_empty()) {
        return Ok((BodyPlan::Binary(binary.clone()), Some(body::sniff_content_type(binary))));
    }
    if let Some(path) = &request.file {
        return Ok((BodyPlan::File(path.clone()), Some(OCTET_STREAM)));
    }
    if let Some(source) = &request.source {
        return Ok((BodyPlan::Source(source.clone()), Some(OCTET_STREAM)));
    }
    Ok((BodyPlan::Empty, None))
}

fn effective_jar(request: &Request) -> Option<FlexibleJar> {
    let jar = request.cookie_jar.as_ref()?;
    Some(match (request.auto_send_cookies, request.auto_receive_cookies) {
        (Some(read), Some(write)) => jar.with_read_write(read, write),
        (Some(read), None) => jar.with_read(read),
        (None, Some(write)) => jar.with_write(write),
        (None, None) => jar.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{ByteSource, OutgoingBody};
    use crate::cookie::JarStore;
    use bytes::Bytes;
    use futures::stream;

    #[test]
    fn timeouts_default_to_sum() {
        let request = Request::default();
        let timeouts = Timeouts::resolve(&request);
        assert_eq!(timeouts.connect, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(timeouts.total, Duration::from_secs(42));

        let request = Request { connect_timeout: Some(Duration::from_secs(1)), ..Request::default() };
        assert_eq!(Timeouts::resolve(&request).total, Duration::from_secs(41));

        let request = Request { timeout: Some(Duration::from_secs(5)), ..Request::default() };
        assert_eq!(Timeouts::resolve(&request).total, Duration::from_secs(5));
    }

    #[test]
    fn huge_phase_timeout_saturates_the_total() {
        let request = Request { connect_timeout: Some(Duration::MAX), ..Request::default() };
        let timeouts = Timeouts::resolve(&request);
        assert_eq!(timeouts.connect, Duration::MAX);
        assert_eq!(timeouts.total, Duration::MAX);
    }

    #[test]
    fn quick_test_overrides_explicit_timeouts() {
        let request = Request {
            quick_test: true,
            timeout: Some(Duration::from_secs(60)),
            connect_timeout: Some(Duration::from_secs(9)),
            read_timeout: Some(Duration::from_secs(9)),
            ..Request::default()
        };
        let timeouts = Timeouts::resolve(&request);
        assert_eq!(timeouts.connect, QUICK_TEST_TIMEOUT);
        assert_eq!(timeouts.read, QUICK_TEST_TIMEOUT);
        assert_eq!(timeouts.write, QUICK_TEST_TIMEOUT);
        assert_eq!(timeouts.total, Duration::from_millis(1500));
    }

    #[test]
    fn form_wins_over_everything() {
        let request = Request {
            form: vec![("a".into(), "1".into())],
            text: "ignored".into(),
            binary: Some(Bytes::from_static(b"\x89PNG\r\n\x1a\n")),
            ..Request::default()
        };
        let plan = Plan::from_request(&request).unwrap();
        assert!(matches!(&plan.body, BodyPlan::Text(t) if t == "a=1"));
        assert_eq!(plan.content_type.as_deref(), Some(FORM_CONTENT_TYPE));
        assert_eq!(plan.method, Method::GET);
    }

    #[test]
    fn empty_sources_fall_through() {
        let request = Request {
            form: vec![(String::new(), "skipped".into())],
            text: String::new(),
            binary: Some(Bytes::from_static(b"\x89PNG\r\n\x1a\n")),
            ..Request::default()
        };
        let plan = Plan::from_request(&request).unwrap();
        assert!(matches!(plan.body, BodyPlan::Binary(_)));
        assert_eq!(plan.content_type.as_deref(), Some("image/png"));

        let request = Request { source: Some(ByteSource::new(stream::empty())), ..Request::default() };
        let plan = Plan::from_request(&request).unwrap();
        assert!(matches!(plan.body, BodyPlan::Source(_)));
        assert_eq!(plan.content_type.as_deref(), Some(OCTET_STREAM));
    }

    #[test]
    fn declared_content_type_wins() {
        let request = Request {
            text: "{}".into(),
            content_type: Some(mime::APPLICATION_JSON),
            content_type_header: "text/csv".into(),
            ..Request::default()
        };
        assert_eq!(Plan::from_request(&request).unwrap().content_type.as_deref(), Some("application/json"));

        let request = Request { text: "{}".into(), content_type_header: "text/csv".into(), ..Request::default() };
        assert_eq!(Plan::from_request(&request).unwrap().content_type.as_deref(), Some("text/csv"));

        assert_eq!(Plan::from_request(&Request::default()).unwrap().content_type, None);
    }

    #[tokio::test]
    async fn header_order() {
        let request = Request {
            method: Some(Method::POST),
            url: "http://example.com/".into(),
            text: "hi".into(),
            headers: vec![("X-B".into(), "2".into()), ("x-a".into(), "1".into()), ("X-B".into(), "3".into())],
            ..Request::default()
        };
        let plan = Plan::from_request(&request).unwrap();
        let outgoing = plan.outgoing(plan.target().unwrap()).await.unwrap();
        let names: Vec<_> = outgoing.headers.iter().map(|(n, v)| format!("{n}={v}")).collect();
        assert_eq!(names, vec!["content-type=text/plain;charset=utf-8", "X-B=2", "x-a=1", "X-B=3"]);
        assert_eq!(outgoing.method, Method::POST);
    }

    #[test]
    fn explicit_proxy_wins() {
        let request = Request { proxy: Some(Proxy::socks("127.0.0.1", 1080)), ..Request::default() };
        let plan = Plan::from_request(&request).unwrap();
        let target = Url::parse("http://example.com/").unwrap();
        assert_eq!(plan.proxy_url(&target).unwrap().as_str(), "socks5://127.0.0.1:1080");
    }

    #[test]
    fn cookie_overrides_apply_to_the_jar() {
        let store = Arc::new(JarStore::new());
        let jar = FlexibleJar::in_store(&store, "builder");

        let request = Request { cookie_jar: Some(jar.clone()), auto_send_cookies: Some(false), ..Request::default() };
        let effective = effective_jar(&request).unwrap();
        assert!(!effective.is_readable());
        assert!(effective.is_writable());

        let request = Request { cookie_jar: Some(jar), auto_receive_cookies: Some(false), ..Request::default() };
        let effective = effective_jar(&request).unwrap();
        assert!(effective.is_readable());
        assert!(!effective.is_writable());

        assert!(effective_jar(&Request::default()).is_none());
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let request = Request { headers: vec![("X Bad".into(), "1".into())], ..Request::default() };
        assert!(matches!(Plan::from_request(&request), Err(RequestError::InvalidHeader { .. })));

        let request = Request { headers: vec![("X-Ok".into(), "line\nbreak".into())], ..Request::default() };
        assert!(matches!(Plan::from_request(&request), Err(RequestError::InvalidHeader { .. })));

        let request = Request { text: "x".into(), content_type_header: "text/plain\r\n".into(), ..Request::default() };
        assert!(matches!(Plan::from_request(&request), Err(RequestError::InvalidHeader { .. })));
    }

    #[tokio::test]
    async fn file_length_goes_between_type_and_custom_headers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"0123456789").unwrap();

        let request = Request {
            method: Some(Method::PUT),
            url: "http://example.com/upload".into(),
            file: Some(file.path().to_path_buf()),
            headers: vec![("X-A".into(), "1".into())],
            ..Request::default()
        };
        let plan = Plan::from_request(&request).unwrap();
        let outgoing = plan.outgoing(plan.target().unwrap()).await.unwrap();

        let headers: Vec<(&str, &str)> = outgoing.headers.iter().map(|(n, v)| (n.as_str(), v.as_str())).collect();
        assert_eq!(headers, vec![("content-type", OCTET_STREAM), ("content-length", "10"), ("X-A", "1")]);
        assert!(matches!(outgoing.body, OutgoingBody::File { len: 10, .. }));
    }

    #[test]
    fn bad_url_is_reported() {
        let request = Request { url: "not a url".into(), ..Request::default() };
        let plan = Plan::from_request(&request).unwrap();
        assert!(matches!(plan.target(), Err(RequestError::InvalidUrl { .. })));
    }
}
