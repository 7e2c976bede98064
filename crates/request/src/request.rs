//! The request descriptor.
//!
//! A [`Request`] is plain configuration until its first view is awaited. At
//! that point its fields are snapshotted and the exchange starts; later edits
//! have no effect on it. Views can be awaited any number of times, in any
//! order and from any number of tasks: the server sees one request.

use crate::agent::Agent;
use crate::body::ByteSource;
use crate::builder::Plan;
use crate::cookie::FlexibleJar;
use crate::error::{RequestError, Result};
use crate::markup::Document;
use crate::pipeline::{Execution, Outcome, ResponseStream};
use crate::proxy::Proxy;
use crate::serde_ext;
use crate::task::TaskState;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::Method;
use mime::Mime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Keys describing the response; written by [`Request::to_json`] and ignored
/// by [`Request::overlay_json`].
const OUTCOME_KEYS: [&str; 5] = ["statusCode", "statusMessage", "responseHeaderList", "responseHeaderMap", "responseBinary"];

/// Keys whose fields can't be absent; a `null` for them is skipped on overlay.
const REQUIRED_KEYS: [&str; 6] = ["url", "headers", "form", "text", "contentTypeHeader", "quickTest"];

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Request {
    /// `GET` when unset.
    #[serde(with = "serde_ext::method")]
    pub method: Option<Method>,
    pub url: String,
    /// Sent in order after the content headers. Duplicates are kept.
    pub headers: Vec<(String, String)>,

    #[serde(with = "serde_ext::base64_bytes")]
    pub binary: Option<Bytes>,
    /// Encoded as `application/x-www-form-urlencoded`; pairs with an empty
    /// name are dropped.
    pub form: Vec<(String, String)>,
    pub text: String,
    #[serde(skip)]
    pub file: Option<PathBuf>,
    #[serde(skip)]
    pub source: Option<ByteSource>,

    #[serde(with = "serde_ext::mime_type")]
    pub content_type: Option<Mime>,
    /// Used when `content_type` is unset.
    pub content_type_header: String,

    #[serde(with = "serde_ext::duration_ms")]
    pub timeout: Option<Duration>,
    #[serde(with = "serde_ext::duration_ms")]
    pub connect_timeout: Option<Duration>,
    #[serde(with = "serde_ext::duration_ms")]
    pub read_timeout: Option<Duration>,
    #[serde(with = "serde_ext::duration_ms")]
    pub write_timeout: Option<Duration>,
    /// Caps connect, read and write at 500ms each, whatever else is set.
    pub quick_test: bool,

    pub follow_redirect: Option<bool>,
    pub proxy: Option<Proxy>,

    #[serde(skip)]
    pub cookie_jar: Option<FlexibleJar>,
    /// Overrides whether the jar's cookies are sent.
    pub auto_send_cookies: Option<bool>,
    /// Overrides whether response cookies are stored in the jar.
    pub auto_receive_cookies: Option<bool>,

    #[serde(skip)]
    pub(crate) agent: Option<Arc<Agent>>,
    #[serde(skip)]
    pub(crate) exec: Arc<Execution>,
}

impl Clone for Request {
    /// Copies the configuration. The copy has not been sent and is sent on its
    /// own when awaited.
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            binary: self.binary.clone(),
            form: self.form.clone(),
            text: self.text.clone(),
            file: self.file.clone(),
            source: self.source.clone(),
            content_type: self.content_type.clone(),
            content_type_header: self.content_type_header.clone(),
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            quick_test: self.quick_test,
            follow_redirect: self.follow_redirect,
            proxy: self.proxy.clone(),
            cookie_jar: self.cookie_jar.clone(),
            auto_send_cookies: self.auto_send_cookies,
            auto_receive_cookies: self.auto_receive_cookies,
            agent: self.agent.as_ref().map(Arc::clone),
            exec: Arc::default(),
        }
    }
}

impl Request {
    pub fn new<U: Into<String>>(method: Method, url: U) -> Self {
        Self { method: Some(method), url: url.into(), ..Self::default() }
    }

    pub fn get<U: Into<String>>(url: U) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post<U: Into<String>>(url: U) -> Self {
        Self::new(Method::POST, url)
    }

    /// Runs the request on `agent` instead of [`Agent::global`].
    #[must_use]
    pub fn with_agent(mut self, agent: &Arc<Agent>) -> Self {
        self.agent = Some(Arc::clone(agent));
        self
    }

    /// The agent the request runs on.
    pub fn agent(&self) -> Arc<Agent> {
        self.exec.agent().unwrap_or_else(|| self.agent.as_ref().map_or_else(Agent::global, Arc::clone))
    }

    fn pipeline(&self) -> &Arc<Execution> {
        self.exec.prepare(|| Plan::from_request(self));
        &self.exec
    }

    /// The response as a stream. Call [`ResponseStream::done`] when finished
    /// reading so the exchange's resources go back to the agent.
    pub async fn stream(&self) -> Result<ResponseStream> {
        self.pipeline().stream().await
    }

    /// Sends the request and discards the response body.
    pub async fn send(&self) -> Result<&Self> {
        self.pipeline().send().await?;
        Ok(self)
    }

    /// The whole response body.
    pub async fn bytes(&self) -> Result<Bytes> {
        self.pipeline().bytes().await
    }

    /// The response body decoded with the charset the response declares,
    /// UTF-8 if it declares none.
    pub async fn text(&self) -> Result<String> {
        self.pipeline().text(None).await
    }

    /// The response body decoded as `charset`, whatever the response declares.
    /// A byte order mark still takes precedence.
    pub async fn text_with_charset(&self, charset: &str) -> Result<String> {
        self.pipeline().text(Some(charset)).await
    }

    pub async fn json(&self) -> Result<Arc<Value>> {
        self.pipeline().json().await
    }

    /// The response body as JSON, converted to `T`.
    pub async fn json_into<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.json().await?;
        Ok(T::deserialize(value.as_ref())?)
    }

    pub async fn html(&self) -> Result<Arc<Document>> {
        self.pipeline().document(None).await
    }

    pub async fn html_with_charset(&self, charset: &str) -> Result<Arc<Document>> {
        self.pipeline().document(Some(charset)).await
    }

    /// Stops the request. Before it starts, it never will; while it is in
    /// flight, every view fails with [`RequestError::Cancelled`]. Returns true
    /// if the request had not started.
    pub fn cancel(&self) -> bool {
        self.exec.cancel()
    }

    /// Whether [`cancel`](Self::cancel) was called on this request. Releasing
    /// a completed exchange or hitting the deadline does not count.
    pub fn is_cancelled(&self) -> bool {
        self.exec.is_cancelled()
    }

    /// Progress of the exchange itself.
    pub fn state(&self) -> TaskState {
        self.exec.state()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.exec.outcome()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.outcome().map(|outcome| outcome.status_code)
    }

    pub fn status_message(&self) -> Option<&str> {
        self.outcome().map(|outcome| outcome.status_message.as_str())
    }

    pub fn response_header_list(&self) -> &[(String, String)] {
        self.outcome().map_or(&[], |outcome| &outcome.header_list)
    }

    pub fn response_header_map(&self) -> &[(String, Vec<String>)] {
        self.outcome().map_or(&[], |outcome| &outcome.header_map)
    }

    /// First value of response header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.outcome().and_then(|outcome| outcome.header(name))
    }

    /// The buffered body, once [`bytes`](Self::bytes) or a view built on it
    /// has finished.
    pub fn response_binary(&self) -> Option<&Bytes> {
        self.exec.body()
    }

    /// The configuration and, once known, the response as a JSON object.
    /// Files, body sources, cookie jars and agents are left out.
    pub fn to_json(&self) -> Result<String> {
        let mut value = serde_json::to_value(self).map_err(RequestError::serialization)?;
        let Some(fields) = value.as_object_mut() else {
            return Err(RequestError::serialization("request did not serialize to an object"));
        };

        let outcome = self.outcome();
        fields.insert("statusCode".into(), json!(outcome.map(|o| o.status_code)));
        fields.insert("statusMessage".into(), json!(outcome.map(|o| &o.status_message)));
        fields.insert("responseHeaderList".into(), json!(outcome.map(|o| &o.header_list)));
        fields.insert("responseHeaderMap".into(), json!(outcome.map(|o| &o.header_map)));
        fields.insert("responseBinary".into(), json!(self.response_binary().map(|body| STANDARD.encode(body))));

        serde_json::to_string_pretty(&value).map_err(RequestError::serialization)
    }

    /// Overwrites the configuration fields present in `text`, a JSON object as
    /// written by [`to_json`](Self::to_json). Absent and unknown keys leave
    /// their fields alone; response keys are ignored.
    ///
    /// # Errors
    ///
    /// On malformed JSON or a field of the wrong shape, in which case the
    /// request is left unchanged.
    pub fn overlay_json(&mut self, text: &str) -> Result<()> {
        let Value::Object(incoming) = serde_json::from_str::<Value>(text)? else {
            return Err(RequestError::serialization("expected a JSON object"));
        };

        let Value::Object(mut fields) = serde_json::to_value(&*self).map_err(RequestError::serialization)? else {
            return Err(RequestError::serialization("request did not serialize to an object"));
        };
        merge_known(&mut fields, incoming);

        let parsed: Request = serde_json::from_value(Value::Object(fields)).map_err(RequestError::serialization)?;
        self.apply(parsed);
        Ok(())
    }

    fn apply(&mut self, parsed: Request) {
        let Request {
            method,
            url,
            headers,
            binary,
            form,
            text,
            content_type,
            content_type_header,
            timeout,
            connect_timeout,
            read_timeout,
            write_timeout,
            quick_test,
            follow_redirect,
            proxy,
            auto_send_cookies,
            auto_receive_cookies,
            ..
        } = parsed;

        self.method = method;
        self.url = url;
        self.headers = headers;
        self.binary = binary;
        self.form = form;
        self.text = text;
        self.content_type = content_type;
        self.content_type_header = content_type_header;
        self.timeout = timeout;
        self.connect_timeout = connect_timeout;
        self.read_timeout = read_timeout;
        self.write_timeout = write_timeout;
        self.quick_test = quick_test;
        self.follow_redirect = follow_redirect;
        self.proxy = proxy;
        self.auto_send_cookies = auto_send_cookies;
        self.auto_receive_cookies = auto_receive_cookies;
    }
}

fn merge_known(fields: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        if OUTCOME_KEYS.contains(&key.as_str()) || (value.is_null() && REQUIRED_KEYS.contains(&key.as_str())) {
            continue;
        }
        if let Some(slot) = fields.get_mut(&key) {
            *slot = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyKind;
    use indoc::indoc;

    fn configured() -> Request {
        Request {
            method: Some(Method::PUT),
            url: "https://example.com/items/7".into(),
            headers: vec![("X-Trace".into(), "1".into()), ("X-Trace".into(), "2".into())],
            binary: Some(Bytes::from_static(b"\x01\x02\x03")),
            timeout: Some(Duration::from_millis(2500)),
            read_timeout: Some(Duration::from_secs(3)),
            follow_redirect: Some(false),
            proxy: Some(Proxy::http("proxy.local", 8080)),
            ..Request::default()
        }
    }

    #[test]
    fn json_round_trip() {
        let original = configured();
        let text = original.to_json().unwrap();

        let mut copy = Request::default();
        copy.overlay_json(&text).unwrap();

        assert_eq!(copy.method, original.method);
        assert_eq!(copy.url, original.url);
        assert_eq!(copy.headers, original.headers);
        assert_eq!(copy.binary, original.binary);
        assert_eq!(copy.timeout, original.timeout);
        assert_eq!(copy.read_timeout, original.read_timeout);
        assert_eq!(copy.connect_timeout, None);
        assert_eq!(copy.follow_redirect, Some(false));
        assert_eq!(copy.proxy, original.proxy);
    }

    #[test]
    fn serialized_shape() {
        let value: Value = serde_json::from_str(&configured().to_json().unwrap()).unwrap();
        assert_eq!(value["method"], "PUT");
        assert_eq!(value["binary"], "AQID");
        assert_eq!(value["timeout"], 2500);
        assert_eq!(value["readTimeout"], 3000);
        assert_eq!(value["connectTimeout"], Value::Null);
        assert_eq!(value["proxy"]["type"], "HTTP");
        assert_eq!(value["statusCode"], Value::Null);
        assert_eq!(value["responseBinary"], Value::Null);
        assert!(value.get("file").is_none());
        assert!(value.get("cookieJar").is_none());
    }

    #[test]
    fn overlay_touches_only_present_keys() {
        let mut request = configured();
        request
            .overlay_json(indoc! {r#"
                {
                    "url": "https://example.org/",
                    "connectTimeout": 750,
                    "binary": null,
                    "statusCode": 500,
                    "somethingElse": true
                }
            "#})
            .unwrap();

        assert_eq!(request.url, "https://example.org/");
        assert_eq!(request.connect_timeout, Some(Duration::from_millis(750)));
        assert_eq!(request.binary, None);
        assert_eq!(request.method, Some(Method::PUT));
        assert_eq!(request.proxy.as_ref().map(|p| p.kind), Some(ProxyKind::Http));
        assert_eq!(request.status_code(), None);
    }

    #[test]
    fn null_for_a_required_field_is_skipped() {
        let mut request = configured();
        request.overlay_json(r#"{"url": null, "headers": null, "quickTest": null, "timeout": 5, "proxy": null}"#).unwrap();

        assert_eq!(request.url, "https://example.com/items/7");
        assert_eq!(request.headers.len(), 2);
        assert!(!request.quick_test);
        assert_eq!(request.timeout, Some(Duration::from_millis(5)));
        assert_eq!(request.proxy, None);
    }

    #[test]
    fn bad_overlay_leaves_request_unchanged() {
        let mut request = configured();
        assert!(matches!(request.overlay_json("[1, 2]"), Err(RequestError::Serialization { .. })));
        assert!(matches!(request.overlay_json("{not json"), Err(RequestError::Json { .. })));
        assert!(matches!(request.overlay_json(r#"{"timeout": "soon"}"#), Err(RequestError::Serialization { .. })));
        assert_eq!(request.timeout, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn clone_is_unsent() {
        let request = configured();
        assert!(request.cancel());
        let copy = request.clone();
        assert!(request.is_cancelled());
        assert!(!copy.is_cancelled());
        assert_eq!(copy.url, request.url);
        assert_eq!(copy.state(), TaskState::Unstarted);
    }

    #[tokio::test]
    async fn cancelled_request_never_starts() {
        let agent = Agent::builder().transport(crate::transport::MockTransport::new).build();
        let request = configured().with_agent(&agent);
        assert!(request.cancel());

        assert!(matches!(request.bytes().await, Err(RequestError::Cancelled)));
        assert!(matches!(request.send().await, Err(RequestError::Cancelled)));
        assert_eq!(agent.transports().created(), 0);
        assert_eq!(agent.outstanding(), 0);
    }
}
