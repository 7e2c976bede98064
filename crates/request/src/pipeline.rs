//! The per-request task graph.
//!
//! ```text
//! stream ──┬── send
//!          └── bytes ──┬── text / text(charset) ── document / document(charset)
//!                      └── json
//! ```
//!
//! `stream` performs the exchange. Every other node derives from its parent
//! and is started by its first access only, so a request is sent at most once
//! no matter how many views are awaited, in what order or from how many tasks.

use crate::agent::Agent;
use crate::builder::Plan;
use crate::charset;
use crate::client::Client;
use crate::context::{CancelSlot, ExchangeContext};
use crate::error::{RequestError, Result};
use crate::markup::Document;
use crate::pool::Pooled;
use crate::task::{OnceTask, TaskState};
use crate::transport::{ByteStream, Transport, TransportResponse};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info};

/// What the server answered, captured once the exchange completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status_code: u16,
    /// Code and reason phrase, e.g. `200 OK`.
    pub status_message: String,
    pub header_list: Vec<(String, String)>,
    /// Headers grouped by name in first-seen order, values in received order.
    pub header_map: Vec<(String, Vec<String>)>,
}

impl Outcome {
    fn from_response(response: &TransportResponse) -> Self {
        let status = response.status;
        let status_message = match status.canonical_reason() {
            Some(reason) => format!("{} {reason}", status.as_u16()),
            None => status.as_u16().to_string(),
        };

        let mut header_map: Vec<(String, Vec<String>)> = Vec::new();
        for (name, value) in &response.headers {
            match header_map.iter_mut().find(|(known, _)| known.eq_ignore_ascii_case(name)) {
                Some((_, values)) => values.push(value.clone()),
                None => header_map.push((name.clone(), vec![value.clone()])),
            }
        }

        Self { status_code: status.as_u16(), status_message, header_list: response.headers.clone(), header_map }
    }

    /// Every value of header `name`, compared case-insensitively.
    pub fn header_values(&self, name: &str) -> &[String] {
        self.header_map.iter().find(|(known, _)| known.eq_ignore_ascii_case(name)).map_or(&[], |(_, values)| values)
    }

    /// The first value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).first().map(String::as_str)
    }
}

/// The pooled objects an exchange holds until it is done.
struct Lease {
    // returned to its pool when the lease drops
    _transport: Pooled<Box<dyn Transport>>,
    client: Pooled<Client>,
    context: Arc<ExchangeContext>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.context.cancel();
        debug!(visited = self.client.visited().len(), "exchange released");
    }
}

/// The streaming result of an exchange.
///
/// Handles are cheap clones of one response. Call [`ResponseStream::done`]
/// when finished with the body: it drains what is left, returns the pooled
/// transport and client, and cancels the request's context. Dropping the
/// request does the same without draining.
#[derive(Clone)]
pub struct ResponseStream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    status: StatusCode,
    body: tokio::sync::Mutex<Option<ByteStream>>,
    lease: Mutex<Option<Lease>>,
    context: Arc<ExchangeContext>,
}

impl ResponseStream {
    fn new(status: StatusCode, body: ByteStream, lease: Lease) -> Self {
        let context = Arc::clone(&lease.context);
        Self {
            inner: Arc::new(StreamInner {
                status,
                body: tokio::sync::Mutex::new(Some(body)),
                lease: Mutex::new(Some(lease)),
                context,
            }),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status
    }

    /// The next chunk of the body, or `None` at the end or after
    /// [`done`](Self::done).
    pub async fn chunk(&self) -> Option<Result<Bytes>> {
        let mut body = self.inner.body.lock().await;
        let stream = body.as_mut()?;
        let context = &self.inner.context;
        tokio::select! {
            biased;
            () = context.cancelled() => Some(Err(context.error())),
            next = stream.next() => next.map(|chunk| chunk.map_err(RequestError::from)),
        }
    }

    /// Reads the rest of the body into one buffer.
    ///
    /// # Errors
    ///
    /// [`RequestError::BodyConsumed`] once the body has been read to the end
    /// or discarded.
    pub async fn read_to_end(&self) -> Result<Bytes> {
        let mut body = self.inner.body.lock().await;
        let Some(stream) = body.as_mut() else {
            return Err(RequestError::BodyConsumed);
        };

        let context = &self.inner.context;
        let mut buf = BytesMut::new();
        loop {
            let next = tokio::select! {
                biased;
                () = context.cancelled() => return Err(context.error()),
                next = stream.next() => next,
            };
            match next {
                Some(chunk) => buf.extend_from_slice(&chunk?),
                None => break,
            }
        }

        *body = None;
        Ok(buf.freeze())
    }

    /// Finishes the exchange. Idempotent.
    pub async fn done(&self) {
        let mut body = self.inner.body.lock().await;
        if let Some(mut stream) = body.take() {
            let context = &self.inner.context;
            let mut drained = 0;
            loop {
                let next = tokio::select! {
                    biased;
                    () = context.cancelled() => break,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(chunk)) => drained += chunk.len(),
                    _ => break,
                }
            }
            debug!(drained, "unread response body drained");
        }
        drop(body);

        let lease = self.inner.lease.lock().take();
        drop(lease);
    }

    pub fn is_done(&self) -> bool {
        self.inner.lease.lock().is_none()
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream").field("status", &self.inner.status).field("done", &self.is_done()).finish()
    }
}

type Keyed<T> = Mutex<HashMap<String, Arc<OnceTask<T>>>>;

/// Execution state of one request descriptor.
pub(crate) struct Execution {
    plan: OnceLock<Result<Arc<Plan>>>,
    cancel: CancelSlot,
    outcome: OnceLock<Outcome>,
    body: OnceLock<Bytes>,
    body_claimed: AtomicBool,

    stream: OnceTask<ResponseStream>,
    send: OnceTask<()>,
    bytes: OnceTask<Bytes>,
    text: OnceTask<String>,
    text_with_charset: Keyed<String>,
    json: OnceTask<Arc<Value>>,
    document: OnceTask<Arc<Document>>,
    document_with_charset: Keyed<Arc<Document>>,
}

impl Default for Execution {
    fn default() -> Self {
        Self {
            plan: OnceLock::new(),
            cancel: CancelSlot::default(),
            outcome: OnceLock::new(),
            body: OnceLock::new(),
            body_claimed: AtomicBool::new(false),
            stream: OnceTask::new("stream"),
            send: OnceTask::new("send"),
            bytes: OnceTask::new("bytes"),
            text: OnceTask::new("text"),
            text_with_charset: Mutex::new(HashMap::new()),
            json: OnceTask::new("json"),
            document: OnceTask::new("document"),
            document_with_charset: Mutex::new(HashMap::new()),
        }
    }
}

impl Execution {
    /// Fixes the plan on first use; the request's fields are not read again.
    pub(crate) fn prepare<F>(&self, build: F)
    where
        F: FnOnce() -> Result<Plan>,
    {
        self.plan.get_or_init(|| build().map(Arc::new));
    }

    fn plan(&self) -> Result<Arc<Plan>> {
        match self.plan.get() {
            Some(Ok(plan)) => Ok(Arc::clone(plan)),
            Some(Err(e)) => Err(e.clone()),
            None => Err(RequestError::aborted("request was not prepared")),
        }
    }

    pub(crate) fn agent(&self) -> Option<Arc<Agent>> {
        match self.plan.get() {
            Some(Ok(plan)) => Some(Arc::clone(&plan.agent)),
            _ => None,
        }
    }

    pub(crate) fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn outcome(&self) -> Option<&Outcome> {
        self.outcome.get()
    }

    pub(crate) fn body(&self) -> Option<&Bytes> {
        self.body.get()
    }

    pub(crate) fn state(&self) -> TaskState {
        self.stream.state()
    }

    pub(crate) async fn stream(self: &Arc<Self>) -> Result<ResponseStream> {
        let this = Arc::clone(self);
        self.stream.get_or_run(move || this.exchange()).await
    }

    async fn exchange(self: Arc<Self>) -> Result<ResponseStream> {
        let plan = self.plan()?;
        let context = self.cancel.context();
        if context.is_cancelled() {
            debug!(url = %plan.url, "cancelled before the exchange started");
            return Err(context.error());
        }

        let (response, lease) = match Self::start(&plan, &context).await {
            Ok(started) => started,
            Err(e) => {
                error!(cause = %e, method = %plan.method, url = %plan.url, "exchange failed");
                context.cancel();
                return Err(e);
            }
        };

        let outcome = Outcome::from_response(&response);
        info!(method = %plan.method, url = %plan.url, status = %outcome.status_message, "exchange completed");
        let _ = self.outcome.set(outcome);

        Ok(ResponseStream::new(response.status, response.body, lease))
    }

    /// Checks out and configures a transport and a client and runs the
    /// exchange. On failure the checkouts go straight back to their pools.
    async fn start(plan: &Plan, context: &Arc<ExchangeContext>) -> Result<(TransportResponse, Lease)> {
        let target = plan.target()?;
        let outgoing = plan.outgoing(target.clone()).await?;

        let mut transport = plan.agent.transports().checkout();
        transport.configure(&plan.transport_config(&target))?;
        let mut client = plan.agent.clients().checkout();
        client.configure(plan.client_config());

        let response = client.execute(&**transport, outgoing, context).await?;
        Ok((response, Lease { _transport: transport, client, context: Arc::clone(context) }))
    }

    pub(crate) async fn send(self: &Arc<Self>) -> Result<()> {
        let this = Arc::clone(self);
        self.send
            .get_or_run(move || async move {
                let stream = this.stream().await?;
                if this.body_claimed.load(Ordering::Acquire) {
                    // the body is being buffered; that view finishes the exchange
                    let _ = this.bytes().await;
                } else {
                    stream.done().await;
                }
                Ok(())
            })
            .await
    }

    pub(crate) async fn bytes(self: &Arc<Self>) -> Result<Bytes> {
        self.body_claimed.store(true, Ordering::Release);
        let this = Arc::clone(self);
        self.bytes
            .get_or_run(move || async move {
                let stream = this.stream().await?;
                let read = stream.read_to_end().await;
                stream.done().await;

                let body = read?;
                debug!(len = body.len(), "response body buffered");
                let _ = this.body.set(body.clone());
                Ok(body)
            })
            .await
    }

    pub(crate) async fn text(self: &Arc<Self>, charset: Option<&str>) -> Result<String> {
        let label = charset.map(|label| label.trim().to_ascii_lowercase());
        let this = Arc::clone(self);
        let job = {
            let label = label.clone();
            move || async move {
                let body = this.bytes().await?;
                let content_type = this.outcome().and_then(|outcome| outcome.header(CONTENT_TYPE.as_str())).map(str::to_owned);
                charset::decode(&body, label.as_deref(), content_type.as_deref())
            }
        };

        match label {
            None => self.text.get_or_run(job).await,
            Some(label) => keyed(&self.text_with_charset, &label, "text_with_charset").get_or_run(job).await,
        }
    }

    pub(crate) async fn json(self: &Arc<Self>) -> Result<Arc<Value>> {
        let this = Arc::clone(self);
        self.json
            .get_or_run(move || async move {
                let body = this.bytes().await?;
                let value: Value = serde_json::from_slice(&body)?;
                Ok(Arc::new(value))
            })
            .await
    }

    pub(crate) async fn document(self: &Arc<Self>, charset: Option<&str>) -> Result<Arc<Document>> {
        let label = charset.map(|label| label.trim().to_ascii_lowercase());
        let this = Arc::clone(self);
        let job = {
            let label = label.clone();
            move || async move {
                let text = this.text(label.as_deref()).await?;
                Ok(Arc::new(Document::parse(&text)))
            }
        };

        match label {
            None => self.document.get_or_run(job).await,
            Some(label) => keyed(&self.document_with_charset, &label, "document_with_charset").get_or_run(job).await,
        }
    }
}

fn keyed<T>(tasks: &Keyed<T>, key: &str, name: &'static str) -> Arc<OnceTask<T>>
where
    T: Clone + Send + Sync + 'static,
{
    Arc::clone(tasks.lock().entry(key.to_owned()).or_insert_with(|| Arc::new(OnceTask::new(name))))
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("stream", &self.stream.state())
            .field("bytes", &self.bytes.state())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("outcome", &self.outcome.get())
            .finish_non_exhaustive()
    }
}
