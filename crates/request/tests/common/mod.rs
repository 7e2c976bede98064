// Shared stub transports for the integration tests.
#![allow(dead_code, reason = "each test binary uses a subset")]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use http::StatusCode;
use micro_request::RequestError;
use micro_request::transport::{OutgoingRequest, Transport, TransportConfig, TransportResponse};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What the stub saw, shared by every transport a factory builds.
#[derive(Debug, Default)]
pub struct Recorder {
    pub round_trips: AtomicUsize,
    pub configs: Mutex<Vec<TransportConfig>>,
    pub requests: Mutex<Vec<(String, String, Vec<(String, String)>)>>,
}

impl Recorder {
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Respond { status: u16, headers: Vec<(String, String)>, body: Vec<&'static [u8]> },
    Fail,
    /// Never answers; only cancellation ends the round trip.
    Hang,
}

impl Reply {
    pub fn ok(body: &'static [u8]) -> Self {
        Reply::Respond { status: 200, headers: Vec::new(), body: vec![body] }
    }

    pub fn with_headers(status: u16, headers: &[(&str, &str)], body: &'static [u8]) -> Self {
        Reply::Respond {
            status,
            headers: headers.iter().map(|(n, v)| ((*n).to_owned(), (*v).to_owned())).collect(),
            body: vec![body],
        }
    }
}

#[derive(Debug)]
pub struct StubTransport {
    recorder: Arc<Recorder>,
    reply: Reply,
    delay: Duration,
}

impl StubTransport {
    pub fn factory(recorder: &Arc<Recorder>, reply: Reply) -> impl Fn() -> StubTransport + Send + Sync + 'static {
        Self::factory_with_delay(recorder, reply, Duration::ZERO)
    }

    pub fn factory_with_delay(
        recorder: &Arc<Recorder>,
        reply: Reply,
        delay: Duration,
    ) -> impl Fn() -> StubTransport + Send + Sync + 'static {
        let recorder = Arc::clone(recorder);
        move || StubTransport { recorder: Arc::clone(&recorder), reply: reply.clone(), delay }
    }
}

#[async_trait]
impl Transport for StubTransport {
    fn configure(&mut self, config: &TransportConfig) -> micro_request::Result<()> {
        self.recorder.configs.lock().push(config.clone());
        Ok(())
    }

    async fn round_trip(&self, request: OutgoingRequest) -> micro_request::Result<TransportResponse> {
        self.recorder.round_trips.fetch_add(1, Ordering::SeqCst);
        self.recorder.requests.lock().push((request.method.to_string(), request.url.to_string(), request.headers.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.reply {
            Reply::Respond { status, headers, body } => {
                let chunks: Vec<io::Result<Bytes>> = body.iter().map(|chunk| Ok(Bytes::from_static(chunk))).collect();
                Ok(TransportResponse {
                    status: StatusCode::from_u16(*status).map_err(RequestError::transport)?,
                    headers: headers.clone(),
                    body: stream::iter(chunks).boxed(),
                })
            }
            Reply::Fail => Err(RequestError::transport(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))),
            Reply::Hang => {
                futures::future::pending::<()>().await;
                Err(RequestError::aborted("unreachable"))
            }
        }
    }
}
