//! The pooled client: one exchange over one transport.
//!
//! A transport performs single round trips. The client layers redirects and
//! cookies on top, and stops as soon as the request's context is cancelled.

use crate::body::OutgoingBody;
use crate::context::ExchangeContext;
use crate::cookie::{Cookie, FlexibleJar};
use crate::error::{RequestError, Result};
use crate::transport::{OutgoingRequest, Transport, TransportResponse};
use crate::utils::ensure;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use http::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub follow_redirect: bool,
    pub cookie_jar: Option<FlexibleJar>,
}

#[derive(Debug, Default)]
pub struct Client {
    timeout: Duration,
    follow_redirect: bool,
    cookie_jar: Option<FlexibleJar>,
    visited: Vec<Url>,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepares a pooled client for the next exchange; nothing from the
    /// previous checkout survives.
    pub fn configure(&mut self, config: ClientConfig) {
        self.timeout = config.timeout;
        self.follow_redirect = config.follow_redirect;
        self.cookie_jar = config.cookie_jar;
        self.visited.clear();
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Urls requested by the last exchange, redirects included.
    pub fn visited(&self) -> &[Url] {
        &self.visited
    }

    pub async fn execute(
        &mut self,
        transport: &dyn Transport,
        request: OutgoingRequest,
        context: &Arc<ExchangeContext>,
    ) -> Result<TransportResponse> {
        // the deadline also covers reading the body, so it outlives this call
        context.arm_deadline(self.timeout);
        tokio::select! {
            biased;
            () = context.cancelled() => Err(context.error()),
            response = self.follow(transport, request) => response,
        }
    }

    async fn follow(&mut self, transport: &dyn Transport, mut request: OutgoingRequest) -> Result<TransportResponse> {
        let origin_host = request.url.host_str().map(str::to_owned);

        loop {
            self.visited.push(request.url.clone());
            let replay = request.body.try_clone();
            let had_body = !request.body.is_empty();
            let method = request.method.clone();
            let url = request.url.clone();
            let headers = request.headers.clone();

            if let Some(cookie) = self.cookie_jar.as_ref().and_then(|jar| jar.cookie_header(&url)) {
                request.headers.push((COOKIE.as_str().to_owned(), cookie));
            }

            let response = transport.round_trip(request).await?;
            self.store_cookies(&url, &response);
            debug!(%url, status = %response.status, "round trip finished");

            if !self.follow_redirect {
                return Ok(response);
            }
            let Some(location) = response.header_values(LOCATION.as_str()).next() else {
                return Ok(response);
            };

            let (next_method, next_body) = match response.status {
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => {
                    let next = if method == Method::HEAD { Method::HEAD } else { Method::GET };
                    (next, OutgoingBody::Empty)
                }
                StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => match replay {
                    Some(body) => (method, body),
                    None if had_body => {
                        debug!(%url, "body can't be replayed, returning the redirect response");
                        return Ok(response);
                    }
                    None => (method, OutgoingBody::Empty),
                },
                _ => return Ok(response),
            };

            let hops = self.visited.len();
            ensure!(hops <= MAX_REDIRECTS, RequestError::TooManyRedirects { max_hops: MAX_REDIRECTS });

            let next_url = url.join(location).map_err(|e| RequestError::invalid_url(location, e))?;
            info!(from = %url, to = %next_url, status = %response.status, "following redirect");
            drop(response);

            let leaves_origin = next_url.host_str() != origin_host.as_deref();
            let drops_body = next_body.is_empty();
            let headers = headers
                .into_iter()
                .filter(|(name, _)| {
                    let sensitive = name.eq_ignore_ascii_case(AUTHORIZATION.as_str()) || name.eq_ignore_ascii_case(COOKIE.as_str());
                    let describes_body =
                        name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) || name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str());
                    !(leaves_origin && sensitive) && !(drops_body && describes_body)
                })
                .collect();

            request = OutgoingRequest { method: next_method, url: next_url, headers, body: next_body };
        }
    }

    fn store_cookies(&self, url: &Url, response: &TransportResponse) {
        let Some(jar) = &self.cookie_jar else {
            return;
        };
        let cookies: Vec<Cookie<'static>> = response
            .header_values(SET_COOKIE.as_str())
            .filter_map(|value| Cookie::parse(value.to_owned()).ok())
            .collect();
        if !cookies.is_empty() {
            jar.set_cookies(url, cookies);
        }
    }
}
