//! Per-request cancellation.
//!
//! The slot holds at most one [`ExchangeContext`], installed exactly once by
//! whichever comes first: an explicit cancel or the start of the exchange.
//! A cancel that loses the race cancels the installed context instead; an
//! exchange that loses the race attaches to the installed context and, if it
//! is already cancelled, never starts.

use crate::error::RequestError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

#[derive(Debug)]
pub struct ExchangeContext {
    token: CancellationToken,
    expired: AtomicBool,
}

impl ExchangeContext {
    pub(crate) fn new() -> Self {
        Self { token: CancellationToken::new(), expired: AtomicBool::new(false) }
    }

    fn cancelled_already() -> Self {
        let context = Self::new();
        context.token.cancel();
        context
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// The error a stopped exchange reports.
    pub fn error(&self) -> RequestError {
        if self.expired.load(Ordering::Acquire) { RequestError::TimedOut } else { RequestError::Cancelled }
    }

    /// Cancels the context once `timeout` elapses, unless it is cancelled
    /// first. Timeouts and cancellation stop the exchange the same way.
    pub(crate) fn arm_deadline(self: &Arc<Self>, timeout: Duration) {
        let context = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(timeout) => {
                    debug!(?timeout, "request deadline reached");
                    context.expired.store(true, Ordering::Release);
                    context.token.cancel();
                }
                () = context.token.cancelled() => {}
            }
        });
    }
}

#[derive(Debug, Default)]
pub(crate) struct CancelSlot {
    installed: OnceLock<Arc<ExchangeContext>>,
    requested: AtomicBool,
}

impl CancelSlot {
    /// Cancels the request. Returns true if this call pre-empted the
    /// exchange, false if a context was already installed (it is cancelled
    /// all the same).
    pub(crate) fn cancel(&self) -> bool {
        self.requested.store(true, Ordering::Release);
        let mut installed_now = false;
        let context = self.installed.get_or_init(|| {
            installed_now = true;
            Arc::new(ExchangeContext::cancelled_already())
        });
        if !installed_now {
            context.cancel();
        }
        installed_now
    }

    /// The installed context, installing a live one if none exists yet.
    pub(crate) fn context(&self) -> Arc<ExchangeContext> {
        Arc::clone(self.installed.get_or_init(|| Arc::new(ExchangeContext::new())))
    }

    /// Whether [`cancel`](Self::cancel) was called. A context released after
    /// a completed exchange is cancelled too, but does not count.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}
