//! One-shot memoized tasks.
//!
//! A [`OnceTask`] starts its job on first access only, runs it on the tokio
//! executor so it finishes even if every waiter goes away, and hands the same
//! settlement, value or error, to every current and future waiter.

use crate::error::{RequestError, Result};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::fmt;
use std::future::Future;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Unstarted,
    Running,
    Fulfilled,
    Rejected,
}

pub(crate) struct OnceTask<T> {
    name: &'static str,
    settlement: OnceLock<Shared<BoxFuture<'static, Result<T>>>>,
}

impl<T> OnceTask<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(name: &'static str) -> Self {
        Self { name, settlement: OnceLock::new() }
    }

    /// Runs `job` if nobody has yet, then waits for the settlement.
    ///
    /// `job` is only called by the first caller; later and concurrent callers
    /// drop theirs unused.
    pub(crate) async fn get_or_run<F, Fut>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let settlement = self
            .settlement
            .get_or_init(|| {
                debug!(task = self.name, "task started");
                let handle = tokio::spawn(job());
                let name = self.name;
                async move {
                    let result = handle.await.unwrap_or_else(|e| Err(RequestError::aborted(e)));
                    debug!(task = name, ok = result.is_ok(), "task settled");
                    result
                }
                .boxed()
                .shared()
            })
            .clone();

        settlement.await
    }

    pub(crate) fn state(&self) -> TaskState {
        match self.settlement.get().map(Shared::peek) {
            None => TaskState::Unstarted,
            Some(None) => TaskState::Running,
            Some(Some(Ok(_))) => TaskState::Fulfilled,
            Some(Some(Err(_))) => TaskState::Rejected,
        }
    }
}

impl<T> fmt::Debug for OnceTask<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceTask").field("name", &self.name).field("state", &self.state()).finish()
    }
}
