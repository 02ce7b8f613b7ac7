//! Bounded offload of blocking backend calls.
//!
//! Provider SDK calls run on tokio's blocking threads, at most
//! `max_concurrent` at a time, each under an explicit timeout. The async
//! caller only ever awaits a join handle, so a slow provider never stalls
//! the runtime driving the other periodic tasks.
//!
//! On timeout the caller gets [`BackendError::Timeout`] immediately. The
//! blocking thread cannot be interrupted; it keeps its permit until the
//! provider call returns, so abandoned calls still count against the bound.
//!
//! Calls that create provider resources use [`BlockingPool::spawn`]
//! instead: a [`PendingCall`] that outlives its wait can still be awaited
//! for the late result, so whatever the provider created is not lost.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{BackendError, BackendResult, CallError};

#[derive(Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl BlockingPool {
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a blocking backend call with the pool's default timeout.
    pub async fn run<T, F>(&self, call: F) -> Result<T, CallError>
    where
        F: FnOnce() -> BackendResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_with_timeout(self.timeout, call).await
    }

    /// Run a blocking backend call. Waiting for a permit counts against
    /// the timeout; a call still waiting for one when the timeout fires
    /// never starts.
    pub async fn run_with_timeout<T, F>(&self, timeout: Duration, call: F) -> Result<T, CallError>
    where
        F: FnOnce() -> BackendResult<T> + Send + 'static,
        T: Send + 'static,
    {
        match self.spawn(call).wait(timeout).await {
            Ok(result) => result,
            Err(pending) => {
                pending.abandon();
                Err(CallError::Backend(BackendError::Timeout(timeout)))
            }
        }
    }

    /// Start a blocking backend call without waiting for it.
    pub fn spawn<T, F>(&self, call: F) -> PendingCall<T>
    where
        F: FnOnce() -> BackendResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let handle = tokio::spawn(async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| CallError::PoolClosed)?;
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                call()
            });
            match handle.await {
                Ok(result) => result.map_err(CallError::Backend),
                Err(e) => Err(CallError::Panicked(e.to_string())),
            }
        });
        PendingCall { handle }
    }

    /// Number of calls that could start right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// A backend call in flight.
#[must_use = "a pending call should be waited for or abandoned"]
pub struct PendingCall<T> {
    handle: JoinHandle<Result<T, CallError>>,
}

impl<T> PendingCall<T> {
    /// Wait up to `timeout`. A call still running is handed back so the
    /// caller can keep waiting for it elsewhere.
    pub async fn wait(mut self, timeout: Duration) -> Result<Result<T, CallError>, PendingCall<T>> {
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(joined) => Ok(flatten(joined)),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "backend call timed out");
                Err(self)
            }
        }
    }

    /// Wait for the call however long it takes.
    pub async fn finish(self) -> Result<T, CallError> {
        flatten(self.handle.await)
    }

    /// Stop caring about the result. A call that has not started yet is
    /// cancelled; one already running on a blocking thread completes.
    pub fn abandon(self) {
        self.handle.abort();
    }
}

fn flatten<T>(joined: Result<Result<T, CallError>, tokio::task::JoinError>) -> Result<T, CallError> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(CallError::Panicked(e.to_string())),
    }
}
