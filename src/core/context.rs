//! Per-run handles passed to every lifecycle operation: the cancellation
//! token, the ability to ask the host process to stop, and the tracing span
//! the run logs under.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{warn, Span};

use super::error::{ReportError, ReportResult};

#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    shutdown: ShutdownRequest,
    span: Span,
}

impl RunContext {
    pub fn new(span: Span) -> Self {
        Self {
            cancel: CancellationToken::new(),
            shutdown: ShutdownRequest::default(),
            span,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Clone handed to signal handlers.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn shutdown(&self) -> &ShutdownRequest {
        &self.shutdown
    }

    /// Asks the host to stop the process and cancels this run.
    pub async fn request_shutdown(&self, reason: impl Into<String>) {
        self.shutdown.request(reason).await;
        self.cancel.cancel();
    }

    /// Runs `fut` unless the run is cancelled first.
    ///
    /// Cancellation wins ties, so nothing new starts once it is requested.
    pub async fn guard<F>(&self, fut: F) -> ReportResult<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReportError::Cancelled),
            output = fut => Ok(output),
        }
    }

    /// Cancellable sleep.
    pub async fn sleep(&self, duration: Duration) -> ReportResult<()> {
        self.guard(tokio::time::sleep(duration)).await
    }
}

/// One-way latch a failed run uses to ask the host process to exit.
#[derive(Debug, Clone, Default)]
pub struct ShutdownRequest {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl ShutdownRequest {
    /// The first reason wins; later requests are ignored.
    pub async fn request(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut slot = self.reason.lock().await;
        if slot.is_none() {
            warn!("Process shutdown requested: {reason}");
            *slot = Some(reason);
        }
        self.token.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn reason(&self) -> Option<String> {
        self.reason.lock().await.clone()
    }
}
