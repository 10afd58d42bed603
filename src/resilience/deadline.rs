//! Per-exchange deadline enforcement.
//!
//! # Responsibilities
//! - Hold the configured upload-pack timeout (mutable, read once per exchange)
//! - Derive an `ExchangeContext` bound to a parent cancellation token
//! - Record exactly one cancellation reason (first writer wins)
//!
//! # Design Decisions
//! - The timeout is injected at construction; no process-wide static
//! - A small timer task owns the deadline so every holder of the context
//!   observes cancellation without polling a clock
//! - `CancellationToken` from tokio-util is the wake-up primitive

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why an exchange context was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The configured timeout elapsed.
    DeadlineExceeded,
    /// The parent (the inbound request) went away.
    ClientAborted,
    /// The exchange finished, or a participant failed and tore it down.
    Done,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::DeadlineExceeded => "deadline_exceeded",
            CancelReason::ClientAborted => "client_aborted",
            CancelReason::Done => "done",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces exchange contexts from a configured timeout.
///
/// Cloning is cheap; clones share the timeout value.
#[derive(Debug, Clone)]
pub struct DeadlineController {
    timeout_us: Arc<AtomicU64>,
}

impl DeadlineController {
    /// Create a controller with the given per-exchange timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout_us: Arc::new(AtomicU64::new(duration_to_us(timeout))),
        }
    }

    /// Current timeout applied to newly created exchanges.
    pub fn timeout(&self) -> Duration {
        Duration::from_micros(self.timeout_us.load(Ordering::Acquire))
    }

    /// Change the timeout. Exchanges that already started keep their deadline.
    pub fn set_timeout(&self, timeout: Duration) {
        let previous = self.timeout_us.swap(duration_to_us(timeout), Ordering::AcqRel);
        tracing::debug!(
            previous_ms = previous / 1000,
            timeout_ms = timeout.as_millis() as u64,
            "Upload-pack timeout updated"
        );
    }

    /// Start an exchange bound to `parent`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn begin(&self, parent: &CancellationToken) -> ExchangeContext {
        let timeout = self.timeout();
        let ctx = ExchangeContext {
            inner: Arc::new(ContextInner {
                token: CancellationToken::new(),
                reason: OnceLock::new(),
                deadline: Instant::now() + timeout,
                timeout,
            }),
        };

        let watcher = ctx.clone();
        let parent = parent.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watcher.inner.token.cancelled() => {}
                _ = parent.cancelled() => watcher.cancel(CancelReason::ClientAborted),
                _ = tokio::time::sleep_until(watcher.inner.deadline) => {
                    watcher.cancel(CancelReason::DeadlineExceeded)
                }
            }
        });

        ctx
    }
}

fn duration_to_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

#[derive(Debug)]
struct ContextInner {
    token: CancellationToken,
    reason: OnceLock<CancelReason>,
    deadline: Instant,
    timeout: Duration,
}

/// Cancellation handle scoped to a single upload-pack exchange.
#[derive(Debug, Clone)]
pub struct ExchangeContext {
    inner: Arc<ContextInner>,
}

impl ExchangeContext {
    /// Cancel the exchange. Only the first reason is recorded.
    pub fn cancel(&self, reason: CancelReason) {
        if self.inner.reason.set(reason).is_ok() {
            tracing::trace!(reason = %reason, "Exchange context cancelled");
        }
        self.inner.token.cancel();
    }

    /// Resolves once the context is cancelled, yielding the recorded reason.
    pub async fn cancelled(&self) -> CancelReason {
        self.inner.token.cancelled().await;
        self.reason().unwrap_or(CancelReason::Done)
    }

    /// The recorded cancellation reason, if any.
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason.get().copied()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Fail fast when the context is already cancelled.
    ///
    /// An expired deadline counts even if the timer task has not run yet.
    pub fn check(&self) -> Result<(), CancelReason> {
        if !self.is_cancelled() && Instant::now() >= self.inner.deadline {
            self.cancel(CancelReason::DeadlineExceeded);
        }
        match self.reason() {
            Some(reason) => Err(reason),
            None if self.is_cancelled() => Err(CancelReason::Done),
            None => Ok(()),
        }
    }

    /// Drive `fut` until it completes or the context is cancelled.
    ///
    /// Cancellation is checked first, so nothing progresses once cancelled.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, CancelReason> {
        tokio::select! {
            biased;
            reason = self.cancelled() => Err(reason),
            out = fut => Ok(out),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.inner.deadline
    }

    /// The timeout this exchange was started with.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Cancel with `Done` when the returned guard drops.
    pub fn finish_on_drop(&self) -> FinishGuard {
        FinishGuard { ctx: self.clone() }
    }
}

/// Marks an exchange finished on drop, stopping its timer task.
#[derive(Debug)]
pub struct FinishGuard {
    ctx: ExchangeContext,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.ctx.cancel(CancelReason::Done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_cancels_with_reason() {
        let controller = DeadlineController::new(Duration::from_millis(20));
        let parent = CancellationToken::new();
        let ctx = controller.begin(&parent);

        let started = std::time::Instant::now();
        let reason = ctx.cancelled().await;
        assert_eq!(reason, CancelReason::DeadlineExceeded);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(ctx.check(), Err(CancelReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn parent_cancel_means_client_aborted() {
        let controller = DeadlineController::new(Duration::from_secs(60));
        let parent = CancellationToken::new();
        let ctx = controller.begin(&parent);

        parent.cancel();
        assert_eq!(ctx.cancelled().await, CancelReason::ClientAborted);
    }

    #[tokio::test]
    async fn first_reason_wins() {
        let controller = DeadlineController::new(Duration::from_millis(10));
        let ctx = controller.begin(&CancellationToken::new());

        ctx.cancel(CancelReason::Done);
        tokio::time::sleep(Duration::from_millis(30)).await;
        ctx.cancel(CancelReason::ClientAborted);

        assert_eq!(ctx.reason(), Some(CancelReason::Done));
        assert_eq!(ctx.cancelled().await, CancelReason::Done);
    }

    #[tokio::test]
    async fn finish_guard_marks_done() {
        let controller = DeadlineController::new(Duration::from_secs(60));
        let ctx = controller.begin(&CancellationToken::new());
        {
            let _guard = ctx.finish_on_drop();
            assert!(ctx.check().is_ok());
        }
        assert_eq!(ctx.reason(), Some(CancelReason::Done));
    }

    #[tokio::test]
    async fn timeout_change_is_not_retroactive() {
        let controller = DeadlineController::new(Duration::from_secs(60));
        let before = controller.begin(&CancellationToken::new());

        controller.set_timeout(Duration::from_millis(5));
        let after = controller.begin(&CancellationToken::new());

        assert_eq!(before.timeout(), Duration::from_secs(60));
        assert_eq!(after.timeout(), Duration::from_millis(5));
        assert_eq!(after.cancelled().await, CancelReason::DeadlineExceeded);
        assert!(before.check().is_ok());
    }

    #[tokio::test]
    async fn check_fails_fast_on_zero_timeout() {
        let controller = DeadlineController::new(Duration::ZERO);
        let ctx = controller.begin(&CancellationToken::new());
        assert_eq!(ctx.check(), Err(CancelReason::DeadlineExceeded));
    }
}
