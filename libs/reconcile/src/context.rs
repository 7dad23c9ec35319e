//! Cancellation and deadline context for backend calls.
//!
//! Every backend round trip and every wait-for-completion runs under a
//! [`Context`]. When the context is cancelled (shutdown) or its deadline
//! passes, the in-flight future is dropped and [`Interrupted`] is returned.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a context-bound operation was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation signal plus optional deadline.
///
/// Cloning is cheap; clones observe the same cancel signal.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context cancelled when `true` is sent on the shutdown channel.
    pub fn with_cancel(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            cancel: Some(shutdown),
            deadline: None,
        }
    }

    /// Derive a child context that also expires after `timeout`.
    ///
    /// The child keeps the earlier of its parent's deadline and the new one.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(match self.deadline {
                Some(existing) if existing < deadline => existing,
                _ => deadline,
            }),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the interruption if the context is already done.
    pub fn err(&self) -> Option<Interrupted> {
        if let Some(rx) = &self.cancel {
            if *rx.borrow() {
                return Some(Interrupted::Cancelled);
            }
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interrupted::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or expires.
    pub async fn done(&self) -> Interrupted {
        let cancelled = async {
            let Some(mut rx) = self.cancel.clone() else {
                return std::future::pending::<Interrupted>().await;
            };
            loop {
                if *rx.borrow_and_update() {
                    return Interrupted::Cancelled;
                }
                // Sender gone: nobody can cancel any more.
                if rx.changed().await.is_err() {
                    return std::future::pending::<Interrupted>().await;
                }
            }
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => {
                    tokio::time::sleep_until(deadline).await;
                    Interrupted::DeadlineExceeded
                }
                None => std::future::pending::<Interrupted>().await,
            }
        };

        tokio::select! {
            reason = cancelled => reason,
            reason = expired => reason,
        }
    }

    /// Run `fut` under this context.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, Interrupted>
    where
        F: Future<Output = T>,
    {
        if let Some(reason) = self.err() {
            return Err(reason);
        }
        tokio::select! {
            biased;
            reason = self.done() => Err(reason),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = Context::background();
        assert_eq!(ctx.run(async { 42 }).await, Ok(42));
        assert!(ctx.err().is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let (tx, rx) = watch::channel(false);
        let ctx = Context::with_cancel(rx);
        tx.send(true).unwrap();

        let result = ctx.run(async { 1 }).await;
        assert_eq!(result, Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_aborts_inflight_wait() {
        let (tx, rx) = watch::channel(false);
        let ctx = Context::with_cancel(rx);

        let handle = tokio::spawn(async move {
            ctx.run(std::future::pending::<()>()).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let result = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(result, Err(Interrupted::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_child_keeps_earlier_deadline() {
        let parent = Context::background().with_timeout(Duration::from_millis(50));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn test_dropped_sender_never_cancels() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let ctx = Context::with_cancel(rx).with_timeout(Duration::from_millis(10));
        let result = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(result, Err(Interrupted::DeadlineExceeded));
    }
}
