//! Cooperative cancellation for long-running operations.
//!
//! A [`CancellationToken`] is a one-shot flag: once cancellation has been
//! requested it stays requested. There is no reset, so every user-initiated
//! operation gets a fresh token.
//!
//! Loops poll [`CancellationToken::is_cancelled`] at their iteration
//! boundaries. Code that is parked on network I/O awaits
//! [`CancellationToken::cancelled`] alongside the I/O and drops the
//! connection when it fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A thread-safe, one-shot cancellation flag.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
    requested: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    ///
    /// Idempotent: only the first call has an effect. Returns `true` if this
    /// call flipped the flag.
    pub fn request_cancel(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::SeqCst);
        if first {
            tracing::debug!("Cancellation requested");
            self.inner.cancel();
        }
        first
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Completes once cancellation has been requested.
    ///
    /// Completes immediately if it already was.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_new_token_is_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_request_cancel_is_idempotent() {
        let token = CancellationToken::new();
        assert!(token.request_cancel());
        assert!(!token.request_cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.request_cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_from_other_thread() {
        let token = CancellationToken::new();
        let remote = token.clone();
        std::thread::spawn(move || {
            remote.request_cancel();
        })
        .join()
        .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_wakes() {
        let token = CancellationToken::new();
        let remote = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            remote.request_cancel();
        });

        tokio::time::timeout(Duration::from_secs(2), token.cancelled())
            .await
            .expect("cancelled() should complete");
    }

    #[tokio::test]
    async fn test_cancelled_future_ready_after_cancel() {
        let token = CancellationToken::new();
        token.request_cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("already cancelled");
    }
}
