//! Cancellation contexts
//!
//! A [`Context`] wraps a `tokio_util` [`CancellationToken`] with an optional
//! deadline and remembers why it stopped. Children derived with
//! [`Context::child`] are canceled together with their parent, but canceling a
//! child never reaches the parent.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::error::CancelCause;

/// Caller-controlled cancellation scope with an optional deadline.
///
/// Cloning is cheap and every clone refers to the same scope.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    token: CancellationToken,
    cause: OnceLock<CancelCause>,
    deadline: Option<Instant>,
    parent: Option<Context>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A root context that is never canceled unless [`cancel`](Self::cancel) is called.
    pub fn background() -> Self {
        Self::root(None)
    }

    /// A root context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::root(Some(deadline))
    }

    /// A root context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    fn root(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                cause: OnceLock::new(),
                deadline,
                parent: None,
            }),
        }
    }

    /// Derives a child scope that is canceled whenever this one is.
    pub fn child(&self) -> Self {
        self.derive(self.inner.deadline)
    }

    /// Derives a child scope with its own deadline. The child never outlives
    /// the parent's deadline.
    pub fn child_with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.inner.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: self.inner.token.child_token(),
                cause: OnceLock::new(),
                deadline,
                parent: Some(self.clone()),
            }),
        }
    }

    /// Cancels this scope and all of its children.
    pub fn cancel(&self) {
        self.cancel_with(CancelCause::Canceled);
    }

    fn cancel_with(&self, cause: CancelCause) {
        // First cause wins; later cancels are no-ops.
        let _ = self.inner.cause.set(cause);
        self.inner.token.cancel();
    }

    /// The deadline after which this scope reports [`CancelCause::DeadlineExceeded`].
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns the cancel cause, or `None` while the scope is still live.
    ///
    /// Never blocks.
    pub fn err(&self) -> Option<CancelCause> {
        if let Some(cause) = self.inner.cause.get() {
            return Some(*cause);
        }

        if let Some(cause) = self.inner.parent.as_ref().and_then(Context::err) {
            return Some(cause);
        }

        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                self.cancel_with(CancelCause::DeadlineExceeded);
                return self.inner.cause.get().copied();
            }
        }

        None
    }

    /// Returns `true` once the scope has been canceled or its deadline passed.
    pub fn is_canceled(&self) -> bool {
        self.err().is_some()
    }

    /// Waits until the scope is canceled and returns why.
    pub async fn done(&self) -> CancelCause {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.inner.token.cancelled().await,
        }

        self.err().unwrap_or(CancelCause::Canceled)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("err", &self.err())
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_live() {
        let ctx = Context::background();
        assert!(!ctx.is_canceled());
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.deadline(), None);
    }

    #[test]
    fn test_cancel_sets_cause() {
        let ctx = Context::background();
        ctx.cancel();
        assert_eq!(ctx.err(), Some(CancelCause::Canceled));

        // Clones share the scope
        let clone = ctx.clone();
        assert!(clone.is_canceled());
    }

    #[test]
    fn test_parent_cancel_reaches_child() {
        let parent = Context::background();
        let child = parent.child();
        let grandchild = child.child();

        parent.cancel();

        assert_eq!(child.err(), Some(CancelCause::Canceled));
        assert_eq!(grandchild.err(), Some(CancelCause::Canceled));
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = Context::background();
        let child = parent.child();

        child.cancel();

        assert!(child.is_canceled());
        assert!(!parent.is_canceled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = Context::with_timeout(Duration::from_secs(5));
        assert!(!ctx.is_canceled());

        let cause = ctx.done().await;

        assert_eq!(cause, CancelCause::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(CancelCause::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_deadline_capped_by_parent() {
        let parent = Context::with_timeout(Duration::from_secs(1));
        let child = parent.child_with_deadline(Instant::now() + Duration::from_secs(60));

        assert_eq!(child.deadline(), parent.deadline());
        assert_eq!(child.done().await, CancelCause::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_done_wakes_on_cancel() {
        let ctx = Context::background();
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.done().await })
        };

        ctx.cancel();

        let cause = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("done() should resolve after cancel")
            .unwrap();
        assert_eq!(cause, CancelCause::Canceled);
    }

    #[test]
    fn test_first_cause_wins() {
        let ctx = Context::background();
        ctx.cancel();
        ctx.cancel_with(CancelCause::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(CancelCause::Canceled));
    }
}
