//! Cooperative cancellation primitives.
//!
//! A [`CancelToken`] is cloned into every component that can suspend: the
//! LLM streaming adapter, the subagent, and each tool invocation. When the
//! caller trips the token, the holding component raises [`Cancelled`] at its
//! next suspension point; the orchestrator catches it and finalizes the
//! partial turn instead of treating it as a failure.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag. Cheap to clone; all clones observe the same
/// state.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check whether the token has been tripped.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` if the token has been tripped.
    pub fn check(&self, context: &str) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled::new(context))
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Error raised when an operation observes a tripped [`CancelToken`].
///
/// Detected by downcast at the orchestrator boundary; cancellation is not a
/// failure and must not be reported as one.
#[derive(Debug, Clone)]
pub struct Cancelled {
    context: String,
}

impl Cancelled {
    /// Create a cancellation error tagged with the point where it was raised.
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
        }
    }
}

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cancelled: {}", self.context)
    }
}

impl Error for Cancelled {}

/// Check whether a boxed error is a [`Cancelled`] marker.
pub fn is_cancelled_error(err: &(dyn Error + 'static)) -> bool {
    err.downcast_ref::<Cancelled>().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(clone.check("test").is_err());
    }

    #[test]
    fn cancelled_error_is_detectable_through_boxing() {
        let err: Box<dyn Error + Send + Sync> = Box::new(Cancelled::new("stream"));
        assert!(is_cancelled_error(err.as_ref()));
    }
}
