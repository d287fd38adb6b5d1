//! Deadlines
//!
//! Every suspension point of the connection engine is bounded by a
//! cancellation token and, optionally, a fresh timeout. Whichever fires first
//! aborts the operation, and the caller learns which one it was.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Why a bounded operation was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// The cancellation token fired.
    Cancelled,
    /// The timeout elapsed first.
    TimedOut,
}

impl AbortReason {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cancellation token plus an optional timeout.
///
/// The timeout clock starts when [`Deadline::run`] is first polled, so one
/// `Deadline` value can bound several operations, each with its own budget.
#[derive(Debug, Clone)]
pub struct Deadline {
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl Deadline {
    /// Compose a caller's token with a timeout (`None` waits forever).
    #[must_use]
    pub fn compose(cancel: &CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel: cancel.clone(),
            timeout,
        }
    }

    /// Bound only by cancellation.
    #[must_use]
    pub fn cancellation(cancel: &CancellationToken) -> Self {
        Self::compose(cancel, None)
    }

    /// Timeout of this deadline.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Drive `operation` until it completes or the deadline fires.
    ///
    /// Cancellation wins ties. The operation future is dropped on abort.
    ///
    /// # Errors
    ///
    /// Returns the [`AbortReason`] when the deadline fires first.
    pub async fn run<F>(&self, operation: F) -> Result<F::Output, AbortReason>
    where
        F: Future,
    {
        let expiry = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(AbortReason::Cancelled),
            () = expiry => Err(AbortReason::TimedOut),
            output = operation => Ok(output),
        }
    }
}
