//! The shared stop signal of a drain: the global timeout and caller cancellation, whichever fires first.
use snafu::Snafu;
use std::future::Future;
use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Why in-flight drain work was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Abort {
    #[snafu(display("global timeout reached: {:.2}s", timeout.as_secs_f64()))]
    GlobalTimeout { timeout: Duration },

    #[snafu(display("drain was cancelled"))]
    Cancelled,
}

/// A cloneable handle shared by every unit of work in a single drain.
///
/// The global deadline is fixed when the handle is created and never restarts. Cancelling the
/// token (or any of its parents) stops all holders at their next suspension point.
#[derive(Clone, Debug)]
pub struct DrainDeadline {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl DrainDeadline {
    /// Starts the global clock. A `timeout` of `None` only stops on cancellation.
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        DrainDeadline {
            cancel,
            deadline: timeout.and_then(|timeout| Instant::now().checked_add(timeout)),
            timeout,
        }
    }

    /// Returns an error if the drain has been cancelled or the deadline has passed.
    pub fn check(&self) -> Result<(), Abort> {
        if self.cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(self.timed_out()),
            _ => Ok(()),
        }
    }

    /// Resolves once the drain is cancelled or the deadline passes.
    pub async fn expired(&self) -> Abort {
        let deadline = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Abort::Cancelled,
            _ = deadline => self.timed_out(),
        }
    }

    /// Drives `future` to completion unless the drain stops first, in which case `future` is dropped.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, Abort> {
        tokio::select! {
            biased;
            abort = self.expired() => Err(abort),
            output = future => Ok(output),
        }
    }

    fn timed_out(&self) -> Abort {
        Abort::GlobalTimeout {
            timeout: self.timeout.unwrap_or_default(),
        }
    }
}
