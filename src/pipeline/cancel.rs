//! Cooperative cancellation for long evaluations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ExecutionError, GraphResult};

/// Shared flag checked between pipeline items.
///
/// Clones share the flag, so one clone can cancel an evaluation running on
/// another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Evaluations notice it at their next item.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Cancellation and deadline state of one evaluation.
#[derive(Debug, Clone, Default)]
pub(crate) struct Guard {
    cancel: Option<CancellationToken>,
    deadline: Option<(Instant, Duration)>,
}

impl Guard {
    pub(crate) fn new(cancel: Option<CancellationToken>, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            // A timeout too large to represent as an instant never expires.
            deadline: timeout.and_then(|t| Instant::now().checked_add(t).map(|at| (at, t))),
        }
    }

    pub(crate) fn check(&self) -> GraphResult<()> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(ExecutionError::Cancelled.into());
        }
        if let Some((deadline, timeout)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ExecutionError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Wraps a stage's output: checks the guard before every item and stops for
/// good after the first error.
pub(crate) struct Guarded<I> {
    inner: I,
    guard: Guard,
    done: bool,
}

impl<I> Guarded<I> {
    pub(crate) fn new(inner: I, guard: Guard) -> Self {
        Self {
            inner,
            guard,
            done: false,
        }
    }
}

impl<T, I> Iterator for Guarded<I>
where
    I: Iterator<Item = GraphResult<T>>,
{
    type Item = GraphResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Err(e) = self.guard.check() {
            self.done = true;
            return Some(Err(e));
        }
        let item = self.inner.next();
        match &item {
            None | Some(Err(_)) => self.done = true,
            Some(Ok(_)) => {}
        }
        item
    }
}
