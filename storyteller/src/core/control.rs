//! Deadline and cancellation checks for a pipeline or generator run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Why a run must stop before its next model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupt {
    #[error("run was cancelled")]
    Cancelled,
    #[error("run deadline elapsed")]
    TimedOut,
}

/// Shared stop signals checked between model calls.
///
/// Clones share the cancel flag, so a clone handed to another thread (or a
/// signal handler) can stop the run that owns the original.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl RunControl {
    /// No deadline, not cancelled.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Deadline `timeout` from now. A timeout too large to represent as an
    /// `Instant` means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Self::with_deadline(deadline),
            None => Self::unbounded(),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Remaining budget before the next call, capped at `ceiling`.
    ///
    /// Errors once cancelled or once the deadline has passed.
    pub fn budget(&self, ceiling: Duration) -> Result<Duration, Interrupt> {
        if self.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        let Some(deadline) = self.deadline else {
            return Ok(ceiling);
        };
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::from_secs(0));
        if remaining.is_zero() {
            return Err(Interrupt::TimedOut);
        }
        Ok(remaining.min(ceiling))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_returns_ceiling() {
        let control = RunControl::unbounded();
        let budget = control.budget(Duration::from_secs(30)).expect("budget");
        assert_eq!(budget, Duration::from_secs(30));
    }

    #[test]
    fn deadline_caps_budget() {
        let control = RunControl::with_timeout(Duration::from_secs(5));
        let budget = control.budget(Duration::from_secs(60)).expect("budget");
        assert!(budget <= Duration::from_secs(5));
    }

    #[test]
    fn huge_timeout_means_no_deadline() {
        let control = RunControl::with_timeout(Duration::from_secs(u64::MAX));
        let budget = control.budget(Duration::from_secs(30)).expect("budget");
        assert_eq!(budget, Duration::from_secs(30));
    }

    #[test]
    fn elapsed_deadline_times_out() {
        let control = RunControl::with_deadline(Instant::now());
        assert_eq!(
            control.budget(Duration::from_secs(1)),
            Err(Interrupt::TimedOut)
        );
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let control = RunControl::unbounded();
        let handle = control.clone();
        handle.cancel();
        assert!(control.is_cancelled());
        assert_eq!(
            control.budget(Duration::from_secs(1)),
            Err(Interrupt::Cancelled)
        );
    }
}
