//! Post-failure cooldown of the delivery worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Resume horizon used when `now + duration` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Default)]
struct SuspendState {
    suspended: bool,
    deadline: Option<Instant>,
}

/// Suspended flag plus an absolute resume deadline.
///
/// Only the worker suspends and clears; producers read the flag when
/// deciding whether to arm queue notification, and termination wakes a
/// pending wait early.
#[derive(Debug, Default)]
pub struct SuspensionController {
    state: Mutex<SuspendState>,
    wakeup: Condvar,
}

impl SuspensionController {
    /// Creates an active (not suspended) controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SuspendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Suspends until now + `duration`, replacing any earlier deadline.
    ///
    /// Durations past what `Instant` can represent are capped at about
    /// thirty years.
    pub fn suspend(&self, duration: Duration) {
        let now = Instant::now();
        let deadline = now
            .checked_add(duration)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        let mut state = self.lock();
        state.suspended = true;
        state.deadline = Some(deadline);
    }

    /// Returns true while suspended.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.lock().suspended
    }

    /// Returns true if the deadline is at or before `now`.
    ///
    /// A controller that was never suspended is always expired.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.lock().deadline.is_none_or(|deadline| now >= deadline)
    }

    /// Resume deadline of the current suspension, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        let state = self.lock();
        state.suspended.then_some(state.deadline).flatten()
    }

    /// Leaves the suspended state.
    pub fn clear(&self) {
        self.lock().suspended = false;
    }

    /// Blocks until the deadline passes or `stop` is set, then clears the
    /// suspension.
    ///
    /// Returns immediately if not suspended.
    pub fn wait(&self, stop: &AtomicBool) {
        let mut state = self.lock();
        while state.suspended && !stop.load(Ordering::SeqCst) {
            let Some(remaining) = state
                .deadline
                .and_then(|deadline| deadline.checked_duration_since(Instant::now()))
                .filter(|remaining| !remaining.is_zero())
            else {
                break;
            };
            state = self
                .wakeup
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        state.suspended = false;
    }

    /// Interrupts a pending [`wait`](Self::wait) so it re-checks its stop flag.
    pub fn wake(&self) {
        let _state = self.lock();
        self.wakeup.notify_all();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn suspend_sets_future_deadline() {
        let ctl = SuspensionController::new();
        assert!(!ctl.is_suspended());
        assert!(ctl.is_expired(Instant::now()));

        let before = Instant::now();
        ctl.suspend(Duration::from_secs(60));
        let after = Instant::now();
        assert!(ctl.is_suspended());
        assert!(!ctl.is_expired(after));

        let deadline = ctl.deadline().unwrap();
        assert!(deadline >= before + Duration::from_secs(60));
        assert!(deadline <= after + Duration::from_secs(60));
        assert!(ctl.is_expired(deadline));
        assert!(!ctl.is_expired(before + Duration::from_secs(59)));

        ctl.clear();
        assert!(!ctl.is_suspended());
        assert!(ctl.deadline().is_none());
    }

    #[test]
    fn unrepresentable_duration_is_capped() {
        let ctl = SuspensionController::new();
        ctl.suspend(Duration::MAX);
        assert!(ctl.is_suspended());
        assert!(!ctl.is_expired(Instant::now() + Duration::from_secs(86_400 * 365)));

        ctl.suspend(Duration::from_secs_f64(1e19));
        assert!(ctl.deadline().is_some());
    }

    #[test]
    fn suspend_again_resets_deadline() {
        let ctl = SuspensionController::new();
        ctl.suspend(Duration::from_secs(60));
        let first = ctl.deadline().unwrap();
        ctl.suspend(Duration::from_secs(1));
        assert!(ctl.deadline().unwrap() < first);
    }

    #[test]
    fn wait_runs_out_the_cooldown() {
        let ctl = SuspensionController::new();
        let stop = AtomicBool::new(false);

        let started = Instant::now();
        ctl.suspend(Duration::from_millis(80));
        ctl.wait(&stop);

        assert!(started.elapsed() >= Duration::from_millis(80));
        assert!(!ctl.is_suspended());
    }

    #[test]
    fn stop_interrupts_wait() {
        let ctl = Arc::new(SuspensionController::new());
        let stop = Arc::new(AtomicBool::new(false));
        ctl.suspend(Duration::from_secs(30));

        let waiter = {
            let ctl = ctl.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let started = Instant::now();
                ctl.wait(&stop);
                started.elapsed()
            })
        };

        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::SeqCst);
        ctl.wake();

        assert!(waiter.join().unwrap() < Duration::from_secs(5));
    }
}
