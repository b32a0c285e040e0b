use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrTimerState {
    Idle,
    Armed,
    Cancelled,
    Fired,
}

struct TimerSlot {
    state: GrTimerState,
    task: Option<JoinHandle<()>>,
    generation: u64,
}

/// Single-shot cancellable countdown guarding a disconnect window. Armed on
/// disconnect, cancelled on reconnect; fires at most once per arming. A zero
/// hold never arms.
pub struct GrHoldTimer {
    hold: Duration,
    slot: Arc<Mutex<TimerSlot>>,
}

impl GrHoldTimer {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            slot: Arc::new(Mutex::new(TimerSlot {
                state: GrTimerState::Idle,
                task: None,
                generation: 0,
            })),
        }
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    pub fn state(&self) -> GrTimerState {
        self.slot.lock().state
    }

    /// Starts (or restarts) the countdown. Returns false when the hold
    /// window is zero, in which case `on_expire` is dropped unused.
    pub fn arm(&self, on_expire: impl FnOnce() + Send + 'static) -> bool {
        if self.hold.is_zero() {
            return false;
        }
        let mut slot = self.slot.lock();
        slot.generation += 1;
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        let generation = slot.generation;
        let shared = Arc::clone(&self.slot);
        let hold = self.hold;
        slot.task = Some(tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            let fire = {
                let mut slot = shared.lock();
                if slot.generation == generation && slot.state == GrTimerState::Armed {
                    slot.state = GrTimerState::Fired;
                    slot.task = None;
                    true
                } else {
                    false
                }
            };
            if fire {
                on_expire();
            }
        }));
        slot.state = GrTimerState::Armed;
        true
    }

    /// Stops an armed countdown without side effects. No-op otherwise.
    pub fn cancel(&self) {
        let mut slot = self.slot.lock();
        if slot.state != GrTimerState::Armed {
            return;
        }
        slot.generation += 1;
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        slot.state = GrTimerState::Cancelled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_the_hold() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = GrHoldTimer::new(Duration::from_secs(5));
        {
            let fired = Arc::clone(&fired);
            assert!(timer.arm(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(timer.state(), GrTimerState::Armed);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(timer.state(), GrTimerState::Fired);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_expiry_suppresses_the_callback() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = GrHoldTimer::new(Duration::from_secs(5));
        {
            let fired = Arc::clone(&fired);
            timer.arm(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        timer.cancel();
        assert_eq!(timer.state(), GrTimerState::Cancelled);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_restarts_the_window() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = GrHoldTimer::new(Duration::from_secs(5));
        for _ in 0..2 {
            let fired = Arc::clone(&fired);
            timer.arm(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
        // 6s elapsed in total but only 3s since the restart.
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), GrTimerState::Fired);
    }

    #[tokio::test]
    async fn zero_hold_never_arms() {
        let timer = GrHoldTimer::new(Duration::ZERO);
        assert!(!timer.arm(|| panic!("must not fire")));
        assert_eq!(timer.state(), GrTimerState::Idle);
    }
}
