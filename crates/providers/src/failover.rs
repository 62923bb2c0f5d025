//! Process-wide provider failover state.
//!
//! One instance is created at bootstrap and injected into every provider
//! (main path and analysis path alike), so a 5xx on either flips routing
//! for all of them. A recovery timer clears the flag after the configured
//! delay; if the primary fails again the next request re-arms it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct FailoverState {
    active: AtomicBool,
    timer_armed: AtomicBool,
}

impl Default for FailoverState {
    fn default() -> Self {
        Self::new()
    }
}

impl FailoverState {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            timer_armed: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Flip into failover and schedule a recovery attempt. Idempotent while
    /// a timer is already armed, so a burst of failures schedules one
    /// recovery, not many.
    pub fn activate(self: &Arc<Self>, recovery_delay: Duration) {
        self.active.store(true, Ordering::SeqCst);
        if self
            .timer_armed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        tracing::warn!(
            delay_secs = recovery_delay.as_secs(),
            "provider failover activated"
        );
        let state = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(recovery_delay).await;
            state.active.store(false, Ordering::SeqCst);
            state.timer_armed.store(false, Ordering::SeqCst);
            tracing::info!("provider failover cleared, retrying primary");
        });
    }

    /// Test hook: clear the flag immediately.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.timer_armed.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn activation_sets_flag_and_timer_clears_it() {
        let state = Arc::new(FailoverState::new());
        assert!(!state.is_active());

        state.activate(Duration::from_secs(300));
        assert!(state.is_active());

        // Let the spawned recovery task register its sleep before advancing.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(301)).await;
        tokio::task::yield_now().await;
        assert!(!state.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_activation_rearms_after_recovery() {
        let state = Arc::new(FailoverState::new());
        state.activate(Duration::from_secs(10));
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;
        assert!(!state.is_active());

        // Failure during recovery re-arms.
        state.activate(Duration::from_secs(10));
        assert!(state.is_active());
    }
}
