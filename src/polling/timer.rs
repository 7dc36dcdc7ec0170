//! Single-slot, generation-stamped timer shared by the pollers.
//!
//! Arming replaces whatever was pending. A fired task must `claim` its
//! generation before acting; claiming detaches the task from the slot so a
//! later `cancel` can no longer abort it (an in-flight fetch runs to
//! completion). Stale tasks whose generation was superseded fail the claim.

use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub(crate) struct TickTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl TickTimer {
    /// Cancel the pending tick and arm a new one after `delay`.
    ///
    /// `task` receives the generation it must claim. Returns false, leaving
    /// the slot untouched, when called outside a Tokio runtime.
    pub(crate) fn arm<F>(&mut self, delay: Duration, task: impl FnOnce(u64) -> F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("cannot arm poll timer outside a Tokio runtime");
            return false;
        };
        self.cancel();
        let generation = self.generation;
        let fut = task(generation);
        self.handle = Some(runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            fut.await;
        }));
        true
    }

    /// Abort the pending tick, if any, and invalidate its generation.
    pub(crate) fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// Take ownership of a fired tick. False when the tick is stale.
    pub(crate) fn claim(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.handle = None;
        true
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Generation the currently armed tick must claim.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

/// Exponential backoff: `min(base * 2^(failures-1), max)`.
///
/// `failures` counts consecutive failures including the current one; zero
/// is treated as one.
pub fn retry_delay(failures: u32, base: Duration, max: Duration) -> Duration {
    let exponent = failures.saturating_sub(1).min(31);
    let factor = 1u32 << exponent;
    base.checked_mul(factor).map_or(max, |d| d.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let base = Duration::from_millis(5);
        let max = Duration::from_millis(40);
        assert_eq!(retry_delay(1, base, max), Duration::from_millis(5));
        assert_eq!(retry_delay(2, base, max), Duration::from_millis(10));
        assert_eq!(retry_delay(3, base, max), Duration::from_millis(20));
        assert_eq!(retry_delay(4, base, max), Duration::from_millis(40));
        assert_eq!(retry_delay(9, base, max), Duration::from_millis(40));
        assert_eq!(retry_delay(0, base, max), Duration::from_millis(5));
    }

    #[test]
    fn test_retry_delay_huge_failure_count_saturates() {
        let d = retry_delay(u32::MAX, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(d, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_tick() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = TickTimer::default();

        let f1 = Arc::clone(&fired);
        timer.arm(Duration::from_millis(50), move |_| async move {
            f1.fetch_add(1, Ordering::SeqCst);
        });
        let f2 = Arc::clone(&fired);
        timer.arm(Duration::from_millis(50), move |_| async move {
            f2.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_arm_outside_runtime_is_refused() {
        let mut timer = TickTimer::default();
        assert!(!timer.arm(Duration::ZERO, |_| async {}));
        assert!(!timer.is_armed());
    }

    #[test]
    fn test_claim_rejects_stale_generation() {
        let mut timer = TickTimer::default();
        let stale = timer.generation;
        timer.cancel();
        assert!(!timer.claim(stale));
        assert!(timer.claim(timer.generation));
        assert!(!timer.is_armed());
    }
}
