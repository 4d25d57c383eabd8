//! Outbound send pacing.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Paces sends to one per `interval`, allowing `burst` back-to-back sends.
///
/// Shared through an `Arc`, one throttle limits every worker that holds it.
/// Waiting happens after the slot is reserved and the lock released, so a
/// cancelled caller never stalls the others.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    tolerance: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration, burst: u32) -> Self {
        Self {
            interval,
            tolerance: interval * burst.saturating_sub(1),
            next_slot: Mutex::new(None),
        }
    }

    /// A throttle that never waits.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO, 1)
    }

    /// Wait until the next send is allowed.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }

        let ready_at = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next_slot.map_or(now, |at| at.max(now));
            *next_slot = Some(slot + self.interval);
            (slot > now + self.tolerance).then(|| slot - self.tolerance)
        };

        if let Some(at) = ready_at {
            sleep_until(at).await;
        }
    }
}
