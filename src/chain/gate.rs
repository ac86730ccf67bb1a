//! Admission gate: one shared "next allowed time" for every outbound call.
//!
//! Callers hold the lock while they wait, so slots are handed out strictly
//! in order and no two calls can land closer than `min_interval`.

use super::clock::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct GateState {
    next_allowed: Duration,
    per_key: HashMap<String, Duration>,
}

pub struct AdmissionGate {
    clock: Arc<dyn Clock>,
    min_interval: Duration,
    per_key_interval: Duration,
    state: Mutex<GateState>,
}

impl AdmissionGate {
    pub fn new(clock: Arc<dyn Clock>, min_interval: Duration) -> Self {
        Self { clock, min_interval, per_key_interval: Duration::ZERO, state: Mutex::new(GateState::default()) }
    }

    /// Extra spacing between calls sharing a key (an address). Zero disables it.
    pub fn with_per_key_interval(mut self, interval: Duration) -> Self {
        self.per_key_interval = interval;
        self
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for a slot and claim it. Returns the clock time the slot was taken.
    pub async fn acquire(&self, key: Option<&str>) -> Duration {
        let mut state = self.state.lock().await;

        let mut ready_at = state.next_allowed;
        if !self.per_key_interval.is_zero() {
            if let Some(at) = key.and_then(|k| state.per_key.get(k)) {
                ready_at = ready_at.max(*at);
            }
        }

        let now = self.clock.now();
        if ready_at > now {
            let wait = ready_at - now;
            debug!(wait_ms = wait.as_millis() as u64, "admission gate wait");
            self.clock.sleep(wait).await;
        }

        let taken = self.clock.now();
        state.next_allowed = taken + self.min_interval;
        if !self.per_key_interval.is_zero() {
            if let Some(k) = key {
                state.per_key.insert(k.to_string(), taken + self.per_key_interval);
            }
        }
        taken
    }

    /// Push the next slot out to at least `now + penalty` (after a 429).
    pub async fn penalize(&self, penalty: Duration) {
        let mut state = self.state.lock().await;
        let until = self.clock.now() + penalty;
        if until > state.next_allowed {
            debug!(penalty_ms = penalty.as_millis() as u64, "admission gate penalized");
            state.next_allowed = until;
        }
    }

    /// Time remaining until the next slot opens.
    pub async fn time_until_open(&self) -> Duration {
        let state = self.state.lock().await;
        state.next_allowed.saturating_sub(self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::clock::ManualClock;

    fn gate(clock: &Arc<ManualClock>) -> AdmissionGate {
        AdmissionGate::new(clock.clone(), Duration::from_millis(1200))
    }

    #[tokio::test]
    async fn test_consecutive_calls_are_spaced() {
        let clock = Arc::new(ManualClock::new());
        let gate = gate(&clock);
        let mut times = Vec::new();
        for _ in 0..5 {
            times.push(gate.acquire(None).await);
        }
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1200));
        }
        // First call goes straight through
        assert_eq!(times[0], Duration::ZERO);
    }

    #[tokio::test]
    async fn test_idle_time_counts_towards_interval() {
        let clock = Arc::new(ManualClock::new());
        let gate = gate(&clock);
        gate.acquire(None).await;
        clock.advance(Duration::from_millis(1000));
        gate.acquire(None).await;
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(200)]);
    }

    #[tokio::test]
    async fn test_penalty_delays_every_caller() {
        let clock = Arc::new(ManualClock::new());
        let gate = gate(&clock);
        gate.acquire(None).await;
        gate.penalize(Duration::from_secs(5)).await;
        assert_eq!(gate.time_until_open().await, Duration::from_secs(5));
        let taken = gate.acquire(Some("bc1qother")).await;
        assert_eq!(taken, Duration::from_secs(5));

        // A shorter penalty never pulls the slot earlier
        gate.penalize(Duration::from_millis(10)).await;
        assert_eq!(gate.time_until_open().await, Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn test_per_key_interval() {
        let clock = Arc::new(ManualClock::new());
        let gate = gate(&clock).with_per_key_interval(Duration::from_secs(3));
        gate.acquire(Some("a")).await;
        let other = gate.acquire(Some("b")).await;
        assert_eq!(other, Duration::from_millis(1200));
        let same = gate.acquire(Some("a")).await;
        assert_eq!(same, Duration::from_secs(3));
    }
}
