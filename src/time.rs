// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

use crate::util::lock;
use futures_lite::future::Boxed;
use std::{
    ops::Add,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Microseconds on a monotonic clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_micros(micros: u64) -> Self { Self(micros) }

    pub const fn as_micros(self) -> u64 { self.0 }

    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX)))
    }
}

/// Source of time for the policy.
///
/// `sleep_until` yields to other tasks, while `delay` holds the caller for
/// pulses that are too short to schedule around.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    fn sleep_until(&self, deadline: Timestamp) -> Boxed<()>;

    fn delay(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
pub struct MonotonicClock {
    origin: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self { Self { origin: tokio::time::Instant::now() } }
}

impl Default for MonotonicClock {
    fn default() -> Self { Self::new() }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp(u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX))
    }

    fn sleep_until(&self, deadline: Timestamp) -> Boxed<()> {
        let at = self.origin + Duration::from_micros(deadline.0);
        Box::pin(tokio::time::sleep_until(at))
    }

    fn delay(&self, duration: Duration) {
        let start = std::time::Instant::now();
        while start.elapsed() < duration {
            std::hint::spin_loop();
        }
    }
}

/// Clock that only moves when told to, or when something waits on it.
///
/// Used by the simulator and the tests so that timing can be asserted exactly.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<u64>>,
}

impl ManualClock {
    pub fn new() -> Self { Self::default() }

    pub fn starting_at(at: Timestamp) -> Self { Self { now: Arc::new(Mutex::new(at.0)) } }

    pub fn advance(&self, duration: Duration) {
        let mut now = lock(&self.now);
        *now = (Timestamp(*now) + duration).0;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp { Timestamp(*lock(&self.now)) }

    fn sleep_until(&self, deadline: Timestamp) -> Boxed<()> {
        let now = self.now.clone();
        Box::pin(async move {
            let mut now = lock(&now);
            *now = (*now).max(deadline.0);
        })
    }

    fn delay(&self, duration: Duration) { self.advance(duration); }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_sleeps_forward_only() {
        let clock = ManualClock::starting_at(Timestamp::from_micros(1_000));
        clock.sleep_until(Timestamp::from_micros(400)).await;
        assert_eq!(clock.now(), Timestamp::from_micros(1_000));

        clock.sleep_until(Timestamp::from_micros(2_500)).await;
        assert_eq!(clock.now(), Timestamp::from_micros(2_500));

        clock.delay(Duration::from_micros(500));
        assert_eq!(clock.now(), Timestamp::from_micros(3_000));
    }

    #[test]
    fn timestamp_arithmetic() {
        let t = Timestamp::from_micros(10) + Duration::from_millis(2);
        assert_eq!(t.as_micros(), 2_010);
        assert_eq!(t.saturating_duration_since(Timestamp::from_micros(3_000)), Duration::ZERO);
    }
}
