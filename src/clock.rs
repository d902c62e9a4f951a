use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::sdk::CaptureChannel;

/// Reference-time ticks, 100 ns each.
pub type RefTime = i64;

pub const ONE_SECOND: RefTime = 10_000_000;

/// Monotonic reference clock shared by all pins.
///
/// The Pro family reads hardware time from the channel; the USB family has
/// no readable device clock, so host monotonic time stands in. Either way
/// consecutive calls never go backwards.
pub struct ReferenceClock {
    source: ClockSource,
    last: AtomicI64,
}

enum ClockSource {
    Device(Arc<dyn CaptureChannel>),
    Host(Instant),
}

impl ReferenceClock {
    pub fn from_device(channel: Arc<dyn CaptureChannel>) -> Self {
        ReferenceClock {
            source: ClockSource::Device(channel),
            last: AtomicI64::new(0),
        }
    }

    pub fn from_host() -> Self {
        ReferenceClock {
            source: ClockSource::Host(Instant::now()),
            last: AtomicI64::new(0),
        }
    }

    /// Current time in 100 ns ticks since the clock epoch.
    pub fn now(&self) -> RefTime {
        let raw = match &self.source {
            ClockSource::Device(channel) => channel
                .device_time()
                .unwrap_or_else(|_| self.last.load(Ordering::Acquire)),
            ClockSource::Host(epoch) => (epoch.elapsed().as_nanos() / 100) as i64,
        };
        // clamp to non-decreasing in case the device time stutters
        let prev = self.last.fetch_max(raw, Ordering::AcqRel);
        raw.max(prev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::test_support::MockChannel;

    #[test]
    fn host_clock_is_monotonic() {
        let clock = ReferenceClock::from_host();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let t = clock.now();
            assert!(t >= prev);
            prev = t;
        }
    }

    #[test]
    fn device_clock_never_goes_backwards() {
        let channel = Arc::new(MockChannel::default());
        let clock = ReferenceClock::from_device(channel.clone());

        channel.state.lock().device_time = 5_000;
        assert_eq!(clock.now(), 5_000);

        // device time stutters backwards; the clock holds
        channel.state.lock().device_time = 4_000;
        assert_eq!(clock.now(), 5_000);

        channel.state.lock().device_time = 6_000;
        assert_eq!(clock.now(), 6_000);
    }
}
