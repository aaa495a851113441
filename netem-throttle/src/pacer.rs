//! Bandwidth pacing for the tagging writer.
//!
//! Every byte occupies `8e9 / bps` nanoseconds (rounded up) of a virtual transmit horizon:
//! `horizon = max(horizon, now) + byte_time`. Deadlines derived from the horizon are spaced at
//! least one byte time apart, so released throughput never exceeds the ceiling, and a backlog
//! pushes deadlines out in proportion to its size. Idle time is not banked: a burst after a
//! quiet period starts from `now`.
use std::time::Duration;

use crate::clock::Timestamp;

const NANOS_PER_BIT_SECOND: u128 = 8 * 1_000_000_000;

#[derive(Debug, Clone)]
pub(crate) struct Pacer {
    byte_time: Duration,
    horizon: Option<Timestamp>,
}

impl Pacer {
    /// `bandwidth_bps == 0` disables pacing.
    pub(crate) fn new(bandwidth_bps: u64) -> Self {
        let byte_time = match bandwidth_bps {
            0 => Duration::ZERO,
            bps => {
                let nanos = NANOS_PER_BIT_SECOND.div_ceil(u128::from(bps));
                Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
            }
        };
        Self {
            byte_time,
            horizon: None,
        }
    }

    pub(crate) fn byte_time(&self) -> Duration {
        self.byte_time
    }

    /// Slot in which the next byte finishes transmitting, given the current time.
    pub(crate) fn schedule(&mut self, now: Timestamp) -> Timestamp {
        if self.byte_time.is_zero() {
            return now;
        }
        let start = self.horizon.map_or(now, |h| h.max(now));
        let end = start.saturating_add(self.byte_time);
        self.horizon = Some(end);
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(nanos: u64) -> Timestamp {
        Timestamp::from_nanos(nanos).unwrap()
    }

    #[test]
    fn zero_bandwidth_is_a_pass_through() {
        let mut p = Pacer::new(0);
        assert!(p.byte_time().is_zero());
        assert_eq!(p.schedule(ts(5)), ts(5));
        assert_eq!(p.schedule(ts(5)), ts(5));
    }

    #[test]
    fn byte_time_rounds_up() {
        // 8 bits at 3 bps = 2.666..s
        assert_eq!(Pacer::new(3).byte_time(), Duration::from_nanos(2_666_666_667));
        assert_eq!(Pacer::new(8).byte_time(), Duration::from_secs(1));
        // faster than one bit per nanosecond still costs a nanosecond
        assert_eq!(Pacer::new(u64::MAX).byte_time(), Duration::from_nanos(1));
    }

    #[test]
    fn burst_is_spaced_by_byte_time() {
        let mut p = Pacer::new(8_000); // one byte per ms
        let now = ts(1_000);
        let slots: Vec<u64> = (0..4).map(|_| p.schedule(now).as_nanos()).collect();
        assert_eq!(slots, vec![1_001_000, 2_001_000, 3_001_000, 4_001_000]);
    }

    #[test]
    fn idle_time_is_not_banked() {
        let mut p = Pacer::new(8_000);
        p.schedule(ts(1_000));
        let later = ts(50_000_000);
        assert_eq!(p.schedule(later).as_nanos(), 51_000_000);
    }
}
