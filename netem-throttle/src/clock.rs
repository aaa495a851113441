//! Monotonic delivery timestamps.
//!
//! Deadlines travel through the byte queue as 8-byte integers, so they are expressed as
//! nanoseconds since a process-wide [`Instant`] epoch rather than as `Instant` values. The
//! value `0` is reserved for the end-of-stream sentinel and is never produced by [`now`].
use std::{
    sync::OnceLock,
    time::{Duration, Instant},
};

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Nanoseconds on the process-wide monotonic clock. Always non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Builds a timestamp from its raw encoding, or `None` for the reserved value `0`.
    pub fn from_nanos(nanos: u64) -> Option<Self> {
        (nanos != 0).then_some(Self(nanos))
    }

    #[inline]
    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Timestamp `duration` later, saturating at `u64::MAX` nanoseconds.
    pub fn saturating_add(self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }

    /// The `Instant` this timestamp corresponds to.
    pub fn to_instant(self) -> Instant {
        epoch() + Duration::from_nanos(self.0)
    }
}

/// Current time. Non-decreasing across calls and threads.
pub fn now() -> Timestamp {
    let nanos = u64::try_from(epoch().elapsed().as_nanos()).unwrap_or(u64::MAX);
    Timestamp(nanos.max(1))
}
