use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use tracing::debug;

/// Offset between a venue's clock and ours.  Signed requests carry a
/// timestamp the venue checks against a receive window, so a drifting local
/// clock turns every private call into an auth error.
#[derive(Debug, Default)]
pub struct TimeSync {
    offset_ms: AtomicI64,
}

impl TimeSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Record a server time sample taken between `local_before` and
    /// `local_after`; assumes a symmetric round trip.
    pub fn record(&self, server_ms: i64, local_before: i64, local_after: i64) -> i64 {
        let round_trip = local_after - local_before;
        let estimated_local = local_before + round_trip / 2;
        let offset = server_ms - estimated_local;
        self.offset_ms.store(offset, Ordering::Relaxed);
        debug!(offset_ms = offset, round_trip_ms = round_trip, "time sync");
        offset
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }

    /// Server-synced timestamp in milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        Self::local_ms() + self.offset_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_uses_round_trip_midpoint() {
        let ts = TimeSync::new();
        let offset = ts.record(10_150, 10_000, 10_100);
        assert_eq!(offset, 100);
        assert_eq!(ts.offset_ms(), 100);
    }
}
