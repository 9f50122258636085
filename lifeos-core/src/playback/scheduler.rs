//! Gapless scheduling of inbound buffers on an output clock.

use std::collections::BTreeMap;

/// Identifies one scheduled buffer until its ended notification.
pub type BufferId = u64;

/// Placement of one buffer on the output timeline (seconds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Tracks where the next buffer goes and which buffers are still playing.
///
/// `next_start_time` never decreases. A buffer starts at
/// `max(next_start_time, clock)` and pushes `next_start_time` forward by
/// exactly its duration, so in-time arrivals play back to back and late
/// arrivals start at the clock. The playing set changes only through
/// [`schedule`](Self::schedule) and [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start_time: f64,
    playing: BTreeMap<BufferId, ScheduledBuffer>,
    next_id: BufferId,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a buffer of `duration` seconds given the current output `clock`.
    pub fn schedule(&mut self, duration: f64, clock: f64) -> ScheduledBuffer {
        let duration = duration.max(0.0);
        let start_at = self.next_start_time.max(clock);
        self.next_start_time = start_at + duration;

        let slot = ScheduledBuffer {
            id: self.next_id,
            start_at,
            duration,
        };
        self.next_id += 1;
        self.playing.insert(slot.id, slot);
        slot
    }

    /// Remove a buffer on its ended notification. Returns `false` for
    /// unknown or already finished ids.
    pub fn finish(&mut self, id: BufferId) -> bool {
        self.playing.remove(&id).is_some()
    }

    /// The remote is speaking while any scheduled buffer has not ended.
    pub fn is_speaking(&self) -> bool {
        !self.playing.is_empty()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn playing_count(&self) -> usize {
        self.playing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn in_time_arrivals_play_back_to_back() {
        let mut s = PlaybackScheduler::new();
        let a = s.schedule(0.5, 0.0);
        let b = s.schedule(0.5, 0.1);
        let c = s.schedule(0.25, 0.2);
        assert_abs_diff_eq!(a.start_at, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(b.start_at, a.end_at(), epsilon = 1e-9);
        assert_abs_diff_eq!(c.start_at, b.end_at(), epsilon = 1e-9);
        assert_abs_diff_eq!(s.next_start_time(), 1.25, epsilon = 1e-9);
    }

    #[test]
    fn late_arrival_starts_at_clock() {
        let mut s = PlaybackScheduler::new();
        s.schedule(0.5, 0.0);
        let late = s.schedule(0.5, 2.0);
        assert_abs_diff_eq!(late.start_at, 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s.next_start_time(), 2.5, epsilon = 1e-9);
    }

    #[test]
    fn starvation_leaves_next_start_at_last_end() {
        let mut s = PlaybackScheduler::new();
        let a = s.schedule(0.4, 1.0);
        assert!(s.finish(a.id));
        assert!(!s.is_speaking());
        assert_abs_diff_eq!(s.next_start_time(), 1.4, epsilon = 1e-9);
    }

    #[test]
    fn speaking_tracks_the_playing_set() {
        let mut s = PlaybackScheduler::new();
        assert!(!s.is_speaking());
        let a = s.schedule(0.5, 0.0);
        let b = s.schedule(0.5, 0.0);
        assert!(s.is_speaking());

        assert!(s.finish(a.id));
        assert!(s.is_speaking());
        assert!(s.finish(b.id));
        assert!(!s.is_speaking());
        assert!(!s.finish(b.id), "double finish is a no-op");
    }

    #[test]
    fn next_start_time_never_decreases() {
        let mut s = PlaybackScheduler::new();
        let mut last = 0.0;
        for (duration, clock) in [(0.3, 0.0), (0.2, 5.0), (0.1, 1.0), (0.0, 0.0), (0.4, 5.1)] {
            s.schedule(duration, clock);
            assert!(s.next_start_time() >= last);
            last = s.next_start_time();
        }
    }
}
