//! Monotonic tick clock for the player position
//!
//! Advances playback position based on wall clock time, independent of
//! audio device timing. Uses `std::time::Instant` for monotonic guarantees.
//!
//! Elapsed real time is converted to musical time by integrating through the
//! sequence's TempoMap, so tempo changes mid-playback are exact.

use std::sync::Arc;
use std::time::Instant;

use crate::primitives::{Beat, Second, TempoMap};

/// Monotonic clock that tracks playback position in musical time
///
/// When playing, the clock stores the `start_instant` (when play was pressed)
/// and `start_position` (the beat position at that moment). The current
/// position is the beat reached after playing the elapsed wall time forward
/// from the start position.
pub struct TickClock {
    tempo_map: Arc<TempoMap>,

    /// When play was pressed (None if paused/stopped)
    start_instant: Option<Instant>,

    /// Position when play was pressed
    start_position: Beat,

    /// Current position (updated by tick())
    current_position: Beat,
}

impl TickClock {
    /// Create a new tick clock at position 0
    pub fn new(tempo_map: Arc<TempoMap>) -> Self {
        Self {
            tempo_map,
            start_instant: None,
            start_position: Beat(0.0),
            current_position: Beat(0.0),
        }
    }

    /// Start the clock from current position
    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    /// Start the clock as if play had been pressed at `instant`
    pub fn start_at(&mut self, instant: Instant) {
        if self.start_instant.is_none() {
            self.start_instant = Some(instant);
            self.start_position = self.current_position;
        }
    }

    /// Check if clock is running
    pub fn is_running(&self) -> bool {
        self.start_instant.is_some()
    }

    /// Pause without resetting position
    pub fn pause(&mut self) {
        if self.start_instant.is_some() {
            self.tick();
            self.start_instant = None;
        }
    }

    /// Stop and reset to zero
    pub fn stop(&mut self) {
        self.start_instant = None;
        self.start_position = Beat(0.0);
        self.current_position = Beat(0.0);
    }

    /// Seek to position
    pub fn seek(&mut self, beat: Beat) {
        let beat = Beat(beat.0.max(0.0));
        let was_running = self.start_instant.is_some();
        self.current_position = beat;
        self.start_position = beat;

        if was_running {
            // Elapsed time counts from the seek
            self.start_instant = Some(Instant::now());
        }
    }

    /// Called by the render loop - advances position based on elapsed time
    ///
    /// Returns the current position in beats.
    pub fn tick(&mut self) -> Beat {
        self.tick_at(Instant::now())
    }

    /// Advance position to what it is at `now`
    pub fn tick_at(&mut self, now: Instant) -> Beat {
        let Some(start) = self.start_instant else {
            return self.current_position;
        };

        let elapsed = Second(now.saturating_duration_since(start).as_secs_f64());
        let origin = self.tempo_map.beat_to_second(self.start_position);
        self.current_position = self.tempo_map.second_to_beat(origin + elapsed);
        self.current_position
    }

    /// Get current position
    pub fn position(&self) -> Beat {
        self.current_position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Tick;
    use std::thread;
    use std::time::Duration;

    fn make_tempo_map(bpm: f64) -> Arc<TempoMap> {
        Arc::new(TempoMap::new(bpm))
    }

    #[test]
    fn test_new_clock_at_zero() {
        let clock = TickClock::new(make_tempo_map(120.0));

        assert_eq!(clock.position().0, 0.0);
        assert!(!clock.is_running());
    }

    #[test]
    fn test_pause_stops_running() {
        let mut clock = TickClock::new(make_tempo_map(120.0));

        clock.start();
        assert!(clock.is_running());

        clock.pause();
        assert!(!clock.is_running());
    }

    #[test]
    fn test_stop_resets_position() {
        let mut clock = TickClock::new(make_tempo_map(120.0));

        clock.seek(Beat(16.0));
        clock.start();

        clock.stop();
        assert!(!clock.is_running());
        assert_eq!(clock.position().0, 0.0);
    }

    #[test]
    fn test_seek_clamps_and_keeps_running() {
        let mut clock = TickClock::new(make_tempo_map(120.0));

        clock.seek(Beat(-3.0));
        assert_eq!(clock.position().0, 0.0);

        clock.start();
        clock.seek(Beat(16.0));
        assert!(clock.is_running());
        assert_eq!(clock.position().0, 16.0);
    }

    #[test]
    fn test_position_advances_with_elapsed_time() {
        let mut clock = TickClock::new(make_tempo_map(120.0));
        let t0 = Instant::now();

        clock.start_at(t0);
        // 120 BPM is 2 beats per second
        let position = clock.tick_at(t0 + Duration::from_millis(250));
        assert!((position.0 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_integrates_across_tempo_change() {
        let mut map = TempoMap::new(120.0);
        map.add_tempo_change(Tick(960), 60.0);
        let mut clock = TickClock::new(Arc::new(map));
        let t0 = Instant::now();

        // 0.5 s covers the first beat at 120, the next second one beat at 60
        clock.start_at(t0);
        let position = clock.tick_at(t0 + Duration::from_millis(1500));
        assert!((position.0 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_resume_continues_from_pause_position() {
        let mut clock = TickClock::new(make_tempo_map(120.0));
        let t0 = Instant::now();

        clock.start_at(t0);
        clock.tick_at(t0 + Duration::from_secs(1));
        clock.start_instant = None;
        assert_eq!(clock.position().0, 2.0);

        let t1 = t0 + Duration::from_secs(5);
        clock.start_at(t1);
        let position = clock.tick_at(t1 + Duration::from_millis(500));
        assert!((position.0 - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_pause_preserves_position() {
        let mut clock = TickClock::new(make_tempo_map(120.0));

        clock.start();
        thread::sleep(Duration::from_millis(50));
        clock.pause();
        let position_at_pause = clock.position();
        assert!(position_at_pause.0 > 0.0);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.tick().0, position_at_pause.0);
    }
}
