//! Sequence player
//!
//! Owns the render thread and the clock that drives it. The transport talks
//! to the player through [`SequencePlayer::start`], [`SequencePlayer::stop`]
//! and [`SequencePlayer::set_time`]; the render thread reads the clock once
//! per block and renders up to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use crate::playback::BlockRenderer;
use crate::primitives::{Beat, Second};
use crate::sequence::Sequence;
use crate::tick_clock::TickClock;

struct ClockState {
    clock: TickClock,
    /// Beat the renderer must resume dispatching from. Events before it
    /// are skipped, events from it onward are played.
    relocate: Option<Beat>,
    /// The renderer must release held notes
    silence: bool,
}

struct Shared {
    clock: Mutex<ClockState>,
    running: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SequencePlayer {
    sequence: Arc<Sequence>,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SequencePlayer {
    pub fn new(sequence: Arc<Sequence>) -> Self {
        let clock = TickClock::new(Arc::clone(sequence.tempo_map()));
        Self {
            sequence,
            shared: Arc::new(Shared {
                clock: Mutex::new(ClockState {
                    clock,
                    relocate: Some(Beat::zero()),
                    silence: false,
                }),
                running: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn sequence(&self) -> &Arc<Sequence> {
        &self.sequence
    }

    /// Spawn the render thread around `renderer`
    ///
    /// The thread renders nothing until [`SequencePlayer::start`].
    pub fn preroll(&self, mut renderer: BlockRenderer) -> std::io::Result<()> {
        let mut slot = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }

        let block = Duration::from_secs_f64(
            renderer.block_frames() as f64 / renderer.sample_rate().max(1) as f64,
        );
        let shared = Arc::clone(&self.shared);
        shared.running.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name("carillon-render".to_string())
            .spawn(move || {
                debug!(block_ms = block.as_secs_f64() * 1000.0, "render thread started");
                while shared.running.load(Ordering::Acquire) {
                    let (now, playing, relocate, silence) = {
                        let mut state = shared.lock();
                        let now = state.clock.tick();
                        let playing = state.clock.is_running();
                        (
                            now,
                            playing,
                            std::mem::take(&mut state.relocate),
                            std::mem::take(&mut state.silence),
                        )
                    };

                    if silence {
                        renderer.silence();
                    }
                    if let Some(from) = relocate {
                        renderer.relocate(from);
                    }
                    if playing {
                        renderer.render(now);
                    }

                    thread::sleep(block);
                }
                renderer.shutdown();
                debug!(frames = renderer.position().0, "render thread exited");
            });

        match handle {
            Ok(handle) => {
                *slot = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Start or resume from the current time
    pub fn start(&self) {
        let mut state = self.shared.lock();
        if !state.clock.is_running() {
            state.relocate = Some(state.clock.position());
            state.clock.start();
        }
    }

    /// Halt the clock, keeping the current time
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        state.clock.pause();
        state.silence = true;
    }

    /// Current position in beats
    pub fn time(&self) -> Beat {
        self.shared.lock().clock.tick()
    }

    /// Move to `beat`; a running player keeps running from there
    pub fn set_time(&self, beat: Beat) {
        let mut state = self.shared.lock();
        state.clock.seek(beat);
        state.relocate = Some(state.clock.position());
        state.silence = true;
    }

    /// Current position in seconds
    pub fn elapsed(&self) -> Second {
        self.sequence.seconds_for_beats(self.time())
    }

    /// Stop the render thread and shut its units down. Safe to call more
    /// than once.
    pub fn dispose(&self) {
        self.shared.running.store(false, Ordering::Release);
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("render thread panicked");
            } else {
                info!("player disposed");
            }
        }
    }
}

impl Drop for SequencePlayer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::TempoMap;

    fn player() -> SequencePlayer {
        SequencePlayer::new(Arc::new(Sequence::new(TempoMap::default(), vec![])))
    }

    #[test]
    fn test_start_stop_keeps_time() {
        let player = player();
        assert!(!player.shared.lock().clock.is_running());

        player.start();
        assert!(player.shared.lock().clock.is_running());
        thread::sleep(Duration::from_millis(30));
        player.stop();

        let held = player.time();
        assert!(held.0 > 0.0);
        assert!(!player.shared.lock().clock.is_running());
        thread::sleep(Duration::from_millis(10));
        assert_eq!(player.time(), held);
    }

    #[test]
    fn test_set_time_while_stopped() {
        let player = player();
        player.set_time(Beat(3.0));
        assert_eq!(player.time(), Beat(3.0));
        assert!((player.elapsed().0 - 1.5).abs() < 1e-9);

        player.set_time(Beat(0.0));
        assert_eq!(player.time(), Beat(0.0));
    }

    #[test]
    fn test_dispatch_resumes_from_start_and_seek_target() {
        let player = player();
        assert_eq!(player.shared.lock().relocate, Some(Beat::zero()));

        player.set_time(Beat(2.0));
        assert_eq!(player.shared.lock().relocate, Some(Beat(2.0)));

        // What the render thread would have consumed
        player.shared.lock().relocate = None;
        player.start();
        // The beat play was pressed at, not wherever the clock is by now
        assert_eq!(player.shared.lock().relocate, Some(Beat(2.0)));
        player.stop();
    }

    #[test]
    fn test_dispose_is_idempotent_without_thread() {
        let player = player();
        player.dispose();
        player.dispose();
        assert!(!player.shared.running.load(Ordering::Acquire));
    }
}
