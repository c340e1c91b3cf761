//! Position monitor loop
//!
//! Polls the transport on a fixed interval and turns state changes into
//! lifecycle events. Also the only place that notices a sequence playing
//! past its longest track.
//!
//! The edge detection lives in [`MonitorState`], which is pure and driven by
//! [`spawn_monitor`]. The loop always finishes by sending one `Stopped`,
//! finishing the session on a blocking thread and then dropping the event
//! sender.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EventSender, LifecycleEvent};
use crate::primitives::Second;
use crate::transport::TransportState;

/// What the monitor watches
pub trait Monitored: Send + Sync + 'static {
    fn transport_state(&self) -> TransportState;

    /// Player position in seconds
    fn elapsed(&self) -> Second;

    /// Duration of the longest track
    fn longest_track(&self) -> Second;

    /// Playback ran off the end: force Stopped and rewind
    fn end_of_track(&self);

    /// The loop is exiting; tear the session down
    fn finish(&self);
}

/// Outcome of one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Idle,
    Emit(LifecycleEvent),
    EndOfTrack,
    Finish,
}

/// Edge detector over observed transport states
#[derive(Debug, Clone)]
pub struct MonitorState {
    last: TransportState,
}

impl MonitorState {
    pub fn new() -> Self {
        Self {
            last: TransportState::Stopped,
        }
    }

    pub fn last(&self) -> TransportState {
        self.last
    }

    pub fn observe(&mut self, state: TransportState, elapsed: Second, longest: Second) -> Step {
        match state {
            TransportState::Stopped if self.last != TransportState::Stopped => Step::Finish,
            TransportState::Stopped => Step::Idle,
            TransportState::Paused if self.last != TransportState::Paused => {
                self.last = TransportState::Paused;
                Step::Emit(LifecycleEvent::Paused)
            }
            TransportState::Paused => Step::Idle,
            TransportState::Playing => {
                if elapsed.0 >= longest.0 {
                    Step::EndOfTrack
                } else if matches!(
                    self.last,
                    TransportState::Stopped | TransportState::Paused
                ) {
                    self.last = TransportState::Playing;
                    Step::Emit(LifecycleEvent::Started)
                } else {
                    Step::Idle
                }
            }
            TransportState::Released => Step::Finish,
        }
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the monitor loop on the current tokio runtime
pub fn spawn_monitor<M: Monitored>(
    target: Arc<M>,
    poll_interval: Duration,
    cancel: CancellationToken,
    events: EventSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state = MonitorState::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let transport = target.transport_state();
                    let elapsed = if transport == TransportState::Playing {
                        target.elapsed()
                    } else {
                        Second::zero()
                    };

                    match state.observe(transport, elapsed, target.longest_track()) {
                        Step::Idle => {}
                        Step::Emit(event) => {
                            debug!(%event, "lifecycle event");
                            // A dropped stream only means nobody is listening
                            let _ = events.send(event);
                        }
                        Step::EndOfTrack => {
                            info!(elapsed = elapsed.0, "end of track");
                            target.end_of_track();
                            break;
                        }
                        Step::Finish => break,
                    }
                }
            }
        }

        let _ = events.send(LifecycleEvent::Stopped);
        // finish() joins the render thread
        let finishing = Arc::clone(&target);
        if let Err(e) = tokio::task::spawn_blocking(move || finishing.finish()).await {
            warn!("session teardown failed: {}", e);
        }
        // Stream end implies the session is finished
        drop(events);
        debug!("monitor exited");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    use futures::StreamExt;
    use tokio_test::{assert_pending, assert_ready_eq};

    use crate::events::EventStream;
    use crate::transport::AtomicTransport;
    use TransportState::*;

    fn observe(state: &mut MonitorState, transport: TransportState) -> Step {
        state.observe(transport, Second(1.0), Second(10.0))
    }

    #[test]
    fn test_idle_until_something_happens() {
        let mut state = MonitorState::new();
        assert_eq!(observe(&mut state, Stopped), Step::Idle);
        assert_eq!(observe(&mut state, Stopped), Step::Idle);
    }

    #[test]
    fn test_edges_emit_once() {
        let mut state = MonitorState::new();
        assert_eq!(
            observe(&mut state, Playing),
            Step::Emit(LifecycleEvent::Started)
        );
        assert_eq!(observe(&mut state, Playing), Step::Idle);
        assert_eq!(
            observe(&mut state, Paused),
            Step::Emit(LifecycleEvent::Paused)
        );
        assert_eq!(observe(&mut state, Paused), Step::Idle);
        assert_eq!(
            observe(&mut state, Playing),
            Step::Emit(LifecycleEvent::Started)
        );
        assert_eq!(state.last(), Playing);
    }

    #[test]
    fn test_stop_after_activity_finishes() {
        let mut state = MonitorState::new();
        observe(&mut state, Playing);
        assert_eq!(observe(&mut state, Stopped), Step::Finish);

        let mut state = MonitorState::new();
        observe(&mut state, Playing);
        observe(&mut state, Paused);
        assert_eq!(observe(&mut state, Stopped), Step::Finish);
    }

    #[test]
    fn test_end_of_track_wins_over_started() {
        let mut state = MonitorState::new();
        assert_eq!(
            state.observe(Playing, Second(10.0), Second(10.0)),
            Step::EndOfTrack
        );
        // Empty sequence ends as soon as it plays
        let mut state = MonitorState::new();
        assert_eq!(
            state.observe(Playing, Second(0.0), Second(0.0)),
            Step::EndOfTrack
        );
    }

    #[test]
    fn test_released_finishes() {
        let mut state = MonitorState::new();
        assert_eq!(observe(&mut state, Released), Step::Finish);
    }

    struct Fake {
        transport: AtomicTransport,
        elapsed_ms: AtomicU64,
        longest: Second,
        ended: AtomicBool,
        finished: Mutex<u32>,
        finished_on: Mutex<Option<std::thread::ThreadId>>,
    }

    impl Fake {
        fn new(longest: Second) -> Arc<Self> {
            Arc::new(Self {
                transport: AtomicTransport::default(),
                elapsed_ms: AtomicU64::new(0),
                longest,
                ended: AtomicBool::new(false),
                finished: Mutex::new(0),
                finished_on: Mutex::new(None),
            })
        }
    }

    impl Monitored for Fake {
        fn transport_state(&self) -> TransportState {
            self.transport.load()
        }

        fn elapsed(&self) -> Second {
            Second::from_millis(self.elapsed_ms.load(Ordering::SeqCst) as f64)
        }

        fn longest_track(&self) -> Second {
            self.longest
        }

        fn end_of_track(&self) {
            self.ended.store(true, Ordering::SeqCst);
            let _ = self.transport.stop();
        }

        fn finish(&self) {
            *self.finished.lock().unwrap() += 1;
            *self.finished_on.lock().unwrap() = Some(std::thread::current().id());
            let _ = self.transport.release();
        }
    }

    async fn next(stream: &mut EventStream) -> Option<LifecycleEvent> {
        tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("event within timeout")
    }

    #[tokio::test]
    async fn test_play_then_natural_end() {
        let fake = Fake::new(Second(1.0));
        let (tx, mut stream) = EventStream::channel();
        let handle = spawn_monitor(
            Arc::clone(&fake),
            Duration::from_millis(2),
            CancellationToken::new(),
            tx,
        );

        fake.transport.play().unwrap();
        assert_eq!(next(&mut stream).await, Some(LifecycleEvent::Started));

        fake.elapsed_ms.store(1000, Ordering::SeqCst);
        assert_eq!(next(&mut stream).await, Some(LifecycleEvent::Stopped));
        assert_eq!(next(&mut stream).await, None);

        handle.await.unwrap();
        assert!(fake.ended.load(Ordering::SeqCst));
        assert_eq!(*fake.finished.lock().unwrap(), 1);
        assert_eq!(fake.transport.load(), Released);
    }

    #[tokio::test]
    async fn test_play_pause_play() {
        let fake = Fake::new(Second(60.0));
        let (tx, mut stream) = EventStream::channel();
        let cancel = CancellationToken::new();
        let handle = spawn_monitor(
            Arc::clone(&fake),
            Duration::from_millis(2),
            cancel.clone(),
            tx,
        );

        fake.transport.play().unwrap();
        assert_eq!(next(&mut stream).await, Some(LifecycleEvent::Started));
        fake.transport.pause().unwrap();
        assert_eq!(next(&mut stream).await, Some(LifecycleEvent::Paused));
        fake.transport.play().unwrap();
        assert_eq!(next(&mut stream).await, Some(LifecycleEvent::Started));

        // Unchanged state emits nothing
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut pending = tokio_test::task::spawn(stream.next());
        assert_pending!(pending.poll());
        drop(pending);

        cancel.cancel();
        assert_eq!(next(&mut stream).await, Some(LifecycleEvent::Stopped));
        assert_eq!(next(&mut stream).await, None);
        handle.await.unwrap();
        assert!(!fake.ended.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_explicit_stop_ends_loop() {
        let fake = Fake::new(Second(60.0));
        let (tx, mut stream) = EventStream::channel();
        let handle = spawn_monitor(
            Arc::clone(&fake),
            Duration::from_millis(2),
            CancellationToken::new(),
            tx,
        );

        fake.transport.play().unwrap();
        assert_eq!(next(&mut stream).await, Some(LifecycleEvent::Started));
        fake.transport.stop().unwrap();

        assert_eq!(next(&mut stream).await, Some(LifecycleEvent::Stopped));
        assert_eq!(next(&mut stream).await, None);
        handle.await.unwrap();
        assert_eq!(*fake.finished.lock().unwrap(), 1);
        // Current-thread runtime: the loop itself ran here
        let finished_on = fake.finished_on.lock().unwrap().unwrap();
        assert_ne!(finished_on, std::thread::current().id());
    }

    #[tokio::test]
    async fn test_cancel_before_any_tick_still_reports_stopped() {
        let fake = Fake::new(Second(60.0));
        let (tx, mut stream) = EventStream::channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        spawn_monitor(Arc::clone(&fake), Duration::from_millis(2), cancel, tx)
            .await
            .unwrap();

        let mut first = tokio_test::task::spawn(stream.next());
        assert_ready_eq!(first.poll(), Some(LifecycleEvent::Stopped));
        drop(first);
        assert_eq!(next(&mut stream).await, None);
    }
}
