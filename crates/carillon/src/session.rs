//! Player sessions and the [`MidiPlayer`] facade
//!
//! A [`Session`] is everything one `setup` produced: the loaded sequence,
//! the voice pipeline, the render thread and the transport state. The
//! facade holds at most one session. Transport calls are synchronous and may
//! come from any thread; only setup is async.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::binder::bind_tracks;
use crate::config::PlayerConfig;
use crate::error::{PlayerError, Result};
use crate::events::EventStream;
use crate::mixer::MixerState;
use crate::monitor::{spawn_monitor, Monitored};
use crate::nodes::AudioTap;
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::playback::BlockRenderer;
use crate::player::SequencePlayer;
use crate::primitives::{Beat, Second};
use crate::sequence::Sequence;
use crate::soundbank::BankProvider;
use crate::transport::{AtomicTransport, TransportState};

/// One loaded sequence playing through one pipeline
pub struct Session {
    id: Uuid,
    sequence: Arc<Sequence>,
    player: SequencePlayer,
    pipeline: Mutex<Pipeline>,
    transport: AtomicTransport,
    longest: Second,
    cancel: CancellationToken,
    /// Serializes transport calls with the end of the session
    control: Mutex<()>,
    disposed: AtomicBool,
}

impl Session {
    /// Load, build, bind and preroll
    pub fn open(
        config: &PlayerConfig,
        bank: &dyn BankProvider,
        path: PathBuf,
        programs: &[u8],
    ) -> Result<Self> {
        let mut sequence = Sequence::load(&path, config.load_mode)?;
        let mut pipeline =
            PipelineBuilder::new(config.pipeline_settings()).build(programs, bank, &mut sequence)?;
        bind_tracks(&mut sequence, &pipeline)?;

        let sequence = Arc::new(sequence);
        let compiled = pipeline.compile()?;
        let renderer = BlockRenderer::new(compiled, Arc::clone(&sequence), config.sample_rate);
        let player = SequencePlayer::new(Arc::clone(&sequence));
        player.preroll(renderer).map_err(PlayerError::RenderThread)?;

        let longest = sequence.seconds_for_beats(sequence.longest_track());
        let session = Self {
            id: Uuid::new_v4(),
            sequence,
            player,
            pipeline: Mutex::new(pipeline),
            transport: AtomicTransport::default(),
            longest,
            cancel: CancellationToken::new(),
            control: Mutex::new(()),
            disposed: AtomicBool::new(false),
        };

        info!(
            session = %session.id,
            path = %path.display(),
            tracks = session.sequence.track_count(),
            voices = programs.len(),
            longest_s = longest.0,
            "session ready"
        );
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sequence(&self) -> &Arc<Sequence> {
        &self.sequence
    }

    pub fn state(&self) -> TransportState {
        self.transport.load()
    }

    pub fn longest_track(&self) -> Second {
        self.longest
    }

    pub fn play(&self) -> Result<()> {
        let _control = self.control();
        // Stopped by stop() or end of track: the monitor is tearing down
        if self.cancel.is_cancelled() {
            return Err(PlayerError::released("play"));
        }
        let from = self
            .transport
            .play()
            .map_err(|r| PlayerError::illegal("play", r))?;
        self.player.start();
        info!(session = %self.id, %from, "play");
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        let _control = self.control();
        self.transport
            .pause()
            .map_err(|r| PlayerError::illegal("pause", r))?;
        self.player.stop();
        info!(session = %self.id, position = %self.player.time(), "pause");
        Ok(())
    }

    /// Stop and rewind. Ends the session once the monitor has reported it.
    pub fn stop(&self) -> Result<()> {
        let _control = self.control();
        let from = self
            .transport
            .stop()
            .map_err(|r| PlayerError::illegal("stop", r))?;
        self.player.stop();
        self.player.set_time(Beat::zero());
        self.cancel.cancel();
        info!(session = %self.id, %from, "stop");
        Ok(())
    }

    pub fn seek(&self, to: Second) -> Result<()> {
        self.transport
            .ensure_live()
            .map_err(|r| PlayerError::illegal("seek", r))?;
        let beat = self.sequence.beats_for_seconds(to);
        self.player.set_time(beat);
        debug!(session = %self.id, seconds = to.0, %beat, "seek");
        Ok(())
    }

    /// Player time in beats
    pub fn position(&self) -> Result<Beat> {
        self.transport
            .ensure_live()
            .map_err(|r| PlayerError::illegal("read position", r))?;
        Ok(self.player.time())
    }

    /// Player time in seconds
    pub fn elapsed(&self) -> Result<Second> {
        self.transport
            .ensure_live()
            .map_err(|r| PlayerError::illegal("read position", r))?;
        Ok(self.player.elapsed())
    }

    pub fn release(&self) -> Result<()> {
        let _control = self.control();
        let from = self
            .transport
            .release()
            .map_err(|r| PlayerError::illegal("release", r))?;
        if from != TransportState::Stopped {
            self.player.stop();
        }
        self.dispose();
        self.cancel.cancel();
        info!(session = %self.id, %from, "released");
        Ok(())
    }

    pub fn mixer(&self) -> Arc<MixerState> {
        Arc::clone(self.lock_pipeline().mixer_state())
    }

    pub fn take_output_tap(&self) -> Option<AudioTap> {
        self.lock_pipeline().take_output_tap()
    }

    fn control(&self) -> MutexGuard<'_, ()> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pipeline(&self) -> MutexGuard<'_, Pipeline> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the render thread and shut every unit down. Runs once.
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.player.dispose();
        self.lock_pipeline().dispose();
        debug!(session = %self.id, "pipeline disposed");
    }
}

impl Monitored for Session {
    fn transport_state(&self) -> TransportState {
        self.transport.load()
    }

    fn elapsed(&self) -> Second {
        self.player.elapsed()
    }

    fn longest_track(&self) -> Second {
        self.longest
    }

    fn end_of_track(&self) {
        let _control = self.control();
        if self.transport.stop().is_ok() {
            self.player.stop();
            self.player.set_time(Beat::zero());
            info!(session = %self.id, "reached end of track");
        }
        self.cancel.cancel();
    }

    fn finish(&self) {
        let _ = self.transport.release();
        self.dispose();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// MIDI sequence player
///
/// ```no_run
/// # async fn demo() -> Result<(), carillon::PlayerError> {
/// use futures::StreamExt;
///
/// let player = carillon::MidiPlayer::new(carillon::PlayerConfig::default());
/// let mut events = player.setup("song.mid", &["0".into(), "33".into()]).await?;
/// player.play()?;
/// while let Some(event) = events.next().await {
///     println!("{}", event.code());
/// }
/// # Ok(())
/// # }
/// ```
pub struct MidiPlayer {
    config: PlayerConfig,
    bank: Arc<dyn BankProvider>,
    session: RwLock<Option<Arc<Session>>>,
}

impl MidiPlayer {
    /// Player resolving its sound bank from the configured directories
    pub fn new(config: PlayerConfig) -> Self {
        let bank = Arc::new(config.locator());
        Self::with_bank_provider(config, bank)
    }

    pub fn with_bank_provider(config: PlayerConfig, bank: Arc<dyn BankProvider>) -> Self {
        Self {
            config,
            bank,
            session: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Load `path` and build one voice per program
    ///
    /// Programs are decimal strings in `0..=127`; voice `i` plays track `i`.
    /// The returned stream carries this session's lifecycle events and ends
    /// when the session does.
    pub async fn setup(&self, path: &str, programs: &[String]) -> Result<EventStream> {
        if path.trim().is_empty() {
            return Err(PlayerError::InvalidArguments("empty path".to_string()));
        }
        let programs = parse_programs(programs)?;

        if self.has_live_session() {
            return Err(PlayerError::SessionActive);
        }

        let config = self.config.clone();
        let bank = Arc::clone(&self.bank);
        let path = PathBuf::from(path);
        debug!(path = %path.display(), bank = %bank.describe(), ?programs, "setup");

        let opened = tokio::task::spawn_blocking(move || {
            Session::open(&config, bank.as_ref(), path, &programs)
        })
        .await
        .map_err(|e| PlayerError::Setup(e.to_string()));

        let session = match opened.and_then(|r| r) {
            Ok(session) => Arc::new(session),
            Err(e) => {
                warn!("setup failed: {}", e);
                let mut slot = self.write_slot();
                if slot.as_ref().is_some_and(|s| s.state() == TransportState::Released) {
                    *slot = None;
                }
                return Err(e);
            }
        };

        {
            let mut slot = self.write_slot();
            if slot
                .as_ref()
                .is_some_and(|s| s.state() != TransportState::Released)
            {
                // Lost a race with a concurrent setup
                return Err(PlayerError::SessionActive);
            }
            *slot = Some(Arc::clone(&session));
        }

        let (tx, stream) = EventStream::channel();
        let cancel = session.cancel.clone();
        spawn_monitor(session, self.config.poll_interval, cancel, tx);
        Ok(stream)
    }

    pub fn play(&self) -> Result<()> {
        self.session("play")?.play()
    }

    pub fn pause(&self) -> Result<()> {
        self.session("pause")?.pause()
    }

    pub fn stop(&self) -> Result<()> {
        self.session("stop")?.stop()
    }

    pub fn release(&self) -> Result<()> {
        self.session("release")?.release()
    }

    /// Seek to a millisecond offset given as a decimal string
    pub fn seek_to(&self, time_ms: &str) -> Result<()> {
        let session = self.session("seek")?;
        let ms: f64 = time_ms.trim().parse().map_err(|_| {
            PlayerError::InvalidArguments(format!("seek time '{}' is not a number", time_ms))
        })?;
        session.seek(checked_seconds(Second::from_millis(ms))?)
    }

    pub fn seek(&self, to: Second) -> Result<()> {
        let session = self.session("seek")?;
        session.seek(checked_seconds(to)?)
    }

    /// Raw player time in beats, formatted as a decimal string
    pub fn get_current_position(&self) -> Result<String> {
        Ok(self.position()?.to_string())
    }

    pub fn position(&self) -> Result<Beat> {
        self.session("read position")?.position()
    }

    /// Player time converted to seconds through the tempo map
    pub fn elapsed(&self) -> Result<Second> {
        self.session("read position")?.elapsed()
    }

    pub fn transport_state(&self) -> TransportState {
        self.read_slot()
            .as_ref()
            .map_or(TransportState::Released, |s| s.state())
    }

    pub fn track_count(&self) -> Result<usize> {
        Ok(self.session("count tracks")?.sequence().track_count())
    }

    pub fn longest_track(&self) -> Result<Second> {
        Ok(self.session("measure tracks")?.longest_track())
    }

    pub fn mixer(&self) -> Result<Arc<MixerState>> {
        Ok(self.session("open mixer")?.mixer())
    }

    /// Reading end of the session's output; `None` once taken
    pub fn take_output_tap(&self) -> Option<AudioTap> {
        self.read_slot().as_ref()?.take_output_tap()
    }

    fn has_live_session(&self) -> bool {
        self.read_slot()
            .as_ref()
            .is_some_and(|s| s.state() != TransportState::Released)
    }

    /// The live session, or an illegal-state error naming `op`
    fn session(&self, op: &'static str) -> Result<Arc<Session>> {
        match self.read_slot().as_ref() {
            Some(session) if session.state() != TransportState::Released => {
                Ok(Arc::clone(session))
            }
            _ => Err(PlayerError::released(op)),
        }
    }

    fn read_slot(&self) -> std::sync::RwLockReadGuard<'_, Option<Arc<Session>>> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slot(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<Session>>> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_programs(programs: &[String]) -> Result<Vec<u8>> {
    if programs.is_empty() {
        return Err(PlayerError::InvalidArguments(
            "at least one program is required".to_string(),
        ));
    }
    programs
        .iter()
        .map(|p| match p.trim().parse::<u8>() {
            Ok(program) if program <= 127 => Ok(program),
            _ => Err(PlayerError::InvalidArguments(format!(
                "program '{}' is not in 0..=127",
                p
            ))),
        })
        .collect()
}

fn checked_seconds(to: Second) -> Result<Second> {
    if to.0.is_finite() && to.0 >= 0.0 {
        Ok(to)
    } else {
        Err(PlayerError::InvalidArguments(format!(
            "seek time {} s is not a non-negative number",
            to.0
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_programs() {
        assert_eq!(parse_programs(&strings(&["0", " 42 ", "127"])).unwrap(), vec![0, 42, 127]);

        for bad in [&["128"][..], &["-1"], &["piano"], &[""]] {
            let err = parse_programs(&strings(bad)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArguments, "{:?}", bad);
        }
        assert_eq!(
            parse_programs(&[]).unwrap_err().kind(),
            ErrorKind::InvalidArguments
        );
    }

    #[test]
    fn test_checked_seconds() {
        assert!(checked_seconds(Second(0.0)).is_ok());
        assert!(checked_seconds(Second(-0.001)).is_err());
        assert!(checked_seconds(Second(f64::NAN)).is_err());
        assert!(checked_seconds(Second(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_no_session_is_released() {
        let player = MidiPlayer::with_bank_provider(
            PlayerConfig::default(),
            Arc::new(crate::soundbank::MemoryBank::new("test")),
        );
        assert_eq!(player.transport_state(), TransportState::Released);

        for result in [player.play(), player.pause(), player.stop(), player.release()] {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::IllegalStateTransition);
        }
        assert!(player.get_current_position().is_err());
        assert!(player.seek_to("100").is_err());
        assert!(player.take_output_tap().is_none());
    }

    #[tokio::test]
    async fn test_setup_validates_arguments() {
        let player = MidiPlayer::with_bank_provider(
            PlayerConfig::default(),
            Arc::new(crate::soundbank::MemoryBank::new("test")),
        );

        let err = player.setup("", &strings(&["0"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);

        let err = player.setup("song.mid", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);

        let err = player
            .setup("/nonexistent/song.mid", &strings(&["0"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NativeResource);
        assert_eq!(player.transport_state(), TransportState::Released);
    }
}
