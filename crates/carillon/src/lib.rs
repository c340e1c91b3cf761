//! Carillon: MIDI sequence player
//!
//! Loads a Standard MIDI File, builds one SoundFont voice per track, sums
//! the voices through a stereo mixer into an output unit, and plays the
//! result under a small transport.
//!
//! - **Setup** builds the unit graph: N voices, a mixer, an output
//! - **Binder** routes track `i` to voice `i`
//! - **Transport** play, pause, stop, seek, release
//! - **Monitor** polls the transport and emits lifecycle events
//!   (`0` stopped, `2` started, `3` paused) until the session ends
//!
//! Audio leaves through an [`AudioTap`]: drained into a WAV file by
//! [`WavSink`], or into PipeWire with the `pipewire` feature.

pub mod binder;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod midi_file;
pub mod mixer;
pub mod monitor;
pub mod nodes;
pub mod pipeline;
#[cfg(feature = "pipewire")]
pub mod pipewire_output;
pub mod playback;
pub mod player;
pub mod primitives;
pub mod sequence;
pub mod session;
pub mod sink;
pub mod soundbank;
pub mod tick_clock;
pub mod transport;

pub use binder::bind_tracks;
pub use config::PlayerConfig;
pub use error::{ErrorKind, PlayerError, Result};
pub use events::{EventSender, EventStream, LifecycleEvent};
pub use graph::{Edge, Graph, GraphDraft, GraphError, GraphSnapshot, UnitKind, UnitSettings};
pub use midi_file::{parse_midi_file, LoadMode};
pub use mixer::{MixerChannel, MixerState};
pub use monitor::{spawn_monitor, Monitored, MonitorState, Step};
pub use nodes::{AudioTap, MixerNode, OutputNode, OutputStats, VoiceNode};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, PipelineSettings, Voice};
#[cfg(feature = "pipewire")]
pub use pipewire_output::{
    PipeWireOutputConfig, PipeWireOutputError, PipeWireOutputStream, StreamStats,
};
pub use playback::{
    render_to_wav, BlockRenderer, CompileError, CompiledGraph, RenderError, RenderStats,
    Sequencer,
};
pub use player::SequencePlayer;
pub use primitives::*;
pub use sequence::{Sequence, SequenceError, TimedMessage, Track};
pub use session::{MidiPlayer, Session};
pub use sink::{SinkError, WavSink};
pub use soundbank::{
    BankProvider, Instrument, MemoryBank, PresetId, SoundBank, SoundBankError, SoundBankLocator,
    SoundFontBank, DEFAULT_SOUND_BANK,
};
pub use tick_clock::TickClock;
pub use transport::{AtomicTransport, TransportState};
