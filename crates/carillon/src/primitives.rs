//! Core primitives for carillon
//!
//! Time, Signal, and Node types that form the foundation of the voice
//! graph and the sequence timeline.

use std::ops::{Add, Sub};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::soundbank::{Instrument, PresetId};

// =============================================================================
// TIME TYPES
// =============================================================================

/// Pulses per quarter note - standard MIDI resolution
pub const DEFAULT_PPQ: u16 = 960;

/// Tempo assumed until the first tempo event
pub const DEFAULT_BPM: f64 = 120.0;

/// A tick is the smallest unit of musical time (1/PPQ of a quarter note)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tick(pub u64);

impl Tick {
    pub fn zero() -> Self {
        Self(0)
    }
}

impl Add for Tick {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Tick(self.0 + rhs.0)
    }
}

impl Sub for Tick {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Tick(self.0.saturating_sub(rhs.0))
    }
}

/// Musical time in beats (quarter notes)
///
/// This is the sequence's native time unit: player time, track lengths and
/// event stamps are all expressed in beats.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Default)]
pub struct Beat(pub f64);

impl Beat {
    pub fn zero() -> Self {
        Self(0.0)
    }
}

impl Add for Beat {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Beat(self.0 + rhs.0)
    }
}

impl Sub for Beat {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Beat((self.0 - rhs.0).max(0.0))
    }
}

impl std::fmt::Display for Beat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical time in seconds
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Default)]
pub struct Second(pub f64);

impl Second {
    pub fn zero() -> Self {
        Self(0.0)
    }

    pub fn from_millis(ms: f64) -> Self {
        Self(ms / 1000.0)
    }
}

impl Add for Second {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Second(self.0 + rhs.0)
    }
}

impl Sub for Second {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Second((self.0 - rhs.0).max(0.0))
    }
}

/// Audio sample position
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Sample(pub u64);

impl Add for Sample {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Sample(self.0 + rhs.0)
    }
}

/// A tempo change at a specific tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoChange {
    pub tick: Tick,
    pub bpm: f64,
}

/// Tempo map for converting between time representations
///
/// Read-only once a sequence is loaded; the player never edits tempo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoMap {
    pub ppq: u16,
    pub tempo_changes: Vec<TempoChange>,
}

impl TempoMap {
    /// A constant tempo until changes are added
    pub fn new(bpm: f64) -> Self {
        Self {
            ppq: DEFAULT_PPQ,
            tempo_changes: vec![TempoChange {
                tick: Tick::zero(),
                bpm,
            }],
        }
    }

    /// Create a tempo map at the file's resolution
    pub fn with_ppq(ppq: u16) -> Self {
        Self {
            ppq: ppq.max(1),
            ..Self::default()
        }
    }

    /// Set the base tempo (at tick 0)
    /// This replaces the initial tempo, leaving any later tempo changes intact
    pub fn set_base_tempo(&mut self, bpm: f64) {
        if let Some(first) = self.tempo_changes.first_mut() {
            if first.tick == Tick::zero() {
                first.bpm = bpm;
                return;
            }
        }
        self.tempo_changes.insert(0, TempoChange { tick: Tick::zero(), bpm });
    }

    /// Get tempo at a given tick
    pub fn tempo_at(&self, tick: Tick) -> f64 {
        self.tempo_changes
            .iter()
            .rev()
            .find(|tc| tc.tick <= tick)
            .map(|tc| tc.bpm)
            .unwrap_or(DEFAULT_BPM)
    }

    /// Convert tick to beat
    pub fn tick_to_beat(&self, tick: Tick) -> Beat {
        Beat(tick.0 as f64 / self.ppq as f64)
    }

    /// Convert beat to tick
    pub fn beat_to_tick(&self, beat: Beat) -> Tick {
        Tick((beat.0.max(0.0) * self.ppq as f64).round() as u64)
    }

    /// Seconds elapsed from beat 0 to `beat`, integrating through every
    /// tempo change on the way.
    pub fn beat_to_second(&self, beat: Beat) -> Second {
        let target = beat.0.max(0.0);
        let mut seconds = 0.0;
        let mut cursor = 0.0;
        let mut tempo = self.tempo_at(Tick::zero());

        for change in &self.tempo_changes {
            let at = self.tick_to_beat(change.tick).0;
            if at >= target {
                break;
            }
            if at > cursor {
                seconds += (at - cursor) * 60.0 / tempo;
                cursor = at;
            }
            tempo = change.bpm;
        }

        seconds += (target - cursor) * 60.0 / tempo;
        Second(seconds)
    }

    /// Inverse of [`TempoMap::beat_to_second`]
    pub fn second_to_beat(&self, second: Second) -> Beat {
        let mut remaining = second.0.max(0.0);
        let mut cursor = 0.0;
        let mut tempo = self.tempo_at(Tick::zero());

        for change in &self.tempo_changes {
            let at = self.tick_to_beat(change.tick).0;
            if at > cursor {
                let span = (at - cursor) * 60.0 / tempo;
                if remaining <= span {
                    break;
                }
                remaining -= span;
                cursor = at;
            }
            tempo = change.bpm;
        }

        Beat(cursor + remaining * tempo / 60.0)
    }

    /// Add a tempo change
    pub fn add_tempo_change(&mut self, tick: Tick, bpm: f64) {
        self.tempo_changes.push(TempoChange { tick, bpm });
        self.tempo_changes.sort_by_key(|tc| tc.tick);
    }
}

impl Default for TempoMap {
    fn default() -> Self {
        Self::new(DEFAULT_BPM)
    }
}

// =============================================================================
// SIGNAL TYPES
// =============================================================================

/// Type of signal flowing through the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    Audio,
    Midi,
}

/// Audio buffer with interleaved samples
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub channels: u8,
}

impl AudioBuffer {
    pub fn new(frames: usize, channels: u8) -> Self {
        Self {
            samples: vec![0.0; frames * channels as usize],
            channels,
        }
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn mix(&mut self, other: &AudioBuffer, gain: f32) {
        if self.samples.len() == other.samples.len() {
            for (s, o) in self.samples.iter_mut().zip(other.samples.iter()) {
                *s += o * gain;
            }
        }
    }

    pub fn clear(&mut self) {
        self.samples.fill(0.0);
    }

    /// Peak absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

/// MIDI event at a specific frame
#[derive(Debug, Clone)]
pub struct MidiEvent {
    pub frame: usize,
    pub message: MidiMessage,
}

/// MIDI channel messages carried by sequence tracks
#[derive(Debug, Clone, PartialEq)]
pub enum MidiMessage {
    NoteOn {
        channel: u8,
        pitch: u8,
        velocity: u8,
    },
    NoteOff {
        channel: u8,
        pitch: u8,
    },
    PolyPressure {
        channel: u8,
        pitch: u8,
        pressure: u8,
    },
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
    ProgramChange {
        channel: u8,
        program: u8,
    },
    ChannelPressure {
        channel: u8,
        pressure: u8,
    },
    PitchBend {
        channel: u8,
        value: i16,
    },
}

impl MidiMessage {
    pub fn channel(&self) -> u8 {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => channel,
        }
    }
}

/// Buffer of MIDI events
#[derive(Debug, Clone, Default)]
pub struct MidiBuffer {
    pub events: Vec<MidiEvent>,
}

impl MidiBuffer {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, frame: usize, message: MidiMessage) {
        self.events.push(MidiEvent { frame, message });
    }

    pub fn merge(&mut self, other: &MidiBuffer) {
        self.events.extend(other.events.iter().cloned());
        self.events.sort_by_key(|e| e.frame);
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Union type for all signal buffers
#[derive(Debug, Clone)]
pub enum SignalBuffer {
    Audio(AudioBuffer),
    Midi(MidiBuffer),
}

impl SignalBuffer {
    /// Allocate an empty buffer for a port of the given type
    pub fn for_port(signal_type: SignalType, frames: usize) -> Self {
        match signal_type {
            SignalType::Audio => SignalBuffer::Audio(AudioBuffer::new(frames, 2)),
            SignalType::Midi => SignalBuffer::Midi(MidiBuffer::new()),
        }
    }

    pub fn clear(&mut self) {
        match self {
            SignalBuffer::Audio(ab) => ab.clear(),
            SignalBuffer::Midi(mb) => mb.clear(),
        }
    }

    pub fn as_audio(&self) -> Option<&AudioBuffer> {
        match self {
            SignalBuffer::Audio(ab) => Some(ab),
            SignalBuffer::Midi(_) => None,
        }
    }

    pub fn as_midi(&self) -> Option<&MidiBuffer> {
        match self {
            SignalBuffer::Midi(mb) => Some(mb),
            SignalBuffer::Audio(_) => None,
        }
    }
}

// =============================================================================
// NODE TYPES
// =============================================================================

/// Identifier of a unit inside the graph
pub type NodeId = Uuid;

/// Port definition for a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub signal_type: SignalType,
}

impl Port {
    pub fn audio(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signal_type: SignalType::Audio,
        }
    }

    pub fn midi(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signal_type: SignalType::Midi,
        }
    }
}

/// Descriptor for a node in the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: NodeId,
    pub name: String,
    pub type_id: String,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
}

/// Context passed to nodes during processing
#[derive(Clone)]
pub struct ProcessContext {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub position_samples: Sample,
    pub position_beats: Beat,
    pub tempo_map: Arc<TempoMap>,
}

/// Error during node processing
#[derive(Debug, Clone)]
pub enum ProcessError {
    Skipped { reason: &'static str },
    Failed { reason: String },
}

/// A property applied to an opened unit
pub enum UnitProperty {
    /// Install the instrument rendering a voice's preset
    Instrument {
        preset: PresetId,
        instrument: Box<dyn Instrument>,
    },
}

impl UnitProperty {
    pub fn name(&self) -> &'static str {
        match self {
            UnitProperty::Instrument { .. } => "instrument",
        }
    }
}

impl std::fmt::Debug for UnitProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitProperty::Instrument { preset, .. } => f
                .debug_struct("Instrument")
                .field("preset", preset)
                .finish_non_exhaustive(),
        }
    }
}

/// Trait for audio processing nodes
pub trait Node: Send + Sync {
    fn descriptor(&self) -> &NodeDescriptor;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        inputs: &[SignalBuffer],
        outputs: &mut [SignalBuffer],
    ) -> Result<(), ProcessError>;

    /// Apply a unit property. Units that do not understand the property
    /// hand it back unchanged.
    fn set_property(&mut self, property: UnitProperty) -> Result<(), UnitProperty> {
        Err(property)
    }

    fn reset(&mut self) {}

    fn shutdown(&mut self) {}
}

/// Type alias for boxed node
pub type BoxedNode = Box<dyn Node>;
