//! Sound banks and the instruments they instantiate
//!
//! A sound bank holds sampled-instrument presets addressed by bank select and
//! program number. Each voice in the pipeline gets its own [`Instrument`]
//! built from the shared bank:
//!
//! - [`SoundFontBank`]: SF2 files parsed by rustysynth, one `Synthesizer`
//!   per voice sharing a single `Arc<SoundFont>`
//! - [`MemoryBank`]: sine voices with no file behind them (tests, dry runs)
//!
//! [`BankProvider`] is the resolution seam the pipeline builder calls: a
//! [`SoundBankLocator`] searches directories for the bank's logical name and
//! fails hard when it is absent.

use std::collections::BTreeSet;
use std::f32::consts::TAU;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::primitives::MidiMessage;

/// Bank select MSB for the default melodic bank
pub const DEFAULT_MELODIC_BANK_MSB: u8 = 0x79;

/// Bank select LSB for the default bank
pub const DEFAULT_BANK_LSB: u8 = 0;

/// Logical name the bank is resolved by when nothing else is configured
pub const DEFAULT_SOUND_BANK: &str = "sounds.sf2";

/// Identifies one preset inside a sound bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetId {
    pub bank_msb: u8,
    pub bank_lsb: u8,
    pub program: u8,
}

impl PresetId {
    /// Preset in the default melodic bank
    pub fn melodic(program: u8) -> Self {
        Self {
            bank_msb: DEFAULT_MELODIC_BANK_MSB,
            bank_lsb: DEFAULT_BANK_LSB,
            program,
        }
    }
}

impl std::fmt::Display for PresetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "bank {}/{} program {}",
            self.bank_msb, self.bank_lsb, self.program
        )
    }
}

/// Errors from locating, parsing or instantiating sound banks
#[derive(Debug, thiserror::Error)]
pub enum SoundBankError {
    #[error("Sound bank '{name}' not found (searched {searched:?})")]
    NotFound { name: String, searched: Vec<PathBuf> },

    #[error("Failed to read sound bank {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse sound bank {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Preset not found: bank {bank} program {program}")]
    PresetNotFound { bank: u8, program: u8 },

    #[error("Failed to create synthesizer: {0}")]
    Synth(String),
}

/// A voice's sound generator
///
/// Receives the MIDI messages routed to its voice and renders stereo audio.
/// The preset is fixed when the instrument is instantiated.
pub trait Instrument: Send + Sync {
    fn handle(&mut self, message: &MidiMessage);

    /// Render `left.len()` frames, overwriting both slices
    fn render(&mut self, left: &mut [f32], right: &mut [f32]);

    fn all_notes_off(&mut self);
}

/// A collection of presets that voices instantiate instruments from
pub trait SoundBank: Send + Sync {
    fn name(&self) -> &str;

    fn has_preset(&self, preset: PresetId) -> bool;

    fn preset_name(&self, preset: PresetId) -> Option<String>;

    fn instantiate(
        &self,
        preset: PresetId,
        sample_rate: u32,
    ) -> Result<Box<dyn Instrument>, SoundBankError>;
}

/// Resolves the shared sound bank at pipeline build time
pub trait BankProvider: Send + Sync {
    /// Human-readable description for logs and errors
    fn describe(&self) -> String;

    fn resolve(&self) -> Result<Arc<dyn SoundBank>, SoundBankError>;
}

// =============================================================================
// SOUNDFONT (rustysynth)
// =============================================================================

/// SF2 sound bank backed by rustysynth
pub struct SoundFontBank {
    name: String,
    font: Arc<SoundFont>,
    max_polyphony: usize,
}

impl SoundFontBank {
    /// Parse an SF2 file
    pub fn open(path: &Path, max_polyphony: usize) -> Result<Self, SoundBankError> {
        let file = File::open(path).map_err(|source| SoundBankError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let font = SoundFont::new(&mut reader).map_err(|e| SoundBankError::Parse {
            path: path.to_path_buf(),
            message: format!("{:?}", e),
        })?;

        info!(
            path = %path.display(),
            presets = font.get_presets().len(),
            "loaded SoundFont"
        );

        Ok(Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            font: Arc::new(font),
            max_polyphony,
        })
    }

    /// All (bank, program, name) triples, sorted
    pub fn presets(&self) -> Vec<(i32, i32, String)> {
        let mut presets: Vec<_> = self
            .font
            .get_presets()
            .iter()
            .map(|p| {
                (
                    p.get_bank_number(),
                    p.get_patch_number(),
                    p.get_name().to_string(),
                )
            })
            .collect();
        presets.sort();
        presets
    }

    /// rustysynth falls back to bank 0 when the selected bank lacks the
    /// program, so either match is playable.
    fn find_preset(&self, preset: PresetId) -> Option<&rustysynth::Preset> {
        let program = preset.program as i32;
        let presets = self.font.get_presets();
        presets
            .iter()
            .find(|p| p.get_patch_number() == program && p.get_bank_number() == preset.bank_msb as i32)
            .or_else(|| {
                presets
                    .iter()
                    .find(|p| p.get_patch_number() == program && p.get_bank_number() == 0)
            })
    }
}

impl SoundBank for SoundFontBank {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_preset(&self, preset: PresetId) -> bool {
        self.find_preset(preset).is_some()
    }

    fn preset_name(&self, preset: PresetId) -> Option<String> {
        self.find_preset(preset).map(|p| p.get_name().to_string())
    }

    fn instantiate(
        &self,
        preset: PresetId,
        sample_rate: u32,
    ) -> Result<Box<dyn Instrument>, SoundBankError> {
        if !self.has_preset(preset) {
            return Err(SoundBankError::PresetNotFound {
                bank: preset.bank_msb,
                program: preset.program,
            });
        }

        let mut settings = SynthesizerSettings::new(sample_rate as i32);
        settings.maximum_polyphony = self.max_polyphony.max(1);
        let mut synth = Synthesizer::new(&self.font, &settings)
            .map_err(|e| SoundBankError::Synth(format!("{:?}", e)))?;

        // Bank select then program change, all on channel 0
        synth.process_midi_message(0, 0xB0, 0x00, preset.bank_msb as i32);
        synth.process_midi_message(0, 0xB0, 0x20, preset.bank_lsb as i32);
        synth.process_midi_message(0, 0xC0, preset.program as i32, 0);

        Ok(Box::new(SynthInstrument { synth }))
    }
}

struct SynthInstrument {
    synth: Synthesizer,
}

impl Instrument for SynthInstrument {
    fn handle(&mut self, message: &MidiMessage) {
        if let Some((command, data1, data2)) = synth_command(message) {
            self.synth.process_midi_message(0, command, data1, data2);
        }
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.synth.render(left, right);
    }

    fn all_notes_off(&mut self) {
        self.synth.note_off_all(false);
    }
}

/// Fold a track message onto the voice's channel 0.
///
/// Program and bank changes are dropped: the voice's preset is fixed.
fn synth_command(message: &MidiMessage) -> Option<(i32, i32, i32)> {
    match *message {
        MidiMessage::NoteOn { pitch, velocity, .. } => Some((0x90, pitch as i32, velocity as i32)),
        MidiMessage::NoteOff { pitch, .. } => Some((0x80, pitch as i32, 0)),
        MidiMessage::PolyPressure {
            pitch, pressure, ..
        } => Some((0xA0, pitch as i32, pressure as i32)),
        MidiMessage::ControlChange {
            controller: 0x00 | 0x20,
            ..
        } => None,
        MidiMessage::ControlChange {
            controller, value, ..
        } => Some((0xB0, controller as i32, value as i32)),
        MidiMessage::ProgramChange { .. } => None,
        MidiMessage::ChannelPressure { pressure, .. } => Some((0xD0, pressure as i32, 0)),
        MidiMessage::PitchBend { value, .. } => {
            let raw = (value as i32 + 8192).clamp(0, 16383);
            Some((0xE0, raw & 0x7F, raw >> 7))
        }
    }
}

// =============================================================================
// IN-MEMORY BANK
// =============================================================================

/// Sine-wave bank with no backing file
///
/// Every program renders a plain sine at the note's pitch. Restricting the
/// program set lets callers exercise missing-preset handling.
#[derive(Debug, Clone)]
pub struct MemoryBank {
    name: String,
    programs: Option<BTreeSet<u8>>,
}

impl MemoryBank {
    /// Bank offering every program 0..=127
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            programs: None,
        }
    }

    /// Bank offering only the given programs
    pub fn with_programs(name: impl Into<String>, programs: impl IntoIterator<Item = u8>) -> Self {
        Self {
            name: name.into(),
            programs: Some(programs.into_iter().collect()),
        }
    }
}

impl SoundBank for MemoryBank {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_preset(&self, preset: PresetId) -> bool {
        preset.program < 128
            && self
                .programs
                .as_ref()
                .map_or(true, |programs| programs.contains(&preset.program))
    }

    fn preset_name(&self, preset: PresetId) -> Option<String> {
        self.has_preset(preset)
            .then(|| format!("sine {}", preset.program))
    }

    fn instantiate(
        &self,
        preset: PresetId,
        sample_rate: u32,
    ) -> Result<Box<dyn Instrument>, SoundBankError> {
        if !self.has_preset(preset) {
            return Err(SoundBankError::PresetNotFound {
                bank: preset.bank_msb,
                program: preset.program,
            });
        }
        Ok(Box::new(SineInstrument::new(sample_rate)))
    }
}

impl BankProvider for MemoryBank {
    fn describe(&self) -> String {
        format!("memory bank '{}'", self.name)
    }

    fn resolve(&self) -> Result<Arc<dyn SoundBank>, SoundBankError> {
        Ok(Arc::new(self.clone()))
    }
}

struct SineVoice {
    pitch: u8,
    phase: f32,
    step: f32,
    amp: f32,
}

struct SineInstrument {
    sample_rate: f32,
    voices: Vec<SineVoice>,
}

impl SineInstrument {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1) as f32,
            voices: Vec::with_capacity(16),
        }
    }
}

impl Instrument for SineInstrument {
    fn handle(&mut self, message: &MidiMessage) {
        match *message {
            MidiMessage::NoteOn {
                pitch, velocity, ..
            } => {
                let freq = 440.0 * 2f32.powf((pitch as f32 - 69.0) / 12.0);
                self.voices.retain(|v| v.pitch != pitch);
                self.voices.push(SineVoice {
                    pitch,
                    phase: 0.0,
                    step: TAU * freq / self.sample_rate,
                    amp: 0.2 * velocity as f32 / 127.0,
                });
            }
            MidiMessage::NoteOff { pitch, .. } => self.voices.retain(|v| v.pitch != pitch),
            _ => {}
        }
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        left.fill(0.0);
        right.fill(0.0);
        for voice in &mut self.voices {
            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                let s = voice.phase.sin() * voice.amp;
                *l += s;
                *r += s;
                voice.phase = (voice.phase + voice.step) % TAU;
            }
        }
    }

    fn all_notes_off(&mut self) {
        self.voices.clear();
    }
}

// =============================================================================
// LOCATOR
// =============================================================================

/// Finds a sound bank file by logical name in a list of directories
#[derive(Debug, Clone)]
pub struct SoundBankLocator {
    pub name: String,
    pub dirs: Vec<PathBuf>,
    pub max_polyphony: usize,
}

impl SoundBankLocator {
    pub fn new(name: impl Into<String>, dirs: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dirs,
            max_polyphony: 64,
        }
    }

    /// First existing candidate. An absolute name is used as-is.
    pub fn locate(&self) -> Option<PathBuf> {
        let direct = Path::new(&self.name);
        if direct.is_absolute() {
            return direct.is_file().then(|| direct.to_path_buf());
        }

        self.dirs
            .iter()
            .map(|dir| dir.join(&self.name))
            .find(|candidate| candidate.is_file())
    }
}

impl Default for SoundBankLocator {
    fn default() -> Self {
        Self::new(DEFAULT_SOUND_BANK, Vec::new())
    }
}

impl BankProvider for SoundBankLocator {
    fn describe(&self) -> String {
        format!("'{}' in {:?}", self.name, self.dirs)
    }

    fn resolve(&self) -> Result<Arc<dyn SoundBank>, SoundBankError> {
        let path = self.locate().ok_or_else(|| SoundBankError::NotFound {
            name: self.name.clone(),
            searched: self.dirs.clone(),
        })?;
        debug!(path = %path.display(), "resolved sound bank");
        Ok(Arc::new(SoundFontBank::open(&path, self.max_polyphony)?))
    }
}
