//! Standard MIDI File parsing
//!
//! Turns SMF bytes into per-track channel events plus a [`TempoMap`].
//! Converts from midly's event types to our MidiMessage format.

use std::collections::BTreeMap;
use std::str::FromStr;

use midly::{MetaMessage, MidiMessage as MidlyMessage, Smf, Timing, TrackEventKind};
use serde::{Deserialize, Serialize};

use crate::primitives::{MidiMessage, TempoMap, Tick};
use crate::sequence::SequenceError;

/// Resolution assumed for SMPTE-timed files
pub const SMPTE_FALLBACK_PPQ: u16 = 480;

/// How SMF content is split into sequence tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// One track per MIDI channel that carries events, ordered by channel
    #[default]
    ChannelsToTracks,
    /// One track per SMF track that carries channel events, in file order
    PreserveTracks,
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "channels_to_tracks" | "channels" => Ok(LoadMode::ChannelsToTracks),
            "preserve_tracks" | "tracks" => Ok(LoadMode::PreserveTracks),
            other => Err(format!(
                "unknown load mode '{}' (expected channels_to_tracks or preserve_tracks)",
                other
            )),
        }
    }
}

/// A MIDI event at a specific tick position
#[derive(Debug, Clone)]
pub struct MidiFileEvent {
    /// Absolute tick position in the file
    pub tick: u64,
    pub message: MidiMessage,
}

/// Channel events destined for one sequence track
#[derive(Debug, Clone, Default)]
pub struct ParsedTrack {
    /// Track name meta, when the file provides one
    pub name: Option<String>,
    /// Source channel in [`LoadMode::ChannelsToTracks`]
    pub channel: Option<u8>,
    /// Sorted by tick; events on the same tick keep file order
    pub events: Vec<MidiFileEvent>,
}

/// Parsed MIDI file ready for playback
#[derive(Debug, Clone)]
pub struct ParsedMidiFile {
    /// Pulses per quarter note (ticks per beat)
    pub ppq: u16,
    pub tempo_map: TempoMap,
    pub tracks: Vec<ParsedTrack>,
}

/// Convert midly MidiMessage to our MidiMessage format
fn convert_midly_message(channel: u8, message: MidlyMessage) -> MidiMessage {
    match message {
        MidlyMessage::NoteOn { key, vel } => {
            if vel.as_int() == 0 {
                // Note On with velocity 0 is Note Off
                MidiMessage::NoteOff {
                    channel,
                    pitch: key.as_int(),
                }
            } else {
                MidiMessage::NoteOn {
                    channel,
                    pitch: key.as_int(),
                    velocity: vel.as_int(),
                }
            }
        }
        MidlyMessage::NoteOff { key, .. } => MidiMessage::NoteOff {
            channel,
            pitch: key.as_int(),
        },
        MidlyMessage::Aftertouch { key, vel } => MidiMessage::PolyPressure {
            channel,
            pitch: key.as_int(),
            pressure: vel.as_int(),
        },
        MidlyMessage::Controller { controller, value } => MidiMessage::ControlChange {
            channel,
            controller: controller.as_int(),
            value: value.as_int(),
        },
        MidlyMessage::ProgramChange { program } => MidiMessage::ProgramChange {
            channel,
            program: program.as_int(),
        },
        MidlyMessage::ChannelAftertouch { vel } => MidiMessage::ChannelPressure {
            channel,
            pressure: vel.as_int(),
        },
        MidlyMessage::PitchBend { bend } => {
            // midly's PitchBend is 14-bit centered at 8192
            let value = bend.0.as_int() as i16 - 8192;
            MidiMessage::PitchBend { channel, value }
        }
    }
}

/// Parse a MIDI file from bytes
pub fn parse_midi_file(bytes: &[u8], mode: LoadMode) -> Result<ParsedMidiFile, SequenceError> {
    let smf = Smf::parse(bytes).map_err(|e| SequenceError::Parse(e.to_string()))?;

    let ppq = match smf.header.timing {
        Timing::Metrical(t) => t.as_int().max(1),
        Timing::Timecode(fps, tpf) => {
            tracing::warn!(
                fps = fps.as_f32(),
                ticks_per_frame = tpf,
                "SMPTE timing, assuming {} PPQ",
                SMPTE_FALLBACK_PPQ
            );
            SMPTE_FALLBACK_PPQ
        }
    };

    let mut tempo_map = TempoMap::with_ppq(ppq);
    let mut per_channel: BTreeMap<u8, Vec<MidiFileEvent>> = BTreeMap::new();
    let mut per_track: Vec<ParsedTrack> = Vec::new();

    for track in &smf.tracks {
        let mut tick = 0u64;
        let mut parsed = ParsedTrack::default();

        for event in track {
            tick += event.delta.as_int() as u64;

            match event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    let event = MidiFileEvent {
                        tick,
                        message: convert_midly_message(channel, message),
                    };
                    match mode {
                        LoadMode::ChannelsToTracks => {
                            per_channel.entry(channel).or_default().push(event)
                        }
                        LoadMode::PreserveTracks => parsed.events.push(event),
                    }
                }
                TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => {
                    // Convert microseconds per beat to BPM
                    let bpm = 60_000_000.0 / tempo.as_int().max(1) as f64;
                    if tick == 0 {
                        tempo_map.set_base_tempo(bpm);
                    } else {
                        tempo_map.add_tempo_change(Tick(tick), bpm);
                    }
                }
                TrackEventKind::Meta(MetaMessage::TrackName(name)) if parsed.name.is_none() => {
                    parsed.name = Some(String::from_utf8_lossy(name).into_owned());
                }
                _ => {}
            }
        }

        if !parsed.events.is_empty() {
            parsed.events.sort_by_key(|e| e.tick);
            per_track.push(parsed);
        }
    }

    let tracks = match mode {
        LoadMode::PreserveTracks => per_track,
        LoadMode::ChannelsToTracks => per_channel
            .into_iter()
            .map(|(channel, mut events)| {
                events.sort_by_key(|e| e.tick);
                ParsedTrack {
                    name: None,
                    channel: Some(channel),
                    events,
                }
            })
            .collect(),
    };

    tracing::debug!(
        ppq,
        smf_tracks = smf.tracks.len(),
        tracks = tracks.len(),
        ?mode,
        "parsed MIDI file"
    );

    Ok(ParsedMidiFile {
        ppq,
        tempo_map,
        tracks,
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::smf_bytes;
    use super::*;

    #[test]
    fn test_channels_to_tracks_orders_by_channel() {
        // One SMF track mixing channels 3 and 1
        let bytes = smf_bytes(
            480,
            120.0,
            &[&[(0, 3, 60, true), (0, 1, 64, true), (480, 3, 60, false), (0, 1, 64, false)]],
        );

        let parsed = parse_midi_file(&bytes, LoadMode::ChannelsToTracks).unwrap();
        assert_eq!(parsed.ppq, 480);
        assert_eq!(parsed.tracks.len(), 2);
        assert_eq!(parsed.tracks[0].channel, Some(1));
        assert_eq!(parsed.tracks[1].channel, Some(3));
        assert_eq!(parsed.tracks[1].events.len(), 2);
        assert_eq!(parsed.tracks[1].events[1].tick, 480);
    }

    #[test]
    fn test_preserve_tracks_skips_conductor() {
        let bytes = smf_bytes(
            480,
            120.0,
            &[&[(0, 0, 60, true), (960, 0, 60, false)], &[(0, 0, 67, true), (240, 0, 67, false)]],
        );

        let parsed = parse_midi_file(&bytes, LoadMode::PreserveTracks).unwrap();
        assert_eq!(parsed.tracks.len(), 2);
        assert_eq!(parsed.tracks[0].events.last().unwrap().tick, 960);
        assert_eq!(parsed.tracks[1].events.last().unwrap().tick, 240);

        // Same file in channel mode folds both tracks onto channel 0
        let merged = parse_midi_file(&bytes, LoadMode::ChannelsToTracks).unwrap();
        assert_eq!(merged.tracks.len(), 1);
        assert_eq!(merged.tracks[0].events.len(), 4);
    }

    #[test]
    fn test_tempo_meta_sets_base_tempo() {
        let bytes = smf_bytes(480, 90.0, &[&[(0, 0, 60, true), (480, 0, 60, false)]]);
        let parsed = parse_midi_file(&bytes, LoadMode::default()).unwrap();

        assert_eq!(parsed.tempo_map.ppq, 480);
        assert_eq!(parsed.tempo_map.tempo_changes.len(), 1);
        assert!((parsed.tempo_map.tempo_at(Tick(0)) - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_velocity_zero_note_on_is_note_off() {
        assert_eq!(
            convert_midly_message(
                2,
                MidlyMessage::NoteOn {
                    key: 60.into(),
                    vel: 0.into(),
                }
            ),
            MidiMessage::NoteOff {
                channel: 2,
                pitch: 60
            }
        );
    }

    #[test]
    fn test_pressure_messages_keep_their_kind() {
        assert_eq!(
            convert_midly_message(
                0,
                MidlyMessage::Aftertouch {
                    key: 61.into(),
                    vel: 30.into(),
                }
            ),
            MidiMessage::PolyPressure {
                channel: 0,
                pitch: 61,
                pressure: 30
            }
        );
        assert_eq!(
            convert_midly_message(0, MidlyMessage::ChannelAftertouch { vel: 12.into() }),
            MidiMessage::ChannelPressure {
                channel: 0,
                pressure: 12
            }
        );
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let result = parse_midi_file(b"not a midi file", LoadMode::default());
        assert!(matches!(result, Err(SequenceError::Parse(_))));
    }

    #[test]
    fn test_load_mode_from_str() {
        assert_eq!("preserve_tracks".parse(), Ok(LoadMode::PreserveTracks));
        assert_eq!("channels".parse(), Ok(LoadMode::ChannelsToTracks));
        assert!("bogus".parse::<LoadMode>().is_err());
    }
}
