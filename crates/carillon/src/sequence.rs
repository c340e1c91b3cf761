//! Loaded MIDI sequence
//!
//! A [`Sequence`] is the tempo map plus beat-stamped tracks. Each track may be
//! routed to a unit of the graph the sequence has been attached to; a track
//! without a destination stays silent.

use std::collections::HashSet;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::midi_file::{parse_midi_file, LoadMode};
use crate::primitives::{Beat, MidiMessage, NodeId, Second, TempoMap};

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse MIDI file: {0}")]
    Parse(String),

    #[error("sequence has no graph attached")]
    NoGraph,

    #[error("node {0} is not a destination in the attached graph")]
    UnknownDestination(NodeId),

    #[error("track {index} out of range ({count} tracks)")]
    TrackOutOfRange { index: usize, count: usize },
}

/// A message stamped with its beat position
#[derive(Debug, Clone)]
pub struct TimedMessage {
    pub beat: Beat,
    pub message: MidiMessage,
}

#[derive(Debug, Clone, Default)]
pub struct Track {
    pub name: Option<String>,
    events: Vec<TimedMessage>,
    destination: Option<NodeId>,
}

impl Track {
    pub fn new(name: Option<String>, mut events: Vec<TimedMessage>) -> Self {
        events.sort_by(|a, b| a.beat.0.total_cmp(&b.beat.0));
        Self {
            name,
            events,
            destination: None,
        }
    }

    pub fn events(&self) -> &[TimedMessage] {
        &self.events
    }

    pub fn destination(&self) -> Option<NodeId> {
        self.destination
    }

    /// Beat of the last event, zero for an empty track
    pub fn length(&self) -> Beat {
        self.events.last().map(|e| e.beat).unwrap_or_default()
    }

    /// Events with `range.start <= beat < range.end`
    pub fn events_in(&self, range: Range<Beat>) -> &[TimedMessage] {
        let start = self.events.partition_point(|e| e.beat.0 < range.start.0);
        let end = self.events.partition_point(|e| e.beat.0 < range.end.0);
        &self.events[start..end.max(start)]
    }
}

/// The graph a sequence routes into
#[derive(Debug, Clone)]
struct GraphBinding {
    graph: Uuid,
    destinations: HashSet<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Sequence {
    tempo_map: Arc<TempoMap>,
    tracks: Vec<Track>,
    graph: Option<GraphBinding>,
}

impl Sequence {
    pub fn new(tempo_map: TempoMap, tracks: Vec<Track>) -> Self {
        Self {
            tempo_map: Arc::new(tempo_map),
            tracks,
            graph: None,
        }
    }

    /// Load a Standard MIDI File
    pub fn load(path: impl AsRef<Path>, mode: LoadMode) -> Result<Self, SequenceError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| SequenceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let sequence = Self::from_bytes(&bytes, mode)?;
        tracing::info!(
            path = %path.display(),
            tracks = sequence.track_count(),
            "loaded sequence"
        );
        Ok(sequence)
    }

    pub fn from_bytes(bytes: &[u8], mode: LoadMode) -> Result<Self, SequenceError> {
        let parsed = parse_midi_file(bytes, mode)?;
        let tempo_map = parsed.tempo_map;

        let tracks = parsed
            .tracks
            .into_iter()
            .map(|track| {
                let events = track
                    .events
                    .into_iter()
                    .map(|e| TimedMessage {
                        beat: Beat(e.tick as f64 / tempo_map.ppq as f64),
                        message: e.message,
                    })
                    .collect();
                Track::new(track.name, events)
            })
            .collect();

        Ok(Self::new(tempo_map, tracks))
    }

    pub fn tempo_map(&self) -> &Arc<TempoMap> {
        &self.tempo_map
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track_length(&self, index: usize) -> Option<Beat> {
        self.tracks.get(index).map(Track::length)
    }

    /// Length of the longest track in beats
    pub fn longest_track(&self) -> Beat {
        self.tracks
            .iter()
            .map(Track::length)
            .fold(Beat::zero(), |acc, len| if len.0 > acc.0 { len } else { acc })
    }

    pub fn seconds_for_beats(&self, beats: Beat) -> Second {
        self.tempo_map.beat_to_second(beats)
    }

    pub fn beats_for_seconds(&self, seconds: Second) -> Beat {
        self.tempo_map.second_to_beat(seconds)
    }

    /// Record the graph this sequence routes into
    ///
    /// Replaces any earlier binding and clears every track destination.
    pub fn attach_graph(&mut self, graph: Uuid, destinations: impl IntoIterator<Item = NodeId>) {
        self.graph = Some(GraphBinding {
            graph,
            destinations: destinations.into_iter().collect(),
        });
        for track in &mut self.tracks {
            track.destination = None;
        }
    }

    pub fn attached_graph(&self) -> Option<Uuid> {
        self.graph.as_ref().map(|g| g.graph)
    }

    /// Route track `index` to `node`
    pub fn set_destination(&mut self, index: usize, node: NodeId) -> Result<(), SequenceError> {
        let binding = self.graph.as_ref().ok_or(SequenceError::NoGraph)?;
        if !binding.destinations.contains(&node) {
            return Err(SequenceError::UnknownDestination(node));
        }

        let count = self.tracks.len();
        let track = self
            .tracks
            .get_mut(index)
            .ok_or(SequenceError::TrackOutOfRange { index, count })?;
        track.destination = Some(node);
        Ok(())
    }

    /// Tracks that have a destination, with it
    pub fn routed_tracks(&self) -> impl Iterator<Item = (NodeId, &Track)> {
        self.tracks
            .iter()
            .filter_map(|t| t.destination.map(|d| (d, t)))
    }
}
