//! Audio pipeline builder
//!
//! Builds the voice graph a sequence plays through:
//!
//! ```text
//! voice_0 ──┐
//! voice_1 ──┼──► mixer ──► output ──► AudioTap
//! voice_n ──┘
//! ```
//!
//! One voice per requested program, in order, so voice `i` is the
//! destination of track `i`. Every voice loads its preset from one shared
//! sound bank. A failure anywhere fails the whole build and the partial graph
//! is dropped with it.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::graph::{Graph, GraphDraft, GraphError, GraphSnapshot, UnitKind, UnitSettings};
use crate::mixer::MixerState;
use crate::nodes::AudioTap;
use crate::playback::{CompileError, CompiledGraph};
use crate::primitives::{NodeId, UnitProperty};
use crate::sequence::Sequence;
use crate::soundbank::{BankProvider, PresetId, SoundBankError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no voices requested")]
    NoVoices,

    #[error(transparent)]
    MissingSoundBank(SoundBankError),

    #[error("voice {voice}: {source}")]
    PresetNotFound {
        voice: usize,
        #[source]
        source: SoundBankError,
    },

    #[error("graph: {0}")]
    Graph(#[from] GraphError),

    #[error("compile: {0}")]
    Compile(#[from] CompileError),

    #[error("pipeline already compiled")]
    AlreadyCompiled,
}

/// Render parameters for a pipeline
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub sample_rate: u32,
    pub block_frames: usize,
    /// Output ring capacity, in stereo frames
    pub ring_frames: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_frames: 512,
            ring_frames: 16384,
        }
    }
}

/// One voice of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    pub index: usize,
    pub node: NodeId,
    pub preset: PresetId,
}

/// A built voice graph
pub struct Pipeline {
    graph: Graph,
    voices: Vec<Voice>,
    mixer: NodeId,
    output: NodeId,
    mixer_state: Arc<MixerState>,
    tap: Option<AudioTap>,
    settings: PipelineSettings,
    compiled: bool,
}

impl Pipeline {
    pub fn graph_id(&self) -> Uuid {
        self.graph.id()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voice_node(&self, index: usize) -> Option<NodeId> {
        self.voices.get(index).map(|v| v.node)
    }

    pub fn mixer_id(&self) -> NodeId {
        self.mixer
    }

    pub fn output_id(&self) -> NodeId {
        self.output
    }

    /// Gain, balance, mute and solo for each voice bus
    pub fn mixer_state(&self) -> &Arc<MixerState> {
        &self.mixer_state
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.graph.snapshot()
    }

    /// Follow the signal from voice `index` to the output unit
    pub fn signal_path(&self, index: usize) -> Option<Vec<NodeId>> {
        self.graph.signal_path(self.voice_node(index)?, self.output)
    }

    /// Move the units into a graph for the render thread
    pub fn compile(&mut self) -> Result<CompiledGraph, PipelineError> {
        if self.compiled {
            return Err(PipelineError::AlreadyCompiled);
        }
        let compiled = CompiledGraph::compile(&mut self.graph, self.settings.block_frames)?;
        self.compiled = true;
        Ok(compiled)
    }

    /// The reading end of the output ring; `None` once taken
    pub fn take_output_tap(&mut self) -> Option<AudioTap> {
        self.tap.take()
    }

    /// Shut down units still held by the graph. Safe to call more than once.
    pub fn dispose(&mut self) {
        self.graph.dispose();
        self.tap = None;
    }
}

pub struct PipelineBuilder {
    settings: PipelineSettings,
}

impl PipelineBuilder {
    pub fn new(settings: PipelineSettings) -> Self {
        Self { settings }
    }

    /// Build one voice per program and attach the graph to `sequence`
    pub fn build(
        &self,
        programs: &[u8],
        bank: &dyn BankProvider,
        sequence: &mut Sequence,
    ) -> Result<Pipeline, PipelineError> {
        if programs.is_empty() {
            return Err(PipelineError::NoVoices);
        }

        let mut draft = GraphDraft::new();
        let voice_nodes: Vec<NodeId> = (0..programs.len())
            .map(|i| draft.add_unit(format!("voice_{}", i), UnitKind::Voice))
            .collect();

        let mixer_state = Arc::new(MixerState::with_buses(programs.len()));
        let mixer = draft.add_unit(
            "mixer",
            UnitKind::Mixer {
                state: Arc::clone(&mixer_state),
            },
        );

        let (producer, consumer) = rtrb::RingBuffer::new(self.settings.ring_frames.max(1) * 2);
        let output = draft.add_unit("output", UnitKind::Output { ring: producer });

        let mut graph = draft.open(UnitSettings {
            sample_rate: self.settings.sample_rate,
            block_frames: self.settings.block_frames,
        });

        for (i, &node) in voice_nodes.iter().enumerate() {
            graph.connect(node, "out", mixer, &format!("in{}", i))?;
        }
        graph.connect(mixer, "out", output, "in")?;

        let bank = bank.resolve().map_err(PipelineError::MissingSoundBank)?;
        debug!(bank = bank.name(), voices = programs.len(), "loading presets");

        let mut voices = Vec::with_capacity(programs.len());
        for (index, (&program, &node)) in programs.iter().zip(&voice_nodes).enumerate() {
            let preset = PresetId::melodic(program);
            let not_found = |source| PipelineError::PresetNotFound {
                voice: index,
                source,
            };

            if !bank.has_preset(preset) {
                return Err(not_found(SoundBankError::PresetNotFound {
                    bank: preset.bank_msb,
                    program,
                }));
            }
            let instrument = bank
                .instantiate(preset, self.settings.sample_rate)
                .map_err(not_found)?;
            graph.set_property(node, UnitProperty::Instrument { preset, instrument })?;

            debug!(
                voice = index,
                %preset,
                name = bank.preset_name(preset).as_deref().unwrap_or("?"),
                "voice configured"
            );
            voices.push(Voice {
                index,
                node,
                preset,
            });
        }

        sequence.attach_graph(graph.id(), voice_nodes.iter().copied());

        info!(
            graph = %graph.id(),
            voices = voices.len(),
            bank = bank.name(),
            "pipeline built"
        );

        Ok(Pipeline {
            graph,
            voices,
            mixer,
            output,
            mixer_state,
            tap: Some(AudioTap::new(consumer, self.settings.sample_rate)),
            settings: self.settings,
            compiled: false,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new(PipelineSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::TempoMap;
    use crate::sequence::Track;
    use crate::soundbank::{MemoryBank, SoundBankLocator};

    fn sequence(tracks: usize) -> Sequence {
        Sequence::new(
            TempoMap::default(),
            (0..tracks).map(|_| Track::new(None, vec![])).collect(),
        )
    }

    fn build(programs: &[u8], bank: &dyn BankProvider) -> Result<Pipeline, PipelineError> {
        PipelineBuilder::default().build(programs, bank, &mut sequence(2))
    }

    #[test]
    fn test_builds_voice_per_program() {
        let mut seq = sequence(2);
        let pipeline = PipelineBuilder::default()
            .build(&[0, 40, 73], &MemoryBank::new("test"), &mut seq)
            .unwrap();

        assert_eq!(pipeline.voice_count(), 3);
        assert_eq!(pipeline.mixer_state().channel_count(), 3);
        let programs: Vec<u8> = pipeline.voices().iter().map(|v| v.preset.program).collect();
        assert_eq!(programs, vec![0, 40, 73]);
        assert!(pipeline.voices().iter().all(|v| v.preset.bank_msb == 0x79));
        assert_eq!(seq.attached_graph(), Some(pipeline.graph_id()));

        // 3 voices + mixer + output, 3 voice edges + mixer edge
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.nodes.len(), 5);
        assert_eq!(snapshot.edges.len(), 4);
    }

    #[test]
    fn test_every_voice_reaches_output() {
        let pipeline = build(&[1, 2], &MemoryBank::new("test")).unwrap();
        for i in 0..2 {
            let path = pipeline.signal_path(i).unwrap();
            assert_eq!(
                path,
                vec![pipeline.voice_node(i).unwrap(), pipeline.mixer_id(), pipeline.output_id()]
            );
        }
        assert!(pipeline.signal_path(2).is_none());
    }

    #[test]
    fn test_no_programs() {
        assert!(matches!(
            build(&[], &MemoryBank::new("test")),
            Err(PipelineError::NoVoices)
        ));
    }

    #[test]
    fn test_missing_bank_fails_whole_build() {
        let dir = tempfile::tempdir().unwrap();
        let locator = SoundBankLocator::new("sounds.sf2", vec![dir.path().to_path_buf()]);
        let mut seq = sequence(1);

        let result = PipelineBuilder::default().build(&[0], &locator, &mut seq);
        assert!(matches!(result, Err(PipelineError::MissingSoundBank(_))));
        assert_eq!(seq.attached_graph(), None);
    }

    #[test]
    fn test_unknown_program_names_voice() {
        let bank = MemoryBank::with_programs("partial", [0, 1]);
        match build(&[0, 1, 99], &bank) {
            Err(PipelineError::PresetNotFound { voice, .. }) => assert_eq!(voice, 2),
            other => panic!("expected PresetNotFound, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_compile_once_and_tap_once() {
        let mut pipeline = build(&[0], &MemoryBank::new("test")).unwrap();

        let tap = pipeline.take_output_tap().unwrap();
        assert_eq!(tap.sample_rate(), 44100);
        assert!(pipeline.take_output_tap().is_none());

        let compiled = pipeline.compile().unwrap();
        assert_eq!(compiled.node_count(), 3);
        assert!(matches!(
            pipeline.compile(),
            Err(PipelineError::AlreadyCompiled)
        ));

        pipeline.dispose();
        pipeline.dispose();
    }
}
