//! Block renderer
//!
//! Executes the compiled voice graph one block at a time. A [`Sequencer`]
//! feeds it the routed track events due in each block and [`BlockRenderer`]
//! ties the two together for both the realtime render thread and offline
//! rendering to WAV.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use crate::graph::Graph;
use crate::nodes::AudioTap;
use crate::primitives::{
    Beat, BoxedNode, MidiBuffer, MidiMessage, NodeId, ProcessContext, ProcessError, Sample,
    Second, SignalBuffer, SignalType,
};
use crate::sequence::Sequence;

#[derive(Debug, Clone, Copy)]
struct Route {
    source: usize,
    source_port: usize,
    dest_port: usize,
}

/// Pre-compiled graph ready for realtime execution
///
/// Nodes are stored in processing order. Every port owns its buffer, so a
/// block is processed without allocating new ones.
pub struct CompiledGraph {
    nodes: Vec<BoxedNode>,
    ids: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    inputs: Vec<Vec<SignalBuffer>>,
    outputs: Vec<Vec<SignalBuffer>>,
    /// Incoming routes, per destination node
    incoming: Vec<Vec<Route>>,
    /// Events delivered straight to a node's unconnected MIDI inputs
    inbox: Vec<MidiBuffer>,
    failed_nodes: HashSet<usize>,
    buffer_size: usize,
}

impl CompiledGraph {
    /// Compile graph for realtime execution
    ///
    /// Moves every node out of `graph`.
    pub fn compile(graph: &mut Graph, buffer_size: usize) -> Result<Self, CompileError> {
        if graph.node_count() == 0 {
            return Err(CompileError::EmptyGraph);
        }

        let order_indices = graph
            .processing_order()
            .map_err(|_| CompileError::CycleDetected)?
            .to_vec();

        let ids: Vec<Uuid> = order_indices
            .iter()
            .filter_map(|&idx| graph.node_at(idx).map(|n| n.descriptor().id))
            .collect();
        let edges = graph.snapshot().edges;

        let mut nodes = Vec::with_capacity(ids.len());
        let mut index = HashMap::with_capacity(ids.len());
        for (compiled_idx, &id) in ids.iter().enumerate() {
            if let Some(node) = graph.remove_node(id) {
                index.insert(id, compiled_idx);
                nodes.push(node);
            }
        }

        let port_buffers = |ports: &[crate::primitives::Port]| -> Vec<SignalBuffer> {
            ports
                .iter()
                .map(|p| SignalBuffer::for_port(p.signal_type, buffer_size))
                .collect()
        };
        let inputs: Vec<_> = nodes
            .iter()
            .map(|n| port_buffers(&n.descriptor().inputs))
            .collect();
        let outputs: Vec<_> = nodes
            .iter()
            .map(|n| port_buffers(&n.descriptor().outputs))
            .collect();

        let mut incoming = vec![Vec::new(); nodes.len()];
        for edge in edges {
            let (Some(&source), Some(&dest)) = (index.get(&edge.source_id), index.get(&edge.dest_id))
            else {
                return Err(CompileError::DanglingEdge(edge.dest_id));
            };
            let source_port = port_index(&nodes[source], &edge.source_port, false)
                .ok_or_else(|| CompileError::UnknownPort(edge.source_port.clone()))?;
            let dest_port = port_index(&nodes[dest], &edge.dest_port, true)
                .ok_or_else(|| CompileError::UnknownPort(edge.dest_port.clone()))?;
            incoming[dest].push(Route {
                source,
                source_port,
                dest_port,
            });
        }

        let inbox = vec![MidiBuffer::new(); nodes.len()];

        Ok(Self {
            ids: nodes.iter().map(|n| n.descriptor().id).collect(),
            nodes,
            index,
            inputs,
            outputs,
            incoming,
            inbox,
            failed_nodes: HashSet::new(),
            buffer_size,
        })
    }

    /// Mark node as failed (skip in future)
    pub fn mark_failed(&mut self, node_idx: usize) {
        self.failed_nodes.insert(node_idx);
    }

    /// Node ids in processing order
    pub fn processing_order(&self) -> &[NodeId] {
        &self.ids
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Queue a message for `node`'s next block
    ///
    /// Returns false when the node is not part of this graph.
    pub fn deliver(&mut self, node: NodeId, frame: usize, message: MidiMessage) -> bool {
        match self.index.get(&node) {
            Some(&idx) => {
                self.inbox[idx].push(frame.min(self.buffer_size.saturating_sub(1)), message);
                true
            }
            None => false,
        }
    }

    /// Reset every node (voices release all held notes)
    pub fn reset_all(&mut self) {
        for inbox in &mut self.inbox {
            inbox.clear();
        }
        for node in &mut self.nodes {
            node.reset();
        }
    }

    /// Shut down every node. Safe to call more than once.
    pub fn shutdown(&mut self) {
        for node in &mut self.nodes {
            node.shutdown();
        }
        self.nodes.clear();
        self.ids.clear();
        self.index.clear();
        self.inputs.clear();
        self.outputs.clear();
        self.incoming.clear();
        self.inbox.clear();
    }

    /// Process one block through every node
    pub fn process(&mut self, ctx: &ProcessContext) {
        for idx in 0..self.nodes.len() {
            if self.failed_nodes.contains(&idx) {
                continue;
            }

            let inputs = &mut self.inputs[idx];
            for buffer in inputs.iter_mut() {
                buffer.clear();
            }

            // Unconnected MIDI inputs are fed from the inbox
            let descriptor = self.nodes[idx].descriptor();
            for (port_idx, port) in descriptor.inputs.iter().enumerate() {
                let connected = self.incoming[idx].iter().any(|r| r.dest_port == port_idx);
                if port.signal_type == SignalType::Midi && !connected {
                    if let SignalBuffer::Midi(buf) = &mut inputs[port_idx] {
                        buf.merge(&self.inbox[idx]);
                    }
                }
            }
            self.inbox[idx].clear();

            for route in &self.incoming[idx] {
                let source = &self.outputs[route.source][route.source_port];
                match (&mut inputs[route.dest_port], source) {
                    (SignalBuffer::Audio(dest), SignalBuffer::Audio(src)) => dest.mix(src, 1.0),
                    (SignalBuffer::Midi(dest), SignalBuffer::Midi(src)) => dest.merge(src),
                    _ => {}
                }
            }

            match self.nodes[idx].process(ctx, &self.inputs[idx], &mut self.outputs[idx]) {
                Ok(()) => {}
                Err(ProcessError::Skipped { .. }) => {}
                Err(ProcessError::Failed { reason }) => {
                    tracing::error!(node = %self.ids[idx], "node failed: {}", reason);
                    for buffer in &mut self.outputs[idx] {
                        buffer.clear();
                    }
                    self.mark_failed(idx);
                }
            }
        }
    }
}

fn port_index(node: &BoxedNode, name: &str, input: bool) -> Option<usize> {
    let descriptor = node.descriptor();
    let ports = if input {
        &descriptor.inputs
    } else {
        &descriptor.outputs
    };
    ports.iter().position(|p| p.name == name)
}

/// Why a graph could not be flattened for rendering
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompileError {
    #[error("graph contains a loop")]
    CycleDetected,

    #[error("graph has no units")]
    EmptyGraph,

    #[error("wire refers to missing unit {0}")]
    DanglingEdge(Uuid),

    #[error("wire refers to missing port '{0}'")]
    UnknownPort(String),
}

// =============================================================================
// SEQUENCER
// =============================================================================

/// Dispatches routed track events into a compiled graph
///
/// Each call covers the half-open beat window `[cursor, now)`. Moving the
/// cursor backwards silences every voice first.
pub struct Sequencer {
    sequence: Arc<Sequence>,
    cursor: Option<Beat>,
}

impl Sequencer {
    pub fn new(sequence: Arc<Sequence>) -> Self {
        Self {
            sequence,
            cursor: None,
        }
    }

    pub fn sequence(&self) -> &Arc<Sequence> {
        &self.sequence
    }

    pub fn cursor(&self) -> Option<Beat> {
        self.cursor
    }

    /// Jump to `beat` without dispatching the events skipped over
    pub fn relocate(&mut self, graph: &mut CompiledGraph, beat: Beat) {
        graph.reset_all();
        self.cursor = Some(beat);
    }

    /// Queue events due before `now`, spread over a block of `frames`
    ///
    /// Returns the number of events dispatched.
    pub fn advance(&mut self, graph: &mut CompiledGraph, now: Beat, frames: usize) -> usize {
        let from = match self.cursor {
            Some(prev) if now.0 < prev.0 => {
                self.relocate(graph, now);
                return 0;
            }
            Some(prev) => prev,
            None => Beat::zero(),
        };
        self.cursor = Some(now);

        let span = now.0 - from.0;
        let mut dispatched = 0;
        for (node, track) in self.sequence.routed_tracks() {
            for event in track.events_in(from..now) {
                let frame = if span > 0.0 {
                    (((event.beat.0 - from.0) / span) * frames as f64) as usize
                } else {
                    0
                };
                if graph.deliver(node, frame, event.message.clone()) {
                    dispatched += 1;
                }
            }
        }
        dispatched
    }
}

// =============================================================================
// BLOCK RENDERER
// =============================================================================

/// Compiled graph plus sequencer, rendering at a fixed block size
pub struct BlockRenderer {
    graph: CompiledGraph,
    sequencer: Sequencer,
    sample_rate: u32,
    position: Sample,
}

impl BlockRenderer {
    pub fn new(graph: CompiledGraph, sequence: Arc<Sequence>, sample_rate: u32) -> Self {
        Self {
            graph,
            sequencer: Sequencer::new(sequence),
            sample_rate,
            position: Sample(0),
        }
    }

    pub fn block_frames(&self) -> usize {
        self.graph.buffer_size()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples rendered so far
    pub fn position(&self) -> Sample {
        self.position
    }

    /// Render one block ending at musical time `now`
    pub fn render(&mut self, now: Beat) -> usize {
        let frames = self.graph.buffer_size();
        let dispatched = self.sequencer.advance(&mut self.graph, now, frames);

        let ctx = ProcessContext {
            sample_rate: self.sample_rate,
            buffer_size: frames,
            position_samples: self.position,
            position_beats: now,
            tempo_map: Arc::clone(self.sequencer.sequence().tempo_map()),
        };
        self.graph.process(&ctx);
        self.position = self.position + Sample(frames as u64);
        dispatched
    }

    pub fn relocate(&mut self, beat: Beat) {
        self.sequencer.relocate(&mut self.graph, beat);
    }

    /// Release every held note
    pub fn silence(&mut self) {
        self.graph.reset_all();
    }

    pub fn shutdown(&mut self) {
        self.graph.shutdown();
    }
}

// =============================================================================
// OFFLINE RENDER
// =============================================================================

/// Summary of an offline render
#[derive(Debug, Clone, Copy)]
pub struct RenderStats {
    pub frames: u64,
    pub seconds: Second,
    pub peak: f32,
}

/// Render the whole sequence to a 16-bit stereo WAV file (offline, not realtime)
///
/// Renders until the longest track has ended plus `tail`. `tap` must be
/// the reading end of the graph's output unit.
pub fn render_to_wav(
    renderer: &mut BlockRenderer,
    tap: &mut AudioTap,
    tail: Second,
    path: impl AsRef<Path>,
) -> Result<RenderStats, RenderError> {
    let sequence = Arc::clone(renderer.sequencer.sequence());
    let end = sequence.seconds_for_beats(sequence.longest_track()) + tail;

    let spec = hound::WavSpec {
        channels: tap.channels(),
        sample_rate: renderer.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;

    let block_frames = renderer.block_frames() as u64;
    let sample_rate = renderer.sample_rate() as f64;
    let mut scratch = vec![0.0f32; block_frames as usize * tap.channels() as usize];
    let mut frames = 0u64;
    let mut peak = 0.0f32;

    while (frames as f64 / sample_rate) < end.0 {
        frames += block_frames;
        let now = sequence.beats_for_seconds(Second(frames as f64 / sample_rate));
        renderer.render(now);

        let read = tap.read(&mut scratch);
        if read < scratch.len() {
            return Err(RenderError::Underrun {
                expected: scratch.len(),
                got: read,
            });
        }
        for &sample in &scratch[..read] {
            peak = peak.max(sample.abs());
            let int_sample = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(int_sample)?;
        }
    }

    writer.finalize()?;

    Ok(RenderStats {
        frames,
        seconds: Second(frames as f64 / sample_rate),
        peak,
    })
}

/// Errors during offline rendering
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    #[error("output produced {got} of {expected} samples")]
    Underrun { expected: usize, got: usize },
}
