//! Graph unit wrapping the shared [`MixerState`]

use std::sync::Arc;

use uuid::Uuid;

use crate::mixer::MixerState;
use crate::primitives::{
    Node, NodeDescriptor, Port, ProcessContext, ProcessError, SignalBuffer,
};

/// Sums `in0..inN` into `out`, one input bus per mixer channel
pub struct MixerNode {
    descriptor: NodeDescriptor,
    state: Arc<MixerState>,
}

impl MixerNode {
    pub fn new(id: Uuid, name: impl Into<String>, state: Arc<MixerState>) -> Self {
        let inputs = (0..state.channel_count())
            .map(|i| Port::audio(format!("in{}", i)))
            .collect();

        Self {
            descriptor: NodeDescriptor {
                id,
                name: name.into(),
                type_id: "mixer.stereo".to_string(),
                inputs,
                outputs: vec![Port::audio("out")],
            },
            state,
        }
    }

    pub fn state(&self) -> &Arc<MixerState> {
        &self.state
    }
}

impl Node for MixerNode {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        inputs: &[SignalBuffer],
        outputs: &mut [SignalBuffer],
    ) -> Result<(), ProcessError> {
        let out_buf = match outputs.first_mut() {
            Some(SignalBuffer::Audio(buf)) => buf,
            _ => {
                return Err(ProcessError::Failed {
                    reason: "expected audio output".to_string(),
                })
            }
        };

        let buses: Vec<&[f32]> = inputs
            .iter()
            .map(|b| b.as_audio().map(|a| a.samples.as_slice()).unwrap_or(&[]))
            .collect();

        self.state.mix_stereo(&buses, &mut out_buf.samples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{AudioBuffer, Beat, Sample, TempoMap};

    #[test]
    fn test_ports_follow_bus_count() {
        let node = MixerNode::new(Uuid::new_v4(), "mixer", Arc::new(MixerState::with_buses(3)));
        let names: Vec<_> = node.descriptor().inputs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["in0", "in1", "in2"]);
        assert_eq!(node.descriptor().outputs[0].name, "out");
    }

    #[test]
    fn test_process_mixes_inputs() {
        let state = Arc::new(MixerState::with_buses(2));
        let mut node = MixerNode::new(Uuid::new_v4(), "mixer", Arc::clone(&state));
        state.channel(1).unwrap().set_gain(0.0);

        let ctx = ProcessContext {
            sample_rate: 44100,
            buffer_size: 4,
            position_samples: Sample(0),
            position_beats: Beat(0.0),
            tempo_map: Arc::new(TempoMap::default()),
        };
        let inputs = vec![
            SignalBuffer::Audio(AudioBuffer {
                samples: vec![0.5; 8],
                channels: 2,
            }),
            SignalBuffer::Audio(AudioBuffer {
                samples: vec![1.0; 8],
                channels: 2,
            }),
        ];
        let mut outputs = vec![SignalBuffer::Audio(AudioBuffer::new(4, 2))];

        node.process(&ctx, &inputs, &mut outputs).unwrap();
        assert!(outputs[0]
            .as_audio()
            .unwrap()
            .samples
            .iter()
            .all(|s| (s - 0.5).abs() < 0.001));
    }
}
