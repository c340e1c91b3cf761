//! Sampled instrument voice
//!
//! One voice per sequence track. The instrument is not known when the unit
//! is created; it arrives later as a [`UnitProperty::Instrument`] once the
//! graph is open. Until then the voice renders silence.

use uuid::Uuid;

use crate::graph::UnitSettings;
use crate::primitives::{
    MidiBuffer, Node, NodeDescriptor, Port, ProcessContext, ProcessError, SignalBuffer,
    UnitProperty,
};
use crate::soundbank::{Instrument, PresetId};

pub struct VoiceNode {
    descriptor: NodeDescriptor,
    instrument: Option<Box<dyn Instrument>>,
    preset: Option<PresetId>,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl VoiceNode {
    pub fn new(id: Uuid, name: impl Into<String>, settings: UnitSettings) -> Self {
        Self {
            descriptor: NodeDescriptor {
                id,
                name: name.into(),
                type_id: "instrument.voice".to_string(),
                inputs: vec![Port::midi("midi")],
                outputs: vec![Port::audio("out")],
            },
            instrument: None,
            preset: None,
            left: vec![0.0; settings.block_frames],
            right: vec![0.0; settings.block_frames],
        }
    }

    /// Preset of the installed instrument, if any
    pub fn preset(&self) -> Option<PresetId> {
        self.preset
    }

    pub fn is_loaded(&self) -> bool {
        self.instrument.is_some()
    }

    /// Render `frames` frames starting at `offset` into the scratch buffers
    fn render_span(&mut self, offset: usize, frames: usize) {
        let Some(instrument) = self.instrument.as_mut() else {
            return;
        };
        let end = offset + frames;
        instrument.render(&mut self.left[offset..end], &mut self.right[offset..end]);
    }

    fn ensure_scratch(&mut self, frames: usize) {
        if self.left.len() < frames {
            self.left.resize(frames, 0.0);
            self.right.resize(frames, 0.0);
        }
    }
}

impl Node for VoiceNode {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
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
        out_buf.clear();

        if self.instrument.is_none() {
            return Err(ProcessError::Skipped {
                reason: "no instrument",
            });
        }

        let frames = ctx.buffer_size.min(out_buf.frames());
        self.ensure_scratch(frames);

        let empty = MidiBuffer::new();
        let midi = inputs.first().and_then(|b| b.as_midi()).unwrap_or(&empty);

        // Split the block at each event so notes start on their frame
        let mut cursor = 0;
        for event in &midi.events {
            let at = event.frame.min(frames);
            if at > cursor {
                self.render_span(cursor, at - cursor);
                cursor = at;
            }
            if let Some(instrument) = self.instrument.as_mut() {
                instrument.handle(&event.message);
            }
        }
        if frames > cursor {
            self.render_span(cursor, frames - cursor);
        }

        let channels = out_buf.channels as usize;
        for (i, frame) in out_buf.samples.chunks_exact_mut(channels).take(frames).enumerate() {
            frame[0] = self.left[i];
            if channels > 1 {
                frame[1] = self.right[i];
            }
        }

        Ok(())
    }

    fn set_property(&mut self, property: UnitProperty) -> Result<(), UnitProperty> {
        match property {
            UnitProperty::Instrument { preset, instrument } => {
                tracing::debug!(voice = %self.descriptor.id, %preset, "instrument installed");
                self.instrument = Some(instrument);
                self.preset = Some(preset);
                Ok(())
            }
        }
    }

    fn reset(&mut self) {
        if let Some(instrument) = self.instrument.as_mut() {
            instrument.all_notes_off();
        }
    }

    fn shutdown(&mut self) {
        self.instrument = None;
    }
}
