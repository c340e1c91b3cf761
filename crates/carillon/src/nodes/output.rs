//! Output stage
//!
//! The last unit in the pipeline. Each processed block is pushed, interleaved
//! stereo, into a lock-free SPSC ring. Whatever consumes the ring (a WAV
//! writer, a PipeWire stream, a test) holds the matching [`AudioTap`].
//!
//! ```text
//! render thread                       sink thread
//!      │                                   │
//!  OutputNode::process                AudioTap::read
//!      │                                   │
//!      └──────► rtrb::RingBuffer ─────────►│
//! ```
//!
//! A full ring never blocks the render thread; the overflow is dropped and
//! counted in [`OutputStats`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use portable_atomic::AtomicF32;
use uuid::Uuid;

use crate::primitives::{Node, NodeDescriptor, Port, ProcessContext, ProcessError, SignalBuffer};

/// Counters updated by the render thread
#[derive(Debug, Default)]
pub struct OutputStats {
    pub blocks: AtomicU64,
    pub samples_written: AtomicU64,
    pub samples_dropped: AtomicU64,
    pub peak: AtomicF32,
}

impl OutputStats {
    pub fn samples_written(&self) -> u64 {
        self.samples_written.load(Ordering::Relaxed)
    }

    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }

    /// Peak absolute sample value of the most recent block
    pub fn last_peak(&self) -> f32 {
        self.peak.load(Ordering::Relaxed)
    }
}

pub struct OutputNode {
    descriptor: NodeDescriptor,
    // Producer is Send but not Sync; only ever reached through &mut self
    ring: Mutex<rtrb::Producer<f32>>,
    stats: Arc<OutputStats>,
}

impl OutputNode {
    pub fn new(id: Uuid, name: impl Into<String>, ring: rtrb::Producer<f32>) -> Self {
        Self {
            descriptor: NodeDescriptor {
                id,
                name: name.into(),
                type_id: "output.ring".to_string(),
                inputs: vec![Port::audio("in")],
                outputs: vec![],
            },
            ring: Mutex::new(ring),
            stats: Arc::new(OutputStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<OutputStats> {
        Arc::clone(&self.stats)
    }
}

impl Node for OutputNode {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        inputs: &[SignalBuffer],
        _outputs: &mut [SignalBuffer],
    ) -> Result<(), ProcessError> {
        let audio = inputs
            .first()
            .and_then(|b| b.as_audio())
            .ok_or(ProcessError::Skipped {
                reason: "no audio input",
            })?;

        let ring = self.ring.get_mut().unwrap_or_else(PoisonError::into_inner);
        let mut written = 0u64;
        for &sample in &audio.samples {
            if ring.push(sample).is_err() {
                break;
            }
            written += 1;
        }
        let dropped = audio.samples.len() as u64 - written;

        self.stats.blocks.fetch_add(1, Ordering::Relaxed);
        self.stats.samples_written.fetch_add(written, Ordering::Relaxed);
        if dropped > 0 {
            self.stats.samples_dropped.fetch_add(dropped, Ordering::Relaxed);
        }
        self.stats.peak.store(audio.peak(), Ordering::Relaxed);

        Ok(())
    }
}

/// Reading end of the output ring
pub struct AudioTap {
    consumer: rtrb::Consumer<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioTap {
    pub fn new(consumer: rtrb::Consumer<f32>, sample_rate: u32) -> Self {
        Self {
            consumer,
            sample_rate,
            channels: 2,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Samples ready to be read
    pub fn available(&self) -> usize {
        self.consumer.slots()
    }

    /// Copy up to `buf.len()` interleaved samples into `buf`
    pub fn read(&mut self, buf: &mut [f32]) -> usize {
        let mut read = 0;
        for slot in buf.iter_mut() {
            match self.consumer.pop() {
                Ok(sample) => {
                    *slot = sample;
                    read += 1;
                }
                Err(_) => break,
            }
        }
        read
    }

    /// True once the producing output unit has been dropped
    pub fn is_abandoned(&self) -> bool {
        self.consumer.is_abandoned()
    }
}

impl std::fmt::Debug for AudioTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioTap")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("available", &self.available())
            .finish()
    }
}
