//! Voice bus mixer
//!
//! One [`MixerChannel`] per input bus, summed into a single stereo stream.
//! Bus `i` always carries voice `i`. The controls are shared atomics so a
//! host can adjust gain, balance, mute and solo while the render thread
//! mixes:
//! - **MixerChannel**: control state for one bus
//! - **MixerState**: the buses plus master controls
//! - **mix_stereo()**: RT-safe summing, pure math
//!
//! The graph node that owns a `MixerState` lives in `nodes::mixer`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use portable_atomic::AtomicF32;
use uuid::Uuid;

/// A single input bus in the mixer
///
/// All control values use relaxed atomic ordering for RT safety.
#[derive(Debug)]
pub struct MixerChannel {
    pub id: Uuid,
    pub name: String,
    /// Linear gain 0.0-2.0 (1.0 = unity)
    pub gain: AtomicF32,
    /// Balance: -1.0 (left only) to 1.0 (right only), 0.0 = both sides at unity
    pub pan: AtomicF32,
    pub mute: AtomicBool,
    /// When any bus is solo'd, only solo'd buses play
    pub solo: AtomicBool,
}

impl MixerChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            gain: AtomicF32::new(1.0),
            pan: AtomicF32::new(0.0),
            mute: AtomicBool::new(false),
            solo: AtomicBool::new(false),
        }
    }

    fn should_play(&self, any_solo_active: bool) -> bool {
        if self.mute.load(Ordering::Relaxed) {
            return false;
        }
        !any_solo_active || self.solo.load(Ordering::Relaxed)
    }

    pub fn get_gain(&self) -> f32 {
        self.gain.load(Ordering::Relaxed)
    }

    pub fn get_pan(&self) -> f32 {
        self.pan.load(Ordering::Relaxed)
    }

    /// Set gain (clamped to 0.0-2.0)
    pub fn set_gain(&self, value: f32) {
        self.gain.store(value.clamp(0.0, 2.0), Ordering::Relaxed);
    }

    /// Set pan (clamped to -1.0 to 1.0)
    pub fn set_pan(&self, value: f32) {
        self.pan.store(value.clamp(-1.0, 1.0), Ordering::Relaxed);
    }

    pub fn set_mute(&self, mute: bool) {
        self.mute.store(mute, Ordering::Relaxed);
    }

    pub fn set_solo(&self, solo: bool) {
        self.solo.store(solo, Ordering::Relaxed);
    }

    /// Per-side gains for the current balance
    fn side_gains(&self) -> (f32, f32) {
        let pan = self.get_pan();
        ((1.0 - pan).min(1.0), (1.0 + pan).min(1.0))
    }
}

/// Master mixer state
#[derive(Debug)]
pub struct MixerState {
    channels: Vec<Arc<MixerChannel>>,
    pub master_gain: AtomicF32,
    pub master_mute: AtomicBool,
}

impl Default for MixerState {
    fn default() -> Self {
        Self::new()
    }
}

impl MixerState {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            master_gain: AtomicF32::new(1.0),
            master_mute: AtomicBool::new(false),
        }
    }

    /// Mixer with `buses` channels named `bus_0`, `bus_1`, ...
    pub fn with_buses(buses: usize) -> Self {
        let mut mixer = Self::new();
        for i in 0..buses {
            mixer.add_channel(MixerChannel::new(format!("bus_{}", i)));
        }
        mixer
    }

    /// Add a channel and return its Arc for external control
    pub fn add_channel(&mut self, channel: MixerChannel) -> Arc<MixerChannel> {
        let arc = Arc::new(channel);
        self.channels.push(Arc::clone(&arc));
        arc
    }

    /// Get channel by bus index
    pub fn channel(&self, index: usize) -> Option<&Arc<MixerChannel>> {
        self.channels.get(index)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Arc<MixerChannel>> {
        self.channels.iter()
    }

    fn any_solo_active(&self) -> bool {
        self.channels
            .iter()
            .any(|c| c.solo.load(Ordering::Relaxed))
    }

    /// Sum stereo interleaved inputs into a stereo interleaved output
    ///
    /// `inputs[i]` is bus `i`. Missing inputs leave their bus silent and
    /// inputs beyond the bus count are ignored.
    pub fn mix_stereo(&self, inputs: &[&[f32]], output: &mut [f32]) {
        output.fill(0.0);

        if self.master_mute.load(Ordering::Relaxed) {
            return;
        }

        let any_solo = self.any_solo_active();
        let master_gain = self.master_gain.load(Ordering::Relaxed);

        for (channel, input) in self.channels.iter().zip(inputs.iter()) {
            if !channel.should_play(any_solo) {
                continue;
            }

            let gain = channel.get_gain() * master_gain;
            let (left_gain, right_gain) = channel.side_gains();

            for (out, frame) in output.chunks_exact_mut(2).zip(input.chunks_exact(2)) {
                out[0] += frame[0] * gain * left_gain;
                out[1] += frame[1] * gain * right_gain;
            }
        }
    }
}
