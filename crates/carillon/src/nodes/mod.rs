//! Processing units
//!
//! The three unit kinds a player pipeline is made of: sampled voices, the bus
//! mixer and the output stage.

mod mixer;
mod output;
mod voice;

pub use mixer::MixerNode;
pub use output::{AudioTap, OutputNode, OutputStats};
pub use voice::VoiceNode;
