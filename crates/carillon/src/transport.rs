//! Transport state
//!
//! A single atomic holds one of four states. Every transition is a
//! compare-and-swap, so readers (the monitor loop) only ever observe a
//! committed state and two racing callers cannot both win.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TransportState {
    Stopped = 0,
    Paused = 1,
    Playing = 2,
    Released = 3,
}

impl TransportState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TransportState::Stopped,
            1 => TransportState::Paused,
            2 => TransportState::Playing,
            _ => TransportState::Released,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportState::Stopped => "stopped",
            TransportState::Paused => "paused",
            TransportState::Playing => "playing",
            TransportState::Released => "released",
        }
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected transition: the state actually found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected(pub TransportState);

#[derive(Debug)]
pub struct AtomicTransport {
    state: AtomicU8,
}

impl AtomicTransport {
    pub fn new(state: TransportState) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
        }
    }

    pub fn load(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `to` if the current state is one of `from`
    ///
    /// Returns the state that was replaced.
    pub fn transition(
        &self,
        from: &[TransportState],
        to: TransportState,
    ) -> Result<TransportState, Rejected> {
        let mut current = self.load();
        loop {
            if !from.contains(&current) {
                return Err(Rejected(current));
            }
            match self.state.compare_exchange_weak(
                current as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => current = TransportState::from_u8(actual),
            }
        }
    }

    /// Stopped or Paused to Playing
    pub fn play(&self) -> Result<TransportState, Rejected> {
        self.transition(
            &[TransportState::Stopped, TransportState::Paused],
            TransportState::Playing,
        )
    }

    /// Playing to Paused
    pub fn pause(&self) -> Result<TransportState, Rejected> {
        self.transition(&[TransportState::Playing], TransportState::Paused)
    }

    /// Playing or Paused to Stopped
    pub fn stop(&self) -> Result<TransportState, Rejected> {
        self.transition(
            &[TransportState::Playing, TransportState::Paused],
            TransportState::Stopped,
        )
    }

    /// Anything but Released to Released
    pub fn release(&self) -> Result<TransportState, Rejected> {
        let previous = TransportState::from_u8(
            self.state
                .swap(TransportState::Released as u8, Ordering::AcqRel),
        );
        if previous == TransportState::Released {
            Err(Rejected(previous))
        } else {
            Ok(previous)
        }
    }

    /// Fails when released, otherwise reports the current state
    pub fn ensure_live(&self) -> Result<TransportState, Rejected> {
        match self.load() {
            TransportState::Released => Err(Rejected(TransportState::Released)),
            state => Ok(state),
        }
    }
}

impl Default for AtomicTransport {
    fn default() -> Self {
        Self::new(TransportState::Stopped)
    }
}
