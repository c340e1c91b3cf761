//! Player errors

use serde::Serialize;
use thiserror::Error;

use crate::graph::GraphError;
use crate::pipeline::PipelineError;
use crate::sequence::SequenceError;
use crate::soundbank::SoundBankError;
use crate::transport::{Rejected, TransportState};

/// Broad category of a [`PlayerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArguments,
    NativeResource,
    IllegalStateTransition,
    MissingResource,
}

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("cannot {op} while {state}")]
    IllegalState {
        op: &'static str,
        state: TransportState,
    },

    #[error("a session is already active; release it before setting up again")]
    SessionActive,

    #[error("sound bank unavailable: {0}")]
    MissingSoundBank(#[source] SoundBankError),

    #[error("failed to load sequence: {0}")]
    Sequence(#[from] SequenceError),

    #[error("failed to build pipeline: {0}")]
    Pipeline(#[source] PipelineError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("render thread: {0}")]
    RenderThread(#[source] std::io::Error),

    #[error("setup task failed: {0}")]
    Setup(String),
}

impl PlayerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlayerError::InvalidArguments(_) => ErrorKind::InvalidArguments,
            PlayerError::IllegalState { .. } | PlayerError::SessionActive => {
                ErrorKind::IllegalStateTransition
            }
            PlayerError::MissingSoundBank(_) => ErrorKind::MissingResource,
            PlayerError::Sequence(_)
            | PlayerError::Pipeline(_)
            | PlayerError::Graph(_)
            | PlayerError::RenderThread(_)
            | PlayerError::Setup(_) => ErrorKind::NativeResource,
        }
    }

    pub(crate) fn illegal(op: &'static str, rejected: Rejected) -> Self {
        PlayerError::IllegalState {
            op,
            state: rejected.0,
        }
    }

    pub(crate) fn released(op: &'static str) -> Self {
        PlayerError::IllegalState {
            op,
            state: TransportState::Released,
        }
    }
}

impl From<PipelineError> for PlayerError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::MissingSoundBank(source) => PlayerError::MissingSoundBank(source),
            other => PlayerError::Pipeline(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
