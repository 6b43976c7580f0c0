//! Error types.
//!
//! Three tiers, matching how far a failure is allowed to travel:
//! - [`EngineError`] - construction, teardown and topology failures. Returned to the caller.
//! - [`NodeError`] - a single node failing a single tick. Absorbed by the scheduler.
//! - [`AnalysisError`] - a single spectrum pass failing. Absorbed by the analyzer worker.

use thiserror::Error;

use crate::attribute::Direction;
use crate::node::NodeId;
use crate::scheduler::SchedulerState;

/// Failures surfaced to whoever builds, edits or tears down the graph.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid {field}: {value} (expected {expected})")]
    InvalidSetting {
        field: &'static str,
        value: i64,
        expected: &'static str,
    },

    #[error("invalid node options: {0}")]
    InvalidOptions(String),

    #[error("audio device {index} is not available: {reason}")]
    DeviceUnavailable { index: usize, reason: String },

    #[error("failed to open {direction} stream on device {index}: {reason}")]
    StreamOpen {
        direction: Direction,
        index: usize,
        reason: String,
    },

    #[error("failed to close {direction} stream: {reason}")]
    StreamClose { direction: Direction, reason: String },

    #[error("unknown node type `{0}`")]
    UnknownNodeType(String),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("node {node} has no {direction} attribute {ordinal}")]
    NoSuchAttribute {
        node: NodeId,
        direction: Direction,
        ordinal: usize,
    },

    #[error("input {ordinal} of node {node} already has an incoming edge")]
    InputOccupied { node: NodeId, ordinal: usize },

    #[error("scheduler cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: SchedulerState,
    },

    #[error("malformed settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fault raised while a node processes one tick.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("stream failure: {0}")]
    Stream(String),

    #[error("node panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// A fault raised during one analysis pass.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("need at least 2 samples for a spectrum, have {0}")]
    TooFewSamples(usize),

    #[error("fft failed: {0}")]
    Fft(#[from] realfft::FftError),
}
