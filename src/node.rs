//! Core node trait and context types.

use core::fmt;

use crate::attribute::{InputAttribute, OutputAttribute};
use crate::error::{EngineError, NodeError};

/// Information available during one tick.
///
/// Passed to every [`Node::process`] call.
#[derive(Clone, Copy, Debug)]
pub struct TickContext {
    /// Number of ticks completed before this one
    pub tick: u64,
}

/// Unique identifier for a node within a graph.
///
/// Returned by [`Graph::add_node`](crate::Graph::add_node). Use [`NodeId::output`] and
/// [`NodeId::input`] to name attributes when connecting.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// The `ordinal`-th output attribute of this node.
    pub fn output(self, ordinal: usize) -> OutputRef {
        OutputRef { node: self, ordinal }
    }

    /// The `ordinal`-th input attribute of this node.
    pub fn input(self, ordinal: usize) -> InputRef {
        InputRef { node: self, ordinal }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Names an output attribute. Only ever the source end of an edge.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OutputRef {
    pub node: NodeId,
    pub ordinal: usize,
}

/// Names an input attribute. Only ever the destination end of an edge.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct InputRef {
    pub node: NodeId,
    pub ordinal: usize,
}

/// The built-in node variants, tagged with their factory keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NodeKind {
    /// Hardware capture
    Source,
    /// Hardware playback
    Sink,
    /// Spectrum view
    Analyzer,
    /// Anything registered by the embedding application
    Custom,
}

impl NodeKind {
    /// The factory key the node type is registered under by default.
    pub fn key(&self) -> &'static str {
        match self {
            NodeKind::Source => "AIN",
            NodeKind::Sink => "AOUT",
            NodeKind::Analyzer => "STV",
            NodeKind::Custom => "CUSTOM",
        }
    }
}

/// The core trait for graph nodes.
///
/// A node declares its attributes once, through [`input_labels`](Node::input_labels) and
/// [`output_labels`](Node::output_labels); the graph creates one attribute per label when
/// the node is added and never changes the count afterwards.
///
/// - **Sources** have outputs only and read from a device
/// - **Sinks** have inputs only and write to a device
/// - **Analyzers** have inputs only and publish results out of band
///
/// ```
/// use nodedsp::{AudioFrame, InputAttribute, Node, NodeError, NodeKind, OutputAttribute, TickContext};
///
/// /// Halves the level of whatever arrives on its only input.
/// struct Attenuate;
///
/// impl Node for Attenuate {
///     fn kind(&self) -> NodeKind { NodeKind::Custom }
///     fn name(&self) -> &str { "attenuate" }
///     fn input_labels(&self) -> Vec<String> { vec!["In".into()] }
///     fn output_labels(&self) -> Vec<String> { vec!["Out".into()] }
///
///     fn process(
///         &mut self,
///         _ctx: &TickContext,
///         inputs: &mut [InputAttribute],
///         outputs: &mut [OutputAttribute],
///     ) -> Result<(), NodeError> {
///         if let Some(frame) = inputs[0].get_data() {
///             let samples = frame.samples.iter().map(|s| s * 0.5).collect();
///             outputs[0].set_data(AudioFrame::new(samples, frame.sample_rate, frame.frame_size));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Node: Send + 'static {
    /// Variant tag.
    fn kind(&self) -> NodeKind;

    /// Display name given at construction.
    fn name(&self) -> &str;

    /// One label per input attribute, in ordinal order.
    fn input_labels(&self) -> Vec<String> {
        Vec::new()
    }

    /// One label per output attribute, in ordinal order.
    fn output_labels(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run one tick.
    ///
    /// `inputs` and `outputs` are the node's own attributes, in ordinal order. An `Err`
    /// (or a panic) costs the node this tick only; it is called again next tick.
    fn process(
        &mut self,
        ctx: &TickContext,
        inputs: &mut [InputAttribute],
        outputs: &mut [OutputAttribute],
    ) -> Result<(), NodeError>;

    /// Release devices and threads. Called once when the node leaves the graph.
    ///
    /// Must be idempotent; implementations also call it from `Drop`.
    fn teardown(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Stable labels for per-channel attributes: `Channel 0`, `Channel 1`, ...
pub fn channel_labels(channels: usize) -> Vec<String> {
    (0..channels).map(|ch| format!("Channel {ch}")).collect()
}
