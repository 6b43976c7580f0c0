//! Attributes: the connection points of a node, and the frames they carry.

use core::fmt;
use std::sync::Arc;

use crate::node::NodeId;

/// One channel of audio for one tick.
///
/// Frames travel between attributes behind an [`Arc`], so fanning an output out to
/// several inputs shares the samples rather than copying them.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    /// Samples of a single channel
    pub samples: Vec<f32>,
    /// Sample rate of the stream that produced the frame, in Hz
    pub sample_rate: u32,
    /// Chunk length requested from the hardware. May differ from `samples.len()`.
    pub frame_size: usize,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, frame_size: usize) -> Self {
        Self {
            samples,
            sample_rate,
            frame_size,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Which way data moves through an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Graph-wide unique attribute identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeId(pub(crate) u64);

/// Identity shared by both attribute directions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeInfo {
    pub id: AttributeId,
    pub node: NodeId,
    pub direction: Direction,
    /// Position among the node's attributes of the same direction
    pub ordinal: usize,
    pub label: String,
}

/// An input slot. Holds at most one pending frame.
#[derive(Debug)]
pub struct InputAttribute {
    info: AttributeInfo,
    pending: Option<Arc<AudioFrame>>,
}

impl InputAttribute {
    pub(crate) fn new(id: AttributeId, node: NodeId, ordinal: usize, label: String) -> Self {
        Self {
            info: AttributeInfo {
                id,
                node,
                direction: Direction::Input,
                ordinal,
                label,
            },
            pending: None,
        }
    }

    /// Take the frame delivered since the last read, leaving the slot empty.
    #[inline]
    pub fn get_data(&mut self) -> Option<Arc<AudioFrame>> {
        self.pending.take()
    }

    /// Whether a frame is waiting to be read.
    #[inline]
    pub fn has_data(&self) -> bool {
        self.pending.is_some()
    }

    /// Delivered by the graph. Replaces any frame the node has not read yet.
    #[inline]
    pub(crate) fn deliver(&mut self, frame: Arc<AudioFrame>) {
        self.pending = Some(frame);
    }

    #[inline]
    pub fn info(&self) -> &AttributeInfo {
        &self.info
    }
}

/// An output slot. Holds the last written frame until the graph moves it downstream.
#[derive(Debug)]
pub struct OutputAttribute {
    info: AttributeInfo,
    held: Option<Arc<AudioFrame>>,
}

impl OutputAttribute {
    pub(crate) fn new(id: AttributeId, node: NodeId, ordinal: usize, label: String) -> Self {
        Self {
            info: AttributeInfo {
                id,
                node,
                direction: Direction::Output,
                ordinal,
                label,
            },
            held: None,
        }
    }

    /// Publish a frame. An unconsumed previous frame is overwritten, never queued.
    #[inline]
    pub fn set_data(&mut self, frame: AudioFrame) {
        self.held = Some(Arc::new(frame));
    }

    #[inline]
    pub fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    #[inline]
    pub(crate) fn take(&mut self) -> Option<Arc<AudioFrame>> {
        self.held.take()
    }

    #[inline]
    pub fn info(&self) -> &AttributeInfo {
        &self.info
    }
}
