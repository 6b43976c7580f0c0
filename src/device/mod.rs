//! Hardware stream abstraction.
//!
//! Device nodes never talk to an audio API directly. They open streams through an
//! [`AudioBackend`] and then use two blocking calls:
//!
//! - [`InputStream::read`] waits for one chunk of interleaved samples
//! - [`OutputStream::write`] waits until one chunk of interleaved samples is accepted
//!
//! Those blocking calls are what paces the scheduler's tick loop.
//!
//! Two backends ship with the crate:
//! - [`CpalBackend`] - system audio devices (requires the `cpal_io` feature)
//! - [`MemoryBackend`] - in-memory streams for tests and offline processing

#[cfg(feature = "cpal_io")]
mod cpal_io;
mod memory;

#[cfg(feature = "cpal_io")]
pub use self::cpal_io::{CpalBackend, DeviceInfo};
pub use self::memory::MemoryBackend;

use crate::error::{EngineError, NodeError};
use crate::settings::{InputSettings, OutputSettings};

/// An open capture stream. Samples are f32 in `[-1, 1]`, interleaved by channel.
pub trait InputStream: Send {
    /// Block until `frames` frames are available and return them.
    ///
    /// Overflow and stalls are not errors: the stream returns whatever it has, which may
    /// be fewer samples than requested (or none).
    fn read(&mut self, frames: usize) -> Result<Vec<f32>, NodeError>;

    /// Close the stream. Further reads return nothing.
    fn close(&mut self) -> Result<(), EngineError>;
}

/// An open playback stream. Samples are f32 in `[-1, 1]`, interleaved by channel.
pub trait OutputStream: Send {
    /// Block until the whole buffer has been handed to the device.
    ///
    /// The stream converts to its device format on the way out.
    fn write(&mut self, interleaved: &[f32]) -> Result<(), NodeError>;

    /// Close the stream. Further writes are dropped.
    fn close(&mut self) -> Result<(), EngineError>;
}

/// Opens streams on devices. Shared by every node built from the same registry.
pub trait AudioBackend: Send + Sync {
    fn open_input(&self, settings: &InputSettings) -> Result<Box<dyn InputStream>, EngineError>;

    fn open_output(&self, settings: &OutputSettings) -> Result<Box<dyn OutputStream>, EngineError>;
}
