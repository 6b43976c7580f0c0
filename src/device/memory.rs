//! In-memory streams
//!
//! Capture reads from a queue you [`feed`](MemoryBackend::feed); playback appends to a
//! buffer you can inspect with [`played`](MemoryBackend::played). Nothing blocks: a read
//! returns whatever is queued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{AudioBackend, InputStream, OutputStream};
use crate::error::{EngineError, NodeError};
use crate::settings::{InputSettings, OutputSettings, SampleFormat};

struct Shared {
    devices: usize,
    capture: Mutex<VecDeque<f32>>,
    playback: Mutex<Vec<f32>>,
    open_streams: AtomicUsize,
}

/// A backend whose devices are plain buffers.
///
/// Cloning shares the buffers, so a test can keep one handle and give another to a
/// [`NodeRegistry`](crate::NodeRegistry).
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// A backend with a single device, index 0.
    pub fn new() -> Self {
        Self::with_devices(1)
    }

    /// A backend with devices `0..count`. Opening any other index fails.
    pub fn with_devices(count: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                devices: count,
                capture: Mutex::new(VecDeque::new()),
                playback: Mutex::new(Vec::new()),
                open_streams: AtomicUsize::new(0),
            }),
        }
    }

    /// Queue interleaved samples for capture streams to read.
    pub fn feed(&self, interleaved: &[f32]) {
        self.shared.capture.lock().extend(interleaved.iter().copied());
    }

    /// Samples queued for capture and not read yet.
    pub fn pending_capture(&self) -> usize {
        self.shared.capture.lock().len()
    }

    /// Everything written to playback streams so far, interleaved.
    pub fn played(&self) -> Vec<f32> {
        self.shared.playback.lock().clone()
    }

    /// Like [`played`](Self::played), but clears the buffer.
    pub fn take_played(&self) -> Vec<f32> {
        core::mem::take(&mut *self.shared.playback.lock())
    }

    /// Streams opened and not closed yet.
    pub fn open_streams(&self) -> usize {
        self.shared.open_streams.load(Ordering::Acquire)
    }

    fn check_device(&self, index: usize) -> Result<(), EngineError> {
        if index < self.shared.devices {
            Ok(())
        } else {
            Err(EngineError::DeviceUnavailable {
                index,
                reason: format!("memory backend has {} device(s)", self.shared.devices),
            })
        }
    }
}

impl AudioBackend for MemoryBackend {
    fn open_input(&self, settings: &InputSettings) -> Result<Box<dyn InputStream>, EngineError> {
        self.check_device(settings.device)?;
        self.shared.open_streams.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryInput {
            shared: Arc::clone(&self.shared),
            channels: settings.channels as usize,
            closed: false,
        }))
    }

    fn open_output(&self, settings: &OutputSettings) -> Result<Box<dyn OutputStream>, EngineError> {
        self.check_device(settings.device)?;
        self.shared.open_streams.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryOutput {
            shared: Arc::clone(&self.shared),
            format: settings.format,
            closed: false,
        }))
    }
}

struct MemoryInput {
    shared: Arc<Shared>,
    channels: usize,
    closed: bool,
}

impl InputStream for MemoryInput {
    fn read(&mut self, frames: usize) -> Result<Vec<f32>, NodeError> {
        if self.closed {
            return Ok(Vec::new());
        }
        let mut capture = self.shared.capture.lock();
        let n = (frames * self.channels).min(capture.len());
        Ok(capture.drain(..n).collect())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        if !self.closed {
            self.closed = true;
            self.shared.open_streams.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

impl Drop for MemoryInput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct MemoryOutput {
    shared: Arc<Shared>,
    format: SampleFormat,
    closed: bool,
}

impl OutputStream for MemoryOutput {
    fn write(&mut self, interleaved: &[f32]) -> Result<(), NodeError> {
        if self.closed {
            return Ok(());
        }
        let format = self.format;
        self.shared
            .playback
            .lock()
            .extend(interleaved.iter().map(|&s| format.quantize(s)));
        Ok(())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        if !self.closed {
            self.closed = true;
            self.shared.open_streams.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
