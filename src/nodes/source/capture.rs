//! Hardware capture node

use crate::attribute::{AudioFrame, InputAttribute, OutputAttribute};
use crate::channels::deinterleave;
use crate::device::{AudioBackend, InputStream};
use crate::error::{EngineError, NodeError};
use crate::fault::{self, FaultSite};
use crate::node::{channel_labels, Node, NodeKind, TickContext};
use crate::settings::{InputSettings, SampleFormat};

/// Reads one chunk per tick from an input device and publishes each channel on its own
/// output attribute (`Channel 0`, `Channel 1`, ...).
///
/// `process` blocks until the device has delivered `chunk_size` frames, which makes
/// this node one of the two pacing points of the tick loop.
pub struct AudioSource {
    name: String,
    settings: InputSettings,
    stream: Option<Box<dyn InputStream>>,
}

impl AudioSource {
    /// Open the configured input device.
    ///
    /// Fails if the settings are out of range or the device cannot be opened.
    pub fn open(name: impl Into<String>, settings: &InputSettings, backend: &dyn AudioBackend) -> Result<Self, EngineError> {
        settings.validate()?;
        let name = name.into();
        let stream = backend.open_input(settings)?;
        tracing::info!(node = %name, device = settings.device, channels = settings.channels, "capture node ready");

        Ok(Self {
            name,
            settings: settings.clone(),
            stream: Some(stream),
        })
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.settings.channels as usize
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.settings.rate
    }

    #[inline]
    pub fn frame_size(&self) -> usize {
        self.settings.chunk_size
    }

    #[inline]
    pub fn device(&self) -> usize {
        self.settings.device
    }

    #[inline]
    pub fn format(&self) -> SampleFormat {
        self.settings.format
    }

    /// Whether the stream is still open.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Node for AudioSource {
    fn kind(&self) -> NodeKind {
        NodeKind::Source
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn output_labels(&self) -> Vec<String> {
        channel_labels(self.channels())
    }

    fn process(
        &mut self,
        _ctx: &TickContext,
        _inputs: &mut [InputAttribute],
        outputs: &mut [OutputAttribute],
    ) -> Result<(), NodeError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        if outputs.is_empty() {
            return Ok(());
        }

        let interleaved = stream.read(self.settings.chunk_size)?;
        if interleaved.is_empty() {
            tracing::trace!(node = %self.name, "no input this tick");
            return Ok(());
        }

        let rate = self.settings.rate;
        let frame_size = self.settings.chunk_size;
        for (output, samples) in outputs.iter_mut().zip(deinterleave(&interleaved, self.channels())) {
            output.set_data(AudioFrame::new(samples, rate, frame_size));
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), EngineError> {
        if let Some(mut stream) = self.stream.take() {
            stream.close()?;
            tracing::info!(node = %self.name, "capture node closed");
        }
        Ok(())
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            fault::absorb(FaultSite::Teardown { name: &self.name }, &err);
        }
    }
}
