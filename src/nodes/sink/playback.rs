//! Hardware playback node

use itertools::Itertools;

use crate::attribute::{InputAttribute, OutputAttribute};
use crate::channels::{interleave, pad_to_longest, MixMatrix};
use crate::device::{AudioBackend, OutputStream};
use crate::error::{EngineError, NodeError};
use crate::fault::{self, FaultSite};
use crate::node::{channel_labels, Node, NodeKind, TickContext};
use crate::settings::{OutputSettings, SampleFormat};

/// Collects one frame per input attribute and writes them to an output device.
///
/// Per tick:
/// 1. frames pending on the inputs are collected (inputs without a frame are skipped)
/// 2. shorter frames are zero-padded to the longest one
/// 3. if the number of collected channels differs from the device's, they are remixed
///    with a [`MixMatrix`]
/// 4. the result is interleaved and written in one blocking call
///
/// A tick where no input has samples writes nothing.
pub struct AudioSink {
    name: String,
    settings: OutputSettings,
    stream: Option<Box<dyn OutputStream>>,
    /// Rebuilt whenever the number of collected inputs changes
    matrix: MixMatrix,
}

impl AudioSink {
    /// Open the configured output device.
    pub fn open(name: impl Into<String>, settings: &OutputSettings, backend: &dyn AudioBackend) -> Result<Self, EngineError> {
        settings.validate()?;
        let name = name.into();
        let stream = backend.open_output(settings)?;
        tracing::info!(node = %name, device = settings.device, channels = settings.channels, "playback node ready");

        let channels = settings.channels as usize;
        Ok(Self {
            name,
            settings: settings.clone(),
            stream: Some(stream),
            matrix: MixMatrix::new(channels, channels),
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
    pub fn device(&self) -> usize {
        self.settings.device
    }

    #[inline]
    pub fn format(&self) -> SampleFormat {
        self.settings.format
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn refresh_matrix(&mut self, inputs: usize) {
        if self.matrix.inputs() != inputs {
            self.matrix = MixMatrix::new(inputs, self.channels());
        }
    }
}

/// Pad, remix through `matrix` and interleave collected channels.
///
/// Returns `None` when there is nothing to play.
pub fn render(mut collected: Vec<Vec<f32>>, matrix: &MixMatrix) -> Option<Vec<f32>> {
    if collected.is_empty() || pad_to_longest(&mut collected) == 0 {
        return None;
    }
    if matrix.is_passthrough() {
        Some(interleave(&collected))
    } else {
        Some(interleave(&matrix.apply(&collected)))
    }
}

impl Node for AudioSink {
    fn kind(&self) -> NodeKind {
        NodeKind::Sink
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn input_labels(&self) -> Vec<String> {
        channel_labels(self.channels())
    }

    fn process(
        &mut self,
        _ctx: &TickContext,
        inputs: &mut [InputAttribute],
        _outputs: &mut [OutputAttribute],
    ) -> Result<(), NodeError> {
        if self.stream.is_none() {
            return Ok(());
        }

        let collected = inputs
            .iter_mut()
            .filter_map(InputAttribute::get_data)
            .filter(|frame| !frame.is_empty())
            .map(|frame| frame.samples.clone())
            .collect_vec();
        if collected.is_empty() {
            return Ok(());
        }

        self.refresh_matrix(collected.len());
        let Some(interleaved) = render(collected, &self.matrix) else {
            return Ok(());
        };

        match self.stream.as_mut() {
            Some(stream) => stream.write(&interleaved),
            None => Ok(()),
        }
    }

    fn teardown(&mut self) -> Result<(), EngineError> {
        if let Some(mut stream) = self.stream.take() {
            stream.close()?;
            tracing::info!(node = %self.name, "playback node closed");
        }
        Ok(())
    }
}

impl Drop for AudioSink {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            fault::absorb(FaultSite::Teardown { name: &self.name }, &err);
        }
    }
}
