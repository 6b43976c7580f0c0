//! Spectrum analyzer node.
//!
//! [`SpectrumView`] never analyzes on the tick thread. Each tick it drops the newest
//! frame into a [`Mailbox`] and returns; a worker thread owned by the node claims frames
//! at its own pace, runs a [`SpectrumAnalyzer`] pass and publishes the result on a
//! [`SpectrumBoard`] under the node's series key.
//!
//! Frames arriving faster than the worker consumes them are dropped, oldest first.

mod board;
mod mailbox;
mod spectrum;
mod worker;

pub use self::board::{Spectrum, SpectrumBoard};
pub use self::mailbox::Mailbox;
pub use self::spectrum::{hann_window, magnitude_to_db, Smoother, SpectrumAnalyzer, DB_CEILING, DB_EPSILON, DB_FLOOR};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use self::worker::Worker;
use crate::attribute::{AudioFrame, InputAttribute, OutputAttribute};
use crate::error::{EngineError, NodeError};
use crate::node::{Node, NodeKind, TickContext};

/// Upper bound on waiting for the worker during teardown.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_SERIES: AtomicU64 = AtomicU64::new(0);

/// Tunables read from the node's JSON payload.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerOptions {
    /// Seconds of signal kept for each pass
    pub buffer_duration: f32,
    /// Weight of the previous spectrum, in `[0, 1)`
    pub smoothing: f32,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            buffer_duration: 0.2,
            smoothing: 0.5,
        }
    }
}

impl AnalyzerOptions {
    /// Parse from a node payload. `null` gives the defaults.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, EngineError> {
        let options = if payload.is_null() {
            Self::default()
        } else {
            Self::deserialize(payload).map_err(|e| EngineError::InvalidOptions(e.to_string()))?
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.buffer_duration.is_finite() && self.buffer_duration > 0.0) {
            return Err(EngineError::InvalidOptions(format!(
                "buffer_duration must be a positive number of seconds, got {}",
                self.buffer_duration
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(EngineError::InvalidOptions(format!(
                "smoothing must be in [0, 1), got {}",
                self.smoothing
            )));
        }
        Ok(())
    }
}

/// Where an analyzer is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalyzerState {
    /// No input seen yet, no worker
    Unarmed,
    /// Worker running
    Running,
    /// Torn down. Further input is ignored.
    Stopped,
}

enum Lifecycle {
    Unarmed,
    Running(Worker),
    Stopped,
}

/// Single-input spectrum view. Input attribute: `Input`.
pub struct SpectrumView {
    name: String,
    series_key: String,
    options: AnalyzerOptions,
    mailbox: Arc<Mailbox<Arc<AudioFrame>>>,
    board: SpectrumBoard,
    lifecycle: Lifecycle,
    dropped: u64,
}

impl SpectrumView {
    pub fn new(name: impl Into<String>, options: AnalyzerOptions, board: SpectrumBoard) -> Self {
        let name = name.into();
        let series_key = self::board::series_key(&name, NEXT_SERIES.fetch_add(1, Ordering::Relaxed));
        Self {
            name,
            series_key,
            options,
            mailbox: Arc::new(Mailbox::new()),
            board,
            lifecycle: Lifecycle::Unarmed,
            dropped: 0,
        }
    }

    pub fn options(&self) -> AnalyzerOptions {
        self.options
    }

    pub fn state(&self) -> AnalyzerState {
        match self.lifecycle {
            Lifecycle::Unarmed => AnalyzerState::Unarmed,
            Lifecycle::Running(_) => AnalyzerState::Running,
            Lifecycle::Stopped => AnalyzerState::Stopped,
        }
    }

    /// The board key this node publishes under. Unique per instance, even among nodes
    /// sharing a name.
    pub fn series_key(&self) -> &str {
        &self.series_key
    }

    /// Frames overwritten in the mailbox before the worker claimed them.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// The most recent spectrum this node published.
    pub fn latest(&self) -> Option<Arc<Spectrum>> {
        self.board.latest(&self.series_key)
    }

    /// Hand `frame` to the worker, replacing any frame it has not claimed yet.
    fn deliver(&mut self, frame: Arc<AudioFrame>) {
        if self.mailbox.deposit(frame).is_some() {
            self.dropped += 1;
            tracing::trace!(node = %self.name, dropped = self.dropped, "analyzer frame overwritten");
        }
    }
}

impl Node for SpectrumView {
    fn kind(&self) -> NodeKind {
        NodeKind::Analyzer
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn input_labels(&self) -> Vec<String> {
        vec!["Input".to_owned()]
    }

    fn process(
        &mut self,
        _ctx: &TickContext,
        inputs: &mut [InputAttribute],
        _outputs: &mut [OutputAttribute],
    ) -> Result<(), NodeError> {
        let Some(frame) = inputs.first_mut().and_then(InputAttribute::get_data) else {
            return Ok(());
        };
        if frame.is_empty() {
            return Ok(());
        }

        match self.lifecycle {
            Lifecycle::Stopped => return Ok(()),
            Lifecycle::Running(_) => {}
            Lifecycle::Unarmed => {
                let worker = Worker::spawn(
                    self.series_key.clone(),
                    self.options,
                    Arc::clone(&self.mailbox),
                    self.board.clone(),
                )
                .map_err(|e| NodeError::Other(format!("cannot start analyzer worker: {e}")))?;
                self.lifecycle = Lifecycle::Running(worker);
            }
        }

        self.deliver(frame);
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), EngineError> {
        let previous = core::mem::replace(&mut self.lifecycle, Lifecycle::Stopped);
        if let Lifecycle::Running(worker) = previous {
            let joined = worker.stop(JOIN_TIMEOUT);
            tracing::info!(node = %self.name, joined, "analyzer worker joined");
        }
        self.mailbox.claim();
        self.board.remove(&self.series_key);
        Ok(())
    }
}

impl Drop for SpectrumView {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use crate::attribute::AttributeId;
    use crate::node::NodeId;
    use serde_json::json;

    fn input_with(samples: Vec<f32>) -> Vec<InputAttribute> {
        let mut input = InputAttribute::new(AttributeId(0), NodeId(0), 0, "Input".into());
        input.deliver(Arc::new(AudioFrame::new(samples, 48_000, 1024)));
        vec![input]
    }

    #[test]
    fn options_default_and_partial() {
        assert_eq!(AnalyzerOptions::from_payload(&serde_json::Value::Null).unwrap(), AnalyzerOptions::default());

        let options = AnalyzerOptions::from_payload(&json!({ "buffer_duration": 0.5 })).unwrap();
        assert_eq!(options.buffer_duration, 0.5);
        assert_eq!(options.smoothing, 0.5);

        assert!(AnalyzerOptions::from_payload(&json!({ "buffer_duration": -1.0 })).is_err());
        assert!(AnalyzerOptions::from_payload(&json!({ "smoothing": "lots" })).is_err());
    }

    #[test]
    fn stays_unarmed_until_samples_arrive() {
        let mut view = SpectrumView::new("fft", AnalyzerOptions::default(), SpectrumBoard::new());
        let ctx = TickContext { tick: 0 };

        view.process(&ctx, &mut [], &mut []).unwrap();
        assert_eq!(view.state(), AnalyzerState::Unarmed);

        view.process(&ctx, &mut input_with(Vec::new()), &mut []).unwrap();
        assert_eq!(view.state(), AnalyzerState::Unarmed);
    }

    #[test]
    fn first_frame_arms_and_teardown_stops() {
        let mut view = SpectrumView::new("fft", AnalyzerOptions::default(), SpectrumBoard::new());
        let ctx = TickContext { tick: 0 };

        view.process(&ctx, &mut input_with(vec![0.0; 1024]), &mut []).unwrap();
        assert_eq!(view.state(), AnalyzerState::Running);

        view.teardown().unwrap();
        assert_eq!(view.state(), AnalyzerState::Stopped);

        view.process(&ctx, &mut input_with(vec![0.0; 1024]), &mut []).unwrap();
        assert_eq!(view.state(), AnalyzerState::Stopped);
        assert!(view.mailbox.is_empty());
    }

    #[test]
    fn same_name_gets_distinct_series_keys() {
        let board = SpectrumBoard::new();
        let a = SpectrumView::new("Spectrum", AnalyzerOptions::default(), board.clone());
        let b = SpectrumView::new("Spectrum", AnalyzerOptions::default(), board);

        assert_ne!(a.series_key(), b.series_key());
        assert!(a.series_key().starts_with("Spectrum#"));
    }

    #[test]
    fn worker_only_sees_the_newest_unclaimed_frame() {
        let board = SpectrumBoard::new();
        let mut view = SpectrumView::new("fft", AnalyzerOptions::default(), board.clone());
        let first = Arc::new(AudioFrame::new(vec![1.0; 256], 48_000, 256));
        let second = Arc::new(AudioFrame::new(vec![-0.5; 128], 48_000, 128));

        // both land before the worker gets a turn
        view.deliver(first);
        view.deliver(second);
        assert_eq!(view.dropped_frames(), 1);

        let mut analyzer = SpectrumAnalyzer::new(view.options().buffer_duration, view.options().smoothing);
        let running = AtomicBool::new(true);
        assert!(worker::step(view.series_key(), &mut analyzer, &view.mailbox, &board, &running));
        assert!(!worker::step(view.series_key(), &mut analyzer, &view.mailbox, &board, &running));

        assert_eq!(analyzer.buffered(), 128);
        assert!(analyzer.samples().all(|s| s == -0.5));
    }
}
