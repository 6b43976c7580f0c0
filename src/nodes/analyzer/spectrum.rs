//! Windowed magnitude spectrum with smoothing.

use core::f32::consts::PI;
use std::collections::VecDeque;
use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};

use super::board::Spectrum;
use crate::attribute::AudioFrame;
use crate::error::AnalysisError;

/// Floor added before taking the log, so silence maps to a finite level.
pub const DB_EPSILON: f32 = 1e-10;
/// Lowest level reported, in dB.
pub const DB_FLOOR: f32 = -120.0;
/// Highest level reported, in dB.
pub const DB_CEILING: f32 = 10.0;

/// A symmetric Hann window of `len` points (`0.5 - 0.5 cos(2πn / (len - 1))`).
pub fn hann_window(len: usize) -> Vec<f32> {
    match len {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (len - 1) as f32;
            (0..len)
                .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / denom).cos())
                .collect()
        }
    }
}

/// Linear magnitude to dB, clamped to [`DB_FLOOR`, `DB_CEILING`].
#[inline]
pub fn magnitude_to_db(magnitude: f32) -> f32 {
    (20.0 * (magnitude + DB_EPSILON).log10()).clamp(DB_FLOOR, DB_CEILING)
}

/// Single-pole exponential smoothing across successive spectra.
///
/// `s = α·s_prev + (1 - α)·x`. The first spectrum, and the first one after the bin count
/// changes, is taken as is.
#[derive(Clone, Debug)]
pub struct Smoother {
    alpha: f32,
    state: Option<Vec<f32>>,
}

impl Smoother {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, state: None }
    }

    #[inline]
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Fold `current` into the running state and return the smoothed spectrum.
    pub fn apply(&mut self, current: &[f32]) -> &[f32] {
        let alpha = self.alpha;
        match self.state.as_mut() {
            Some(state) if state.len() == current.len() => {
                for (s, &x) in state.iter_mut().zip(current) {
                    *s = alpha * *s + (1.0 - alpha) * x;
                }
            }
            _ => self.state = Some(current.to_vec()),
        }
        self.state.as_deref().unwrap_or_default()
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

/// Owns the rolling sample buffer and turns it into [`Spectrum`]s.
///
/// The buffer length is fixed by the first frame pushed: `buffer_duration` seconds at that
/// frame's sample rate. Later frames are appended and the oldest samples evicted.
pub struct SpectrumAnalyzer {
    buffer_duration: f32,
    ring: VecDeque<f32>,
    /// `(sample_rate, max_len)`, fixed on the first frame
    format: Option<(u32, usize)>,
    smoother: Smoother,
    planner: RealFftPlanner<f32>,
    plan: Option<Arc<dyn RealToComplex<f32>>>,
    window: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(buffer_duration: f32, smoothing: f32) -> Self {
        Self {
            buffer_duration,
            ring: VecDeque::new(),
            format: None,
            smoother: Smoother::new(smoothing),
            planner: RealFftPlanner::new(),
            plan: None,
            window: Vec::new(),
        }
    }

    /// Append one frame's samples, evicting from the front beyond capacity.
    pub fn push(&mut self, frame: &AudioFrame) {
        let (_, max_len) = *self.format.get_or_insert_with(|| {
            let max_len = (self.buffer_duration * frame.sample_rate as f32).floor() as usize;
            tracing::debug!(rate = frame.sample_rate, max_len, "analysis buffer sized");
            (frame.sample_rate, max_len)
        });

        self.ring.extend(frame.samples.iter().copied());
        if self.ring.len() > max_len {
            let excess = self.ring.len() - max_len;
            self.ring.drain(..excess);
        }
    }

    /// Samples currently buffered.
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// The buffered samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.ring.iter().copied()
    }

    /// Buffer capacity in samples, once known.
    pub fn capacity(&self) -> Option<usize> {
        self.format.map(|(_, max_len)| max_len)
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.format.map(|(rate, _)| rate)
    }

    /// Whether the buffer holds at least half its capacity.
    pub fn is_ready(&self) -> bool {
        match self.format {
            Some((_, max_len)) => self.ring.len() >= max_len / 2,
            None => false,
        }
    }

    /// Run one pass over the buffered samples.
    pub fn analyze(&mut self) -> Result<Spectrum, AnalysisError> {
        let n = self.ring.len();
        let rate = match self.format {
            Some((rate, _)) if n >= 2 => rate,
            _ => return Err(AnalysisError::TooFewSamples(n)),
        };

        if self.window.len() != n {
            self.window = hann_window(n);
            self.plan = Some(self.planner.plan_fft_forward(n));
        }
        let plan = match &self.plan {
            Some(plan) => Arc::clone(plan),
            None => return Err(AnalysisError::TooFewSamples(n)),
        };

        let mut input = self
            .ring
            .iter()
            .zip(&self.window)
            .map(|(&s, &w)| s * w)
            .collect::<Vec<_>>();
        let mut output = plan.make_output_vec();
        plan.process(&mut input, &mut output)?;

        let bins = n / 2;
        let scale = 2.0 / n as f32;
        let magnitudes = output[..bins]
            .iter()
            .enumerate()
            .map(|(k, c)| {
                let m = c.norm() * scale;
                if k == 0 { m / 2.0 } else { m }
            })
            .collect::<Vec<_>>();

        let magnitudes_db = self.smoother.apply(&magnitudes).iter().map(|&m| magnitude_to_db(m)).collect();
        let frequencies = (0..bins).map(|k| k as f32 * rate as f32 / n as f32).collect();

        Ok(Spectrum {
            frequencies,
            magnitudes_db,
            sample_rate: rate,
        })
    }
}
