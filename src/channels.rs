//! Interleaving and channel-count conversion.
//!
//! Devices speak interleaved, sample-major buffers (`L R L R ...`); the graph carries one
//! sequence per channel. These helpers convert between the two and remix between channel
//! counts.

use itertools::Itertools;

/// Split an interleaved buffer into `channels` sequences of equal length.
///
/// Trailing samples that do not make up a whole frame are discarded.
///
/// ```
/// use nodedsp::channels::deinterleave;
///
/// let split = deinterleave(&[1, 10, 2, 20, 3, 30, 4], 2);
/// assert_eq!(split, vec![vec![1, 2, 3], vec![10, 20, 30]]);
/// ```
pub fn deinterleave<T: Copy>(interleaved: &[T], channels: usize) -> Vec<Vec<T>> {
    if channels == 0 {
        return Vec::new();
    }
    let frames = interleaved.len() / channels;
    let mut split = (0..channels).map(|_| Vec::with_capacity(frames)).collect_vec();
    for frame in interleaved.chunks_exact(channels) {
        for (channel, &sample) in split.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }
    split
}

/// Join per-channel sequences into one interleaved buffer.
///
/// Sequences are expected to be equally long; extra samples of a longer channel are
/// ignored.
pub fn interleave<T: Copy>(channels: &[Vec<T>]) -> Vec<T> {
    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * channels.len());
    for i in 0..frames {
        out.extend(channels.iter().map(|channel| channel[i]));
    }
    out
}

/// Zero-pad every sequence at the end to the length of the longest. Returns that length.
pub fn pad_to_longest(channels: &mut [Vec<f32>]) -> usize {
    let longest = channels.iter().map(Vec::len).max().unwrap_or(0);
    for channel in channels.iter_mut() {
        channel.resize(longest, 0.0);
    }
    longest
}

/// A gain matrix mapping `inputs` channels onto `outputs` channels.
///
/// The weights follow one rule for every combination of counts:
/// - equal counts pass straight through
/// - fewer outputs: output `o` is the average of every input `i` with `i % outputs == o`
///   (so any count down to mono is a plain average of all inputs)
/// - more outputs: output `o` copies input `o % inputs` (so mono up to stereo duplicates)
///
/// ```
/// use nodedsp::channels::MixMatrix;
///
/// let down = MixMatrix::new(2, 1);
/// assert_eq!(down.weight(0, 0), 0.5);
/// assert_eq!(down.weight(0, 1), 0.5);
///
/// let up = MixMatrix::new(1, 2);
/// assert_eq!(up.weight(0, 0), 1.0);
/// assert_eq!(up.weight(1, 0), 1.0);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct MixMatrix {
    inputs: usize,
    outputs: usize,
    /// Row-major, `outputs` rows of `inputs` weights
    weights: Vec<f32>,
}

impl MixMatrix {
    pub fn new(inputs: usize, outputs: usize) -> Self {
        let mut weights = vec![0.0; inputs * outputs];
        if inputs > 0 && outputs > 0 {
            if inputs > outputs {
                for o in 0..outputs {
                    let sources = (o..inputs).step_by(outputs).collect_vec();
                    let share = 1.0 / sources.len() as f32;
                    for i in sources {
                        weights[o * inputs + i] = share;
                    }
                }
            } else {
                for o in 0..outputs {
                    weights[o * inputs + o % inputs] = 1.0;
                }
            }
        }
        Self {
            inputs,
            outputs,
            weights,
        }
    }

    /// Gain applied to `input` when computing `output`.
    #[inline]
    pub fn weight(&self, output: usize, input: usize) -> f32 {
        self.weights[output * self.inputs + input]
    }

    #[inline]
    pub fn inputs(&self) -> usize {
        self.inputs
    }

    #[inline]
    pub fn outputs(&self) -> usize {
        self.outputs
    }

    /// Whether the matrix is the identity, i.e. mixing would copy.
    pub fn is_passthrough(&self) -> bool {
        self.inputs == self.outputs
    }

    /// Remix equally long channel sequences. Returns `outputs` sequences.
    pub fn apply(&self, channels: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        if self.is_passthrough() {
            return channels.iter().map(|c| c[..frames].to_vec()).collect();
        }

        (0..self.outputs)
            .map(|o| {
                let row = &self.weights[o * self.inputs..(o + 1) * self.inputs];
                let sources = row
                    .iter()
                    .zip(channels)
                    .filter(|(&w, _)| w != 0.0)
                    .collect_vec();
                (0..frames)
                    .map(|i| sources.iter().map(|(&w, channel)| w * channel[i]).sum::<f32>())
                    .collect()
            })
            .collect()
    }
}
