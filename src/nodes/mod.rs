//! Built-in audio nodes.
//!
//! Three node types ship with the crate, each registered in the default
//! [`NodeRegistry`](crate::NodeRegistry) under a short key:
//!
//! ## Sources ([`source`])
//!
//! - [`AudioSource`] (`AIN`) - Capture from an input device, one output per channel
//!
//! ## Sinks ([`sink`])
//!
//! - [`AudioSink`] (`AOUT`) - Play to an output device, one input per channel, remixing
//!   when fewer or more channels arrive than the device has
//!
//! ## Analyzers ([`analyzer`])
//!
//! - [`SpectrumView`] (`STV`) - Smoothed magnitude spectrum of a single channel, computed
//!   off the tick thread and published on a [`SpectrumBoard`]

pub mod analyzer;
pub mod sink;
pub mod source;

pub use analyzer::{AnalyzerOptions, AnalyzerState, Mailbox, Spectrum, SpectrumBoard, SpectrumView};
pub use sink::AudioSink;
pub use source::AudioSource;
