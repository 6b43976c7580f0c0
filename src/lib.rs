//! nodedsp - real-time audio node graph
//!
//! A graph of nodes exchanging per-channel [`AudioFrame`]s, ticked continuously by a
//! [`Scheduler`]:
//! - [`AudioSource`] captures from an input device, one output per channel
//! - [`AudioSink`] plays to an output device, remixing mismatched channel counts
//! - [`SpectrumView`] analyzes one channel on its own worker and publishes the result on a
//!   [`SpectrumBoard`]
//!
//! Design principles:
//! - The tick loop has no clock of its own; blocking device I/O paces it
//! - A node that fails one tick is retried on the next one
//! - Expensive analysis never runs on the tick thread
//! - Devices sit behind [`AudioBackend`], so graphs run against [`MemoryBackend`] in tests
//!
//! ```
//! use std::sync::Arc;
//! use nodedsp::{AudioSettings, Graph, MemoryBackend, NodeContext, NodeRegistry, SpectrumBoard};
//!
//! let backend = MemoryBackend::new();
//! let ctx = NodeContext::new(AudioSettings::default(), Arc::new(backend.clone()), SpectrumBoard::new());
//! let registry = NodeRegistry::with_defaults();
//!
//! let mut graph = Graph::new();
//! let mic = graph.add_node(registry.create("AIN", "mic", &serde_json::Value::Null, &ctx).unwrap());
//! let speakers = graph.add_node(registry.create("AOUT", "speakers", &serde_json::Value::Null, &ctx).unwrap());
//! graph.connect(mic.output(0), speakers.input(0)).unwrap();
//! graph.connect(mic.output(1), speakers.input(1)).unwrap();
//!
//! backend.feed(&[0.25, -0.25, 0.5, -0.5]);
//! graph.tick();
//! assert_eq!(backend.played(), vec![0.25, -0.25, 0.5, -0.5]);
//! ```

mod attribute;
pub mod channels;
mod device;
mod error;
pub mod fault;
mod graph;
mod node;
pub mod nodes;
mod registry;
mod scheduler;
mod settings;

pub use attribute::{AttributeId, AttributeInfo, AudioFrame, Direction, InputAttribute, OutputAttribute};
pub use device::{AudioBackend, InputStream, MemoryBackend, OutputStream};
#[cfg(feature = "cpal_io")]
pub use device::{CpalBackend, DeviceInfo};
pub use error::{AnalysisError, EngineError, NodeError};
pub use graph::{Graph, TickReport};
pub use node::{channel_labels, InputRef, Node, NodeId, NodeKind, OutputRef, TickContext};
pub use nodes::{AnalyzerOptions, AnalyzerState, AudioSink, AudioSource, Spectrum, SpectrumBoard, SpectrumView};
pub use registry::{NodeConstructor, NodeContext, NodeRegistry};
pub use scheduler::{Scheduler, SchedulerState, TickStats};
pub use settings::{AudioSettings, InputSettings, OutputSettings, SampleFormat, SETTINGS_VERSION};
