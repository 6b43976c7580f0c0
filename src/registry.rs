//! String-keyed node construction.
//!
//! The graph editor names node types by short keys (`AIN`, `AOUT`, `STV`) and passes an
//! opaque JSON payload per node. The registry is the only place those keys are resolved.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::device::AudioBackend;
use crate::error::EngineError;
use crate::node::{Node, NodeKind};
use crate::nodes::{AnalyzerOptions, AudioSink, AudioSource, SpectrumBoard, SpectrumView};
use crate::settings::AudioSettings;

/// What every constructor gets besides the node's name and payload.
#[derive(Clone)]
pub struct NodeContext {
    pub settings: AudioSettings,
    pub backend: Arc<dyn AudioBackend>,
    pub board: SpectrumBoard,
}

impl NodeContext {
    pub fn new(settings: AudioSettings, backend: Arc<dyn AudioBackend>, board: SpectrumBoard) -> Self {
        Self {
            settings,
            backend,
            board,
        }
    }
}

pub type NodeConstructor =
    Box<dyn Fn(&str, &serde_json::Value, &NodeContext) -> Result<Box<dyn Node>, EngineError> + Send + Sync>;

/// Maps node type keys to constructors.
///
/// ```
/// use std::sync::Arc;
/// use nodedsp::{AudioSettings, MemoryBackend, Node, NodeContext, NodeRegistry, SpectrumBoard};
///
/// let ctx = NodeContext::new(AudioSettings::default(), Arc::new(MemoryBackend::new()), SpectrumBoard::new());
/// let registry = NodeRegistry::with_defaults();
///
/// let source = registry.create("AIN", "mic", &serde_json::Value::Null, &ctx).unwrap();
/// assert_eq!(source.output_labels().len(), 2);
/// assert!(registry.create("FLANGER", "fx", &serde_json::Value::Null, &ctx).is_err());
/// ```
#[derive(Default)]
pub struct NodeRegistry {
    constructors: HashMap<String, NodeConstructor>,
}

impl NodeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in node types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(NodeKind::Source.key(), |name, _payload, ctx| {
            let node = AudioSource::open(name, &ctx.settings.input, ctx.backend.as_ref())?;
            Ok(Box::new(node) as Box<dyn Node>)
        });
        registry.register(NodeKind::Sink.key(), |name, _payload, ctx| {
            let node = AudioSink::open(name, &ctx.settings.output, ctx.backend.as_ref())?;
            Ok(Box::new(node) as Box<dyn Node>)
        });
        registry.register(NodeKind::Analyzer.key(), |name, payload, ctx| {
            let options = AnalyzerOptions::from_payload(payload)?;
            Ok(Box::new(SpectrumView::new(name, options, ctx.board.clone())) as Box<dyn Node>)
        });
        registry
    }

    /// Register `constructor` under `key`, replacing any previous one.
    pub fn register<F>(&mut self, key: impl Into<String>, constructor: F)
    where
        F: Fn(&str, &serde_json::Value, &NodeContext) -> Result<Box<dyn Node>, EngineError> + Send + Sync + 'static,
    {
        let key = key.into();
        if self.constructors.insert(key.clone(), Box::new(constructor)).is_some() {
            tracing::debug!(key, "node constructor replaced");
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.constructors.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Build a node of type `key`.
    pub fn create(
        &self,
        key: &str,
        name: &str,
        payload: &serde_json::Value,
        ctx: &NodeContext,
    ) -> Result<Box<dyn Node>, EngineError> {
        let constructor = self
            .constructors
            .get(key)
            .ok_or_else(|| EngineError::UnknownNodeType(key.to_owned()))?;
        constructor(name, payload, ctx)
    }
}
