//! Audio graph - owns nodes, their attributes and the edges between them

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use hashbrown::HashMap;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction::{Incoming, Outgoing};

use crate::attribute::{AttributeId, AudioFrame, Direction, InputAttribute, OutputAttribute};
use crate::error::{EngineError, NodeError};
use crate::fault::{self, FaultSite};
use crate::node::{InputRef, Node, NodeId, OutputRef, TickContext};

/// Edge weight: which output of the source feeds which input of the target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Link {
    output: usize,
    input: usize,
}

struct NodeEntry {
    id: NodeId,
    node: Box<dyn Node>,
    inputs: Vec<InputAttribute>,
    outputs: Vec<OutputAttribute>,
}

type InnerGraph = StableGraph<NodeEntry, Link>;

/// What happened during one [`Graph::tick`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Nodes whose `process` was invoked
    pub processed: usize,
    /// Nodes whose `process` failed or panicked
    pub faults: usize,
}

/// A set of nodes and the edges between their attributes.
///
/// Nodes are processed in the order they were added. There is no dependency solver:
/// device nodes pace themselves through blocking I/O, and a producer added before its
/// consumers delivers within the same tick.
///
/// ```
/// # use nodedsp::{Graph, AudioFrame, InputAttribute, OutputAttribute, Node, NodeError, NodeKind, TickContext};
/// # struct Tone;
/// # impl Node for Tone {
/// #     fn kind(&self) -> NodeKind { NodeKind::Custom }
/// #     fn name(&self) -> &str { "tone" }
/// #     fn output_labels(&self) -> Vec<String> { vec!["Out".into()] }
/// #     fn process(&mut self, _: &TickContext, _: &mut [InputAttribute], o: &mut [OutputAttribute]) -> Result<(), NodeError> {
/// #         o[0].set_data(AudioFrame::new(vec![0.5; 4], 48_000, 4)); Ok(())
/// #     }
/// # }
/// # struct Meter;
/// # impl Node for Meter {
/// #     fn kind(&self) -> NodeKind { NodeKind::Custom }
/// #     fn name(&self) -> &str { "meter" }
/// #     fn input_labels(&self) -> Vec<String> { vec!["In".into()] }
/// #     fn process(&mut self, _: &TickContext, _: &mut [InputAttribute], _: &mut [OutputAttribute]) -> Result<(), NodeError> { Ok(()) }
/// # }
/// let mut graph = Graph::new();
/// let tone = graph.add(Tone);
/// let meter = graph.add(Meter);
/// graph.connect(tone.output(0), meter.input(0)).unwrap();
///
/// let report = graph.tick();
/// assert_eq!(report.faults, 0);
/// ```
pub struct Graph {
    graph: InnerGraph,
    /// Registration order, which is also processing order
    order: Vec<NodeIndex>,
    node_indices: HashMap<NodeId, NodeIndex>,
    next_node_id: u32,
    next_attribute_id: u64,
    ticks: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            graph: InnerGraph::with_capacity(16, 32),
            order: Vec::with_capacity(16),
            node_indices: HashMap::new(),
            next_node_id: 0,
            next_attribute_id: 0,
            ticks: 0,
        }
    }

    /// Add a node. Its attributes are created here, one per declared label.
    pub fn add<N: Node>(&mut self, node: N) -> NodeId {
        self.add_node(Box::new(node))
    }

    /// Add an already boxed node, e.g. one built by a [`NodeRegistry`](crate::NodeRegistry).
    pub fn add_node(&mut self, node: Box<dyn Node>) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;

        let inputs = node
            .input_labels()
            .into_iter()
            .enumerate()
            .map(|(ordinal, label)| InputAttribute::new(self.next_attribute(), id, ordinal, label))
            .collect();
        let outputs = node
            .output_labels()
            .into_iter()
            .enumerate()
            .map(|(ordinal, label)| OutputAttribute::new(self.next_attribute(), id, ordinal, label))
            .collect();

        tracing::debug!(node = %id, name = node.name(), kind = node.kind().key(), "node added");

        let idx = self.graph.add_node(NodeEntry {
            id,
            node,
            inputs,
            outputs,
        });
        self.order.push(idx);
        self.node_indices.insert(id, idx);
        id
    }

    fn next_attribute(&mut self) -> AttributeId {
        let id = AttributeId(self.next_attribute_id);
        self.next_attribute_id += 1;
        id
    }

    /// Connect an output attribute to an input attribute.
    ///
    /// An output may feed any number of inputs; an input accepts exactly one edge.
    pub fn connect(&mut self, from: OutputRef, to: InputRef) -> Result<(), EngineError> {
        let from_idx = self.index_of(from.node)?;
        let to_idx = self.index_of(to.node)?;

        if from.ordinal >= self.graph[from_idx].outputs.len() {
            return Err(EngineError::NoSuchAttribute {
                node: from.node,
                direction: Direction::Output,
                ordinal: from.ordinal,
            });
        }
        if to.ordinal >= self.graph[to_idx].inputs.len() {
            return Err(EngineError::NoSuchAttribute {
                node: to.node,
                direction: Direction::Input,
                ordinal: to.ordinal,
            });
        }
        if self.source_of(to_idx, to.ordinal).is_some() {
            return Err(EngineError::InputOccupied {
                node: to.node,
                ordinal: to.ordinal,
            });
        }

        self.graph.add_edge(
            from_idx,
            to_idx,
            Link {
                output: from.ordinal,
                input: to.ordinal,
            },
        );
        Ok(())
    }

    /// Remove the edge feeding `to`, returning the output it came from.
    pub fn disconnect(&mut self, to: InputRef) -> Option<OutputRef> {
        let to_idx = *self.node_indices.get(&to.node)?;
        let edge = self
            .graph
            .edges_directed(to_idx, Incoming)
            .find(|e| e.weight().input == to.ordinal)
            .map(|e| e.id())?;
        let (source_idx, _) = self.graph.edge_endpoints(edge)?;
        let link = self.graph.remove_edge(edge)?;

        Some(self.graph[source_idx].id.output(link.output))
    }

    /// Remove a node and its edges, releasing its devices and threads.
    ///
    /// The node is gone from the graph even when its teardown reports an error.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), EngineError> {
        let idx = self
            .node_indices
            .remove(&id)
            .ok_or(EngineError::NodeNotFound(id))?;
        self.order.retain(|&i| i != idx);

        match self.graph.remove_node(idx) {
            Some(mut entry) => {
                tracing::debug!(node = %id, name = entry.node.name(), "node removed");
                entry.node.teardown()
            }
            None => Err(EngineError::NodeNotFound(id)),
        }
    }

    /// Tear every node down, most recently added first.
    ///
    /// All nodes are released; the first teardown error (if any) is returned.
    pub fn teardown(&mut self) -> Result<(), EngineError> {
        let mut first_error = None;
        while let Some(idx) = self.order.pop() {
            let Some(mut entry) = self.graph.remove_node(idx) else {
                continue;
            };
            self.node_indices.remove(&entry.id);
            if let Err(err) = entry.node.teardown() {
                tracing::warn!(node = %entry.id, error = %err, "teardown failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Run every node once, in registration order, moving each node's outputs to the
    /// connected inputs right after it runs.
    ///
    /// A node that returns an error or panics is skipped for this tick only.
    pub fn tick(&mut self) -> TickReport {
        let ctx = TickContext { tick: self.ticks };
        let mut report = TickReport::default();

        for pos in 0..self.order.len() {
            let idx = self.order[pos];
            let Some(entry) = self.graph.node_weight_mut(idx) else {
                continue;
            };

            let NodeEntry {
                id,
                node,
                inputs,
                outputs,
            } = entry;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| node.process(&ctx, inputs, outputs)));
            let result = outcome
                .unwrap_or_else(|payload| Err(NodeError::Panicked(fault::panic_message(&*payload))));

            report.processed += 1;
            if let Err(err) = result {
                report.faults += 1;
                fault::absorb(
                    FaultSite::Node {
                        id: *id,
                        name: node.name(),
                    },
                    &err,
                );
            }

            self.propagate(idx);
        }

        self.ticks += 1;
        report
    }

    /// Move held output frames of `from` along its outgoing edges.
    ///
    /// Outputs without edges keep holding their frame.
    fn propagate(&mut self, from: NodeIndex) {
        let links: Vec<(NodeIndex, Link)> = self
            .graph
            .edges_directed(from, Outgoing)
            .map(|e| (e.target(), *e.weight()))
            .collect();
        if links.is_empty() {
            return;
        }

        let frames: Vec<Option<Arc<AudioFrame>>> = match self.graph.node_weight_mut(from) {
            Some(entry) => entry
                .outputs
                .iter_mut()
                .enumerate()
                .map(|(ordinal, output)| {
                    if links.iter().any(|(_, link)| link.output == ordinal) {
                        output.take()
                    } else {
                        None
                    }
                })
                .collect(),
            None => return,
        };

        for (target, link) in links {
            let Some(frame) = frames.get(link.output).and_then(Option::as_ref) else {
                continue;
            };
            if let Some(input) = self
                .graph
                .node_weight_mut(target)
                .and_then(|entry| entry.inputs.get_mut(link.input))
            {
                input.deliver(Arc::clone(frame));
            }
        }
    }

    fn index_of(&self, id: NodeId) -> Result<NodeIndex, EngineError> {
        self.node_indices
            .get(&id)
            .copied()
            .ok_or(EngineError::NodeNotFound(id))
    }

    fn source_of(&self, to_idx: NodeIndex, input: usize) -> Option<OutputRef> {
        self.graph
            .edges_directed(to_idx, Incoming)
            .find(|e| e.weight().input == input)
            .and_then(|e| {
                let (source, _) = self.graph.edge_endpoints(e.id())?;
                Some(self.graph[source].id.output(e.weight().output))
            })
    }

    /// The output feeding `to`, if any.
    pub fn incoming(&self, to: InputRef) -> Option<OutputRef> {
        let idx = self.node_indices.get(&to.node)?;
        self.source_of(*idx, to.ordinal)
    }

    /// All edges as `(output, input)` pairs.
    pub fn edges(&self) -> Vec<(OutputRef, InputRef)> {
        self.graph
            .edge_indices()
            .filter_map(|e| {
                let (source, target) = self.graph.edge_endpoints(e)?;
                let link = self.graph.edge_weight(e)?;
                Some((
                    self.graph[source].id.output(link.output),
                    self.graph[target].id.input(link.input),
                ))
            })
            .collect()
    }

    /// Node ids in processing order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.order.iter().map(|&idx| self.graph[idx].id).collect()
    }

    pub fn node(&self, id: NodeId) -> Option<&dyn Node> {
        let idx = self.node_indices.get(&id)?;
        Some(self.graph[*idx].node.as_ref())
    }

    pub fn inputs(&self, id: NodeId) -> Option<&[InputAttribute]> {
        let idx = self.node_indices.get(&id)?;
        Some(&self.graph[*idx].inputs)
    }

    pub fn outputs(&self, id: NodeId) -> Option<&[OutputAttribute]> {
        let idx = self.node_indices.get(&id)?;
        Some(&self.graph[*idx].outputs)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ticks run so far.
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
