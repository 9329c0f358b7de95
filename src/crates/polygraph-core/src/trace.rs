//! Execution traces
//!
//! A trace is the structured record of one walk: the start node, the visited
//! path, one [`TraceStep`] per visited node (terminal and error nodes
//! included) and a [`Termination`] tag. Edge records are kept for every edge
//! *considered* — up to and including the first matching edge.
//!
//! Trace capture is threaded through the walk as an accumulator behind the
//! crate-private [`TraceSink`] trait. The no-op sink makes every recording
//! call vanish, so a traced walk and an untraced walk execute identically;
//! only the bookkeeping differs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Reached a node with no outgoing edges.
    Leaf,
    /// Every edge cleanly evaluated to false; successful stop.
    NoEdgeMatched,
    /// Walk reached a node id with no definition.
    ErrorUnknownNode,
    /// No edge matched and at least one guard errored.
    ErrorNoEdgeMatched,
    /// No edge matched and guards referenced absent input variables.
    ErrorNoEdgeMatchedMissingVars,
    /// Step bound exhausted.
    ErrorMaxSteps,
}

/// Structured record of a single walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Node the walk started at.
    pub start_node: String,
    /// Ids of the nodes whose assignments were applied, in visit order.
    /// Ends at the terminal node; an unknown node id is not included.
    pub visited_path: Vec<String>,
    /// One step per visited node, including the terminal one.
    pub steps: Vec<TraceStep>,
    /// How the walk ended.
    pub terminated: Termination,
}

/// Per-node record inside a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// Node this step describes.
    pub node_id: String,
    /// Wall time spent on the node, in microseconds.
    pub duration_micros: u64,
    /// Destination of the matching edge, absent on terminal steps.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chosen_next: Option<String>,
    /// Edges considered at this node, in declared order.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub edges: Vec<EdgeTrace>,
}

/// Outcome of considering one edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeTrace {
    /// Edge destination.
    pub to: String,
    /// Original guard text.
    pub cond: String,
    /// Whether the guard matched (and the walk took this edge).
    pub matched: bool,
    /// Guard evaluation error, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Accumulator the walk reports into. See the module docs.
pub(crate) trait TraceSink {
    fn begin_step(&mut self, node_id: &str);
    fn visit(&mut self, node_id: &str);
    fn edge(&mut self, to: &str, cond: &str, matched: bool, error: Option<String>);
    fn chosen(&mut self, next: &str);
    fn end_step(&mut self, elapsed: Duration);
    fn terminate(&mut self, termination: Termination);
}

/// Sink for untraced walks; every call is a no-op.
pub(crate) struct NullSink;

impl TraceSink for NullSink {
    fn begin_step(&mut self, _node_id: &str) {}
    fn visit(&mut self, _node_id: &str) {}
    fn edge(&mut self, _to: &str, _cond: &str, _matched: bool, _error: Option<String>) {}
    fn chosen(&mut self, _next: &str) {}
    fn end_step(&mut self, _elapsed: Duration) {}
    fn terminate(&mut self, _termination: Termination) {}
}

/// Sink that builds an [`ExecutionTrace`].
pub(crate) struct TraceRecorder {
    start_node: String,
    visited_path: Vec<String>,
    steps: Vec<TraceStep>,
    current: Option<TraceStep>,
    terminated: Option<Termination>,
}

impl TraceRecorder {
    pub(crate) fn new(start_node: &str) -> Self {
        Self {
            start_node: start_node.to_string(),
            visited_path: Vec::new(),
            steps: Vec::new(),
            current: None,
            terminated: None,
        }
    }

    pub(crate) fn finish(self) -> ExecutionTrace {
        ExecutionTrace {
            start_node: self.start_node,
            visited_path: self.visited_path,
            steps: self.steps,
            // the walk terminates every path through the sink; the fallback
            // only guards against a step bound of zero
            terminated: self.terminated.unwrap_or(Termination::ErrorMaxSteps),
        }
    }
}

impl TraceSink for TraceRecorder {
    fn begin_step(&mut self, node_id: &str) {
        self.current = Some(TraceStep {
            node_id: node_id.to_string(),
            duration_micros: 0,
            chosen_next: None,
            edges: Vec::new(),
        });
    }

    fn visit(&mut self, node_id: &str) {
        self.visited_path.push(node_id.to_string());
    }

    fn edge(&mut self, to: &str, cond: &str, matched: bool, error: Option<String>) {
        if let Some(step) = &mut self.current {
            step.edges.push(EdgeTrace {
                to: to.to_string(),
                cond: cond.to_string(),
                matched,
                error,
            });
        }
    }

    fn chosen(&mut self, next: &str) {
        if let Some(step) = &mut self.current {
            step.chosen_next = Some(next.to_string());
        }
    }

    fn end_step(&mut self, elapsed: Duration) {
        if let Some(mut step) = self.current.take() {
            step.duration_micros = elapsed.as_micros() as u64;
            self.steps.push(step);
        }
    }

    fn terminate(&mut self, termination: Termination) {
        self.terminated = Some(termination);
    }
}
