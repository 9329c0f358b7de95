//! Core policy data structures
//!
//! A [`Policy`] is the compiled, immutable form of a digraph policy: a start
//! node id plus an id-keyed map of [`Node`]s. Nodes carry the assignments
//! applied on entry and their outgoing [`Edge`]s **in source-text order** —
//! edge order is load-bearing, the walk takes the first edge whose guard
//! evaluates to true.
//!
//! Policies are index-based (string node ids) rather than pointer-threaded,
//! which keeps the acyclicity check, structural equality and tracing
//! straightforward. After compilation a policy is never mutated; the cache
//! hands out `Arc<Policy>` and any number of walks may share one instance.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::eval::CompiledGuard;

/// Node identifier - unique name for each node in a policy graph.
pub type NodeId = String;

/// Variable mapping threaded through a walk. JSON object semantics: the
/// engine inserts assignment values and guards read them back.
pub type VarMap = serde_json::Map<String, Value>;

/// Default start node id used when a policy does not name one.
pub const START_NODE: &str = "start";

/// A compiled, immutable decision policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// Id of the node the walk begins at. Defaults to [`START_NODE`].
    pub start: NodeId,
    /// All nodes, keyed by id. Every edge destination has an entry here;
    /// mentioning a node in an edge statement creates it implicitly.
    pub nodes: HashMap<NodeId, Node>,
}

impl Policy {
    /// Empty policy rooted at [`START_NODE`]. The compiler starts from this
    /// and fills in nodes as statements are applied.
    pub fn new() -> Self {
        Self {
            start: START_NODE.to_string(),
            nodes: HashMap::new(),
        }
    }

    /// Look up `id`, creating an empty node on first mention.
    pub(crate) fn ensure_node(&mut self, id: &str) -> &mut Node {
        self.nodes
            .entry(id.to_string())
            .or_insert_with(|| Node::new(id))
    }
}

/// A single policy node: assignments applied on entry plus ordered outgoing
/// edges.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    /// Node id, duplicated from the policy map key for convenience.
    pub id: NodeId,
    /// Assignments applied to the variable map when the walk enters this
    /// node, in source order. Later writes win on duplicate keys.
    pub result: Vec<Assignment>,
    /// Outgoing edges in source order.
    pub outgoing: Vec<Edge>,
}

impl Node {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            result: Vec::new(),
            outgoing: Vec::new(),
        }
    }
}

/// A directed edge to another node, gated by an optional guard.
///
/// `compiled` is `None` exactly when `cond` is empty; an empty guard always
/// matches. Compiled guards are interned process-wide, so edges across
/// policies with identical guard text share one program.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Destination node id.
    pub to: NodeId,
    /// Original guard text, kept verbatim for traces and error messages.
    pub cond: String,
    /// Precompiled guard program, shared via the intern table.
    pub compiled: Option<Arc<CompiledGuard>>,
}

// Structural equality only: two edges are equal when they point at the same
// node with the same guard text, regardless of program identity.
impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.to == other.to && self.cond == other.cond
    }
}

/// A `key=value` pair applied to the variable map on node entry.
///
/// Values are restricted to the four literal types of the result grammar:
/// bool, integer, float and string.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Variable name, non-empty.
    pub key: String,
    /// Decoded literal value.
    pub value: Value,
}
