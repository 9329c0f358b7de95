//! Error types for policy compilation, guard evaluation and execution
//!
//! Two taxonomies live here:
//!
//! ```text
//! PolicyError
//! ├── Parse               - malformed digraph text
//! ├── InvalidResult       - bad result attribute on a node
//! ├── InvalidCond         - guard rejected at compile time
//! ├── Cycle               - policy graph is not acyclic
//! ├── UnknownNode         - walk reached a node id with no definition
//! ├── NoEdgeMatched       - walk stuck with eval errors on every edge
//! ├── MaxStepsExceeded    - walk bound tripped
//! ├── ComputePanic        - cache compute function panicked
//! ├── EmptyPolicy         - no policy text supplied
//! └── OptionsMismatch     - policy_id without policy_version (or vice versa)
//!
//! EvalError
//! ├── IllegalCharacter / DotAccess / ArithmeticOperator / FunctionCall
//! │                       - static validation of the guard sublanguage
//! ├── Compile             - guard failed to compile
//! ├── MissingVariables    - referenced variables absent at run time
//! ├── NotBool             - guard evaluated to a non-boolean
//! └── Execution           - guard evaluation failed
//! ```
//!
//! All variants carry owned strings and both enums are `Clone`, so a single
//! result can be fanned out to every waiter of an in-flight cache compute.
//! [`EvalError::MissingVariables`] is the one structured, recoverable error:
//! the engine unions its variable lists across edges before reporting.

use thiserror::Error;

/// Convenience result type using [`PolicyError`].
pub type Result<T> = std::result::Result<T, PolicyError>;

/// Errors produced by the compiler, the walk engine and the policy cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The digraph text could not be parsed.
    #[error("parse DOT: {0}")]
    Parse(String),

    /// A node's `result` attribute failed the result-literal grammar.
    #[error("invalid result in node {node}: {reason}")]
    InvalidResult {
        /// Node carrying the bad attribute
        node: String,
        /// What was wrong with it
        reason: String,
    },

    /// An edge's `cond` attribute was rejected by guard validation or
    /// compilation.
    #[error("invalid cond on edge {from}->{to}: {reason}")]
    InvalidCond {
        /// Source node of the edge
        from: String,
        /// Destination node of the edge
        to: String,
        /// What was wrong with the guard
        reason: String,
    },

    /// The policy graph contains a cycle. Compilation never yields a cyclic
    /// policy; the path names every node on the cycle, ending where it began.
    #[error("policy graph contains cycle: {path}")]
    Cycle {
        /// Rendered cycle, e.g. `a -> b -> a`
        path: String,
    },

    /// The walk reached a node id that has no definition in the policy.
    #[error("unknown node {0:?}")]
    UnknownNode(String),

    /// Every outgoing edge either evaluated to false or errored, and at
    /// least one errored. A clean all-false scan is a successful
    /// termination, not this error.
    #[error("{}", no_edge_matched_message(node, missing, details))]
    NoEdgeMatched {
        /// Node at which the walk stalled
        node: String,
        /// Union of missing input variables across the edge guards, sorted
        missing: Vec<String>,
        /// Per-edge evaluation failures, in edge order
        details: Vec<String>,
    },

    /// The walk did not terminate within the configured step bound.
    #[error("maxSteps exceeded (possible cycle or huge graph)")]
    MaxStepsExceeded,

    /// A cache compute function panicked; every waiter of that compute
    /// receives this error and the next call recomputes.
    #[error("compute panic: {0}")]
    ComputePanic(String),

    /// No policy text was supplied to the inference service.
    #[error("policy_dot is required")]
    EmptyPolicy,

    /// Exactly one of `policy_id` / `policy_version` was supplied.
    #[error("policy_id and policy_version must be provided together")]
    OptionsMismatch,
}

impl PolicyError {
    /// Invalid-result error for a node.
    pub fn invalid_result(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResult {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Invalid-cond error for an edge.
    pub fn invalid_cond(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidCond {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }
}

fn no_edge_matched_message(node: &str, missing: &[String], details: &[String]) -> String {
    if missing.is_empty() {
        format!(
            "no edge matched at node {:?}: eval details: {}",
            node,
            details.join("; ")
        )
    } else {
        format!(
            "no edge matched at node {:?}: missing input vars [{}]; eval details: {}",
            node,
            missing.join(", "),
            details.join("; ")
        )
    }
}

/// Errors produced by the restricted boolean guard sublanguage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The guard contains a character outside the sublanguage.
    #[error("illegal character {0:?}")]
    IllegalCharacter(char),

    /// Member/field access is disabled.
    #[error("dot access is not allowed")]
    DotAccess,

    /// Arithmetic operators are disabled.
    #[error("arithmetic operator {0:?} is not allowed")]
    ArithmeticOperator(char),

    /// Function calls are disabled; carries the offending identifier.
    #[error("function calls are not allowed (found {0}(...))")]
    FunctionCall(String),

    /// The guard passed validation but failed to compile.
    #[error("compile cond: {0}")]
    Compile(String),

    /// Variables referenced by the guard are absent from the input map.
    /// The list is sorted and duplicate-free.
    #[error("missing variables: [{}]", .0.join(", "))]
    MissingVariables(Vec<String>),

    /// The guard evaluated to something other than a boolean.
    #[error("cond must evaluate to bool (got {0})")]
    NotBool(String),

    /// Guard evaluation failed.
    #[error("eval cond: {0}")]
    Execution(String),
}
