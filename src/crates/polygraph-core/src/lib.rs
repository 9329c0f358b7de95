//! # polygraph-core — stateless policy inference
//!
//! Given a decision policy written as a Graphviz-style digraph and a mapping
//! of input variables, polygraph produces an augmented variable mapping by
//! walking the graph from its start node: each node applies its `result`
//! assignments, each outgoing edge is gated by a boolean `cond` guard, and
//! the first matching edge (in source order) decides where the walk goes
//! next. It is the decision core behind request/response services such as
//! credit approval, routing or eligibility checks.
//!
//! ```text
//! raw policy text ──► [PolicyCache::get_or_compute] ──► compiled Policy ──┐
//! input vars ── clone ──────────────────────────────────────────────────►[Engine::run] ──► output vars (+trace)
//!                                                                         │
//!                                                                         └─► NodeLatencyObserver (async)
//! ```
//!
//! ## Pieces
//!
//! - [`Compiler`] parses the digraph, builds the immutable [`Policy`],
//!   rejects cycles and precompiles every edge guard.
//! - [`eval`] is the restricted boolean guard sublanguage: static
//!   validation, CEL compilation, a process-wide intern table and
//!   missing-variable detection.
//! - [`Engine`] walks a policy deterministically with a step bound,
//!   per-node latency observation and optional trace capture.
//! - [`PolicyCache`] deduplicates compiles content-addressed by SHA-256,
//!   with single-flight semantics for concurrent misses.
//! - [`AsyncNodeLatencyObserver`] keeps latency reporting off the hot path
//!   with a bounded buffer and drop-on-overflow.
//! - [`InferenceService`] ties the pieces together for transports.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use polygraph_core::{
//!     Compiler, Engine, InferenceService, PolicyCache, eval::CelEvaluator,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = InferenceService::new(
//!     Compiler::new(),
//!     Engine::new(Arc::new(CelEvaluator)),
//!     Arc::new(PolicyCache::new(1024)),
//! );
//!
//! let policy = r#"digraph Policy {
//!     approved [result="approved=true"]
//!     rejected [result="approved=false"]
//!     start -> approved [cond="age>=18"]
//!     start -> rejected [cond="age<18"]
//! }"#;
//!
//! let input = [("age".to_string(), json!(25))].into_iter().collect();
//! let output = service.infer(policy, Some(&input)).await?;
//! assert_eq!(output["approved"], json!(true));
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! A [`Policy`] and its compiled guards are immutable after compilation; any
//! number of threads may walk one policy through a shared [`Engine`], which
//! keeps no state between runs. The cache and the guard intern table are
//! internally synchronised. The variable map belongs to the caller for the
//! duration of a run and is never retained.

pub mod cache;
pub mod compiler;
mod dot;
pub mod engine;
pub mod error;
pub mod eval;
pub mod model;
pub mod observe;
pub mod result;
pub mod service;
pub mod trace;

pub use cache::{sha256_hex, PolicyCache};
pub use compiler::Compiler;
pub use engine::{Engine, DEFAULT_MAX_STEPS};
pub use error::{EvalError, PolicyError, Result};
pub use model::{Assignment, Edge, Node, Policy, VarMap, START_NODE};
pub use observe::{
    AsyncNodeLatencyObserver, NodeLatencyObserver, NoopNodeLatencyObserver,
    TracingNodeLatencyObserver,
};
pub use service::{InferFailure, Inference, InferenceService, InferOptions, PolicyInfo};
pub use trace::{EdgeTrace, ExecutionTrace, Termination, TraceStep};
