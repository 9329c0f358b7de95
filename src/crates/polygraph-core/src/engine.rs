//! Deterministic graph-walk engine
//!
//! The engine is a pure function of `(policy, vars)`: it mutates only the
//! caller's variable map and emits side effects solely through the optional
//! latency observer. It holds no state between runs, so one instance can be
//! shared by any number of threads walking the same (or different) policies
//! concurrently.
//!
//! # Walk semantics
//!
//! Starting from the policy's start node, each step applies the node's
//! assignments in source order, then scans the outgoing edges in declared
//! order and takes the **first** edge whose guard evaluates to true. Guard
//! errors do not abort the scan: they are collected (missing-variable errors
//! additionally unioned into a sorted set) and the scan continues with the
//! next edge. The walk stops at a leaf (success), when every edge cleanly
//! returned false (success), when every candidate errored (error), or after
//! `max_steps` iterations (error; compiled policies are acyclic, so the
//! bound only matters for hand-built graphs and pathological sizes).
//!
//! For every node a step timer runs from entry to step end and is reported
//! to the observer exactly once — terminal and error nodes included.
//!
//! Given identical inputs the chosen edge at every node, and therefore the
//! final variable map, are deterministic. Latency values and observer
//! delivery timing are not part of that contract.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{EvalError, PolicyError, Result};
use crate::eval::Evaluator;
use crate::model::{Edge, Policy, VarMap, START_NODE};
use crate::observe::NodeLatencyObserver;
use crate::trace::{ExecutionTrace, NullSink, Termination, TraceRecorder, TraceSink};

/// Default walk step bound.
pub const DEFAULT_MAX_STEPS: usize = 10_000;

/// The walk engine. Construct with [`Engine::new`], then chain
/// [`with_observer`](Engine::with_observer) /
/// [`with_max_steps`](Engine::with_max_steps).
pub struct Engine {
    evaluator: Arc<dyn Evaluator>,
    observer: Option<Arc<dyn NodeLatencyObserver>>,
    max_steps: usize,
}

impl Engine {
    /// Engine over the given guard evaluator, no observer, default step
    /// bound.
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            evaluator,
            observer: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Attach a per-node latency observer.
    pub fn with_observer(mut self, observer: Arc<dyn NodeLatencyObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Override the step bound (minimum 1).
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Walk `policy`, mutating `vars` in place.
    pub fn run(&self, policy: &Policy, vars: &mut VarMap) -> Result<()> {
        self.walk(policy, vars, &mut NullSink)
    }

    /// Walk `policy` capturing an execution trace. The trace is always
    /// returned, including when the walk fails.
    pub fn run_with_trace(
        &self,
        policy: &Policy,
        vars: &mut VarMap,
    ) -> (ExecutionTrace, Result<()>) {
        let mut recorder = TraceRecorder::new(start_node(policy));
        let result = self.walk(policy, vars, &mut recorder);
        (recorder.finish(), result)
    }

    fn walk<S: TraceSink>(&self, policy: &Policy, vars: &mut VarMap, sink: &mut S) -> Result<()> {
        let mut current = start_node(policy).to_string();
        tracing::debug!(start = %current, max_steps = self.max_steps, "starting policy walk");

        for _ in 0..self.max_steps {
            let step_start = Instant::now();
            sink.begin_step(&current);

            let Some(node) = policy.nodes.get(&current) else {
                self.observe(&current, step_start.elapsed());
                sink.end_step(step_start.elapsed());
                sink.terminate(Termination::ErrorUnknownNode);
                return Err(PolicyError::UnknownNode(current));
            };

            sink.visit(&current);

            for assignment in &node.result {
                vars.insert(assignment.key.clone(), assignment.value.clone());
            }

            if node.outgoing.is_empty() {
                self.observe(&current, step_start.elapsed());
                sink.end_step(step_start.elapsed());
                sink.terminate(Termination::Leaf);
                return Ok(());
            }

            let mut next: Option<&str> = None;
            let mut details: Vec<String> = Vec::new();
            let mut missing: BTreeSet<String> = BTreeSet::new();

            for edge in &node.outgoing {
                match self.eval_edge(edge, vars) {
                    Ok(true) => {
                        sink.edge(&edge.to, &edge.cond, true, None);
                        next = Some(&edge.to);
                        break;
                    }
                    Ok(false) => {
                        sink.edge(&edge.to, &edge.cond, false, None);
                    }
                    Err(err) => {
                        details.push(format!(
                            "{} -> {} ({:?}): {}",
                            current, edge.to, edge.cond, err
                        ));
                        if let EvalError::MissingVariables(names) = &err {
                            missing.extend(names.iter().cloned());
                        }
                        sink.edge(&edge.to, &edge.cond, false, Some(err.to_string()));
                    }
                }
            }

            let Some(next) = next else {
                self.observe(&current, step_start.elapsed());
                sink.end_step(step_start.elapsed());
                if details.is_empty() {
                    // every guard cleanly returned false: a valid stop
                    sink.terminate(Termination::NoEdgeMatched);
                    return Ok(());
                }
                let termination = if missing.is_empty() {
                    Termination::ErrorNoEdgeMatched
                } else {
                    Termination::ErrorNoEdgeMatchedMissingVars
                };
                sink.terminate(termination);
                return Err(PolicyError::NoEdgeMatched {
                    node: current,
                    missing: missing.into_iter().collect(),
                    details,
                });
            };

            sink.chosen(next);
            self.observe(&current, step_start.elapsed());
            sink.end_step(step_start.elapsed());
            current = next.to_string();
        }

        tracing::debug!(max_steps = self.max_steps, "policy walk exhausted step bound");
        sink.terminate(Termination::ErrorMaxSteps);
        Err(PolicyError::MaxStepsExceeded)
    }

    /// Compiled path when both the edge and the evaluator support it, text
    /// path otherwise.
    fn eval_edge(&self, edge: &Edge, vars: &VarMap) -> std::result::Result<bool, EvalError> {
        if let Some(guard) = &edge.compiled {
            if let Some(result) = self.evaluator.eval_compiled(guard, vars) {
                return result;
            }
        }
        self.evaluator.eval(&edge.cond, vars)
    }

    fn observe(&self, node_id: &str, elapsed: Duration) {
        if let Some(observer) = &self.observer {
            observer.observe_node_latency(node_id, elapsed);
        }
    }
}

fn start_node(policy: &Policy) -> &str {
    if policy.start.is_empty() {
        START_NODE
    } else {
        &policy.start
    }
}
