//! Policy compiler
//!
//! Turns digraph text into an immutable [`Policy`]: parse the statement list
//! ([`crate::dot`]), apply node and edge statements in source order, make
//! sure the start node exists, then reject cycles. Guards are validated and
//! compiled here, at policy compile time, so a policy that compiles can only
//! fail at run time for data reasons (missing or mistyped input variables).
//!
//! Statement semantics:
//!
//! - A node statement creates the node on first mention and **overwrites**
//!   its assignment list from the `result` attribute (absent attribute ⇒
//!   empty list). Surrounding quotes of either kind are stripped before the
//!   attribute is parsed.
//! - An edge statement may be a chain `a -> b -> c [cond="…"]`. The `cond`
//!   applies to the **first** edge of the chain only; every subsequent edge
//!   is unconditional. This mirrors how attribute lists bind in DOT, but it
//!   is subtle — spell chains out as separate statements when each hop needs
//!   its own guard.
//! - Every node mentioned anywhere is created implicitly; edges can never
//!   dangle.

use std::collections::HashMap;

use crate::dot::{self, Stmt};
use crate::error::{PolicyError, Result};
use crate::eval;
use crate::model::{Edge, Policy, START_NODE};
use crate::result::parse_result;

/// Compiles digraph text into policies. Stateless; guard programs are
/// interned process-wide, not per compiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Compiler;

impl Compiler {
    pub fn new() -> Self {
        Self
    }

    /// Compile policy text. No partially constructed policy ever escapes:
    /// any statement or validation error fails the whole compilation.
    pub fn compile(&self, text: &str) -> Result<Policy> {
        let stmts = dot::parse(text).map_err(PolicyError::Parse)?;

        let mut policy = Policy::new();
        apply_stmt_list(&mut policy, &stmts)?;
        policy.ensure_node(START_NODE);

        check_acyclic(&policy)?;

        tracing::debug!(nodes = policy.nodes.len(), "compiled policy");
        Ok(policy)
    }
}

fn apply_stmt_list(policy: &mut Policy, stmts: &[Stmt]) -> Result<()> {
    for stmt in stmts {
        match stmt {
            Stmt::Node { id, attrs } => apply_node_stmt(policy, id, attrs)?,
            Stmt::Edge { chain, attrs } => apply_edge_stmt(policy, chain, attrs)?,
            Stmt::Subgraph(inner) => apply_stmt_list(policy, inner)?,
        }
    }
    Ok(())
}

fn apply_node_stmt(policy: &mut Policy, id: &str, attrs: &[(String, String)]) -> Result<()> {
    let raw = attr_value(attrs, "result");
    let raw = unquote(raw.trim());

    let assignments =
        parse_result(raw).map_err(|e| PolicyError::invalid_result(id, e.to_string()))?;

    policy.ensure_node(id).result = assignments;
    Ok(())
}

fn apply_edge_stmt(policy: &mut Policy, chain: &[String], attrs: &[(String, String)]) -> Result<()> {
    let Some((from, rest)) = chain.split_first() else {
        return Ok(());
    };
    policy.ensure_node(from);

    let cond = unquote(attr_value(attrs, "cond").trim()).trim();
    let compiled = if cond.is_empty() {
        None
    } else {
        let first_to = rest.first().map(String::as_str).unwrap_or_default();
        Some(
            eval::compile(cond)
                .map_err(|e| PolicyError::invalid_cond(from, first_to, e.to_string()))?,
        )
    };

    let mut prev = from;
    for (i, to) in rest.iter().enumerate() {
        policy.ensure_node(to);

        let (edge_cond, edge_compiled) = if i == 0 {
            (cond.to_string(), compiled.clone())
        } else {
            (String::new(), None)
        };

        policy.ensure_node(prev).outgoing.push(Edge {
            to: to.clone(),
            cond: edge_cond,
            compiled: edge_compiled,
        });
        prev = to;
    }

    Ok(())
}

/// Last occurrence of `key` in an attribute list, or the empty string.
fn attr_value<'a>(attrs: &'a [(String, String)], key: &str) -> &'a str {
    attrs
        .iter()
        .rev()
        .find(|(k, _)| k.as_str() == key)
        .map(|(_, v)| v.as_str())
        .unwrap_or("")
}

/// Strip one surrounding quote pair of either kind.
fn unquote(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &s[1..s.len() - 1];
        }
    }
    s
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Unseen,
    Visiting,
    Done,
}

/// Three-color DFS over sorted node ids. Sorting makes the reported cycle
/// deterministic regardless of map iteration order.
fn check_acyclic(policy: &Policy) -> Result<()> {
    let mut colors: HashMap<&str, Color> = policy
        .nodes
        .keys()
        .map(|id| (id.as_str(), Color::Unseen))
        .collect();

    let mut roots: Vec<&str> = policy.nodes.keys().map(String::as_str).collect();
    roots.sort_unstable();

    let mut path: Vec<&str> = Vec::new();
    for root in roots {
        if colors.get(root) == Some(&Color::Unseen) {
            visit(policy, root, &mut colors, &mut path)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    policy: &'a Policy,
    id: &'a str,
    colors: &mut HashMap<&'a str, Color>,
    path: &mut Vec<&'a str>,
) -> Result<()> {
    colors.insert(id, Color::Visiting);
    path.push(id);

    if let Some(node) = policy.nodes.get(id) {
        for edge in &node.outgoing {
            let to = edge.to.as_str();
            match colors.get(to).copied().unwrap_or(Color::Unseen) {
                Color::Visiting => {
                    // back-edge: the cycle runs from `to`'s position on the
                    // current path back around to `to`
                    let pos = path.iter().position(|n| *n == to).unwrap_or(0);
                    let mut cycle: Vec<&str> = path[pos..].to_vec();
                    cycle.push(to);
                    return Err(PolicyError::Cycle {
                        path: cycle.join(" -> "),
                    });
                }
                Color::Done => {}
                Color::Unseen => visit(policy, to, colors, path)?,
            }
        }
    }

    path.pop();
    colors.insert(id, Color::Done);
    Ok(())
}
