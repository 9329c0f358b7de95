//! Guard compilation and evaluation
//!
//! Edge guards are boolean expressions over the inference variable map, in a
//! restricted sublanguage (see [`validate`]). Guards are compiled once into a
//! [`CompiledGuard`] — an executable CEL program plus the sorted list of
//! variable names the guard references — and interned process-wide by their
//! raw text, so identical guards across policies share one program.
//!
//! Referenced-variable extraction is lexical on purpose: identifiers are
//! pulled straight out of the source (quoted substrings elided, `true` and
//! `false` excluded), which makes missing-variable detection exact for the
//! restricted sublanguage and lets the engine report every absent input by
//! name before evaluation is even attempted.
//!
//! The engine consumes guards through the [`Evaluator`] trait. The trait has
//! two methods: plain text evaluation and an optional compiled-evaluation
//! capability that implementations advertise by overriding
//! [`Evaluator::eval_compiled`]; the default returns `None` and the engine
//! falls back to the text path.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use cel_interpreter::{Context, Program, Value};
use parking_lot::RwLock;
use regex::Regex;

use crate::error::EvalError;
use crate::model::VarMap;

mod validate;

pub use validate::validate;

/// A guard compiled to an executable program.
///
/// `program` is `None` for the empty guard, which always evaluates to true.
/// `variables` is sorted ascending and duplicate-free. Instances are
/// immutable and shared via [`compile`]'s intern table.
pub struct CompiledGuard {
    source: String,
    program: Option<Program>,
    /// Variable names referenced by the guard, sorted and deduplicated.
    pub variables: Vec<String>,
}

impl CompiledGuard {
    /// The raw guard text this program was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether this is the always-true empty guard.
    pub fn is_empty(&self) -> bool {
        self.program.is_none()
    }
}

impl fmt::Debug for CompiledGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGuard")
            .field("source", &self.source)
            .field("variables", &self.variables)
            .finish_non_exhaustive()
    }
}

/// Process-wide intern table: raw guard text → compiled guard. Initialised
/// on first use, never torn down.
fn guard_cache() -> &'static RwLock<HashMap<String, Arc<CompiledGuard>>> {
    static GUARDS: OnceLock<RwLock<HashMap<String, Arc<CompiledGuard>>>> = OnceLock::new();
    GUARDS.get_or_init(|| RwLock::new(HashMap::new()))
}

fn identifier_regex() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| {
        Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("identifier regex is valid")
    })
}

/// Validate and compile a guard, consulting the intern table first.
///
/// The trimmed empty guard compiles to a program-less [`CompiledGuard`].
/// On concurrent compiles of the same text the first insert wins and every
/// caller receives the same `Arc`.
pub fn compile(cond: &str) -> Result<Arc<CompiledGuard>, EvalError> {
    let cond = cond.trim();

    if let Some(found) = guard_cache().read().get(cond) {
        return Ok(found.clone());
    }

    validate(cond)?;

    let guard = if cond.is_empty() {
        CompiledGuard {
            source: String::new(),
            program: None,
            variables: Vec::new(),
        }
    } else {
        let program =
            Program::compile(cond).map_err(|e| EvalError::Compile(e.to_string()))?;
        CompiledGuard {
            source: cond.to_string(),
            program: Some(program),
            variables: extract_variables(cond),
        }
    };

    let mut table = guard_cache().write();
    let entry = table
        .entry(cond.to_string())
        .or_insert_with(|| Arc::new(guard));
    Ok(entry.clone())
}

/// Execute a compiled guard against a variable map.
///
/// Returns `true` for the empty guard. Fails with
/// [`EvalError::MissingVariables`] (sorted list) when any referenced
/// variable is absent, and with [`EvalError::NotBool`] when the program
/// yields a non-boolean.
pub fn run(guard: &CompiledGuard, vars: &VarMap) -> Result<bool, EvalError> {
    let Some(program) = &guard.program else {
        return Ok(true);
    };

    let missing: Vec<String> = guard
        .variables
        .iter()
        .filter(|name| !vars.contains_key(*name))
        .cloned()
        .collect();
    if !missing.is_empty() {
        // already sorted: `variables` is sorted and filter preserves order
        return Err(EvalError::MissingVariables(missing));
    }

    let mut context = Context::default();
    for name in &guard.variables {
        if let Some(value) = vars.get(name) {
            context
                .add_variable(name.clone(), value)
                .map_err(|e| EvalError::Execution(e.to_string()))?;
        }
    }

    match program.execute(&context) {
        Ok(Value::Bool(b)) => Ok(b),
        Ok(other) => Err(EvalError::NotBool(value_type_name(&other).to_string())),
        Err(e) => Err(EvalError::Execution(e.to_string())),
    }
}

/// Compile-and-run convenience for the text evaluation path.
pub fn eval(cond: &str, vars: &VarMap) -> Result<bool, EvalError> {
    let guard = compile(cond)?;
    run(&guard, vars)
}

/// Lexically extract the variable names a guard references: identifiers over
/// the source with quoted substrings elided; `true`/`false` excluded; sorted
/// and deduplicated.
fn extract_variables(cond: &str) -> Vec<String> {
    let stripped = elide_quoted(cond);
    let mut names: Vec<String> = identifier_regex()
        .find_iter(&stripped)
        .map(|m| m.as_str().to_string())
        .filter(|name| name != "true" && name != "false")
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Replace quoted substrings (either quote kind, backslash-escape aware)
/// with spaces so their contents never read as identifiers.
fn elide_quoted(cond: &str) -> String {
    let mut out = String::with_capacity(cond.len());
    let mut chars = cond.chars();
    while let Some(c) = chars.next() {
        if c == '"' || c == '\'' {
            let open = c;
            out.push(' ');
            while let Some(inner) = chars.next() {
                if inner == '\\' {
                    chars.next();
                    out.push(' ');
                } else if inner == open {
                    break;
                }
                out.push(' ');
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::UInt(_) => "uint",
        Value::Float(_) => "float",
        Value::String(_) => "string",
        Value::List(_) => "list",
        Value::Map(_) => "map",
        Value::Null => "null",
        _ => "non-bool value",
    }
}

/// Guard evaluation capability used by the walk engine.
///
/// `eval` is the required text path. Implementations that precompile guards
/// advertise the compiled path by overriding `eval_compiled` to return
/// `Some`; the engine probes it first and falls back to `eval`.
pub trait Evaluator: Send + Sync {
    /// Evaluate guard text against a variable map.
    fn eval(&self, cond: &str, vars: &VarMap) -> Result<bool, EvalError>;

    /// Evaluate a precompiled guard. The default implementation declines,
    /// signalling that only the text path is available.
    fn eval_compiled(
        &self,
        guard: &CompiledGuard,
        vars: &VarMap,
    ) -> Option<Result<bool, EvalError>> {
        let _ = (guard, vars);
        None
    }
}

/// The standard evaluator: compiles through the intern table and supports
/// the compiled-evaluation capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct CelEvaluator;

impl Evaluator for CelEvaluator {
    fn eval(&self, cond: &str, vars: &VarMap) -> Result<bool, EvalError> {
        eval(cond, vars)
    }

    fn eval_compiled(
        &self,
        guard: &CompiledGuard,
        vars: &VarMap,
    ) -> Option<Result<bool, EvalError>> {
        Some(run(guard, vars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, serde_json::Value)]) -> VarMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_eval_comparisons_and_logic() {
        let v = vars(&[("age", json!(25)), ("score", json!(720))]);
        assert!(eval("age>=18 && score>700", &v).unwrap());
        assert!(!eval("age<18", &v).unwrap());
    }

    #[test]
    fn test_eval_string_equality() {
        let v = vars(&[("segment", json!("prime"))]);
        assert!(eval(r#"segment=="prime""#, &v).unwrap());
        assert!(!eval(r#"segment=="manual""#, &v).unwrap());
    }

    #[test]
    fn test_eval_parentheses_and_negation() {
        let v = vars(&[("a", json!(true)), ("b", json!(false)), ("c", json!(true))]);
        assert!(eval("a && (b || c)", &v).unwrap());
        assert!(eval("!b", &v).unwrap());
    }

    #[test]
    fn test_eval_empty_guard_is_true() {
        assert!(eval("", &VarMap::new()).unwrap());
        assert!(eval("   ", &VarMap::new()).unwrap());
    }

    #[test]
    fn test_eval_rejects_arithmetic_before_compile() {
        let v = vars(&[("x", json!(1))]);
        assert_eq!(
            eval("x+1==2", &v),
            Err(EvalError::ArithmeticOperator('+'))
        );
    }

    #[test]
    fn test_eval_rejects_function_calls_before_compile() {
        let v = vars(&[("x", json!(1))]);
        assert_eq!(
            eval("len(x)==1", &v),
            Err(EvalError::FunctionCall("len".to_string()))
        );
    }

    #[test]
    fn test_run_reports_missing_variables_sorted() {
        let guard = compile("score>700 && age>=18").unwrap();
        let err = run(&guard, &vars(&[("age", json!(20))])).unwrap_err();
        assert_eq!(err, EvalError::MissingVariables(vec!["score".to_string()]));

        let err = run(&guard, &VarMap::new()).unwrap_err();
        assert_eq!(
            err,
            EvalError::MissingVariables(vec!["age".to_string(), "score".to_string()])
        );
    }

    #[test]
    fn test_run_with_all_variables_never_reports_missing() {
        let guard = compile("age>=18 && score>700").unwrap();
        let v = vars(&[("age", json!(16)), ("score", json!(100))]);
        // evaluates (to false) instead of failing
        assert!(!run(&guard, &v).unwrap());
    }

    #[test]
    fn test_run_rejects_non_bool_result() {
        let guard = compile("age").unwrap();
        let err = run(&guard, &vars(&[("age", json!(25))])).unwrap_err();
        assert_eq!(err, EvalError::NotBool("int".to_string()));
    }

    #[test]
    fn test_compile_interns_by_text() {
        let a = compile("age>=18 && score>700").unwrap();
        let b = compile("  age>=18 && score>700  ").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_compile_extracts_sorted_unique_variables() {
        let guard = compile("score>700 && age>=18 && score<900").unwrap();
        assert_eq!(guard.variables, vec!["age".to_string(), "score".to_string()]);
    }

    #[test]
    fn test_extract_variables_elides_quoted_and_literals() {
        assert_eq!(
            extract_variables(r#"segment=="age" && active==true"#),
            vec!["active".to_string(), "segment".to_string()]
        );
        assert_eq!(
            extract_variables(r#"label=='score'"#),
            vec!["label".to_string()]
        );
    }

    #[test]
    fn test_evaluator_capability_probe() {
        struct TextOnly;
        impl Evaluator for TextOnly {
            fn eval(&self, _cond: &str, _vars: &VarMap) -> Result<bool, EvalError> {
                Ok(true)
            }
        }

        let guard = compile("x>1").unwrap();
        assert!(TextOnly.eval_compiled(&guard, &VarMap::new()).is_none());
        assert!(CelEvaluator.eval_compiled(&guard, &VarMap::new()).is_some());
    }
}
