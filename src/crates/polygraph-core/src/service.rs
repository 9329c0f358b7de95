//! Inference service façade
//!
//! [`InferenceService`] is what transports call: it validates options, keys
//! the policy cache, clones the caller's input and runs the engine over the
//! clone. The input map is never mutated.
//!
//! Failures come back as [`InferFailure`] rather than a bare error so a
//! transport can render the full error body: when the walk itself failed the
//! captured trace is attached, and when a `policy_id` was supplied the
//! [`PolicyInfo`] rides along on both success and failure.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{sha256_hex, PolicyCache};
use crate::compiler::Compiler;
use crate::engine::Engine;
use crate::error::PolicyError;
use crate::model::VarMap;
use crate::trace::ExecutionTrace;

/// Optional identification of the policy being inferred.
///
/// Both fields must be supplied together. When present, the cache key
/// becomes `"{id}:{version}:{hash}"` so the same text can be versioned
/// independently, and responses carry a [`PolicyInfo`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferOptions {
    pub policy_id: String,
    pub policy_version: String,
}

impl InferOptions {
    fn validate(&self) -> Result<(), PolicyError> {
        if self.policy_id.is_empty() != self.policy_version.is_empty() {
            return Err(PolicyError::OptionsMismatch);
        }
        Ok(())
    }
}

/// Identity of the policy an inference ran against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInfo {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
    /// Lowercase hex SHA-256 of the policy text.
    pub hash: String,
}

/// Successful inference: the augmented variable map plus optional trace and
/// policy identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub output: VarMap,
    pub trace: Option<ExecutionTrace>,
    pub policy: Option<PolicyInfo>,
}

/// Failed inference. `trace` is present when the walk itself failed and a
/// trace was requested; `policy` whenever a `policy_id` was supplied.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct InferFailure {
    #[source]
    pub error: PolicyError,
    pub trace: Option<ExecutionTrace>,
    pub policy: Option<PolicyInfo>,
}

impl InferFailure {
    fn bare(error: PolicyError) -> Self {
        Self {
            error,
            trace: None,
            policy: None,
        }
    }
}

/// The decision core behind a transport: compiler + engine + cache.
pub struct InferenceService {
    compiler: Compiler,
    engine: Engine,
    cache: Arc<PolicyCache>,
}

impl InferenceService {
    pub fn new(compiler: Compiler, engine: Engine, cache: Arc<PolicyCache>) -> Self {
        Self {
            compiler,
            engine,
            cache,
        }
    }

    /// Compile (cached) and walk, returning the augmented variable map.
    /// `None` input is equivalent to an empty map.
    pub async fn infer(
        &self,
        policy_dot: &str,
        input: Option<&VarMap>,
    ) -> Result<VarMap, PolicyError> {
        self.infer_with_options(policy_dot, input, &InferOptions::default())
            .await
            .map(|inference| inference.output)
            .map_err(|failure| failure.error)
    }

    /// [`infer`](Self::infer) with policy identification.
    pub async fn infer_with_options(
        &self,
        policy_dot: &str,
        input: Option<&VarMap>,
        options: &InferOptions,
    ) -> Result<Inference, InferFailure> {
        self.run_inference(policy_dot, input, options, false).await
    }

    /// Like [`infer_with_options`](Self::infer_with_options) but capturing
    /// an execution trace; the trace is attached even when the walk fails.
    pub async fn infer_with_trace_and_options(
        &self,
        policy_dot: &str,
        input: Option<&VarMap>,
        options: &InferOptions,
    ) -> Result<Inference, InferFailure> {
        self.run_inference(policy_dot, input, options, true).await
    }

    async fn run_inference(
        &self,
        policy_dot: &str,
        input: Option<&VarMap>,
        options: &InferOptions,
        with_trace: bool,
    ) -> Result<Inference, InferFailure> {
        if policy_dot.is_empty() {
            return Err(InferFailure::bare(PolicyError::EmptyPolicy));
        }
        options.validate().map_err(InferFailure::bare)?;

        let hash = sha256_hex(policy_dot);
        let info = if options.policy_id.is_empty() {
            None
        } else {
            Some(PolicyInfo {
                id: Some(options.policy_id.clone()),
                version: Some(options.policy_version.clone()),
                hash: hash.clone(),
            })
        };

        let key_text = if options.policy_id.is_empty() {
            policy_dot.to_string()
        } else {
            format!("{}:{}:{}", options.policy_id, options.policy_version, hash)
        };

        let policy = self
            .cache
            .get_or_compute(&key_text, || self.compiler.compile(policy_dot))
            .await
            .map_err(|error| InferFailure {
                error,
                trace: None,
                policy: info.clone(),
            })?;

        let mut output = input.cloned().unwrap_or_default();

        if with_trace {
            let (trace, result) = self.engine.run_with_trace(&policy, &mut output);
            match result {
                Ok(()) => Ok(Inference {
                    output,
                    trace: Some(trace),
                    policy: info,
                }),
                Err(error) => Err(InferFailure {
                    error,
                    trace: Some(trace),
                    policy: info,
                }),
            }
        } else {
            match self.engine.run(&policy, &mut output) {
                Ok(()) => Ok(Inference {
                    output,
                    trace: None,
                    policy: info,
                }),
                Err(error) => Err(InferFailure {
                    error,
                    trace: None,
                    policy: info,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::CelEvaluator;
    use crate::trace::Termination;
    use serde_json::json;

    const CREDIT_POLICY: &str = r#"digraph Policy {
        start    [result=""]
        approved [result="approved=true,segment=prime"]
        rejected [result="approved=false"]
        start -> approved [cond="age>=18 && score>700"]
        start -> rejected [cond="age<18"]
    }"#;

    fn service() -> InferenceService {
        InferenceService::new(
            Compiler::new(),
            Engine::new(Arc::new(CelEvaluator)),
            Arc::new(PolicyCache::new(16)),
        )
    }

    fn input(pairs: &[(&str, serde_json::Value)]) -> VarMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_infer_does_not_mutate_input() {
        let svc = service();
        let original = input(&[("age", json!(25)), ("score", json!(720))]);

        let output = svc.infer(CREDIT_POLICY, Some(&original)).await.unwrap();

        assert_eq!(original.len(), 2);
        assert!(!original.contains_key("approved"));
        assert_eq!(output["approved"], json!(true));
        assert_eq!(output["segment"], json!("prime"));
    }

    #[tokio::test]
    async fn test_infer_requires_policy_text() {
        let err = service().infer("", None).await.unwrap_err();
        assert_eq!(err, PolicyError::EmptyPolicy);
    }

    #[tokio::test]
    async fn test_infer_absent_input_is_empty_map() {
        let svc = service();
        // rejected path needs age; with no input every guard reports
        // missing vars
        let failure = svc
            .infer_with_trace_and_options(CREDIT_POLICY, None, &InferOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, PolicyError::NoEdgeMatched { .. }));
        let trace = failure.trace.expect("trace present on walk failure");
        assert_eq!(
            trace.terminated,
            Termination::ErrorNoEdgeMatchedMissingVars
        );
    }

    #[tokio::test]
    async fn test_options_must_come_together() {
        let svc = service();
        let options = InferOptions {
            policy_id: "credit".to_string(),
            policy_version: String::new(),
        };
        let failure = svc
            .infer_with_options(CREDIT_POLICY, None, &options)
            .await
            .unwrap_err();
        assert_eq!(failure.error, PolicyError::OptionsMismatch);
        assert_eq!(
            failure.error.to_string(),
            "policy_id and policy_version must be provided together"
        );
    }

    #[tokio::test]
    async fn test_policy_info_present_only_with_id() {
        let svc = service();
        let vars = input(&[("age", json!(25)), ("score", json!(720))]);

        let anonymous = svc
            .infer_with_options(CREDIT_POLICY, Some(&vars), &InferOptions::default())
            .await
            .unwrap();
        assert!(anonymous.policy.is_none());

        let options = InferOptions {
            policy_id: "credit".to_string(),
            policy_version: "v1".to_string(),
        };
        let identified = svc
            .infer_with_options(CREDIT_POLICY, Some(&vars), &options)
            .await
            .unwrap();
        let info = identified.policy.unwrap();
        assert_eq!(info.id.as_deref(), Some("credit"));
        assert_eq!(info.version.as_deref(), Some("v1"));
        assert_eq!(info.hash, sha256_hex(CREDIT_POLICY));
    }

    #[tokio::test]
    async fn test_compile_failure_carries_policy_info() {
        let svc = service();
        let options = InferOptions {
            policy_id: "cyclic".to_string(),
            policy_version: "v1".to_string(),
        };
        let failure = svc
            .infer_with_options("digraph { a -> b; b -> a }", None, &options)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, PolicyError::Cycle { .. }));
        assert!(failure.policy.is_some());
        assert!(failure.trace.is_none());
    }

    #[tokio::test]
    async fn test_repeated_inference_is_deterministic() {
        let svc = service();
        let vars = input(&[("age", json!(25)), ("score", json!(720))]);

        let first = svc.infer(CREDIT_POLICY, Some(&vars)).await.unwrap();
        let second = svc.infer(CREDIT_POLICY, Some(&vars)).await.unwrap();
        assert_eq!(first, second);
    }
}
