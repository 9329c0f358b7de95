//! Wire-level request and response bodies.

use polygraph_core::{ExecutionTrace, InferOptions, PolicyInfo, VarMap};
use serde::{Deserialize, Serialize};

/// `POST /infer` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct InferRequest {
    /// Policy text; required and non-empty.
    pub policy_dot: String,
    /// Input variables. Absent is equivalent to an empty object.
    #[serde(default)]
    pub input: Option<VarMap>,
    /// Optional policy identification (must come with `policy_version`).
    #[serde(default)]
    pub policy_id: String,
    /// Optional policy version (must come with `policy_id`).
    #[serde(default)]
    pub policy_version: String,
    /// When true the response carries the execution trace.
    #[serde(default)]
    pub debug: bool,
}

impl InferRequest {
    /// Options for the inference service.
    pub fn options(&self) -> InferOptions {
        InferOptions {
            policy_id: self.policy_id.clone(),
            policy_version: self.policy_version.clone(),
        }
    }
}

/// Successful `POST /infer` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferResponse {
    pub output: VarMap,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trace: Option<ExecutionTrace>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub policy: Option<PolicyInfo>,
}

/// Error body used for every 4xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trace: Option<ExecutionTrace>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub policy: Option<PolicyInfo>,
}

/// `GET /health` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
