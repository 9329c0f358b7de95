//! Request handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use polygraph_core::{ExecutionTrace, PolicyInfo};

use crate::api::dto::{ErrorBody, HealthResponse, InferRequest, InferResponse};
use crate::api::routes::AppState;

/// Handler for `POST /infer`.
///
/// Runs one inference. `debug=true` additionally captures the execution
/// trace; core-side failures come back as 400 with the error body,
/// including the trace (when the walk failed) and the policy info (when a
/// `policy_id` was supplied).
pub async fn infer(
    State(state): State<AppState>,
    payload: Result<Json<InferRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return error_response("invalid json", rejection.body_text(), None, None);
        }
    };

    let options = request.options();
    let outcome = if request.debug {
        state
            .service
            .infer_with_trace_and_options(&request.policy_dot, request.input.as_ref(), &options)
            .await
    } else {
        state
            .service
            .infer_with_options(&request.policy_dot, request.input.as_ref(), &options)
            .await
    };

    match outcome {
        Ok(inference) => (
            StatusCode::OK,
            Json(InferResponse {
                output: inference.output,
                trace: inference.trace,
                policy: inference.policy,
            }),
        )
            .into_response(),
        Err(failure) => {
            tracing::debug!(error = %failure.error, "inference failed");
            error_response(
                "infer failed",
                failure.error.to_string(),
                failure.trace,
                failure.policy,
            )
        }
    }
}

/// Handler for `GET /health`.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

fn error_response(
    error: &str,
    details: impl Into<String>,
    trace: Option<ExecutionTrace>,
    policy: Option<PolicyInfo>,
) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: error.to_string(),
            details: details.into(),
            trace,
            policy,
        }),
    )
        .into_response()
}
