//! HTTP transport for the polygraph policy inference engine
//!
//! Thin glue over [`polygraph_core::InferenceService`]: JSON DTOs matching
//! the wire contract, an axum router with `POST /infer` and `GET /health`,
//! and environment-variable runtime configuration. All core-side failures
//! (parse errors, invalid guards, cycles, missing input variables, step
//! bounds) map to HTTP 400 with an `{ "error", "details", … }` body.

pub mod api;
pub mod config;
