//! Core primitives for stamping a process-wide feature label onto proxied LLM calls.
//!
//! The crate is runtime-agnostic: storage backends, the HTTP client and the web
//! server live in adapter crates such as `labelgate-adapter-axum`.

pub mod endpoints;
pub mod error;
pub mod hook;
pub mod http;
pub mod label;
pub mod manifest;
pub mod proxy;
