//! # Calculation Engine API client
//!
//! A Rust client for the Calculation Engine (CE) HTTP API: submit and
//! manage computation jobs, push and pull input/output files, and watch
//! jobs through to completion.
//!
//! ## Features
//!
//! - **Jobs**: create, list, inspect, flag, and delete remote jobs
//! - **Uploads**: push local files or in-memory datasets, manage and
//!   download them by identifier
//! - **Pagination**: list endpoints transparently follow the server's
//!   `next` links and return one ordered sequence
//! - **Rate limiting**: 429 responses are absorbed by a fixed-delay
//!   resend loop sized from the configured requests-per-second budget
//! - **Monitoring**: poll a job until it settles, then download its
//!   output manifest
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use ce_client::{api::ApiClient, config::ApiConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ApiConfig::from_env().with_authority("ce.example.com:4000");
//! let client = ApiClient::new(config)?;
//!
//! let job = client.create_job("", "smoke test", serde_json::json!({}))?;
//! println!("submitted job {}", job.uuid);
//! # Ok(())
//! # }
//! ```

/// API client, resource models, and error types
pub mod api;

/// Immutable client configuration sourced from the environment
pub mod config;

/// Shared request-failure type carrying URL, status, and body
pub mod errors;

/// Job polling and bulk-download helpers
pub mod monitor;
