//! Azure Functions custom handler.
//!
//! The Functions host forwards each trigger invocation to this process over
//! HTTP. The handler answers either with plain text (forwarded HTTP requests)
//! or with an invocation envelope the host routes to output bindings:
//!
//! ```text
//! host ── POST /HttpExample {"Data": {...}, "Metadata": {...}} ──▶ handler
//! host ◀── {"Outputs": {"res": {...}}, "Logs": [...], "ReturnValue": ...} ──
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`api`]: Handler variants, invocation envelope and router
//! - [`cosmos`]: Cosmos DB database bootstrap
//! - [`telemetry`]: Request/exception telemetry and Application Insights
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Utility functions

pub mod api;
pub mod config;
pub mod cosmos;
pub mod error;
pub mod metrics;
pub mod telemetry;
pub mod utils;

pub use config::Config;
pub use error::{HandlerError, Result};
