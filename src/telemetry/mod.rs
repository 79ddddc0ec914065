//! Request and exception telemetry.
//!
//! This module handles:
//! - Telemetry record types and the [`Telemetry`] sink trait
//! - Application Insights delivery (batched, background worker)
//! - Log-only and in-memory sinks
//! - Process-wide panic reporting

pub mod appinsights;
pub mod memory;
pub mod trace;

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::info;

use crate::config::Config;
use crate::Result;

pub use appinsights::{AppInsightsClient, AppInsightsWorker, BatchOptions, ConnectionSettings};
pub use memory::RecordingTelemetry;
pub use trace::TraceTelemetry;

/// Status label reported when actual status reporting is off.
pub const FIXED_RESPONSE_CODE: &str = "200";

/// One handled request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTelemetry {
    /// HTTP method.
    pub method: String,
    /// Request URI as received (path and query).
    pub uri: String,
    /// Wall-clock time spent in the handler.
    pub duration: Duration,
    /// Reported status label.
    pub response_code: String,
    /// Host invocation ID, when the host sent one.
    pub invocation_id: Option<String>,
    /// When the request started.
    pub timestamp: OffsetDateTime,
}

impl RequestTelemetry {
    /// Create a request record stamped with the current time minus `duration`.
    pub fn new(
        method: impl Into<String>,
        uri: impl Into<String>,
        duration: Duration,
        response_code: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            duration,
            response_code: response_code.into(),
            invocation_id: None,
            timestamp: OffsetDateTime::now_utc() - duration,
        }
    }

    /// Attach the host invocation ID.
    pub fn with_invocation_id(mut self, invocation_id: Option<String>) -> Self {
        self.invocation_id = invocation_id;
        self
    }

    /// Operation name, `METHOD /path`.
    pub fn name(&self) -> String {
        let path = self.uri.split('?').next().unwrap_or_default();
        format!("{} {}", self.method, path)
    }

    /// Whether the status label denotes success.
    pub fn success(&self) -> bool {
        self.response_code
            .parse::<u16>()
            .map(|code| code < 400)
            .unwrap_or(false)
    }
}

/// One captured panic.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionTelemetry {
    /// Panic message.
    pub message: String,
    /// Source location, `file:line:column`.
    pub location: Option<String>,
    /// When the panic was captured.
    pub timestamp: OffsetDateTime,
}

impl ExceptionTelemetry {
    /// Create an exception record stamped with the current time.
    pub fn new(message: impl Into<String>, location: Option<String>) -> Self {
        Self {
            message: message.into(),
            location,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Sink for request and exception telemetry.
///
/// Calls must not block: they run on request tasks and inside the panic hook.
pub trait Telemetry: Send + Sync + fmt::Debug {
    /// Record one handled request.
    fn track_request(&self, request: RequestTelemetry);

    /// Record one captured panic.
    fn track_exception(&self, exception: ExceptionTelemetry);
}

/// Shared telemetry handle injected into handlers.
pub type SharedTelemetry = Arc<dyn Telemetry>;

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Report every panic to telemetry before the previous hook runs.
pub fn install_panic_hook(telemetry: SharedTelemetry) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
        telemetry.track_exception(ExceptionTelemetry::new(
            panic_message(info.payload()),
            location,
        ));
        previous(info);
    }));
}

/// Telemetry sink chosen from configuration, plus its worker if any.
#[derive(Debug)]
pub struct TelemetryPipeline {
    telemetry: SharedTelemetry,
    worker: Option<AppInsightsWorker>,
}

impl TelemetryPipeline {
    /// Build the sink: Application Insights when a key is configured,
    /// otherwise log-only.
    pub fn from_config(config: &Config, http: reqwest::Client) -> Result<Self> {
        let Some(settings) = config.ingestion_settings()? else {
            info!("No Application Insights key configured, telemetry goes to the log");
            return Ok(Self::with_sink(Arc::new(TraceTelemetry)));
        };

        info!(endpoint = %settings.ingestion_endpoint, "Sending telemetry to Application Insights");
        let options = BatchOptions {
            batch_size: config.telemetry_batch_size,
            flush_interval: Duration::from_millis(config.telemetry_flush_interval_ms),
            queue_capacity: config.telemetry_queue_capacity,
        };
        let (client, worker) = AppInsightsClient::start(settings, options, http)?;

        Ok(Self {
            telemetry: Arc::new(client),
            worker: Some(worker),
        })
    }

    /// Wrap a sink that needs no background worker.
    pub fn with_sink(telemetry: SharedTelemetry) -> Self {
        Self {
            telemetry,
            worker: None,
        }
    }

    /// Shared handle to the sink.
    pub fn telemetry(&self) -> SharedTelemetry {
        Arc::clone(&self.telemetry)
    }

    /// Flush buffered telemetry and stop the worker.
    pub async fn shutdown(self) {
        if let Some(worker) = self.worker {
            worker.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_name_strips_query() {
        let request = RequestTelemetry::new(
            "GET",
            "/api/HttpExample?name=World",
            Duration::from_millis(3),
            "200",
        );
        assert_eq!(request.name(), "GET /api/HttpExample");
        assert!(request.success());
    }

    #[test]
    fn request_success_follows_status_label() {
        let failed = RequestTelemetry::new("POST", "/HttpExample", Duration::ZERO, "500");
        assert!(!failed.success());

        let unparsable = RequestTelemetry::new("POST", "/HttpExample", Duration::ZERO, "ok");
        assert!(!unparsable.success());
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(literal.as_ref()), "boom");

        let owned: Box<dyn Any + Send> = Box::new(format!("code {}", 7));
        assert_eq!(panic_message(owned.as_ref()), "code 7");

        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(other.as_ref()), "panic with non-string payload");
    }

    #[tokio::test]
    async fn pipeline_without_key_logs_only() {
        let config = Config::from_vars(Vec::new()).unwrap();
        let pipeline = TelemetryPipeline::from_config(&config, reqwest::Client::new()).unwrap();

        pipeline.telemetry().track_request(RequestTelemetry::new(
            "GET",
            "/api/HttpExample",
            Duration::ZERO,
            FIXED_RESPONSE_CODE,
        ));
        pipeline.shutdown().await;
    }
}
