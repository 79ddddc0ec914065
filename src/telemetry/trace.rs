//! Log-only telemetry sink.

use tracing::{error, info};

use super::{ExceptionTelemetry, RequestTelemetry, Telemetry};

/// Writes telemetry as `tracing` events under the `telemetry` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceTelemetry;

impl Telemetry for TraceTelemetry {
    fn track_request(&self, request: RequestTelemetry) {
        info!(
            target: "telemetry",
            method = %request.method,
            uri = %request.uri,
            duration_ms = request.duration.as_secs_f64() * 1000.0,
            response_code = %request.response_code,
            invocation_id = request.invocation_id.as_deref().unwrap_or(""),
            "request"
        );
    }

    fn track_exception(&self, exception: ExceptionTelemetry) {
        error!(
            target: "telemetry",
            message = %exception.message,
            location = exception.location.as_deref().unwrap_or("unknown"),
            "exception"
        );
    }
}
