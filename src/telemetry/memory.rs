//! In-memory telemetry sink for unit testing.
//!
//! Records are kept in shared vectors so a clone handed to the router can be
//! inspected by the test afterwards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ExceptionTelemetry, RequestTelemetry, Telemetry};

/// Telemetry sink that keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingTelemetry {
    requests: Arc<Mutex<Vec<RequestTelemetry>>>,
    exceptions: Arc<Mutex<Vec<ExceptionTelemetry>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RecordingTelemetry {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded requests.
    pub fn requests(&self) -> Vec<RequestTelemetry> {
        lock(&self.requests).clone()
    }

    /// Snapshot of recorded exceptions.
    pub fn exceptions(&self) -> Vec<ExceptionTelemetry> {
        lock(&self.exceptions).clone()
    }

    /// Clear all records.
    pub fn clear(&self) {
        lock(&self.requests).clear();
        lock(&self.exceptions).clear();
    }
}

impl Telemetry for RecordingTelemetry {
    fn track_request(&self, request: RequestTelemetry) {
        lock(&self.requests).push(request);
    }

    fn track_exception(&self, exception: ExceptionTelemetry) {
        lock(&self.exceptions).push(exception);
    }
}
