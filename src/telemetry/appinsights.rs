//! Application Insights client.
//!
//! Features:
//! - Connection string and instrumentation key support
//! - Non-blocking submission through a bounded queue
//! - Background worker batching by size and interval

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use url::Url;

use super::{ExceptionTelemetry, RequestTelemetry, Telemetry};
use crate::error::{ConfigError, TelemetryError};
use crate::metrics;

/// Ingestion endpoint used with a bare instrumentation key.
pub const DEFAULT_INGESTION_ENDPOINT: &str = "https://dc.services.visualstudio.com/";

const SDK_VERSION: &str = concat!("rust:", env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

/// Severity level 3 is `Error`.
const PANIC_SEVERITY: u8 = 3;

/// Where and as whom telemetry is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Instrumentation key (resource GUID).
    pub instrumentation_key: String,
    /// Base URL of the ingestion service.
    pub ingestion_endpoint: String,
}

impl ConnectionSettings {
    /// Settings for a bare instrumentation key.
    pub fn from_instrumentation_key(key: &str) -> Self {
        Self {
            instrumentation_key: key.trim().to_string(),
            ingestion_endpoint: DEFAULT_INGESTION_ENDPOINT.to_string(),
        }
    }

    /// Parse a `Key=Value;Key=Value` connection string.
    pub fn parse(connection_string: &str) -> Result<Self, ConfigError> {
        let mut instrumentation_key = None;
        let mut ingestion_endpoint = None;

        for segment in connection_string.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let Some((name, value)) = segment.split_once('=') else {
                return Err(ConfigError::InvalidConnectionString(format!(
                    "malformed segment {segment:?}"
                )));
            };
            match name.trim().to_ascii_lowercase().as_str() {
                "instrumentationkey" => instrumentation_key = Some(value.trim().to_string()),
                "ingestionendpoint" => ingestion_endpoint = Some(value.trim().to_string()),
                _ => {}
            }
        }

        let instrumentation_key = instrumentation_key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ConfigError::InvalidConnectionString("missing InstrumentationKey".to_string())
            })?;

        let settings = Self {
            instrumentation_key,
            ingestion_endpoint: ingestion_endpoint
                .unwrap_or_else(|| DEFAULT_INGESTION_ENDPOINT.to_string()),
        };
        settings
            .track_url()
            .map_err(|e| ConfigError::InvalidConnectionString(e.to_string()))?;

        Ok(settings)
    }

    /// URL envelopes are posted to.
    pub fn track_url(&self) -> Result<Url, url::ParseError> {
        let mut base = self.ingestion_endpoint.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        Url::parse(&base)?.join("v2/track")
    }
}

/// Batching behaviour of the worker.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Envelopes per ingestion request.
    pub batch_size: usize,
    /// Maximum time an envelope waits in the batch.
    pub flush_interval: Duration,
    /// Queue capacity before envelopes are dropped.
    pub queue_capacity: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 1024,
            flush_interval: Duration::from_secs(10),
            queue_capacity: 8192,
        }
    }
}

/// One Application Insights telemetry item.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    /// `Microsoft.ApplicationInsights.{key}.{kind}`.
    pub name: String,
    /// RFC 3339 timestamp.
    pub time: String,
    /// Instrumentation key.
    #[serde(rename = "iKey")]
    pub instrumentation_key: String,
    /// Context tags.
    pub tags: BTreeMap<&'static str, String>,
    /// Typed payload.
    pub data: EnvelopeData,
}

/// Typed payload of an envelope.
#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeData {
    /// `RequestData` or `ExceptionData`.
    #[serde(rename = "baseType")]
    pub base_type: &'static str,
    /// Payload fields.
    #[serde(rename = "baseData")]
    pub base_data: Value,
}

impl Envelope {
    /// Build a `RequestData` envelope.
    pub fn request(instrumentation_key: &str, request: &RequestTelemetry) -> Self {
        let name = request.name();
        let mut tags = base_tags();
        tags.insert("ai.operation.name", name.clone());
        if let Some(invocation_id) = &request.invocation_id {
            tags.insert("ai.operation.id", invocation_id.clone());
        }

        Self {
            name: envelope_name(instrumentation_key, "Request"),
            time: format_time(request.timestamp),
            instrumentation_key: instrumentation_key.to_string(),
            tags,
            data: EnvelopeData {
                base_type: "RequestData",
                base_data: json!({
                    "ver": 2,
                    "id": next_id(),
                    "name": name,
                    "duration": format_duration(request.duration),
                    "responseCode": request.response_code,
                    "success": request.success(),
                    "url": request.uri,
                }),
            },
        }
    }

    /// Build an `ExceptionData` envelope.
    pub fn exception(instrumentation_key: &str, exception: &ExceptionTelemetry) -> Self {
        let mut properties = serde_json::Map::new();
        if let Some(location) = &exception.location {
            properties.insert("location".to_string(), Value::String(location.clone()));
        }

        Self {
            name: envelope_name(instrumentation_key, "Exception"),
            time: format_time(exception.timestamp),
            instrumentation_key: instrumentation_key.to_string(),
            tags: base_tags(),
            data: EnvelopeData {
                base_type: "ExceptionData",
                base_data: json!({
                    "ver": 2,
                    "exceptions": [{
                        "id": 1,
                        "outerId": 0,
                        "typeName": "panic",
                        "message": exception.message,
                        "hasFullStack": false,
                    }],
                    "severityLevel": PANIC_SEVERITY,
                    "properties": properties,
                }),
            },
        }
    }
}

fn base_tags() -> BTreeMap<&'static str, String> {
    BTreeMap::from([("ai.internal.sdkVersion", SDK_VERSION.to_string())])
}

fn envelope_name(instrumentation_key: &str, kind: &str) -> String {
    format!(
        "Microsoft.ApplicationInsights.{}.{}",
        instrumentation_key.replace('-', ""),
        kind
    )
}

fn format_time(timestamp: OffsetDateTime) -> String {
    timestamp.format(&Rfc3339).unwrap_or_default()
}

/// Format a duration as `[d.]hh:mm:ss.fffffff`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total / 3_600) % 24;
    let minutes = (total / 60) % 60;
    let seconds = total % 60;
    let ticks = duration.subsec_nanos() / 100;

    if days > 0 {
        format!("{days}.{hours:02}:{minutes:02}:{seconds:02}.{ticks:07}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}.{ticks:07}")
    }
}

/// Process-unique telemetry item ID.
fn next_id() -> String {
    static SEED: OnceLock<u64> = OnceLock::new();
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);

    let seed = *SEED.get_or_init(|| OffsetDateTime::now_utc().unix_timestamp_nanos() as u64);
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{seed:016x}.{sequence:08x}")
}

#[derive(Debug)]
enum Message {
    Track(Envelope),
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// Handle that enqueues telemetry for the background worker.
#[derive(Debug, Clone)]
pub struct AppInsightsClient {
    sender: mpsc::Sender<Message>,
    instrumentation_key: String,
}

impl AppInsightsClient {
    /// Spawn the worker and return a client for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        settings: ConnectionSettings,
        options: BatchOptions,
        http: reqwest::Client,
    ) -> Result<(Self, AppInsightsWorker), TelemetryError> {
        let track_url = settings.track_url()?;
        let (sender, receiver) = mpsc::channel(options.queue_capacity.max(1));

        let batcher = Batcher {
            http,
            track_url,
            batch_size: options.batch_size.max(1),
            flush_interval: options.flush_interval.max(Duration::from_millis(1)),
        };
        let handle = tokio::spawn(batcher.run(receiver));

        let client = Self {
            sender,
            instrumentation_key: settings.instrumentation_key,
        };
        let worker = AppInsightsWorker {
            client: client.clone(),
            handle,
        };
        Ok((client, worker))
    }

    /// Send everything queued so far and wait for the attempt to finish.
    pub async fn flush(&self) -> Result<(), TelemetryError> {
        let (ack, done) = oneshot::channel();
        self.sender
            .send(Message::Flush(ack))
            .await
            .map_err(|_| TelemetryError::Closed)?;
        done.await.map_err(|_| TelemetryError::Closed)
    }

    fn enqueue(&self, envelope: Envelope) {
        match self.sender.try_send(Message::Track(envelope)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics::inc_telemetry_dropped();
                warn!("Telemetry queue full, dropping envelope");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Telemetry worker closed, dropping envelope");
            }
        }
    }
}

impl Telemetry for AppInsightsClient {
    fn track_request(&self, request: RequestTelemetry) {
        self.enqueue(Envelope::request(&self.instrumentation_key, &request));
    }

    fn track_exception(&self, exception: ExceptionTelemetry) {
        self.enqueue(Envelope::exception(&self.instrumentation_key, &exception));
    }
}

/// Owner of the background worker task.
#[derive(Debug)]
pub struct AppInsightsWorker {
    client: AppInsightsClient,
    handle: JoinHandle<()>,
}

impl AppInsightsWorker {
    /// Flush pending envelopes and wait for the worker to exit.
    pub async fn shutdown(self) {
        let (ack, done) = oneshot::channel();
        if self.client.sender.send(Message::Close(ack)).await.is_ok() {
            let _ = done.await;
        }
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Telemetry worker ended abnormally");
        }
    }
}

struct Batcher {
    http: reqwest::Client,
    track_url: Url,
    batch_size: usize,
    flush_interval: Duration,
}

impl Batcher {
    async fn run(self, mut receiver: mpsc::Receiver<Message>) {
        let mut batch = Vec::with_capacity(self.batch_size.min(1024));
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                message = receiver.recv() => match message {
                    Some(Message::Track(envelope)) => {
                        batch.push(envelope);
                        if batch.len() >= self.batch_size {
                            self.send(&mut batch).await;
                        }
                    }
                    Some(Message::Flush(ack)) => {
                        self.send(&mut batch).await;
                        let _ = ack.send(());
                    }
                    Some(Message::Close(ack)) => {
                        self.send(&mut batch).await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.send(&mut batch).await;
                        break;
                    }
                },
                _ = ticker.tick() => self.send(&mut batch).await,
            }
        }

        debug!("Telemetry worker stopped");
    }

    async fn send(&self, batch: &mut Vec<Envelope>) {
        if batch.is_empty() {
            return;
        }
        let items = std::mem::take(batch);
        let count = items.len();

        match self.post(&items).await {
            Ok(()) => {
                metrics::record_telemetry_batch(true);
                debug!(count, "Telemetry batch sent");
            }
            Err(e) => {
                metrics::record_telemetry_batch(false);
                warn!(count, error = %e, "Failed to send telemetry batch");
            }
        }
    }

    async fn post(&self, items: &[Envelope]) -> Result<(), TelemetryError> {
        let response = self
            .http
            .post(self.track_url.clone())
            .json(items)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TelemetryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
