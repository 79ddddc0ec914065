//! HTTP handlers for the custom handler route.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use super::envelope::{
    DocumentOutput, HttpResponseBinding, InvokeRequest, InvokeResponse, INVOCATION_ID_HEADER,
};
use super::variant::HandlerVariant;
use crate::config::Config;
use crate::error::EnvelopeError;
use crate::metrics;
use crate::telemetry::SharedTelemetry;

/// Message returned when no name is supplied.
pub const DEFAULT_MESSAGE: &str = "This HTTP triggered function executed successfully. Pass a name in the query string for a personalized response.\n";

/// `ReturnValue` of the `envelope` variant.
pub const ENVELOPE_RETURN_VALUE: &str = "HelloWorld";

/// `ReturnValue` of the `envelope-integer` variant.
pub const INTEGER_RETURN_VALUE: i64 = 100;

/// `ReturnValue` of the `document` variant.
pub const DOCUMENT_RETURN_VALUE: &str = "Document forwarded to output binding";

/// Application state shared with handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Function implemented by this process.
    pub variant: HandlerVariant,
    /// Route the handler is mounted on.
    pub route: Arc<str>,
    /// Telemetry sink.
    pub telemetry: SharedTelemetry,
    /// Report the real status instead of the fixed "200".
    pub report_actual_status: bool,
}

impl AppState {
    /// Create new app state.
    pub fn new(variant: HandlerVariant, route: &str, telemetry: SharedTelemetry) -> Self {
        Self {
            variant,
            route: Arc::from(route),
            telemetry,
            report_actual_status: false,
        }
    }

    /// Create app state from configuration.
    pub fn from_config(config: &Config, telemetry: SharedTelemetry) -> Self {
        Self::new(config.handler_variant, config.route(), telemetry)
            .with_actual_status(config.telemetry_report_actual_status)
    }

    /// Set whether telemetry reports the real status.
    pub fn with_actual_status(mut self, report_actual_status: bool) -> Self {
        self.report_actual_status = report_actual_status;
        self
    }
}

/// Greeting for `name`, or the default sentence when it is missing or empty.
pub fn greeting(name: Option<&str>) -> String {
    match name.filter(|name| !name.is_empty()) {
        Some(name) => {
            format!("Hello, {name}. This HTTP triggered function executed successfully.\n")
        }
        None => DEFAULT_MESSAGE.to_string(),
    }
}

/// First `name` query parameter, decoded.
pub fn query_name(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "name")
        .map(|(_, value)| value.into_owned())
}

/// Plain-text greeting handler.
pub async fn text_greeting(uri: Uri) -> String {
    greeting(query_name(&uri).as_deref())
}

/// Envelope handler: answers with a serialized `InvokeResponse`.
pub async fn invoke(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let encoded = build_response(state.variant, &uri, &headers, &body)
        .and_then(|response| response.encode().map_err(EnvelopeError::Encode));

    match encoded {
        Ok(bytes) => ([(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for EnvelopeError {
    fn into_response(self) -> Response {
        let status = match self {
            EnvelopeError::Decode(_) | EnvelopeError::EmptyBody => {
                metrics::inc_envelope_decode_failures();
                StatusCode::BAD_REQUEST
            }
            EnvelopeError::Encode(_) => {
                metrics::inc_envelope_encode_failures();
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        warn!(status = status.as_u16(), error = %self, "Envelope request failed");
        (status, self.to_string()).into_response()
    }
}

fn decode_request(variant: HandlerVariant, body: &[u8]) -> Result<InvokeRequest, EnvelopeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return if variant.accepts_empty_body() {
            Ok(InvokeRequest::default())
        } else {
            Err(EnvelopeError::EmptyBody)
        };
    }
    InvokeRequest::decode(body).map_err(EnvelopeError::Decode)
}

/// Build the `InvokeResponse` for one request.
///
/// Plain-text variants are never routed here; they get the `envelope` shape.
pub fn build_response(
    variant: HandlerVariant,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<InvokeResponse, EnvelopeError> {
    let request = decode_request(variant, body)?;

    let name = query_name(uri)
        .filter(|name| !name.is_empty())
        .or_else(|| request.query_param("name").map(str::to_string));
    let message = greeting(name.as_deref());
    debug!(%variant, named = name.is_some(), "Building invocation response");

    let res = HttpResponseBinding::text(StatusCode::OK.as_u16(), message.as_str());
    let mut response = match variant {
        HandlerVariant::EnvelopeInteger => {
            let mut response = InvokeResponse::new(INTEGER_RETURN_VALUE);
            response
                .insert_output("output1", &message)
                .map_err(EnvelopeError::Encode)?;
            response
        }
        HandlerVariant::Document => {
            let invocation_id = headers
                .get(INVOCATION_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default();
            let document = DocumentOutput {
                data: request.data,
                azure_functions_invocation_id: invocation_id.to_string(),
            };
            let mut response = InvokeResponse::new(DOCUMENT_RETURN_VALUE);
            response
                .insert_output("document", &document)
                .map_err(EnvelopeError::Encode)?;
            response
        }
        HandlerVariant::Envelope | HandlerVariant::Text | HandlerVariant::TextWithDatabase => {
            let mut response = InvokeResponse::new(ENVELOPE_RETURN_VALUE);
            response
                .insert_output("message", &message)
                .map_err(EnvelopeError::Encode)?;
            response
                .insert_output("object", &json!({ "greeting": "hello", "count": 1 }))
                .map_err(EnvelopeError::Encode)?;
            response
        }
    };
    response
        .insert_output("res", &res)
        .map_err(EnvelopeError::Encode)?;

    Ok(response)
}
