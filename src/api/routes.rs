//! HTTP API route definitions.

use std::any::Any;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, MethodRouter},
    Router,
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::error;

use super::envelope::INVOCATION_ID_HEADER;
use super::handlers::{invoke, text_greeting, AppState};
use super::variant::Mode;
use crate::metrics;
use crate::telemetry::{panic_message, RequestTelemetry, FIXED_RESPONSE_CODE};

/// Create the API router for the configured variant.
pub fn create_router(state: AppState) -> Router {
    let handler = match state.variant.mode() {
        Mode::PlainText => any(text_greeting),
        Mode::Envelope => any(invoke),
    };
    mount(state, handler)
}

/// Mount `handler` on the state's route behind the panic boundary and the
/// telemetry recorder. Other paths fall through to the default 404.
pub fn mount(state: AppState, handler: MethodRouter<AppState>) -> Router {
    let route = state.route.clone();
    Router::new()
        .route(&route, handler)
        .route_layer(CatchPanicLayer::custom(handle_panic))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Record one telemetry request per handled request, whatever its outcome.
async fn track_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let uri = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let invocation_id = request
        .headers()
        .get(INVOCATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let response = next.run(request).await;

    let status = response.status();
    metrics::record_http_request(start, &state.route, &method, status.as_u16());

    let response_code = if state.report_actual_status {
        status.as_u16().to_string()
    } else {
        FIXED_RESPONSE_CODE.to_string()
    };
    state.telemetry.track_request(
        RequestTelemetry::new(method, uri, start.elapsed(), response_code)
            .with_invocation_id(invocation_id),
    );

    response
}

/// Answer a panicking request with 500; the listener keeps serving.
fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    metrics::inc_handler_panics();
    error!(panic = %panic_message(payload.as_ref()), "Request handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
}
