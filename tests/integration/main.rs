//! End-to-end tests for the custom handler.
//!
//! Every test binds real listeners on ephemeral ports. Small axum servers
//! stand in for Cosmos DB, the managed identity endpoint and the
//! Application Insights ingestion endpoint.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use funcs_handler::api::{create_router, AppState, HandlerVariant};
use funcs_handler::config::Config;
use funcs_handler::cosmos::{self, EnsureOutcome};
use funcs_handler::telemetry::{
    AppInsightsClient, BatchOptions, ConnectionSettings, RecordingTelemetry, RequestTelemetry,
    Telemetry,
};

const GREETING_WORLD: &str = "Hello, World. This HTTP triggered function executed successfully.\n";
const DEFAULT_SENTENCE: &str = "This HTTP triggered function executed successfully. Pass a name in the query string for a personalized response.\n";

async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn spawn_handler(variant: HandlerVariant) -> (SocketAddr, RecordingTelemetry) {
    let telemetry = RecordingTelemetry::new();
    let state = AppState::new(variant, variant.default_route(), Arc::new(telemetry.clone()));
    (spawn(create_router(state)).await, telemetry)
}

fn env_config(pairs: Vec<(&str, String)>) -> Config {
    Config::from_vars(pairs.into_iter().map(|(k, v)| (k.to_string(), v))).unwrap()
}

// === Handler ===

#[tokio::test]
async fn text_variant_over_tcp() {
    let (addr, telemetry) = spawn_handler(HandlerVariant::Text).await;

    let response = reqwest::get(format!("http://{addr}/api/HttpExample?name=World"))
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), GREETING_WORLD);

    let requests = telemetry.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].uri, "/api/HttpExample?name=World");
}

#[tokio::test]
async fn integer_variant_over_tcp() {
    let (addr, _) = spawn_handler(HandlerVariant::EnvelopeInteger).await;

    let response = reqwest::get(format!("http://{addr}/HttpExample")).await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ReturnValue"], json!(100));
    assert_eq!(body["Outputs"]["output1"], json!(DEFAULT_SENTENCE));
}

#[tokio::test]
async fn document_variant_over_tcp() {
    let (addr, _) = spawn_handler(HandlerVariant::Document).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/HttpExample"))
        .header("X-Azure-Functions-InvocationId", "id-123")
        .json(&json!({"Data": {"a": 1}, "Metadata": {}}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["Outputs"]["document"],
        json!({"data": {"a": 1}, "azureFunctionsInvocationId": "id-123"})
    );
    assert_eq!(body["Logs"], json!(["test log1", "test log2"]));

    let response = client
        .post(format!("http://{addr}/HttpExample"))
        .body("{\"Data\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(!response.text().await.unwrap().is_empty());
}

// === Cosmos DB ===

#[derive(Clone, Default)]
struct FakeCosmos {
    existing: Arc<Mutex<HashSet<String>>>,
    requests: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
    token_forms: Arc<Mutex<Vec<(String, HashMap<String, String>)>>>,
    fail: bool,
}

async fn create_database(
    State(fake): State<FakeCosmos>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    fake.requests.lock().unwrap().push((headers, body.clone()));
    if fake.fail {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    let id = body["id"].as_str().unwrap_or_default().to_string();
    if fake.existing.lock().unwrap().insert(id) {
        StatusCode::CREATED
    } else {
        StatusCode::CONFLICT
    }
}

async fn token(headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Response {
    if headers.get("x-identity-header").and_then(|v| v.to_str().ok()) != Some("secret") {
        return (StatusCode::UNAUTHORIZED, "missing identity header").into_response();
    }
    Json(json!({
        "access_token": "mi-token",
        "expires_on": "1700000000",
        "resource": query.get("resource"),
        "token_type": "Bearer",
    }))
    .into_response()
}

async fn client_credentials_token(
    State(fake): State<FakeCosmos>,
    Path(tenant): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    fake.token_forms
        .lock()
        .unwrap()
        .push((tenant, form.clone()));
    if form.get("client_secret").map(String::as_str) != Some("shh") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_client"})),
        )
            .into_response();
    }
    Json(json!({
        "token_type": "Bearer",
        "expires_in": 3599,
        "access_token": "sp-token",
    }))
    .into_response()
}

fn fake_cosmos_router(fake: FakeCosmos) -> Router {
    Router::new()
        .route("/dbs", post(create_database))
        .route("/msi/token", get(token))
        .route("/:tenant/oauth2/v2.0/token", post(client_credentials_token))
        .with_state(fake)
}

#[tokio::test]
async fn ensure_database_is_idempotent() {
    let fake = FakeCosmos::default();
    let addr = spawn(fake_cosmos_router(fake.clone())).await;
    let config = env_config(vec![
        ("HANDLER_VARIANT", "text-with-database".to_string()),
        ("COSMOS_ENDPOINT", format!("http://{addr}/")),
        ("COSMOS_ACCESS_TOKEN", "tok".to_string()),
    ]);
    config.validate().unwrap();

    let first = cosmos::ensure_database(&config, reqwest::Client::new())
        .await
        .unwrap();
    let second = cosmos::ensure_database(&config, reqwest::Client::new())
        .await
        .unwrap();

    assert_eq!(first, EnsureOutcome::Created);
    assert_eq!(second, EnsureOutcome::AlreadyExists);

    let requests = fake.requests.lock().unwrap();
    let (headers, body) = &requests[0];
    assert_eq!(body, &json!({"id": "myfirstdatabase"}));
    assert_eq!(
        headers["authorization"].to_str().unwrap(),
        "type%3Daad%26ver%3D1.0%26sig%3Dtok"
    );
    assert_eq!(headers["x-ms-version"].to_str().unwrap(), "2018-12-31");
    assert!(headers["x-ms-date"].to_str().unwrap().ends_with(" GMT"));
}

#[tokio::test]
async fn ensure_database_uses_managed_identity() {
    let fake = FakeCosmos::default();
    let addr = spawn(fake_cosmos_router(fake.clone())).await;
    let config = env_config(vec![
        ("HANDLER_VARIANT", "text-with-database".to_string()),
        ("COSMOS_ENDPOINT", format!("http://{addr}")),
        ("COSMOS_DATABASE", "orders".to_string()),
        ("IDENTITY_ENDPOINT", format!("http://{addr}/msi/token")),
        ("IDENTITY_HEADER", "secret".to_string()),
    ]);

    let outcome = cosmos::ensure_database(&config, reqwest::Client::new())
        .await
        .unwrap();

    assert_eq!(outcome, EnsureOutcome::Created);
    let requests = fake.requests.lock().unwrap();
    assert_eq!(requests[0].1, json!({"id": "orders"}));
    assert_eq!(
        requests[0].0["authorization"].to_str().unwrap(),
        "type%3Daad%26ver%3D1.0%26sig%3Dmi-token"
    );
}

#[tokio::test]
async fn ensure_database_uses_service_principal_secret() {
    let fake = FakeCosmos::default();
    let addr = spawn(fake_cosmos_router(fake.clone())).await;
    let config = env_config(vec![
        ("HANDLER_VARIANT", "text-with-database".to_string()),
        ("COSMOS_ENDPOINT", format!("http://{addr}/")),
        ("AZURE_TENANT_ID", "contoso".to_string()),
        ("AZURE_CLIENT_ID", "cid".to_string()),
        ("AZURE_CLIENT_SECRET", "shh".to_string()),
        ("AZURE_AUTHORITY_HOST", format!("http://{addr}")),
        // A service principal takes precedence over managed identity.
        ("IDENTITY_ENDPOINT", format!("http://{addr}/msi/token")),
        ("IDENTITY_HEADER", "secret".to_string()),
    ]);

    let outcome = cosmos::ensure_database(&config, reqwest::Client::new())
        .await
        .unwrap();

    assert_eq!(outcome, EnsureOutcome::Created);
    {
        let forms = fake.token_forms.lock().unwrap();
        assert_eq!(forms.len(), 1);
        let (tenant, form) = &forms[0];
        assert_eq!(tenant, "contoso");
        assert_eq!(form["grant_type"], "client_credentials");
        assert_eq!(form["client_id"], "cid");
        assert_eq!(form["scope"], "http://127.0.0.1/.default");
    }
    let requests = fake.requests.lock().unwrap();
    assert_eq!(
        requests[0].0["authorization"].to_str().unwrap(),
        "type%3Daad%26ver%3D1.0%26sig%3Dsp-token"
    );
}

#[tokio::test]
async fn ensure_database_fails_on_rejected_client_secret() {
    let fake = FakeCosmos::default();
    let addr = spawn(fake_cosmos_router(fake.clone())).await;
    let config = env_config(vec![
        ("COSMOS_ENDPOINT", format!("http://{addr}/")),
        ("AZURE_TENANT_ID", "contoso".to_string()),
        ("AZURE_CLIENT_ID", "cid".to_string()),
        ("AZURE_CLIENT_SECRET", "wrong".to_string()),
        ("AZURE_AUTHORITY_HOST", format!("http://{addr}/")),
    ]);

    let error = cosmos::ensure_database(&config, reqwest::Client::new())
        .await
        .unwrap_err();

    assert!(error.to_string().contains("401"), "{error}");
    assert!(fake.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn ensure_database_fails_on_rejected_identity() {
    let fake = FakeCosmos::default();
    let addr = spawn(fake_cosmos_router(fake.clone())).await;
    let config = env_config(vec![
        ("HANDLER_VARIANT", "text-with-database".to_string()),
        ("COSMOS_ENDPOINT", format!("http://{addr}/")),
        ("IDENTITY_ENDPOINT", format!("http://{addr}/msi/token")),
        ("IDENTITY_HEADER", "wrong".to_string()),
    ]);

    let result = cosmos::ensure_database(&config, reqwest::Client::new()).await;

    assert!(result.is_err());
    assert!(fake.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn ensure_database_fails_on_service_error() {
    let fake = FakeCosmos {
        fail: true,
        ..FakeCosmos::default()
    };
    let addr = spawn(fake_cosmos_router(fake)).await;
    let config = env_config(vec![
        ("COSMOS_ENDPOINT", format!("http://{addr}/")),
        ("COSMOS_ACCESS_TOKEN", "tok".to_string()),
    ]);

    let error = cosmos::ensure_database(&config, reqwest::Client::new())
        .await
        .unwrap_err();

    assert!(error.to_string().contains("503"), "{error}");
}

// === Application Insights ===

#[derive(Clone, Default)]
struct FakeIngestion {
    items: Arc<Mutex<Vec<Value>>>,
}

async fn track(State(fake): State<FakeIngestion>, Json(batch): Json<Vec<Value>>) -> Json<Value> {
    let count = batch.len();
    fake.items.lock().unwrap().extend(batch);
    Json(json!({"itemsReceived": count, "itemsAccepted": count, "errors": []}))
}

async fn spawn_ingestion() -> (FakeIngestion, ConnectionSettings) {
    let fake = FakeIngestion::default();
    let router = Router::new()
        .route("/v2/track", post(track))
        .with_state(fake.clone());
    let addr = spawn(router).await;
    let settings = ConnectionSettings::parse(&format!(
        "InstrumentationKey=00000000-0000-0000-0000-000000000001;IngestionEndpoint=http://{addr}/"
    ))
    .unwrap();
    (fake, settings)
}

#[tokio::test]
async fn app_insights_flush_delivers_batch() {
    let (fake, settings) = spawn_ingestion().await;
    let (client, worker) =
        AppInsightsClient::start(settings, BatchOptions::default(), reqwest::Client::new())
            .unwrap();

    client.track_request(RequestTelemetry::new(
        "GET",
        "/api/HttpExample?name=World",
        Duration::from_millis(4),
        "200",
    ));
    client.flush().await.unwrap();

    {
        let items = fake.items.lock().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["data"]["baseType"], json!("RequestData"));
        assert_eq!(items[0]["data"]["baseData"]["responseCode"], json!("200"));
        assert_eq!(
            items[0]["iKey"],
            json!("00000000-0000-0000-0000-000000000001")
        );
    }

    worker.shutdown().await;
}

#[tokio::test]
async fn app_insights_sends_full_batches_without_flush() {
    let (fake, settings) = spawn_ingestion().await;
    let options = BatchOptions {
        batch_size: 2,
        flush_interval: Duration::from_secs(3600),
        queue_capacity: 16,
    };
    let (client, worker) =
        AppInsightsClient::start(settings, options, reqwest::Client::new()).unwrap();

    for _ in 0..2 {
        client.track_request(RequestTelemetry::new("GET", "/", Duration::ZERO, "200"));
    }

    for _ in 0..50 {
        if fake.items.lock().unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(fake.items.lock().unwrap().len(), 2);

    worker.shutdown().await;
}

#[tokio::test]
async fn app_insights_shutdown_flushes_pending() {
    let (fake, settings) = spawn_ingestion().await;
    let (client, worker) =
        AppInsightsClient::start(settings, BatchOptions::default(), reqwest::Client::new())
            .unwrap();

    client.track_exception(funcs_handler::telemetry::ExceptionTelemetry::new(
        "boom", None,
    ));
    worker.shutdown().await;

    let items = fake.items.lock().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["data"]["baseType"], json!("ExceptionData"));
}

#[tokio::test]
async fn handler_requests_reach_app_insights() {
    let (fake, settings) = spawn_ingestion().await;
    let (client, worker) =
        AppInsightsClient::start(settings, BatchOptions::default(), reqwest::Client::new())
            .unwrap();
    let state = AppState::new(
        HandlerVariant::Document,
        "/HttpExample",
        Arc::new(client.clone()),
    );
    let addr = spawn(create_router(state)).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/HttpExample?x=1"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    client.flush().await.unwrap();
    {
        let items = fake.items.lock().unwrap();
        assert_eq!(items.len(), 1);
        let base = &items[0]["data"]["baseData"];
        assert_eq!(base["name"], json!("POST /HttpExample"));
        assert_eq!(base["url"], json!("/HttpExample?x=1"));
        assert_eq!(base["responseCode"], json!("200"));
    }

    worker.shutdown().await;
}
