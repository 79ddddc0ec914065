//! Application configuration loaded from environment variables.

use std::net::SocketAddr;

use serde::{Deserialize, Deserializer};

use crate::api::HandlerVariant;
use crate::error::ConfigError;
use crate::telemetry::appinsights::ConnectionSettings;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Custom Handler ===
    /// Port the Functions host expects the handler on.
    #[serde(default = "default_port", deserialize_with = "port_or_default")]
    pub functions_customhandler_port: u16,

    /// Function implemented by this process.
    #[serde(default)]
    pub handler_variant: HandlerVariant,

    /// Route override; defaults to the variant's route.
    #[serde(default)]
    pub handler_route: Option<String>,

    // === Application Insights ===
    /// Legacy instrumentation key.
    #[serde(default)]
    pub appinsights_instrumentationkey: Option<String>,

    /// Connection string; takes precedence over the instrumentation key.
    #[serde(default)]
    pub applicationinsights_connection_string: Option<String>,

    /// Envelopes per ingestion request.
    #[serde(default = "default_batch_size")]
    pub telemetry_batch_size: usize,

    /// Maximum time an envelope waits before being sent.
    #[serde(default = "default_flush_interval_ms")]
    pub telemetry_flush_interval_ms: u64,

    /// Envelopes buffered before new ones are dropped.
    #[serde(default = "default_queue_capacity")]
    pub telemetry_queue_capacity: usize,

    /// Report the real response status instead of the fixed "200".
    #[serde(default)]
    pub telemetry_report_actual_status: bool,

    // === Cosmos DB ===
    /// Account name, read from `CosmosAccount`.
    #[serde(default, rename = "cosmosaccount")]
    pub cosmos_account: Option<String>,

    /// Full account endpoint; overrides the one derived from the account name.
    #[serde(default)]
    pub cosmos_endpoint: Option<String>,

    /// Database ensured at startup.
    #[serde(default = "default_database")]
    pub cosmos_database: String,

    /// Pre-acquired AAD token; skips managed identity.
    #[serde(default)]
    pub cosmos_access_token: Option<String>,

    // === Managed Identity ===
    /// App Service managed identity endpoint.
    #[serde(default)]
    pub identity_endpoint: Option<String>,

    /// Secret header for the App Service identity endpoint.
    #[serde(default)]
    pub identity_header: Option<String>,

    /// Client ID of a user-assigned identity or service principal.
    #[serde(default)]
    pub azure_client_id: Option<String>,

    // === Service Principal ===
    /// Directory (tenant) of the service principal.
    #[serde(default)]
    pub azure_tenant_id: Option<String>,

    /// Service principal secret.
    #[serde(default)]
    pub azure_client_secret: Option<String>,

    /// Microsoft Entra authority; defaults to the public cloud.
    #[serde(default)]
    pub azure_authority_host: Option<String>,

    // === Server Configuration ===
    /// Port for the Prometheus exporter; disabled when unset.
    #[serde(default, deserialize_with = "optional_port")]
    pub metrics_port: Option<u16>,

    /// Timeout for outbound HTTP calls.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

fn default_port() -> u16 {
    8080
}

fn default_batch_size() -> usize {
    1024
}

fn default_flush_interval_ms() -> u64 {
    10_000
}

fn default_queue_capacity() -> usize {
    8192
}

fn default_database() -> String {
    "myfirstdatabase".to_string()
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn port_or_default<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(optional_port(deserializer)?.unwrap_or_else(default_port))
}

fn optional_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim() {
        "" => Ok(None),
        port => port.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Treats `VAR=` the same as an unset variable.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> crate::Result<Self> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env()?)
    }

    /// Load configuration from explicit key/value pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(vars)
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.functions_customhandler_port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let route = self.route();
        if !route.starts_with('/') {
            return Err(ConfigError::InvalidRoute(route.to_string()));
        }

        if self.handler_variant.requires_database() {
            if self.cosmos_endpoint_url().is_none() {
                return Err(ConfigError::MissingDatabaseAccount(
                    self.handler_variant.to_string(),
                ));
            }
            if self.cosmos_database.trim().is_empty() {
                return Err(ConfigError::EmptyDatabaseName);
            }
        }

        if self.telemetry_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }

        self.ingestion_settings()?;

        Ok(())
    }

    /// Route the handler is mounted on.
    pub fn route(&self) -> &str {
        non_empty(&self.handler_route).unwrap_or_else(|| self.handler_variant.default_route())
    }

    /// Address the listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.functions_customhandler_port))
    }

    /// Cosmos DB account endpoint, if one is configured.
    pub fn cosmos_endpoint_url(&self) -> Option<String> {
        if let Some(endpoint) = non_empty(&self.cosmos_endpoint) {
            return Some(endpoint.to_string());
        }
        non_empty(&self.cosmos_account)
            .map(|account| format!("https://{account}.documents.azure.com:443/"))
    }

    /// Static Cosmos DB token, if one is configured.
    pub fn cosmos_access_token(&self) -> Option<&str> {
        non_empty(&self.cosmos_access_token)
    }

    /// App Service identity endpoint and header, when both are present.
    pub fn app_service_identity(&self) -> Option<(&str, &str)> {
        non_empty(&self.identity_endpoint).zip(non_empty(&self.identity_header))
    }

    /// User-assigned identity client ID.
    pub fn azure_client_id(&self) -> Option<&str> {
        non_empty(&self.azure_client_id)
    }

    /// Tenant, client ID and secret of a service principal, when all are set.
    pub fn client_secret_identity(&self) -> Option<(&str, &str, &str)> {
        let tenant_id = non_empty(&self.azure_tenant_id)?;
        let client_id = non_empty(&self.azure_client_id)?;
        let client_secret = non_empty(&self.azure_client_secret)?;
        Some((tenant_id, client_id, client_secret))
    }

    /// Microsoft Entra authority host, if overridden.
    pub fn azure_authority_host(&self) -> Option<&str> {
        non_empty(&self.azure_authority_host)
    }

    /// Application Insights ingestion settings, `None` when telemetry is off.
    pub fn ingestion_settings(&self) -> Result<Option<ConnectionSettings>, ConfigError> {
        if let Some(connection_string) = non_empty(&self.applicationinsights_connection_string) {
            return ConnectionSettings::parse(connection_string).map(Some);
        }
        Ok(non_empty(&self.appinsights_instrumentationkey)
            .map(ConnectionSettings::from_instrumentation_key))
    }
}
