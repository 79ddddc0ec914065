//! Cosmos DB collaborator used at startup.
//!
//! This module handles:
//! - AAD token acquisition (static token, service principal or managed identity)
//! - Idempotent database creation

pub mod client;
pub mod credential;

use tracing::info;

pub use client::{CosmosClient, EnsureOutcome};
pub use credential::{
    ClientSecretCredential, IdentitySource, ManagedIdentityCredential, TokenCredential,
};

use crate::config::Config;
use crate::error::ConfigError;
use crate::metrics;
use crate::Result;

/// Ensure the configured database exists before serving traffic.
pub async fn ensure_database(
    config: &Config,
    http: reqwest::Client,
) -> Result<EnsureOutcome> {
    let endpoint = config.cosmos_endpoint_url().ok_or_else(|| {
        ConfigError::MissingDatabaseAccount(config.handler_variant.to_string())
    })?;

    let credential = TokenCredential::from_config(config, http.clone());
    let client = CosmosClient::new(&endpoint, credential, http)?;

    let _timer = metrics::timer_database_ensure();
    let outcome = client.create_database(&config.cosmos_database).await?;
    info!(
        database = %config.cosmos_database,
        endpoint = %client.endpoint(),
        %outcome,
        "Database ready"
    );

    Ok(outcome)
}
