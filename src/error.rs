//! Unified error types for the custom handler.

use thiserror::Error;

/// Unified error type for the custom handler.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration validation error.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Cosmos DB error.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Telemetry error.
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

/// Configuration validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Listening port is zero.
    #[error("FUNCTIONS_CUSTOMHANDLER_PORT must be non-zero")]
    InvalidPort,

    /// Route does not start with a slash.
    #[error("route {0:?} must start with '/'")]
    InvalidRoute(String),

    /// Variant needs a database but no account or endpoint is configured.
    #[error("variant {0} requires CosmosAccount or COSMOS_ENDPOINT")]
    MissingDatabaseAccount(String),

    /// Database name is empty.
    #[error("COSMOS_DATABASE must not be empty")]
    EmptyDatabaseName,

    /// Telemetry batch size is zero.
    #[error("TELEMETRY_BATCH_SIZE must be at least 1")]
    InvalidBatchSize,

    /// Connection string could not be parsed.
    #[error("invalid Application Insights connection string: {0}")]
    InvalidConnectionString(String),
}

/// Token credential errors.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Token endpoint could not be reached.
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Token endpoint answered with a non-success status.
    #[error("token endpoint returned {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Token endpoint URL is malformed.
    #[error("invalid token endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

/// Cosmos DB client errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Endpoint could not be built or parsed.
    #[error("invalid account endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        /// The offending endpoint.
        endpoint: String,
        /// Parse failure.
        source: url::ParseError,
    },

    /// Authorization token could not be obtained.
    #[error("authorization failed: {0}")]
    Credential(#[from] CredentialError),

    /// Request failed before a response arrived.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Service answered with an unexpected status.
    #[error("create database {database} failed with {status}: {body}")]
    Unexpected {
        /// Database name.
        database: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Request date header could not be formatted.
    #[error("failed to format request date: {0}")]
    Date(#[from] time::error::Format),
}

/// Telemetry delivery errors.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Ingestion request failed.
    #[error("ingestion request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Ingestion endpoint answered with a non-success status.
    #[error("ingestion endpoint returned {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Ingestion endpoint URL is malformed.
    #[error("invalid ingestion endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    /// Worker already shut down.
    #[error("telemetry worker is closed")]
    Closed,
}

/// Per-request envelope failures, answered directly to the caller.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// Request body is not a valid `InvokeRequest`.
    #[error("{0}")]
    Decode(serde_json::Error),

    /// Variant needs an envelope but the body is empty.
    #[error("request body is empty, expected an invocation envelope")]
    EmptyBody,

    /// Response envelope could not be serialized.
    #[error("{0}")]
    Encode(serde_json::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, HandlerError>;
