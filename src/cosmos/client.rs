//! Minimal Cosmos DB account client.

use reqwest::StatusCode;
use serde_json::json;
use strum::Display;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, instrument};
use url::Url;

use super::credential::TokenCredential;
use crate::error::DatabaseError;

/// REST API version sent with every request.
pub const API_VERSION: &str = "2018-12-31";

/// Result of ensuring a database exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum EnsureOutcome {
    /// The database was created by this call.
    Created,
    /// The database already existed.
    AlreadyExists,
}

/// Cosmos DB account client using AAD authorization.
#[derive(Debug, Clone)]
pub struct CosmosClient {
    http: reqwest::Client,
    endpoint: Url,
    credential: TokenCredential,
}

impl CosmosClient {
    /// Create a client for an account endpoint such as
    /// `https://{account}.documents.azure.com:443/`.
    pub fn new(
        endpoint: &str,
        credential: TokenCredential,
        http: reqwest::Client,
    ) -> Result<Self, DatabaseError> {
        let mut normalized = endpoint.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let endpoint = Url::parse(&normalized).map_err(|source| DatabaseError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source,
        })?;

        Ok(Self {
            http,
            endpoint,
            credential,
        })
    }

    /// Account endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// AAD resource tokens are requested for: the endpoint origin without port.
    pub fn token_resource(&self) -> String {
        format!(
            "{}://{}",
            self.endpoint.scheme(),
            self.endpoint.host_str().unwrap_or_default()
        )
    }

    /// Create database `id`, treating an existing database as success.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn create_database(&self, id: &str) -> Result<EnsureOutcome, DatabaseError> {
        let url = self
            .endpoint
            .join("dbs")
            .map_err(|source| DatabaseError::InvalidEndpoint {
                endpoint: self.endpoint.to_string(),
                source,
            })?;

        let token = self.credential.get_token(&self.token_resource()).await?;

        let response = self
            .http
            .post(url)
            .header("authorization", aad_authorization(&token))
            .header("x-ms-date", request_date(OffsetDateTime::now_utc())?)
            .header("x-ms-version", API_VERSION)
            .json(&json!({ "id": id }))
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED => {
                debug!(database = id, "Database created");
                Ok(EnsureOutcome::Created)
            }
            StatusCode::CONFLICT => {
                debug!(database = id, "Database already exists");
                Ok(EnsureOutcome::AlreadyExists)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(DatabaseError::Unexpected {
                    database: id.to_string(),
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

/// URL-encoded `type=aad&ver=1.0&sig={token}`.
pub fn aad_authorization(token: &str) -> String {
    let raw = format!("type=aad&ver=1.0&sig={token}");
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// RFC 1123 date as required by `x-ms-date`.
pub fn request_date(now: OffsetDateTime) -> Result<String, DatabaseError> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    Ok(now.to_offset(time::UtcOffset::UTC).format(format)?)
}
