//! AAD token acquisition for Cosmos DB.

use std::fmt;

use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use crate::config::Config;
use crate::error::CredentialError;

/// Public-cloud Microsoft Entra authority.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/";

/// Instance Metadata Service token endpoint.
pub const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

/// Where a bearer token comes from.
#[derive(Debug, Clone)]
pub enum TokenCredential {
    /// Token supplied up front.
    Static(String),
    /// Token fetched with a service principal secret.
    ClientSecret(ClientSecretCredential),
    /// Token fetched from a managed identity endpoint.
    ManagedIdentity(ManagedIdentityCredential),
}

impl TokenCredential {
    /// Pick the credential the environment provides.
    ///
    /// Order: configured access token, service principal secret
    /// (`AZURE_TENANT_ID` + `AZURE_CLIENT_ID` + `AZURE_CLIENT_SECRET`),
    /// then managed identity.
    pub fn from_config(config: &Config, http: reqwest::Client) -> Self {
        if let Some(token) = config.cosmos_access_token() {
            debug!("Using static access token");
            return TokenCredential::Static(token.to_string());
        }

        if let Some((tenant_id, client_id, client_secret)) = config.client_secret_identity() {
            debug!(tenant_id, client_id, "Using service principal secret");
            return TokenCredential::ClientSecret(ClientSecretCredential::new(
                http,
                config.azure_authority_host().unwrap_or(DEFAULT_AUTHORITY_HOST),
                tenant_id,
                client_id,
                client_secret,
            ));
        }

        let source = match config.app_service_identity() {
            Some((endpoint, header)) => IdentitySource::AppService {
                endpoint: endpoint.to_string(),
                header: header.to_string(),
            },
            None => IdentitySource::Imds {
                endpoint: IMDS_TOKEN_ENDPOINT.to_string(),
            },
        };
        debug!(?source, "Using managed identity");

        TokenCredential::ManagedIdentity(ManagedIdentityCredential {
            http,
            source,
            client_id: config.azure_client_id().map(str::to_string),
        })
    }

    /// Get a bearer token for `resource`.
    pub async fn get_token(&self, resource: &str) -> Result<String, CredentialError> {
        match self {
            TokenCredential::Static(token) => Ok(token.clone()),
            TokenCredential::ClientSecret(credential) => credential.get_token(resource).await,
            TokenCredential::ManagedIdentity(credential) => credential.get_token(resource).await,
        }
    }
}

/// OAuth 2.0 client credentials flow against Microsoft Entra ID.
#[derive(Clone)]
pub struct ClientSecretCredential {
    http: reqwest::Client,
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

impl fmt::Debug for ClientSecretCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretCredential")
            .field("authority_host", &self.authority_host)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl ClientSecretCredential {
    /// Create a credential for `tenant_id` at `authority_host`.
    pub fn new(
        http: reqwest::Client,
        authority_host: &str,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Self {
        Self {
            http,
            authority_host: authority_host.to_string(),
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    /// `{authority}/{tenant}/oauth2/v2.0/token`.
    pub fn token_url(&self) -> Result<Url, CredentialError> {
        let mut authority = self.authority_host.clone();
        if !authority.ends_with('/') {
            authority.push('/');
        }
        Ok(Url::parse(&authority)?.join(&format!("{}/oauth2/v2.0/token", self.tenant_id))?)
    }

    /// Fetch a token scoped to `{resource}/.default`.
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn get_token(&self, resource: &str) -> Result<String, CredentialError> {
        let scope = format!("{}/.default", resource.trim_end_matches('/'));
        let response = self
            .http
            .post(self.token_url()?)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await?;

        let token = read_token(response).await?;
        debug!("Service principal token acquired");
        Ok(token)
    }
}

async fn read_token(response: reqwest::Response) -> Result<String, CredentialError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CredentialError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let token: TokenResponse = response.json().await?;
    Ok(token.access_token)
}

/// Managed identity endpoint flavour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    /// App Service / Functions identity endpoint.
    AppService {
        /// `IDENTITY_ENDPOINT`.
        endpoint: String,
        /// `IDENTITY_HEADER`.
        header: String,
    },
    /// VM Instance Metadata Service.
    Imds {
        /// Token endpoint URL.
        endpoint: String,
    },
}

/// Fetches tokens from a managed identity endpoint.
#[derive(Debug, Clone)]
pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    source: IdentitySource,
    client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl ManagedIdentityCredential {
    /// Create a credential for an explicit source.
    pub fn new(http: reqwest::Client, source: IdentitySource, client_id: Option<String>) -> Self {
        Self {
            http,
            source,
            client_id,
        }
    }

    /// Identity endpoint flavour in use.
    pub fn source(&self) -> &IdentitySource {
        &self.source
    }

    /// Build the token request URL for `resource`.
    pub fn token_url(&self, resource: &str) -> Result<Url, CredentialError> {
        let (endpoint, api_version) = match &self.source {
            IdentitySource::AppService { endpoint, .. } => (endpoint, APP_SERVICE_API_VERSION),
            IdentitySource::Imds { endpoint } => (endpoint, IMDS_API_VERSION),
        };

        let mut url = Url::parse(endpoint)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api-version", api_version);
            query.append_pair("resource", resource);
            if let Some(client_id) = &self.client_id {
                query.append_pair("client_id", client_id);
            }
        }
        Ok(url)
    }

    /// Fetch a token for `resource`.
    #[instrument(skip(self))]
    pub async fn get_token(&self, resource: &str) -> Result<String, CredentialError> {
        let url = self.token_url(resource)?;
        let request = match &self.source {
            IdentitySource::AppService { header, .. } => {
                self.http.get(url).header("X-IDENTITY-HEADER", header)
            }
            IdentitySource::Imds { .. } => self.http.get(url).header("Metadata", "true"),
        };

        let token = read_token(request.send().await?).await?;
        debug!("Managed identity token acquired");
        Ok(token)
    }
}
