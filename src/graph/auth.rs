//! # Graph Authentication
//!
//! Bearer tokens for Microsoft Graph.
//!
//! - `AZUREAD_ACCESS_TOKEN`: a pre-issued token, used as-is
//! - client secret: OAuth2 client-credentials grant, cached until shortly before expiry
//! - workload identity: federated token via `azure_identity`
//! - otherwise: managed identity

use crate::config::ProviderConfig;
use crate::constants::TOKEN_REFRESH_GRACE_SECS;
use crate::error::{GraphError, GraphResult};
use crate::graph::models::Sensitive;
use anyhow::{Context, Result};
use async_trait::async_trait;
use azure_core::credentials::{AccessToken, Secret, TokenCredential, TokenRequestOptions};
use azure_identity::{ManagedIdentityCredential, WorkloadIdentityCredential};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Where Graph bearer tokens come from
pub enum TokenSource {
    /// Any `azure_core` credential, asked for `<graph>/.default`
    Credential {
        credential: Arc<dyn TokenCredential>,
        scope: String,
    },
    /// Client-credentials grant with a local cache
    ClientSecret(ClientSecretToken),
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credential { scope, .. } => f
                .debug_struct("TokenSource::Credential")
                .field("scope", scope)
                .finish_non_exhaustive(),
            Self::ClientSecret(token) => std::fmt::Debug::fmt(token, f),
        }
    }
}

impl TokenSource {
    /// Fixed token, never refreshed
    #[must_use]
    pub fn fixed(token: impl Into<String>) -> Self {
        Self::Credential {
            credential: Arc::new(StaticTokenCredential::new(token)),
            scope: String::new(),
        }
    }

    /// Current bearer token
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Auth`] when the credential cannot produce a token.
    pub async fn token(&self) -> GraphResult<String> {
        match self {
            Self::Credential { credential, scope } => {
                let token_response = credential
                    .get_token(&[scope.as_str()], Some(TokenRequestOptions::default()))
                    .await
                    .map_err(|e| {
                        GraphError::Auth(format!("Failed to get Graph access token: {e}"))
                    })?;
                Ok(token_response.token.secret().to_string())
            }
            Self::ClientSecret(cache) => cache.token().await,
        }
    }
}

/// Build the token source described by the provider configuration
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn build_token_source(config: &ProviderConfig) -> Result<TokenSource> {
    if let Some(token) = &config.access_token {
        info!("Using the access token from AZUREAD_ACCESS_TOKEN");
        return Ok(TokenSource::fixed(token.expose()));
    }

    let scope = format!("{}/.default", config.graph_resource());

    if let Some(secret) = &config.client_secret {
        anyhow::ensure!(
            !config.tenant_id.is_empty(),
            "ARM_TENANT_ID is required for client secret authentication"
        );
        anyhow::ensure!(
            !config.client_id.is_empty(),
            "ARM_CLIENT_ID is required for client secret authentication"
        );
        info!(
            "Using client secret authentication with client ID: {}",
            config.client_id
        );
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            config.environment.login_endpoint(),
            config.tenant_id
        );
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .context("Failed to create HTTP client for token requests")?;
        return Ok(TokenSource::ClientSecret(ClientSecretToken::new(
            http_client,
            token_url,
            config.client_id.clone(),
            secret.clone(),
            scope,
        )));
    }

    let credential: Arc<dyn TokenCredential> = if config.use_workload_identity {
        info!("Using Azure Workload Identity authentication");
        let options = azure_identity::WorkloadIdentityCredentialOptions {
            client_id: (!config.client_id.is_empty()).then(|| config.client_id.clone()),
            ..Default::default()
        };
        WorkloadIdentityCredential::new(Some(options))
            .context("Failed to create WorkloadIdentityCredential")?
    } else {
        info!("No client secret or workload identity configured, using Managed Identity");
        ManagedIdentityCredential::new(None).context("Failed to create ManagedIdentityCredential")?
    };

    Ok(TokenSource::Credential { credential, scope })
}

/// Credential that always hands out the same token
#[derive(Debug)]
pub struct StaticTokenCredential {
    token: Sensitive,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Sensitive::new(token),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(
        &self,
        _scopes: &[&str],
        _options: Option<TokenRequestOptions<'_>>,
    ) -> azure_core::Result<AccessToken> {
        use typespec_client_core::time::{Duration, OffsetDateTime};

        Ok(AccessToken::new(
            Secret::new(self.token.expose().to_string()),
            OffsetDateTime::now_utc() + Duration::seconds(3600),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Clone)]
struct CachedToken {
    access_token: Sensitive,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self, grace_period: Duration) -> bool {
        Utc::now() + grace_period >= self.expires_at
    }
}

/// Client-credentials token with a refresh-before-expiry cache
pub struct ClientSecretToken {
    http_client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Sensitive,
    scope: String,
    cached_token: RwLock<Option<CachedToken>>,
    grace_period: Duration,
}

impl std::fmt::Debug for ClientSecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecretToken")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl ClientSecretToken {
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        token_url: String,
        client_id: String,
        client_secret: Sensitive,
        scope: String,
    ) -> Self {
        Self {
            http_client,
            token_url,
            client_id,
            client_secret,
            scope,
            cached_token: RwLock::new(None),
            grace_period: Duration::seconds(TOKEN_REFRESH_GRACE_SECS),
        }
    }

    async fn token(&self) -> GraphResult<String> {
        {
            let cache = self.cached_token.read().await;
            if let Some(token) = cache.as_ref().filter(|t| !t.is_expired(self.grace_period)) {
                return Ok(token.access_token.expose().to_string());
            }
        }

        let mut cache = self.cached_token.write().await;
        // Another task may have refreshed while we waited for the write lock
        if let Some(token) = cache.as_ref().filter(|t| !t.is_expired(self.grace_period)) {
            return Ok(token.access_token.expose().to_string());
        }

        let fresh = self.acquire_token().await?;
        let access_token = fresh.access_token.expose().to_string();
        *cache = Some(fresh);
        Ok(access_token)
    }

    async fn acquire_token(&self) -> GraphResult<CachedToken> {
        debug!("Requesting access token from {}", self.token_url);

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| GraphError::Auth(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GraphError::Auth(format!(
                "Token request failed with status {status}: {body}"
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| GraphError::Auth(format!("Failed to parse token response: {e}")))?;

        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);
        debug!(
            "Acquired new token, expires at {}",
            expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        Ok(CachedToken {
            access_token: Sensitive::new(token_response.access_token),
            expires_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    oid: Option<String>,
}

/// Object ID (`oid` claim) of the principal a JWT access token was issued to
///
/// The signature is not checked; the token is only inspected, never trusted.
#[must_use]
pub fn object_id_from_token(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: TokenClaims = serde_json::from_slice(&bytes).ok()?;
    claims.oid.filter(|oid| !oid.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with_payload(payload: &serde_json::Value) -> String {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        format!(
            "{}.{}.signature",
            engine.encode(br#"{"alg":"none"}"#),
            engine.encode(payload.to_string())
        )
    }

    #[test]
    fn test_object_id_from_token() {
        let token = jwt_with_payload(&serde_json::json!({
            "oid": "11111111-2222-3333-4444-555555555555",
            "tid": "tenant"
        }));
        assert_eq!(
            object_id_from_token(&token).as_deref(),
            Some("11111111-2222-3333-4444-555555555555")
        );
    }

    #[test]
    fn test_object_id_from_token_without_claim() {
        let token = jwt_with_payload(&serde_json::json!({"tid": "tenant"}));
        assert!(object_id_from_token(&token).is_none());
        assert!(object_id_from_token("not-a-jwt").is_none());
    }

    #[test]
    fn test_cached_token_expiry() {
        let token = CachedToken {
            access_token: Sensitive::new("test"),
            expires_at: Utc::now() + Duration::minutes(10),
        };
        assert!(!token.is_expired(Duration::minutes(5)));
        assert!(token.is_expired(Duration::minutes(15)));
    }

    #[tokio::test]
    async fn test_fixed_token_source() {
        let source = TokenSource::fixed("test-token");
        assert_eq!(source.token().await.unwrap(), "test-token");
    }

    #[test]
    fn test_build_token_source_prefers_static_token() {
        let config = ProviderConfig {
            access_token: Some(Sensitive::new("pre-issued")),
            client_secret: Some(Sensitive::new("ignored")),
            ..ProviderConfig::default()
        };
        let source = build_token_source(&config).unwrap();
        assert!(matches!(source, TokenSource::Credential { .. }));
    }

    #[test]
    fn test_client_secret_requires_tenant() {
        let config = ProviderConfig {
            client_id: "client".to_string(),
            client_secret: Some(Sensitive::new("s3cret")),
            ..ProviderConfig::default()
        };
        assert!(build_token_source(&config).is_err());
    }

    #[test]
    fn test_client_secret_token_url() {
        let config = ProviderConfig {
            tenant_id: "contoso".to_string(),
            client_id: "client".to_string(),
            client_secret: Some(Sensitive::new("s3cret")),
            ..ProviderConfig::default()
        };
        let TokenSource::ClientSecret(token) = build_token_source(&config).unwrap() else {
            panic!("expected client secret token source");
        };
        assert_eq!(
            token.token_url,
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
        assert_eq!(token.scope, "https://graph.microsoft.com/.default");
    }
}
