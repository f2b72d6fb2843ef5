//! Delegated identity for the two legs of the agent: the model endpoint and
//! the tool server are independent credential domains with separate scopes
//! and refresh cadences, served by one provider seam so callers only ever
//! ask for "a valid token for this domain".

use std::fmt;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Tokens are considered stale this long before their actual expiry so a
/// request never goes out with a token about to lapse mid-flight.
const EXPIRY_LEEWAY_SECS: i64 = 60;

const TOKEN_REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// The identity domain a token is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Model,
    ToolServer,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Model => f.write_str("model"),
            Domain::ToolServer => f.write_str("tool-server"),
        }
    }
}

/// A bearer token and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new<S: Into<String>>(token: S, expires_at: DateTime<Utc>) -> Self {
        Credential {
            token: token.into(),
            expires_at,
        }
    }

    pub fn expires_within(&self, leeway: Duration) -> bool {
        self.expires_at - leeway <= Utc::now()
    }
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("credential client configuration failed: {0}")]
    Configuration(String),

    #[error("token acquisition for the {domain} domain failed: {message}")]
    Acquisition { domain: Domain, message: String },
}

/// Source of valid bearer tokens, one instance serving both domains.
///
/// Implementations own caching and refresh; callers must never see an
/// already-expired token from `get_token`.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_token(&self, domain: Domain) -> Result<Credential, CredentialError>;

    /// Drop any cached token for the domain so the next `get_token`
    /// acquires a fresh one. Used after the remote rejects a token that
    /// looked valid locally.
    async fn invalidate(&self, domain: Domain);
}

/// Fixed tokens handed in at construction. No refresh; suitable for
/// short-lived runs and tests.
pub struct StaticCredentialProvider {
    model_token: String,
    tool_server_token: String,
}

impl StaticCredentialProvider {
    pub fn new<M: Into<String>, T: Into<String>>(model_token: M, tool_server_token: T) -> Self {
        StaticCredentialProvider {
            model_token: model_token.into(),
            tool_server_token: tool_server_token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_token(&self, domain: Domain) -> Result<Credential, CredentialError> {
        let token = match domain {
            Domain::Model => &self.model_token,
            Domain::ToolServer => &self.tool_server_token,
        };
        Ok(Credential::new(token.clone(), Utc::now() + Duration::days(365)))
    }

    async fn invalidate(&self, _domain: Domain) {}
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

/// OAuth2 client-credentials provider with an in-process cache per domain.
///
/// Each domain has its own cache slot behind an async mutex; a refresh holds
/// the slot's lock for its duration, so concurrent sessions asking for the
/// same domain coalesce into a single token request while the other domain
/// stays unaffected.
pub struct ClientCredentialsProvider {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    model_scope: String,
    tool_server_scope: String,
    model_slot: Mutex<Option<Credential>>,
    tool_server_slot: Mutex<Option<Credential>>,
}

impl ClientCredentialsProvider {
    pub fn new<U, I, S>(
        token_url: U,
        client_id: I,
        client_secret: S,
        model_scope: String,
        tool_server_scope: String,
    ) -> Result<Self, CredentialError>
    where
        U: Into<String>,
        I: Into<String>,
        S: Into<String>,
    {
        let client = reqwest::Client::builder()
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CredentialError::Configuration(e.to_string()))?;

        Ok(ClientCredentialsProvider {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            model_scope,
            tool_server_scope,
            model_slot: Mutex::new(None),
            tool_server_slot: Mutex::new(None),
        })
    }

    fn slot(&self, domain: Domain) -> &Mutex<Option<Credential>> {
        match domain {
            Domain::Model => &self.model_slot,
            Domain::ToolServer => &self.tool_server_slot,
        }
    }

    fn scope(&self, domain: Domain) -> &str {
        match domain {
            Domain::Model => &self.model_scope,
            Domain::ToolServer => &self.tool_server_scope,
        }
    }

    async fn fetch_token(&self, domain: Domain) -> Result<Credential, CredentialError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("scope", self.scope(domain)),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| CredentialError::Acquisition {
                domain,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::Acquisition {
                domain,
                message: format!("token endpoint returned {status}: {body}"),
            });
        }

        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| CredentialError::Acquisition {
                    domain,
                    message: format!("token response was not interpretable: {e}"),
                })?;

        let expires_in = token.expires_in.unwrap_or(3600);
        Ok(Credential::new(
            token.access_token,
            Utc::now() + Duration::seconds(expires_in),
        ))
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentialsProvider {
    async fn get_token(&self, domain: Domain) -> Result<Credential, CredentialError> {
        let mut slot = self.slot(domain).lock().await;
        if let Some(credential) = slot.as_ref() {
            if !credential.expires_within(Duration::seconds(EXPIRY_LEEWAY_SECS)) {
                return Ok(credential.clone());
            }
        }

        debug!(%domain, "acquiring fresh bearer token");
        let fresh = self.fetch_token(domain).await?;
        *slot = Some(fresh.clone());
        Ok(fresh)
    }

    async fn invalidate(&self, domain: Domain) {
        debug!(%domain, "invalidating cached bearer token");
        *self.slot(domain).lock().await = None;
    }
}
