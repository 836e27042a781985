//! OpenID Connect credential provider.
//!
//! The worker authenticates itself with the client-credentials grant and
//! acts on behalf of task tenants via the token-exchange grant
//! (`requested_subject`). Tokens are cached and renewed shortly before
//! expiry; the service token prefers the refresh grant and falls back to a
//! fresh client-credentials request when the refresh token itself is no
//! longer usable.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use super::{AccessToken, CredentialError, CredentialProvider};

const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`CredentialProvider`] backed by an OpenID Connect token endpoint.
pub struct OpenIdProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    buffer: Duration,
    service: RwLock<Option<ServiceSession>>,
    users: DashMap<String, AccessToken>,
}

struct ServiceSession {
    token: AccessToken,
    refresh_token: Option<String>,
    refresh_expires_at: Option<SystemTime>,
}

impl OpenIdProvider {
    /// A provider for the token endpoint at `token_url`, renewing tokens
    /// `buffer` before they expire.
    pub fn new(
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        buffer: Duration,
    ) -> Result<Self, CredentialError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CredentialError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            buffer,
            service: RwLock::new(None),
            users: DashMap::new(),
        })
    }

    async fn request_token(
        &self,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, CredentialError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| CredentialError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CredentialError::Rejected { status: status.as_u16(), detail });
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| CredentialError::Decode(e.to_string()))
    }

    async fn client_credentials(&self) -> Result<TokenResponse, CredentialError> {
        self.request_token(&[
            ("grant_type", "client_credentials"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, CredentialError> {
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    fn cached_service_token(&self) -> Option<AccessToken> {
        let session = self.service.read();
        session
            .as_ref()
            .filter(|s| !s.token.expires_within(self.buffer))
            .map(|s| s.token.clone())
    }

    fn usable_refresh_token(&self) -> Option<String> {
        let session = self.service.read();
        let session = session.as_ref()?;
        let refresh_token = session.refresh_token.clone()?;
        match session.refresh_expires_at {
            Some(at) if at <= SystemTime::now() + self.buffer => None,
            _ => Some(refresh_token),
        }
    }

    fn store_session(&self, response: TokenResponse) -> AccessToken {
        let token = response.access_token();
        *self.service.write() = Some(ServiceSession {
            token: token.clone(),
            refresh_token: response.refresh_token,
            refresh_expires_at: response
                .refresh_expires_in
                .map(|s| SystemTime::now() + Duration::from_secs(s)),
        });
        token
    }

    /// Drops cached user tokens whose expiry has passed. Covers users
    /// that never request another token.
    fn prune_user_tokens(&self) {
        self.users.retain(|_, token| !token.is_expired());
    }
}

#[async_trait]
impl CredentialProvider for OpenIdProvider {
    async fn service_token(&self) -> Result<AccessToken, CredentialError> {
        if let Some(token) = self.cached_service_token() {
            return Ok(token);
        }
        let response = match self.usable_refresh_token() {
            Some(refresh_token) => match self.refresh(&refresh_token).await {
                Ok(response) => response,
                Err(err) => {
                    debug!(error = %err, "token refresh failed, requesting a fresh grant");
                    self.client_credentials().await?
                }
            },
            None => self.client_credentials().await?,
        };
        Ok(self.store_session(response))
    }

    async fn impersonation_token(
        &self,
        user_id: &str,
    ) -> Result<AccessToken, CredentialError> {
        if let Some(token) = self.users.get(user_id) {
            if !token.expires_within(self.buffer) {
                return Ok(token.clone());
            }
        }
        let subject = self.service_token().await?;
        let response = self
            .request_token(&[
                ("grant_type", TOKEN_EXCHANGE_GRANT),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("subject_token", &subject.token),
                ("requested_subject", user_id),
            ])
            .await?;
        let token = response.access_token();
        self.prune_user_tokens();
        self.users.insert(user_id.to_string(), token.clone());
        Ok(token)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    refresh_expires_in: Option<u64>,
}

impl TokenResponse {
    fn access_token(&self) -> AccessToken {
        AccessToken::new(
            self.access_token.clone(),
            self.token_type.clone().unwrap_or_else(|| "bearer".to_string()),
            self.expires_in,
        )
    }
}
