//! Credential acquisition for registry and permission calls.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use thiserror::Error;

pub mod openid;

pub use openid::OpenIdProvider;

/// Errors surfaced by a [`CredentialProvider`] implementation.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// The token endpoint could not be reached.
    #[error("token endpoint transport error: {0}")]
    Transport(String),

    /// The token endpoint refused the grant.
    #[error("token request rejected with status {status}: {detail}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        detail: String,
    },

    /// The token endpoint answered with an undecodable body.
    #[error("token response not decodable: {0}")]
    Decode(String),
}

/// Tokens for calls made on behalf of the worker or an impersonated user.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// The worker's own service token.
    async fn service_token(&self) -> Result<AccessToken, CredentialError>;

    /// A token acting as `user_id`, for permission-checked calls.
    async fn impersonation_token(&self, user_id: &str)
        -> Result<AccessToken, CredentialError>;
}

/// A bearer token with its expiry.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// The raw token value.
    pub token: String,
    /// Token type as reported by the issuer, normally `bearer`.
    pub token_type: String,
    /// Absolute expiry, if the issuer reported one.
    pub expires_at: Option<SystemTime>,
}

impl AccessToken {
    /// A token expiring `expires_in` seconds from now.
    pub fn new(token: String, token_type: String, expires_in: Option<u64>) -> Self {
        Self {
            token,
            token_type,
            expires_at: expires_in.map(|s| SystemTime::now() + Duration::from_secs(s)),
        }
    }

    /// True when the expiry has passed. Tokens without an expiry never
    /// expire.
    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::ZERO)
    }

    /// True when the token expires within `buffer` from now.
    pub fn expires_within(&self, buffer: Duration) -> bool {
        match self.expires_at {
            Some(at) => match at.duration_since(SystemTime::now()) {
                Ok(remaining) => remaining <= buffer,
                Err(_) => true,
            },
            None => false,
        }
    }

    /// The `Authorization` header value for this token.
    pub fn header_value(&self) -> String {
        let token_type = if self.token_type.eq_ignore_ascii_case("bearer") {
            "Bearer"
        } else {
            self.token_type.as_str()
        };
        format!("{} {}", token_type, self.token)
    }
}
