//! REST client for the device registry and the permission service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::auth::CredentialProvider;
use crate::types::metadata::{DeviceMetadata, ServiceMetadata};

use super::{cache::TtlCache, Directory, DirectoryError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Directory`] over the registry's HTTP API, with TTL-cached lookups.
///
/// Device resolution runs under an impersonation token for the calling
/// identity; service resolution uses the worker's own service token. The
/// permission service is asked per identity/device pair and its verdict is
/// cached like the metadata itself.
pub struct RestDirectory {
    http: reqwest::Client,
    base: Url,
    permissions: Url,
    credentials: Arc<dyn CredentialProvider>,
    devices: TtlCache<DeviceMetadata>,
    services: TtlCache<ServiceMetadata>,
    access: TtlCache<bool>,
}

impl RestDirectory {
    /// A client for the registry at `base_url` and the permission service
    /// at `permissions_url`, caching results for `cache_ttl`.
    pub fn new(
        base_url: &str,
        permissions_url: &str,
        cache_ttl: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base: parse_base(base_url)?,
            permissions: parse_base(permissions_url)?,
            credentials,
            devices: TtlCache::new(cache_ttl),
            services: TtlCache::new(cache_ttl),
            access: TtlCache::new(cache_ttl),
        })
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        token: &str,
        entity: &'static str,
        id: &str,
    ) -> Result<T, DirectoryError> {
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, token)
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound { entity, id: id.to_string() });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Status { status: status.as_u16(), detail });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))
    }

}

#[async_trait]
impl Directory for RestDirectory {
    async fn resolve_device(
        &self,
        device_id: &str,
        identity: &str,
    ) -> Result<DeviceMetadata, DirectoryError> {
        if let Some(device) = self.devices.get(device_id) {
            return Ok(device);
        }
        let token = self.credentials.impersonation_token(identity).await?;
        let url = endpoint(&self.base, &["deviceInstance", device_id])?;
        let device: DeviceMetadata =
            self.fetch(url, &token.header_value(), "device", device_id).await?;
        self.devices.insert(device_id, device.clone());
        Ok(device)
    }

    async fn resolve_service(
        &self,
        service_id: &str,
    ) -> Result<ServiceMetadata, DirectoryError> {
        if let Some(service) = self.services.get(service_id) {
            return Ok(service);
        }
        let token = self.credentials.service_token().await?;
        let url = endpoint(&self.base, &["service", service_id])?;
        let service: ServiceMetadata =
            self.fetch(url, &token.header_value(), "service", service_id).await?;
        self.services.insert(service_id, service.clone());
        Ok(service)
    }

    async fn check_access(
        &self,
        identity: &str,
        resource_id: &str,
    ) -> Result<bool, DirectoryError> {
        let key = format!("{identity}\u{1f}{resource_id}");
        if let Some(allowed) = self.access.get(&key) {
            return Ok(allowed);
        }
        let token = self.credentials.impersonation_token(identity).await?;
        let url = endpoint(
            &self.permissions,
            &["jwt", "check", "deviceinstance", resource_id, "x"],
        )?;
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, token.header_value())
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;
        let status = response.status();
        let allowed = match status {
            StatusCode::OK => true,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => false,
            other => {
                let detail = response.text().await.unwrap_or_default();
                return Err(DirectoryError::Status { status: other.as_u16(), detail });
            }
        };
        debug!(identity, resource_id, allowed, "permission check");
        self.access.insert(key, allowed);
        Ok(allowed)
    }
}

fn parse_base(base_url: &str) -> Result<Url, DirectoryError> {
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    Url::parse(&normalized)
        .map_err(|e| DirectoryError::Transport(format!("bad base url '{base_url}': {e}")))
}

/// Appends each segment percent-encoded, so an id carrying `/` or a dot
/// segment cannot rewrite the request path.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, DirectoryError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| DirectoryError::Transport(format!("'{base}' cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
