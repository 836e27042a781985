//! Device/service metadata resolution and permission checks.

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::CredentialError;
use crate::types::metadata::{DeviceMetadata, ServiceMetadata};

pub mod cache;
pub mod rest;

pub use cache::TtlCache;
pub use rest::RestDirectory;

/// Errors surfaced by a [`Directory`] implementation.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// The entity does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Entity kind, `"device"` or `"service"`.
        entity: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// The registry answered with an unexpected status.
    #[error("directory call failed with status {status}: {detail}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        detail: String,
    },

    /// The call did not reach the registry.
    #[error("directory transport error: {0}")]
    Transport(String),

    /// The registry answered with a body this client could not decode.
    #[error("directory response not decodable: {0}")]
    Decode(String),

    /// No credential could be obtained for the call.
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Resolution of command targets and the permission to execute on them.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolves a device instance on behalf of `identity`.
    async fn resolve_device(
        &self,
        device_id: &str,
        identity: &str,
    ) -> Result<DeviceMetadata, DirectoryError>;

    /// Resolves a service definition.
    async fn resolve_service(&self, service_id: &str)
        -> Result<ServiceMetadata, DirectoryError>;

    /// True when `identity` may execute commands on the device `resource_id`.
    async fn check_access(
        &self,
        identity: &str,
        resource_id: &str,
    ) -> Result<bool, DirectoryError>;
}
