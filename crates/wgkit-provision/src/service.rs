//! Provisioning Service
//!
//! The allocation/generation boundary: one call per client request that
//! mints keys, binds an address and renders the configuration.

use crate::allocator::{AddressAllocator, AllocatedAddress, AllocationError, ClientIdentity};
use crate::builder::{BuildError, ConfigBuilder, TunnelConfiguration};
use crate::descriptor::{DescriptorError, ServerDescriptor};
use std::sync::Arc;
use tracing::{info, warn};
use wgkit_engine::{CommandRunner, EngineError, KeyPairProvider, PublicKey, SystemRunner};

/// Provisioning errors, surfaced to the caller of the generation boundary.
///
/// None of these are retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    #[error("{0}")]
    EngineUnavailable(String),

    #[error("Server configuration is incomplete: missing {0}")]
    IncompleteServerConfig(String),

    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),

    #[error("Address pool {pool} is exhausted")]
    AllocationExhausted { pool: String },
}

impl From<EngineError> for ProvisionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Unavailable(reason) => Self::EngineUnavailable(reason),
        }
    }
}

impl From<AllocationError> for ProvisionError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::Exhausted { pool } => Self::AllocationExhausted { pool },
        }
    }
}

impl From<BuildError> for ProvisionError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::IncompleteServerConfig(field) => Self::IncompleteServerConfig(field.to_string()),
            invalid @ BuildError::InvalidField { .. } => Self::InvalidServerConfig(invalid.to_string()),
        }
    }
}

impl From<DescriptorError> for ProvisionError {
    fn from(err: DescriptorError) -> Self {
        match err {
            DescriptorError::Missing(field) => Self::IncompleteServerConfig(field.to_string()),
            other => Self::InvalidServerConfig(other.to_string()),
        }
    }
}

/// Result of one configuration request
#[derive(Debug, Clone)]
pub struct GeneratedConfig {
    /// Full configuration text for the client
    pub config: TunnelConfiguration,
    /// Client public key, to be registered as a peer on the server
    pub client_public_key: PublicKey,
    /// Address bound to the client
    pub client_address: AllocatedAddress,
}

/// Keys + address + rendering, shared by all request handlers
pub struct ProvisioningService<R: CommandRunner = SystemRunner> {
    server: Arc<ServerDescriptor>,
    allocator: AddressAllocator,
    keys: KeyPairProvider<R>,
    builder: ConfigBuilder,
}

impl<R: CommandRunner> ProvisioningService<R> {
    pub fn new(server: ServerDescriptor, allocator: AddressAllocator, keys: KeyPairProvider<R>) -> Self {
        Self {
            server: Arc::new(server),
            allocator,
            keys,
            builder: ConfigBuilder::new(),
        }
    }

    /// The server every configuration points at
    pub fn server(&self) -> &ServerDescriptor {
        &self.server
    }

    pub fn allocator(&self) -> &AddressAllocator {
        &self.allocator
    }

    /// Number of clients holding an address
    pub fn allocated_count(&self) -> usize {
        self.allocator.allocated_count()
    }

    /// Generate a configuration for `identity`.
    ///
    /// Keys are minted first so an engine failure never consumes an address.
    pub async fn generate(&self, identity: &ClientIdentity) -> Result<GeneratedConfig, ProvisionError> {
        let keys = self.keys.generate().await.inspect_err(|e| {
            warn!("Key generation failed for client {}: {}", identity, e);
        })?;

        let client_address = self.allocator.allocate(identity)?;
        let config = self.builder.build(client_address, &keys, &self.server)?;

        info!("Generated config for client {} with IP {}", identity, client_address);
        info!("Client public key: {}", keys.public);

        Ok(GeneratedConfig {
            config,
            client_public_key: keys.public,
            client_address,
        })
    }
}
