//! wgkit provision - addresses, keys and configuration for VPN clients
//!
//! # Data flow
//!
//! ```text
//! client identity ──▶ AddressAllocator ──▶ 10.0.0.N/32 ─┐
//!                                                        ├──▶ ConfigBuilder ──▶ [Interface]/[Peer] text
//! KeyPairProvider (wg genkey/pubkey) ──▶ key pair ───────┤
//!                                                        │
//! server-config.json ──▶ ServerDescriptor ───────────────┘
//! ```
//!
//! [`ProvisioningService`] ties the pieces together behind one call.

mod allocator;
mod builder;
mod descriptor;
mod service;

pub use allocator::{
    AddressAllocator, AddressPool, AllocatedAddress, AllocationError, ClientIdentity, PoolError,
};
pub use builder::{BuildError, ConfigBuilder, TunnelConfiguration, PERSISTENT_KEEPALIVE_SECS};
pub use descriptor::{DescriptorError, ServerDescriptor, DEFAULT_DNS};
pub use service::{GeneratedConfig, ProvisionError, ProvisioningService};
