//! Client Address Allocation
//!
//! Hands every client identity one tunnel address from a fixed IPv4 pool.
//!
//! # Invariants
//!
//! - An identity keeps the same address for the allocator's lifetime.
//! - No two identities ever share an address.
//! - Indices only move forward; exhaustion is an error, never a wraparound.
//!
//! Addresses are never released. A restart of the process forgets every
//! binding.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Stable key under which one address is allocated (e.g. a user id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for ClientIdentity {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ClientIdentity {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ClientIdentity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single host address bound to one client, rendered as `a.b.c.d/32`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocatedAddress(Ipv4Addr);

impl AllocatedAddress {
    pub fn new(addr: Ipv4Addr) -> Self {
        Self(addr)
    }

    /// The bare host address
    pub fn addr(&self) -> Ipv4Addr {
        self.0
    }
}

impl fmt::Display for AllocatedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/32", self.0)
    }
}

impl Serialize for AllocatedAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// IPv4 network that client addresses are drawn from.
///
/// Host index 1 is the server's own address; clients start at index 2
/// unless configured otherwise. The broadcast address is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPool {
    network: Ipv4Addr,
    prefix_len: u8,
    first_index: u32,
}

impl AddressPool {
    /// Index of the first client address by default
    pub const DEFAULT_FIRST_INDEX: u32 = 2;

    /// Create a pool for `network/prefix_len`
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self, PoolError> {
        if prefix_len > 30 {
            return Err(PoolError::PrefixTooLong(prefix_len));
        }

        let host_bits = 32 - u32::from(prefix_len);
        let host_mask = ((1u64 << host_bits) - 1) as u32;
        if u32::from(network) & host_mask != 0 {
            return Err(PoolError::Unaligned(format!("{}/{}", network, prefix_len)));
        }

        Ok(Self {
            network,
            prefix_len,
            first_index: Self::DEFAULT_FIRST_INDEX,
        })
    }

    /// Start client allocation at a different host index
    pub fn with_first_index(mut self, first_index: u32) -> Result<Self, PoolError> {
        if first_index == 0 || first_index > self.last_index() {
            return Err(PoolError::FirstIndexOutOfRange(first_index));
        }
        self.first_index = first_index;
        Ok(self)
    }

    pub fn first_index(&self) -> u32 {
        self.first_index
    }

    /// Highest usable host index (one below broadcast)
    pub fn last_index(&self) -> u32 {
        let host_bits = 32 - u32::from(self.prefix_len);
        ((1u64 << host_bits) - 2) as u32
    }

    /// Number of client addresses the pool can hand out
    pub fn capacity(&self) -> u32 {
        self.last_index() - self.first_index + 1
    }

    /// Address at host `index`, if it lies in the client range
    pub fn address_at(&self, index: u32) -> Option<Ipv4Addr> {
        if index < self.first_index || index > self.last_index() {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.network) + index))
    }
}

impl Default for AddressPool {
    fn default() -> Self {
        Self {
            network: Ipv4Addr::new(10, 0, 0, 0),
            prefix_len: 24,
            first_index: Self::DEFAULT_FIRST_INDEX,
        }
    }
}

impl fmt::Display for AddressPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for AddressPool {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| PoolError::Parse(s.to_string()))?;
        let network: Ipv4Addr = addr.parse().map_err(|_| PoolError::Parse(s.to_string()))?;
        let prefix_len: u8 = prefix.parse().map_err(|_| PoolError::Parse(s.to_string()))?;
        Self::new(network, prefix_len)
    }
}

/// Address pool configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Invalid address pool: {0}")]
    Parse(String),

    #[error("Pool prefix /{0} leaves no room for clients")]
    PrefixTooLong(u8),

    #[error("Pool {0} has host bits set")]
    Unaligned(String),

    #[error("First client index {0} is outside the pool")]
    FirstIndexOutOfRange(u32),
}

/// Allocation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("Address pool {pool} is exhausted")]
    Exhausted { pool: String },
}

struct AllocatorState {
    bindings: HashMap<ClientIdentity, AllocatedAddress>,
    next_index: u32,
}

/// Maps client identities to unique, never-reused addresses.
///
/// Construct one per process and share it by reference; lookup, index
/// advance and recording happen under a single lock.
pub struct AddressAllocator {
    pool: AddressPool,
    state: Mutex<AllocatorState>,
}

impl AddressAllocator {
    /// Create an allocator over `pool`
    pub fn new(pool: AddressPool) -> Self {
        Self {
            pool,
            state: Mutex::new(AllocatorState {
                bindings: HashMap::new(),
                next_index: pool.first_index(),
            }),
        }
    }

    pub fn pool(&self) -> AddressPool {
        self.pool
    }

    /// Return the address bound to `identity`, allocating one on first use
    pub fn allocate(&self, identity: &ClientIdentity) -> Result<AllocatedAddress, AllocationError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = state.bindings.get(identity) {
            debug!("Client {} already has IP: {}", identity, existing);
            return Ok(*existing);
        }

        let Some(addr) = self.pool.address_at(state.next_index) else {
            warn!(
                "Address pool {} exhausted ({} clients)",
                self.pool,
                state.bindings.len()
            );
            return Err(AllocationError::Exhausted {
                pool: self.pool.to_string(),
            });
        };

        let allocated = AllocatedAddress::new(addr);
        state.next_index += 1;
        state.bindings.insert(identity.clone(), allocated);

        info!("Allocated IP {} to client {}", allocated, identity);
        Ok(allocated)
    }

    /// Address already bound to `identity`, without allocating
    pub fn lookup(&self, identity: &ClientIdentity) -> Option<AllocatedAddress> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.bindings.get(identity).copied()
    }

    /// Number of identities holding an address
    pub fn allocated_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.bindings.len()
    }
}

impl Default for AddressAllocator {
    fn default() -> Self {
        Self::new(AddressPool::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequential_allocation() {
        let allocator = AddressAllocator::default();

        let a = allocator.allocate(&"u1".into()).unwrap();
        let b = allocator.allocate(&"u2".into()).unwrap();
        let c = allocator.allocate(&"u1".into()).unwrap();

        assert_eq!(a.to_string(), "10.0.0.2/32");
        assert_eq!(b.to_string(), "10.0.0.3/32");
        assert_eq!(c.to_string(), "10.0.0.2/32");
        assert_eq!(allocator.allocated_count(), 2);
    }

    #[test]
    fn test_repeat_requests_are_idempotent() {
        let allocator = AddressAllocator::default();
        let id = ClientIdentity::from(42u64);

        let first = allocator.allocate(&id).unwrap();
        for _ in 0..10 {
            assert_eq!(allocator.allocate(&id).unwrap(), first);
        }

        // The counter did not move for repeats
        let other = allocator.allocate(&ClientIdentity::from(43u64)).unwrap();
        assert_eq!(other.addr(), Ipv4Addr::new(10, 0, 0, 3));
    }

    #[test]
    fn test_lookup() {
        let allocator = AddressAllocator::default();
        let id = ClientIdentity::new("alice");

        assert_eq!(allocator.lookup(&id), None);
        let addr = allocator.allocate(&id).unwrap();
        assert_eq!(allocator.lookup(&id), Some(addr));
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let pool: AddressPool = "192.168.7.0/29".parse().unwrap();
        assert_eq!(pool.capacity(), 5); // .2 through .6

        let allocator = AddressAllocator::new(pool);
        for i in 0..5u64 {
            allocator.allocate(&i.into()).unwrap();
        }

        let err = allocator.allocate(&99u64.into()).unwrap_err();
        assert_eq!(
            err,
            AllocationError::Exhausted {
                pool: "192.168.7.0/29".to_string()
            }
        );

        // Existing bindings still resolve after exhaustion
        assert_eq!(
            allocator.allocate(&0u64.into()).unwrap().addr(),
            Ipv4Addr::new(192, 168, 7, 2)
        );
    }

    #[test]
    fn test_default_pool_stops_before_broadcast() {
        let pool = AddressPool::default();

        assert_eq!(pool.address_at(254), Some(Ipv4Addr::new(10, 0, 0, 254)));
        assert_eq!(pool.address_at(255), None);
        assert_eq!(pool.address_at(1), None);
        assert_eq!(pool.capacity(), 253);
    }

    #[test]
    fn test_pool_parsing() {
        assert!("10.0.0.0/24".parse::<AddressPool>().is_ok());
        assert!(matches!("10.0.0.1/24".parse::<AddressPool>(), Err(PoolError::Unaligned(_))));
        assert!(matches!("10.0.0.0/31".parse::<AddressPool>(), Err(PoolError::PrefixTooLong(31))));
        assert!(matches!("10.0.0.0".parse::<AddressPool>(), Err(PoolError::Parse(_))));
        assert!(matches!(
            AddressPool::default().with_first_index(255),
            Err(PoolError::FirstIndexOutOfRange(255))
        ));
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let allocator = Arc::new(AddressAllocator::new("10.8.0.0/16".parse().unwrap()));

        // Every identity is requested by several threads at once
        let results: Vec<(ClientIdentity, AllocatedAddress)> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let allocator = allocator.clone();
                    s.spawn(move || {
                        (0..200u64)
                            .map(|i| {
                                let id = ClientIdentity::from(i);
                                let addr = allocator.allocate(&id).unwrap();
                                (id, addr)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let mut by_identity: HashMap<ClientIdentity, AllocatedAddress> = HashMap::new();
        for (id, addr) in results {
            let previous = by_identity.entry(id).or_insert(addr);
            assert_eq!(*previous, addr);
        }

        let distinct: HashSet<_> = by_identity.values().collect();
        assert_eq!(distinct.len(), 200);
        assert_eq!(allocator.allocated_count(), 200);
    }
}
