//! wgkit engine - plumbing around the external WireGuard tools
//!
//! The tunnel's cryptographic engine (`wg`, `wg-quick`, `wireguard.exe`) is
//! an opaque external program. This crate owns how it is invoked:
//!
//! - [`CommandRunner`]: argument-vector process execution, swappable in tests
//! - [`KeyPairProvider`]: fresh key pairs from `wg genkey` / `wg pubkey`

mod command;
mod keys;

pub use command::{CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use keys::{EngineError, KeyError, KeyPair, KeyPairProvider, PrivateKey, PublicKey, KEY_LEN};
