//! WireGuard Key Management
//!
//! Key pairs are minted by the external `wg` tool. This module holds the
//! key types and the [`KeyPairProvider`] that drives `wg genkey` / `wg pubkey`.

use crate::command::{CommandRunner, Invocation, SystemRunner};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

/// Length of a raw Curve25519 key
pub const KEY_LEN: usize = 32;

/// Decode a base64 key and check its length
fn decode_key(s: &str) -> Result<[u8; KEY_LEN], KeyError> {
    let bytes = BASE64.decode(s.trim()).map_err(|_| KeyError::InvalidBase64)?;

    if bytes.len() != KEY_LEN {
        return Err(KeyError::InvalidLength);
    }

    let mut arr = [0u8; KEY_LEN];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// WireGuard private key, kept in its base64 wire form.
///
/// Never logged: `Debug` is redacted and there is no `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    encoded: String,
}

impl PrivateKey {
    /// Wrap an encoded key without validating it
    pub fn new(encoded: impl Into<String>) -> Self {
        Self {
            encoded: encoded.into(),
        }
    }

    /// Parse a base64 string, checking it decodes to 32 bytes
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode_key(s)?;
        Ok(Self::new(s.trim()))
    }

    /// Base64 text as it appears in a configuration file
    pub fn expose(&self) -> &str {
        &self.encoded
    }

    /// Derive the matching public key locally
    pub fn derive_public(&self) -> Result<PublicKey, KeyError> {
        let secret = StaticSecret::from(decode_key(&self.encoded)?);
        let public = X25519Public::from(&secret);
        Ok(PublicKey::new(BASE64.encode(public.to_bytes())))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([redacted])")
    }
}

/// WireGuard public key in base64 form
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    encoded: String,
}

impl PublicKey {
    /// Wrap an encoded key without validating it
    pub fn new(encoded: impl Into<String>) -> Self {
        Self {
            encoded: encoded.into(),
        }
    }

    /// Parse a base64 string, checking it decodes to 32 bytes
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode_key(s)?;
        Ok(Self::new(s.trim()))
    }

    /// Base64 text
    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.encoded.chars().take(8).collect();
        write!(f, "PublicKey({}...)", prefix)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encoded)
    }
}

/// A key pair (private + public)
#[derive(Clone)]
pub struct KeyPair {
    pub private: PrivateKey,
    pub public: PublicKey,
}

impl KeyPair {
    /// Assemble from parts
    pub fn new(private: PrivateKey, public: PublicKey) -> Self {
        Self { private, public }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish()
    }
}

/// Key parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid base64 encoding")]
    InvalidBase64,

    #[error("Invalid key length (expected 32 bytes)")]
    InvalidLength,
}

/// Tunnel engine failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("WireGuard engine unavailable: {0}")]
    Unavailable(String),
}

/// Mints fresh key pairs with the `wg` tool.
///
/// Every call to [`generate`](Self::generate) spawns the engine again;
/// nothing is cached.
pub struct KeyPairProvider<R: CommandRunner = SystemRunner> {
    runner: Arc<R>,
    program: String,
}

impl KeyPairProvider<SystemRunner> {
    /// Provider backed by the system `wg` binary
    pub fn system() -> Self {
        Self::new(Arc::new(SystemRunner))
    }
}

impl<R: CommandRunner> KeyPairProvider<R> {
    /// Create a provider that runs `wg` through `runner`
    pub fn new(runner: Arc<R>) -> Self {
        Self {
            runner,
            program: "wg".to_string(),
        }
    }

    /// Use a different engine binary (e.g. an absolute path)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Generate a new key pair
    pub async fn generate(&self) -> Result<KeyPair, EngineError> {
        debug!("Generating WireGuard key pair");

        let private_text = self.invoke(Invocation::new(&self.program).arg("genkey")).await?;
        let private = PrivateKey::from_base64(&private_text)
            .map_err(|e| self.malformed("genkey", e))?;

        let public_text = self
            .invoke(
                Invocation::new(&self.program)
                    .arg("pubkey")
                    .stdin(private.expose()),
            )
            .await?;
        let public = PublicKey::from_base64(&public_text)
            .map_err(|e| self.malformed("pubkey", e))?;

        // The engine's public key must be the X25519 derivation of its private key
        let derived = private.derive_public().map_err(|e| self.malformed("genkey", e))?;
        if derived != public {
            error!("Engine returned a public key that does not match its private key");
            return Err(EngineError::Unavailable(
                "engine returned mismatched key pair".to_string(),
            ));
        }

        debug!("Key pair generated ({:?})", public);
        Ok(KeyPair::new(private, public))
    }

    async fn invoke(&self, invocation: Invocation) -> Result<String, EngineError> {
        let output = self.runner.run(&invocation).await.map_err(|e| {
            error!("Failed to run {}: {}", invocation.program, e);
            EngineError::Unavailable(format!(
                "failed to run {} ({}); ensure WireGuard is installed",
                invocation.program, e
            ))
        })?;

        if !output.success() {
            let reason = output.failure_reason();
            error!("{} failed: {}", invocation.display(), reason);
            return Err(EngineError::Unavailable(format!(
                "{} failed: {}",
                invocation.display(),
                reason
            )));
        }

        Ok(output.stdout.trim().to_string())
    }

    fn malformed(&self, step: &str, err: KeyError) -> EngineError {
        error!("Malformed output from {} {}: {}", self.program, step, err);
        EngineError::Unavailable(format!("malformed output from {} {}: {}", self.program, step, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use std::io;
    use std::sync::Mutex;

    /// Replays canned results and records what was run
    struct FakeWg {
        responses: Mutex<Vec<io::Result<CommandOutput>>>,
        seen: Mutex<Vec<Invocation>>,
    }

    impl FakeWg {
        fn new(responses: Vec<io::Result<CommandOutput>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl CommandRunner for FakeWg {
        async fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
            self.seen.lock().unwrap().push(invocation.clone());
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn sample_private() -> String {
        BASE64.encode([7u8; 32])
    }

    #[test]
    fn test_key_validation() {
        assert!(PrivateKey::from_base64(&sample_private()).is_ok());
        assert_eq!(
            PublicKey::from_base64("not-valid-base64!!!"),
            Err(KeyError::InvalidBase64)
        );
        assert_eq!(
            PublicKey::from_base64(&BASE64.encode([1u8; 16])),
            Err(KeyError::InvalidLength)
        );
    }

    #[test]
    fn test_private_key_is_redacted() {
        let key = PrivateKey::new(sample_private());
        let pair = KeyPair::new(key.clone(), key.derive_public().unwrap());

        assert!(!format!("{:?}", key).contains(&sample_private()));
        assert!(!format!("{:?}", pair).contains(&sample_private()));
    }

    #[test]
    fn test_derive_public_is_stable() {
        let key = PrivateKey::new(sample_private());
        assert_eq!(key.derive_public().unwrap(), key.derive_public().unwrap());
    }

    #[tokio::test]
    async fn test_generate_uses_genkey_then_pubkey() {
        let private = sample_private();
        let public = PrivateKey::new(private.clone()).derive_public().unwrap();
        let fake = FakeWg::new(vec![
            Ok(CommandOutput::ok(format!("{}\n", private))),
            Ok(CommandOutput::ok(format!("{}\n", public))),
        ]);

        let pair = KeyPairProvider::new(fake.clone()).generate().await.unwrap();

        assert_eq!(pair.private.expose(), private);
        assert_eq!(pair.public, public);

        let seen = fake.seen.lock().unwrap();
        assert_eq!(seen[0].args, vec!["genkey"]);
        assert_eq!(seen[1].args, vec!["pubkey"]);
        assert_eq!(seen[1].stdin.as_deref(), Some(private.as_str()));
    }

    #[tokio::test]
    async fn test_engine_not_installed() {
        let fake = FakeWg::new(vec![Err(io::Error::new(io::ErrorKind::NotFound, "no wg"))]);

        let result = KeyPairProvider::new(fake).generate().await;
        assert!(matches!(result, Err(EngineError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_engine_nonzero_exit() {
        let fake = FakeWg::new(vec![Ok(CommandOutput::failed(1, "boom"))]);

        let result = KeyPairProvider::new(fake).generate().await;
        assert!(matches!(result, Err(EngineError::Unavailable(msg)) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn test_engine_malformed_output() {
        let fake = FakeWg::new(vec![Ok(CommandOutput::ok("Usage: wg <cmd>"))]);

        let result = KeyPairProvider::new(fake).generate().await;
        assert!(matches!(result, Err(EngineError::Unavailable(msg)) if msg.contains("malformed")));
    }

    #[tokio::test]
    async fn test_engine_mismatched_pair() {
        let other = PrivateKey::new(BASE64.encode([9u8; 32])).derive_public().unwrap();
        let fake = FakeWg::new(vec![
            Ok(CommandOutput::ok(sample_private())),
            Ok(CommandOutput::ok(other.to_string())),
        ]);

        let result = KeyPairProvider::new(fake).generate().await;
        assert!(matches!(result, Err(EngineError::Unavailable(msg)) if msg.contains("mismatched")));
    }
}
