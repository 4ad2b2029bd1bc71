//! Server Descriptor
//!
//! Static description of the WireGuard server that every client peers
//! with. Loaded once at startup from `server-config.json`:
//!
//! ```json
//! {
//!   "server": {
//!     "name": "Frankfurt-1",
//!     "country": "DE",
//!     "ip": "203.0.113.10",
//!     "port": 51820,
//!     "publicKey": "<base64>",
//!     "allowedIPs": "0.0.0.0/0"
//!   }
//! }
//! ```
//!
//! A missing required field is a startup error.

use serde::Deserialize;
use std::path::Path;
use tracing::info;
use wgkit_engine::PublicKey;

/// DNS server pushed to clients when the descriptor names none
pub const DEFAULT_DNS: &str = "1.1.1.1";

/// Read-only WireGuard server description shared by all allocations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    /// Display name
    pub name: String,
    /// Country code or name
    pub country: String,
    /// Public host name or IP the clients dial
    pub address: String,
    /// UDP listen port
    pub port: u16,
    /// Server's WireGuard public key
    pub public_key: PublicKey,
    /// Ranges routed through the tunnel, comma separated
    pub allowed_ranges: String,
    /// DNS server for the client interface
    pub dns: String,
}

#[derive(Deserialize)]
struct DescriptorFile {
    server: Option<RawDescriptor>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    name: Option<String>,
    country: Option<String>,
    #[serde(alias = "address")]
    ip: Option<String>,
    port: Option<u16>,
    public_key: Option<String>,
    #[serde(rename = "allowedIPs", alias = "allowedRanges")]
    allowed_ips: Option<String>,
    dns: Option<String>,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, DescriptorError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(DescriptorError::Missing(field)),
    }
}

impl RawDescriptor {
    fn validate(self) -> Result<ServerDescriptor, DescriptorError> {
        let name = required(self.name, "name")?;
        let country = required(self.country, "country")?;
        let address = required(self.ip, "ip")?;
        let port = match self.port {
            Some(p) if p != 0 => p,
            _ => return Err(DescriptorError::Missing("port")),
        };
        let public_key = required(self.public_key, "publicKey")?;
        let public_key = PublicKey::from_base64(&public_key).map_err(|e| DescriptorError::Invalid {
            field: "publicKey",
            reason: e.to_string(),
        })?;
        let allowed_ranges = required(self.allowed_ips, "allowedIPs")?;
        let dns = self
            .dns
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_DNS.to_string());

        Ok(ServerDescriptor {
            name,
            country,
            address,
            port,
            public_key,
            allowed_ranges,
            dns,
        })
    }
}

impl ServerDescriptor {
    /// Parse the `{"server": {...}}` document
    pub fn from_json(json: &str) -> Result<Self, DescriptorError> {
        let file: DescriptorFile =
            serde_json::from_str(json).map_err(|e| DescriptorError::Parse(e.to_string()))?;
        file.server
            .ok_or(DescriptorError::Missing("server"))?
            .validate()
    }

    /// Load and validate a descriptor file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DescriptorError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| DescriptorError::Io(format!("{}: {}", path.display(), e)))?;
        let descriptor = Self::from_json(&json)?;

        info!(
            "Loaded server configuration: {} ({}) at {}",
            descriptor.name,
            descriptor.country,
            descriptor.endpoint()
        );
        Ok(descriptor)
    }

    /// `host:port` as dialed by the client, bracketing IPv6 literals
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

/// Server descriptor errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("Server configuration is incomplete: missing {0}")]
    Missing(&'static str),

    #[error("Server configuration field {field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to parse server configuration: {0}")]
    Parse(String),

    #[error("Failed to read server configuration: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KEY: &str = "WDvCRKv9hVAx1P3L7dKxiNxI3CxbK9Ue1tL8x2ZqRVk=";

    fn sample_json() -> String {
        format!(
            r#"{{"server": {{"name": "Frankfurt-1", "country": "DE", "ip": "203.0.113.10",
                "port": 51820, "publicKey": "{}", "allowedIPs": "0.0.0.0/0"}}}}"#,
            KEY
        )
    }

    #[test]
    fn test_parse_descriptor() {
        let d = ServerDescriptor::from_json(&sample_json()).unwrap();

        assert_eq!(d.name, "Frankfurt-1");
        assert_eq!(d.port, 51820);
        assert_eq!(d.public_key.as_str(), KEY);
        assert_eq!(d.dns, DEFAULT_DNS);
        assert_eq!(d.endpoint(), "203.0.113.10:51820");
    }

    #[test]
    fn test_missing_fields() {
        let json = r#"{"server": {"name": "x", "country": "DE", "ip": "1.2.3.4", "port": 51820}}"#;
        assert_eq!(
            ServerDescriptor::from_json(json),
            Err(DescriptorError::Missing("publicKey"))
        );

        let json = format!(
            r#"{{"server": {{"name": "x", "country": "DE", "ip": "  ", "port": 1, "publicKey": "{}", "allowedIPs": "0.0.0.0/0"}}}}"#,
            KEY
        );
        assert_eq!(ServerDescriptor::from_json(&json), Err(DescriptorError::Missing("ip")));

        assert_eq!(ServerDescriptor::from_json("{}"), Err(DescriptorError::Missing("server")));
    }

    #[test]
    fn test_invalid_public_key() {
        let json = sample_json().replace(KEY, "not-a-key");
        assert!(matches!(
            ServerDescriptor::from_json(&json),
            Err(DescriptorError::Invalid { field: "publicKey", .. })
        ));
    }

    #[test]
    fn test_aliases_and_dns() {
        let json = format!(
            r#"{{"server": {{"name": "x", "country": "US", "address": "2001:db8::1", "port": 51820,
                "publicKey": "{}", "allowedRanges": "0.0.0.0/0, ::/0", "dns": "9.9.9.9"}}}}"#,
            KEY
        );
        let d = ServerDescriptor::from_json(&json).unwrap();

        assert_eq!(d.allowed_ranges, "0.0.0.0/0, ::/0");
        assert_eq!(d.dns, "9.9.9.9");
        assert_eq!(d.endpoint(), "[2001:db8::1]:51820");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_json().as_bytes()).unwrap();

        let d = ServerDescriptor::load(file.path()).unwrap();
        assert_eq!(d.country, "DE");

        assert!(matches!(
            ServerDescriptor::load("/nonexistent/server-config.json"),
            Err(DescriptorError::Io(_))
        ));
    }
}
