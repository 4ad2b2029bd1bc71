//! Tunnel Configuration Rendering
//!
//! Produces the INI-style text that `wg-quick` and `wireguard.exe` consume:
//!
//! ```text
//! [Interface]
//! PrivateKey = <client private key>
//! Address = 10.0.0.2/32
//! DNS = 1.1.1.1
//!
//! [Peer]
//! PublicKey = <server public key>
//! Endpoint = 203.0.113.10:51820
//! AllowedIPs = 0.0.0.0/0
//! PersistentKeepalive = 25
//! ```

use crate::allocator::AllocatedAddress;
use crate::descriptor::ServerDescriptor;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use wgkit_engine::KeyPair;

/// Keepalive interval written to every peer section (seconds)
pub const PERSISTENT_KEEPALIVE_SECS: u16 = 25;

/// Rendered configuration text for one client.
///
/// Contains the client's private key, so `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct TunnelConfiguration {
    text: String,
}

impl TunnelConfiguration {
    /// The full configuration file contents
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Debug for TunnelConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TunnelConfiguration([redacted], {} bytes)", self.text.len())
    }
}

/// Configuration rendering errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("Server configuration is incomplete: missing {0}")]
    IncompleteServerConfig(&'static str),

    #[error("Field {field} cannot be written to the configuration: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Renders allocated address + key pair + server into configuration text
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigBuilder;

impl ConfigBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build the configuration text.
    ///
    /// Output depends only on the inputs; the private key is the only part
    /// that differs between calls for the same client.
    pub fn build(
        &self,
        address: AllocatedAddress,
        keys: &KeyPair,
        server: &ServerDescriptor,
    ) -> Result<TunnelConfiguration, BuildError> {
        let private_key = value("PrivateKey", keys.private.expose())?;
        let dns = value("DNS", &server.dns)?;
        let public_key = value("PublicKey", server.public_key.as_str())?;
        let host = value("Endpoint", &server.address)?;
        check_host(host)?;
        if server.port == 0 {
            return Err(BuildError::IncompleteServerConfig("port"));
        }
        let allowed = value("AllowedIPs", &server.allowed_ranges)?;
        check_ranges(allowed)?;

        let text = format!(
            "[Interface]\n\
             PrivateKey = {private_key}\n\
             Address = {address}\n\
             DNS = {dns}\n\
             \n\
             [Peer]\n\
             PublicKey = {public_key}\n\
             Endpoint = {endpoint}\n\
             AllowedIPs = {allowed}\n\
             PersistentKeepalive = {PERSISTENT_KEEPALIVE_SECS}\n",
            endpoint = server.endpoint(),
        );

        Ok(TunnelConfiguration { text })
    }
}

/// Trim a value and reject anything that would break a `Key = Value` line
fn value<'a>(field: &'static str, raw: &'a str) -> Result<&'a str, BuildError> {
    let v = raw.trim();
    if v.is_empty() {
        return Err(BuildError::IncompleteServerConfig(field));
    }
    let forbidden = |c: &char| c.is_control() || *c == '#' || (*c == '[' && field != "Endpoint");
    if let Some(c) = v.chars().find(forbidden) {
        return Err(BuildError::InvalidField {
            field,
            reason: format!("contains forbidden character {:?}", c),
        });
    }
    Ok(v)
}

/// Host must be an IP literal or a DNS name. Brackets are only allowed as
/// a matched pair around an IPv6 literal.
fn check_host(host: &str) -> Result<(), BuildError> {
    let valid = match host.strip_prefix('[') {
        Some(rest) => rest
            .strip_suffix(']')
            .is_some_and(|inner| inner.parse::<Ipv6Addr>().is_ok()),
        None => host.parse::<IpAddr>().is_ok() || is_dns_name(host),
    };
    if valid {
        Ok(())
    } else {
        Err(BuildError::InvalidField {
            field: "Endpoint",
            reason: format!("{:?} is not a host name or IP address", host),
        })
    }
}

fn is_dns_name(host: &str) -> bool {
    host.split('.')
        .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
}

/// Each comma separated entry must be `ip/prefix`
fn check_ranges(ranges: &str) -> Result<(), BuildError> {
    for range in ranges.split(',').map(str::trim) {
        let valid = range.split_once('/').is_some_and(|(ip, prefix)| {
            match (ip.parse::<IpAddr>(), prefix.parse::<u8>()) {
                (Ok(IpAddr::V4(_)), Ok(p)) => p <= 32,
                (Ok(IpAddr::V6(_)), Ok(p)) => p <= 128,
                _ => false,
            }
        });
        if !valid {
            return Err(BuildError::InvalidField {
                field: "AllowedIPs",
                reason: format!("{:?} is not a CIDR range", range),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use wgkit_engine::{PrivateKey, PublicKey};

    fn server() -> ServerDescriptor {
        ServerDescriptor {
            name: "test".into(),
            country: "DE".into(),
            address: "1.2.3.4".into(),
            port: 51820,
            public_key: PublicKey::new("S"),
            allowed_ranges: "0.0.0.0/0".into(),
            dns: "1.1.1.1".into(),
        }
    }

    fn keys(private: &str) -> KeyPair {
        KeyPair::new(PrivateKey::new(private), PublicKey::new("C"))
    }

    fn addr() -> AllocatedAddress {
        AllocatedAddress::new(Ipv4Addr::new(10, 0, 0, 2))
    }

    #[test]
    fn test_exact_output() {
        let config = ConfigBuilder::new().build(addr(), &keys("P"), &server()).unwrap();

        assert_eq!(
            config.as_str(),
            "[Interface]\n\
             PrivateKey = P\n\
             Address = 10.0.0.2/32\n\
             DNS = 1.1.1.1\n\
             \n\
             [Peer]\n\
             PublicKey = S\n\
             Endpoint = 1.2.3.4:51820\n\
             AllowedIPs = 0.0.0.0/0\n\
             PersistentKeepalive = 25\n"
        );
    }

    #[test]
    fn test_only_private_key_varies() {
        let builder = ConfigBuilder::new();
        let a = builder.build(addr(), &keys("P1"), &server()).unwrap();
        let b = builder.build(addr(), &keys("P1"), &server()).unwrap();
        let c = builder.build(addr(), &keys("P2"), &server()).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.as_str().replace("P1", "P2"), c.as_str());
    }

    #[test]
    fn test_debug_is_redacted() {
        let config = ConfigBuilder::new().build(addr(), &keys("SECRET"), &server()).unwrap();
        assert!(!format!("{:?}", config).contains("SECRET"));
    }

    #[test]
    fn test_missing_fields() {
        let mut s = server();
        s.public_key = PublicKey::new("");
        assert_eq!(
            ConfigBuilder::new().build(addr(), &keys("P"), &s),
            Err(BuildError::IncompleteServerConfig("PublicKey"))
        );

        let mut s = server();
        s.port = 0;
        assert_eq!(
            ConfigBuilder::new().build(addr(), &keys("P"), &s),
            Err(BuildError::IncompleteServerConfig("port"))
        );
    }

    #[test]
    fn test_rejects_injected_lines() {
        let mut s = server();
        s.allowed_ranges = "0.0.0.0/0\nPostUp = rm -rf /".into();
        assert!(matches!(
            ConfigBuilder::new().build(addr(), &keys("P"), &s),
            Err(BuildError::InvalidField { field: "AllowedIPs", .. })
        ));

        let mut s = server();
        s.address = "evil.example.com:1\n[Interface]".into();
        assert!(matches!(
            ConfigBuilder::new().build(addr(), &keys("P"), &s),
            Err(BuildError::InvalidField { field: "Endpoint", .. })
        ));

        assert!(matches!(
            ConfigBuilder::new().build(addr(), &keys("P\r\nDNS = 6.6.6.6"), &server()),
            Err(BuildError::InvalidField { field: "PrivateKey", .. })
        ));
    }

    #[test]
    fn test_host_and_ranges() {
        let mut s = server();
        s.address = "vpn.example.com".into();
        s.allowed_ranges = "0.0.0.0/0, ::/0".into();
        let config = ConfigBuilder::new().build(addr(), &keys("P"), &s).unwrap();

        assert!(config.as_str().contains("Endpoint = vpn.example.com:51820\n"));
        assert!(config.as_str().contains("AllowedIPs = 0.0.0.0/0, ::/0\n"));

        s.allowed_ranges = "0.0.0.0/33".into();
        assert!(ConfigBuilder::new().build(addr(), &keys("P"), &s).is_err());
    }

    #[test]
    fn test_endpoint_brackets() {
        let mut s = server();
        for (host, endpoint) in [
            ("2001:db8::1", "[2001:db8::1]:51820"),
            ("[2001:db8::1]", "[2001:db8::1]:51820"),
        ] {
            s.address = host.into();
            let config = ConfigBuilder::new().build(addr(), &keys("P"), &s).unwrap();
            assert!(config.as_str().contains(&format!("Endpoint = {}\n", endpoint)));
        }

        for host in [
            "vpn.example.com]",
            "[vpn.example.com",
            "[1.2.3.4]",
            "[2001:db8::1",
            "2001:db8::1]",
            "[]",
        ] {
            s.address = host.into();
            assert!(
                matches!(
                    ConfigBuilder::new().build(addr(), &keys("P"), &s),
                    Err(BuildError::InvalidField { field: "Endpoint", .. })
                ),
                "{} should be rejected",
                host
            );
        }
    }
}
