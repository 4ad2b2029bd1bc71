//! Server settings from the environment

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use wgkit_provision::AddressPool;

/// Secret used when `JWT_SECRET` is unset; startup warns loudly about it
pub const DEFAULT_JWT_SECRET: &str = "default_secret_change_in_production";

#[derive(Debug, Clone)]
pub struct Settings {
    /// Listen address (`BIND_ADDRESS`, default 0.0.0.0)
    pub bind_address: String,
    /// Listen port (`PORT`, default 3000)
    pub port: u16,
    /// Token signing secret (`JWT_SECRET`)
    pub jwt_secret: String,
    /// User list (`USERS_FILE`, default users.json)
    pub users_file: PathBuf,
    /// Server descriptor (`SERVER_CONFIG_FILE`, default server-config.json)
    pub server_config_file: PathBuf,
    /// Client address pool (`ADDRESS_POOL`, default 10.0.0.0/24)
    pub address_pool: AddressPool,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match lookup("PORT") {
            Some(p) => p.parse().with_context(|| format!("invalid PORT {:?}", p))?,
            None => 3000,
        };
        let address_pool = match lookup("ADDRESS_POOL") {
            Some(p) => p.parse().with_context(|| format!("invalid ADDRESS_POOL {:?}", p))?,
            None => AddressPool::default(),
        };

        Ok(Self {
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            jwt_secret: lookup("JWT_SECRET").unwrap_or_else(|| DEFAULT_JWT_SECRET.to_string()),
            users_file: lookup("USERS_FILE").unwrap_or_else(|| "users.json".to_string()).into(),
            server_config_file: lookup("SERVER_CONFIG_FILE")
                .unwrap_or_else(|| "server-config.json".to_string())
                .into(),
            address_pool,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .with_context(|| format!("invalid BIND_ADDRESS {:?}", self.bind_address))
    }

    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();

        assert_eq!(settings.port, 3000);
        assert!(settings.uses_default_secret());
        assert_eq!(settings.address_pool, AddressPool::default());
        assert_eq!(settings.socket_addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("JWT_SECRET", "s3cret"),
            ("ADDRESS_POOL", "10.8.0.0/16"),
            ("BIND_ADDRESS", "127.0.0.1"),
        ]))
        .unwrap();

        assert_eq!(settings.socket_addr().unwrap().to_string(), "127.0.0.1:8080");
        assert!(!settings.uses_default_secret());
        assert_eq!(settings.address_pool.to_string(), "10.8.0.0/16");
    }

    #[test]
    fn test_invalid_values() {
        assert!(Settings::from_lookup(lookup(&[("PORT", "http")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("ADDRESS_POOL", "10.0.0.1/24")])).is_err());
    }
}
