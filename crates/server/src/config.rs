//! Service configuration.
//!
//! A single JSON document declares the listeners, the store location and
//! the chain parameters. Without `--configfile` the built-in default
//! below applies: one syslog UDP listener, one plain REST listener and a
//! local store file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Configuration used when no config file is given.
pub const DEFAULT_CONFIG: &str = r#"
{
    "services": [
        {
            "type": "syslog",
            "listen": "127.0.0.1:10514",
            "protocol": "udp"
        },
        {
            "type": "rest",
            "listen": "127.0.0.1:10080",
            "protocol": "tcp"
        }
    ],
    "db": {
        "path": "slogger.db",
        "collection": "logitems"
    }
}
"#;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("bad option: {0}")]
    BadOption(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub services: Vec<ServiceConfig>,
    pub db: DbConfig,
    #[serde(default)]
    pub chain: ChainConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Syslog,
    Rest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub listen: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub certpath: Option<PathBuf>,
    #[serde(default)]
    pub keypath: Option<PathBuf>,
    #[serde(default)]
    pub cacertpath: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn tls_enabled(&self) -> bool {
        self.certpath.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbConfig {
    /// SQLite database path; `:memory:` is accepted for throwaway runs.
    pub path: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

/// Chain parameters. The shared secret keys the canonical hash; the shard
/// group scopes the sequence space.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    #[serde(default = "default_secret")]
    pub secret: String,
    #[serde(default = "default_shard_group")]
    pub shard_group: i32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            secret: default_secret(),
            shard_group: default_shard_group(),
        }
    }
}

fn default_collection() -> String {
    "logitems".to_string()
}

fn default_secret() -> String {
    "sekritsquirrel".to_string()
}

fn default_shard_group() -> i32 {
    1234
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn built_in() -> Self {
        Self::from_json(DEFAULT_CONFIG).expect("built-in default config is valid")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.services.is_empty() {
            return Err(ConfigError::BadOption(
                "at least one service is required".to_string(),
            ));
        }
        for service in &self.services {
            service.validate()?;
        }
        if !is_identifier(&self.db.collection) {
            return Err(ConfigError::BadOption(format!(
                "collection name {:?} is not a valid identifier",
                self.db.collection
            )));
        }
        Ok(())
    }
}

impl ServiceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.listen.parse::<SocketAddr>().map_err(|_| {
            ConfigError::BadOption(format!("listen address {:?} is not host:port", self.listen))
        })?;
        if self.service_type == ServiceType::Rest && self.protocol != Protocol::Tcp {
            return Err(ConfigError::BadOption(
                "rest service can only run over tcp".to_string(),
            ));
        }
        let any_tls = self.certpath.is_some() || self.keypath.is_some() || self.cacertpath.is_some();
        if any_tls {
            if self.protocol != Protocol::Tcp {
                return Err(ConfigError::BadOption(
                    "tls can only run over tcp".to_string(),
                ));
            }
            if self.certpath.is_none() || self.keypath.is_none() {
                return Err(ConfigError::BadOption(
                    "tls needs both a keypath and a certpath".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// The collection name is interpolated into SQL as an identifier, so it
/// must stay inside the safe character set.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_default_parses() {
        let config = Config::built_in();
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].service_type, ServiceType::Syslog);
        assert_eq!(config.services[0].protocol, Protocol::Udp);
        assert_eq!(config.services[1].service_type, ServiceType::Rest);
        assert_eq!(config.db.collection, "logitems");
        assert_eq!(config.chain.secret, "sekritsquirrel");
        assert_eq!(config.chain.shard_group, 1234);
    }

    #[test]
    fn rest_requires_tcp() {
        let raw = r#"{
            "services": [{"type": "rest", "listen": "127.0.0.1:1", "protocol": "udp"}],
            "db": {"path": ":memory:"}
        }"#;
        let err = Config::from_json(raw).unwrap_err();
        assert!(matches!(err, ConfigError::BadOption(_)));
    }

    #[test]
    fn tls_requires_both_cert_and_key() {
        let raw = r#"{
            "services": [{
                "type": "syslog", "listen": "127.0.0.1:1", "protocol": "tcp",
                "certpath": "/tmp/cert.pem"
            }],
            "db": {"path": ":memory:"}
        }"#;
        let err = Config::from_json(raw).unwrap_err();
        assert!(matches!(err, ConfigError::BadOption(_)));
    }

    #[test]
    fn tls_requires_tcp() {
        let raw = r#"{
            "services": [{
                "type": "syslog", "listen": "127.0.0.1:1", "protocol": "udp",
                "certpath": "/tmp/cert.pem", "keypath": "/tmp/key.pem"
            }],
            "db": {"path": ":memory:"}
        }"#;
        let err = Config::from_json(raw).unwrap_err();
        assert!(matches!(err, ConfigError::BadOption(_)));
    }

    #[test]
    fn bad_listen_address_is_rejected() {
        let raw = r#"{
            "services": [{"type": "syslog", "listen": "nonsense", "protocol": "udp"}],
            "db": {"path": ":memory:"}
        }"#;
        assert!(Config::from_json(raw).is_err());
    }

    #[test]
    fn collection_name_must_be_an_identifier() {
        let raw = r#"{
            "services": [{"type": "syslog", "listen": "127.0.0.1:1", "protocol": "udp"}],
            "db": {"path": ":memory:", "collection": "drop table;--"}
        }"#;
        assert!(Config::from_json(raw).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = r#"{
            "services": [{"type": "syslog", "listen": "127.0.0.1:1", "protocol": "udp"}],
            "db": {"path": ":memory:"},
            "mystery": 1
        }"#;
        assert!(Config::from_json(raw).is_err());
    }
}
