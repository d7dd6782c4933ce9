use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_BIND: ([u8; 4], u16) = ([0, 0, 0, 0], 2052);
const DEFAULT_OUTBOUND_BUFFER: usize = 256;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {key} {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Relay settings, read from `RELAY_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `RELAY_BIND`
    pub bind: SocketAddr,
    /// `RELAY_OUTBOUND_BUFFER`: frames queued per connection before new
    /// ones are dropped for it.
    pub outbound_buffer: usize,
    /// `RELAY_STATIC_DIR`
    pub static_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: SocketAddr::from(DEFAULT_BIND),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            static_dir: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(value) = lookup("RELAY_BIND") {
            config.bind = value.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::Invalid {
                    key: "RELAY_BIND",
                    reason: e.to_string(),
                    value,
                }
            })?;
        }

        if let Some(value) = lookup("RELAY_OUTBOUND_BUFFER") {
            config.outbound_buffer = match value.parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        key: "RELAY_OUTBOUND_BUFFER",
                        value,
                        reason: "must be greater than zero".to_string(),
                    })
                }
                Ok(n) => n,
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        key: "RELAY_OUTBOUND_BUFFER",
                        reason: e.to_string(),
                        value,
                    })
                }
            };
        }

        config.static_dir = lookup("RELAY_STATIC_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.bind.port(), 2052);
        assert_eq!(config.outbound_buffer, 256);
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("RELAY_BIND", "127.0.0.1:9000"),
            ("RELAY_OUTBOUND_BUFFER", "8"),
            ("RELAY_STATIC_DIR", "public"),
        ])
        .unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.outbound_buffer, 8);
        assert_eq!(config.static_dir, Some(PathBuf::from("public")));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            load(&[("RELAY_BIND", "not-an-address")]),
            Err(ConfigError::Invalid { key: "RELAY_BIND", .. })
        ));
        assert!(load(&[("RELAY_OUTBOUND_BUFFER", "0")]).is_err());
        assert!(load(&[("RELAY_OUTBOUND_BUFFER", "lots")]).is_err());
    }
}
