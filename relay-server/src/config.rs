use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has invalid value `{value}`")]
    Invalid { var: &'static str, value: String },
}

/// Server settings, read from `RELAY_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Connections beyond this many are closed right after the upgrade.
    pub roster_limit: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 80,
            roster_limit: 256,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bind: parse_var(&lookup, "RELAY_BIND")?.unwrap_or(defaults.bind),
            port: parse_var(&lookup, "RELAY_PORT")?.unwrap_or(defaults.port),
            roster_limit: parse_var(&lookup, "RELAY_ROSTER_LIMIT")?.unwrap_or(defaults.roster_limit),
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
