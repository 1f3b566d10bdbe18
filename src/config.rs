use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the rendezvous host.
pub const MASTER_ADDR_VAR: &str = "MASTER_ADDR";
/// Environment variable holding the rendezvous port.
pub const MASTER_PORT_VAR: &str = "MASTER_PORT";
/// Environment variable selecting the rendezvous backend.
pub const BACKEND_VAR: &str = "DIST_BACKEND";
/// Environment variable holding the rendezvous timeout in seconds.
pub const TIMEOUT_VAR: &str = "DIST_TIMEOUT_SECS";

const DEFAULT_MASTER_ADDR: &str = "localhost";
const DEFAULT_MASTER_PORT: u16 = 12355;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors produced while reading the rendezvous configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but its value cannot be parsed.
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        /// Name of the variable.
        var: &'static str,
        /// The raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Error returned when parsing a [`Backend`] name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The name is neither `tcp` nor `local`.
    #[error("unknown backend {0:?}, expected `tcp` or `local`")]
    Unknown(String),
}

/// How ranks find each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Rank 0 listens on the master address; the other ranks connect to it.
    #[default]
    Tcp,
    /// Ranks are threads of this process and meet in an in-memory registry.
    Local,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Local => write!(f, "local"),
        }
    }
}

impl FromStr for Backend {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "local" => Ok(Self::Local),
            _ => Err(BackendError::Unknown(s.to_string())),
        }
    }
}

/// Where and how a process group meets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendezvousConfig {
    /// Host of the rank-0 rendezvous endpoint.
    pub master_addr: String,
    /// Port of the rank-0 rendezvous endpoint.
    pub master_port: u16,
    /// Rendezvous backend.
    pub backend: Backend,
    /// How long setup waits for the group to form.
    pub timeout: Duration,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            master_addr: DEFAULT_MASTER_ADDR.to_string(),
            master_port: DEFAULT_MASTER_PORT,
            backend: Backend::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl RendezvousConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if a variable is set to something unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the configuration from `lookup`, falling back to defaults for
    /// every variable it returns `None` for.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if a value is unparsable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup(MASTER_ADDR_VAR) {
            if addr.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    var: MASTER_ADDR_VAR,
                    value: addr,
                    reason: "address is empty".to_string(),
                });
            }
            config.master_addr = addr.trim().to_string();
        }
        if let Some(port) = lookup(MASTER_PORT_VAR) {
            config.master_port = port.trim().parse().map_err(|e: ParseIntError| {
                ConfigError::InvalidValue {
                    var: MASTER_PORT_VAR,
                    value: port.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(backend) = lookup(BACKEND_VAR) {
            config.backend = backend.parse().map_err(|e: BackendError| {
                ConfigError::InvalidValue {
                    var: BACKEND_VAR,
                    value: backend.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(secs) = lookup(TIMEOUT_VAR) {
            let invalid = |reason: String| ConfigError::InvalidValue {
                var: TIMEOUT_VAR,
                value: secs.clone(),
                reason,
            };
            let parsed: u64 = secs
                .trim()
                .parse()
                .map_err(|e: ParseIntError| invalid(e.to_string()))?;
            if parsed == 0 {
                return Err(invalid("timeout must be at least one second".to_string()));
            }
            config.timeout = Duration::from_secs(parsed);
        }

        Ok(config)
    }

    /// `master_addr:master_port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.master_addr, self.master_port)
    }
}
