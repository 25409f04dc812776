//! Server addresses and authentication tokens

use arbor_core::{DriverError, DriverResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Port used when an address string carries none
pub const DEFAULT_PORT: u16 = 7687;

/// Network location of one cluster member
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    /// Create an address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or IP
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddress {
    type Err = DriverError;

    /// Parse `host[:port]`
    fn from_str(s: &str) -> DriverResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DriverError::InvalidConfig {
                reason: "empty server address".to_string(),
            });
        }
        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(DriverError::InvalidConfig {
                        reason: format!("missing host in address '{}'", s),
                    });
                }
                let port = port.parse::<u16>().map_err(|e| DriverError::InvalidConfig {
                    reason: format!("invalid port in address '{}': {}", s, e),
                })?;
                Ok(ServerAddress::new(host, port))
            }
            None => Ok(ServerAddress::new(s, DEFAULT_PORT)),
        }
    }
}

impl TryFrom<String> for ServerAddress {
    type Error = DriverError;

    fn try_from(s: String) -> DriverResult<Self> {
        s.parse()
    }
}

impl From<ServerAddress> for String {
    fn from(a: ServerAddress) -> Self {
        a.to_string()
    }
}

/// Credentials presented when a connection is opened
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    /// Authentication scheme, e.g. `"basic"` or `"none"`
    pub scheme: String,
    /// User name
    pub principal: Option<String>,
    /// Secret
    pub credentials: Option<String>,
}

impl AuthToken {
    /// No authentication
    pub fn none() -> Self {
        Self {
            scheme: "none".to_string(),
            principal: None,
            credentials: None,
        }
    }

    /// User name and password
    pub fn basic(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            scheme: "basic".to_string(),
            principal: Some(user.into()),
            credentials: Some(password.into()),
        }
    }
}

impl Default for AuthToken {
    fn default() -> Self {
        Self::none()
    }
}

// Never print the secret
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("scheme", &self.scheme)
            .field("principal", &self.principal)
            .field("credentials", &self.credentials.as_ref().map(|_| "***"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_port() {
        let a: ServerAddress = "db1.local:7000".parse().unwrap();
        assert_eq!(a.host(), "db1.local");
        assert_eq!(a.port(), 7000);
        assert_eq!(a.to_string(), "db1.local:7000");
    }

    #[test]
    fn parse_default_port() {
        let a: ServerAddress = "db1".parse().unwrap();
        assert_eq!(a.port(), DEFAULT_PORT);
    }

    #[test]
    fn parse_errors() {
        assert!("".parse::<ServerAddress>().is_err());
        assert!(":80".parse::<ServerAddress>().is_err());
        assert!("h:notaport".parse::<ServerAddress>().is_err());
    }

    #[test]
    fn serde_as_string() {
        let a = ServerAddress::new("h", 1);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"h:1\"");
        let back: ServerAddress = serde_json::from_str("\"h:1\"").unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn auth_debug_redacts_secret() {
        let t = AuthToken::basic("neo", "hunter2");
        let s = format!("{:?}", t);
        assert!(s.contains("neo"));
        assert!(!s.contains("hunter2"));
    }
}
