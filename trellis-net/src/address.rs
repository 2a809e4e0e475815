//! Socket address specifications with wildcard and ephemeral defaults.
//!
//! An [`AddressSpec`] is a parsed-but-not-resolved (host, port) pair. The host may be empty to
//! select the wildcard interface and the port may be absent to let the OS assign an ephemeral
//! one at bind time.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

/// Errors from parsing or resolving an [`AddressSpec`].
#[derive(thiserror::Error, Debug)]
pub enum AddressError {
    /// Missing ':' separator between host and port.
    #[error("missing ':' separator")]
    MissingSeparator,

    /// Invalid port number format.
    #[error("invalid port number")]
    InvalidPortNumber(#[source] std::num::ParseIntError),

    /// Invalid hostname format.
    #[error("invalid hostname: {0}")]
    InvalidHostname(&'static str),

    /// Resolving a hostname to a socket address failed.
    #[error("failed to resolve {address:?}")]
    Unresolvable {
        /// The address that failed to resolve.
        address: String,
        /// The underlying resolver error.
        #[source]
        source: std::io::Error,
    },

    /// A hostname resolved to an empty address list.
    #[error("{address:?} did not resolve to any socket address")]
    NoAddresses {
        /// The address that resolved to nothing.
        address: String,
    },
}

/// A (host, port) pair resolved lazily by the OS at bind or connect time.
///
/// An empty host stands for the wildcard interface; an absent (or zero) port requests an
/// ephemeral port. The concrete address in use is only known once an endpoint owns a bound
/// socket; endpoints expose it through their `local_address` accessors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AddressSpec {
    host: String,
    port: Option<u16>,
}

impl AddressSpec {
    /// Creates a specification from a host and an optional port.
    ///
    /// An empty host selects the wildcard interface. Non-empty hosts must be IP literals or
    /// valid RFC 1123 hostnames.
    pub fn new(
        host: impl Into<String>,
        port: impl Into<Option<u16>>,
    ) -> Result<Self, AddressError> {
        let host = host.into();
        let port = port.into().filter(|&port| port != 0);
        if !host.is_empty() && IpAddr::from_str(&host).is_err() {
            validate_hostname(&host)?;
        }
        Ok(Self { host, port })
    }

    /// A fully unspecified address: wildcard interface, ephemeral port.
    pub fn any() -> Self {
        Self {
            host: String::new(),
            port: None,
        }
    }

    /// The host part; empty for the wildcard interface.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port part; `None` for an OS-assigned ephemeral port.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Resolves to the concrete [`SocketAddr`] handed to bind and connect calls.
    ///
    /// Hostnames go through the system resolver; the first resolved address wins.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddressError> {
        let port = self.port.unwrap_or(0);
        if self.host.is_empty() {
            return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
        }
        if let Ok(ip) = IpAddr::from_str(&self.host) {
            return Ok(SocketAddr::new(ip, port));
        }
        let mut addresses =
            (self.host.as_str(), port)
                .to_socket_addrs()
                .map_err(|source| AddressError::Unresolvable {
                    address: self.to_string(),
                    source,
                })?;
        addresses.next().ok_or_else(|| AddressError::NoAddresses {
            address: self.to_string(),
        })
    }
}

impl FromStr for AddressSpec {
    type Err = AddressError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let (host, port) = string
            .rsplit_once(':')
            .ok_or(AddressError::MissingSeparator)?;

        let port = if port.is_empty() {
            None
        } else {
            Some(port.parse().map_err(AddressError::InvalidPortNumber)?)
        };

        // IPv6 hosts carry `[]` to keep the port separator unambiguous.
        let host = host
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(host);

        Self::new(host, port)
    }
}

impl Display for AddressSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        f.write_str(":")?;
        if let Some(port) = self.port {
            write!(f, "{port}")?;
        }
        Ok(())
    }
}

/// Validates RFC 1123 hostname syntax: total length, label length, alphanumeric-plus-hyphen
/// labels, no leading or trailing hyphens. A single trailing dot (FQDN form) is allowed.
fn validate_hostname(host: &str) -> Result<(), AddressError> {
    if host.len() > 253 {
        return Err(AddressError::InvalidHostname(
            "longer than 253 characters",
        ));
    }

    let trimmed = host.strip_suffix('.').unwrap_or(host);
    if trimmed.is_empty() {
        return Err(AddressError::InvalidHostname("has no labels"));
    }

    for label in trimmed.split('.') {
        if label.is_empty() {
            return Err(AddressError::InvalidHostname("contains an empty label"));
        }
        if label.len() > 63 {
            return Err(AddressError::InvalidHostname(
                "contains a label longer than 63 characters",
            ));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(AddressError::InvalidHostname(
                "label starts or ends with a dash",
            ));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(AddressError::InvalidHostname(
                "label contains a disallowed character",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::{AddressError, AddressSpec};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::str::FromStr;

    #[test]
    fn parses_full_addresses() {
        let spec = AddressSpec::from_str("127.0.0.1:7777").unwrap();
        assert_eq!(spec.host(), "127.0.0.1");
        assert_eq!(spec.port(), Some(7777));
        assert_eq!(
            spec.socket_addr().unwrap(),
            SocketAddr::from(([127, 0, 0, 1], 7777)),
        );
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let spec = AddressSpec::from_str("[::1]:8888").unwrap();
        assert_eq!(spec.host(), "::1");
        assert_eq!(spec.to_string(), "[::1]:8888");
    }

    #[test]
    fn empty_host_is_wildcard() {
        let spec = AddressSpec::from_str(":7777").unwrap();
        assert_eq!(spec.host(), "");
        let resolved = spec.socket_addr().unwrap();
        assert_eq!(resolved.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(resolved.port(), 7777);
    }

    #[test]
    fn empty_port_is_ephemeral() {
        let spec = AddressSpec::from_str("10.0.0.1:").unwrap();
        assert_eq!(spec.port(), None);
        assert_eq!(spec.socket_addr().unwrap().port(), 0);
    }

    #[test]
    fn zero_port_is_ephemeral() {
        let spec = AddressSpec::new("127.0.0.1", 0).unwrap();
        assert_eq!(spec.port(), None);
    }

    #[test]
    fn fully_unspecified_address() {
        let resolved = AddressSpec::any().socket_addr().unwrap();
        assert_eq!(resolved.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(resolved.port(), 0);
    }

    #[test]
    fn hostnames_are_validated() {
        assert!(AddressSpec::new("example.com", 80).is_ok());
        assert!(AddressSpec::new("example.com.", 80).is_ok());

        assert!(matches!(
            AddressSpec::new("-example.com", 80),
            Err(AddressError::InvalidHostname(_)),
        ));
        assert!(matches!(
            AddressSpec::new("foo..example.com", 80),
            Err(AddressError::InvalidHostname(_)),
        ));
        assert!(matches!(
            AddressSpec::new("foo_bar", 80),
            Err(AddressError::InvalidHostname(_)),
        ));
        assert!(matches!(
            AddressSpec::new("x".repeat(64), 80),
            Err(AddressError::InvalidHostname(_)),
        ));
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(matches!(
            AddressSpec::from_str("no-separator"),
            Err(AddressError::MissingSeparator),
        ));
        assert!(matches!(
            AddressSpec::from_str("example.com:http"),
            Err(AddressError::InvalidPortNumber(_)),
        ));
    }

    #[test]
    fn display_round_trips() {
        for input in ["127.0.0.1:7777", ":7777", "10.0.0.1:", ":"] {
            let spec = AddressSpec::from_str(input).unwrap();
            assert_eq!(spec.to_string(), input);
        }
    }
}
