//! Endpoint parsing helpers shared across Causeway crates.
//!
//! An [`Endpoint`] is a plain `(host, port)` pair used identically for local
//! and remote addressing. Validation here is purely syntactic; resolution and
//! binding failures surface later as connection errors.

use std::{error::Error, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// A `(host, port)` pair naming one side of a tunnel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port number.
    pub port: u16,
}

impl Endpoint {
    /// Build an endpoint from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Errors that can occur while parsing an endpoint string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointParseError {
    /// The input was empty or only whitespace.
    EmptyInput,
    /// Host portion was empty after parsing.
    EmptyHost,
    /// Port was missing from the input.
    MissingPort,
    /// Port failed to parse into a valid `u16`.
    InvalidPort(String),
}

impl fmt::Display for EndpointParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointParseError::EmptyInput => write!(f, "endpoint must not be empty"),
            EndpointParseError::EmptyHost => write!(f, "endpoint host is missing"),
            EndpointParseError::MissingPort => write!(f, "endpoint port is missing"),
            EndpointParseError::InvalidPort(p) => write!(f, "invalid port: {p}"),
        }
    }
}

impl Error for EndpointParseError {}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    /// Parse an endpoint of the form `host:port`.
    ///
    /// IPv6 literals must be wrapped in brackets, e.g. `[fe80::1]:2222`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err(EndpointParseError::EmptyInput);
        }

        let (host, port_str) = if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or(EndpointParseError::EmptyHost)?;
            let port = tail.strip_prefix(':').ok_or(EndpointParseError::MissingPort)?;
            (host.to_string(), port)
        } else {
            let (host, port) = input.rsplit_once(':').ok_or(EndpointParseError::MissingPort)?;
            (host.to_string(), port)
        };

        if host.is_empty() {
            return Err(EndpointParseError::EmptyHost);
        }
        let port = port_str
            .parse::<u16>()
            .map_err(|_| EndpointParseError::InvalidPort(port_str.to_string()))?;

        Ok(Endpoint { host, port })
    }
}
