//! Network identifiers
//!
//! A network id names a group of connections. Only ids matching
//! [`NETWORK_NAME_PATTERN`] can be joined; lookups by raw string (for
//! `request_network_info`) do not go through validation.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ProtocolError;

/// Pattern every joinable network id must match
pub const NETWORK_NAME_PATTERN: &str = r"^[a-zA-Z0-9\-_\s]{1,32}$";

static NETWORK_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(NETWORK_NAME_PATTERN).unwrap());

/// A validated network identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkId(String);

impl NetworkId {
    /// Validate and wrap a network id
    pub fn parse(raw: impl Into<String>) -> Result<Self, ProtocolError> {
        let raw = raw.into();
        if Self::is_valid(&raw) {
            Ok(Self(raw))
        } else {
            Err(ProtocolError::InvalidNetworkName)
        }
    }

    /// Check a raw string against the naming pattern
    pub fn is_valid(raw: &str) -> bool {
        NETWORK_NAME_REGEX.is_match(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
