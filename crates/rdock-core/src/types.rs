//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConnectionError;

const MAX_USERNAME_LEN: usize = 32;
const MAX_HOSTNAME_LEN: usize = 255;

/// Identifies one pooled SSH session: a (username, hostname) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionKey {
    username: String,
    hostname: String,
}

impl ConnectionKey {
    /// Create a new connection key
    pub fn new(username: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            hostname: hostname.into(),
        }
    }

    /// Parse a `user@host` target
    pub fn parse(target: &str) -> Result<Self, ConnectionError> {
        let (username, hostname) = target.split_once('@').ok_or_else(|| {
            ConnectionError::InvalidTarget(format!("expected user@host, got {target:?}"))
        })?;
        let key = Self::new(username, hostname);
        key.validate()?;
        Ok(key)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The `user@host` string handed to the SSH client
    pub fn target(&self) -> String {
        format!("{}@{}", self.username, self.hostname)
    }

    /// Check that both halves are safe to pass to the SSH client.
    ///
    /// Usernames allow `[A-Za-z0-9_.-]`, hostnames `[A-Za-z0-9.-]`; both must
    /// start with an alphanumeric character so they can never be read as an
    /// option.
    pub fn validate(&self) -> Result<(), ConnectionError> {
        check_component("username", &self.username, MAX_USERNAME_LEN, |c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
        })?;
        check_component("hostname", &self.hostname, MAX_HOSTNAME_LEN, |c| {
            c.is_ascii_alphanumeric() || matches!(c, '.' | '-')
        })
    }
}

fn check_component(
    what: &str,
    value: &str,
    max_len: usize,
    allowed: impl Fn(char) -> bool,
) -> Result<(), ConnectionError> {
    if value.is_empty() {
        return Err(ConnectionError::InvalidTarget(format!("{what} cannot be empty")));
    }
    if value.len() > max_len {
        return Err(ConnectionError::InvalidTarget(format!("{what} too long")));
    }
    let mut chars = value.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    if !first_ok || !chars.all(allowed) {
        return Err(ConnectionError::InvalidTarget(format!("invalid {what} format: {value:?}")));
    }
    Ok(())
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.hostname)
    }
}

impl FromStr for ConnectionKey {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
