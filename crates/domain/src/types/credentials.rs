//! Credentials handed to adapters
//!
//! Secrets never appear in `Debug` output or logs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A string that redacts itself when formatted
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for handing to the target platform
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// How a target authenticates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    /// Form login driven through an automation session
    Password {
        /// Account name
        username: String,
        /// Account password
        password: Secret,
    },
    /// Bearer token for API-backed targets
    ApiToken {
        /// Bearer token
        token: Secret,
    },
    /// Opaque key/value pairs for adapters with bespoke flows
    Custom {
        /// Adapter-defined keys
        values: BTreeMap<String, Secret>,
    },
    /// Target needs no login
    None,
}

impl Credentials {
    /// Username and password credentials
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password { username: username.into(), password: Secret::new(password) }
    }

    /// API token credentials
    pub fn api_token(token: impl Into<String>) -> Self {
        Self::ApiToken { token: Secret::new(token) }
    }

    /// Account name safe to log
    pub fn principal(&self) -> Option<&str> {
        match self {
            Self::Password { username, .. } => Some(username),
            _ => None,
        }
    }
}
