// SPDX-License-Identifier: GPL-2.0-or-later

//! Per-target authentication secrets.
//!
//! A secrets document declares a list of secrets, each carrying an
//! authentication strategy and the domains (exact or regex) it applies
//! to. The provider derives its lookup indexes once at load time.

mod provider;

pub use provider::FileAuthProvider;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no secrets configured in file")]
    NoSecrets,
    #[error("unable to read secrets file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed secrets file: {0}")]
    Format(#[from] serde_yaml::Error),
    #[error("invalid secret: {0}")]
    InvalidSecret(String),
    #[error("invalid domain regex {pattern}: {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

/// The authentication strategy of a secret.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthStrategy {
    /// HTTP basic authentication.
    Basic { username: String, password: String },
    /// A bearer token on the Authorization header.
    Bearer { token: String },
    /// An arbitrary header pair.
    Header { name: String, value: String },
    /// A cookie pair.
    Cookie { name: String, value: String },
}

impl AuthStrategy {
    fn validate(&self) -> Result<(), AuthError> {
        let missing = |what: &str| Err(AuthError::InvalidSecret(format!("{what} must not be empty")));
        match self {
            AuthStrategy::Basic { username, password } => {
                if username.is_empty() {
                    return missing("username");
                }
                if password.is_empty() {
                    return missing("password");
                }
            }
            AuthStrategy::Bearer { token } => {
                if token.is_empty() {
                    return missing("token");
                }
            }
            AuthStrategy::Header { name, value } | AuthStrategy::Cookie { name, value } => {
                if name.is_empty() {
                    return missing("name");
                }
                if value.is_empty() {
                    return missing("value");
                }
            }
        }
        Ok(())
    }

    /// The header this strategy contributes to an HTTP request.
    pub fn header(&self) -> (String, String) {
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
        match self {
            AuthStrategy::Basic { username, password } => (
                "Authorization".to_string(),
                format!("Basic {}", BASE64.encode(format!("{username}:{password}"))),
            ),
            AuthStrategy::Bearer { token } => {
                ("Authorization".to_string(), format!("Bearer {token}"))
            }
            AuthStrategy::Header { name, value } => (name.clone(), value.clone()),
            AuthStrategy::Cookie { name, value } => {
                ("Cookie".to_string(), format!("{name}={value}"))
            }
        }
    }
}

/// One secret of the secrets document.
#[derive(Debug, Clone, Deserialize)]
pub struct Secret {
    #[serde(flatten)]
    pub strategy: AuthStrategy,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default, rename = "domains-regex")]
    pub domains_regex: Vec<String>,
}

impl Secret {
    fn validate(&self) -> Result<(), AuthError> {
        if self.domains.is_empty() && self.domains_regex.is_empty() {
            return Err(AuthError::InvalidSecret(
                "secret defines neither domains nor domains-regex".to_string(),
            ));
        }
        self.strategy.validate()
    }
}

/// The secrets document in object form.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretsFile {
    pub secrets: Vec<Secret>,
}
