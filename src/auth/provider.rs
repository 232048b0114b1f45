// SPDX-License-Identifier: GPL-2.0-or-later

use std::path::Path;

use regex::Regex;

use super::{AuthError, AuthStrategy, SecretsFile};

/// File based auth provider. Lookup prefers exact domain matches over
/// regex patterns; within each index, secrets match in declaration order.
#[derive(Debug, Default)]
pub struct FileAuthProvider {
    domains: Vec<(String, AuthStrategy)>,
    compiled: Vec<(Regex, AuthStrategy)>,
}

impl FileAuthProvider {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self, AuthError> {
        let store: SecretsFile = serde_yaml::from_str(content)?;
        if store.secrets.is_empty() {
            return Err(AuthError::NoSecrets);
        }
        let mut provider = Self::default();
        for secret in &store.secrets {
            secret.validate()?;
            for pattern in &secret.domains_regex {
                let compiled = Regex::new(pattern).map_err(|e| AuthError::InvalidRegex {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                provider.compiled.push((compiled, secret.strategy.clone()));
            }
            for domain in &secret.domains {
                provider
                    .domains
                    .push((domain.trim().to_string(), secret.strategy.clone()));
            }
        }
        Ok(provider)
    }

    /// Looks up the strategy for a domain or `host:port` address.
    ///
    /// Default HTTP(S) ports are stripped first so that the same
    /// credentials apply to `host`, `host:80` and `host:443`.
    pub fn lookup_addr(&self, addr: &str) -> Option<&AuthStrategy> {
        let addr = strip_default_port(addr);
        for (domain, strategy) in &self.domains {
            if domain.eq_ignore_ascii_case(addr) {
                return Some(strategy);
            }
        }
        for (compiled, strategy) in &self.compiled {
            if compiled.is_match(addr) {
                return Some(strategy);
            }
        }
        None
    }

    /// Looks up the strategy for a parsed URL by its host component.
    pub fn lookup_url(&self, url: &url::Url) -> Option<&AuthStrategy> {
        let host = url.host_str()?;
        match url.port() {
            Some(port) => self.lookup_addr(&format!("{host}:{port}")),
            None => self.lookup_addr(host),
        }
    }
}

fn strip_default_port(addr: &str) -> &str {
    match addr.rsplit_once(':') {
        Some((host, "80" | "443")) if !host.is_empty() => host,
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRETS: &str = r#"
secrets:
  - type: basic
    domains:
      - api.example.com
    username: user
    password: pass
  - type: bearer
    domains-regex:
      - ^.*\.internal$
    token: token-value
"#;

    #[test]
    fn exact_match_strips_default_port() {
        let provider = FileAuthProvider::from_str(SECRETS).unwrap();
        let strategy = provider.lookup_addr("api.example.com:443").unwrap();
        assert!(matches!(strategy, AuthStrategy::Basic { .. }));
        assert!(provider.lookup_addr("other.example.com").is_none());
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let provider = FileAuthProvider::from_str(SECRETS).unwrap();
        assert!(provider.lookup_addr("API.Example.Com").is_some());
    }

    #[test]
    fn regex_match() {
        let provider = FileAuthProvider::from_str(SECRETS).unwrap();
        let strategy = provider.lookup_addr("db.internal").unwrap();
        assert!(matches!(strategy, AuthStrategy::Bearer { .. }));
        assert!(provider.lookup_addr("db.external").is_none());
    }

    #[test]
    fn non_default_port_is_kept_for_lookup() {
        let provider = FileAuthProvider::from_str(SECRETS).unwrap();
        assert!(provider.lookup_addr("api.example.com:8443").is_none());
    }

    #[test]
    fn empty_file_is_a_dedicated_error() {
        assert!(matches!(
            FileAuthProvider::from_str("secrets: []"),
            Err(AuthError::NoSecrets)
        ));
    }

    #[test]
    fn secret_without_domains_fails_load() {
        let content = r#"
secrets:
  - type: bearer
    token: t
"#;
        assert!(matches!(
            FileAuthProvider::from_str(content),
            Err(AuthError::InvalidSecret(_))
        ));
    }

    #[test]
    fn invalid_regex_fails_load() {
        let content = r#"
secrets:
  - type: bearer
    domains-regex: ["["]
    token: t
"#;
        assert!(matches!(
            FileAuthProvider::from_str(content),
            Err(AuthError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn unknown_strategy_fails_load() {
        let content = r#"
secrets:
  - type: kerberos
    domains: ["a"]
"#;
        assert!(matches!(
            FileAuthProvider::from_str(content),
            Err(AuthError::Format(_))
        ));
    }

    #[test]
    fn strategy_headers() {
        let basic = AuthStrategy::Basic {
            username: "u".into(),
            password: "p".into(),
        };
        assert_eq!(
            basic.header(),
            ("Authorization".to_string(), "Basic dTpw".to_string())
        );
        let cookie = AuthStrategy::Cookie {
            name: "session".into(),
            value: "abc".into(),
        };
        assert_eq!(cookie.header(), ("Cookie".to_string(), "session=abc".to_string()));
    }
}
