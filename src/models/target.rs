// SPDX-License-Identifier: GPL-2.0-or-later

use std::collections::HashMap;

use crate::vars::{VarValue, Variables};

/// Standard web ports that are kept when a network template asks for a
/// port override; dialing 80/8080/8081 with a raw TCP probe is redundant
/// when the input already carries them.
const HTTP_PORTS: [u16; 3] = [80, 8080, 8081];

/// A single scan target together with its per-target state.
///
/// Cloning is deep: mutating a clone (e.g. overriding the port during
/// port scanning) never affects the parent context.
#[derive(Debug, Clone, Default)]
pub struct Target {
    /// The raw input: a URL, a hostname or a `host:port` pair.
    pub input: String,
    /// Optional metadata carried alongside the input.
    pub metadata: HashMap<String, VarValue>,
    /// Per-target template context variables.
    pub template_ctx: Variables,
    /// Port override applied while executing a template, if any.
    pub port: Option<u16>,
}

impl Target {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    /// The input with any port override applied.
    pub fn address(&self) -> String {
        let Some(port) = self.port else {
            return self.input.clone();
        };
        if self.input.contains("://") {
            if let Ok(mut parsed) = url::Url::parse(&self.input) {
                if parsed.set_port(Some(port)).is_ok() {
                    return parsed.to_string();
                }
            }
        }
        match self.input.rsplit_once(':') {
            Some((host, tail)) if tail.chars().all(|c| c.is_ascii_digit()) => {
                format!("{host}:{port}")
            }
            _ => format!("{}:{port}", self.input),
        }
    }

    /// Overrides the target port with the one requested by a template.
    ///
    /// The override is skipped when the requested port is excluded, and
    /// when the input already carries a non-HTTP(S) port (reduces
    /// redundant dials to service ports the input pinned explicitly).
    pub fn use_network_port(&mut self, port: u16, exclude: &[u16]) -> Result<(), String> {
        if port == 0 {
            return Err("port can not be zero".to_string());
        }
        if exclude.contains(&port) {
            return Err(format!("port {port} is excluded by the template"));
        }
        if let Some((_, tail)) = self.input.rsplit_once(':') {
            if let Ok(existing) = tail.parse::<u16>() {
                if !HTTP_PORTS.contains(&existing) {
                    // keep the explicitly pinned port
                    return Ok(());
                }
            }
        }
        self.port = Some(port);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_is_deep() {
        let mut parent = Target::new("example.com");
        parent.template_ctx.insert("k", "v");
        let mut child = parent.clone();
        child.port = Some(8080);
        child.template_ctx.insert("k", "other");
        assert_eq!(parent.port, None);
        assert_eq!(parent.template_ctx.get("k").unwrap().to_string(), "v");
    }

    #[test]
    fn port_override_applies_to_bare_host() {
        let mut target = Target::new("example.com");
        target.use_network_port(5432, &[]).unwrap();
        assert_eq!(target.address(), "example.com:5432");
    }

    #[test]
    fn pinned_non_http_port_wins() {
        let mut target = Target::new("example.com:6379");
        target.use_network_port(5432, &[]).unwrap();
        assert_eq!(target.address(), "example.com:6379");
    }

    #[test]
    fn http_port_is_replaced() {
        let mut target = Target::new("example.com:8080");
        target.use_network_port(5432, &[]).unwrap();
        assert_eq!(target.address(), "example.com:5432");
    }

    #[test]
    fn excluded_port_is_rejected() {
        let mut target = Target::new("example.com");
        assert!(target.use_network_port(9999, &[9999]).is_err());
    }
}
