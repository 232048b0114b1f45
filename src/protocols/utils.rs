// SPDX-License-Identifier: GPL-2.0-or-later

//! Address parsing and the variable sets derived from targets.

use std::net::IpAddr;

use url::Url;

use crate::models::DnsRecordType;
use crate::vars::Variables;

use super::RequestError;

/// Extracts the `host[:port]` address from a target input. URL inputs
/// contribute their host component, everything else is taken verbatim.
pub fn get_address(input: &str) -> Result<String, RequestError> {
    if input.contains("://") {
        let parsed = Url::parse(input)
            .map_err(|e| RequestError::Configuration(format!("invalid target url {input}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| RequestError::Configuration(format!("no host in target url {input}")))?;
        Ok(match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    } else {
        Ok(input.to_string())
    }
}

/// Canonicalizes a DNS question input.
///
/// IP literals are only valid for PTR queries and are rewritten to their
/// reverse lookup form; names are fully qualified with a trailing dot.
pub fn parse_dns_input(host: &str, record_type: DnsRecordType) -> Result<String, RequestError> {
    match host.parse::<IpAddr>() {
        Ok(ip) if record_type == DnsRecordType::Ptr => Ok(reverse_addr(ip)),
        Ok(_) => Err(RequestError::Configuration(
            "cannot use IP address as DNS input".to_string(),
        )),
        Err(_) => Ok(fqdn(host)),
    }
}

/// Appends the trailing dot of a fully qualified name.
pub fn fqdn(host: &str) -> String {
    if host.ends_with('.') {
        host.to_string()
    } else {
        format!("{host}.")
    }
}

/// The reverse lookup name of an IP address.
fn reverse_addr(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.{}.in-addr.arpa.", o[3], o[2], o[1], o[0])
        }
        IpAddr::V6(v6) => {
            let mut nibbles = Vec::with_capacity(32);
            for byte in v6.octets().iter().rev() {
                nibbles.push(format!("{:x}", byte & 0x0f));
                nibbles.push(format!("{:x}", byte >> 4));
            }
            format!("{}.ip6.arpa.", nibbles.join("."))
        }
    }
}

/// DNS variables derived from a question name: `FQDN`, `RDN`, `DN`,
/// `TLD` and `SD`.
pub fn generate_dns_variables(domain: &str) -> Variables {
    let trimmed = domain.trim_end_matches('.');
    let labels: Vec<&str> = trimmed.split('.').collect();
    let mut vars = Variables::new();
    vars.insert("FQDN", trimmed);
    match labels.len() {
        0 | 1 => {
            vars.insert("RDN", trimmed);
            vars.insert("DN", trimmed);
            vars.insert("TLD", "");
            vars.insert("SD", "");
        }
        n => {
            vars.insert("RDN", labels[n - 2..].join("."));
            vars.insert("DN", labels[n - 2]);
            vars.insert("TLD", labels[n - 1]);
            vars.insert("SD", labels[..n.saturating_sub(2)].join("."));
        }
    }
    vars
}

/// Variables derived from a bare `host[:port]` address: `Hostname`,
/// `Host` and `Port`.
pub fn generate_address_variables(address: &str) -> Variables {
    let mut vars = Variables::new();
    vars.insert("Hostname", address);
    match address.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
            vars.insert("Host", host);
            vars.insert("Port", port);
        }
        _ => {
            vars.insert("Host", address);
        }
    }
    vars
}

/// Variables derived from a parsed URL: `BaseURL`, `RootURL`,
/// `Hostname`, `Host`, `Scheme`, `Port`, `Path`, `File` and `Query`.
///
/// With `trailing_slash` set the `Path` variable drops its trailing
/// slash so template concatenation does not produce `//` sequences.
pub fn generate_variables_with_url(
    parsed: &Url,
    trailing_slash: bool,
    extra: Option<&Variables>,
) -> Variables {
    let host = parsed.host_str().unwrap_or_default();
    let port = parsed
        .port_or_known_default()
        .map(|p| p.to_string())
        .unwrap_or_default();
    let hostname = match parsed.port() {
        Some(p) => format!("{host}:{p}"),
        None => host.to_string(),
    };
    let mut path = parsed.path().to_string();
    if trailing_slash {
        path = path.trim_end_matches('/').to_string();
    }
    let file = path.rsplit('/').next().unwrap_or_default().to_string();
    let mut base = parsed.clone();
    base.set_query(None);
    base.set_fragment(None);

    let mut vars = Variables::new();
    vars.insert("BaseURL", base.as_str().trim_end_matches('/'));
    vars.insert(
        "RootURL",
        format!("{}://{}", parsed.scheme(), hostname),
    );
    vars.insert("Hostname", hostname);
    vars.insert("Host", host);
    vars.insert("Scheme", parsed.scheme());
    vars.insert("Port", port);
    vars.insert("Path", path);
    vars.insert("File", file);
    vars.insert("Query", parsed.query().unwrap_or_default());
    if let Some(extra) = extra {
        vars.extend_from(extra);
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_from_url_keeps_explicit_port() {
        assert_eq!(
            get_address("https://example.com:8443/path").unwrap(),
            "example.com:8443"
        );
        assert_eq!(get_address("https://example.com/path").unwrap(), "example.com");
        assert_eq!(get_address("example.com:9000").unwrap(), "example.com:9000");
    }

    #[test]
    fn ptr_input_rewrites_to_reverse_form() {
        assert_eq!(
            parse_dns_input("192.168.1.20", DnsRecordType::Ptr).unwrap(),
            "20.1.168.192.in-addr.arpa."
        );
    }

    #[test]
    fn ip_literal_is_rejected_for_other_types() {
        assert!(parse_dns_input("192.168.1.20", DnsRecordType::A).is_err());
    }

    #[test]
    fn names_are_fully_qualified() {
        assert_eq!(
            parse_dns_input("example.com", DnsRecordType::A).unwrap(),
            "example.com."
        );
        assert_eq!(
            parse_dns_input("example.com.", DnsRecordType::A).unwrap(),
            "example.com."
        );
    }

    #[test]
    fn dns_variables() {
        let vars = generate_dns_variables("www.example.com.");
        assert_eq!(vars.get("FQDN").unwrap().to_string(), "www.example.com");
        assert_eq!(vars.get("RDN").unwrap().to_string(), "example.com");
        assert_eq!(vars.get("DN").unwrap().to_string(), "example");
        assert_eq!(vars.get("TLD").unwrap().to_string(), "com");
        assert_eq!(vars.get("SD").unwrap().to_string(), "www");
    }

    #[test]
    fn url_variables() {
        let parsed = Url::parse("https://example.com:8443/admin/login.php?x=1").unwrap();
        let vars = generate_variables_with_url(&parsed, false, None);
        assert_eq!(
            vars.get("BaseURL").unwrap().to_string(),
            "https://example.com:8443/admin/login.php"
        );
        assert_eq!(
            vars.get("RootURL").unwrap().to_string(),
            "https://example.com:8443"
        );
        assert_eq!(vars.get("Hostname").unwrap().to_string(), "example.com:8443");
        assert_eq!(vars.get("Host").unwrap().to_string(), "example.com");
        assert_eq!(vars.get("Port").unwrap().to_string(), "8443");
        assert_eq!(vars.get("Path").unwrap().to_string(), "/admin/login.php");
        assert_eq!(vars.get("File").unwrap().to_string(), "login.php");
        assert_eq!(vars.get("Query").unwrap().to_string(), "x=1");
    }

    #[test]
    fn url_variables_default_port() {
        let parsed = Url::parse("http://example.com/").unwrap();
        let vars = generate_variables_with_url(&parsed, false, None);
        assert_eq!(vars.get("Port").unwrap().to_string(), "80");
        assert_eq!(vars.get("Hostname").unwrap().to_string(), "example.com");
    }
}
