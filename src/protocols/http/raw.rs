// SPDX-License-Identifier: GPL-2.0-or-later

//! Parser for raw request blobs.
//!
//! Lines prefixed with `@` are annotations and skipped when locating the
//! request line. For self-contained requests the URL comes from the
//! request line itself; otherwise the path is composed onto the input
//! URL. Unsafe requests keep the evaluated blob verbatim for replay.

use url::Url;

use super::super::RequestError;

/// The parsed form of a raw request blob.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: String,
    pub path: String,
    pub full_url: String,
    /// Headers in the order they appear in the blob.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Extracts the request line of a blob, skipping `@` annotation lines.
pub fn request_line(raw: &str) -> Result<(String, String), RequestError> {
    let line = raw
        .lines()
        .map(str::trim_end)
        .find(|line| !line.starts_with('@') && !line.trim().is_empty())
        .ok_or_else(|| RequestError::Build("could not read request line".to_string()))?;
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Build("malformed request supplied".to_string()))?;
    let target = parts
        .next()
        .ok_or_else(|| RequestError::Build("malformed request supplied".to_string()))?;
    if parts.next().is_none() {
        return Err(RequestError::Build("malformed request supplied".to_string()));
    }
    Ok((method.to_string(), target.to_string()))
}

/// Parses a raw request blob against the input URL.
pub fn parse(raw: &str, base: &Url) -> Result<RawRequest, RequestError> {
    let (method, target) = request_line(raw)?;

    let mut lines = raw
        .lines()
        .map(str::trim_end)
        .skip_while(|line| line.starts_with('@') || line.trim().is_empty());
    // drop the request line itself
    lines.next();

    let mut headers = Vec::new();
    for line in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
        match line.split_once(':') {
            Some((name, value)) => headers.push((name.trim().to_string(), value.trim().to_string())),
            None => {
                return Err(RequestError::Build(format!(
                    "malformed header line: {line}"
                )))
            }
        }
    }
    let body = lines.collect::<Vec<_>>().join("\n");

    let (path, full_url) = if target.contains("://") {
        let parsed = Url::parse(&target)
            .map_err(|e| RequestError::Build(format!("could not parse request URL: {e}")))?;
        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path = format!("{path}?{query}");
        }
        (path, target)
    } else {
        let joined = base
            .join(&target)
            .map_err(|e| RequestError::Build(format!("could not compose request URL: {e}")))?;
        (target, joined.to_string())
    };

    Ok(RawRequest {
        method,
        path,
        full_url,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relative_request() {
        let base = Url::parse("https://example.com:8443").unwrap();
        let raw = "GET /admin?id=1 HTTP/1.1\nHost: example.com\nX-Custom: yes\n\nbody here";
        let parsed = parse(raw, &base).unwrap();
        assert_eq!(parsed.method, "GET");
        assert_eq!(parsed.path, "/admin?id=1");
        assert_eq!(parsed.full_url, "https://example.com:8443/admin?id=1");
        assert_eq!(
            parsed.headers,
            vec![
                ("Host".to_string(), "example.com".to_string()),
                ("X-Custom".to_string(), "yes".to_string()),
            ]
        );
        assert_eq!(parsed.body, "body here");
    }

    #[test]
    fn annotations_are_skipped() {
        let base = Url::parse("http://example.com").unwrap();
        let raw = "@timeout: 10s\nGET / HTTP/1.1\nHost: example.com\n";
        let parsed = parse(raw, &base).unwrap();
        assert_eq!(parsed.method, "GET");
        assert_eq!(parsed.path, "/");
    }

    #[test]
    fn absolute_target_is_self_contained() {
        let base = Url::parse("http://ignored.example").unwrap();
        let raw = "POST https://other.example/api HTTP/1.1\nContent-Type: text/plain\n\nx";
        let parsed = parse(raw, &base).unwrap();
        assert_eq!(parsed.full_url, "https://other.example/api");
        assert_eq!(parsed.path, "/api");
    }

    #[test]
    fn malformed_request_line_is_rejected() {
        let base = Url::parse("http://example.com").unwrap();
        assert!(parse("GET\n\n", &base).is_err());
        assert!(parse("@only: annotations\n", &base).is_err());
    }
}
