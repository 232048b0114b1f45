// SPDX-License-Identifier: GPL-2.0-or-later

//! HTTP/1.1 framing over the shared dialer.
//!
//! Requests are framed by hand so the unsafe path can write a blob
//! verbatim, byte for byte, including constructions a strict client
//! would reject or normalize.

use std::time::Duration;

use crate::runtime::{Connection, Dialer};

use super::super::RequestError;
use super::build::GeneratedRequest;
use super::race::OpenGate;

/// A parsed response plus its raw bytes.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub raw: Vec<u8>,
}

impl HttpResponse {
    /// The response head as one string, status line and headers.
    pub fn all_headers(&self) -> String {
        let mut out = format!("HTTP/1.1 {}\r\n", self.status);
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out
    }
}

/// Dials the request target and performs the exchange. The race gate,
/// when given, is awaited after the head is written and before the body
/// goes out.
pub async fn send_request(
    dialer: &Dialer,
    request: &GeneratedRequest,
    read_timeout: Duration,
    gate: Option<&OpenGate>,
) -> Result<HttpResponse, RequestError> {
    let tls = request.url.scheme() == "https";
    let host = request
        .url
        .host_str()
        .ok_or_else(|| RequestError::Build("request url misses a host".to_string()))?;
    let port = request
        .url
        .port_or_known_default()
        .unwrap_or(if tls { 443 } else { 80 });
    let mut conn = dialer.dial_addr(&format!("{host}:{port}"), tls).await?;

    if let Some(blob) = &request.raw_bytes {
        if let Some(gate) = gate {
            gate.wait().await;
        }
        conn.send(blob).await?;
        let raw = conn.read_all_with_timeout(Some(read_timeout)).await;
        return Ok(parse_response(raw));
    }

    let head = frame_head(request, host, port, tls);
    conn.send(head.as_bytes()).await?;
    if let Some(gate) = gate {
        gate.wait().await;
    }
    if !request.body.is_empty() {
        conn.send(&request.body).await?;
    }
    let raw = read_response(&mut conn, read_timeout).await;
    let response = parse_response(raw);

    // digest credentials answer exactly one challenge
    if response.status == 401 {
        if let Some((username, password)) = &request.digest_auth {
            if let Some(authorization) = digest_challenge_response(&response, request, username, password)
            {
                let mut retry = request.clone();
                retry.headers.push(("Authorization".to_string(), authorization));
                let mut conn = dialer.dial_addr(&format!("{host}:{port}"), tls).await?;
                conn.send(frame_head(&retry, host, port, tls).as_bytes())
                    .await?;
                if !retry.body.is_empty() {
                    conn.send(&retry.body).await?;
                }
                let raw = read_response(&mut conn, read_timeout).await;
                return Ok(parse_response(raw));
            }
        }
    }
    Ok(response)
}

/// Builds the Authorization header for a `WWW-Authenticate: Digest`
/// challenge (MD5, qop=auth).
fn digest_challenge_response(
    response: &HttpResponse,
    request: &GeneratedRequest,
    username: &str,
    password: &str,
) -> Option<String> {
    let challenge = response
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("WWW-Authenticate"))
        .map(|(_, value)| value.as_str())?;
    let challenge = challenge.strip_prefix("Digest ")?;
    let param = |key: &str| -> Option<String> {
        challenge.split(',').find_map(|part| {
            let (name, value) = part.trim().split_once('=')?;
            (name.trim() == key).then(|| value.trim().trim_matches('"').to_string())
        })
    };
    let realm = param("realm")?;
    let nonce = param("nonce")?;
    let qop = param("qop");
    let opaque = param("opaque");

    let mut uri = request.url.path().to_string();
    if let Some(query) = request.url.query() {
        uri = format!("{uri}?{query}");
    }
    let ha1 = format!("{:x}", md5::compute(format!("{username}:{realm}:{password}")));
    let ha2 = format!("{:x}", md5::compute(format!("{}:{uri}", request.method)));
    let mut fields = format!("username=\"{username}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri}\"");
    let digest = match qop.as_deref() {
        Some(qop) if qop.split(',').any(|q| q.trim() == "auth") => {
            let cnonce = format!("{:08x}", rand::random::<u32>());
            let digest = format!(
                "{:x}",
                md5::compute(format!("{ha1}:{nonce}:00000001:{cnonce}:auth:{ha2}"))
            );
            fields.push_str(&format!(", qop=auth, nc=00000001, cnonce=\"{cnonce}\""));
            digest
        }
        _ => format!("{:x}", md5::compute(format!("{ha1}:{nonce}:{ha2}"))),
    };
    fields.push_str(&format!(", response=\"{digest}\""));
    if let Some(opaque) = opaque {
        fields.push_str(&format!(", opaque=\"{opaque}\""));
    }
    Some(format!("Digest {fields}"))
}

/// Frames the request line and headers.
fn frame_head(request: &GeneratedRequest, host: &str, port: u16, tls: bool) -> String {
    let mut target = request.url.path().to_string();
    if let Some(query) = request.url.query() {
        target.push('?');
        target.push_str(query);
    }
    let host_value = match &request.host {
        Some(host) => host.clone(),
        None => {
            let default_port = if tls { 443 } else { 80 };
            if port == default_port {
                host.to_string()
            } else {
                format!("{host}:{port}")
            }
        }
    };

    let mut head = format!("{} {} HTTP/1.1\r\n", request.method, target);
    head.push_str(&format!("Host: {host_value}\r\n"));
    for (name, value) in &request.headers {
        if name.eq_ignore_ascii_case("Host") {
            continue;
        }
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    let has = |name: &str| {
        request
            .headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    };
    if !request.body.is_empty() && !has("Content-Length") {
        head.push_str(&format!("Content-Length: {}\r\n", request.body.len()));
    }
    if request.close_connection && !has("Connection") {
        head.push_str("Connection: close\r\n");
    }
    head.push_str("\r\n");
    head
}

async fn read_response(conn: &mut Connection, read_timeout: Duration) -> Vec<u8> {
    conn.read_all_with_timeout(Some(read_timeout)).await
}

/// Splits raw response bytes into status, headers and body. Unparseable
/// responses keep everything in `raw` with a zero status.
fn parse_response(raw: Vec<u8>) -> HttpResponse {
    let mut response = HttpResponse {
        raw,
        ..Default::default()
    };
    let text = String::from_utf8_lossy(&response.raw);
    let (head, body_at) = match text.find("\r\n\r\n") {
        Some(pos) => (&text[..pos], pos + 4),
        None => match text.find("\n\n") {
            Some(pos) => (&text[..pos], pos + 2),
            None => (text.as_ref(), text.len()),
        },
    };
    let mut lines = head.lines();
    if let Some(status_line) = lines.next() {
        let mut parts = status_line.split_whitespace();
        if let Some(version) = parts.next() {
            if version.starts_with("HTTP/") {
                response.status = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            }
        }
    }
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            response
                .headers
                .push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    response.body = response.raw[body_at.min(response.raw.len())..].to_vec();
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nhi".to_vec();
        let parsed = parse_response(raw);
        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.body, b"hi");
        assert_eq!(
            parsed.headers[0],
            ("Content-Type".to_string(), "text/plain".to_string())
        );
    }

    #[test]
    fn unparseable_response_keeps_raw() {
        let raw = b"not http at all".to_vec();
        let parsed = parse_response(raw.clone());
        assert_eq!(parsed.status, 0);
        assert_eq!(parsed.raw, raw);
    }

    #[test]
    fn digest_challenge_is_answered() {
        use crate::vars::Variables;
        let request = GeneratedRequest {
            method: "GET".to_string(),
            url: url::Url::parse("http://example.com/protected").unwrap(),
            headers: Vec::new(),
            host: None,
            body: Vec::new(),
            raw_bytes: None,
            close_connection: true,
            digest_auth: Some(("user".to_string(), "pass".to_string())),
            meta: Variables::new(),
            dynamic_values: Variables::new(),
            interactsh_urls: Vec::new(),
        };
        let response = HttpResponse {
            status: 401,
            headers: vec![(
                "WWW-Authenticate".to_string(),
                "Digest realm=\"test\", nonce=\"abc123\", qop=\"auth\"".to_string(),
            )],
            ..Default::default()
        };
        let header = digest_challenge_response(&response, &request, "user", "pass").unwrap();
        assert!(header.starts_with("Digest username=\"user\""));
        assert!(header.contains("realm=\"test\""));
        assert!(header.contains("uri=\"/protected\""));
        assert!(header.contains("qop=auth"));
        assert!(header.contains("response=\""));
    }
}
