// SPDX-License-Identifier: GPL-2.0-or-later

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::ClientConfig;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::trace;

use super::Connection;

#[derive(Debug, Error)]
pub enum DialError {
    #[error("unable to resolve hostname {0}")]
    Resolve(String),
    #[error("no address found for hostname {0}")]
    NoAddress(String),
    #[error("no port provided in address {0}")]
    MissingPort(String),
    #[error("invalid port in address {0}")]
    InvalidPort(String),
    #[error("connection to {0} timed out")]
    Timeout(String),
    #[error("could not connect to server: {0}")]
    Connect(#[from] std::io::Error),
    #[error("tls handshake failed: {0}")]
    Tls(String),
}

/// Shared dialer. Safe for concurrent use; maintains a hostname cache and
/// a registry of the IPs actually dialed per host.
#[derive(Clone)]
pub struct Dialer {
    inner: Arc<DialerInner>,
}

struct DialerInner {
    resolver: TokioAsyncResolver,
    cache: RwLock<HashMap<String, IpAddr>>,
    dialed: RwLock<HashMap<String, IpAddr>>,
    connect_timeout: Duration,
}

impl Dialer {
    /// Creates a dialer with the system resolver configuration, falling
    /// back to well known public resolvers when none can be read.
    pub fn new(connect_timeout: Duration) -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self {
            inner: Arc::new(DialerInner {
                resolver,
                cache: RwLock::new(HashMap::new()),
                dialed: RwLock::new(HashMap::new()),
                connect_timeout,
            }),
        }
    }

    async fn resolve(&self, host: &str) -> Result<IpAddr, DialError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        if let Some(ip) = self.inner.cache.read().unwrap().get(host) {
            return Ok(*ip);
        }
        let response = self
            .inner
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|_| DialError::Resolve(host.to_string()))?;
        let ip = response
            .iter()
            .next()
            .ok_or_else(|| DialError::NoAddress(host.to_string()))?;
        self.inner
            .cache
            .write()
            .unwrap()
            .insert(host.to_string(), ip);
        Ok(ip)
    }

    /// Splits `host:port`; the port is mandatory.
    pub fn split_address(addr: &str) -> Result<(&str, u16), DialError> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| DialError::MissingPort(addr.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| DialError::InvalidPort(addr.to_string()))?;
        Ok((host, port))
    }

    /// Opens a TCP connection to `host:port`.
    pub async fn dial(&self, host: &str, port: u16) -> Result<Connection, DialError> {
        let ip = self.resolve(host).await?;
        trace!(host, %ip, port, "dialing");
        let stream = timeout(self.inner.connect_timeout, TcpStream::connect((ip, port)))
            .await
            .map_err(|_| DialError::Timeout(format!("{host}:{port}")))??;
        self.inner
            .dialed
            .write()
            .unwrap()
            .insert(host.to_string(), ip);
        Ok(Connection::Plain(stream))
    }

    /// Opens a TLS connection to `host:port`. Certificates are not
    /// verified; scan targets routinely present self signed or expired
    /// certificates.
    pub async fn dial_tls(&self, host: &str, port: u16) -> Result<Connection, DialError> {
        let plain = match self.dial(host, port).await? {
            Connection::Plain(stream) => stream,
            Connection::Tls(_) => unreachable!("dial always returns a plain stream"),
        };
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = host
            .to_string()
            .try_into()
            .map_err(|_| DialError::Tls(format!("invalid server name {host}")))?;
        let stream = connector
            .connect(server_name, plain)
            .await
            .map_err(|e| DialError::Tls(e.to_string()))?;
        Ok(Connection::Tls(Box::new(stream)))
    }

    /// Dials a `host:port` address string, optionally with TLS.
    pub async fn dial_addr(&self, addr: &str, tls: bool) -> Result<Connection, DialError> {
        let (host, port) = Self::split_address(addr)?;
        if tls {
            self.dial_tls(host, port).await
        } else {
            self.dial(host, port).await
        }
    }

    /// The IP most recently dialed for `host`, if any.
    pub fn dialed_ip(&self, host: &str) -> Option<IpAddr> {
        self.inner.dialed.read().unwrap().get(host).copied()
    }

    /// A handle to the shared resolver, for callers that issue DNS
    /// queries of their own.
    pub fn resolver(&self) -> TokioAsyncResolver {
        self.inner.resolver.clone()
    }
}

/// Certificate verifier accepting every certificate. Only for use against
/// scan targets.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA1,
            rustls::SignatureScheme::ECDSA_SHA1_Legacy,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::ED448,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dial_records_the_dialed_ip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dialer = Dialer::new(Duration::from_secs(1));
        dialer.dial("127.0.0.1", addr.port()).await.unwrap();
        assert_eq!(
            dialer.dialed_ip("127.0.0.1"),
            Some("127.0.0.1".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn dial_refused_port_fails() {
        let dialer = Dialer::new(Duration::from_secs(1));
        // bind and drop to get a port that is closed
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(dialer.dial("127.0.0.1", addr.port()).await.is_err());
    }

    #[test]
    fn split_address_requires_port() {
        assert!(Dialer::split_address("host").is_err());
        assert!(Dialer::split_address("host:notaport").is_err());
        assert_eq!(Dialer::split_address("host:99").unwrap(), ("host", 99));
    }
}
