// SPDX-License-Identifier: GPL-2.0-or-later

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;

use super::DEFAULT_READ_TIMEOUT;

/// A dialed connection, plain TCP or TLS over TCP.
pub enum Connection {
    // The TLS connection is boxed, it is a lot larger than a TcpStream
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Connection::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Connection::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_flush(cx),
            Connection::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Connection::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl Connection {
    /// Writes the whole buffer and flushes it.
    pub async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data).await?;
        self.flush().await
    }

    /// Reads up to `n` bytes within `timeout`.
    ///
    /// A read deadline that elapses after some bytes arrived returns the
    /// partial buffer without an error; only a timeout with nothing read
    /// at all is reported as such.
    pub async fn read_n_with_timeout(
        &mut self,
        n: usize,
        deadline: Option<Duration>,
    ) -> io::Result<Vec<u8>> {
        let deadline = deadline.unwrap_or(DEFAULT_READ_TIMEOUT);
        let n = if n == 0 { 4096 } else { n };
        let mut buf = vec![0u8; n];
        let mut read = 0;
        let result = timeout(deadline, async {
            while read < n {
                match self.read(&mut buf[read..]).await {
                    Ok(0) => break,
                    Ok(count) => read += count,
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
        .await;
        match result {
            Ok(Ok(())) | Err(_) if read > 0 => {
                buf.truncate(read);
                Ok(buf)
            }
            Ok(Ok(())) => Ok(Vec::new()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
        }
    }

    /// Drains the connection until the peer closes or the timeout fires,
    /// returning everything read so far.
    pub async fn read_all_with_timeout(&mut self, deadline: Option<Duration>) -> Vec<u8> {
        let deadline = deadline.unwrap_or(DEFAULT_READ_TIMEOUT);
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        let _ = timeout(deadline, async {
            loop {
                match self.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(count) => out.extend_from_slice(&chunk[..count]),
                }
            }
        })
        .await;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn partial_read_on_timeout_returns_data() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // send less than requested and keep the connection open
            sock.write_all(b"hello").await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = Connection::Plain(stream);
        let data = conn
            .read_n_with_timeout(64, Some(Duration::from_millis(200)))
            .await
            .unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn timeout_without_data_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = Connection::Plain(stream);
        let err = conn
            .read_n_with_timeout(8, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
