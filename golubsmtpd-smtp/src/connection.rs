//! Buffered connection wrapper.
//!
//! Provides deadline-bounded line reads for the command loop, and passes
//! leftover buffered bytes through its `AsyncRead` implementation so the
//! DATA ingestor sees a contiguous stream.

use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::error::SessionError;

/// Upper bound on one command line, large enough for `AUTH PLAIN` with a
/// maximal inline base64 response.
pub const MAX_LINE_LENGTH: usize = 2048;

#[derive(Debug)]
pub struct Connection<Stream> {
    stream: Stream,
    buffer: Vec<u8>,
}

impl<Stream> Connection<Stream>
where
    Stream: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: Stream) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    /// Read one CRLF-terminated line (a bare LF is tolerated), without the
    /// terminator, bounded by `deadline`.
    pub async fn read_line(&mut self, deadline: Duration) -> Result<String, SessionError> {
        match tokio::time::timeout(deadline, self.read_line_inner()).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout(deadline.as_secs())),
        }
    }

    async fn read_line_inner(&mut self) -> Result<String, SessionError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return String::from_utf8(line).map_err(|_| SessionError::InvalidUtf8);
            }

            if self.buffer.len() > MAX_LINE_LENGTH {
                return Err(SessionError::LineTooLong);
            }

            let mut chunk = [0u8; 512];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(SessionError::ConnectionClosed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Write one reply line followed by CRLF, bounded by `deadline`.
    pub async fn send_line(&mut self, line: &str, deadline: Duration) -> Result<(), SessionError> {
        let write = async {
            self.stream.write_all(line.as_bytes()).await?;
            self.stream.write_all(b"\r\n").await?;
            self.stream.flush().await?;
            Ok::<_, std::io::Error>(())
        };

        match tokio::time::timeout(deadline, write).await {
            Ok(result) => result.map_err(SessionError::Io),
            Err(_) => Err(SessionError::Timeout(deadline.as_secs())),
        }
    }
}

impl<Stream> AsyncRead for Connection<Stream>
where
    Stream: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        if !this.buffer.is_empty() {
            let n = this.buffer.len().min(buf.remaining());
            buf.put_slice(&this.buffer[..n]);
            this.buffer.drain(..n);
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut this.stream).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod test {
    use tokio::io::AsyncWriteExt;

    use super::*;

    const DEADLINE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn reads_crlf_lines() {
        let (client, server) = tokio::io::duplex(256);
        let mut connection = Connection::new(server);

        let mut client = client;
        client.write_all(b"EHLO client.example\r\nNOOP\r\n").await.unwrap();

        assert_eq!(
            connection.read_line(DEADLINE).await.unwrap(),
            "EHLO client.example"
        );
        assert_eq!(connection.read_line(DEADLINE).await.unwrap(), "NOOP");
    }

    #[tokio::test]
    async fn leftover_bytes_flow_into_async_read() {
        let (client, server) = tokio::io::duplex(256);
        let mut connection = Connection::new(server);

        let mut client = client;
        client.write_all(b"DATA\r\nbody bytes").await.unwrap();
        drop(client);

        assert_eq!(connection.read_line(DEADLINE).await.unwrap(), "DATA");

        let mut rest = Vec::new();
        connection.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"body bytes");
    }

    #[tokio::test]
    async fn closed_peer_is_reported() {
        let (client, server) = tokio::io::duplex(256);
        let mut connection = Connection::new(server);
        drop(client);

        assert!(matches!(
            connection.read_line(DEADLINE).await,
            Err(SessionError::ConnectionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn read_deadline_expires() {
        let (_client, server) = tokio::io::duplex(256);
        let mut connection = Connection::new(server);

        assert!(matches!(
            connection.read_line(Duration::from_secs(30)).await,
            Err(SessionError::Timeout(30))
        ));
    }

    #[tokio::test]
    async fn oversized_line_is_rejected() {
        let (client, server) = tokio::io::duplex(8192);
        let mut connection = Connection::new(server);

        let mut client = client;
        let long = vec![b'a'; MAX_LINE_LENGTH + 64];
        client.write_all(&long).await.unwrap();

        assert!(matches!(
            connection.read_line(DEADLINE).await,
            Err(SessionError::LineTooLong)
        ));
    }
}
