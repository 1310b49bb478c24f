//! Async line framer over a byte stream.
//!
//! Reads and writes go through a [`Framed`] stream with the [`LineCodec`];
//! writes are buffered until [`LineFramer::flush`] is called. The same type
//! serves the agent's listening side and its outbound relay connections.

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_util::codec::Framed;
use tracing::trace;

use crate::codec::{Line, LineCodec};
use crate::error::{FnaaError, FnaaResult};
use crate::transport::AsyncStream;

/// CRLF line reader/writer over any [`AsyncStream`].
pub struct LineFramer<S> {
    framed: Framed<S, LineCodec>,
    outgoing: Vec<String>,
    eof: bool,
    /// Deadline applied to each read and each flush.
    timeout: Option<Duration>,
}

impl<S: AsyncStream> LineFramer<S> {
    /// Wrap a stream with no I/O deadline.
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, LineCodec::new()),
            outgoing: Vec::new(),
            eof: false,
            timeout: None,
        }
    }

    /// Attach a deadline to every blocking read and flush.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read the next line.
    ///
    /// Returns `Ok(None)` at end of stream once every buffered line,
    /// including an unterminated remainder, has been handed out. A line over
    /// the length cap comes back as [`FnaaError::LineTooLong`]; the framer
    /// stays usable and the next call returns the line after it.
    pub async fn read_line(&mut self) -> FnaaResult<Option<String>> {
        if self.eof {
            return Ok(None);
        }
        let next = deadline(self.timeout, self.framed.next()).await?;
        match next {
            Some(Ok(Line::Text(line))) => {
                trace!(line = %line, "read line");
                Ok(Some(line))
            }
            Some(Ok(Line::Overflow)) => Err(FnaaError::LineTooLong),
            Some(Err(e)) => Err(e),
            None => {
                self.eof = true;
                Ok(None)
            }
        }
    }

    /// Read the next line, treating end of stream as an error.
    pub async fn expect_line(&mut self) -> FnaaResult<String> {
        self.read_line().await?.ok_or(FnaaError::ConnectionClosed)
    }

    /// Queue a line (terminator appended). Nothing is sent until `flush`.
    pub fn write_line(&mut self, text: &str) {
        trace!(line = %text, "queue line");
        self.outgoing.push(text.to_string());
    }

    /// Send every queued line.
    pub async fn flush(&mut self) -> FnaaResult<()> {
        if self.outgoing.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.outgoing);
        let framed = &mut self.framed;
        let write = async move {
            for line in pending {
                framed.feed(line).await?;
            }
            SinkExt::<String>::flush(framed).await
        };
        deadline(self.timeout, write).await?
    }

    /// Queue one line and flush it.
    pub async fn send_line(&mut self, text: &str) -> FnaaResult<()> {
        self.write_line(text);
        self.flush().await
    }

    /// Flush pending output and shut down the write half.
    pub async fn shutdown(&mut self) -> FnaaResult<()> {
        self.flush().await?;
        SinkExt::<String>::close(&mut self.framed).await
    }

    /// Whether the peer has closed its write half and every line was read.
    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

/// Run `fut`, failing with [`FnaaError::Timeout`] once `limit` passes.
async fn deadline<F: Future>(limit: Option<Duration>, fut: F) -> FnaaResult<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| FnaaError::Timeout),
        None => Ok(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MAX_LINE_LEN;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn reads_lines_across_writes() {
        let (client, mut server) = duplex(64);
        let mut framer = LineFramer::new(client);

        tokio::spawn(async move {
            server.write_all(b"220 DA").await.unwrap();
            server.write_all(b"TA\r\nflow=a").await.unwrap();
            server.write_all(b"\r\n220 OK\r\n").await.unwrap();
        });

        assert_eq!(framer.read_line().await.unwrap().as_deref(), Some("220 DATA"));
        assert_eq!(framer.read_line().await.unwrap().as_deref(), Some("flow=a"));
        assert_eq!(framer.read_line().await.unwrap().as_deref(), Some("220 OK"));
        assert_eq!(framer.read_line().await.unwrap(), None);
        assert!(framer.is_eof());
    }

    #[tokio::test]
    async fn partial_line_at_eof() {
        let (client, mut server) = duplex(64);
        let mut framer = LineFramer::new(client);
        server.write_all(b"QUIT\r\n220 Bye").await.unwrap();
        drop(server);

        assert_eq!(framer.read_line().await.unwrap().as_deref(), Some("QUIT"));
        assert_eq!(framer.read_line().await.unwrap().as_deref(), Some("220 Bye"));
        assert_eq!(framer.read_line().await.unwrap(), None);
        assert!(matches!(
            framer.expect_line().await,
            Err(FnaaError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn writes_are_buffered_until_flush() {
        let (client, server) = duplex(256);
        let mut writer = LineFramer::new(client);
        let mut reader = LineFramer::new(server);

        writer.write_line("220 DATA");
        writer.write_line("namespace=flow.unix.ar");
        writer.write_line("220 OK");
        writer.flush().await.unwrap();

        assert_eq!(reader.expect_line().await.unwrap(), "220 DATA");
        assert_eq!(reader.expect_line().await.unwrap(), "namespace=flow.unix.ar");
        assert_eq!(reader.expect_line().await.unwrap(), "220 OK");
    }

    #[tokio::test]
    async fn read_deadline() {
        let (client, _server) = duplex(64);
        let mut framer =
            LineFramer::new(client).with_timeout(Some(Duration::from_millis(50)));
        assert!(matches!(framer.read_line().await, Err(FnaaError::Timeout)));
    }

    #[tokio::test]
    async fn long_line_is_reported_once_and_skipped() {
        let (client, mut server) = duplex(8192);
        let mut framer = LineFramer::new(client);

        tokio::spawn(async move {
            server.write_all(&vec![b'a'; MAX_LINE_LEN + 4096]).await.unwrap();
            server.write_all(b"\r\nGET ns\r\n").await.unwrap();
        });

        assert!(matches!(framer.read_line().await, Err(FnaaError::LineTooLong)));
        assert_eq!(framer.expect_line().await.unwrap(), "GET ns");
    }
}
