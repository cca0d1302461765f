//! Transport: the TCP connection split into a framed line reader and a
//! shared, write-locked line writer.

use crate::irc::codec::{self, LineCodec};
use crate::irc::error::SessionError;
use crate::irc::message::ProtocolMessage;
use futures::StreamExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, warn};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Resolve `host` and open a TCP connection, each step bounded by `timeout`.
pub async fn connect_transport(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<(BoxedReader, BoxedWriter), SessionError> {
    let timed_out = || SessionError::ConnectTimeout {
        host: host.to_string(),
        port,
        timeout,
    };

    let addrs: Vec<SocketAddr> =
        match tokio::time::timeout(timeout, tokio::net::lookup_host((host, port))).await {
            Err(_) => return Err(timed_out()),
            Ok(Err(source)) => {
                return Err(SessionError::Resolve {
                    host: host.to_string(),
                    source,
                })
            }
            Ok(Ok(addrs)) => addrs.collect(),
        };
    if addrs.is_empty() {
        return Err(SessionError::NoAddress {
            host: host.to_string(),
        });
    }
    debug!(?addrs, "Resolved {}", host);

    let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addrs[..])).await {
        Err(_) => return Err(timed_out()),
        Ok(Err(source)) => {
            return Err(SessionError::Connect {
                host: host.to_string(),
                port,
                source,
            })
        }
        Ok(Ok(stream)) => stream,
    };
    stream.set_nodelay(true)?;

    let (reader, writer) = stream.into_split();
    Ok((Box::new(reader), Box::new(writer)))
}

/// Yields complete protocol lines from the read half.
pub struct LineReader {
    frames: FramedRead<BoxedReader, LineCodec>,
}

impl LineReader {
    pub fn new(reader: BoxedReader) -> Self {
        Self {
            frames: FramedRead::new(reader, LineCodec::new()),
        }
    }

    /// Wait for the next complete line, or `None` once the peer has closed
    /// the stream.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.frames.next().await.transpose()
    }
}

/// Serializes every outgoing write behind one lock. Shared between the
/// receive loop and the outbound sender task.
pub struct LineWriter {
    writer: Mutex<Option<BoxedWriter>>,
    timeout: Duration,
}

impl LineWriter {
    pub fn new(writer: BoxedWriter, timeout: Duration) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
            timeout,
        }
    }

    /// Write one message followed by CRLF.
    ///
    /// A timeout on a `critical` message is fatal; on any other message it
    /// is logged and swallowed. Either way the writer is dropped, since part
    /// of the line may already be on the wire and later lines would be
    /// glued to it.
    pub async fn send(&self, msg: &ProtocolMessage, critical: bool) -> Result<(), SessionError> {
        let line = codec::serialize(msg);
        debug!(">> {}", line);

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(SessionError::NotConnected);
        };

        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");

        let write = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        };
        if let Ok(result) = tokio::time::timeout(self.timeout, write).await {
            return result.map_err(SessionError::from);
        }
        guard.take();
        if critical {
            error!(line = %line, "Critical message timed out");
            Err(SessionError::CriticalTimeout { line })
        } else {
            warn!(line = %line, "Message timed out, dropping it and the transport");
            Ok(())
        }
    }

    /// Shut the write half down. Later sends fail with `NotConnected`.
    pub async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Transport shutdown failed: {}", e);
            }
        }
    }

    pub async fn is_open(&self) -> bool {
        self.writer.lock().await.is_some()
    }
}
