use super::{BenchmarkRequest, GenerationRequest, GenerationResult, ProtocolError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::net::{TcpListener, TcpStream};

/// Newline-delimited JSON over any byte stream.
pub struct LineChannel<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
}

impl<S: AsyncRead + AsyncWrite> LineChannel<S> {
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ProtocolError> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Wait for the next line; EOF is reported as [`ProtocolError::Closed`].
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(ProtocolError::Closed);
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

/// Accepts the single tool connection of a run session.
pub struct ToolServer {
    listener: TcpListener,
}

impl ToolServer {
    pub async fn bind(host: &str, port: u16) -> Result<Self, ProtocolError> {
        let listener = TcpListener::bind((host, port)).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProtocolError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn accept(&self) -> Result<ServerConnection<TcpStream>, ProtocolError> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::info!("Tool connected from {}", peer);
        Ok(ServerConnection::new(stream))
    }
}

/// Runner side of a session.
pub struct ServerConnection<S> {
    channel: LineChannel<S>,
}

impl<S: AsyncRead + AsyncWrite> ServerConnection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            channel: LineChannel::new(stream),
        }
    }

    /// Wait for the tool's `Init` and return its name.
    pub async fn init(&mut self) -> Result<String, ProtocolError> {
        self.channel.receive().await
    }

    pub async fn send(&mut self, request: BenchmarkRequest) -> Result<(), ProtocolError> {
        self.channel
            .send(&GenerationRequest::BenchmarkRequest(request))
            .await
    }

    pub async fn receive(&mut self) -> Result<GenerationResult, ProtocolError> {
        self.channel.receive().await
    }

    /// One strictly ordered request/response exchange.
    pub async fn request(
        &mut self,
        request: BenchmarkRequest,
    ) -> Result<GenerationResult, ProtocolError> {
        self.send(request).await?;
        self.receive().await
    }

    pub async fn stop(&mut self) -> Result<(), ProtocolError> {
        self.channel.send(&GenerationRequest::StopRequest).await
    }
}

/// Tool side of a session.
pub struct ClientConnection<S> {
    channel: LineChannel<S>,
}

impl ClientConnection<TcpStream> {
    pub async fn connect(host: &str, port: u16) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self::new(stream))
    }

    /// Dial until the runner accepts, pausing `delay` between attempts.
    ///
    /// With `max_attempts` set, the last connection error is returned once
    /// the attempts are used up.
    pub async fn connect_with_retry(
        host: &str,
        port: u16,
        delay: Duration,
        max_attempts: Option<u32>,
    ) -> Result<Self, ProtocolError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match Self::connect(host, port).await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    if max_attempts.is_some_and(|max| attempt >= max) {
                        return Err(e);
                    }
                    tracing::warn!(
                        "Could not connect to {}:{} ({}), retrying in {} ms",
                        host,
                        port,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite> ClientConnection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            channel: LineChannel::new(stream),
        }
    }

    pub async fn init(&mut self, name: &str) -> Result<(), ProtocolError> {
        self.channel.send(&name).await
    }

    pub async fn receive(&mut self) -> Result<GenerationRequest, ProtocolError> {
        self.channel.receive().await
    }

    pub async fn send(&mut self, result: &GenerationResult) -> Result<(), ProtocolError> {
        self.channel.send(result).await
    }
}
