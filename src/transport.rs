use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::{timeout, Duration};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

use crate::config::ConnectionConfig;

const READ_CHUNK: usize = 512;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {link}: {source}")]
    Connect {
        link: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot resolve {0}")]
    Resolve(String),
    #[error("connection closed by peer")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    fn connect(config: &ConnectionConfig, source: io::Error) -> Self {
        TransportError::Connect {
            link: config.to_string(),
            source,
        }
    }
}

pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Outcome of a bounded wait for inbound bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Data(Vec<u8>),
    Timeout,
}

pub enum Transport {
    Serial(Box<dyn SerialPortIO>),
    Tcp(TcpStream),
    Udp { socket: UdpSocket, remote: SocketAddr },
}

impl Transport {
    /// Opens the link described by `config`.
    ///
    /// Serial and TCP fail fast when the port or host is unusable. UDP only
    /// binds the local socket; the remote end is merely resolved.
    pub async fn open(config: &ConnectionConfig) -> Result<Self, TransportError> {
        let transport = match config {
            ConnectionConfig::Serial { port, baud } => {
                let path = port.clone();
                let baud = *baud;
                let opened = tokio::task::spawn_blocking(move || {
                    tokio_serial::new(&path, baud)
                        .data_bits(tokio_serial::DataBits::Eight)
                        .parity(tokio_serial::Parity::None)
                        .stop_bits(tokio_serial::StopBits::One)
                        .flow_control(tokio_serial::FlowControl::None)
                        .open_native_async()
                })
                .await
                .map_err(|e| TransportError::connect(config, io::Error::other(e)))?;
                let stream = opened.map_err(|e| TransportError::connect(config, e.into()))?;
                Transport::Serial(Box::new(stream))
            }
            ConnectionConfig::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|e| TransportError::connect(config, e))?;
                stream.set_nodelay(true)?;
                Transport::Tcp(stream)
            }
            ConnectionConfig::Udp {
                local_port,
                remote_host,
                remote_port,
            } => {
                let socket = UdpSocket::bind(("0.0.0.0", *local_port))
                    .await
                    .map_err(|e| TransportError::connect(config, e))?;
                let remote = lookup_host((remote_host.as_str(), *remote_port))
                    .await
                    .map_err(|e| TransportError::connect(config, e))?
                    .next()
                    .ok_or_else(|| {
                        TransportError::Resolve(format!("{}:{}", remote_host, remote_port))
                    })?;
                Transport::Udp { socket, remote }
            }
        };

        info!("opened {}", config);
        Ok(transport)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Transport::Serial(_) => "serial",
            Transport::Tcp(_) => "tcp",
            Transport::Udp { .. } => "udp",
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        match self {
            Transport::Serial(port) => {
                port.write_all(bytes).await?;
                port.flush().await?;
                Ok(bytes.len())
            }
            Transport::Tcp(stream) => {
                stream.write_all(bytes).await?;
                Ok(bytes.len())
            }
            Transport::Udp { socket, remote } => Ok(socket.send_to(bytes, *remote).await?),
        }
    }

    /// Waits up to `wait` for inbound bytes.
    ///
    /// Running out of time is [`Received::Timeout`], the normal idle case.
    /// A stream whose peer has gone away is [`TransportError::Closed`].
    pub async fn receive(&mut self, wait: Duration) -> Result<Received, TransportError> {
        let mut buf = [0u8; READ_CHUNK];
        let datagram = matches!(self, Transport::Udp { .. });

        let read = match self {
            Transport::Serial(port) => timeout(wait, port.read(&mut buf)).await,
            Transport::Tcp(stream) => timeout(wait, stream.read(&mut buf)).await,
            Transport::Udp { socket, .. } => {
                timeout(wait, async { socket.recv_from(&mut buf).await.map(|(n, _)| n) }).await
            }
        };

        match read {
            Err(_) => Ok(Received::Timeout),
            Ok(Ok(0)) if !datagram => Err(TransportError::Closed),
            Ok(Ok(n)) => Ok(Received::Data(buf[..n].to_vec())),
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Ok(Received::Timeout),
            // ICMP port-unreachable from an earlier send surfaces here on some
            // platforms; it says nothing about this socket.
            Ok(Err(e))
                if datagram
                    && matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                    ) =>
            {
                debug!("ignoring {} on udp receive", e);
                Ok(Received::Timeout)
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        match self {
            Transport::Serial(port) => port.shutdown().await?,
            Transport::Tcp(stream) => stream.shutdown().await?,
            Transport::Udp { .. } => {}
        }
        debug!("closed {} link", self.kind());
        Ok(())
    }
}
