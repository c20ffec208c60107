/// One-request-one-response delivery over short-lived TCP connections
///
/// The same primitive carries client requests to the server and server
/// pushes to clients: open a connection, write one packet, read one packet,
/// close.
use crate::{codec::encode_rejection, Error, Opcode, Packet, PacketCodec};
use futures::{SinkExt, StreamExt};
use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream, ToSocketAddrs},
    select,
    time::timeout,
};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Bound on connecting and on each read or write of a single exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure to complete an exchange; never put on the wire
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {addr} refused")]
    Refused { addr: SocketAddr },

    #[error("cannot connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    #[error("timed out talking to {addr}")]
    Timeout { addr: SocketAddr },

    #[error("{addr} closed the connection without answering")]
    Closed { addr: SocketAddr },

    #[error("exchange with {addr} failed: {source}")]
    Protocol { addr: SocketAddr, source: Error },
}

impl TransportError {
    /// Whether the peer actively refused the connection (presumed dead)
    pub fn is_refused(&self) -> bool {
        matches!(self, TransportError::Refused { .. })
    }
}

/// Outbound side of the transport
#[derive(Clone, Copy, Debug)]
pub struct Transport {
    timeout: Duration,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Transport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delivers `packet` to `addr` and waits for exactly one answer
    pub async fn send_one(
        &self,
        addr: SocketAddr,
        packet: Packet,
    ) -> Result<Packet, TransportError> {
        let stream = match timeout(self.timeout, TcpStream::connect(addr)).await {
            Err(_) => return Err(TransportError::Timeout { addr }),
            Ok(Err(err)) if err.kind() == io::ErrorKind::ConnectionRefused => {
                return Err(TransportError::Refused { addr })
            }
            Ok(Err(source)) => return Err(TransportError::Connect { addr, source }),
            Ok(Ok(stream)) => stream,
        };

        let mut framed = Framed::new(stream, PacketCodec::default());
        timeout(self.timeout, framed.send(packet))
            .await
            .map_err(|_| TransportError::Timeout { addr })?
            .map_err(|source| TransportError::Protocol { addr, source })?;

        match timeout(self.timeout, framed.next()).await {
            Err(_) => Err(TransportError::Timeout { addr }),
            Ok(None) => Err(TransportError::Closed { addr }),
            Ok(Some(Err(source))) => Err(TransportError::Protocol { addr, source }),
            Ok(Some(Ok(response))) => Ok(response),
        }
    }
}

/// Answer written back on an inbound connection
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    Packet(Packet),
    /// The request could not be decoded; answer `MalformedMessage` under
    /// the responder's own name
    Malformed {
        opcode: Option<Opcode>,
        responder: String,
    },
}

/// Handles one decoded (or undecodable) inbound request
pub trait Responder: Send + Sync + 'static {
    fn respond(&self, request: Result<Packet, Error>, peer: SocketAddr) -> Reply;
}

/// Inbound side of the transport
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    transport: Transport,
}

impl Listener {
    pub fn new(listener: TcpListener, transport: Transport) -> Self {
        Self {
            listener,
            transport,
        }
    }

    pub async fn bind(addr: impl ToSocketAddrs, transport: Transport) -> io::Result<Self> {
        Ok(Self::new(TcpListener::bind(addr).await?, transport))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves, serving each one in
    /// its own task
    pub async fn run_until<R, F>(self, responder: Arc<R>, shutdown: F)
    where
        R: Responder,
        F: Future<Output = ()> + Send,
    {
        let Listener {
            listener,
            transport,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let responder = Arc::clone(&responder);
                        tokio::spawn(async move {
                            let served = serve_connection(stream, peer, responder, transport).await;
                            if let Err(err) = served {
                                debug!(%peer, error = %err, "connection ended with error");
                            }
                        });
                    }
                    Err(err) => warn!(error = ?err, "failed to accept connection"),
                },
            }
        }
    }
}

// Reads one request, writes one reply, closes
async fn serve_connection<R: Responder>(
    stream: TcpStream,
    peer: SocketAddr,
    responder: Arc<R>,
    transport: Transport,
) -> Result<(), Error> {
    let mut framed = Framed::new(stream, PacketCodec::default());

    let request = match timeout(transport.timeout(), framed.next()).await {
        Err(_) => {
            debug!(%peer, "no request before timeout");
            return Ok(());
        }
        Ok(None) => return Ok(()),
        Ok(Some(Err(Error::IoError(err)))) => return Err(err.into()),
        Ok(Some(request)) => request,
    };

    match responder.respond(request, peer) {
        Reply::Packet(packet) => {
            timeout(transport.timeout(), framed.send(packet))
                .await
                .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))??;
        }
        Reply::Malformed { opcode, responder } => {
            let line = encode_rejection(opcode, &responder)?;
            let stream = framed.get_mut();
            timeout(transport.timeout(), stream.write_all(line.as_bytes()))
                .await
                .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))??;
        }
    }

    framed.get_mut().shutdown().await?;
    Ok(())
}
