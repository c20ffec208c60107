/// Client side of the chat directory protocol
///
/// A client plays two roles under one nickname: it sends requests to the
/// server and reads one response each, and it listens on its own port for
/// the room messages, private messages and broadcasts the server pushes.
use rand::Rng;
use roomchat_protocol::{
    Error, Kind, Listener, Packet, Reply, Responder, Transport, TransportError, DEFAULT_TIMEOUT,
};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    ops::Range,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, warn};

pub mod commands;

pub use commands::{parse, Command, CommandError, HELP};

/// Ports the listener picks from when none is given
pub const DEFAULT_PORT_RANGE: Range<u16> = 45679..45965;

// Random picks before giving up on a crowded range
const BIND_ATTEMPTS: usize = 8;

/// Where the push listener binds
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ListenPort {
    Fixed(u16),
    Random(Range<u16>),
}

impl Default for ListenPort {
    fn default() -> Self {
        ListenPort::Random(DEFAULT_PORT_RANGE)
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub nickname: String,
    /// Directory server requests go to
    pub server: SocketAddr,
    /// Interface the push listener binds to
    pub listen_host: IpAddr,
    pub listen_port: ListenPort,
    /// Bound on every connect, read and write
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(nickname: impl Into<String>, server: SocketAddr) -> Self {
        Self {
            nickname: nickname.into(),
            server,
            listen_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: ListenPort::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot listen for pushes: {0}")]
    Listen(#[from] io::Error),
}

/// A running client: push listener plus request sender
pub struct Client {
    nickname: Arc<RwLock<String>>,
    server: SocketAddr,
    listen_port: u16,
    transport: Transport,
    shutdown: Option<oneshot::Sender<()>>,
    listener: JoinHandle<()>,
}

impl Client {
    /// Starts listening for pushes; every pushed packet goes to `on_deliver`
    ///
    /// Nothing is sent to the server until [`Client::connect`].
    pub async fn start<F>(config: ClientConfig, on_deliver: F) -> Result<Self, ClientError>
    where
        F: Fn(Packet) + Send + Sync + 'static,
    {
        let transport = Transport::new(config.timeout);
        let listener = bind(config.listen_host, &config.listen_port, transport).await?;
        let listen_port = listener.local_addr()?.port();
        debug!(port = listen_port, "listening for pushes");

        let nickname = Arc::new(RwLock::new(config.nickname));
        let inbox = Arc::new(Inbox {
            nickname: Arc::clone(&nickname),
            on_deliver,
        });
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let listener = tokio::spawn(listener.run_until(inbox, async move {
            let _ = shutdown_rx.await;
        }));

        Ok(Self {
            nickname,
            server: config.server,
            listen_port,
            transport,
            shutdown: Some(shutdown),
            listener,
        })
    }

    pub fn nickname(&self) -> String {
        self.nickname
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Changes the nickname used for subsequent requests
    pub fn rename(&self, nickname: impl Into<String>) {
        *self.nickname.write().unwrap_or_else(PoisonError::into_inner) = nickname.into();
    }

    /// Port advertised to the server for pushes
    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Sends one packet to the server and returns its answer
    pub async fn submit(&self, packet: &Packet) -> Result<Packet, TransportError> {
        self.transport.send_one(self.server, packet.clone()).await
    }

    /// Sends `kind` under the current nickname
    pub async fn request(&self, kind: Kind) -> Result<Packet, TransportError> {
        self.submit(&Packet::new(self.nickname(), kind)).await
    }

    /// Registers the nickname and the push port with the server
    pub async fn connect(&self) -> Result<Packet, TransportError> {
        self.request(Kind::Connect {
            listen_port: self.listen_port,
        })
        .await
    }

    /// Leaves the server and stops listening for pushes
    pub async fn disconnect(mut self) -> Result<Packet, TransportError> {
        let response = self.request(Kind::Disconnect).await;
        self.stop().await;
        response
    }

    /// Stops listening for pushes without telling the server
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
            if let Err(err) = (&mut self.listener).await {
                warn!(error = %err, "push listener ended abnormally");
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn bind(host: IpAddr, port: &ListenPort, transport: Transport) -> io::Result<Listener> {
    match port {
        ListenPort::Fixed(port) => Listener::bind((host, *port), transport).await,
        ListenPort::Random(range) if range.is_empty() => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("empty port range {range:?}"),
        )),
        ListenPort::Random(range) => {
            let mut last_err = None;
            for _ in 0..BIND_ATTEMPTS {
                let port = rand::thread_rng().gen_range(range.clone());
                match Listener::bind((host, port), transport).await {
                    Ok(listener) => return Ok(listener),
                    Err(err) => {
                        debug!(port, error = %err, "port unavailable");
                        last_err = Some(err);
                    }
                }
            }
            Err(last_err.unwrap_or_else(|| io::ErrorKind::AddrInUse.into()))
        }
    }
}

/// Receives pushes and acknowledges each with an echo
struct Inbox<F> {
    nickname: Arc<RwLock<String>>,
    on_deliver: F,
}

impl<F> Responder for Inbox<F>
where
    F: Fn(Packet) + Send + Sync + 'static,
{
    fn respond(&self, request: Result<Packet, Error>, peer: SocketAddr) -> Reply {
        match request {
            Ok(packet) => {
                debug!(%peer, from = %packet.username, opcode = %packet.opcode(), "push");
                let ack = packet.clone();
                (self.on_deliver)(packet);
                Reply::Packet(ack)
            }
            Err(err) => {
                warn!(%peer, error = %err, "undecodable push");
                Reply::Malformed {
                    opcode: err.opcode(),
                    responder: self
                        .nickname
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone(),
                }
            }
        }
    }
}
