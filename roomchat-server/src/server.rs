/// Directory server endpoint: routes requests and performs fan-out pushes
use crate::{
    directory::{Directory, User},
    router::{route, Routed},
};
use anyhow::Result;
use futures::future::join_all;
use roomchat_protocol::{
    Error, Kind, Listener, Packet, Reply, Responder, Transport, DEFAULT_TIMEOUT,
};
use std::{
    future::Future,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info, warn};

/// Default port the server listens on
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to accept requests on
    pub addr: SocketAddr,
    /// Username the server signs its own packets with
    pub name: String,
    /// Bound on every connect, read and write
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            name: String::from("server"),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct Server {
    listener: Listener,
    endpoint: Arc<Endpoint>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let transport = Transport::new(config.timeout);
        let listener = Listener::bind(config.addr, transport).await?;
        Ok(Self {
            listener,
            endpoint: Arc::new(Endpoint {
                name: config.name,
                directory: Arc::new(Directory::new()),
                transport,
            }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn directory(&self) -> Arc<Directory> {
        Arc::clone(&self.endpoint.directory)
    }

    /// Serves requests until `shutdown` resolves, then tells every
    /// connected user the server is going away
    ///
    /// Requests already being served when `shutdown` resolves may still
    /// finish after the directory is drained; a user registered that late
    /// gets no farewell `Disconnect`.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, endpoint } = self;
        listener.run_until(Arc::clone(&endpoint), shutdown).await;
        endpoint.shut_down().await;
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

struct Endpoint {
    name: String,
    directory: Arc<Directory>,
    transport: Transport,
}

impl Responder for Endpoint {
    fn respond(&self, request: Result<Packet, Error>, peer: SocketAddr) -> Reply {
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                warn!(%peer, error = %err, "rejecting malformed request");
                return Reply::Malformed {
                    opcode: err.opcode(),
                    responder: self.name.clone(),
                };
            }
        };

        debug!(%peer, user = %request.username, opcode = %request.opcode(), "request");
        let Routed { response, fanout } = route(&request, &self.directory, peer);
        if !response.is_ok() {
            info!(
                %peer,
                user = %request.username,
                opcode = %request.opcode(),
                error = %response.error,
                "request refused"
            );
        }

        for (user, packet) in fanout {
            tokio::spawn(push(
                Arc::clone(&self.directory),
                self.transport,
                user,
                packet,
            ));
        }

        Reply::Packet(response)
    }
}

impl Endpoint {
    async fn shut_down(&self) {
        let users = self.directory.drain();
        info!(users = users.len(), "shutting down");
        let farewells = users.into_iter().map(|user| {
            let packet = Packet::new(self.name.clone(), Kind::Disconnect);
            async move {
                if let Err(err) = self.transport.send_one(user.address(), packet).await {
                    debug!(user = %user.nickname, error = %err, "farewell not delivered");
                }
            }
        });
        join_all(farewells).await;
    }
}

// One push on its own connection; a refused connection means the user is gone
async fn push(directory: Arc<Directory>, transport: Transport, user: User, packet: Packet) {
    match transport.send_one(user.address(), packet).await {
        Ok(_) => debug!(user = %user.nickname, "pushed"),
        Err(err) if err.is_refused() => {
            if directory.remove_dead(&user) {
                info!(user = %user.nickname, "removed unreachable user");
            }
        }
        Err(err) => warn!(user = %user.nickname, error = %err, "push failed"),
    }
}
