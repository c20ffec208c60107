use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use roomchat_protocol::{
    decode, Error, ErrorCode, Kind, Listener, Packet, Reply, Responder, Transport,
};
use roomchat_server::{Server, ServerConfig};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(3);

/// Stands in for a client's listening endpoint
struct Inbox {
    tx: mpsc::UnboundedSender<Packet>,
}

impl Responder for Inbox {
    fn respond(&self, request: Result<Packet, Error>, _peer: SocketAddr) -> Reply {
        match request {
            Ok(packet) => {
                let _ = self.tx.send(packet.clone());
                Reply::Packet(packet)
            }
            Err(err) => Reply::Malformed {
                opcode: err.opcode(),
                responder: "inbox".into(),
            },
        }
    }
}

struct TestServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

async fn start_server() -> Result<TestServer> {
    let server = Server::bind(ServerConfig {
        addr: "127.0.0.1:0".parse()?,
        timeout: Duration::from_secs(1),
        ..ServerConfig::default()
    })
    .await?;
    let addr = server.local_addr()?;
    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run_until(async move {
        let _ = shutdown_rx.await;
    }));
    Ok(TestServer {
        addr,
        shutdown,
        task,
    })
}

struct TestClient {
    nickname: String,
    server: SocketAddr,
    inbox: mpsc::UnboundedReceiver<Packet>,
}

impl TestClient {
    async fn connect(server: SocketAddr, nickname: &str) -> Result<Self> {
        let listener = Listener::bind("127.0.0.1:0", Transport::default()).await?;
        let port = listener.local_addr()?.port();
        let (tx, inbox) = mpsc::unbounded_channel();
        tokio::spawn(listener.run_until(Arc::new(Inbox { tx }), std::future::pending()));

        let client = Self {
            nickname: nickname.to_string(),
            server,
            inbox,
        };
        let response = client.submit(Kind::Connect { listen_port: port }).await?;
        assert!(response.is_ok(), "{response:?}");
        Ok(client)
    }

    async fn submit(&self, kind: Kind) -> Result<Packet> {
        let packet = Packet::new(&self.nickname, kind);
        Ok(Transport::default().send_one(self.server, packet).await?)
    }

    async fn next_push(&mut self) -> Packet {
        timeout(WAIT, self.inbox.recv())
            .await
            .expect("push should arrive")
            .expect("inbox open")
    }
}

#[tokio::test]
async fn room_messages_private_messages_and_broadcasts_are_pushed() -> Result<()> {
    let server = start_server().await?;
    let mut alice = TestClient::connect(server.addr, "alice").await?;
    let mut bob = TestClient::connect(server.addr, "bob").await?;

    let created = alice.submit(Kind::CreateRoom { room: "lobby".into() }).await?;
    assert!(created.is_ok());
    for client in [&alice, &bob] {
        let joined = client.submit(Kind::JoinRoom { room: "lobby".into() }).await?;
        assert!(joined.is_ok());
    }

    let message = Kind::MessageRoom {
        room: "lobby".into(),
        message: "hi all".into(),
    };
    let response = alice.submit(message.clone()).await?;
    assert!(response.is_ok());
    for client in [&mut alice, &mut bob] {
        let push = client.next_push().await;
        assert_eq!(push.username, "alice");
        assert_eq!(push.kind, message);
    }

    let private = Kind::PrivateMessage {
        recipient: "alice".into(),
        message: "just you".into(),
    };
    assert!(bob.submit(private.clone()).await?.is_ok());
    let push = alice.next_push().await;
    assert_eq!(push.username, "bob");
    assert_eq!(push.kind, private);

    let broadcast = Kind::Broadcast {
        message: "everyone".into(),
    };
    assert!(bob.submit(broadcast.clone()).await?.is_ok());
    assert_eq!(alice.next_push().await.kind, broadcast);
    assert_eq!(bob.next_push().await.kind, broadcast);

    let listing = alice
        .submit(Kind::ListUsersInRoom {
            room: "lobby".into(),
            users: vec![],
        })
        .await?;
    assert_eq!(
        listing.kind,
        Kind::ListUsersInRoom {
            room: "lobby".into(),
            users: vec!["alice".into(), "bob".into()]
        }
    );

    let _ = server.shutdown.send(());
    server.task.await??;
    Ok(())
}

#[tokio::test]
async fn errors_come_back_in_the_response() -> Result<()> {
    let server = start_server().await?;
    let alice = TestClient::connect(server.addr, "alice").await?;

    let response = alice
        .submit(Kind::MessageRoom {
            room: "ghost".into(),
            message: "boo".into(),
        })
        .await?;
    assert_eq!(response.error, ErrorCode::RoomNotFound);

    let response = alice
        .submit(Kind::PrivateMessage {
            recipient: "bob".into(),
            message: "hello?".into(),
        })
        .await?;
    assert_eq!(response.error, ErrorCode::UserNotFound);

    let impostor = TestClient::connect(server.addr, "carol").await?;
    let again = impostor.submit(Kind::Connect { listen_port: 9 }).await?;
    assert_eq!(again.error, ErrorCode::UserAlreadyExists);

    let _ = server.shutdown.send(());
    server.task.await??;
    Ok(())
}

#[tokio::test]
async fn undecodable_requests_get_malformed_message() -> Result<()> {
    let server = start_server().await?;

    let mut stream = TcpStream::connect(server.addr).await?;
    stream.write_all(b"4\x1f0\x1f0\x1falice\n").await?;
    let mut line = String::new();
    timeout(WAIT, BufReader::new(stream).read_line(&mut line)).await??;

    let response = decode(&line)?;
    assert_eq!(response.error, ErrorCode::MalformedMessage);
    assert_eq!(response.username, "server");
    assert_eq!(response.kind, Kind::JoinRoom { room: "".into() });

    let _ = server.shutdown.send(());
    server.task.await??;
    Ok(())
}

#[tokio::test]
async fn unreachable_users_are_purged() -> Result<()> {
    let server = start_server().await?;
    let alice = TestClient::connect(server.addr, "alice").await?;

    // advertise a port nobody listens on
    let dead_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.port()
    };
    let ghost = Packet::new("ghost", Kind::Connect { listen_port: dead_port });
    let response = Transport::default().send_one(server.addr, ghost).await?;
    assert!(response.is_ok());
    let joined = Transport::default()
        .send_one(
            server.addr,
            Packet::new("ghost", Kind::CreateRoom { room: "crypt".into() }),
        )
        .await?;
    assert!(joined.is_ok());
    Transport::default()
        .send_one(
            server.addr,
            Packet::new("ghost", Kind::JoinRoom { room: "crypt".into() }),
        )
        .await?;

    assert!(alice
        .submit(Kind::Broadcast {
            message: "anyone there?".into()
        })
        .await?
        .is_ok());

    let purged = timeout(WAIT, async {
        loop {
            let users = alice.submit(Kind::ListUsers { users: vec![] }).await?;
            if users.kind == (Kind::ListUsers { users: vec!["alice".into()] }) {
                return anyhow::Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(matches!(purged, Ok(Ok(()))), "ghost was never purged");

    let members = alice
        .submit(Kind::ListUsersInRoom {
            room: "crypt".into(),
            users: vec![],
        })
        .await?;
    assert_eq!(
        members.kind,
        Kind::ListUsersInRoom {
            room: "crypt".into(),
            users: vec![]
        }
    );

    let _ = server.shutdown.send(());
    server.task.await??;
    Ok(())
}

#[tokio::test]
async fn shutdown_disconnects_everyone() -> Result<()> {
    let server = start_server().await?;
    let mut alice = TestClient::connect(server.addr, "alice").await?;
    let mut bob = TestClient::connect(server.addr, "bob").await?;

    let _ = server.shutdown.send(());
    server.task.await??;

    for client in [&mut alice, &mut bob] {
        let farewell = client.next_push().await;
        assert_eq!(farewell.kind, Kind::Disconnect);
        assert_eq!(farewell.username, "server");
    }
    Ok(())
}
