/// Line-oriented front end: reads commands from stdin, prints responses and pushes
use anyhow::Result;
use roomchat_client::{parse, Client, ClientConfig, Command, HELP};
use roomchat_protocol::{is_valid_name, ErrorCode, Kind, Packet};
use time::macros::format_description;
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    select,
    sync::mpsc,
};
use tracing::warn;

pub async fn run(config: ClientConfig) -> Result<()> {
    let (push_tx, mut pushes) = mpsc::unbounded_channel::<Packet>();
    let client = Client::start(config, move |packet| {
        let _ = push_tx.send(packet);
    })
    .await?;
    println!(
        "Attempting to connect to {}, listening on port {}",
        client.server(),
        client.listen_port()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    if !register(&client, &mut lines).await? {
        return Ok(());
    }

    loop {
        select! {
            push = pushes.recv() => match push {
                Some(packet) if packet.kind == Kind::Disconnect => {
                    println!("You have been disconnected. Goodbye!");
                    return Ok(());
                }
                Some(packet) => {
                    if let Some(line) = describe_push(&packet) {
                        println!("{line}");
                    }
                }
                None => return Ok(()),
            },
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(Command::Help) => println!("{HELP}"),
                    Ok(Command::Send(kind)) => match client.request(kind).await {
                        Ok(response) => {
                            if let Some(line) = describe_response(&response) {
                                println!("{line}");
                            }
                        }
                        Err(err) => eprintln!("!!! {err}"),
                    },
                    Err(err) => println!("{err}"),
                },
                None => break,
            },
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(err) = ctrl_c {
                    warn!(error = ?err, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    if let Err(err) = client.disconnect().await {
        eprintln!("!!! {err}");
    }
    println!("Exiting program");
    Ok(())
}

// Connects, asking for another nickname while the current one is taken
async fn register(client: &Client, lines: &mut Lines<BufReader<Stdin>>) -> Result<bool> {
    loop {
        let response = client.connect().await?;
        match response.error {
            ErrorCode::NoError => {
                println!("Connection successful!");
                return Ok(true);
            }
            ErrorCode::UserAlreadyExists => println!("Username already in use on the server"),
            other => println!("Unable to connect: {other}"),
        }

        let nickname = loop {
            println!("New username:");
            match lines.next_line().await? {
                Some(line) if is_valid_name(line.trim()) => break line.trim().to_string(),
                Some(_) => println!("Illegal characters in username."),
                None => return Ok(false),
            }
        };
        client.rename(nickname);
    }
}

fn clock(packet: &Packet) -> String {
    packet
        .timestamp
        .format(format_description!("[hour]:[minute]"))
        .unwrap_or(String::new())
}

fn describe_push(packet: &Packet) -> Option<String> {
    let at = clock(packet);
    let from = &packet.username;
    match &packet.kind {
        Kind::MessageRoom { room, message } => Some(format!("{at} <{room}> {from}: {message}")),
        Kind::PrivateMessage { recipient, message } => {
            Some(format!("{at} PM {from} -> {recipient}: {message}"))
        }
        Kind::Broadcast { message } => Some(format!("{at} BROADCAST from <{from}>: {message}")),
        _ => None,
    }
}

// Room messages and broadcasts come back as pushes, so only their failures show
fn describe_response(packet: &Packet) -> Option<String> {
    let at = clock(packet);
    let error = packet.error;
    if !packet.is_ok() {
        let what = match &packet.kind {
            Kind::Connect { .. } => "Unable to connect".to_string(),
            Kind::Disconnect => "Unable to disconnect".to_string(),
            Kind::CreateRoom { room } => format!("Error creating room '{room}'"),
            Kind::JoinRoom { room } => format!("Error joining room '{room}'"),
            Kind::LeaveRoom { room } => format!("Error leaving room '{room}'"),
            Kind::MessageRoom { room, .. } => format!("Unable to message '{room}'"),
            Kind::ListRooms { .. } => "Unable to list rooms".to_string(),
            Kind::ListUsers { .. } => "Unable to list users".to_string(),
            Kind::ListUsersInRoom { room, .. } => format!("Unable to list users in room '{room}'"),
            Kind::PrivateMessage { recipient, .. } => {
                format!("Unable to send private message to '{recipient}'")
            }
            Kind::Broadcast { .. } => "Unable to broadcast".to_string(),
        };
        return Some(format!("{what}: {error}"));
    }

    match &packet.kind {
        Kind::CreateRoom { room } => Some(format!("{at}: Room {room} created")),
        Kind::JoinRoom { room } => Some(format!("{at}: Joined {room}")),
        Kind::LeaveRoom { room } => Some(format!("{at}: Left {room}")),
        Kind::ListRooms { rooms } if rooms.is_empty() => {
            Some("No rooms available. Create one with `/create <room>`.".to_string())
        }
        Kind::ListRooms { rooms } => Some(format!("{at}: Rooms available: {}", rooms.join(", "))),
        Kind::ListUsers { users } => Some(format!("{at}: Users available: {}", users.join(", "))),
        Kind::ListUsersInRoom { room, users } if users.is_empty() => {
            Some(format!("Room '{room}' is empty."))
        }
        Kind::ListUsersInRoom { room, users } => {
            Some(format!("{at}: Users in '{room}': {}", users.join(", ")))
        }
        Kind::PrivateMessage { recipient, message } => Some(format!(
            "{at} PM {} -> {recipient}: {message}",
            packet.username
        )),
        Kind::Connect { .. }
        | Kind::Disconnect
        | Kind::MessageRoom { .. }
        | Kind::Broadcast { .. } => None,
    }
}
