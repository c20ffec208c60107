/// Turns one request into a response plus the pushes it triggers
use crate::directory::{Directory, DirectoryError, User};
use roomchat_protocol::{is_valid_name, is_valid_text, ErrorCode, Kind, Packet};
use std::net::SocketAddr;

/// Outcome of routing one request
#[derive(Debug)]
pub struct Routed {
    /// Returned to the requester on its own connection
    pub response: Packet,
    /// Delivered to each user on a fresh connection
    pub fanout: Vec<(User, Packet)>,
}

impl Routed {
    fn respond(response: Packet) -> Self {
        Self {
            response,
            fanout: Vec::new(),
        }
    }
}

/// Applies `request` to the directory
///
/// Pushes carry the request itself so recipients see the original sender
/// and timestamp. Room messages go to every member, sender included.
pub fn route(request: &Packet, directory: &Directory, peer: SocketAddr) -> Routed {
    if let Err(code) = validate(request) {
        return Routed::respond(request.reject(code));
    }

    let nickname = request.username.as_str();
    let settle = |result: Result<(), DirectoryError>| match result {
        Ok(()) => request.reply(request.kind.clone()),
        Err(err) => request.reject(err.into()),
    };

    use Kind::*;
    match &request.kind {
        Connect { listen_port } => {
            Routed::respond(settle(directory.connect(nickname, peer.ip(), *listen_port)))
        }
        Disconnect => Routed::respond(settle(directory.disconnect(nickname))),
        CreateRoom { room } => Routed::respond(settle(directory.create_room(room))),
        JoinRoom { room } => Routed::respond(settle(directory.join_room(room, nickname))),
        LeaveRoom { room } => Routed::respond(settle(directory.leave_room(room, nickname))),
        MessageRoom { room, .. } => match directory.recipients_in(room) {
            Ok(recipients) => Routed {
                response: request.reply(request.kind.clone()),
                fanout: fan_out(recipients, request),
            },
            Err(err) => Routed::respond(request.reject(err.into())),
        },
        ListRooms { .. } => Routed::respond(request.reply(ListRooms {
            rooms: directory.list_rooms(),
        })),
        ListUsers { .. } => Routed::respond(request.reply(ListUsers {
            users: directory.list_users(),
        })),
        ListUsersInRoom { room, .. } => match directory.list_users_in_room(room) {
            Ok(users) => Routed::respond(request.reply(ListUsersInRoom {
                room: room.clone(),
                users,
            })),
            Err(err) => Routed::respond(request.reject(err.into())),
        },
        PrivateMessage { recipient, .. } => match directory.resolve_user(recipient) {
            Some(user) => Routed {
                response: request.reply(request.kind.clone()),
                fanout: fan_out([user], request),
            },
            None => Routed::respond(request.reject(ErrorCode::UserNotFound)),
        },
        Broadcast { .. } => Routed {
            response: request.reply(request.kind.clone()),
            fanout: fan_out(directory.users(), request),
        },
    }
}

fn fan_out(recipients: impl IntoIterator<Item = User>, packet: &Packet) -> Vec<(User, Packet)> {
    recipients
        .into_iter()
        .map(|user| (user, packet.clone()))
        .collect()
}

// Semantic checks the codec leaves to us
fn validate(request: &Packet) -> Result<(), ErrorCode> {
    if !request.is_ok() || !is_valid_name(&request.username) {
        return Err(ErrorCode::MalformedMessage);
    }
    if request.kind.room().is_some_and(|room| !is_valid_name(room)) {
        return Err(ErrorCode::MalformedMessage);
    }
    if request.kind.message().is_some_and(|text| !is_valid_text(text)) {
        return Err(ErrorCode::MalformedMessage);
    }
    match &request.kind {
        Kind::Connect { listen_port: 0 } => Err(ErrorCode::MalformedMessage),
        Kind::PrivateMessage { recipient, .. } if !is_valid_name(recipient) => {
            Err(ErrorCode::MalformedMessage)
        }
        _ => Ok(()),
    }
}
