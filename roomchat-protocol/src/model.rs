/// Model definition for packets exchanged with the chat directory
use std::fmt;
use time::OffsetDateTime;

/// Separates the fields of one record on the wire
pub const FIELD_SEPARATOR: char = '\u{1f}';

/// Separates the elements of list-valued fields
pub const LIST_SEPARATOR: char = ',';

/// Operation carried by a packet
///
/// Numbers are part of the wire format. New operations get new numbers;
/// existing ones are never reused or reordered.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[repr(u8)]
pub enum Opcode {
    Connect = 1,
    Disconnect = 2,
    CreateRoom = 3,
    JoinRoom = 4,
    LeaveRoom = 5,
    MessageRoom = 6,
    ListRooms = 7,
    ListUsers = 8,
    PrivateMessage = 9,
    Broadcast = 10,
    ListUsersInRoom = 11,
}

impl Opcode {
    pub const ALL: [Opcode; 11] = [
        Opcode::Connect,
        Opcode::Disconnect,
        Opcode::CreateRoom,
        Opcode::JoinRoom,
        Opcode::LeaveRoom,
        Opcode::MessageRoom,
        Opcode::ListRooms,
        Opcode::ListUsers,
        Opcode::PrivateMessage,
        Opcode::Broadcast,
        Opcode::ListUsersInRoom,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .into_iter()
            .find(|opcode| opcode.number() == value)
            .ok_or(value)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Error = 1,
}

impl TryFrom<u8> for Status {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Status::Ok),
            1 => Ok(Status::Error),
            other => Err(other),
        }
    }
}

/// Protocol-level failure reported back to the requester inside a packet
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[repr(u8)]
pub enum ErrorCode {
    NoError = 0,
    MalformedMessage = 1,
    UserAlreadyExists = 2,
    UserNotFound = 3,
    /// Reserved; nothing in this workspace emits it
    ServerBusy = 4,
    RoomNotFound = 5,
    RoomAlreadyExists = 6,
    UnknownError = 7,
}

impl TryFrom<u8> for ErrorCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        use ErrorCode::*;
        match value {
            0 => Ok(NoError),
            1 => Ok(MalformedMessage),
            2 => Ok(UserAlreadyExists),
            3 => Ok(UserNotFound),
            4 => Ok(ServerBusy),
            5 => Ok(RoomNotFound),
            6 => Ok(RoomAlreadyExists),
            7 => Ok(UnknownError),
            other => Err(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ErrorCode::*;
        let text = match self {
            NoError => "No error",
            MalformedMessage => "Malformed message",
            UserAlreadyExists => "User already exists",
            UserNotFound => "User not found",
            ServerBusy => "Server busy",
            RoomNotFound => "Room not found",
            RoomAlreadyExists => "Room already exists",
            UnknownError => "Unknown error",
        };
        f.write_str(text)
    }
}

/// Kind-specific payload of a packet
///
/// The list fields (`rooms`, `users`) are only filled in responses.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Kind {
    Connect { listen_port: u16 },
    Disconnect,
    CreateRoom { room: String },
    JoinRoom { room: String },
    LeaveRoom { room: String },
    MessageRoom { room: String, message: String },
    ListRooms { rooms: Vec<String> },
    ListUsers { users: Vec<String> },
    PrivateMessage { recipient: String, message: String },
    Broadcast { message: String },
    ListUsersInRoom { room: String, users: Vec<String> },
}

impl Kind {
    pub fn opcode(&self) -> Opcode {
        use Kind::*;
        match self {
            Connect { .. } => Opcode::Connect,
            Disconnect => Opcode::Disconnect,
            CreateRoom { .. } => Opcode::CreateRoom,
            JoinRoom { .. } => Opcode::JoinRoom,
            LeaveRoom { .. } => Opcode::LeaveRoom,
            MessageRoom { .. } => Opcode::MessageRoom,
            ListRooms { .. } => Opcode::ListRooms,
            ListUsers { .. } => Opcode::ListUsers,
            PrivateMessage { .. } => Opcode::PrivateMessage,
            Broadcast { .. } => Opcode::Broadcast,
            ListUsersInRoom { .. } => Opcode::ListUsersInRoom,
        }
    }

    /// Payload of the given opcode with every field empty
    pub fn empty(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Connect => Kind::Connect { listen_port: 0 },
            Opcode::Disconnect => Kind::Disconnect,
            Opcode::CreateRoom => Kind::CreateRoom { room: String::new() },
            Opcode::JoinRoom => Kind::JoinRoom { room: String::new() },
            Opcode::LeaveRoom => Kind::LeaveRoom { room: String::new() },
            Opcode::MessageRoom => Kind::MessageRoom {
                room: String::new(),
                message: String::new(),
            },
            Opcode::ListRooms => Kind::ListRooms { rooms: Vec::new() },
            Opcode::ListUsers => Kind::ListUsers { users: Vec::new() },
            Opcode::PrivateMessage => Kind::PrivateMessage {
                recipient: String::new(),
                message: String::new(),
            },
            Opcode::Broadcast => Kind::Broadcast {
                message: String::new(),
            },
            Opcode::ListUsersInRoom => Kind::ListUsersInRoom {
                room: String::new(),
                users: Vec::new(),
            },
        }
    }

    /// Room this payload addresses, if any
    pub fn room(&self) -> Option<&str> {
        use Kind::*;
        match self {
            CreateRoom { room }
            | JoinRoom { room }
            | LeaveRoom { room }
            | MessageRoom { room, .. }
            | ListUsersInRoom { room, .. } => Some(room),
            _ => None,
        }
    }

    /// Free text this payload carries, if any
    pub fn message(&self) -> Option<&str> {
        use Kind::*;
        match self {
            MessageRoom { message, .. }
            | PrivateMessage { message, .. }
            | Broadcast { message } => Some(message),
            _ => None,
        }
    }
}

/// Unit of exchange between clients and the directory
///
/// The status is not stored: it is `Ok` exactly when `error` is
/// `NoError`, so a packet cannot disagree with itself.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Packet {
    pub error: ErrorCode,
    pub username: String,
    pub timestamp: OffsetDateTime,
    pub kind: Kind,
}

impl Packet {
    /// Successful packet stamped with the current time
    pub fn new(username: impl Into<String>, kind: Kind) -> Self {
        Self {
            error: ErrorCode::NoError,
            username: username.into(),
            timestamp: now(),
            kind,
        }
    }

    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn status(&self) -> Status {
        if self.error == ErrorCode::NoError {
            Status::Ok
        } else {
            Status::Error
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status() == Status::Ok
    }

    pub fn opcode(&self) -> Opcode {
        self.kind.opcode()
    }

    /// New successful response to this packet carrying `kind`
    pub fn reply(&self, kind: Kind) -> Self {
        debug_assert_eq!(self.opcode(), kind.opcode());
        Self::new(self.username.clone(), kind)
    }

    /// New failed response to this packet echoing its payload
    ///
    /// `NoError` is not a failure and is turned into `UnknownError`.
    pub fn reject(&self, code: ErrorCode) -> Self {
        let error = match code {
            ErrorCode::NoError => ErrorCode::UnknownError,
            code => code,
        };
        Self {
            error,
            username: self.username.clone(),
            timestamp: now(),
            kind: self.kind.clone(),
        }
    }

    /// Envelope-only `MalformedMessage` answer for a request that could not
    /// be decoded, issued under the responder's identity
    pub fn rejection(opcode: Opcode, responder: impl Into<String>) -> Self {
        Self {
            error: ErrorCode::MalformedMessage,
            username: responder.into(),
            timestamp: now(),
            kind: Kind::empty(opcode),
        }
    }
}

/// Nicknames and room names: non-empty, no whitespace, no separators
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == LIST_SEPARATOR)
}

/// Message text: anything that keeps the record on one line
pub fn is_valid_text(text: &str) -> bool {
    !text
        .chars()
        .any(|c| c == FIELD_SEPARATOR || c == '\n' || c == '\r')
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_opcode_numbers() {
        for (index, opcode) in Opcode::ALL.into_iter().enumerate() {
            assert_eq!(opcode.number() as usize, index + 1);
            assert_eq!(Opcode::try_from(opcode.number()), Ok(opcode));
            assert_eq!(Kind::empty(opcode).opcode(), opcode);
        }
        assert_eq!(Opcode::try_from(0), Err(0));
        assert_eq!(Opcode::try_from(12), Err(12));
    }

    #[test]
    fn test_status_follows_error() {
        let request = Packet::new("alice", Kind::JoinRoom { room: "lobby".into() });
        assert_eq!(request.status(), Status::Ok);

        let failed = request.reject(ErrorCode::RoomNotFound);
        assert_eq!(failed.status(), Status::Error);
        assert_eq!(failed.kind, request.kind);
        assert_eq!(failed.username, "alice");

        let coerced = request.reject(ErrorCode::NoError);
        assert_eq!(coerced.error, ErrorCode::UnknownError);
    }

    #[test]
    fn test_reply_is_a_new_packet() {
        let request = Packet::new("alice", Kind::ListRooms { rooms: vec![] });
        let response = request.reply(Kind::ListRooms {
            rooms: vec!["lobby".into()],
        });
        assert_eq!(request.kind, Kind::ListRooms { rooms: vec![] });
        assert_eq!(response.username, "alice");
        assert!(response.is_ok());
    }

    #[test]
    fn test_names() {
        #[rustfmt::skip]
        let tests = vec![
            ("alice", true),
            ("room-1", true),
            ("", false),
            ("two words", false),
            ("tab\there", false),
            ("a,b", false),
            ("sep\u{1f}arated", false),
        ];
        for (name, valid) in tests {
            assert_eq!(is_valid_name(name), valid, "{name:?}");
        }
        assert!(is_valid_text("hello, world"));
        assert!(!is_valid_text("two\nlines"));
        assert!(!is_valid_text("sep\u{1f}arated"));
    }
}
