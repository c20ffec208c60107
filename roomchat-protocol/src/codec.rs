/// Codecs for the chat directory protocol
use crate::{
    model::{ErrorCode, Kind, Opcode, Packet, Status, FIELD_SEPARATOR, LIST_SEPARATOR},
    Error,
};
use std::str::Split;
use time::{format_description::well_known::Rfc3339, OffsetDateTime, UtcOffset};
use tokio_util::{
    bytes::BytesMut,
    codec::{Decoder, Encoder, LinesCodec},
};

// 640k ought to be enough for anyone
const MAX_LENGTH: usize = 1024 * 640;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Why a record could not be turned into a `Packet`
#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
pub enum DecodeError {
    #[error("empty record")]
    Empty,

    #[error("unknown opcode {0:?}")]
    UnknownOpcode(String),

    #[error("{opcode} record is missing field `{field}`")]
    MissingField { opcode: Opcode, field: &'static str },

    #[error("{opcode} record has invalid status {value:?}")]
    InvalidStatus { opcode: Opcode, value: String },

    #[error("{opcode} record has invalid error code {value:?}")]
    InvalidErrorCode { opcode: Opcode, value: String },

    #[error("{opcode} record has status {status:?} with error code {error:?}")]
    StatusMismatch {
        opcode: Opcode,
        status: Status,
        error: ErrorCode,
    },

    #[error("{opcode} record has invalid timestamp {value:?}")]
    InvalidTimestamp { opcode: Opcode, value: String },

    #[error("{opcode} record has invalid port {value:?}")]
    InvalidPort { opcode: Opcode, value: String },

    #[error("{opcode} record has {count} unexpected trailing field(s)")]
    TrailingFields { opcode: Opcode, count: usize },
}

impl DecodeError {
    /// Opcode of the record, if decoding got far enough to recognize it
    pub fn opcode(&self) -> Option<Opcode> {
        use DecodeError::*;
        match self {
            Empty | UnknownOpcode(_) => None,
            MissingField { opcode, .. }
            | InvalidStatus { opcode, .. }
            | InvalidErrorCode { opcode, .. }
            | StatusMismatch { opcode, .. }
            | InvalidTimestamp { opcode, .. }
            | InvalidPort { opcode, .. }
            | TrailingFields { opcode, .. } => Some(*opcode),
        }
    }
}

/// Renders a packet as one newline-terminated record
pub fn encode(packet: &Packet) -> Result<String, Error> {
    let mut line = render(packet)?;
    line.push('\n');
    Ok(line)
}

/// Parses one record; a trailing line ending is ignored
pub fn decode(line: &str) -> Result<Packet, DecodeError> {
    let line = line.trim_end_matches(LINE_ENDINGS);
    if line.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut fields = line.split(FIELD_SEPARATOR);
    let raw_opcode = fields.next().unwrap_or_default();
    let opcode = raw_opcode
        .parse::<u8>()
        .ok()
        .and_then(|number| Opcode::try_from(number).ok())
        .ok_or_else(|| DecodeError::UnknownOpcode(raw_opcode.to_string()))?;

    let mut record = Record {
        opcode,
        fields,
        lenient: false,
    };

    let raw_status = record.field("status")?;
    let status = raw_status
        .parse::<u8>()
        .ok()
        .and_then(|number| Status::try_from(number).ok())
        .ok_or_else(|| DecodeError::InvalidStatus {
            opcode,
            value: raw_status.to_string(),
        })?;
    let raw_error = record.field("error")?;
    let error = raw_error
        .parse::<u8>()
        .ok()
        .and_then(|number| ErrorCode::try_from(number).ok())
        .ok_or_else(|| DecodeError::InvalidErrorCode {
            opcode,
            value: raw_error.to_string(),
        })?;
    if (status == Status::Ok) != (error == ErrorCode::NoError) {
        return Err(DecodeError::StatusMismatch {
            opcode,
            status,
            error,
        });
    }

    let username = record.field("username")?.to_string();
    let raw_timestamp = record.field("timestamp")?;
    let timestamp = OffsetDateTime::parse(raw_timestamp, &Rfc3339)
        .map_err(|_| DecodeError::InvalidTimestamp {
            opcode,
            value: raw_timestamp.to_string(),
        })?
        .to_offset(UtcOffset::UTC);

    // Failed responses may omit their payload
    record.lenient = status == Status::Error;

    let kind = match opcode {
        Opcode::Connect => Kind::Connect {
            listen_port: record.port("listen_port")?,
        },
        Opcode::Disconnect => Kind::Disconnect,
        Opcode::CreateRoom => Kind::CreateRoom {
            room: record.text("room")?,
        },
        Opcode::JoinRoom => Kind::JoinRoom {
            room: record.text("room")?,
        },
        Opcode::LeaveRoom => Kind::LeaveRoom {
            room: record.text("room")?,
        },
        Opcode::MessageRoom => Kind::MessageRoom {
            room: record.text("room")?,
            message: record.text("message")?,
        },
        Opcode::ListRooms => Kind::ListRooms {
            rooms: record.list(),
        },
        Opcode::ListUsers => Kind::ListUsers {
            users: record.list(),
        },
        Opcode::PrivateMessage => Kind::PrivateMessage {
            recipient: record.text("recipient")?,
            message: record.text("message")?,
        },
        Opcode::Broadcast => Kind::Broadcast {
            message: record.text("message")?,
        },
        Opcode::ListUsersInRoom => Kind::ListUsersInRoom {
            room: record.text("room")?,
            users: record.list(),
        },
    };
    record.finish()?;

    Ok(Packet {
        error,
        username,
        timestamp,
        kind,
    })
}

/// Renders the `MalformedMessage` answer to an undecodable request
///
/// When the request's opcode was not even recognized there is no payload
/// layout to follow, so the record is envelope-only with opcode `0`.
pub fn encode_rejection(opcode: Option<Opcode>, responder: &str) -> Result<String, Error> {
    match opcode {
        Some(opcode) => encode(&Packet::rejection(opcode, responder)),
        None => {
            check_text("username", responder)?;
            let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
            Ok(join([
                "0".to_string(),
                (Status::Error as u8).to_string(),
                (ErrorCode::MalformedMessage as u8).to_string(),
                responder.to_string(),
                timestamp,
            ]) + "\n")
        }
    }
}

/// Codec for packets, one per line
#[derive(Debug)]
pub struct PacketCodec {
    inner: LinesCodec,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(MAX_LENGTH),
        }
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(line) => Ok(Some(decode(&line)?)),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode_eof(src)? {
            Some(line) => Ok(Some(decode(&line)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = Error;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = render(&packet)?;
        self.inner.encode(line, dst)?;
        Ok(())
    }
}

// Common logic for rendering a packet without its line ending
fn render(packet: &Packet) -> Result<String, Error> {
    check_text("username", &packet.username)?;

    let mut fields = vec![
        packet.opcode().number().to_string(),
        (packet.status() as u8).to_string(),
        (packet.error as u8).to_string(),
        packet.username.clone(),
        packet.timestamp.format(&Rfc3339)?,
    ];

    use Kind::*;
    match &packet.kind {
        Connect { listen_port } => fields.push(listen_port.to_string()),
        Disconnect => {}
        CreateRoom { room } | JoinRoom { room } | LeaveRoom { room } => {
            fields.push(text("room", room)?)
        }
        MessageRoom { room, message } => {
            fields.push(text("room", room)?);
            fields.push(text("message", message)?);
        }
        ListRooms { rooms } => fields.push(list("rooms", rooms)?),
        ListUsers { users } => fields.push(list("users", users)?),
        PrivateMessage { recipient, message } => {
            fields.push(text("recipient", recipient)?);
            fields.push(text("message", message)?);
        }
        Broadcast { message } => fields.push(text("message", message)?),
        ListUsersInRoom { room, users } => {
            fields.push(text("room", room)?);
            fields.push(list("users", users)?);
        }
    }

    Ok(join(fields))
}

fn join<I: IntoIterator<Item = String>>(fields: I) -> String {
    fields
        .into_iter()
        .collect::<Vec<_>>()
        .join(FIELD_SEPARATOR.to_string().as_str())
}

fn check_text(field: &'static str, value: &str) -> Result<(), Error> {
    if value.contains([FIELD_SEPARATOR, '\n', '\r']) {
        Err(Error::InvalidField(field))
    } else {
        Ok(())
    }
}

fn text(field: &'static str, value: &str) -> Result<String, Error> {
    check_text(field, value)?;
    Ok(value.to_string())
}

// An empty element would be indistinguishable from an empty list
fn list(field: &'static str, values: &[String]) -> Result<String, Error> {
    for value in values {
        check_text(field, value)?;
        if value.is_empty() || value.contains(LIST_SEPARATOR) {
            return Err(Error::InvalidField(field));
        }
    }
    Ok(values.join(LIST_SEPARATOR.to_string().as_str()))
}

/// Cursor over the fields of one record
struct Record<'a> {
    opcode: Opcode,
    fields: Split<'a, char>,
    lenient: bool,
}

impl<'a> Record<'a> {
    fn field(&mut self, field: &'static str) -> Result<&'a str, DecodeError> {
        match self.fields.next() {
            Some(value) => Ok(value),
            None if self.lenient => Ok(""),
            None => Err(DecodeError::MissingField {
                opcode: self.opcode,
                field,
            }),
        }
    }

    fn text(&mut self, field: &'static str) -> Result<String, DecodeError> {
        self.field(field).map(String::from)
    }

    // Absent and empty both mean an empty list
    fn list(&mut self) -> Vec<String> {
        match self.fields.next() {
            None | Some("") => Vec::new(),
            Some(value) => value.split(LIST_SEPARATOR).map(String::from).collect(),
        }
    }

    fn port(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        let value = self.field(field)?;
        if value.is_empty() && self.lenient {
            return Ok(0);
        }
        value.parse().map_err(|_| DecodeError::InvalidPort {
            opcode: self.opcode,
            value: value.to_string(),
        })
    }

    fn finish(self) -> Result<(), DecodeError> {
        match self.fields.count() {
            0 => Ok(()),
            count => Err(DecodeError::TrailingFields {
                opcode: self.opcode,
                count,
            }),
        }
    }
}
