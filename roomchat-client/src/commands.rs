/// Slash commands typed by the user
use roomchat_protocol::{is_valid_name, is_valid_text, Kind};
use thiserror::Error;

pub const HELP: &str = "\
Available Commands:
/quit                  Disconnect from the server and quit this program
/create <room>         Creates <room>. Does not join <room>
/join <room>           Joins <room>
/leave <room>          Leaves <room>
/msg <room> <message>  Sends <message> to <room>
/ls rooms              List available rooms
/ls users              List available users
/ls usersin <room>     List available users present in <room>
/pm <user> <message>   Sends <message> to <user>
/bcast <message>       Sends <message> to all users
/help                  Shows this text";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Quit,
    Help,
    /// A request for the server
    Send(Kind),
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    #[error("unknown command {0:?}; /help lists the valid ones")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid name {0:?}: no spaces, commas or control characters")]
    InvalidName(String),

    #[error("enter a valid message")]
    InvalidMessage,
}

/// Parses one input line
pub fn parse(line: &str) -> Result<Command, CommandError> {
    let (verb, rest) = split_word(line.trim());
    match verb {
        "/quit" => no_arguments(rest, "/quit").map(|_| Command::Quit),
        "/help" => no_arguments(rest, "/help").map(|_| Command::Help),
        "/create" => {
            room(rest, "/create <room>").map(|room| Command::Send(Kind::CreateRoom { room }))
        }
        "/join" => room(rest, "/join <room>").map(|room| Command::Send(Kind::JoinRoom { room })),
        "/leave" => {
            room(rest, "/leave <room>").map(|room| Command::Send(Kind::LeaveRoom { room }))
        }
        "/msg" => {
            let (room, message) = addressed(rest, "/msg <room> <message>")?;
            Ok(Command::Send(Kind::MessageRoom { room, message }))
        }
        "/pm" => {
            let (recipient, message) = addressed(rest, "/pm <user> <message>")?;
            Ok(Command::Send(Kind::PrivateMessage { recipient, message }))
        }
        "/bcast" => {
            let message = text(rest, "/bcast <message>")?;
            Ok(Command::Send(Kind::Broadcast { message }))
        }
        "/ls" => {
            const USAGE: &str = "/ls rooms | /ls users | /ls usersin <room>";
            let (what, rest) = split_word(rest);
            match what {
                "rooms" => no_arguments(rest, USAGE)
                    .map(|_| Command::Send(Kind::ListRooms { rooms: Vec::new() })),
                "users" => no_arguments(rest, USAGE)
                    .map(|_| Command::Send(Kind::ListUsers { users: Vec::new() })),
                "usersin" => room(rest, "/ls usersin <room>").map(|room| {
                    Command::Send(Kind::ListUsersInRoom {
                        room,
                        users: Vec::new(),
                    })
                }),
                _ => Err(CommandError::Usage(USAGE)),
            }
        }
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

// First word and the trimmed remainder
fn split_word(input: &str) -> (&str, &str) {
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

fn no_arguments(rest: &str, usage: &'static str) -> Result<(), CommandError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(CommandError::Usage(usage))
    }
}

fn name(word: &str) -> Result<String, CommandError> {
    if is_valid_name(word) {
        Ok(word.to_string())
    } else {
        Err(CommandError::InvalidName(word.to_string()))
    }
}

fn room(rest: &str, usage: &'static str) -> Result<String, CommandError> {
    match split_word(rest) {
        ("", _) => Err(CommandError::Usage(usage)),
        (room, "") => name(room),
        _ => Err(CommandError::Usage(usage)),
    }
}

fn text(rest: &str, usage: &'static str) -> Result<String, CommandError> {
    if rest.is_empty() {
        Err(CommandError::Usage(usage))
    } else if !is_valid_text(rest) {
        Err(CommandError::InvalidMessage)
    } else {
        Ok(rest.to_string())
    }
}

// `<name> <message...>`
fn addressed(rest: &str, usage: &'static str) -> Result<(String, String), CommandError> {
    let (target, message) = split_word(rest);
    if target.is_empty() || message.is_empty() {
        return Err(CommandError::Usage(usage));
    }
    Ok((name(target)?, text(message, usage)?))
}
