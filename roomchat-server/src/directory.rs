/// Authoritative registry of connected users and rooms
///
/// Every operation takes the lock once, works in memory, and releases it
/// before returning. Listings are snapshots: a concurrent create or connect
/// may land right after them.
use roomchat_protocol::ErrorCode;
use std::{
    net::{IpAddr, SocketAddr},
    sync::{Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;

/// A connected user and the endpoint pushes are delivered to
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct User {
    pub nickname: String,
    pub host: IpAddr,
    pub listen_port: u16,
}

impl User {
    pub fn new(nickname: impl Into<String>, host: IpAddr, listen_port: u16) -> Self {
        Self {
            nickname: nickname.into(),
            host,
            listen_port,
        }
    }

    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.listen_port)
    }
}

#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum DirectoryError {
    #[error("user already exists")]
    UserAlreadyExists,

    #[error("user not found")]
    UserNotFound,

    #[error("room already exists")]
    RoomAlreadyExists,

    #[error("room not found")]
    RoomNotFound,
}

impl From<DirectoryError> for ErrorCode {
    fn from(value: DirectoryError) -> Self {
        match value {
            DirectoryError::UserAlreadyExists => ErrorCode::UserAlreadyExists,
            DirectoryError::UserNotFound => ErrorCode::UserNotFound,
            DirectoryError::RoomAlreadyExists => ErrorCode::RoomAlreadyExists,
            DirectoryError::RoomNotFound => ErrorCode::RoomNotFound,
        }
    }
}

#[derive(Debug)]
struct Room {
    name: String,
    // join order, no duplicates
    members: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    users: Vec<User>,
    rooms: Vec<Room>,
}

impl State {
    fn user(&self, nickname: &str) -> Option<&User> {
        self.users.iter().find(|user| user.nickname == nickname)
    }

    fn room(&self, name: &str) -> Result<&Room, DirectoryError> {
        self.rooms
            .iter()
            .find(|room| room.name == name)
            .ok_or(DirectoryError::RoomNotFound)
    }

    fn room_mut(&mut self, name: &str) -> Result<&mut Room, DirectoryError> {
        self.rooms
            .iter_mut()
            .find(|room| room.name == name)
            .ok_or(DirectoryError::RoomNotFound)
    }

    // Drops the user and every membership it holds
    fn purge(&mut self, nickname: &str) -> Option<User> {
        let index = self.users.iter().position(|user| user.nickname == nickname)?;
        for room in &mut self.rooms {
            room.members.retain(|member| member != nickname);
        }
        Some(self.users.remove(index))
    }
}

#[derive(Debug, Default)]
pub struct Directory {
    state: Mutex<State>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    // Each mutation completes in one step, so a poisoned state is consistent
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(
        &self,
        nickname: &str,
        host: IpAddr,
        listen_port: u16,
    ) -> Result<(), DirectoryError> {
        let mut state = self.lock();
        if state.user(nickname).is_some() {
            return Err(DirectoryError::UserAlreadyExists);
        }
        state.users.push(User::new(nickname, host, listen_port));
        Ok(())
    }

    /// Removes the user and its memberships in every room
    pub fn disconnect(&self, nickname: &str) -> Result<(), DirectoryError> {
        self.lock()
            .purge(nickname)
            .map(|_| ())
            .ok_or(DirectoryError::UserNotFound)
    }

    /// Same purge as `disconnect`, for a user whose endpoint refused a push
    ///
    /// Only the registration `user` was taken from is removed: if the
    /// nickname has since reconnected on another endpoint, nothing changes.
    /// Returns whether anything was removed.
    pub fn remove_dead(&self, user: &User) -> bool {
        let mut state = self.lock();
        if state.user(&user.nickname) != Some(user) {
            return false;
        }
        state.purge(&user.nickname).is_some()
    }

    /// Creates an empty room; the creator is not joined to it
    pub fn create_room(&self, name: &str) -> Result<(), DirectoryError> {
        let mut state = self.lock();
        if state.room(name).is_ok() {
            return Err(DirectoryError::RoomAlreadyExists);
        }
        state.rooms.push(Room {
            name: name.to_string(),
            members: Vec::new(),
        });
        Ok(())
    }

    /// Joining a room twice is a no-op
    pub fn join_room(&self, name: &str, nickname: &str) -> Result<(), DirectoryError> {
        let mut state = self.lock();
        let room = state.room_mut(name)?;
        if !room.members.iter().any(|member| member == nickname) {
            room.members.push(nickname.to_string());
        }
        Ok(())
    }

    /// Leaving a room one is not a member of is a no-op
    pub fn leave_room(&self, name: &str, nickname: &str) -> Result<(), DirectoryError> {
        let mut state = self.lock();
        state
            .room_mut(name)?
            .members
            .retain(|member| member != nickname);
        Ok(())
    }

    /// Room names in creation order
    pub fn list_rooms(&self) -> Vec<String> {
        self.lock().rooms.iter().map(|room| room.name.clone()).collect()
    }

    /// Nicknames in connection order
    pub fn list_users(&self) -> Vec<String> {
        self.lock()
            .users
            .iter()
            .map(|user| user.nickname.clone())
            .collect()
    }

    /// Members of a room in join order
    pub fn list_users_in_room(&self, name: &str) -> Result<Vec<String>, DirectoryError> {
        Ok(self.lock().room(name)?.members.clone())
    }

    pub fn resolve_user(&self, nickname: &str) -> Option<User> {
        self.lock().user(nickname).cloned()
    }

    pub fn members_of(&self, name: &str) -> Option<Vec<String>> {
        self.lock().room(name).ok().map(|room| room.members.clone())
    }

    /// Resolved members of a room, taken in one snapshot
    pub fn recipients_in(&self, name: &str) -> Result<Vec<User>, DirectoryError> {
        let state = self.lock();
        let room = state.room(name)?;
        Ok(room
            .members
            .iter()
            .filter_map(|member| state.user(member).cloned())
            .collect())
    }

    /// Every connected user
    pub fn users(&self) -> Vec<User> {
        self.lock().users.clone()
    }

    /// Forgets every user and membership, returning the users that were
    /// connected; rooms survive empty
    pub fn drain(&self) -> Vec<User> {
        let mut state = self.lock();
        for room in &mut state.rooms {
            room.members.clear();
        }
        std::mem::take(&mut state.users)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{
        net::Ipv4Addr,
        sync::Arc,
        thread,
    };

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_nicknames_are_unique() {
        let directory = Directory::new();
        directory.connect("alice", LOCALHOST, 9001).unwrap();
        let other_host = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(
            directory.connect("alice", other_host, 9002),
            Err(DirectoryError::UserAlreadyExists)
        );
        assert_eq!(directory.list_users(), ["alice"]);
        assert_eq!(
            directory.resolve_user("alice"),
            Some(User::new("alice", LOCALHOST, 9001))
        );
    }

    #[test]
    fn test_disconnect_unknown_user() {
        let directory = Directory::new();
        assert_eq!(directory.disconnect("ghost"), Err(DirectoryError::UserNotFound));
    }

    #[test]
    fn test_rooms_are_unique_and_start_empty() {
        let directory = Directory::new();
        directory.create_room("lobby").unwrap();
        assert_eq!(
            directory.create_room("lobby"),
            Err(DirectoryError::RoomAlreadyExists)
        );
        assert_eq!(directory.list_users_in_room("lobby"), Ok(vec![]));
        assert_eq!(directory.list_rooms(), ["lobby"]);
    }

    #[test]
    fn test_membership_is_idempotent() {
        let directory = Directory::new();
        directory.create_room("r").unwrap();
        directory.join_room("r", "bob").unwrap();
        let after_first = directory.members_of("r");
        directory.join_room("r", "bob").unwrap();
        assert_eq!(directory.members_of("r"), after_first);
        assert_eq!(after_first, Some(vec!["bob".to_string()]));

        assert_eq!(directory.leave_room("r", "absent"), Ok(()));
        assert_eq!(directory.members_of("r"), after_first);
    }

    #[test]
    fn test_missing_rooms() {
        let directory = Directory::new();
        #[rustfmt::skip]
        let results = vec![
            directory.join_room("ghost", "bob"),
            directory.leave_room("ghost", "bob"),
            directory.list_users_in_room("ghost").map(|_| ()),
            directory.recipients_in("ghost").map(|_| ()),
        ];
        for result in results {
            assert_eq!(result, Err(DirectoryError::RoomNotFound));
        }
        assert_eq!(directory.members_of("ghost"), None);
    }

    #[test]
    fn test_disconnect_cascades_to_rooms() {
        let directory = Directory::new();
        directory.connect("carol", LOCALHOST, 9003).unwrap();
        directory.connect("dave", LOCALHOST, 9004).unwrap();
        for room in ["A", "B"] {
            directory.create_room(room).unwrap();
            directory.join_room(room, "carol").unwrap();
            directory.join_room(room, "dave").unwrap();
        }

        directory.disconnect("carol").unwrap();
        assert_eq!(directory.list_users_in_room("A"), Ok(vec!["dave".to_string()]));
        assert_eq!(directory.list_users_in_room("B"), Ok(vec!["dave".to_string()]));
        assert_eq!(directory.resolve_user("carol"), None);

        let dave = User::new("dave", LOCALHOST, 9004);
        assert!(directory.remove_dead(&dave));
        assert!(!directory.remove_dead(&dave));
        assert_eq!(directory.list_users_in_room("A"), Ok(vec![]));
        assert!(directory.list_users().is_empty());
        assert_eq!(directory.list_rooms(), ["A", "B"]);
    }

    #[test]
    fn test_remove_dead_spares_a_reconnected_user() {
        let directory = Directory::new();
        directory.connect("alice", LOCALHOST, 9001).unwrap();
        directory.create_room("lobby").unwrap();
        directory.join_room("lobby", "alice").unwrap();
        let stale = directory.recipients_in("lobby").unwrap().remove(0);

        directory.disconnect("alice").unwrap();
        directory.connect("alice", LOCALHOST, 9002).unwrap();
        directory.join_room("lobby", "alice").unwrap();

        assert!(!directory.remove_dead(&stale));
        assert_eq!(
            directory.resolve_user("alice").map(|user| user.listen_port),
            Some(9002)
        );
        assert_eq!(directory.members_of("lobby"), Some(vec!["alice".to_string()]));
    }

    #[test]
    fn test_recipients_skip_unconnected_members() {
        let directory = Directory::new();
        directory.connect("alice", LOCALHOST, 9001).unwrap();
        directory.create_room("lobby").unwrap();
        directory.join_room("lobby", "alice").unwrap();
        directory.join_room("lobby", "ghost").unwrap();
        assert_eq!(
            directory.recipients_in("lobby"),
            Ok(vec![User::new("alice", LOCALHOST, 9001)])
        );
    }

    #[test]
    fn test_drain() {
        let directory = Directory::new();
        directory.connect("alice", LOCALHOST, 9001).unwrap();
        directory.connect("bob", LOCALHOST, 9002).unwrap();
        directory.create_room("lobby").unwrap();
        directory.join_room("lobby", "bob").unwrap();

        let drained = directory.drain();
        assert_eq!(
            drained.iter().map(|user| user.nickname.as_str()).collect::<Vec<_>>(),
            ["alice", "bob"]
        );
        assert!(directory.users().is_empty());
        assert_eq!(directory.list_users_in_room("lobby"), Ok(vec![]));
    }

    #[test]
    fn test_concurrent_connects_keep_one_winner() {
        let directory = Arc::new(Directory::new());
        let handles: Vec<_> = (0..16)
            .map(|port| {
                let directory = Arc::clone(&directory);
                thread::spawn(move || directory.connect("alice", LOCALHOST, 9000 + port).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(directory.list_users(), ["alice"]);
    }
}
