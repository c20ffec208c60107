/// Chat directory server
///
/// Keeps the authoritative list of connected users and rooms, answers each
/// request on the connection it arrived on, and pushes room messages,
/// private messages and broadcasts to the listening endpoints clients
/// advertised when they connected.
pub mod directory;
pub mod router;
pub mod server;

pub use directory::{Directory, DirectoryError, User};
pub use router::{route, Routed};
pub use server::{Server, ServerConfig, DEFAULT_PORT};
