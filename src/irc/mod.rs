//! IRC protocol layer (C3 connection + C4 parsing/state).

pub mod casemap;
pub mod connection;
pub mod dispatch;
pub mod event;
pub mod isupport;
pub mod message;
pub mod tls;

pub use casemap::Casemapping;
pub use connection::{Connection, ConnectionState, ServerHandle, ServerState};
pub use dispatch::dispatch;
pub use event::Event;
pub use message::{Command, Message, Prefix};
