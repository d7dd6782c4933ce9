//! Room-based WebSocket relay.
//!
//! Clients connect to `/ws`, send a join payload naming themselves and a
//! room, then exchange chat and typing events with everyone else in that
//! room. All state lives in one in-memory [`Registry`].

pub mod config;
pub mod connection;
pub mod messages;
pub mod registry;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError};
pub use connection::{Connection, ConnectionId, SendError};
pub use messages::{ClientEvent, DecodeError, JoinRequest, ServerEvent};
pub use registry::{Membership, Registry};
pub use server::{routes, Server, Status};
pub use session::{RelayError, Session, SessionState};
