use chrono::{DateTime, Local, TimeZone};
use log::{debug, info};
use thiserror::Error;

use crate::connection::{Connection, ConnectionId};
use crate::messages::{ClientEvent, DecodeError, JoinRequest, ServerEvent};
use crate::registry::{Membership, Registry};

pub const DEFAULT_USERNAME: &str = "Anonymous";
pub const DEFAULT_ROOM: &str = "general";

#[derive(Error, Debug)]
pub enum RelayError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("transport closed")]
    TransportClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, waiting for the join frame.
    Connecting,
    Joined(Membership),
    Closed,
}

/// Protocol state for one connection. Frames must be fed in arrival order.
pub struct Session {
    connection: Connection,
    registry: Registry,
    state: SessionState,
}

impl Session {
    pub fn new(connection: Connection, registry: Registry) -> Self {
        Session {
            connection,
            registry,
            state: SessionState::Connecting,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The first frame is always the join payload, whatever its `type` says.
    pub async fn handle_frame(&mut self, raw: &str) -> Result<(), RelayError> {
        match self.state {
            SessionState::Connecting => {
                let request = JoinRequest::decode(raw)?;
                self.join(request).await;
            }
            SessionState::Joined(_) => {
                let event = ClientEvent::decode(raw)?;
                self.dispatch(event).await;
            }
            SessionState::Closed => return Err(RelayError::TransportClosed),
        }
        Ok(())
    }

    async fn join(&mut self, request: JoinRequest) {
        let username = request
            .username
            .unwrap_or_else(|| DEFAULT_USERNAME.to_string());
        let room = request.room.unwrap_or_else(|| DEFAULT_ROOM.to_string());
        self.registry
            .register(self.connection.clone(), username.clone(), room.clone())
            .await;
        self.state = SessionState::Joined(Membership { username, room });
    }

    async fn dispatch(&mut self, event: ClientEvent) {
        let SessionState::Joined(membership) = &mut self.state else {
            return;
        };
        match event {
            ClientEvent::Chat { message } => {
                if message.trim().is_empty() {
                    debug!("dropping blank chat from {}", self.connection.id());
                    return;
                }
                let chat = ServerEvent::Chat {
                    username: membership.username.clone(),
                    message,
                    time: chat_time(&Local::now()),
                };
                self.registry.broadcast(&membership.room, &chat).await;
            }
            ClientEvent::Typing => {
                let typing = ServerEvent::Typing {
                    username: membership.username.clone(),
                };
                self.registry.broadcast(&membership.room, &typing).await;
            }
            ClientEvent::StopTyping => {
                let stop = ServerEvent::StopTyping {
                    username: membership.username.clone(),
                };
                self.registry.broadcast(&membership.room, &stop).await;
            }
            ClientEvent::SwitchRoom { room } => {
                if self
                    .registry
                    .switch_room(self.connection.id(), &room)
                    .await
                    .is_some()
                {
                    membership.room = room;
                }
            }
            ClientEvent::Unknown => {
                debug!("ignoring unknown event from {}", self.connection.id());
            }
        }
    }

    pub async fn close(&mut self) -> Option<Membership> {
        if std::mem::replace(&mut self.state, SessionState::Closed) == SessionState::Closed {
            return None;
        }
        let id = self.connection.id();
        let removed = self.registry.unregister(id).await;
        match &removed {
            Some(membership) => {
                self.registry
                    .broadcast(&membership.room, &ServerEvent::left(&membership.username))
                    .await;
            }
            None => info!("connection {id} closed before joining"),
        }
        removed
    }
}

/// Wall-clock stamp shown next to chat messages, e.g. `03:07 PM`.
pub fn chat_time<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%I:%M %p").to_string()
}
