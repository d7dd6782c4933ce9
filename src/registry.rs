use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::RwLock;

use crate::connection::{Connection, ConnectionId, SendError};
use crate::messages::ServerEvent;

/// Where a connection currently sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub username: String,
    pub room: String,
}

struct Member {
    membership: Membership,
    connection: Connection,
}

/// Live connections and their room. A room is just the members carrying its name.
#[derive(Clone, Default)]
pub struct Registry {
    members: Arc<RwLock<HashMap<ConnectionId, Member>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection: Connection, username: String, room: String) {
        let id = connection.id();
        let notice = ServerEvent::joined(&username, &room);
        {
            let mut members = self.members.write().await;
            let member = Member {
                membership: Membership {
                    username: username.clone(),
                    room: room.clone(),
                },
                connection,
            };
            if members.insert(id, member).is_some() {
                warn!("connection {id} registered twice, previous entry replaced");
            }
        }
        info!("{username} ({id}) joined {room}");
        self.broadcast(&room, &notice).await;
    }

    pub async fn unregister(&self, id: ConnectionId) -> Option<Membership> {
        let removed = self.members.write().await.remove(&id)?;
        info!(
            "{} ({id}) left {}",
            removed.membership.username, removed.membership.room
        );
        Some(removed.membership)
    }

    /// Returns the previous membership, or `None` if nothing changed.
    pub async fn switch_room(&self, id: ConnectionId, new_room: &str) -> Option<Membership> {
        if new_room.is_empty() {
            return None;
        }
        let previous = {
            let mut members = self.members.write().await;
            let member = members.get_mut(&id)?;
            if member.membership.room == new_room {
                return None;
            }
            let previous = member.membership.clone();
            new_room.clone_into(&mut member.membership.room);
            previous
        };
        info!(
            "{} ({id}) switched from {} to {new_room}",
            previous.username, previous.room
        );
        self.broadcast(&previous.room, &ServerEvent::left(&previous.username))
            .await;
        self.broadcast(new_room, &ServerEvent::switched_in(&previous.username))
            .await;
        Some(previous)
    }

    /// Returns how many connections accepted the frame.
    pub async fn broadcast(&self, room: &str, event: &ServerEvent) -> usize {
        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!("failed to encode event for {room}: {e}");
                return 0;
            }
        };

        let targets: Vec<Connection> = {
            let members = self.members.read().await;
            members
                .values()
                .filter(|member| member.membership.room == room)
                .filter(|member| !member.connection.is_closed())
                .map(|member| member.connection.clone())
                .collect()
        };

        let mut delivered = 0;
        for connection in targets {
            match connection.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(SendError::QueueFull) => {
                    warn!("outbound queue full for {}, frame dropped", connection.id());
                }
                Err(SendError::Closed) => {
                    debug!("skipping closed connection {}", connection.id());
                }
            }
        }
        debug!("broadcast to {room} reached {delivered} connection(s)");
        delivered
    }

    pub async fn lookup(&self, id: ConnectionId) -> Option<Membership> {
        let members = self.members.read().await;
        members.get(&id).map(|member| member.membership.clone())
    }

    /// Usernames currently in `room`, in no particular order.
    pub async fn members(&self, room: &str) -> Vec<String> {
        let members = self.members.read().await;
        members
            .values()
            .filter(|member| member.membership.room == room)
            .map(|member| member.membership.username.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Number of rooms with at least one member.
    pub async fn room_count(&self) -> usize {
        let members = self.members.read().await;
        members
            .values()
            .map(|member| member.membership.room.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}
