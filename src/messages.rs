use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("expected a text frame")]
    NotText,
}

/// First frame on every connection. Any `type` field is ignored.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
}

impl JoinRequest {
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        decode_object(raw)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Chat {
        message: String,
    },
    Typing,
    StopTyping,
    SwitchRoom {
        room: String,
    },
    #[serde(other)]
    Unknown,
}

impl ClientEvent {
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        decode_object(raw)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    System {
        message: String,
    },
    Chat {
        username: String,
        message: String,
        time: String,
    },
    Typing {
        username: String,
    },
    StopTyping {
        username: String,
    },
}

impl ServerEvent {
    /// Announcement sent to a room when a connection first joins it.
    pub fn joined(username: &str, room: &str) -> Self {
        ServerEvent::System {
            message: format!("{username} joined {room} 👋"),
        }
    }

    /// Announcement sent to the room a connection switched into.
    pub fn switched_in(username: &str) -> Self {
        ServerEvent::System {
            message: format!("{username} joined the room 👋"),
        }
    }

    pub fn left(username: &str) -> Self {
        ServerEvent::System {
            message: format!("{username} left the room ❌"),
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// Serde happily reads structs and tagged enums out of JSON arrays, so the
// frame is checked to be an object before the typed pass.
fn decode_object<T: DeserializeOwned>(raw: &str) -> Result<T, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(serde_json::Error::custom("expected a JSON object").into());
    }
    Ok(serde_json::from_value(value)?)
}
