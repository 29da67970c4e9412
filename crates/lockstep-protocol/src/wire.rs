//! Wire format: one JSON document per WebSocket text frame.
//!
//! Every message on the wire is an object of the form
//!   `{"type": <message type>, "data": <payload>}`

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProtocolError;

/// Maximum frame size (1 MiB). Larger frames are refused in both directions.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Encode a message to the text of a single frame.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    let text =
        serde_json::to_string(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(text)
}

/// Decode a message from the text of a single frame.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
}
