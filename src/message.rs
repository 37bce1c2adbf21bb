//! Message types and wire codec for the relay hub protocol.
//!
//! This module defines the in-memory representation of the three message
//! families the hub understands — ID, LIST, and RELAY — and the codec that
//! converts between those values and the byte layouts carried inside a
//! frame body. Framing itself (the sync prefix, type byte, and length
//! header) is the [`crate::inspector`] module's concern; this module only
//! ever sees a single frame body at a time.
//!
//! # Wire layouts
//!
//! | Type | Name | Body |
//! |---|---|---|
//! | 1 | ID request | empty |
//! | 1 | ID response | 8-byte LE client id |
//! | 2 | LIST request | empty |
//! | 2 | LIST response | N × 8-byte LE ids |
//! | 3 | RELAY request | 1-byte count K, K × 8-byte LE ids, 1..=1,048,576 payload bytes |
//! | 3 | RELAY response | 8-byte LE sender id, 1..=1,048,576 payload bytes |

/// Wire type byte for ID request/response frames.
pub const TYPE_ID: u8 = 1;
/// Wire type byte for LIST request/response frames.
pub const TYPE_LIST: u8 = 2;
/// Wire type byte for RELAY request/response frames.
pub const TYPE_RELAY: u8 = 3;

/// Maximum number of identifiers returned in a LIST response.
pub const LIST_MAX_ITEMS: usize = 131_072;
/// Maximum number of receivers in a single RELAY request.
pub const RELAY_MAX_RECEIVERS: usize = 255;
/// Maximum payload size, in bytes, for a RELAY request or response.
pub const RELAY_MAX_BODY: usize = 1_048_576;
/// Maximum total frame body size for a RELAY request: 1 count byte + 255 ids + max payload.
pub const RELAY_MAX_FRAME_BODY: u32 = (RELAY_MAX_BODY + RELAY_MAX_RECEIVERS * 8 + 1) as u32;

/// Errors from constructing or parsing a [`Message`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// Body bytes did not match the expected layout for the message's type.
    #[error("could not parse message body")]
    ParseError,
    /// An outbound message was constructed with out-of-range sizes.
    #[error("invalid data for outbound message")]
    InvalidData,
}

/// An in-memory relay hub protocol message.
///
/// Request and response share a type code; which variant is in play
/// disambiguates direction. See the module documentation for the wire
/// layout of each variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Client asks the hub for its assigned identifier.
    IdRequest,
    /// Hub tells a client its assigned identifier.
    IdResponse {
        /// The requesting socket's own 64-bit identifier.
        id: u64,
    },
    /// Client asks the hub for the roster of other identified clients.
    ListRequest,
    /// Hub's roster response.
    ListResponse {
        /// Identifiers of other identified clients, excluding the requester.
        ids: Vec<u64>,
    },
    /// Client asks the hub to fan a payload out to a set of receivers.
    RelayRequest {
        /// Target identifiers, 1..=255 of them.
        ids: Vec<u64>,
        /// Opaque payload, 1..=1,048,576 bytes.
        body: Vec<u8>,
    },
    /// A payload relayed from another client.
    RelayResponse {
        /// The identifier of the client that sent the original RELAY request.
        sender_id: u64,
        /// The relayed payload.
        body: Vec<u8>,
    },
}

impl Message {
    /// The wire type byte for this message.
    pub fn msg_type(&self) -> u8 {
        match self {
            Message::IdRequest | Message::IdResponse { .. } => TYPE_ID,
            Message::ListRequest | Message::ListResponse { .. } => TYPE_LIST,
            Message::RelayRequest { .. } | Message::RelayResponse { .. } => TYPE_RELAY,
        }
    }
}

/// Converts between [`Message`] values and frame-body byte layouts.
pub struct Codec;

impl Codec {
    /// Encodes a message into its wire type byte and body bytes.
    ///
    /// RELAY messages with an out-of-range receiver count or payload size
    /// fail with [`Error::InvalidData`]; every other message always
    /// succeeds.
    pub fn serialize(message: &Message) -> Result<(u8, Vec<u8>), Error> {
        let msg_type = message.msg_type();
        let body = match message {
            Message::IdRequest | Message::ListRequest => Vec::new(),
            Message::IdResponse { id } => id.to_le_bytes().to_vec(),
            Message::ListResponse { ids } => {
                if ids.len() > LIST_MAX_ITEMS {
                    return Err(Error::InvalidData);
                }
                ids_to_bytes(ids)
            }
            Message::RelayRequest { ids, body } => {
                if ids.is_empty()
                    || ids.len() > RELAY_MAX_RECEIVERS
                    || body.is_empty()
                    || body.len() > RELAY_MAX_BODY
                {
                    return Err(Error::InvalidData);
                }
                let mut out = Vec::with_capacity(1 + ids.len() * 8 + body.len());
                out.push(ids.len() as u8);
                out.extend(ids_to_bytes(ids));
                out.extend_from_slice(body);
                out
            }
            Message::RelayResponse { sender_id, body } => {
                if body.is_empty() || body.len() > RELAY_MAX_BODY {
                    return Err(Error::InvalidData);
                }
                let mut out = Vec::with_capacity(8 + body.len());
                out.extend(sender_id.to_le_bytes());
                out.extend_from_slice(body);
                out
            }
        };
        Ok((msg_type, body))
    }

    /// Parses an ID response body. Requires exactly 8 bytes.
    pub fn deserialize_id_response(bytes: &[u8]) -> Result<Message, Error> {
        if bytes.len() != 8 {
            return Err(Error::ParseError);
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(Message::IdResponse {
            id: u64::from_le_bytes(buf),
        })
    }

    /// Parses a LIST response body. Requires a length that's a multiple of 8;
    /// an empty body yields an empty list.
    pub fn deserialize_list_response(bytes: &[u8]) -> Result<Message, Error> {
        if bytes.len() % 8 != 0 {
            return Err(Error::ParseError);
        }
        Ok(Message::ListResponse {
            ids: bytes_to_ids(bytes),
        })
    }

    /// Parses a RELAY request body: `[count][count * u64 LE ids][payload]`.
    pub fn deserialize_relay_request(bytes: &[u8]) -> Result<Message, Error> {
        if bytes.len() < 10 {
            return Err(Error::ParseError);
        }
        let count = bytes[0] as usize;
        if count == 0 || bytes.len() < count * 8 + 2 {
            return Err(Error::ParseError);
        }
        let ids = bytes_to_ids(&bytes[1..1 + count * 8]);
        let body = bytes[1 + count * 8..].to_vec();
        Ok(Message::RelayRequest { ids, body })
    }

    /// Parses a RELAY response body: `[sender_id LE8][payload]`.
    pub fn deserialize_relay_response(bytes: &[u8]) -> Result<Message, Error> {
        if bytes.len() < 9 {
            return Err(Error::ParseError);
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        Ok(Message::RelayResponse {
            sender_id: u64::from_le_bytes(buf),
            body: bytes[8..].to_vec(),
        })
    }
}

fn ids_to_bytes(ids: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ids.len() * 8);
    for id in ids {
        out.extend(id.to_le_bytes());
    }
    out
}

fn bytes_to_ids(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            u64::from_le_bytes(buf)
        })
        .collect()
}
