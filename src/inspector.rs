//! Resumable byte-stream to frame extractor.
//!
//! This is the hardest part of the relay hub: recovering frame boundaries
//! from arbitrary TCP byte chunks using a 7-byte sync prefix and a
//! length-prefixed header, bounded per type to prevent abuse. The state
//! machine must be correct across fragmentation, partial prefix matches
//! split across reads, oversize rejection, and re-synchronization after
//! garbage — so [`Inspector`] keeps all of its progress in `self` and
//! [`Inspector::inspect`] can be called with chunks of any size, in any
//! partition, and must produce the same packets either way.
//!
//! This generalizes the single-shot, panic-on-overflow length-prefixed
//! parser used elsewhere in this codebase for simple proxy framing into a
//! genuine multi-phase resumable machine, in the style of an HTTP/WebSocket
//! upgrade parser that has to survive a connection delivering its handshake
//! one byte at a time.

use std::collections::HashMap;

use crate::message::{
    LIST_MAX_ITEMS, RELAY_MAX_BODY, RELAY_MAX_FRAME_BODY, TYPE_ID, TYPE_LIST, TYPE_RELAY,
};

/// The 7-byte sync sequence that opens every frame on the wire: `"SOFSOF\n"`.
pub const SYNC_PREFIX: [u8; 7] = [0x53, 0x4F, 0x46, 0x53, 0x4F, 0x46, 0x0A];

/// Length, in bytes, of the header that follows the sync prefix: one type
/// byte plus a little-endian `u32` body length.
const HEADER_LEN: usize = 5;

/// Per-type body-size caps the hub advertises to every socket it starts.
/// ID and LIST requests carry no body; RELAY is capped at the maximum
/// combined request-frame size (§3). These are the caps for *inbound
/// requests*, correct only for the server side of a connection.
pub fn default_type_caps() -> HashMap<u8, u32> {
    let mut caps = HashMap::new();
    caps.insert(TYPE_ID, 0);
    caps.insert(TYPE_LIST, 0);
    caps.insert(TYPE_RELAY, RELAY_MAX_FRAME_BODY);
    caps
}

/// Per-type body-size caps the proxy advertises when it starts the client
/// side of a socket. The client side is the one that must *receive*
/// responses, not empty requests, so its caps differ from the server's:
/// an 8-byte id, up to `LIST_MAX_ITEMS` identifiers, or a relay payload
/// plus its 8-byte sender id.
pub fn client_type_caps() -> HashMap<u8, u32> {
    let mut caps = HashMap::new();
    caps.insert(TYPE_ID, 8);
    caps.insert(TYPE_LIST, (LIST_MAX_ITEMS * 8) as u32);
    caps.insert(TYPE_RELAY, (RELAY_MAX_BODY + 8) as u32);
    caps
}

/// A fully extracted frame body, tagged with its wire type byte.
///
/// Packets carry no framing overhead in memory; the prefix, type byte, and
/// length header exist only on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// The wire type byte (see [`crate::message`]).
    pub msg_type: u8,
    /// The frame body, possibly empty.
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Scanning for the sync prefix; no partial match in progress.
    Syncing,
    /// A non-empty, non-full prefix match is in progress.
    Partial,
    /// Prefix matched; accumulating the 5-byte header.
    Headering,
    /// Header accepted; accumulating the body.
    Bodying,
}

/// The packet inspector's resumable state.
///
/// One `Inspector` belongs to exactly one socket's reader task and is
/// fed every chunk that task reads from the wire, in order.
#[derive(Debug)]
pub struct Inspector {
    phase: Phase,
    /// Count of sync-prefix bytes matched so far in `Syncing`/`Partial`.
    prefix_matched: usize,
    header_buf: Vec<u8>,
    current_type: u8,
    current_body_len: u32,
    body_buf: Vec<u8>,
    type_caps: HashMap<u8, u32>,
}

impl Inspector {
    /// Creates a new inspector that will accept bodies up to the size
    /// given for each type in `type_caps`; a type absent from the map is
    /// always rejected.
    pub fn new(type_caps: HashMap<u8, u32>) -> Self {
        Inspector {
            phase: Phase::Syncing,
            prefix_matched: 0,
            header_buf: Vec::with_capacity(HEADER_LEN),
            current_type: 0,
            current_body_len: 0,
            body_buf: Vec::new(),
            type_caps,
        }
    }

    /// Feeds one chunk of bytes read from the wire into the state machine,
    /// returning every packet that chunk completes.
    ///
    /// The remainder of the chunk after a packet is emitted is immediately
    /// re-fed through the machine within the same call; `inspect` never
    /// needs to be called twice for the same bytes.
    pub fn inspect(&mut self, chunk: &[u8]) -> Vec<Packet> {
        let mut packets = Vec::new();
        let mut i = 0;
        while i < chunk.len() {
            match self.phase {
                Phase::Syncing | Phase::Partial => {
                    let b = chunk[i];
                    i += 1;
                    if b == SYNC_PREFIX[self.prefix_matched] {
                        self.prefix_matched += 1;
                        if self.prefix_matched == SYNC_PREFIX.len() {
                            self.phase = Phase::Headering;
                            self.prefix_matched = 0;
                            self.header_buf.clear();
                        } else {
                            self.phase = Phase::Partial;
                        }
                    } else {
                        self.prefix_matched = 0;
                        self.phase = Phase::Syncing;
                    }
                }
                Phase::Headering => {
                    self.header_buf.push(chunk[i]);
                    i += 1;
                    if self.header_buf.len() == HEADER_LEN {
                        let msg_type = self.header_buf[0];
                        let mut len_bytes = [0u8; 4];
                        len_bytes.copy_from_slice(&self.header_buf[1..5]);
                        let len = u32::from_le_bytes(len_bytes);
                        self.header_buf.clear();

                        match self.type_caps.get(&msg_type) {
                            Some(&cap) if len <= cap => {
                                self.current_type = msg_type;
                                self.current_body_len = len;
                                self.body_buf.clear();
                                if len == 0 {
                                    packets.push(Packet { msg_type, body: Vec::new() });
                                    self.phase = Phase::Syncing;
                                } else {
                                    self.phase = Phase::Bodying;
                                }
                            }
                            _ => {
                                // Unknown type or over-cap length: reject without
                                // consuming a body that was never validated, and
                                // resume scanning from the very next byte.
                                self.phase = Phase::Syncing;
                                self.prefix_matched = 0;
                            }
                        }
                    }
                }
                Phase::Bodying => {
                    let needed = self.current_body_len as usize - self.body_buf.len();
                    let available = chunk.len() - i;
                    let take = needed.min(available);
                    self.body_buf.extend_from_slice(&chunk[i..i + take]);
                    i += take;
                    if self.body_buf.len() == self.current_body_len as usize {
                        packets.push(Packet {
                            msg_type: self.current_type,
                            body: std::mem::take(&mut self.body_buf),
                        });
                        self.phase = Phase::Syncing;
                    }
                }
            }
        }
        packets
    }
}

/// Composes the full on-wire frame for a body already produced by
/// [`crate::message::Codec::serialize`]: prefix, type byte, LE32 length,
/// body.
pub fn frame(msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SYNC_PREFIX.len() + HEADER_LEN + body.len());
    out.extend_from_slice(&SYNC_PREFIX);
    out.push(msg_type);
    out.extend((body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_request_frame() -> Vec<u8> {
        frame(TYPE_ID, &[])
    }

    #[test]
    fn prefix_only_chunk_then_header_and_body_in_later_calls() {
        let mut insp = Inspector::new(default_type_caps());
        assert!(insp.inspect(&SYNC_PREFIX).is_empty());
        let packets = insp.inspect(&[TYPE_ID, 0, 0, 0, 0]);
        assert_eq!(packets, vec![Packet { msg_type: TYPE_ID, body: vec![] }]);
    }

    #[test]
    fn partial_prefix_split_across_chunks() {
        let mut insp = Inspector::new(default_type_caps());
        let full = id_request_frame();
        let (first, rest) = full.split_at(3);
        assert!(insp.inspect(first).is_empty());
        let packets = insp.inspect(rest);
        assert_eq!(packets, vec![Packet { msg_type: TYPE_ID, body: vec![] }]);
    }

    #[test]
    fn false_prefix_start_does_not_corrupt_state() {
        let mut insp = Inspector::new(default_type_caps());
        let mut garbage = vec![0x53, 0x4F, 0x46, 0x53, b'*', 0x46, 0x0A];
        garbage.extend(id_request_frame());
        let packets = insp.inspect(&garbage);
        assert_eq!(packets, vec![Packet { msg_type: TYPE_ID, body: vec![] }]);
    }

    #[test]
    fn two_concatenated_frames_in_one_chunk_yield_two_packets() {
        let mut insp = Inspector::new(default_type_caps());
        let mut both = id_request_frame();
        both.extend(id_request_frame());
        let packets = insp.inspect(&both);
        assert_eq!(
            packets,
            vec![
                Packet { msg_type: TYPE_ID, body: vec![] },
                Packet { msg_type: TYPE_ID, body: vec![] },
            ]
        );
    }

    #[test]
    fn oversize_header_is_discarded_and_scan_resumes() {
        let mut insp = Inspector::new(default_type_caps());
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&SYNC_PREFIX);
        bytes.push(TYPE_RELAY);
        bytes.extend((RELAY_MAX_FRAME_BODY + 1).to_le_bytes());
        bytes.extend(id_request_frame());
        let packets = insp.inspect(&bytes);
        assert_eq!(packets, vec![Packet { msg_type: TYPE_ID, body: vec![] }]);
    }

    #[test]
    fn unknown_type_is_discarded_and_scan_resumes() {
        let mut insp = Inspector::new(default_type_caps());
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&SYNC_PREFIX);
        bytes.push(0xFF);
        bytes.extend(0u32.to_le_bytes());
        bytes.extend(id_request_frame());
        let packets = insp.inspect(&bytes);
        assert_eq!(packets, vec![Packet { msg_type: TYPE_ID, body: vec![] }]);
    }

    #[test]
    fn cap_enforcement_never_emits_over_cap_body() {
        let mut insp = Inspector::new(default_type_caps());
        let body = vec![0u8; 5];
        let f = frame(TYPE_LIST, &body); // LIST cap is 0, this frame is over-cap
        let packets = insp.inspect(&f);
        assert!(packets.is_empty());
    }

    #[test]
    fn scenario_two_id_requests_across_ten_arbitrary_chunks() {
        let mut full = id_request_frame();
        full.extend(id_request_frame());
        assert_eq!(full.len(), 24);

        // Ten chunks of arbitrary sizes, including single-byte chunks that
        // split both the prefix and the header, summing to len(full).
        let boundaries = [1, 1, 1, 2, 3, 1, 1, 5, 4, 5];
        assert_eq!(boundaries.iter().sum::<usize>(), full.len());

        let mut insp = Inspector::new(default_type_caps());
        let mut packets = Vec::new();
        let mut pos = 0;
        for size in boundaries {
            packets.extend(insp.inspect(&full[pos..pos + size]));
            pos += size;
        }
        assert_eq!(
            packets,
            vec![
                Packet { msg_type: TYPE_ID, body: vec![] },
                Packet { msg_type: TYPE_ID, body: vec![] },
            ]
        );
    }

    #[test]
    fn relay_body_round_trips_through_frame_and_inspector() {
        let mut insp = Inspector::new(default_type_caps());
        let body = vec![1u8, 2, 3, 4, 5];
        let f = frame(TYPE_RELAY, &body);
        let packets = insp.inspect(&f);
        assert_eq!(packets, vec![Packet { msg_type: TYPE_RELAY, body }]);
    }
}
