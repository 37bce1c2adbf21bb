//! The hub: a registry of connected sockets and the dispatcher that routes
//! ID, LIST, and RELAY packets between them.
//!
//! The registry is a keyed `RwLock<HashMap<u64, Entry>>` shared across the
//! three dispatch threads, generalizing the single-slot `Arc<Mutex<_>>`
//! pattern used elsewhere in this codebase for shared connection state into
//! one that supports many concurrent readers, which the hub's read-heavy
//! LIST/RELAY workload needs and a single accept slot never did.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, RwLock};

use crate::inspector::{client_type_caps, default_type_caps};
use crate::message::{Message, TYPE_ID};
use crate::socket::{ProbData, RData, TcpSocket, WData};

/// Maximum number of identifiers ever returned in one LIST response.
pub const LIST_RESPONSE_CAP: usize = crate::message::LIST_MAX_ITEMS;

/// Errors from hub operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `add` was called with an id already present in the registry.
    #[error("duplicate socket id {0}")]
    DuplicateId(u64),
    /// `add` was called with id zero, which is never a valid connection id.
    #[error("socket id must be nonzero")]
    ZeroId,
}

struct Entry {
    socket: Arc<TcpSocket>,
    identified: bool,
}

/// The server-side registry and dispatcher.
///
/// Owns three bounded channels (read, write-ack, problem) shared by every
/// socket it starts, and three background threads that drain them.
pub struct Hub {
    registry: Arc<RwLock<HashMap<u64, Entry>>>,
    read_tx: SyncSender<RData>,
    write_tx: SyncSender<WData>,
    prob_tx: SyncSender<ProbData>,
}

impl Hub {
    /// Builds a hub whose three dispatch channels are each bounded to
    /// `queue_size`, and spawns the read, write-ack, and problem handler
    /// threads.
    pub fn new(queue_size: usize) -> Arc<Self> {
        let registry: Arc<RwLock<HashMap<u64, Entry>>> = Arc::new(RwLock::new(HashMap::new()));
        let (read_tx, read_rx) = sync_channel(queue_size.max(1));
        let (write_tx, write_rx) = sync_channel(queue_size.max(1));
        let (prob_tx, prob_rx) = sync_channel(queue_size.max(1));

        let hub = Arc::new(Hub { registry, read_tx, write_tx, prob_tx });

        spawn_read_handler(hub.registry.clone(), read_rx);
        spawn_write_handler(hub.registry.clone(), write_rx);
        spawn_problem_handler(hub.clone(), prob_rx);

        hub
    }

    /// Registers a new socket, assigns it a nonzero id, and starts its
    /// reader/writer tasks wired to this hub's channels.
    pub fn add(&self, id: u64, socket: Arc<TcpSocket>) -> Result<(), Error> {
        if id == 0 {
            return Err(Error::ZeroId);
        }
        {
            let mut registry = self.registry.write().unwrap();
            if registry.contains_key(&id) {
                return Err(Error::DuplicateId(id));
            }
            socket.set_id(id);
            registry.insert(id, Entry { socket: socket.clone(), identified: false });
        }
        socket.start(
            self.read_tx.clone(),
            self.write_tx.clone(),
            self.prob_tx.clone(),
            default_type_caps(),
        );
        Ok(())
    }

    /// Evicts `id` from the registry and closes its socket. Missing ids are
    /// logged and otherwise ignored.
    pub fn close_socket(&self, id: u64) {
        let entry = self.registry.write().unwrap().remove(&id);
        match entry {
            Some(entry) => {
                if let Err(e) = entry.socket.close() {
                    crate::logging::log(&format!("hub: closing socket {id}: {e}"));
                }
            }
            None => crate::logging::log(&format!("hub: close_socket({id}) on unknown id")),
        }
    }

    /// Number of sockets currently registered.
    pub fn len(&self) -> usize {
        self.registry.read().unwrap().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn spawn_read_handler(registry: Arc<RwLock<HashMap<u64, Entry>>>, read_rx: Receiver<RData>) {
    crate::sys::thread::Builder::new()
        .name("messagehub::hub::read_handler".to_string())
        .spawn(move || {
            for rdata in read_rx.iter() {
                dispatch(&registry, rdata);
            }
        })
        .expect("spawn hub read handler");
}

fn dispatch(registry: &Arc<RwLock<HashMap<u64, Entry>>>, rdata: RData) {
    use crate::message::{TYPE_LIST, TYPE_RELAY};

    let source_id = rdata.source_id;
    match rdata.packet.msg_type {
        TYPE_ID => {
            let target = registry.read().unwrap().get(&source_id).map(|e| e.socket.clone());
            if let Some(socket) = target {
                let _ = socket.send(Message::IdResponse { id: source_id });
            }
        }
        TYPE_LIST => {
            let registry = registry.read().unwrap();
            let Some(sender) = registry.get(&source_id) else { return };
            if !sender.identified {
                return;
            }
            let mut ids = Vec::new();
            for (&id, entry) in registry.iter() {
                if id == source_id || !entry.identified {
                    continue;
                }
                ids.push(id);
                if ids.len() == LIST_RESPONSE_CAP {
                    break;
                }
            }
            let socket = sender.socket.clone();
            drop(registry);
            let _ = socket.send(Message::ListResponse { ids });
        }
        TYPE_RELAY => {
            let body = match crate::message::Codec::deserialize_relay_request(&rdata.packet.body) {
                Ok(Message::RelayRequest { ids, body }) => (ids, body),
                _ => return,
            };
            let (target_ids, payload) = body;
            let registry = registry.read().unwrap();
            let Some(sender) = registry.get(&source_id) else { return };
            if !sender.identified {
                return;
            }
            for target_id in target_ids {
                if let Some(entry) = registry.get(&target_id) {
                    if entry.identified {
                        let _ = entry.socket.send(Message::RelayResponse {
                            sender_id: source_id,
                            body: payload.clone(),
                        });
                    }
                }
            }
        }
        _ => {}
    }
}

fn spawn_write_handler(registry: Arc<RwLock<HashMap<u64, Entry>>>, write_rx: Receiver<WData>) {
    crate::sys::thread::Builder::new()
        .name("messagehub::hub::write_handler".to_string())
        .spawn(move || {
            for wdata in write_rx.iter() {
                if wdata.msg_type != TYPE_ID {
                    continue;
                }
                if let Some(entry) = registry.write().unwrap().get_mut(&wdata.target_id) {
                    entry.identified = true;
                }
            }
        })
        .expect("spawn hub write handler");
}

fn spawn_problem_handler(hub: Arc<Hub>, prob_rx: Receiver<ProbData>) {
    crate::sys::thread::Builder::new()
        .name("messagehub::hub::problem_handler".to_string())
        .spawn(move || {
            for prob in prob_rx.iter() {
                crate::logging::log(&format!("hub: socket {} failed: {}", prob.source_id, prob.err));
                hub.close_socket(prob.source_id);
            }
        })
        .expect("spawn hub problem handler");
}
