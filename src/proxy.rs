//! The client-side proxy: a symmetric counterpart to the hub for a single
//! connection, enforcing the same precondition ordering the hub enforces
//! server-side (must be connected before identified, must be identified
//! before LIST/RELAY).

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, RwLock};

use crate::inspector::client_type_caps;
use crate::message::{Message, RELAY_MAX_BODY, RELAY_MAX_RECEIVERS, TYPE_ID};
use crate::socket::{ProbData, RData, TcpSocket, WData};

/// Errors from proxy operations, all precondition violations surfaced
/// synchronously to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No socket has been attached via `set_socket`.
    #[error("proxy is not connected")]
    NotConnected,
    /// The attached socket has not yet received an ID response.
    #[error("proxy is not identified")]
    NotIdentified,
    /// `send_id_request` was called on an already-identified socket.
    #[error("proxy is already identified")]
    AlreadyIdentified,
    /// `set_socket` was called while a socket is already attached.
    #[error("proxy already has an attached socket")]
    AlreadyAttached,
    /// A RELAY request's receiver count or payload size was out of range.
    #[error("invalid argument for relay request")]
    InvalidArgument,
}

/// A response delivered to the proxy's caller: either a roster or a
/// relayed payload. ID responses are consumed internally to set the
/// socket's identifier and are not surfaced through this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEvent {
    /// A LIST response: the roster of other identified peers.
    List {
        /// Identifiers of other identified peers.
        ids: Vec<u64>,
    },
    /// A RELAY response: a payload relayed from another peer.
    Relay {
        /// The identifier of the original sender.
        sender_id: u64,
        /// The relayed payload.
        body: Vec<u8>,
    },
    /// The underlying connection failed and was closed.
    Disconnected,
}

struct Attached {
    socket: Arc<TcpSocket>,
}

/// The client-side counterpart to [`crate::hub::Hub`] for one connection.
pub struct Proxy {
    attached: RwLock<Option<Attached>>,
    event_tx: SyncSender<ProxyEvent>,
    queue_size: usize,
}

impl Proxy {
    /// Builds a proxy whose event channel is bounded to `queue_size` and
    /// returns it together with the receiver end the caller drains.
    pub fn new(queue_size: usize) -> (Arc<Self>, Receiver<ProxyEvent>) {
        let (event_tx, event_rx) = sync_channel(queue_size.max(1));
        (
            Arc::new(Proxy { attached: RwLock::new(None), event_tx, queue_size }),
            event_rx,
        )
    }

    /// Attaches a freshly-connected socket and starts its reader/writer
    /// tasks. Fails with [`Error::AlreadyAttached`] if a socket is already
    /// attached.
    pub fn set_socket(self: &Arc<Self>, socket: Arc<TcpSocket>) -> Result<(), Error> {
        {
            let mut attached = self.attached.write().unwrap();
            if attached.is_some() {
                return Err(Error::AlreadyAttached);
            }
            *attached = Some(Attached { socket: socket.clone() });
        }

        let (read_tx, read_rx) = sync_channel(self.queue_size.max(1));
        let (write_tx, write_rx) = sync_channel(self.queue_size.max(1));
        let (prob_tx, prob_rx) = sync_channel(self.queue_size.max(1));

        socket.start(read_tx, write_tx, prob_tx, client_type_caps());
        spawn_read_handler(socket.clone(), read_rx, self.event_tx.clone());
        spawn_write_handler(write_rx);
        spawn_problem_handler(self.clone(), prob_rx);
        Ok(())
    }

    /// Detaches and closes the current socket, if any.
    pub fn close_socket(&self) {
        if let Some(attached) = self.attached.write().unwrap().take() {
            let _ = attached.socket.close();
        }
    }

    /// Sends an ID request. Fails if not connected or already identified.
    pub fn send_id_request(&self) -> Result<(), Error> {
        let socket = self.require_socket()?;
        if socket.id() != 0 {
            return Err(Error::AlreadyIdentified);
        }
        socket.send(Message::IdRequest).map_err(|_| Error::NotConnected)
    }

    /// Sends a LIST request. Fails if not connected or not yet identified.
    pub fn send_list_request(&self) -> Result<(), Error> {
        let socket = self.require_identified()?;
        socket.send(Message::ListRequest).map_err(|_| Error::NotConnected)
    }

    /// Sends a RELAY request. Fails if not connected or not yet identified;
    /// otherwise fails if the receiver count or payload size is out of
    /// range.
    pub fn send_relay_request(&self, ids: Vec<u64>, body: Vec<u8>) -> Result<(), Error> {
        let socket = self.require_identified()?;
        if ids.is_empty() || ids.len() > RELAY_MAX_RECEIVERS || body.is_empty() || body.len() > RELAY_MAX_BODY {
            return Err(Error::InvalidArgument);
        }
        socket.send(Message::RelayRequest { ids, body }).map_err(|_| Error::NotConnected)
    }

    fn require_socket(&self) -> Result<Arc<TcpSocket>, Error> {
        self.attached
            .read()
            .unwrap()
            .as_ref()
            .map(|a| a.socket.clone())
            .ok_or(Error::NotConnected)
    }

    fn require_identified(&self) -> Result<Arc<TcpSocket>, Error> {
        let socket = self.require_socket()?;
        if socket.id() == 0 {
            return Err(Error::NotIdentified);
        }
        Ok(socket)
    }
}

fn spawn_read_handler(socket: Arc<TcpSocket>, read_rx: Receiver<RData>, event_tx: SyncSender<ProxyEvent>) {
    crate::sys::thread::Builder::new()
        .name("messagehub::proxy::read_handler".to_string())
        .spawn(move || {
            for rdata in read_rx.iter() {
                handle_response(&socket, rdata, &event_tx);
            }
        })
        .expect("spawn proxy read handler");
}

fn handle_response(socket: &Arc<TcpSocket>, rdata: RData, event_tx: &SyncSender<ProxyEvent>) {
    use crate::message::{Codec, TYPE_LIST, TYPE_RELAY};

    match rdata.packet.msg_type {
        TYPE_ID => match Codec::deserialize_id_response(&rdata.packet.body) {
            Ok(Message::IdResponse { id }) => {
                if socket.id() == 0 {
                    socket.set_id(id);
                } else {
                    crate::logging::log(&format!(
                        "proxy: ignoring duplicate/conflicting id response {id}"
                    ));
                }
            }
            _ => crate::logging::log("proxy: malformed id response"),
        },
        TYPE_LIST => match Codec::deserialize_list_response(&rdata.packet.body) {
            Ok(Message::ListResponse { ids }) => {
                let _ = event_tx.send(ProxyEvent::List { ids });
            }
            _ => crate::logging::log("proxy: malformed list response"),
        },
        TYPE_RELAY => match Codec::deserialize_relay_response(&rdata.packet.body) {
            Ok(Message::RelayResponse { sender_id, body }) => {
                let _ = event_tx.send(ProxyEvent::Relay { sender_id, body });
            }
            _ => crate::logging::log("proxy: malformed relay response"),
        },
        _ => {}
    }
}

fn spawn_write_handler(write_rx: Receiver<WData>) {
    crate::sys::thread::Builder::new()
        .name("messagehub::proxy::write_handler".to_string())
        .spawn(move || for _wdata in write_rx.iter() {})
        .expect("spawn proxy write handler");
}

fn spawn_problem_handler(proxy: Arc<Proxy>, prob_rx: Receiver<ProbData>) {
    crate::sys::thread::Builder::new()
        .name("messagehub::proxy::problem_handler".to_string())
        .spawn(move || {
            for prob in prob_rx.iter() {
                crate::logging::log(&format!("proxy: socket {} failed: {}", prob.source_id, prob.err));
                proxy.close_socket();
                let _ = proxy.event_tx.send(ProxyEvent::Disconnected);
            }
        })
        .expect("spawn proxy problem handler");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_socket() -> Arc<TcpSocket> {
        use std::net::{TcpListener, TcpStream};
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        drop(server);
        TcpSocket::new(0, client, 8, 4096)
    }

    #[test]
    fn operations_before_set_socket_are_not_connected() {
        let (proxy, _rx) = Proxy::new(8);
        assert!(matches!(proxy.send_id_request(), Err(Error::NotConnected)));
        assert!(matches!(proxy.send_list_request(), Err(Error::NotConnected)));
        assert!(matches!(
            proxy.send_relay_request(vec![1], vec![1]),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn list_and_relay_require_identification() {
        let (proxy, _rx) = Proxy::new(8);
        proxy.set_socket(fresh_socket()).unwrap();
        assert!(matches!(proxy.send_list_request(), Err(Error::NotIdentified)));
        assert!(matches!(
            proxy.send_relay_request(vec![1], vec![1]),
            Err(Error::NotIdentified)
        ));
    }

    #[test]
    fn double_attach_is_rejected() {
        let (proxy, _rx) = Proxy::new(8);
        proxy.set_socket(fresh_socket()).unwrap();
        assert!(matches!(proxy.set_socket(fresh_socket()), Err(Error::AlreadyAttached)));
    }

    #[test]
    fn relay_request_checks_connection_state_before_argument_bounds() {
        let (proxy, _rx) = Proxy::new(8);
        // Out-of-range args on a disconnected proxy still report
        // `NotConnected`: precondition checks run before bounds checks.
        assert!(matches!(
            proxy.send_relay_request(vec![], vec![1]),
            Err(Error::NotConnected)
        ));
        proxy.set_socket(fresh_socket()).unwrap();
        assert!(matches!(
            proxy.send_relay_request(vec![], vec![1]),
            Err(Error::NotIdentified)
        ));
    }

    #[test]
    fn relay_request_validates_argument_bounds_once_identified() {
        let (proxy, _rx) = Proxy::new(8);
        let socket = fresh_socket();
        socket.set_id(7);
        proxy.set_socket(socket).unwrap();
        assert!(matches!(
            proxy.send_relay_request(vec![], vec![1]),
            Err(Error::InvalidArgument)
        ));
        assert!(matches!(
            proxy.send_relay_request(vec![1], vec![]),
            Err(Error::InvalidArgument)
        ));
    }
}
