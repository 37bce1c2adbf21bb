//! The server-side TCP listener: accepts raw connections, assigns each a
//! random nonzero identifier, and hands it to a [`Hub`].
//!
//! Grounded in the original implementation's `Endpoint`/`EndpointConfing`:
//! named there as an external collaborator the core dispatcher never
//! touches directly, but required here for the crate to have an entry
//! point.

use std::net::{TcpListener, TcpStream};

use rand::Rng;

use crate::config::HubConfig;
use crate::hub::{Error as HubError, Hub};
use crate::socket::TcpSocket;
use std::sync::Arc;

/// Accepts connections on behalf of one [`Hub`].
pub struct Endpoint {
    config: HubConfig,
    hub: Arc<Hub>,
}

impl Endpoint {
    /// Builds an endpoint with a freshly constructed hub sized from
    /// `config.hub_queue_size`.
    pub fn new(config: HubConfig) -> Self {
        let hub = Hub::new(config.hub_queue_size);
        Endpoint { config, hub }
    }

    /// The hub this endpoint feeds, for callers that want to inspect it
    /// (e.g. in tests or diagnostics).
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Binds the configured address and accepts connections forever.
    /// Returns only on bind failure; a single failed `accept()` is logged
    /// and the loop continues.
    pub fn start(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.host_address())?;
        crate::logging::log(&format!("endpoint: listening on {}", self.config.host_address()));
        loop {
            match listener.accept() {
                Ok((stream, _addr)) => self.accept_one(stream),
                Err(e) => {
                    crate::logging::log(&format!("endpoint: accept failed: {e}"));
                    continue;
                }
            }
        }
    }

    fn accept_one(&self, stream: TcpStream) {
        // On most platforms, enabling keepalive causes up to 8 probes at a
        // 75-second interval after two hours of idleness, making the
        // effective EOF-on-idle ceiling roughly 2h10m — comfortably above
        // the socket engine's 2-hour read deadline, which fires first.
        if let Err(e) = stream.set_nodelay(true) {
            crate::logging::log(&format!("endpoint: set_nodelay failed: {e}"));
        }

        let socket = TcpSocket::new(0, stream, self.config.send_queue_size, self.config.read_buf_size);

        let mut rng = rand::thread_rng();
        loop {
            let id: u64 = rng.gen_range(1..=u64::MAX);
            match self.hub.add(id, socket.clone()) {
                Ok(()) => return,
                Err(HubError::DuplicateId(_)) => continue,
                Err(e) => {
                    crate::logging::log(&format!("endpoint: could not register accepted socket: {e}"));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_port_config() -> HubConfig {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        HubConfig {
            host: "127.0.0.1".to_string(),
            port,
            net_type: "tcp".to_string(),
            send_queue_size: 16,
            read_buf_size: 4096,
            write_buf_size: 4096,
            hub_queue_size: 64,
        }
    }

    #[test]
    fn accepted_connection_is_registered_in_the_hub() {
        let config = free_port_config();
        let addr = config.host_address();
        let endpoint = Arc::new(Endpoint::new(config));
        let hub = endpoint.hub().clone();

        let endpoint_for_thread = endpoint.clone();
        crate::sys::thread::Builder::new()
            .name("test-endpoint".to_string())
            .spawn(move || {
                let _ = endpoint_for_thread.start();
            })
            .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(100));
        let _client = TcpStream::connect(&addr).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));
        assert_eq!(hub.len(), 1);
    }
}
