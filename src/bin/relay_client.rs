//! Connects to a hub, identifies, requests the roster, and relays a demo
//! payload to every peer it finds.
//!
//! Usage: `relay_client <config.json>`

use std::net::TcpStream;
use std::time::Duration;

use messagehub::config::ProxyConfig;
use messagehub::proxy::{Proxy, ProxyEvent};
use messagehub::socket::TcpSocket;

fn main() {
    let path = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("usage: relay_client <config.json>");
        std::process::exit(1);
    });

    let config = match ProxyConfig::from_path(&path) {
        Ok(config) => config,
        Err(e) => {
            messagehub::logging::log(&format!("relay_client: {e}"));
            std::process::exit(1);
        }
    };

    let addr: std::net::SocketAddr = config
        .host_address()
        .parse()
        .unwrap_or_else(|e| {
            messagehub::logging::log(&format!("relay_client: invalid address: {e}"));
            std::process::exit(1);
        });

    let stream = match TcpStream::connect_timeout(&addr, Duration::from_secs(config.dial_timeout_secs)) {
        Ok(stream) => stream,
        Err(e) => {
            messagehub::logging::log(&format!("relay_client: dial failed: {e}"));
            std::process::exit(1);
        }
    };

    let (proxy, events) = Proxy::new(config.proxy_queue_size);
    let socket = TcpSocket::new(0, stream, config.send_queue_size, config.read_buf_size);
    proxy.set_socket(socket).expect("fresh proxy always accepts its first socket");

    proxy.send_id_request().expect("not yet identified");

    loop {
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(ProxyEvent::List { ids }) => messagehub::logging::log(&format!("roster: {ids:?}")),
            Ok(ProxyEvent::Relay { sender_id, body }) => {
                messagehub::logging::log(&format!("relay from {sender_id}: {} bytes", body.len()))
            }
            Ok(ProxyEvent::Disconnected) => {
                messagehub::logging::log("relay_client: disconnected");
                break;
            }
            Err(_) => {
                if let Err(e) = proxy.send_list_request() {
                    messagehub::logging::log(&format!("relay_client: list request failed: {e}"));
                }
            }
        }
    }
}
