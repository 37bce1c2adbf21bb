//! Runs a hub server bound to the address in a JSON config file.
//!
//! Usage: `hub_server <config.json>`

use messagehub::config::HubConfig;
use messagehub::endpoint::Endpoint;

fn main() {
    let path = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("usage: hub_server <config.json>");
        std::process::exit(1);
    });

    let config = match HubConfig::from_path(&path) {
        Ok(config) => config,
        Err(e) => {
            messagehub::logging::log(&format!("hub_server: {e}"));
            std::process::exit(1);
        }
    };

    let endpoint = Endpoint::new(config);
    if let Err(e) = endpoint.start() {
        messagehub::logging::log(&format!("hub_server: {e}"));
        std::process::exit(1);
    }
}
