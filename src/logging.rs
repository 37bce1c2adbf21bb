//! Diagnostic logging for the relay hub.
//!
//! A simple shim over stderr, used in place of a full logging framework for
//! accept/dispatch/eviction diagnostics.
//!
//! # Examples
//!
//! ```
//! # mod logging {
//! #     pub fn log(str: &str) {
//! #         eprintln!("{}", str);
//! #     }
//! # }
//! # use logging::log;
//! log("hub listening on 0.0.0.0:9000");
//! log(&format!("evicted socket {}", 42));
//! ```

/// Writes a message to stderr with a trailing newline.
pub fn log(str: &str) {
    eprintln!("{}", str);
}
