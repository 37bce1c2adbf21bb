//! A TCP message relay hub: rendezvous, discovery, and best-effort fan-out
//! for peer-to-peer-style messaging through a central broker.
//!
//! The core pieces, roughly leaf-to-root:
//!
//! - [`message`] — in-memory message types and the wire codec.
//! - [`inspector`] — the resumable byte-stream-to-frame state machine.
//! - [`socket`] — the per-connection reader/writer I/O engine.
//! - [`hub`] — the server-side registry and dispatcher.
//! - [`proxy`] — the client-side counterpart.
//! - [`endpoint`] — the TCP listener that feeds the hub.
//! - [`config`] — JSON-file-backed configuration for the two binaries.

pub mod config;
pub mod endpoint;
pub mod hub;
pub mod inspector;
pub mod logging;
pub mod message;
pub mod proxy;
pub mod socket;
pub mod sys;
