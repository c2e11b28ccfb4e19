//! Multi-client chat relay over plain TCP.
//!
//! A server accepts connections and relays every chunk it receives from one
//! client to all the others. A client pairs a send task (console input to
//! socket) with a receive task (socket to display).
//!
//! - [`cli`] parses the command line for server and client modes.
//! - [`connection`] wraps the send side of one peer socket.
//! - [`registry`] is the lock-protected set of live connections and its
//!   broadcast fan-out.
//! - [`server`] binds the listener and runs the accept and relay loops.
//! - [`client`] drives a client session and its late-bound display sink.
//! - [`wire`] holds the unframed chunk reads and the message text conventions.

pub mod cli;
pub mod client;
pub mod connection;
pub mod registry;
pub mod server;
pub mod wire;
