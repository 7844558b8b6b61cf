//! vaultmux: connection multiplexing daemon for a single-instance MCP server.
//!
//! Many MCP clients connect to the daemon's listening Unix socket; the daemon
//! holds exactly one connection to the upstream MCP server, performs the
//! `initialize` handshake once, answers per-client lifecycle chatter locally,
//! and routes requests and responses by rewriting JSON-RPC identifiers. With no
//! clients connected for the idle timeout it removes its socket and exits.
//!
//! Unix only: both endpoints are Unix domain sockets.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
