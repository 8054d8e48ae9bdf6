//! Chat connection core for Diablo-style game servers.
//!
//! Provides the connection building block higher layers wrap:
//! - `client`: TCP connection lifecycle, login handshake, outbound message
//!   framing, and the background read loop.
//!
//! Parsing the inbound byte stream, retry/reconnect policy, credential
//! storage, and presentation are the caller's concern.

pub mod client;

pub use client::{Client, ClientConfig, ClientError, ConnectionState};
