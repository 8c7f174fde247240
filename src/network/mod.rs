//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single non-blocking acceptor loop ([`Server::run`])
//! - One thread per connection, each serving requests against a [`LogStore`](crate::store::LogStore)
//! - [`RemoteLog`] client implementing [`Wal`](crate::wal::Wal) over a connection

mod client;
mod connection;
mod server;

pub use client::RemoteLog;
pub use connection::Connection;
pub use server::Server;
