//! Byte-stream transports carrying newline-delimited JSON-RPC frames.
//!
//! A transport owns the connection to one server. It writes whole frames on
//! request and feeds every inbound line to the session's [`Dispatcher`],
//! calling [`Dispatcher::on_disconnected`] if the peer goes away on its own.

mod http;
mod stdio;

pub use http::HttpTransport;
pub use stdio::{StdioTransport, TransportState};

use crate::dispatcher::Dispatcher;
use crate::error::McpError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable future borrowed from the transport.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Connection mechanism used by [`McpClient`](crate::McpClient).
///
/// Dyn-compatible so a client can hold `Arc<dyn Transport>` and stay
/// agnostic of how frames travel.
pub trait Transport: Send + Sync {
    /// Establish the connection and start delivering inbound lines to `dispatcher`.
    ///
    /// Must only return `Ok` once [`send_message`](Self::send_message) is usable.
    fn connect(&self, dispatcher: Arc<Dispatcher>) -> BoxFuture<'_, Result<(), McpError>>;

    /// Write one serialized frame. Implementations add the line terminator
    /// and never interleave concurrent writes.
    fn send_message(&self, line: String) -> BoxFuture<'_, Result<(), McpError>>;

    /// Tear the connection down and release its resources. Idempotent.
    fn disconnect(&self) -> BoxFuture<'_, ()>;

    /// Short name for status output (e.g., "stdio").
    fn kind(&self) -> &'static str;
}
