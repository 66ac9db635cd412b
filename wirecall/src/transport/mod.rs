//! Byte-level channels a [`crate::Client`] talks through.
//!
//! A transport moves opaque, already-encoded messages. Framing is its own
//! business; message meaning is not.

mod frame;
mod http;
mod socket;
mod stream;

use std::future::Future;

use bytes::Bytes;

pub use frame::FrameReader;
pub use http::HttpTransport;
pub use socket::SocketTransport;
pub use stream::StreamTransport;

use crate::Result;

/// A bidirectional channel for encoded messages.
///
/// Three implementations ship with the crate:
///
/// * [`StreamTransport`] - frames over any reader/writer pair, e.g. stdio
/// * [`SocketTransport`] - one long-lived TCP connection, `connect` first
/// * [`HttpTransport`] - one POST per message, the reply is the body
///
/// Every frame handed to [`Transport::send`] reaches the peer unchanged
/// apart from the separator a framed transport appends.
///
/// # Examples
///
/// ```rust,no_run
/// # use wirecall::{Client, Settings, SocketTransport, Transport};
/// # #[tokio::main]
/// # async fn main() -> wirecall::Result<()> {
/// let transport = SocketTransport::new("127.0.0.1:8000", b"\n");
/// transport.connect().await?;
/// assert!(transport.is_connected());
/// let client = Client::new(transport, Settings::default());
/// # Ok(())
/// # }
/// ```
pub trait Transport: Send + Sync + 'static {
    /// Whether a send can be attempted now. Framed streams are always
    /// connected; sockets only between `connect` and the first failure.
    fn is_connected(&self) -> bool;

    /// Establishes the underlying connection if the transport has one.
    ///
    /// # Errors
    ///
    /// Fails when the peer cannot be reached.
    fn connect(&self) -> impl Future<Output = Result<bool>> + Send;

    /// Sends one encoded message.
    ///
    /// Request/reply transports return the peer's reply body, which may hold
    /// several frames. Stream transports return `None`.
    ///
    /// # Errors
    ///
    /// Fails when the message cannot be delivered.
    fn send(&self, msg: Bytes) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Waits for the next inbound frame.
    ///
    /// Returns `None` when the transport has no inbound stream at all, in
    /// which case replies only arrive through [`Transport::send`].
    ///
    /// # Errors
    ///
    /// Fails with [`crate::ErrorKind::NotConnected`] once the stream is closed.
    fn receive(&self) -> impl Future<Output = Result<Option<Bytes>>> + Send;
}
