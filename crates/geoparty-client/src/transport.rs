//! Transport abstraction for the push channel.
//!
//! Decouples the STOMP session in [`PushChannel`](crate::push_channel::PushChannel)
//! from the socket underneath. A transport moves whole text messages; each
//! message carries exactly one STOMP frame. [`Connector`] produces fresh
//! transports so the channel can reconnect after a drop.

use std::future::Future;

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// An I/O or protocol-level error.
    #[error("{0}")]
    Io(String),
}

/// Read half of a transport connection.
pub trait TransportReader: Send + 'static {
    /// Receive the next text message.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed. Must be
    /// cancel-safe: the channel polls it inside `tokio::select!`.
    fn recv(&mut self) -> impl Future<Output = Result<Option<String>, TransportError>> + Send;
}

/// Write half of a transport connection.
pub trait TransportWriter: Send + 'static {
    /// Send a text message to the remote peer.
    fn send(&mut self, text: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Close the connection from our side.
    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A bidirectional transport that can be split into independent read and write
/// halves.
pub trait Transport: Send + 'static {
    /// The read half produced by [`split`](Transport::split).
    type Reader: TransportReader;
    /// The write half produced by [`split`](Transport::split).
    type Writer: TransportWriter;

    /// Split the transport into independent read and write halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Opens transports. Called once per connection attempt.
pub trait Connector: Send + 'static {
    type Transport: Transport;

    fn connect(&mut self) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}

/// A connector that hands out one already-open transport.
///
/// Any further attempt fails, so a channel built on it never reconnects.
pub struct Preconnected<T>(Option<T>);

impl<T: Transport> Preconnected<T> {
    pub fn new(transport: T) -> Self {
        Self(Some(transport))
    }
}

impl<T: Transport> Connector for Preconnected<T> {
    type Transport = T;

    async fn connect(&mut self) -> Result<T, TransportError> {
        self.0.take().ok_or(TransportError::ConnectionClosed)
    }
}
