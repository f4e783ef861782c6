//! The transport contract: a single bidirectional byte stream to the
//! browser, either OS pipes on the child's fds 3/4, or a WebSocket to the
//! browser's debugger endpoint.
//!
//! Both implementations are kept behind one object-safe trait so the
//! dispatcher never has to know which one it is holding, and so tests can
//! substitute a mock that neither spawns a process nor opens a socket.

use futures::future::BoxFuture;

use crate::error::CdpError;

pub mod pipe;
pub mod websocket;

/// One already-framed, already-decoded-from-its-wire-envelope inbound
/// payload: raw JSON bytes for a response or event frame, handed to
/// [`crate::codec::decode_frame`] by the dispatcher.
pub type InboundFrame = Vec<u8>;

/// The write half of a transport, guarded by the dispatcher's writer mutex.
/// After the first failure, every subsequent call must fail the same way.
pub trait TransportWriter: Send {
    fn write(&mut self, frame: Vec<u8>) -> BoxFuture<'_, Result<(), CdpError>>;
}

/// The read half, owned exclusively by the dispatcher's reader task - never
/// called concurrently with itself, so it needs no internal locking.
pub trait TransportReader: Send {
    /// Waits for and returns the next inbound frame, or `None` exactly once
    /// when the peer has closed the connection.
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<InboundFrame>, CdpError>>;
}

/// A bidirectional byte-stream to the browser, split into independent
/// read/write halves before the dispatcher takes ownership of either.
///
/// The halves are split up front rather than shared behind one lock: the
/// reader task's `recv` sits parked waiting for the next frame for most of
/// its life, and a write must never be stuck behind that wait.
pub trait Transport: Send {
    fn split(self: Box<Self>) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>);
}
