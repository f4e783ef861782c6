use std::io;
use std::time::Duration;

use futures::channel::mpsc::SendError as MpscSendError;
use futures::channel::oneshot::Canceled as OneshotCanceled;
use thiserror::Error;

use devtoxide_types::WireError;

/// Everything this crate can fail with.
///
/// Every variant here is one of the error kinds from the session runtime
/// design: a failed launch, a dead transport, a malformed frame, a browser
/// side error, a canceled wait, a blown deadline, or a call made while the
/// dispatcher is shutting down.
#[derive(Debug, Error)]
pub enum CdpError {
    /// Could not locate, spawn, or initialize the browser. Fatal; no retry.
    #[error("failed to launch browser: {0}")]
    Launch(String),

    /// The transport's peer closed the stream; all pending requests fail
    /// with this, and new sends fail immediately with this once observed.
    #[error("transport closed")]
    TransportClosed,

    /// An inbound frame did not satisfy the {id|method}/{result|error}
    /// shape. Not fatal to the dispatcher.
    #[error("malformed protocol frame: {0}")]
    Protocol(String),

    /// The browser replied with `{"error": {...}}`.
    #[error("{0}")]
    Request(#[from] WireError),

    /// The owning session context was canceled before the call completed.
    #[error("operation canceled")]
    Canceled,

    /// The per-call deadline elapsed before a response arrived.
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// The dispatcher was already draining or closed when the call was made.
    #[error("dispatcher is shutting down")]
    Shutdown,

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Ws(#[from] async_tungstenite::tungstenite::Error),

    #[error("{0}")]
    Channel(#[from] ChannelError),
}

/// Failures from the internal channel plumbing (oneshot completion slots,
/// mpsc command queues), nested under their own enum so a `From` impl can
/// bridge both into [`CdpError`] without widening its top-level match arms.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{0}")]
    Send(#[from] MpscSendError),
    #[error("{0}")]
    Canceled(#[from] OneshotCanceled),
}

impl From<OneshotCanceled> for CdpError {
    fn from(err: OneshotCanceled) -> Self {
        ChannelError::from(err).into()
    }
}

impl From<MpscSendError> for CdpError {
    fn from(err: MpscSendError) -> Self {
        ChannelError::from(err).into()
    }
}

pub type Result<T, E = CdpError> = std::result::Result<T, E>;
