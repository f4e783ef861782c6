//! A session-runtime client for the Chrome DevTools Protocol: launches or
//! attaches to a browser, and gives callers a hierarchy of cancellable
//! sessions for sending commands and subscribing to events.
//!
//! The pieces, roughly bottom-up:
//!
//! - [`codec`] turns typed commands into wire frames and wire frames back
//!   into responses/events; [`transport`] carries those frames over either
//!   OS pipes or a WebSocket.
//! - [`dispatcher`] is the state machine owning id assignment, the pending
//!   response table, and the subscriber list.
//! - [`session`] is the handle callers actually hold: a `sessionId`, a
//!   cancellation scope, and a [`dispatcher::Dispatcher`] to talk through.
//! - [`browser`] composes [`launcher`] (process spawn + transport setup)
//!   with a dispatcher and root session into the top-level [`Browser`].
//!
//! `devtoxide_types` carries the wire vocabulary (`Method`/`Command`/`Event`
//! traits, `CallId`, `Response`) that generated per-domain command/event
//! types plug into; this crate never needs to know what `Page.navigate`
//! means, only how to route it.

pub mod browser;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod launcher;
mod platform;
mod process;
pub mod session;
pub mod subscribe;
pub mod transport;

pub use browser::Browser;
pub use config::{FlagValue, OutputDir, SessionConfig, SessionConfigBuilder, TransportKind, UserDataDir};
pub use error::{CdpError, Result};
pub use session::{CancellationToken, Session};
pub use subscribe::{EventStream, SubscriptionId};

pub use devtoxide_types::{CallId, Command, Event, Method};
