//! Session contexts: the hierarchical handle callers actually hold.
//!
//! A [`Session`] pairs a [`Dispatcher`] handle with a CDP `sessionId` (or
//! `None` for the session attached to the browser target itself) and a
//! [`CancellationToken`] that is a child of its parent's. Canceling a
//! session cancels every session spawned from it; closing the root session
//! asks the browser to shut down, then tears the whole tree down.

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use devtoxide_types::{Command, Event, JsonEvent, Method};
use futures::{Stream, StreamExt};

use crate::dispatcher::Dispatcher;
use crate::error::{CdpError, Result};
use crate::subscribe::SubscriptionId;

struct TokenInner {
    cancelled: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
    children: Mutex<Vec<Weak<TokenInner>>>,
}

/// A cancellation token that cascades: canceling a token cancels every
/// token ever derived from it via [`CancellationToken::child`].
#[derive(Clone)]
pub struct CancellationToken(Arc<TokenInner>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(TokenInner {
            cancelled: AtomicBool::new(false),
            wakers: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
        }))
    }

    /// A token that starts out already-cancelled if `self` is.
    pub fn child(&self) -> Self {
        let child = CancellationToken(Arc::new(TokenInner {
            cancelled: AtomicBool::new(self.is_cancelled()),
            wakers: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
        }));
        self.0.children.lock().unwrap().push(Arc::downgrade(&child.0));
        child
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    /// Cancels this token and every live descendant. Idempotent.
    pub fn cancel(&self) {
        if self.0.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        for waker in self.0.wakers.lock().unwrap().drain(..) {
            waker.wake();
        }
        let children = self.0.children.lock().unwrap();
        for weak in children.iter() {
            if let Some(inner) = weak.upgrade() {
                CancellationToken(inner).cancel();
            }
        }
    }

    /// A future that resolves once this token is cancelled.
    pub fn cancelled(&self) -> Cancelled<'_> {
        Cancelled(self)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Cancelled<'a>(&'a CancellationToken);

impl Future for Cancelled<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.0.is_cancelled() {
            return Poll::Ready(());
        }
        self.0 .0.wakers.lock().unwrap().push(cx.waker().clone());
        if self.0.is_cancelled() {
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

/// A CDP session: the browser-level one (`session_id() == None`) or one
/// scoped to a particular attached target.
#[derive(Clone)]
pub struct Session {
    id: Option<String>,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
    close_grace: Duration,
    is_root: bool,
    closed: Arc<AtomicBool>,
}

impl Session {
    pub(crate) fn root(dispatcher: Dispatcher, close_grace: Duration) -> Self {
        Session {
            id: None,
            dispatcher,
            cancel: CancellationToken::new(),
            close_grace,
            is_root: true,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// This session's CDP `sessionId`, or `None` for the browser target.
    pub fn session_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A new session scoped to `session_id`, cancelled whenever `self` (or
    /// any of its ancestors) is.
    pub fn new_child(&self, session_id: impl Into<String>) -> Session {
        Session {
            id: Some(session_id.into()),
            dispatcher: self.dispatcher.clone(),
            cancel: self.cancel.child(),
            close_grace: self.close_grace,
            is_root: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sends `cmd`, waiting indefinitely (subject only to cancellation) for
    /// its response.
    pub async fn send<C: Command>(&self, cmd: C) -> Result<C::Response> {
        self.send_with_deadline(cmd, None).await
    }

    /// Sends `cmd`, failing with [`CdpError::DeadlineExceeded`] if no
    /// response arrives within `deadline`.
    pub async fn send_with_deadline<C: Command>(
        &self,
        cmd: C,
        deadline: Option<Duration>,
    ) -> Result<C::Response> {
        if self.cancel.is_cancelled() {
            return Err(CdpError::Canceled);
        }
        let method = cmd.identifier();
        let params = serde_json::to_value(&cmd)?;
        let resp = self
            .dispatcher
            .send_and_wait(
                Cow::Owned(method.into_owned()),
                params,
                self.id.clone(),
                deadline,
                self.cancel.cancelled(),
            )
            .await?;

        if let Some(err) = resp.error {
            return Err(CdpError::Request(err));
        }
        let result = resp.result.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    /// Subscribes to events matching `filter` (an exact method name or a
    /// `Domain.*` wildcard), scoped to this session: the root session only
    /// sees session-less (browser-level) events, a child session only sees
    /// events tagged with its own `sessionId`. The subscription is torn down
    /// - its queue closed in the dispatcher - as soon as this session (or any
    /// ancestor) is canceled, even if nothing ever polls the returned stream
    /// again.
    pub fn subscribe_raw(&self, filter: impl Into<String>) -> impl Stream<Item = JsonEvent> {
        let mine = self.id.clone();
        let stream = self.dispatcher.subscribe(filter);
        spawn_unsubscribe_on_cancel(self.dispatcher.clone(), stream.id(), self.cancel.clone());
        stream.filter(move |ev| {
            let matches = ev.session_id() == mine.as_deref();
            async move { matches }
        })
    }

    /// Like [`Self::subscribe_raw`] but deserializes each event's `params`
    /// into a concrete generated event type, silently dropping any that
    /// fail to parse (a protocol/version mismatch, not a session fault).
    /// `filter` should select exactly the method(s) `E` is shaped for, e.g.
    /// `"Page.loadEventFired"`.
    pub fn subscribe<E: Event + Unpin>(&self, filter: impl Into<String>) -> impl Stream<Item = E> {
        self.subscribe_raw(filter)
            .filter_map(|ev| async move { serde_json::from_value(ev.params).ok() })
    }

    /// Cancels this session's subtree. Outstanding calls made through this
    /// session (or any descendant) fail with [`CdpError::Canceled`], and every
    /// subscription registered through it is unsubscribed as soon as its
    /// background teardown task observes the cancellation.
    ///
    /// For the root session this also force-closes the dispatcher: there is
    /// no narrower scope to cancel than "the whole browser connection", so
    /// canceling the root tears down the pending-call table, every live
    /// subscription, and (via the process-exit watcher racing
    /// `wait_closed()`) kills the child process if one is owned.
    pub fn cancel(&self) {
        self.cancel.cancel();
        if self.is_root {
            self.dispatcher.force_close();
        }
    }

    /// Idempotent close. For the root session: best-effort `Browser.close`,
    /// a grace period for in-flight calls to finish, then the dispatcher
    /// itself is torn down. For a child session: just cancels its subtree -
    /// the underlying target is left for the browser (or its parent) to
    /// dispose of.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if self.is_root {
            if let Err(err) = self
                .dispatcher
                .send_and_wait(
                    Cow::Borrowed("Browser.close"),
                    serde_json::json!({}),
                    None,
                    Some(self.close_grace),
                    futures::future::pending(),
                )
                .await
            {
                tracing::debug!(error = %err, "Browser.close did not complete cleanly");
            }
            self.dispatcher.close(self.close_grace).await;
        }

        self.cancel.cancel();
        Ok(())
    }

    /// Blocks until the dispatcher (and, transitively, the browser
    /// connection) has fully shut down.
    pub async fn wait(&self) {
        self.dispatcher.wait_closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.dispatcher.is_closed()
    }
}

/// Spawned once per subscription: waits for `cancel` to fire, then removes
/// the subscription from the dispatcher so its queue is closed even if the
/// caller dropped or stopped polling the `EventStream` long ago.
fn spawn_unsubscribe_on_cancel(dispatcher: Dispatcher, id: SubscriptionId, cancel: CancellationToken) {
    crate::process::spawn(async move {
        cancel.cancelled().await;
        dispatcher.unsubscribe_by_id(id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn cancelling_a_parent_cancels_its_children() {
        let root = CancellationToken::new();
        let child = root.child();
        let grandchild = child.child();

        assert!(!grandchild.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn cancelling_a_child_does_not_cancel_its_parent() {
        let root = CancellationToken::new();
        let child = root.child();

        child.cancel();
        assert!(!root.is_cancelled());
    }

    #[test]
    fn child_created_after_cancellation_starts_cancelled() {
        let root = CancellationToken::new();
        root.cancel();
        let child = root.child();
        assert!(child.is_cancelled());
    }

    #[test]
    fn cancelled_future_resolves_once_cancel_is_called() {
        let token = CancellationToken::new();
        let token2 = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            token2.cancel();
        });
        block_on(token.cancelled());
        assert!(token.is_cancelled());
    }
}
