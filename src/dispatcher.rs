//! The dispatcher: assigns ids, routes responses to waiters, publishes
//! events to subscribers, and handles connection teardown.
//!
//! This is the core state machine the rest of the crate is built around. A single
//! background task (`run_reader`) is the sole owner of `Transport::recv` -
//! that's what gives per-subscription FIFO delivery and avoids lock
//! contention on `pending` from more than one place. Writers and
//! subscribers reach the dispatcher through a cheap `Dispatcher` handle that
//! can be cloned across tasks; the actual write path serializes through a
//! dedicated async mutex around the transport so no other lock is held
//! while the write syscall blocks.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Waker;
use std::time::Duration;

use devtoxide_types::{CallId, Message, Method, Response};
use fnv::FnvHashMap;
use futures::channel::oneshot;
use futures::future::Either;
use futures::lock::Mutex as AsyncMutex;
use futures::{pin_mut, FutureExt};

use crate::codec;
use crate::error::CdpError;
use crate::subscribe::{self, EventStream, MethodFilter, Subscription};
use crate::transport::{Transport, TransportReader, TransportWriter};

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

type PendingSlot = oneshot::Sender<Result<Response, CdpError>>;

/// A tiny hand-rolled single-shot notifier used for `wait_closed`: there's
/// no broadcast primitive in `futures`, and pulling in a runtime-specific
/// one (`tokio::sync::Notify`) would defeat the dual-runtime support.
#[derive(Default)]
struct CloseNotify {
    wakers: Mutex<Vec<Waker>>,
}

impl CloseNotify {
    fn notify_all(&self) {
        let mut wakers = self.wakers.lock().unwrap();
        for waker in wakers.drain(..) {
            waker.wake();
        }
    }
}

struct Notified<'a> {
    notify: &'a CloseNotify,
    status: &'a AtomicU8,
}

impl std::future::Future for Notified<'_> {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        if self.status.load(Ordering::Acquire) == CLOSED {
            return std::task::Poll::Ready(());
        }
        self.notify.wakers.lock().unwrap().push(cx.waker().clone());
        // Re-check: close() may have flipped status and drained wakers
        // between our load above and registering this one.
        if self.status.load(Ordering::Acquire) == CLOSED {
            return std::task::Poll::Ready(());
        }
        std::task::Poll::Pending
    }
}

struct Shared {
    next_id: AtomicU64,
    pending: Mutex<FnvHashMap<CallId, PendingSlot>>,
    subs: Mutex<Vec<Subscription>>,
    status: AtomicU8,
    writer: AsyncMutex<Box<dyn TransportWriter>>,
    close_signal: Mutex<Option<oneshot::Sender<()>>>,
    closed_notify: CloseNotify,
    default_queue_cap: usize,
}

/// A cloneable handle to the dispatcher. Every session context holds one;
/// the dispatcher itself is kept alive by whichever handles are still live
/// plus the background reader task.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Splits `transport` into independent halves, spawns the reader task
    /// over the read half, and returns a handle holding the write half.
    pub fn spawn(transport: Box<dyn Transport>, default_queue_cap: usize) -> Self {
        let (writer, reader) = transport.split();
        let (close_tx, close_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(FnvHashMap::default()),
            subs: Mutex::new(Vec::new()),
            status: AtomicU8::new(RUNNING),
            writer: AsyncMutex::new(writer),
            close_signal: Mutex::new(Some(close_tx)),
            closed_notify: CloseNotify::default(),
            default_queue_cap,
        });

        let reader_shared = shared.clone();
        crate::process::spawn(run_reader(reader_shared, reader, close_rx));

        Dispatcher { shared }
    }

    fn status(&self) -> u8 {
        self.shared.status.load(Ordering::Acquire)
    }

    /// Assigns an id, writes the command, and returns a receiver that
    /// completes exactly once with the matching response or a terminal
    /// error. Corresponds to the "return-a-channel-of-one" send variant.
    pub async fn send_async(
        &self,
        method: Cow<'static, str>,
        params: serde_json::Value,
        session_id: Option<String>,
    ) -> Result<(CallId, oneshot::Receiver<Result<Response, CdpError>>), CdpError> {
        if self.status() != RUNNING {
            return Err(CdpError::Shutdown);
        }

        let id = CallId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(id, tx);

        let bytes = match codec::encode_command(id, method.clone(), params, session_id) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.shared.pending.lock().unwrap().remove(&id);
                return Err(err);
            }
        };

        tracing::debug!(%id, method = %method, "submitting command");
        let write_result = {
            let mut writer = self.shared.writer.lock().await;
            writer.write(bytes).await
        };

        if let Err(err) = write_result {
            self.shared.pending.lock().unwrap().remove(&id);
            self.handle_fatal_transport_error(&err).await;
            return Err(err);
        }

        Ok((id, rx))
    }

    /// `send_async`, then waits on the slot honoring `deadline` and
    /// `cancellation`. On cancellation the slot is abandoned, not removed:
    /// the reader still reaps the late response and silently discards it.
    pub async fn send_and_wait(
        &self,
        method: Cow<'static, str>,
        params: serde_json::Value,
        session_id: Option<String>,
        deadline: Option<Duration>,
        cancellation: impl std::future::Future<Output = ()>,
    ) -> Result<Response, CdpError> {
        let (_id, rx) = self.send_async(method, params, session_id).await?;

        let rx = rx.fuse();
        pin_mut!(rx);
        let cancellation = cancellation.fuse();
        pin_mut!(cancellation);

        let timeout = deadline.map(futures_timer::Delay::new);

        let raced = async {
            futures::select! {
                resp = rx => Some(resp),
                _ = cancellation => None,
            }
        };

        match timeout {
            None => match raced.await {
                Some(Ok(Ok(resp))) => Ok(resp),
                Some(Ok(Err(err))) => Err(err),
                Some(Err(_)) => Err(CdpError::Canceled),
                None => Err(CdpError::Canceled),
            },
            Some(delay) => {
                pin_mut!(delay);
                match futures::future::select(raced.boxed(), delay).await {
                    Either::Left((Some(Ok(Ok(resp))), _)) => Ok(resp),
                    Either::Left((Some(Ok(Err(err))), _)) => Err(err),
                    Either::Left((Some(Err(_)), _)) => Err(CdpError::Canceled),
                    Either::Left((None, _)) => Err(CdpError::Canceled),
                    Either::Right((_, _)) => Err(CdpError::DeadlineExceeded(
                        deadline.expect("deadline set because timeout is Some"),
                    )),
                }
            }
        }
    }

    /// Registers a new subscription and returns its consumer-facing stream.
    pub fn subscribe(&self, filter: impl Into<String>) -> EventStream {
        let (sub, stream) = subscribe::channel(MethodFilter::parse(filter), self.shared.default_queue_cap);
        if self.status() == CLOSED {
            sub.close();
        } else {
            self.shared.subs.lock().unwrap().push(sub);
        }
        stream
    }

    /// Removes a subscription by the id on its stream handle, closing it.
    pub fn unsubscribe(&self, stream: &EventStream) {
        self.unsubscribe_by_id(stream.id());
    }

    /// Same as [`Self::unsubscribe`], for callers that only kept the id
    /// (e.g. a background task that outlives the `EventStream` itself).
    pub fn unsubscribe_by_id(&self, id: subscribe::SubscriptionId) {
        let mut subs = self.shared.subs.lock().unwrap();
        if let Some(pos) = subs.iter().position(|s| s.id == id) {
            let sub = subs.remove(pos);
            sub.close();
        }
    }

    /// Graceful shutdown: `Running -> Draining`, drains in-flight responses
    /// for up to `grace`, then transitions to `Closed`. Idempotent: a second
    /// call (from any handle) just waits for the first to finish.
    pub async fn close(&self, grace: Duration) {
        if self
            .shared
            .status
            .compare_exchange(RUNNING, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.wait_closed().await;
            return;
        }

        let deadline = futures_timer::Delay::new(grace);
        pin_mut!(deadline);
        loop {
            if self.shared.pending.lock().unwrap().is_empty() {
                break;
            }
            let tick = futures_timer::Delay::new(Duration::from_millis(10));
            match futures::future::select(tick, &mut deadline).await {
                Either::Left(_) => continue,
                Either::Right(_) => break,
            }
        }

        self.finish_closing();
    }

    /// Entered when the reader observes transport EOF or a fatal read/write
    /// error: no grace period, since the peer is already gone.
    async fn handle_fatal_transport_error(&self, _err: &CdpError) {
        self.force_close();
    }

    /// Forces an immediate, ungraceful close - used when the browser process
    /// is observed to have exited outside of a normal `close()`.
    pub(crate) fn force_close(&self) {
        let prior = self.shared.status.swap(CLOSED, Ordering::AcqRel);
        if prior == CLOSED {
            return;
        }
        if let Some(tx) = self.shared.close_signal.lock().unwrap().take() {
            let _ = tx.send(());
        }
        self.fail_all_pending(CdpError::TransportClosed);
        self.close_all_subscriptions();
        self.shared.closed_notify.notify_all();
    }

    fn finish_closing(&self) {
        self.shared.status.store(CLOSED, Ordering::Release);
        if let Some(tx) = self.shared.close_signal.lock().unwrap().take() {
            let _ = tx.send(());
        }
        self.fail_all_pending(CdpError::Canceled);
        self.close_all_subscriptions();
        self.shared.closed_notify.notify_all();
    }

    fn fail_all_pending(&self, err: CdpError) {
        let pending: Vec<_> = self.shared.pending.lock().unwrap().drain().collect();
        for (_, slot) in pending {
            let _ = slot.send(Err(match &err {
                CdpError::TransportClosed => CdpError::TransportClosed,
                CdpError::Canceled => CdpError::Canceled,
                other => CdpError::Protocol(other.to_string()),
            }));
        }
    }

    fn close_all_subscriptions(&self) {
        let subs: Vec<_> = self.shared.subs.lock().unwrap().drain(..).collect();
        for sub in subs {
            sub.close();
        }
    }

    /// Blocks until the dispatcher has reached `Closed`.
    pub async fn wait_closed(&self) {
        Notified {
            notify: &self.shared.closed_notify,
            status: &self.shared.status,
        }
        .await
    }

    pub fn is_closed(&self) -> bool {
        self.status() == CLOSED
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.shared.pending.lock().unwrap().len()
    }
}

async fn run_reader(
    shared: Arc<Shared>,
    mut reader: Box<dyn TransportReader>,
    close_rx: oneshot::Receiver<()>,
) {
    let mut close_rx = close_rx.fuse();
    loop {
        // `reader` has no lock on it at all: this task is its only owner,
        // so a write through `shared.writer` never waits behind a `recv`
        // that's parked for the next frame from the browser.
        let recv_fut = reader.recv();

        futures::select! {
            frame = recv_fut.fuse() => {
                match frame {
                    Ok(Some(bytes)) => handle_frame(&shared, &bytes),
                    Ok(None) => {
                        tracing::info!("transport closed by peer");
                        break;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "transport read failed");
                        break;
                    }
                }
            }
            _ = close_rx => {
                tracing::debug!("reader task received shutdown signal");
                break;
            }
        }
    }

    force_close_from_reader(&shared);
}

fn force_close_from_reader(shared: &Arc<Shared>) {
    let prior = shared.status.swap(CLOSED, Ordering::AcqRel);
    if prior == CLOSED {
        return;
    }
    shared.close_signal.lock().unwrap().take();
    let pending: Vec<_> = shared.pending.lock().unwrap().drain().collect();
    for (_, slot) in pending {
        let _ = slot.send(Err(CdpError::TransportClosed));
    }
    let subs: Vec<_> = shared.subs.lock().unwrap().drain(..).collect();
    for sub in subs {
        sub.close();
    }
    shared.closed_notify.notify_all();
}

fn handle_frame(shared: &Arc<Shared>, bytes: &[u8]) {
    match codec::decode_frame(bytes) {
        Ok(Message::Response(resp)) => {
            let slot = shared.pending.lock().unwrap().remove(&resp.id);
            match slot {
                Some(slot) => {
                    let _ = slot.send(Ok(resp));
                }
                None => {
                    tracing::debug!(id = %resp.id, "discarding late or unknown response");
                }
            }
        }
        Ok(Message::Event(event)) => {
            let method = event.identifier();
            let subs = shared.subs.lock().unwrap();
            for sub in subs.iter() {
                if sub.filter.matches(&method) {
                    sub.push(event.clone());
                }
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "protocol error, discarding frame");
        }
    }
}
