//! Subscriptions: a caller's registration of interest in events whose method
//! matches a filter, backed by a bounded, drop-oldest delivery queue.
//!
//! An unbounded event source paired with a slow consumer would otherwise grow
//! without limit, so the queue here has a fixed capacity and drops the oldest
//! undelivered item once full, counting every drop.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use devtoxide_types::JsonEvent;
use futures::Stream;

/// Either an exact method name or a `Domain.*` wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    Exact(String),
    DomainWildcard(String),
}

impl MethodFilter {
    pub fn parse(filter: impl Into<String>) -> Self {
        let filter = filter.into();
        match filter.strip_suffix(".*") {
            Some(domain) => MethodFilter::DomainWildcard(domain.to_string()),
            None => MethodFilter::Exact(filter),
        }
    }

    pub fn matches(&self, method: &str) -> bool {
        match self {
            MethodFilter::Exact(exact) => exact == method,
            MethodFilter::DomainWildcard(domain) => method
                .split_once('.')
                .map(|(d, _)| d == domain)
                .unwrap_or(false),
        }
    }
}

struct Inner {
    queue: VecDeque<JsonEvent>,
    cap: usize,
    dropped: u64,
    closed: bool,
    waker: Option<Waker>,
}

/// A unique, process-local identifier for a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_subscription_id() -> SubscriptionId {
    SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// The dispatcher-side handle: used only to push events and to close the
/// queue. Cheap to clone; all clones share the same bounded buffer.
#[derive(Clone)]
pub(crate) struct Subscription {
    pub id: SubscriptionId,
    pub filter: MethodFilter,
    inner: Arc<Mutex<Inner>>,
}

impl Subscription {
    /// The number of events dropped so far because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }

    /// Enqueues an event, dropping the oldest queued item if at capacity.
    pub fn push(&self, event: JsonEvent) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        if inner.queue.len() >= inner.cap {
            inner.queue.pop_front();
            inner.dropped += 1;
        }
        inner.queue.push_back(event);
        if let Some(waker) = inner.waker.take() {
            waker.wake();
        }
    }

    /// Closes the queue: the stream yields any buffered items, then ends.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        if let Some(waker) = inner.waker.take() {
            waker.wake();
        }
    }
}

/// The consumer-side handle returned from `subscribe`.
pub struct EventStream {
    id: SubscriptionId,
    inner: Arc<Mutex<Inner>>,
}

impl EventStream {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The number of events dropped so far because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }
}

/// Creates a bound subscription/stream pair for `filter`, with a queue that
/// holds at most `cap` undelivered events.
pub(crate) fn channel(filter: MethodFilter, cap: usize) -> (Subscription, EventStream) {
    let id = next_subscription_id();
    let inner = Arc::new(Mutex::new(Inner {
        queue: VecDeque::with_capacity(cap.min(256)),
        cap: cap.max(1),
        dropped: 0,
        closed: false,
        waker: None,
    }));
    (
        Subscription {
            id,
            filter,
            inner: inner.clone(),
        },
        EventStream { id, inner },
    )
}

impl Stream for EventStream {
    type Item = JsonEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(event) = inner.queue.pop_front() {
            return Poll::Ready(Some(event));
        }
        if inner.closed {
            return Poll::Ready(None);
        }
        inner.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::StreamExt;

    fn event(method: &str, ts: f64) -> JsonEvent {
        serde_json::from_value(serde_json::json!({
            "method": method,
            "params": {"timestamp": ts},
        }))
        .unwrap()
    }

    #[test]
    fn wildcard_matches_domain_prefix() {
        let f = MethodFilter::parse("Page.*");
        assert!(f.matches("Page.loadEventFired"));
        assert!(!f.matches("Network.loadEventFired"));
    }

    #[test]
    fn exact_filter_requires_exact_match() {
        let f = MethodFilter::parse("Page.loadEventFired");
        assert!(f.matches("Page.loadEventFired"));
        assert!(!f.matches("Page.frameNavigated"));
    }

    #[test]
    fn fifo_order_is_preserved() {
        let (sub, mut stream) = channel(MethodFilter::parse("Page.*"), 64);
        sub.push(event("Page.a", 1.0));
        sub.push(event("Page.b", 2.0));
        sub.push(event("Page.c", 3.0));

        let a = block_on(stream.next()).unwrap();
        let b = block_on(stream.next()).unwrap();
        let c = block_on(stream.next()).unwrap();
        assert_eq!(a.params["timestamp"], 1.0);
        assert_eq!(b.params["timestamp"], 2.0);
        assert_eq!(c.params["timestamp"], 3.0);
    }

    #[test]
    fn backpressure_drops_oldest_and_counts() {
        let (sub, mut stream) = channel(MethodFilter::parse("Page.*"), 2);
        for i in 0..5 {
            sub.push(event("Page.tick", i as f64));
        }
        assert_eq!(sub.dropped_count(), 3);

        let first = block_on(stream.next()).unwrap();
        let second = block_on(stream.next()).unwrap();
        assert_eq!(first.params["timestamp"], 3.0);
        assert_eq!(second.params["timestamp"], 4.0);
        assert_eq!(stream.dropped_count(), 3);
    }

    #[test]
    fn closing_ends_the_stream_after_draining() {
        let (sub, mut stream) = channel(MethodFilter::parse("Page.*"), 8);
        sub.push(event("Page.a", 1.0));
        sub.close();

        let first = block_on(stream.next());
        assert!(first.is_some());
        let second = block_on(stream.next());
        assert!(second.is_none());
    }
}
