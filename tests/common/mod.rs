//! A mock [`devtoxide::transport::Transport`] for exercising the dispatcher
//! and session layers without spawning a real browser: the test drives both
//! ends by hand, reading frames the dispatcher wrote and pushing frames as
//! if they came from the browser.

use devtoxide::transport::{InboundFrame, Transport, TransportReader, TransportWriter};
use devtoxide::CdpError;
use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};

pub struct MockHandle {
    pub outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    pub inbound: mpsc::UnboundedSender<InboundFrame>,
}

pub fn mock_transport() -> (Box<dyn Transport>, MockHandle) {
    let (out_tx, out_rx) = mpsc::unbounded();
    let (in_tx, in_rx) = mpsc::unbounded();
    (
        Box::new(MockTransport {
            out_tx,
            in_rx: Some(in_rx),
        }),
        MockHandle {
            outbound: out_rx,
            inbound: in_tx,
        },
    )
}

struct MockTransport {
    out_tx: mpsc::UnboundedSender<Vec<u8>>,
    in_rx: Option<mpsc::UnboundedReceiver<InboundFrame>>,
}

impl Transport for MockTransport {
    fn split(mut self: Box<Self>) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>) {
        (
            Box::new(MockWriter {
                out_tx: self.out_tx.clone(),
            }),
            Box::new(MockReader {
                in_rx: self.in_rx.take().expect("split called once"),
            }),
        )
    }
}

struct MockWriter {
    out_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl TransportWriter for MockWriter {
    fn write(&mut self, frame: Vec<u8>) -> BoxFuture<'_, Result<(), CdpError>> {
        async move {
            self.out_tx
                .unbounded_send(frame)
                .map_err(|_| CdpError::TransportClosed)
        }
        .boxed()
    }
}

struct MockReader {
    in_rx: mpsc::UnboundedReceiver<InboundFrame>,
}

impl TransportReader for MockReader {
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<InboundFrame>, CdpError>> {
        async move { Ok(self.in_rx.next().await) }.boxed()
    }
}

/// A trivial test-only command: `Test.echo` round-trips an integer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Echo {
    pub value: i64,
}

impl devtoxide_types::Method for Echo {
    fn identifier(&self) -> std::borrow::Cow<'static, str> {
        "Test.echo".into()
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EchoResponse {
    pub value: i64,
}

impl devtoxide_types::Command for Echo {
    type Response = EchoResponse;
}

/// Reads the next outbound frame and returns its assigned id.
pub async fn read_call_id(outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> u64 {
    let bytes = outbound.next().await.expect("dispatcher should have written a frame");
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    value["id"].as_u64().unwrap()
}
