//! WebSocket transport: one text frame per message, framing delegated to
//! `async-tungstenite`.

use async_tungstenite::tungstenite::Message as WsMessage;
use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};

use crate::error::CdpError;
use crate::transport::{InboundFrame, Transport, TransportReader, TransportWriter};

cfg_if::cfg_if! {
    if #[cfg(feature = "async-std-runtime")] {
        type WsStream = async_tungstenite::WebSocketStream<async_tungstenite::async_std::ConnectStream>;

        async fn connect(url: &str) -> Result<WsStream, CdpError> {
            let (ws, _) = async_tungstenite::async_std::connect_async(url).await?;
            Ok(ws)
        }
    } else if #[cfg(feature = "tokio-runtime")] {
        type WsStream = async_tungstenite::WebSocketStream<
            async_tungstenite::tokio::ConnectStream,
        >;

        async fn connect(url: &str) -> Result<WsStream, CdpError> {
            let (ws, _) = async_tungstenite::tokio::connect_async(url).await?;
            Ok(ws)
        }
    }
}

pub struct WebSocketTransport {
    ws: WsStream,
}

impl WebSocketTransport {
    pub async fn connect(debug_ws_url: &str) -> Result<Self, CdpError> {
        let ws = connect(debug_ws_url).await?;
        Ok(Self { ws })
    }
}

impl Transport for WebSocketTransport {
    fn split(self: Box<Self>) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>) {
        let (sink, stream) = self.ws.split();
        (
            Box::new(WebSocketWriter {
                sink,
                closed: false,
            }),
            Box::new(WebSocketReader { stream }),
        )
    }
}

struct WebSocketWriter {
    sink: SplitSink<WsStream, WsMessage>,
    closed: bool,
}

impl TransportWriter for WebSocketWriter {
    fn write(&mut self, frame: Vec<u8>) -> BoxFuture<'_, Result<(), CdpError>> {
        async move {
            if self.closed {
                return Err(CdpError::TransportClosed);
            }
            let text = String::from_utf8(frame)
                .map_err(|e| CdpError::Protocol(format!("non-utf8 outbound frame: {e}")))?;
            match self.sink.send(WsMessage::Text(text)).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    self.closed = true;
                    tracing::warn!(error = %err, "websocket write failed, marking transport closed");
                    Err(CdpError::TransportClosed)
                }
            }
        }
        .boxed()
    }
}

struct WebSocketReader {
    stream: SplitStream<WsStream>,
}

impl TransportReader for WebSocketReader {
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<InboundFrame>, CdpError>> {
        async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => return Ok(Some(text.into_bytes())),
                    Some(Ok(WsMessage::Binary(bytes))) => return Ok(Some(bytes)),
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                    Some(Ok(WsMessage::Frame(_))) => continue,
                    Some(Err(err)) => return Err(CdpError::Ws(err)),
                }
            }
        }
        .boxed()
    }
}

/// Scans a line of the child's stderr for the debugger websocket URL, e.g.
/// `DevTools listening on ws://127.0.0.1:9222/devtools/browser/<uuid>`.
pub fn parse_debugger_url(line: &str) -> Option<String> {
    let ws = line.rsplit("listening on ").next()?.trim();
    if ws.starts_with("ws://") || ws.starts_with("wss://") {
        Some(ws.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_devtools_listening_line() {
        let line = "DevTools listening on ws://127.0.0.1:9222/devtools/browser/abcd-1234\n";
        assert_eq!(
            parse_debugger_url(line).as_deref(),
            Some("ws://127.0.0.1:9222/devtools/browser/abcd-1234")
        );
    }

    #[test]
    fn ignores_unrelated_stderr_lines() {
        assert_eq!(parse_debugger_url("[1234:5678:ERROR] some warning\n"), None);
    }
}
