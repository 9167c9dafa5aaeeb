//! The persistent duplex channel to the game server.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use thiserror::Error;
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        error::ProtocolError,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The connection to the host is closed, or was closed while an operation was in flight.
#[derive(Debug, Clone, Error)]
#[error("connection to host closed (code: {code:?}, reason: '{reason}')")]
pub struct ConnectionClosed {
    /// Close code sent by the peer, if any.
    pub code: Option<u16>,
    /// Close reason, empty when none was given.
    pub reason: String,
    /// Whether the closing handshake completed normally.
    pub clean: bool,
}

impl ConnectionClosed {
    fn from_frame(frame: Option<CloseFrame<'_>>) -> ConnectionClosed {
        match frame {
            Some(frame) => ConnectionClosed {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.into_owned(),
                clean: frame.code == CloseCode::Normal,
            },
            None => ConnectionClosed {
                code: None,
                reason: String::new(),
                clean: true,
            },
        }
    }

    fn abrupt(reason: impl Into<String>) -> ConnectionClosed {
        ConnectionClosed {
            code: None,
            reason: reason.into(),
            clean: false,
        }
    }
}

/// An open WebSocket to the game server.
///
/// Both halves are behind their own lock so a receive loop and senders can share the
/// connection; all of them run on the reactor thread.
pub struct Connection {
    host: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    open: AtomicBool,
}

impl Connection {
    /// Opens a WebSocket to `url`.
    pub async fn open(url: &str) -> anyhow::Result<Connection> {
        let (socket, response) = connect_async(url)
            .await
            .with_context(|| format!("could not connect to '{url}'"))?;
        trace!(status = %response.status(), "websocket handshake done");
        let (sink, stream) = socket.split();
        Ok(Connection {
            host: host_of(url).to_owned(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            open: AtomicBool::new(true),
        })
    }

    /// The `host[:port]` the connection was opened to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// False once either side closed the connection.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Sends one binary frame.
    ///
    /// Fails with [`ConnectionClosed`] when the connection is, or becomes, closed.
    pub async fn send_frame(&self, frame: Vec<u8>) -> anyhow::Result<()> {
        if !self.is_open() {
            return Err(ConnectionClosed::abrupt("connection already closed locally").into());
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(frame))
            .await
            .map_err(|error| self.classify(error))
    }

    /// Waits for the next data frame. Text frames are returned as their UTF-8 bytes.
    ///
    /// Fails with [`ConnectionClosed`] once the peer closes the connection.
    pub async fn recv_frame(&self) -> anyhow::Result<Vec<u8>> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Close(frame))) => {
                    self.mark_closed();
                    return Err(ConnectionClosed::from_frame(frame).into());
                }
                Some(Ok(_)) => continue,
                Some(Err(error)) => return Err(self.classify(error)),
                None => {
                    self.mark_closed();
                    return Err(ConnectionClosed::abrupt("stream ended").into());
                }
            }
        }
    }

    /// Closes the connection with the normal closure code.
    ///
    /// Errors of a connection that is already gone are ignored.
    pub async fn disconnect(&self) -> anyhow::Result<()> {
        self.mark_closed();
        tokio::task::yield_now().await;

        let mut sink = self.sink.lock().await;
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }));
        if let Err(error) = sink.send(close).await {
            debug!("close frame not sent: {error}");
        }
        tokio::task::yield_now().await;

        match sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {}
            Err(error) => return Err(error).context("could not close the websocket"),
        }
        tokio::task::yield_now().await;
        Ok(())
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn classify(&self, error: WsError) -> anyhow::Error {
        match error {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                self.mark_closed();
                ConnectionClosed {
                    code: None,
                    reason: error.to_string(),
                    clean: true,
                }
                .into()
            }
            WsError::Io(_) | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                self.mark_closed();
                ConnectionClosed::abrupt(error.to_string()).into()
            }
            other => anyhow::Error::new(other).context("websocket failure"),
        }
    }
}

/// The `host[:port]` part of a WebSocket URL.
fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split(['/', '?']).next().unwrap_or(rest)
}
