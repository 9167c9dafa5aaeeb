//! A scripted WebSocket game server for the integration tests.

#![allow(dead_code)]

use std::{
    net::TcpListener,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use botbattles::codec::{decode_frame, encode_frame};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing_subscriber::{fmt, layer::SubscriberExt, Registry};

/// Logs to the test output. Only the first call installs the subscriber.
pub fn init_logger() {
    let format = fmt::format()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_thread_names(true)
        .with_target(false);
    let registry = Registry::default().with(fmt::layer().event_format(format).with_test_writer());
    let _ = tracing::subscriber::set_global_default(registry);
}

/// What the server does with every connection it accepts.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Sent as a text frame before the states, like a session id on game creation.
    pub greeting: Option<String>,
    /// States sent right after the handshake, in order.
    pub states: Vec<Value>,
    /// Whether to close the connection after the states.
    pub close: bool,
}

pub struct StubServer {
    url: String,
    connections: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Value>>>,
}

impl StubServer {
    pub fn start(script: Script) -> StubServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));

        let (accepted, recorded) = (Arc::clone(&connections), Arc::clone(&received));
        thread::Builder::new()
            .name("stub-server".to_owned())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                    while let Ok((stream, _)) = listener.accept().await {
                        accepted.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(serve(stream, script.clone(), Arc::clone(&recorded)));
                    }
                });
            })
            .unwrap();

        StubServer {
            url,
            connections,
            received,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Every decoded frame received so far, from every connection.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }
}

async fn serve(stream: tokio::net::TcpStream, script: Script, received: Arc<Mutex<Vec<Value>>>) {
    let Ok(mut socket) = accept_async(stream).await else {
        return;
    };
    if let Some(greeting) = script.greeting {
        if socket.send(Message::Text(greeting)).await.is_err() {
            return;
        }
    }
    for state in &script.states {
        let frame = encode_frame(state).unwrap();
        if socket.send(Message::Binary(frame)).await.is_err() {
            return;
        }
    }
    if script.close {
        let _ = socket.close(None).await;
    }
    while let Some(Ok(message)) = socket.next().await {
        if let Message::Binary(frame) = message {
            if let Ok(value) = decode_frame(&frame) {
                received.lock().unwrap().push(value);
            }
        }
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// An address nothing listens on.
pub fn unused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);
    url
}
