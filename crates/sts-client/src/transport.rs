use async_trait::async_trait;
use serde_json::Value;

use crate::error::StsError;

/// Events surfaced by a transport, decoupled from the underlying Socket.IO
/// wire representation so the session state machine can be driven by a fake
/// transport in tests.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    StreamReady(Value),
    FragmentAck(Value),
    FragmentProcessed(Value),
    Backpressure(Value),
    StreamComplete(Value),
    Error(Value),
    Disconnected,
}

/// Abstracts the wire connection to the STS service. The production
/// implementation wraps `rust_socketio`; tests drive the session logic
/// against an in-memory fake instead of a live socket.
#[async_trait]
pub trait StsTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(), StsError>;
    async fn disconnect(&self) -> Result<(), StsError>;
    async fn emit(&self, event: &str, payload: Value) -> Result<(), StsError>;
    /// Blocks until the transport has an event to deliver.
    async fn recv(&self) -> Option<InboundEvent>;
}

/// `rust_socketio`-backed transport. Connection setup registers handlers
/// that forward every named STS event onto an internal channel so `recv`
/// can present a uniform pull-based interface regardless of the underlying
/// callback-driven client.
pub struct SocketIoTransport {
    inner: tokio::sync::Mutex<Option<rust_socketio::asynchronous::Client>>,
    events_tx: tokio::sync::mpsc::UnboundedSender<InboundEvent>,
    events_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<InboundEvent>>,
}

impl SocketIoTransport {
    pub fn new() -> Self {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            inner: tokio::sync::Mutex::new(None),
            events_tx: tx,
            events_rx: tokio::sync::Mutex::new(rx),
        }
    }

    fn forward(tx: tokio::sync::mpsc::UnboundedSender<InboundEvent>, ctor: fn(Value) -> InboundEvent) -> rust_socketio::asynchronous::Callback {
        Box::new(move |payload, _client| {
            let tx = tx.clone();
            Box::pin(async move {
                let value = match payload {
                    rust_socketio::Payload::Text(mut v) => v.pop().unwrap_or(Value::Null),
                    rust_socketio::Payload::String(s) => {
                        serde_json::from_str(&s).unwrap_or(Value::Null)
                    }
                    _ => Value::Null,
                };
                let _ = tx.send(ctor(value));
            })
        })
    }
}

impl Default for SocketIoTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StsTransport for SocketIoTransport {
    async fn connect(&self, url: &str) -> Result<(), StsError> {
        let tx = self.events_tx.clone();
        let client = rust_socketio::asynchronous::ClientBuilder::new(url)
            .on("stream:ready", Self::forward(tx.clone(), InboundEvent::StreamReady))
            .on("fragment:ack", Self::forward(tx.clone(), InboundEvent::FragmentAck))
            .on(
                "fragment:processed",
                Self::forward(tx.clone(), InboundEvent::FragmentProcessed),
            )
            .on("backpressure", Self::forward(tx.clone(), InboundEvent::Backpressure))
            .on(
                "stream:complete",
                Self::forward(tx.clone(), InboundEvent::StreamComplete),
            )
            .on("error", Self::forward(tx.clone(), InboundEvent::Error))
            .on("close", {
                let tx = tx.clone();
                Box::new(move |_payload, _client| {
                    let tx = tx.clone();
                    Box::pin(async move {
                        let _ = tx.send(InboundEvent::Disconnected);
                    })
                })
            })
            .connect()
            .await
            .map_err(|e| StsError::Transport(e.to_string()))?;

        *self.inner.lock().await = Some(client);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StsError> {
        if let Some(client) = self.inner.lock().await.take() {
            client
                .disconnect()
                .await
                .map_err(|e| StsError::Transport(e.to_string()))?;
        }
        Ok(())
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), StsError> {
        let guard = self.inner.lock().await;
        let client = guard.as_ref().ok_or(StsError::NotConnected)?;
        client
            .emit(event, payload)
            .await
            .map_err(|e| StsError::Transport(e.to_string()))
    }

    async fn recv(&self) -> Option<InboundEvent> {
        self.events_rx.lock().await.recv().await
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex};

    /// In-memory transport used by session state-machine tests: `emit` is
    /// recorded rather than sent over a socket, and `push_event` drives
    /// `recv` from the test side.
    pub struct FakeTransport {
        pub emitted: Arc<Mutex<Vec<(String, Value)>>>,
        events_tx: mpsc::UnboundedSender<InboundEvent>,
        events_rx: Mutex<mpsc::UnboundedReceiver<InboundEvent>>,
        pub connected: std::sync::atomic::AtomicBool,
    }

    impl FakeTransport {
        pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<InboundEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let transport = Arc::new(Self {
                emitted: Arc::new(Mutex::new(Vec::new())),
                events_tx: tx.clone(),
                events_rx: Mutex::new(rx),
                connected: std::sync::atomic::AtomicBool::new(false),
            });
            (transport, tx)
        }
    }

    #[async_trait]
    impl StsTransport for FakeTransport {
        async fn connect(&self, _url: &str) -> Result<(), StsError> {
            self.connected
                .store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), StsError> {
            self.connected
                .store(false, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        async fn emit(&self, event: &str, payload: Value) -> Result<(), StsError> {
            if !self.connected.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StsError::NotConnected);
            }
            self.emitted
                .lock()
                .await
                .push((event.to_string(), payload));
            Ok(())
        }

        async fn recv(&self) -> Option<InboundEvent> {
            self.events_rx.lock().await.recv().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeTransport;
    use super::*;

    #[tokio::test]
    async fn emit_before_connect_fails() {
        let (transport, _tx) = FakeTransport::new();
        let err = transport.emit("stream:init", Value::Null).await;
        assert!(matches!(err, Err(StsError::NotConnected)));
    }

    #[tokio::test]
    async fn emit_after_connect_is_recorded() {
        let (transport, _tx) = FakeTransport::new();
        transport.connect("ws://fake").await.unwrap();
        transport
            .emit("stream:init", serde_json::json!({"a": 1}))
            .await
            .unwrap();
        let emitted = transport.emitted.lock().await;
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, "stream:init");
    }

    #[tokio::test]
    async fn recv_yields_pushed_events() {
        let (transport, tx) = FakeTransport::new();
        tx.send(InboundEvent::StreamReady(Value::Null)).unwrap();
        let event = transport.recv().await.unwrap();
        assert!(matches!(event, InboundEvent::StreamReady(_)));
    }
}
