use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use dubbing_segment::Segment;

use crate::backpressure::BackpressureHandler;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::StsError;
use crate::fragment_tracker::{FragmentTracker, TimeoutEvent};
use crate::models::*;
use crate::reconnection::{ReconnectOutcome, ReconnectionConfig, ReconnectionManager};
use crate::transport::{InboundEvent, StsTransport};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing = 0,
    Active = 1,
    Paused = 2,
    Ending = 3,
    Completed = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Initializing,
            1 => SessionState::Active,
            2 => SessionState::Paused,
            3 => SessionState::Ending,
            _ => SessionState::Completed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub stream_config: StreamConfigArgs,
    pub max_inflight: usize,
    pub fragment_timeout: Duration,
    pub backpressure_wait: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
    pub reconnection: ReconnectionConfig,
}

#[derive(Debug, Clone)]
pub struct StreamConfigArgs {
    pub stream_id: String,
    pub worker_id: String,
    pub source_language: String,
    pub target_language: String,
}

/// Outcome of offering a segment to the STS session.
#[derive(Debug)]
pub enum SendOutcome {
    Sent { sequence_number: u64 },
    FellBackToOriginal,
    Rejected(StsError),
}

/// Socket.IO session lifecycle over a single stream's STS connection.
///
/// Composes the circuit breaker, fragment tracker, and backpressure handler
/// as an ordered gate ahead of every send: the breaker decides whether to
/// attempt STS at all, backpressure decides when, and the tracker enforces
/// the in-flight bound. A fragment that clears all three but never gets
/// acked or processed in time surfaces through `recv_timeout` for the caller
/// to fall back to the fragment's original (un-dubbed) payload.
pub struct StsSession<T: StsTransport> {
    transport: Arc<T>,
    config: SessionConfig,
    state: AtomicU8,
    tracker: FragmentTracker,
    timeout_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<TimeoutEvent>>,
    backpressure: BackpressureHandler,
    breaker: CircuitBreaker,
    reconnection: Arc<ReconnectionManager>,
    cancel: CancellationToken,
}

impl<T: StsTransport + 'static> StsSession<T> {
    pub fn new(transport: Arc<T>, config: SessionConfig) -> Self {
        let (tracker, timeout_rx) =
            FragmentTracker::new(config.max_inflight, config.fragment_timeout);
        let cancel = CancellationToken::new();
        let reconnection = Arc::new(ReconnectionManager::new(
            config.reconnection.clone(),
            cancel.clone(),
        ));
        Self {
            transport,
            config,
            state: AtomicU8::new(SessionState::Initializing as u8),
            tracker,
            timeout_rx: tokio::sync::Mutex::new(timeout_rx),
            backpressure: BackpressureHandler::new(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            reconnection,
            cancel,
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Connects and sends `stream:init`, blocking until `stream:ready`
    /// arrives or the connect attempt fails.
    pub async fn start(&self) -> Result<(), StsError> {
        self.transport.connect(&self.config.url).await?;
        let payload = json!({
            "stream_id": self.config.stream_config.stream_id,
            "worker_id": self.config.stream_config.worker_id,
            "source_language": self.config.stream_config.source_language,
            "target_language": self.config.stream_config.target_language,
            "max_inflight": self.config.max_inflight as u32,
            "timeout_ms": self.config.fragment_timeout.as_millis() as u64,
        });
        self.transport.emit("stream:init", payload).await?;

        match self.transport.recv().await {
            Some(InboundEvent::StreamReady(_)) => {
                self.set_state(SessionState::Active);
                info!(stream_id = %self.config.stream_config.stream_id, "STS session ready");
                Ok(())
            }
            Some(InboundEvent::Error(v)) => Err(StsError::Transport(v.to_string())),
            other => Err(StsError::Transport(format!(
                "unexpected response to stream:init: {other:?}"
            ))),
        }
    }

    /// Offers `segment` to STS, honoring the breaker, backpressure, and
    /// in-flight capacity in that order. Callers should republish the
    /// segment's original payload whenever this does not return `Sent`.
    pub async fn send_fragment(&self, segment: Segment) -> SendOutcome {
        if self.state() != SessionState::Active {
            return SendOutcome::FellBackToOriginal;
        }
        // Precedence: breaker -> tracker capacity -> backpressure gate. Each
        // stage is a fail-safe — failing any one means fallback, never
        // queueing the segment for later.
        if !self.breaker.should_send() {
            return SendOutcome::FellBackToOriginal;
        }
        if !self.tracker.has_capacity() {
            return SendOutcome::FellBackToOriginal;
        }
        if !self
            .backpressure
            .wait_and_delay(self.config.backpressure_wait)
            .await
        {
            return SendOutcome::FellBackToOriginal;
        }

        let fragment_id = segment.fragment_id;
        let stream_id = segment.stream_id.clone();
        let timestamp_ms = (segment.t0_ns / 1_000_000) as u64;
        let duration_ms = (segment.duration_ns / 1_000_000) as u64;
        let data_base64 = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            segment.payload.as_ref(),
        );

        let sequence_number = match self.tracker.track(segment) {
            Some(seq) => seq,
            None => return SendOutcome::FellBackToOriginal,
        };

        let payload = FragmentDataPayload {
            fragment_id,
            stream_id: stream_id.clone(),
            sequence_number,
            timestamp_ms,
            audio: AudioData {
                format: "aac".to_string(),
                sample_rate_hz: 48_000,
                channels: 1,
                duration_ms,
                data_base64,
            },
        };

        let value = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(e) => {
                self.tracker.complete(fragment_id);
                return SendOutcome::Rejected(StsError::Serde(e));
            }
        };

        match self.transport.emit("fragment:data", value).await {
            Ok(()) => SendOutcome::Sent { sequence_number },
            Err(e) => {
                self.tracker.complete(fragment_id);
                SendOutcome::Rejected(e)
            }
        }
    }

    /// Drains the next inbound transport event or fragment timeout,
    /// whichever arrives first. Intended to be polled in a loop by the
    /// owning worker.
    pub async fn next_event(&self) -> SessionEvent {
        let mut timeout_rx = self.timeout_rx.lock().await;
        tokio::select! {
            event = self.transport.recv() => self.handle_inbound(event).await,
            Some(TimeoutEvent::Fired { fragment_id, segment }) = timeout_rx.recv() => {
                warn!(%fragment_id, "fragment timed out awaiting STS processing");
                self.breaker.record_failure(ErrorCode::Timeout);
                SessionEvent::FragmentTimedOut { fragment_id, segment }
            }
        }
    }

    async fn handle_inbound(&self, event: Option<InboundEvent>) -> SessionEvent {
        match event {
            Some(InboundEvent::FragmentAck(v)) => {
                debug!(?v, "fragment ack");
                SessionEvent::Ignored
            }
            Some(InboundEvent::FragmentProcessed(v)) => {
                match serde_json::from_value::<FragmentProcessedPayload>(v) {
                    Ok(payload) => {
                        let fragment_id = payload.fragment_id;
                        let entry = self.tracker.complete(fragment_id);
                        match payload.status {
                            ProcessedStatus::Success | ProcessedStatus::Partial => {
                                self.breaker.record_success();
                            }
                            ProcessedStatus::Failed => {
                                let code = payload
                                    .error
                                    .as_ref()
                                    .map(|e| e.code)
                                    .unwrap_or(ErrorCode::ModelError);
                                self.breaker.record_failure(code);
                            }
                        }
                        match entry {
                            Some(entry) => SessionEvent::FragmentProcessed {
                                segment: entry.segment,
                                dubbed_audio_base64: payload.dubbed_audio_base64,
                                status: payload.status,
                            },
                            None => SessionEvent::Ignored,
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "malformed fragment:processed payload");
                        SessionEvent::Ignored
                    }
                }
            }
            Some(InboundEvent::Backpressure(v)) => {
                if let Ok(payload) = serde_json::from_value::<BackpressurePayload>(v) {
                    self.backpressure.handle(&payload);
                }
                SessionEvent::Ignored
            }
            Some(InboundEvent::StreamComplete(_)) => {
                self.set_state(SessionState::Completed);
                SessionEvent::Completed
            }
            Some(InboundEvent::Error(v)) => {
                error!(?v, "STS reported an error");
                SessionEvent::Ignored
            }
            Some(InboundEvent::StreamReady(_)) => SessionEvent::Ignored,
            Some(InboundEvent::Disconnected) | None => {
                self.set_state(SessionState::Paused);
                SessionEvent::Disconnected
            }
        }
    }

    /// Runs the reconnection manager until the transport reconnects and
    /// `stream:init` is re-accepted, or attempts are exhausted.
    pub async fn reconnect(&self) -> ReconnectOutcome {
        let outcome = self
            .reconnection
            .clone()
            .run(|| async {
                match self.start().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "STS reconnect attempt failed");
                        false
                    }
                }
            })
            .await;
        if outcome != ReconnectOutcome::Reconnected {
            self.set_state(SessionState::Ending);
        }
        outcome
    }

    /// Gracefully ends the session: emits `stream:end`, cancels any pending
    /// reconnect backoff, and disconnects the transport.
    pub async fn end(&self) -> Result<(), StsError> {
        self.set_state(SessionState::Ending);
        self.cancel.cancel();
        let fragment_id = Uuid::nil();
        let _ = fragment_id;
        self.transport
            .emit(
                "stream:end",
                json!({ "stream_id": self.config.stream_config.stream_id }),
            )
            .await
            .ok();
        self.tracker.clear();
        self.transport.disconnect().await?;
        self.set_state(SessionState::Completed);
        Ok(())
    }
}

#[derive(Debug)]
pub enum SessionEvent {
    FragmentProcessed {
        segment: Segment,
        dubbed_audio_base64: Option<String>,
        status: ProcessedStatus,
    },
    FragmentTimedOut {
        fragment_id: Uuid,
        segment: Segment,
    },
    Disconnected,
    Completed,
    Ignored,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use bytes::Bytes;
    use dubbing_segment::MediaKind;

    fn config() -> SessionConfig {
        SessionConfig {
            url: "ws://fake".to_string(),
            stream_config: StreamConfigArgs {
                stream_id: "s1".to_string(),
                worker_id: "w1".to_string(),
                source_language: "en".to_string(),
                target_language: "es".to_string(),
            },
            max_inflight: 3,
            fragment_timeout: Duration::from_secs(60),
            backpressure_wait: Duration::from_millis(200),
            circuit_breaker: CircuitBreakerConfig::default(),
            reconnection: ReconnectionConfig::default(),
        }
    }

    fn segment() -> Segment {
        Segment::new(
            "s1",
            MediaKind::Audio,
            0,
            0,
            1_000_000_000,
            Bytes::from_static(b"aac"),
        )
    }

    #[tokio::test]
    async fn start_transitions_to_active_on_stream_ready() {
        let (transport, tx) = FakeTransport::new();
        tx.send(InboundEvent::StreamReady(json!({}))).unwrap();
        let session = StsSession::new(transport, config());
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn send_fragment_falls_back_when_not_active() {
        let (transport, _tx) = FakeTransport::new();
        let session = StsSession::new(transport, config());
        let outcome = session.send_fragment(segment()).await;
        assert!(matches!(outcome, SendOutcome::FellBackToOriginal));
    }

    #[tokio::test]
    async fn send_fragment_tracks_and_emits_when_active() {
        let (transport, tx) = FakeTransport::new();
        tx.send(InboundEvent::StreamReady(json!({}))).unwrap();
        let session = StsSession::new(transport.clone(), config());
        session.start().await.unwrap();

        let outcome = session.send_fragment(segment()).await;
        let SendOutcome::Sent { sequence_number } = outcome else {
            panic!("expected Sent, got {outcome:?}");
        };
        assert_eq!(session.tracker.inflight_count(), 1);
        let emitted = transport.emitted.lock().await;
        let (_, payload) = emitted
            .iter()
            .find(|(event, _)| event == "fragment:data")
            .expect("fragment:data was emitted");
        assert_eq!(payload["sequence_number"], json!(sequence_number));
    }

    #[tokio::test]
    async fn send_fragment_assigns_increasing_sequence_numbers() {
        let (transport, tx) = FakeTransport::new();
        tx.send(InboundEvent::StreamReady(json!({}))).unwrap();
        let session = StsSession::new(transport.clone(), config());
        session.start().await.unwrap();

        let first = session.send_fragment(segment()).await;
        let second = session.send_fragment(segment()).await;
        let (SendOutcome::Sent { sequence_number: seq1 }, SendOutcome::Sent { sequence_number: seq2 }) =
            (first, second)
        else {
            panic!("expected both sends to succeed");
        };
        assert!(seq2 > seq1);

        let emitted = transport.emitted.lock().await;
        let payloads: Vec<_> = emitted
            .iter()
            .filter(|(event, _)| event == "fragment:data")
            .map(|(_, payload)| payload["sequence_number"].clone())
            .collect();
        assert_eq!(payloads, vec![json!(seq1), json!(seq2)]);
    }

    #[tokio::test]
    async fn fragment_processed_completes_tracking_and_records_success() {
        let (transport, tx) = FakeTransport::new();
        tx.send(InboundEvent::StreamReady(json!({}))).unwrap();
        let session = StsSession::new(transport, config());
        session.start().await.unwrap();
        let seg = segment();
        let fragment_id = seg.fragment_id;
        let outcome = session.send_fragment(seg).await;
        let SendOutcome::Sent { sequence_number } = outcome else {
            panic!("expected Sent, got {outcome:?}");
        };

        let processed = json!({
            "fragment_id": fragment_id,
            "sequence_number": sequence_number,
            "status": "success",
            "dubbed_audio_base64": "ZHViYmVk",
            "error": null,
            "processing_time_ms": 120,
            "stage_timings": null,
        });
        let event = session
            .handle_inbound(Some(InboundEvent::FragmentProcessed(processed)))
            .await;
        assert!(matches!(event, SessionEvent::FragmentProcessed { .. }));
        assert_eq!(session.tracker.inflight_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_event_transitions_to_paused() {
        let (transport, _tx) = FakeTransport::new();
        let session = StsSession::new(transport, config());
        let event = session.handle_inbound(None).await;
        assert!(matches!(event, SessionEvent::Disconnected));
        assert_eq!(session.state(), SessionState::Paused);
    }
}
