use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use av_sync::AvSyncManager;
use dubbing_segment::{MediaBuffer, Segment, VadSegmenter, VideoSegmenter};
use media_pipeline::{BufferKind, RawBuffer, RtmpEgress, RtmpIngest};
use sts_client::{
    SendOutcome, SessionConfig, SessionEvent, SessionState, SocketIoTransport, StreamConfigArgs,
    StsSession,
};

use crate::error::WorkerError;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle = 0,
    Connecting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Idle,
            1 => WorkerState::Connecting,
            2 => WorkerState::Running,
            3 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}

/// Owns one instance each of the media pipeline, segment builder, STS
/// session, and A/V sync manager for a single stream, and glues them
/// together per the wiring in the worker start sequence: ingest buffers
/// feed the segmenters; video emissions go straight to sync; audio
/// emissions go through the STS session and only reach sync once dubbed
/// (or once they fall back to the original payload).
pub struct WorkerRuntime {
    stream_id: String,
    config: crate::config::WorkerConfig,
    state: AtomicU8,
    cancel: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WorkerRuntime {
    pub fn new(config: crate::config::WorkerConfig) -> Self {
        Self {
            stream_id: config.stream_id.clone(),
            config,
            state: AtomicU8::new(WorkerState::Idle as u8),
            cancel: CancellationToken::new(),
            task: parking_lot::Mutex::new(None),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Runs the start sequence and spawns the steady-state run loop.
    /// Returns once the worker has reached `Running` (i.e. STS is ready and
    /// both pipelines are live), or fails after exhausting input retries.
    pub async fn start(self: &Arc<Self>) -> Result<(), WorkerError> {
        self.set_state(WorkerState::Connecting);

        let (ingest, raw_rx, level_rx) = self.connect_input_with_retries().await?;

        let transport = Arc::new(SocketIoTransport::new());
        let session = Arc::new(StsSession::new(
            transport,
            SessionConfig {
                url: self.config.sts_url.clone(),
                stream_config: StreamConfigArgs {
                    stream_id: self.config.stream_id.clone(),
                    worker_id: self.config.worker_id.clone(),
                    source_language: self.config.source_language.clone(),
                    target_language: self.config.target_language.clone(),
                },
                max_inflight: self.config.max_inflight,
                fragment_timeout: self.config.fragment_timeout,
                backpressure_wait: self.config.backpressure_wait,
                circuit_breaker: self.config.circuit_breaker.clone(),
                reconnection: self.config.reconnection.clone(),
            },
        ));
        if let Err(e) = session.start().await {
            ingest.stop();
            return Err(e.into());
        }

        let video_caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "byte-stream")
            .field("alignment", "au")
            .build();
        let audio_caps = gst::Caps::builder("audio/mpeg")
            .field("mpegversion", 4i32)
            .field("stream-format", "raw")
            .build();
        let egress = match RtmpEgress::start(&self.config.rtmp_output_url, &video_caps, &audio_caps) {
            Ok(egress) => egress,
            Err(e) => {
                ingest.stop();
                let _ = session.end().await;
                return Err(e.into());
            }
        };
        let egress = Arc::new(egress);

        self.set_state(WorkerState::Running);
        info!(stream_id = %self.stream_id, "worker running");

        let worker = self.clone();
        let handle = tokio::spawn(async move {
            worker
                .run_loop(ingest, raw_rx, level_rx, session, egress)
                .await;
        });
        *self.task.lock() = Some(handle);

        Ok(())
    }

    async fn connect_input_with_retries(
        &self,
    ) -> Result<
        (
            RtmpIngest,
            tokio::sync::mpsc::UnboundedReceiver<RawBuffer>,
            tokio::sync::mpsc::UnboundedReceiver<dubbing_segment::LevelSample>,
        ),
        WorkerError,
    > {
        let mut last_err = None;
        for (attempt, delay) in std::iter::once(None)
            .chain(self.config.input_retry_delays.iter().copied().map(Some))
            .enumerate()
        {
            if let Some(delay) = delay {
                warn!(stream_id = %self.stream_id, attempt, ?delay, "retrying input connect");
                tokio::time::sleep(delay).await;
            }
            match RtmpIngest::start(&self.config.rtmp_input_url).await {
                Ok(ok) => return Ok(ok),
                Err(e) => {
                    error!(stream_id = %self.stream_id, error = %e, "input connect failed");
                    last_err = Some(e);
                }
            }
        }
        Err(WorkerError::StartupFailed(
            last_err.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    async fn run_loop(
        self: Arc<Self>,
        ingest: RtmpIngest,
        mut raw_rx: tokio::sync::mpsc::UnboundedReceiver<RawBuffer>,
        mut level_rx: tokio::sync::mpsc::UnboundedReceiver<dubbing_segment::LevelSample>,
        session: Arc<StsSession<SocketIoTransport>>,
        egress: Arc<RtmpEgress>,
    ) {
        let mut video_seg = VideoSegmenter::new(&self.stream_id, self.config.video_segmenter.clone());
        let mut vad_seg = VadSegmenter::new(&self.stream_id, self.config.vad_segmenter.clone());
        let mut sync = AvSyncManager::new(self.config.av_sync.clone());

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                raw = raw_rx.recv() => {
                    let Some(raw) = raw else {
                        if let Some(segment) = video_seg.flush() {
                            if let Some(pair) = sync.push_video(segment) {
                                push_pair(&egress, &pair.video, &pair.audio);
                            }
                        }
                        if let Some(segment) = vad_seg.flush() {
                            self.dispatch_audio_segment(segment, &session, &mut sync, &egress).await;
                        }
                        break;
                    };
                    self.handle_raw_buffer(raw, &mut video_seg, &mut vad_seg, &session, &mut sync, &egress).await;
                }
                Some(sample) = level_rx.recv() => {
                    if let Some(segment) = vad_seg.push_level_sample(sample) {
                        self.dispatch_audio_segment(segment, &session, &mut sync, &egress).await;
                    }
                }
                event = session.next_event() => {
                    self.handle_session_event(event, &mut sync, &egress).await;
                }
            }
        }

        ingest.stop();
        egress.stop();
        let _ = session.end().await;
        self.set_state(WorkerState::Stopped);
        info!(stream_id = %self.stream_id, "worker stopped");
    }

    async fn handle_raw_buffer(
        &self,
        raw: RawBuffer,
        video_seg: &mut VideoSegmenter,
        vad_seg: &mut VadSegmenter,
        session: &Arc<StsSession<SocketIoTransport>>,
        sync: &mut AvSyncManager,
        egress: &Arc<RtmpEgress>,
    ) {
        match raw.kind {
            BufferKind::Video => {
                let buf = MediaBuffer::new(raw.bytes, raw.pts_ns, raw.duration_ns, raw.is_keyframe);
                if let Some(segment) = video_seg.push(buf) {
                    if let Some(pair) = sync.push_video(segment) {
                        push_pair(egress, &pair.video, &pair.audio);
                    }
                }
            }
            BufferKind::Audio => {
                let buf = MediaBuffer::new(raw.bytes, raw.pts_ns, raw.duration_ns, false);
                if let Some(segment) = vad_seg.push_audio_buffer(buf) {
                    self.dispatch_audio_segment(segment, session, sync, egress).await;
                }
            }
        }
    }

    async fn dispatch_audio_segment(
        &self,
        segment: Segment,
        session: &Arc<StsSession<SocketIoTransport>>,
        sync: &mut AvSyncManager,
        egress: &Arc<RtmpEgress>,
    ) {
        match session.send_fragment(segment.clone()).await {
            SendOutcome::Sent { .. } => {}
            SendOutcome::FellBackToOriginal | SendOutcome::Rejected(_) => {
                if let Some(pair) = sync.push_audio(segment) {
                    push_pair(egress, &pair.video, &pair.audio);
                }
            }
        }
    }

    async fn handle_session_event(
        &self,
        event: SessionEvent,
        sync: &mut AvSyncManager,
        egress: &Arc<RtmpEgress>,
    ) {
        match event {
            SessionEvent::FragmentProcessed {
                mut segment,
                dubbed_audio_base64,
                ..
            } => {
                if let Some(b64) = dubbed_audio_base64 {
                    if let Ok(bytes) =
                        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64)
                    {
                        segment.set_dubbed(Bytes::from(bytes));
                    }
                }
                if let Some(pair) = sync.push_audio(segment) {
                    push_pair(egress, &pair.video, &pair.audio);
                }
            }
            SessionEvent::FragmentTimedOut { segment, .. } => {
                if let Some(pair) = sync.push_audio(segment) {
                    push_pair(egress, &pair.video, &pair.audio);
                }
            }
            SessionEvent::Disconnected => {
                warn!(stream_id = %self.stream_id, "STS disconnected, backing off without blocking the pipeline");
            }
            SessionEvent::Completed | SessionEvent::Ignored => {}
        }
    }

    /// Idempotent stop: emits `stream:end`, waits up to `stop_grace_period`
    /// for in-flight fragments to drain, then tears down pipelines in
    /// reverse order.
    pub async fn stop(&self) {
        if self.state() == WorkerState::Stopped || self.state() == WorkerState::Stopping {
            return;
        }
        self.set_state(WorkerState::Stopping);
        self.cancel.cancel();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(self.config.stop_grace_period, handle).await;
        }
        self.set_state(WorkerState::Stopped);
    }
}

fn push_pair(egress: &Arc<RtmpEgress>, video: &Segment, audio: &Segment) {
    if let Err(e) = egress.push_video(video.output_payload(), video.t0_ns) {
        error!(error = %e, "failed to push video to egress");
    }
    if let Err(e) = egress.push_audio(audio.output_payload(), audio.t0_ns) {
        error!(error = %e, "failed to push audio to egress");
    }
}
