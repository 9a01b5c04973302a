use std::time::Duration;

use bytes::Bytes;
use gst::prelude::*;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{error, info, warn};

use dubbing_segment::LevelSample;

use crate::elements::{
    build_aacparse, build_appsink, build_flvdemux, build_h264parse, build_level, build_queue,
    build_rtmpsrc, probe_stream_mime,
};
use crate::error::PipelineError;

const LEVEL_INTERVAL_NS: u64 = 100_000_000;

/// A single demuxed, timestamped media buffer pulled off the ingest
/// pipeline. PTS is monotonically non-decreasing within a given `kind`.
#[derive(Debug, Clone)]
pub struct RawBuffer {
    pub kind: BufferKind,
    pub bytes: Bytes,
    pub pts_ns: u64,
    pub duration_ns: u64,
    pub is_keyframe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Video,
    Audio,
}

const STARTUP_AUDIO_WINDOW: Duration = Duration::from_secs(2);

/// Pulls an RTMP source apart into timestamped H.264/AAC buffers. Dynamic
/// `flvdemux` pads are wired to per-kind parse/queue/appsink branches as
/// they appear; buffers surface on an mpsc channel rather than via direct
/// callbacks, since the GStreamer streaming threads must not block on
/// arbitrary async work.
pub struct RtmpIngest {
    pipeline: gst::Pipeline,
}

impl RtmpIngest {
    /// Builds and starts the ingest pipeline for `url`, returning the
    /// pipeline handle plus a channel of demuxed buffers. Resolves once an
    /// audio pad has appeared, or fails with `NoAudioTrack` if none shows up
    /// within the startup window.
    pub async fn start(
        url: &str,
    ) -> Result<
        (
            Self,
            mpsc::UnboundedReceiver<RawBuffer>,
            mpsc::UnboundedReceiver<LevelSample>,
        ),
        PipelineError,
    > {
        gst::init()?;

        let pipeline = gst::Pipeline::new();
        let src = build_rtmpsrc("rtmp-src", url)?;
        let demux = build_flvdemux("flv-demux")?;

        pipeline
            .add_many([&src, &demux])
            .map_err(|e| PipelineError::StateChange(e.to_string()))?;
        src.link(&demux)
            .map_err(|e| PipelineError::StateChange(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel::<RawBuffer>();
        let (level_tx, level_rx) = mpsc::unbounded_channel::<LevelSample>();
        let (audio_seen_tx, mut audio_seen_rx) = mpsc::unbounded_channel::<()>();

        let pipeline_weak = pipeline.downgrade();
        let tx_video = tx.clone();
        let tx_audio = tx;
        demux.connect_pad_added(move |_demux, pad| {
            let Some(pipeline) = pipeline_weak.upgrade() else {
                return;
            };
            let caps = match pad.current_caps() {
                Some(caps) => caps,
                None => return,
            };
            let Some(structure) = caps.structure(0) else {
                return;
            };
            let name = structure.name();

            if name.starts_with("video/") {
                if let Err(e) = validate_negotiated_codec(&caps, "avc") {
                    error!(error = %e, "rejecting video pad");
                    return;
                }
                if let Err(e) = wire_branch(
                    &pipeline,
                    pad,
                    BufferKind::Video,
                    build_h264parse("h264-parse").expect("h264parse"),
                    tx_video.clone(),
                ) {
                    error!(error = %e, "failed to wire video branch");
                }
            } else if name.starts_with("audio/") {
                if let Err(e) = validate_negotiated_codec(&caps, "mp4a") {
                    error!(error = %e, "rejecting audio pad");
                    return;
                }
                let _ = audio_seen_tx.send(());
                if let Err(e) = wire_audio_branch(&pipeline, pad, tx_audio.clone()) {
                    error!(error = %e, "failed to wire audio branch");
                }
            }
        });

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| PipelineError::StateChange(e.to_string()))?;

        let bus = pipeline.bus().expect("pipeline without bus");
        let pipeline_for_bus = pipeline.clone();
        task::spawn_blocking(move || run_bus_loop(pipeline_for_bus, bus, level_tx));

        match tokio::time::timeout(STARTUP_AUDIO_WINDOW, audio_seen_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(PipelineError::NoAudioTrack);
            }
        }

        info!(%url, "RTMP ingest pipeline started");
        Ok((Self { pipeline }, rx, level_rx))
    }

    pub fn stop(&self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Probes the negotiated mime codec on a newly-appeared demux pad and
/// rejects anything that isn't the expected H.264/AAC family, catching a
/// source that demuxes but carries a codec this pipeline can't parse
/// downstream before any element is built for it.
fn validate_negotiated_codec(caps: &gst::Caps, expect_contains: &str) -> Result<(), PipelineError> {
    match probe_stream_mime(caps) {
        Some(mime) if mime.to_ascii_lowercase().contains(expect_contains) => {
            info!(%mime, "negotiated codec accepted");
            Ok(())
        }
        Some(mime) => Err(PipelineError::UnsupportedCodec(mime)),
        None => {
            warn!("could not determine negotiated codec mime, accepting pad anyway");
            Ok(())
        }
    }
}

fn wire_branch(
    pipeline: &gst::Pipeline,
    demux_pad: &gst::Pad,
    kind: BufferKind,
    parse: gst::Element,
    tx: mpsc::UnboundedSender<RawBuffer>,
) -> Result<(), PipelineError> {
    let queue = build_queue(match kind {
        BufferKind::Video => "video-queue",
        BufferKind::Audio => "audio-queue",
    })?;
    let appsink = build_appsink(
        match kind {
            BufferKind::Video => "video-sink",
            BufferKind::Audio => "audio-sink",
        },
        None,
    )?;

    pipeline
        .add_many([&parse, &queue, appsink.upcast_ref()])
        .map_err(|e| PipelineError::StateChange(e.to_string()))?;
    parse
        .link(&queue)
        .map_err(|e| PipelineError::StateChange(e.to_string()))?;
    queue
        .link(&appsink)
        .map_err(|e| PipelineError::StateChange(e.to_string()))?;

    let sink_pad = parse.static_pad("sink").expect("parse sink pad");
    demux_pad
        .link(&sink_pad)
        .map_err(|e| PipelineError::StateChange(format!("{e:?}")))?;

    parse.sync_state_with_parent().ok();
    queue.sync_state_with_parent().ok();
    appsink.sync_state_with_parent().ok();

    appsink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                let pts_ns = buffer.pts().map(|c| c.nseconds()).unwrap_or(0);
                let duration_ns = buffer.duration().map(|c| c.nseconds()).unwrap_or(0);
                let is_keyframe = !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT);

                let raw = RawBuffer {
                    kind,
                    bytes: Bytes::copy_from_slice(&map),
                    pts_ns,
                    duration_ns,
                    is_keyframe,
                };
                if tx.send(raw).is_err() {
                    return Err(gst::FlowError::Flushing);
                }
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );

    Ok(())
}

/// Audio branch additionally inserts a `level` element ahead of the queue so
/// RMS measurements drive VAD segmentation independently of the raw AAC
/// buffers delivered to the appsink.
fn wire_audio_branch(
    pipeline: &gst::Pipeline,
    demux_pad: &gst::Pad,
    tx: mpsc::UnboundedSender<RawBuffer>,
) -> Result<(), PipelineError> {
    let parse = build_aacparse("aac-parse")?;
    let decode = gst::ElementFactory::make("decodebin")
        .name("audio-decode")
        .build()
        .map_err(|_| PipelineError::ElementBuild("decodebin".to_string()))?;
    let level = build_level("audio-level", LEVEL_INTERVAL_NS)?;
    let convert = gst::ElementFactory::make("audioconvert")
        .name("audio-convert")
        .build()
        .map_err(|_| PipelineError::ElementBuild("audioconvert".to_string()))?;
    let queue = build_queue("audio-queue")?;
    let appsink = build_appsink("audio-sink", None)?;

    pipeline
        .add_many([&parse, &decode, &level, &convert, &queue, appsink.upcast_ref()])
        .map_err(|e| PipelineError::StateChange(e.to_string()))?;
    parse
        .link(&decode)
        .map_err(|e| PipelineError::StateChange(e.to_string()))?;
    gst::Element::link_many([&level, &convert, &queue])
        .map_err(|e| PipelineError::StateChange(e.to_string()))?;
    queue
        .link(&appsink)
        .map_err(|e| PipelineError::StateChange(e.to_string()))?;

    let level_for_decode = level.clone();
    decode.connect_pad_added(move |_bin, pad| {
        let sink_pad = level_for_decode.static_pad("sink").expect("level sink pad");
        if !sink_pad.is_linked() {
            let _ = pad.link(&sink_pad);
        }
    });

    let sink_pad = parse.static_pad("sink").expect("parse sink pad");
    demux_pad
        .link(&sink_pad)
        .map_err(|e| PipelineError::StateChange(format!("{e:?}")))?;

    for el in [&parse, &decode, &level, &convert, &queue] {
        el.sync_state_with_parent().ok();
    }
    appsink.sync_state_with_parent().ok();

    appsink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                let pts_ns = buffer.pts().map(|c| c.nseconds()).unwrap_or(0);
                let duration_ns = buffer.duration().map(|c| c.nseconds()).unwrap_or(0);

                let raw = RawBuffer {
                    kind: BufferKind::Audio,
                    bytes: Bytes::copy_from_slice(&map),
                    pts_ns,
                    duration_ns,
                    is_keyframe: false,
                };
                if tx.send(raw).is_err() {
                    return Err(gst::FlowError::Flushing);
                }
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );

    Ok(())
}

fn run_bus_loop(pipeline: gst::Pipeline, bus: gst::Bus, level_tx: mpsc::UnboundedSender<LevelSample>) {
    for msg in bus.iter_timed(gst::ClockTime::NONE) {
        use gst::MessageView;
        match msg.view() {
            MessageView::Eos(..) => {
                info!("ingest pipeline reached EOS");
                break;
            }
            MessageView::Error(err) => {
                error!(
                    source = ?msg.src().map(|s| s.path_string()),
                    error = %err.error(),
                    debug = ?err.debug(),
                    "ingest pipeline error"
                );
                break;
            }
            MessageView::Warning(warn_msg) => {
                warn!(error = %warn_msg.error(), "ingest pipeline warning");
            }
            MessageView::Element(el) => {
                if let Some(sample) = parse_level_message(el.structure(), &msg) {
                    let _ = level_tx.send(sample);
                }
            }
            _ => {}
        }
    }
    let _ = pipeline.set_state(gst::State::Null);
}

/// The `level` element posts an "element" message named `level` with an
/// `rms` array (one entry per channel, in dB) and a running-time timestamp.
fn parse_level_message(structure: Option<&gst::StructureRef>, msg: &gst::Message) -> Option<LevelSample> {
    let structure = structure?;
    if structure.name() != "level" {
        return None;
    }
    let rms = structure.get::<gst::glib::collections::List>("rms").ok()?;
    let first = rms.iter().next()?;
    let rms_db: f64 = first.get().ok()?;
    let pts_ns = msg
        .structure()
        .and_then(|s| s.get::<u64>("running-time").ok())
        .unwrap_or(0);
    Some(LevelSample { rms_db, pts_ns })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_buffer_carries_kind_and_timing() {
        let buf = RawBuffer {
            kind: BufferKind::Video,
            bytes: Bytes::from_static(b"nal"),
            pts_ns: 1_000,
            duration_ns: 100,
            is_keyframe: true,
        };
        assert_eq!(buf.kind, BufferKind::Video);
        assert!(buf.is_keyframe);
    }
}
