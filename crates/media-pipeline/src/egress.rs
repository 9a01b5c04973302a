use gst::prelude::*;
use tokio::task;
use tracing::{error, info, warn};

use crate::elements::{build_appsrc, build_flvmux, build_rtmpsink};
use crate::error::PipelineError;

/// Output side of C1: two `appsrc` elements (video, audio) feeding a
/// streamable FLV mux into an RTMP sink. Live pacing — no sync-to-clock on
/// ingress, timestamps alone drive pacing, matching the source pipeline's
/// live contract.
pub struct RtmpEgress {
    pipeline: gst::Pipeline,
    video_src: gst_app::AppSrc,
    audio_src: gst_app::AppSrc,
}

impl RtmpEgress {
    pub fn start(url: &str, video_caps: &gst::Caps, audio_caps: &gst::Caps) -> Result<Self, PipelineError> {
        gst::init()?;

        let pipeline = gst::Pipeline::new();
        let video_src = build_appsrc("video-src", video_caps, true)?;
        let audio_src = build_appsrc("audio-src", audio_caps, true)?;
        let mux = build_flvmux("flv-mux")?;
        let sink = build_rtmpsink("rtmp-sink", url)?;

        pipeline
            .add_many([video_src.upcast_ref(), audio_src.upcast_ref(), &mux, &sink])
            .map_err(|e| PipelineError::StateChange(e.to_string()))?;

        video_src
            .link(&mux)
            .map_err(|e| PipelineError::StateChange(e.to_string()))?;
        audio_src
            .link(&mux)
            .map_err(|e| PipelineError::StateChange(e.to_string()))?;
        mux.link(&sink)
            .map_err(|e| PipelineError::StateChange(e.to_string()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| PipelineError::StateChange(e.to_string()))?;

        let bus = pipeline.bus().expect("pipeline without bus");
        let pipeline_for_bus = pipeline.clone();
        task::spawn_blocking(move || run_bus_loop(pipeline_for_bus, bus));

        info!(%url, "RTMP egress pipeline started");
        Ok(Self {
            pipeline,
            video_src,
            audio_src,
        })
    }

    pub fn push_video(&self, bytes: &[u8], pts_ns: u64) -> Result<(), PipelineError> {
        push(&self.video_src, bytes, pts_ns)
    }

    pub fn push_audio(&self, bytes: &[u8], pts_ns: u64) -> Result<(), PipelineError> {
        push(&self.audio_src, bytes, pts_ns)
    }

    pub fn stop(&self) {
        let _ = self.video_src.end_of_stream();
        let _ = self.audio_src.end_of_stream();
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn push(src: &gst_app::AppSrc, bytes: &[u8], pts_ns: u64) -> Result<(), PipelineError> {
    let mut buffer = gst::Buffer::from_slice(bytes.to_vec());
    {
        let buffer_mut = buffer.get_mut().expect("exclusive buffer ref");
        buffer_mut.set_pts(gst::ClockTime::from_nseconds(pts_ns));
    }
    src.push_buffer(buffer)
        .map(|_| ())
        .map_err(|e| PipelineError::StateChange(format!("{e:?}")))
}

fn run_bus_loop(pipeline: gst::Pipeline, bus: gst::Bus) {
    for msg in bus.iter_timed(gst::ClockTime::NONE) {
        use gst::MessageView;
        match msg.view() {
            MessageView::Eos(..) => {
                info!("egress pipeline reached EOS");
                break;
            }
            MessageView::Error(err) => {
                error!(
                    source = ?msg.src().map(|s| s.path_string()),
                    error = %err.error(),
                    debug = ?err.debug(),
                    "egress pipeline error"
                );
                break;
            }
            MessageView::Warning(warn_msg) => {
                warn!(error = %warn_msg.error(), "egress pipeline warning");
            }
            _ => {}
        }
    }
    let _ = pipeline.set_state(gst::State::Null);
}
