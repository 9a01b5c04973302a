use gst::prelude::*;

use crate::error::PipelineError;

fn ensure_gst_initialized() -> Result<(), PipelineError> {
    if !gst::INITIALIZED.load(std::sync::atomic::Ordering::SeqCst) {
        gst::init()?;
    }
    Ok(())
}

fn make(factory: &str, name: &str) -> Result<gst::Element, PipelineError> {
    gst::ElementFactory::make(factory)
        .name(name)
        .build()
        .map_err(|_| PipelineError::ElementBuild(factory.to_string()))
}

pub fn build_rtmpsrc(name: &str, url: &str) -> Result<gst::Element, PipelineError> {
    ensure_gst_initialized()?;
    gst::ElementFactory::make("rtmpsrc")
        .name(name)
        .property("location", url)
        .build()
        .map_err(|_| PipelineError::ElementBuild("rtmpsrc".to_string()))
}

pub fn build_flvdemux(name: &str) -> Result<gst::Element, PipelineError> {
    ensure_gst_initialized()?;
    make("flvdemux", name)
}

pub fn build_h264parse(name: &str) -> Result<gst::Element, PipelineError> {
    ensure_gst_initialized()?;
    make("h264parse", name)
}

pub fn build_aacparse(name: &str) -> Result<gst::Element, PipelineError> {
    ensure_gst_initialized()?;
    make("aacparse", name)
}

pub fn build_queue(name: &str) -> Result<gst::Element, PipelineError> {
    ensure_gst_initialized()?;
    make("queue", name)
}

pub fn build_appsink(name: &str, caps: Option<&gst::Caps>) -> Result<gst_app::AppSink, PipelineError> {
    ensure_gst_initialized()?;
    let mut builder = gst_app::AppSink::builder().name(name).sync(false);
    if let Some(caps) = caps {
        builder = builder.caps(caps);
    }
    Ok(builder.build())
}

pub fn build_appsrc(name: &str, caps: &gst::Caps, is_live: bool) -> Result<gst_app::AppSrc, PipelineError> {
    ensure_gst_initialized()?;
    Ok(gst_app::AppSrc::builder()
        .name(name)
        .caps(caps)
        .format(gst::Format::Time)
        .is_live(is_live)
        .do_timestamp(false)
        .build())
}

pub fn build_flvmux(name: &str) -> Result<gst::Element, PipelineError> {
    ensure_gst_initialized()?;
    make("flvmux", name)
        .map(|e| {
            e.set_property("streamable", true);
            e
        })
}

pub fn build_rtmpsink(name: &str, url: &str) -> Result<gst::Element, PipelineError> {
    ensure_gst_initialized()?;
    gst::ElementFactory::make("rtmpsink")
        .name(name)
        .property("location", url)
        .build()
        .map_err(|_| PipelineError::ElementBuild("rtmpsink".to_string()))
}

pub fn build_level(name: &str, interval_ns: u64) -> Result<gst::Element, PipelineError> {
    ensure_gst_initialized()?;
    gst::ElementFactory::make("level")
        .name(name)
        .property("interval", interval_ns)
        .property("post-messages", true)
        .build()
        .map_err(|_| PipelineError::ElementBuild("level".to_string()))
}

/// Extracts the MIME codec string from a pad's negotiated caps, used to
/// detect whether the source carries an audio track at all.
pub fn probe_stream_mime(caps: &gst::Caps) -> Option<String> {
    gst_pbutils::codec_utils_caps_get_mime_codec(caps).map(|s| s.to_string())
}
