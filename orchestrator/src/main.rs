mod env;
mod events;

use mimalloc::MiMalloc;
use tracing::{Metadata, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer, filter::FilterFn, fmt, layer::SubscriberExt, registry,
    util::SubscriberInitExt,
};
use worker_core::WorkerManager;

use env::AppEnv;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let app_env = AppEnv::new();

    let filter = EnvFilter::new("info")
        .add_directive("rustls=warn".parse().unwrap())
        .add_directive("gstreamer=warn".parse().unwrap());

    let focus = app_env.log_focus;
    let filter_fn = FilterFn::new(move |meta: &Metadata<'_>| {
        if !focus {
            return true;
        }
        meta.target().starts_with("worker_core")
            || meta.target().starts_with("sts_client")
            || meta.target().starts_with("media_pipeline")
            || meta.target().starts_with("dubbing_segment")
            || meta.target().starts_with("av_sync")
            || meta.target().starts_with("orchestrator")
    });

    registry()
        .with(filter)
        .with(fmt::layer().with_filter(filter_fn))
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    info!(worker_id = %app_env.worker_id, "dubbing orchestrator starting");

    let worker_manager = WorkerManager::new();

    // The HTTP/control-plane surface that turns stream-lifecycle hooks into
    // calls against `worker_manager` lives outside this binary. This process
    // only owns worker lifecycle; wiring it to a hook receiver is left to the
    // deployment that embeds `worker-core` and `events::ReadyEvent`.
    let _ = &worker_manager;

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping active workers");

    worker_manager.cleanup_all().await;

    info!("dubbing orchestrator stopped");
    Ok(())
}
