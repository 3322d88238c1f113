mod backend;
mod error;
mod flight;
mod logging;
mod retriever;
mod settings;

use crate::backend::HeadlessBackend;
use crate::error::{AppError, AppResult};
use crate::flight::{Flight, RunSummary};
use crate::retriever::HttpRetriever;
use crate::settings::Settings;
use curtain_tiles_lib::services::{LocalFileStore, OfflineRetriever, Retriever};
use curtain_tiles_lib::{CurtainLayer, TileRuntime};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;

/// Frames between progress lines
const REPORT_EVERY: usize = 10;

fn main() -> ExitCode {
    logging::setup_logging();
    let settings = Settings::from_cli();

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(settings)) {
        Ok(summary) => {
            tracing::info!(
                frames = summary.frames,
                drawn = summary.tiles_drawn,
                fallback_ratio = summary.fallback_ratio(),
                loads = summary.loads_started,
                uploads = summary.uploads,
                elapsed_ms = summary.elapsed_ms,
                "Flight finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Flight failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> AppResult<RunSummary> {
    let level_set_config = settings.level_set_config()?;
    let layer_config = settings.layer_config()?;
    let path = Arc::new(settings.load_path()?);
    tracing::info!(
        waypoints = path.len(),
        length_km = path.length_meters() / 1000.0,
        dataset = %level_set_config.dataset_name,
        "Loaded path"
    );

    let runtime = TileRuntime::current(settings.runtime_config())?;
    let store = Arc::new(LocalFileStore::new(&settings.cache_root));
    let retriever: Arc<dyn Retriever> = if level_set_config.network_retrieval_enabled {
        Arc::new(HttpRetriever::new(settings.http_timeout(), settings.host_backoff())?)
    } else {
        Arc::new(OfflineRetriever)
    };

    let mut layer = CurtainLayer::new(
        path.clone(),
        level_set_config,
        layer_config.clone(),
        runtime.clone(),
        store,
        retriever,
    )?;
    let mut backend = HeadlessBackend::new(settings.texture_budget_bytes());
    let flight = Flight::from_settings(&settings, &layer_config);

    let mut summary = RunSummary::default();
    let started = Instant::now();
    let mut ticker = tokio::time::interval(settings.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    for frame in 0..settings.frames {
        ticker.tick().await;
        let view = flight.camera_for_frame(&path, frame);
        let stats = layer.render(&view, &mut backend);
        let backend_stats = backend.take_stats();
        summary.record(&stats, &backend_stats);
        profiling::finish_frame!();

        if frame % REPORT_EVERY == 0 {
            tracing::info!(
                frame,
                progress = flight.progress(frame),
                drawn = stats.tiles_drawn,
                fallback = stats.fallback_draws,
                missing = stats.tiles_missing,
                queued = stats.requests_queued,
                in_flight = runtime.loads_in_flight(),
                depth = stats.max_depth,
                uploads = backend_stats.uploads,
                evictions = backend_stats.evictions,
                "Frame"
            );
        }
    }

    tracing::info!(in_flight = runtime.loads_in_flight(), "Waiting for pending loads");
    runtime.wait_for_idle().await;

    summary.resident_textures = backend.resident_count();
    summary.resident_bytes = backend.used_bytes();
    summary.cached_tiles = runtime.memory_cache().len();
    summary.elapsed_ms = started.elapsed().as_millis() as u64;

    if let Some(summary_path) = &settings.summary {
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| AppError::Summary(e.to_string()))?;
        std::fs::write(summary_path, json).map_err(|e| AppError::Summary(e.to_string()))?;
        tracing::info!(path = %summary_path.display(), "Wrote run summary");
    }

    Ok(summary)
}
