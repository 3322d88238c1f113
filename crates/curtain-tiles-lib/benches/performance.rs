//! Performance benchmarks for curtain-tiles-lib
//!
//! Run with: cargo bench --package curtain-tiles-lib

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use curtain_tiles_lib::services::{
    GraphicsBackend, LocalFileStore, OfflineRetriever, TextureHandle, TileDraw, UploadOptions,
};
use curtain_tiles_lib::utils::geodetic_to_cartesian;
use curtain_tiles_lib::view::{CameraView, Viewport};
use curtain_tiles_lib::{
    CurtainLayer, CurtainShape, LayerConfig, LevelSetConfig, Path, RuntimeConfig, Segment,
    TextureData, TileKey, TileRuntime,
};
use geo::Point;
use gpx::{Gpx, Track, TrackSegment, Waypoint};
use std::sync::Arc;
use std::time::Duration;

/// Generate a wiggly GPX track with the specified number of points
fn generate_gpx_track(num_points: usize, base_lat: f64, base_lon: f64) -> Gpx {
    let mut gpx = Gpx::default();
    let mut track = Track::default();
    let mut segment = TrackSegment::default();

    for i in 0..num_points {
        let t = i as f64 / num_points as f64;
        let lat = base_lat + t * 0.5 + (t * 50.0).sin() * 0.001;
        let lon = base_lon + t * 0.5 + (t * 30.0).cos() * 0.001;
        segment.points.push(Waypoint::new(Point::new(lon, lat)));
    }

    track.segments.push(segment);
    gpx.tracks.push(track);
    gpx
}

/// Backend treating every texture as resident
#[derive(Default)]
struct NullBackend {
    draws: usize,
}

impl GraphicsBackend for NullBackend {
    fn is_resident(&self, _key: &TileKey) -> bool {
        true
    }

    fn upload(
        &mut self,
        _key: &TileKey,
        _data: TextureData,
        _options: UploadOptions,
    ) -> TextureHandle {
        TextureHandle(0)
    }

    fn bind(&mut self, _key: &TileKey) -> bool {
        true
    }

    fn draw(&mut self, _draw: &TileDraw<'_>) {
        self.draws += 1;
    }
}

fn create_layer(runtime: &tokio::runtime::Runtime, path: Arc<Path>) -> CurtainLayer {
    let _guard = runtime.enter();
    let tile_runtime = TileRuntime::current(RuntimeConfig::default()).unwrap();
    let config = LevelSetConfig {
        dataset_name: "bench".to_string(),
        cache_name: "bench".to_string(),
        service_url: Some("http://localhost/tiles".to_string()),
        num_levels: 8,
        full_width: 65_536,
        full_height: 8_192,
        network_retrieval_enabled: false,
        ..Default::default()
    };
    CurtainLayer::new(
        path,
        config,
        LayerConfig::default(),
        tile_runtime,
        Arc::new(LocalFileStore::new(std::env::temp_dir().join("curtain-bench"))),
        Arc::new(OfflineRetriever),
    )
    .unwrap()
}

fn camera_at(path: &Path, percent: f64, altitude: f64) -> CameraView {
    let location = path.location_at_percent(percent);
    let eye = geodetic_to_cartesian(location, altitude);
    let ahead = path.location_at_percent((percent + 0.05).min(1.0));
    let target = geodetic_to_cartesian(ahead, -5_000.0);
    CameraView::looking_at(eye, target, eye.normalize(), 1.0, Viewport::new(1920, 1080))
}

// ============================================================================
// Core Benchmarks
// ============================================================================

fn bench_frame_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let path = Arc::new(Path::from_gpx(&generate_gpx_track(5_000, -24.0, 133.0)).unwrap());
    let mut layer = create_layer(&runtime, path.clone());
    let mut backend = NullBackend::default();

    for altitude in [2_000.0, 50_000.0, 1_000_000.0] {
        let view = camera_at(&path, 0.3, altitude);
        group.bench_with_input(BenchmarkId::new("render", altitude as u64), &view, |b, view| {
            b.iter(|| layer.render(view, &mut backend));
        });
    }

    group.finish();
}

fn bench_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("path");
    let gpx = generate_gpx_track(50_000, 51.5, -0.1);

    group.throughput(Throughput::Elements(50_000));
    group.bench_function("from_gpx_50k", |b| {
        b.iter(|| Path::from_gpx(&gpx).unwrap());
    });

    let path = Path::from_gpx(&gpx).unwrap();
    group.bench_function("location_at_percent_50k", |b| {
        let mut percent = 0.0;
        b.iter(|| {
            percent = (percent + 0.000_123) % 1.0;
            path.location_at_percent(percent)
        });
    });

    group.finish();
}

fn bench_geometry(c: &mut Criterion) {
    let mut group = c.benchmark_group("geometry");
    let path = Path::from_gpx(&generate_gpx_track(5_000, -24.0, 133.0)).unwrap();
    let view = camera_at(&path, 0.5, 10_000.0);
    let key = TileKey::new(3, 0, 0, Arc::from("bench"));
    let segment = Segment::new(0.0, 0.125, 0.0, 1.0);

    for subsegments in [1, 4] {
        let shape = CurtainShape {
            subsegments,
            ..CurtainShape::default()
        };
        group.bench_with_input(
            BenchmarkId::new("rebuild", subsegments),
            &shape,
            |b, shape| {
                b.iter(|| path.segment_geometry(&key, &segment, shape, &view, Duration::ZERO));
            },
        );
    }

    let shape = CurtainShape::default();
    group.bench_function("cached", |b| {
        b.iter(|| path.segment_geometry(&key, &segment, &shape, &view, Duration::from_secs(3600)));
    });

    // Frustum test of the whole curtain
    group.bench_function("extent", |b| {
        b.iter(|| path.segment_extent(&Segment::FULL, &shape, &view));
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(benches, bench_frame_assembly, bench_path, bench_geometry);

criterion_main!(benches);
