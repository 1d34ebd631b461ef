use std::{hint::black_box, sync::Arc};

use bevy_symbios_pbr::{
    CancelToken, EdgeNormalEstimator, NormalBlender, PbrConfig, PbrPipeline, PixelBuffer,
    ScalarField, SeamlessTiler,
    config::TilingConfig,
    depth::{DepthEstimator, DepthNormalEstimator},
    luminance::{LuminanceWeights, luminance},
};
use criterion::{Criterion, criterion_group, criterion_main};
use rand::{Rng, SeedableRng, rngs::StdRng};

const SIZE: u32 = 512;

fn photo() -> PixelBuffer {
    let mut rng = StdRng::seed_from_u64(7);
    let data = (0..SIZE * SIZE * 3).map(|_| rng.random::<u8>()).collect();
    PixelBuffer::new(SIZE, SIZE, 3, data).unwrap()
}

fn bump(width: u32, height: u32) -> ScalarField {
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let r2 = (width.min(height) as f32 / 4.0).powi(2);
    ScalarField::from_fn(width, height, |x, y| {
        let (dx, dy) = (x as f32 - cx, y as f32 - cy);
        (-(dx * dx + dy * dy) / r2).exp()
    })
    .unwrap()
}

fn bench_pipeline(c: &mut Criterion) {
    let estimator: Arc<dyn DepthEstimator> =
        Arc::new(|img: &PixelBuffer| Ok(bump(img.width(), img.height())));
    let pipeline = PbrPipeline::new(PbrConfig::default(), estimator).unwrap();
    let image = photo();
    let cancel = CancelToken::new();
    c.bench_function("pipeline_512", |b| {
        b.iter(|| pipeline.run(black_box(&image), "bench", &cancel).unwrap())
    });
}

fn bench_tile(c: &mut Criterion) {
    let tiler = SeamlessTiler::new(&TilingConfig::default());
    let image = photo();
    let cancel = CancelToken::new();
    c.bench_function("tile_512", |b| {
        b.iter(|| tiler.tile(black_box(&image), &cancel).unwrap())
    });
}

fn bench_edge_normal(c: &mut Criterion) {
    let edge = EdgeNormalEstimator::new(&PbrConfig::default()).unwrap();
    let gray = luminance(&photo(), LuminanceWeights::default(), &CancelToken::new()).unwrap();
    let cancel = CancelToken::new();
    c.bench_function("edge_normal_512", |b| {
        b.iter(|| edge.from_gray(black_box(&gray), &cancel).unwrap())
    });
}

fn bench_depth_normal(c: &mut Criterion) {
    let depth = DepthNormalEstimator::new(&PbrConfig::default()).unwrap();
    let field = bump(SIZE / 2, SIZE / 2);
    let cancel = CancelToken::new();
    c.bench_function("depth_normal_256_to_512", |b| {
        b.iter(|| depth.from_depth(black_box(&field), (SIZE, SIZE), &cancel).unwrap())
    });
}

fn bench_blend(c: &mut Criterion) {
    let edge = EdgeNormalEstimator::new(&PbrConfig::default()).unwrap();
    let cancel = CancelToken::new();
    let a = edge.from_luminance(&photo(), &cancel).unwrap();
    let b_map = DepthNormalEstimator::new(&PbrConfig::default())
        .unwrap()
        .from_depth(&bump(SIZE, SIZE), (SIZE, SIZE), &cancel)
        .unwrap();
    let blender = NormalBlender::default();
    c.bench_function("blend_512", |b| {
        b.iter(|| blender.blend(black_box(&a), black_box(&b_map), &cancel).unwrap())
    });
}

criterion_group!(
    benches,
    bench_pipeline,
    bench_tile,
    bench_edge_normal,
    bench_depth_normal,
    bench_blend
);
criterion_main!(benches);
