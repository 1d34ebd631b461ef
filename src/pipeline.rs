//! Orchestration of one photo → material-map-set run.
//!
//! Stage order: tile → luminance → {edge normal, roughness, AO} in parallel
//! with the depth estimator call → depth normal → blend.  The depth
//! estimator runs on a small dedicated pool so a slow model can be abandoned
//! after the configured timeout; everything else runs on a private [`rayon`]
//! pool.
//!
//! Any stage failure aborts the run.  Nothing is substituted for a missing
//! map, and nothing is written to disk unless the whole run succeeded.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock, mpsc},
    time::{Duration, Instant},
};

use bevy::log::{debug, error, info, warn};

use crate::{
    blend::NormalBlender,
    buffer::{MaterialMapSet, PixelBuffer, ScalarField},
    cancel::CancelToken,
    codec::{FileCodec, ImageCodec},
    config::{OutputFormat, PbrConfig},
    depth::{DepthEstimator, DepthNormalEstimator},
    edge::EdgeNormalEstimator,
    error::{PbrError, PipelineError, Stage, StageContext},
    luminance::{LuminanceDerivedMaps, luminance},
    tiling::SeamlessTiler,
};

pub const ALBEDO_SUFFIX: &str = "_Albedo";
pub const NORMAL_SUFFIX: &str = "_Normal";
pub const ROUGHNESS_SUFFIX: &str = "_Roughness";
pub const AO_SUFFIX: &str = "_AO";

/// How often a blocked wait on the depth estimator re-checks cancellation.
const DEPTH_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Maximum number of depth estimator calls executing at once.
///
/// A timed-out call cannot be interrupted; it keeps its pool thread until the
/// model returns.  Later calls queue behind it, and their wait counts against
/// their own run's timeout, so repeated timeouts never grow the thread count.
pub const MAX_CONCURRENT_ESTIMATES: usize = 2;

fn depth_pool() -> &'static rayon::ThreadPool {
    static POOL: OnceLock<rayon::ThreadPool> = OnceLock::new();
    POOL.get_or_init(|| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(MAX_CONCURRENT_ESTIMATES)
            .thread_name(|i| format!("pbr-depth-{i}"))
            .panic_handler(|_| error!("depth estimator panicked"))
            .build()
            .expect("failed to build depth estimator thread pool")
    })
}

/// Pool for intra-stage row parallelism, shared by all runs.
fn worker_pool() -> &'static rayon::ThreadPool {
    static POOL: OnceLock<rayon::ThreadPool> = OnceLock::new();
    POOL.get_or_init(|| {
        rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("pbr-worker-{i}"))
            .build()
            .expect("failed to build PBR worker thread pool")
    })
}

/// Derives a [`MaterialMapSet`] from a photograph.
///
/// Construct once with the caller-owned depth estimator and reuse across
/// runs; concurrent runs on different inputs need no coordination.
pub struct PbrPipeline {
    config: PbrConfig,
    tiler: SeamlessTiler,
    edge: EdgeNormalEstimator,
    depth: DepthNormalEstimator,
    derived: LuminanceDerivedMaps,
    blender: NormalBlender,
    estimator: Arc<dyn DepthEstimator>,
    codec: Arc<dyn ImageCodec>,
}

impl PbrPipeline {
    /// Validate `config` and build every stage.  Files are read and written
    /// through [`FileCodec`] unless [`with_codec`](Self::with_codec) replaces it.
    pub fn new(config: PbrConfig, estimator: Arc<dyn DepthEstimator>) -> Result<Self, PbrError> {
        config.validate()?;
        Ok(Self {
            tiler: SeamlessTiler::new(&config.tiling),
            edge: EdgeNormalEstimator::new(&config)?,
            depth: DepthNormalEstimator::new(&config)?,
            derived: LuminanceDerivedMaps::new(&config.ao, config.boundary),
            blender: NormalBlender::new(config.blend.alpha)?,
            estimator,
            codec: Arc::new(FileCodec),
            config,
        })
    }

    pub fn with_codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &PbrConfig {
        &self.config
    }

    /// Decode an input photo with this pipeline's codec.
    pub fn decode(&self, input: &Path) -> Result<PixelBuffer, PipelineError> {
        let id = input.display().to_string();
        timed(Stage::Decode, &id, || self.codec.decode(input))
    }

    /// Run every stage over an in-memory image.
    ///
    /// `input_id` only labels log lines and errors.
    pub fn run(
        &self,
        input: &PixelBuffer,
        input_id: &str,
        cancel: &CancelToken,
    ) -> Result<MaterialMapSet, PipelineError> {
        let start = Instant::now();
        let set = worker_pool().install(|| self.run_stages(input, input_id, cancel))?;
        info!(
            input = input_id,
            width = set.width(),
            height = set.height(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "material maps derived"
        );
        Ok(set)
    }

    fn run_stages(
        &self,
        input: &PixelBuffer,
        id: &str,
        cancel: &CancelToken,
    ) -> Result<MaterialMapSet, PipelineError> {
        cancel.check().at(Stage::Tile, id)?;
        let albedo = Arc::new(timed(Stage::Tile, id, || self.tiler.tile(input, cancel))?);

        // The estimator always sees plain RGB, whatever the photo carried.
        let rgb = if albedo.channels() == 3 {
            Arc::clone(&albedo)
        } else {
            Arc::new(albedo.to_rgb())
        };
        let deadline = self.config.depth.timeout().map(|t| Instant::now() + t);
        let depth_rx = self.spawn_depth(rgb, deadline, cancel.clone());

        let lum = timed(Stage::Luminance, id, || {
            luminance(&albedo, self.config.luminance, cancel)
        })?;
        let (edge, (roughness, ao)) = rayon::join(
            || timed(Stage::EdgeNormal, id, || self.edge.from_gray(&lum, cancel)),
            || {
                rayon::join(
                    || timed(Stage::Roughness, id, || Ok(self.derived.roughness(&lum))),
                    || timed(Stage::AmbientOcclusion, id, || self.derived.ao(&lum, cancel)),
                )
            },
        );
        let (edge, roughness, ao) = (edge?, roughness?, ao?);

        let depth = timed(Stage::DepthEstimation, id, || {
            self.await_depth(&depth_rx, deadline, cancel)
        })?;
        let depth_normal = timed(Stage::DepthNormal, id, || {
            self.depth.from_depth(&depth, albedo.dimensions(), cancel)
        })?;
        let normal = timed(Stage::Blend, id, || {
            self.blender.blend(&depth_normal, &edge, cancel)
        })?;

        // A depth pool thread may not have released its handle yet.
        let albedo = Arc::try_unwrap(albedo).unwrap_or_else(|shared| (*shared).clone());
        Ok(MaterialMapSet {
            albedo,
            normal,
            roughness,
            ao,
        })
    }

    /// Queue the estimator on the depth pool; its result arrives on the
    /// returned channel.  A call still queued when the run is cancelled or
    /// its deadline passes never starts.  A panicking estimator drops the
    /// sender, which the receiver observes as a disconnect.
    fn spawn_depth(
        &self,
        image: Arc<PixelBuffer>,
        deadline: Option<Instant>,
        cancel: CancelToken,
    ) -> mpsc::Receiver<Result<ScalarField, PbrError>> {
        let estimator = Arc::clone(&self.estimator);
        let (tx, rx) = mpsc::sync_channel(1);
        depth_pool().spawn(move || {
            if cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d) {
                return;
            }
            let result = estimator.estimate(&image).and_then(|depth| {
                if depth.is_finite() {
                    Ok(depth)
                } else {
                    Err(PbrError::DepthEstimation(
                        "estimator returned NaN or infinite depth".into(),
                    ))
                }
            });
            tx.send(result).ok();
        });
        rx
    }

    fn await_depth(
        &self,
        rx: &mpsc::Receiver<Result<ScalarField, PbrError>>,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> Result<ScalarField, PbrError> {
        let timed_out = || PbrError::DepthEstimationTimeout {
            timeout_ms: self.config.depth.timeout_ms.unwrap_or_default(),
        };
        loop {
            cancel.check()?;
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(timed_out());
                    }
                    (deadline - now).min(DEPTH_POLL_INTERVAL)
                }
                None => DEPTH_POLL_INTERVAL,
            };
            match rx.recv_timeout(wait) {
                Ok(result) => return result,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    // Queued calls past cancellation or the deadline are
                    // skipped, which also drops the sender.
                    cancel.check()?;
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(timed_out());
                    }
                    return Err(PbrError::DepthEstimation(
                        "depth estimator thread panicked".into(),
                    ));
                }
            }
        }
    }

    /// Decode `input`, run the pipeline, and write the four maps into
    /// `out_dir` as `<base>_Albedo`, `<base>_Normal`, `<base>_Roughness` and
    /// `<base>_AO`.
    pub fn run_file(
        &self,
        input: &Path,
        out_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<MapPaths, PipelineError> {
        let id = input.display().to_string();
        let image = self.decode(input)?;
        let set = self.run(&image, &id, cancel)?;

        let format = self.config.output;
        let paths = MapPaths::new(out_dir, &base_identifier(input), format);
        timed(Stage::Encode, &id, || {
            fs::create_dir_all(out_dir)?;
            write_map_set(&set, &paths, self.codec.as_ref(), format)
        })?;
        info!(input = %id, dir = %out_dir.display(), "material maps written");
        Ok(paths)
    }

    /// Only make `input` seamless and write `<base>_Albedo` into `out_dir`.
    pub fn tile_file(
        &self,
        input: &Path,
        out_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<PathBuf, PipelineError> {
        let id = input.display().to_string();
        let image = self.decode(input)?;
        let albedo = worker_pool().install(|| {
            timed(Stage::Tile, &id, || self.tiler.tile(&image, cancel))
        })?;

        let format = self.config.output;
        let path = MapPaths::new(out_dir, &base_identifier(input), format).albedo;
        timed(Stage::Encode, &id, || {
            fs::create_dir_all(out_dir)?;
            self.codec.encode(&albedo, &path, format)
        })?;
        info!(input = %id, path = %path.display(), "seamless albedo written");
        Ok(path)
    }
}

fn timed<T>(
    stage: Stage,
    input: &str,
    f: impl FnOnce() -> Result<T, PbrError>,
) -> Result<T, PipelineError> {
    let start = Instant::now();
    let out = f().at(stage, input)?;
    debug!(
        %stage,
        input,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "stage complete"
    );
    Ok(out)
}

/// File stem of `path` with a trailing `_Albedo` removed, so feeding a
/// previously tiled albedo back in keeps the original base name.
pub fn base_identifier(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.strip_suffix(ALBEDO_SUFFIX) {
        Some(base) if !base.is_empty() => base.to_owned(),
        _ => stem,
    }
}

/// Output locations of one map set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapPaths {
    pub albedo: PathBuf,
    pub normal: PathBuf,
    pub roughness: PathBuf,
    pub ao: PathBuf,
}

impl MapPaths {
    pub fn new(dir: &Path, base: &str, format: OutputFormat) -> Self {
        let ext = format.extension();
        let file = |suffix: &str| dir.join(format!("{base}{suffix}.{ext}"));
        Self {
            albedo: file(ALBEDO_SUFFIX),
            normal: file(NORMAL_SUFFIX),
            roughness: file(ROUGHNESS_SUFFIX),
            ao: file(AO_SUFFIX),
        }
    }

    pub fn all(&self) -> [&Path; 4] {
        [&self.albedo, &self.normal, &self.roughness, &self.ao]
    }
}

/// Encode all four maps.  If any write fails, files already written by this
/// call are removed before the error is returned.
pub fn write_map_set(
    set: &MaterialMapSet,
    paths: &MapPaths,
    codec: &dyn ImageCodec,
    format: OutputFormat,
) -> Result<(), PbrError> {
    let roughness = PixelBuffer::from(&set.roughness);
    let ao = PixelBuffer::from(&set.ao);
    let maps: [(&PixelBuffer, &Path); 4] = [
        (&set.albedo, &paths.albedo),
        (set.normal.as_buffer(), &paths.normal),
        (&roughness, &paths.roughness),
        (&ao, &paths.ao),
    ];

    for (i, (buffer, path)) in maps.iter().enumerate() {
        if let Err(err) = codec.encode(buffer, path, format) {
            for (_, written) in &maps[..=i] {
                match fs::remove_file(written) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(
                        path = %written.display(),
                        "failed to remove partial output: {e}"
                    ),
                }
            }
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_identifier_strips_albedo_suffix() {
        assert_eq!(base_identifier(Path::new("input/texture2.jpg")), "texture2");
        assert_eq!(
            base_identifier(Path::new("output/texture2_Albedo.jpg")),
            "texture2"
        );
        assert_eq!(base_identifier(Path::new("_Albedo.png")), "_Albedo");
        assert_eq!(base_identifier(Path::new("a/b/brick_wall")), "brick_wall");
    }

    #[test]
    fn map_paths_share_base_and_extension() {
        let paths = MapPaths::new(Path::new("out"), "brick", OutputFormat::Png);
        assert_eq!(paths.albedo, Path::new("out/brick_Albedo.png"));
        assert_eq!(paths.normal, Path::new("out/brick_Normal.png"));
        assert_eq!(paths.roughness, Path::new("out/brick_Roughness.png"));
        assert_eq!(paths.ao, Path::new("out/brick_AO.png"));

        let jpeg = MapPaths::new(Path::new("out"), "brick", OutputFormat::Jpeg { quality: 90 });
        assert!(jpeg.all().iter().all(|p| p.extension().unwrap() == "jpg"));
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let config = PbrConfig {
            blend: crate::config::BlendConfig { alpha: 2.0 },
            ..PbrConfig::default()
        };
        let estimator: Arc<dyn DepthEstimator> =
            Arc::new(|img: &PixelBuffer| ScalarField::filled(img.width(), img.height(), 0.0));
        assert!(matches!(
            PbrPipeline::new(config, estimator),
            Err(PbrError::InvalidConfig(_))
        ));
    }

    #[test]
    fn oversized_seam_blur_is_rejected_at_construction() {
        let mut config = PbrConfig::default();
        config.tiling.seam_blur_sigma = 1e18;
        let estimator: Arc<dyn DepthEstimator> =
            Arc::new(|img: &PixelBuffer| ScalarField::filled(img.width(), img.height(), 0.0));
        assert!(matches!(
            PbrPipeline::new(config, estimator),
            Err(PbrError::InvalidConfig(_))
        ));
    }

    #[test]
    fn depth_pool_is_bounded() {
        assert_eq!(depth_pool().current_num_threads(), MAX_CONCURRENT_ESTIMATES);
    }

    #[test]
    fn estimate_queued_past_its_deadline_never_starts() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let estimator: Arc<dyn DepthEstimator> = Arc::new(move |img: &PixelBuffer| {
            counter.fetch_add(1, Ordering::SeqCst);
            ScalarField::filled(img.width(), img.height(), 0.0)
        });
        let pipeline = PbrPipeline::new(PbrConfig::default(), estimator).unwrap();
        let image = Arc::new(PixelBuffer::filled(4, 4, &[1, 2, 3]).unwrap());

        let rx = pipeline.spawn_depth(image, Some(Instant::now()), CancelToken::new());
        // The skipped job drops its sender without sending.
        assert!(rx.recv().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let err = pipeline
            .await_depth(&rx, Some(Instant::now()), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, PbrError::DepthEstimationTimeout { .. }));
    }
}
