//! Background material derivation for Bevy apps.
//!
//! Whole pipeline runs are submitted to a private, bounded [`rayon`] pool so
//! they never stall the main thread; at most [`MAX_CONCURRENT_RUNS`] run at
//! once and the rest queue in order.  When a run finishes the maps are
//! uploaded to [`Assets<Image>`] and the entity receives [`MaterialReady`].
//!
//! # Usage
//! ```rust,ignore
//! let pipeline = Arc::new(PbrPipeline::new(PbrConfig::default(), estimator)?);
//! commands.spawn(PendingMaterial::from_file(pipeline, "photos/brick.jpg".into()));
//! // Later, query for MaterialReady to consume the handles.
//! ```

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, OnceLock, mpsc},
};

use bevy::{
    asset::Assets,
    ecs::{
        component::Component,
        entity::Entity,
        system::{Commands, Query, ResMut},
    },
    image::Image,
    log::error,
};

use crate::{
    assets::{MaterialHandles, map_set_to_images},
    buffer::{MaterialMapSet, PixelBuffer},
    cancel::CancelToken,
    error::PipelineError,
    pipeline::PbrPipeline,
};

/// Maximum number of pipeline runs in flight.
///
/// Each run already parallelises its stages internally; this only bounds how
/// many full-resolution intermediates are alive at once.
const MAX_CONCURRENT_RUNS: usize = 2;

fn gen_pool() -> &'static rayon::ThreadPool {
    static POOL: OnceLock<rayon::ThreadPool> = OnceLock::new();
    POOL.get_or_init(|| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(MAX_CONCURRENT_RUNS)
            .thread_name(|i| format!("material-gen-{i}"))
            .panic_handler(|_| error!("Material derivation thread panicked"))
            .build()
            .expect("failed to build material generation thread pool")
    })
}

type RunResult = Result<MaterialMapSet, PipelineError>;

/// Spawned onto an entity to request background material derivation.
///
/// Dropping it (e.g. despawning the entity) cancels the run: queued runs
/// never start, running ones stop at their next row-chunk check.
#[derive(Component)]
pub struct PendingMaterial {
    // Mutex makes the receiver Sync, which Component requires.
    rx: Mutex<mpsc::Receiver<RunResult>>,
    cancel: CancelToken,
}

impl Drop for PendingMaterial {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_run<F>(f: F) -> PendingMaterial
where
    F: FnOnce(&CancelToken) -> RunResult + Send + 'static,
{
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let (tx, rx) = mpsc::sync_channel(1);
    gen_pool().spawn(move || {
        if !token.is_cancelled() {
            tx.send(f(&token)).ok();
        }
    });
    PendingMaterial {
        rx: Mutex::new(rx),
        cancel,
    }
}

impl PendingMaterial {
    /// Derive maps from an already decoded image.
    pub fn new(pipeline: Arc<PbrPipeline>, image: PixelBuffer, input_id: impl Into<String>) -> Self {
        let id = input_id.into();
        spawn_run(move |cancel| pipeline.run(&image, &id, cancel))
    }

    /// Decode `path` on the worker and derive maps from it.
    pub fn from_file(pipeline: Arc<PbrPipeline>, path: PathBuf) -> Self {
        spawn_run(move |cancel| {
            let image = pipeline.decode(&path)?;
            pipeline.run(&image, &path.display().to_string(), cancel)
        })
    }

    /// Cancel without despawning.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Added to the entity by [`poll_material_tasks`] when derivation is complete.
#[derive(Component)]
pub struct MaterialReady(pub MaterialHandles);

/// Bevy system — polls pending runs and uploads finished map sets.
pub fn poll_material_tasks(
    mut commands: Commands,
    tasks: Query<(Entity, &PendingMaterial)>,
    mut images: ResMut<Assets<Image>>,
) {
    for (entity, pending) in &tasks {
        let poll = match pending.rx.lock() {
            Ok(rx) => rx.try_recv(),
            Err(_) => Err(mpsc::TryRecvError::Disconnected),
        };
        match poll {
            Ok(Ok(set)) => {
                let handles = map_set_to_images(set, &mut images);
                commands
                    .entity(entity)
                    .remove::<PendingMaterial>()
                    .insert(MaterialReady(handles));
            }
            Ok(Err(e)) => {
                if !e.is_cancelled() {
                    error!("Material derivation failed: {e}");
                }
                commands.entity(entity).remove::<PendingMaterial>();
            }
            Err(mpsc::TryRecvError::Disconnected) => {
                error!("Material derivation thread panicked");
                commands.entity(entity).remove::<PendingMaterial>();
            }
            Err(mpsc::TryRecvError::Empty) => {}
        }
    }
}
