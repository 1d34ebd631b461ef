//! `bevy_symbios_pbr` — derive tileable PBR material maps from a photograph.
//!
//! # Architecture
//! [`PbrPipeline`] turns one albedo photo into a [`MaterialMapSet`]: a
//! seamless albedo, a tangent-space normal map, a roughness map and an
//! ambient-occlusion map.  The normal map fuses two estimates: Sobel
//! gradients of the image luminance ([`EdgeNormalEstimator`]) and Sobel
//! gradients of a depth field produced by a caller-supplied
//! [`DepthEstimator`] ([`DepthNormalEstimator`]), mixed by [`NormalBlender`].
//!
//! Call [`map_set_to_images`] to upload a map set into
//! [`bevy::asset::Assets<Image>`], or spawn a [`PendingMaterial`] and let
//! [`SymbiosPbrPlugin`] derive and upload it in the background.

pub mod assets;
pub mod async_gen;
pub mod blend;
pub mod buffer;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod depth;
pub mod edge;
pub mod error;
pub mod filter;
pub mod luminance;
pub mod normal;
pub mod pipeline;
pub mod resample;
pub mod tiling;

pub use assets::{MaterialHandles, map_set_to_images};
pub use async_gen::{MaterialReady, PendingMaterial};
pub use blend::NormalBlender;
pub use buffer::{GrayscaleBuffer, MaterialMapSet, PixelBuffer, ScalarField};
pub use cancel::CancelToken;
pub use codec::{FileCodec, ImageCodec};
pub use config::{OutputFormat, PbrConfig};
pub use depth::{DepthEstimator, DepthNormalEstimator};
pub use edge::EdgeNormalEstimator;
pub use error::{PbrError, PipelineError, Stage};
pub use normal::NormalMap;
pub use pipeline::{MapPaths, PbrPipeline};
pub use tiling::SeamlessTiler;

use bevy::prelude::*;

/// Bevy plugin — registers the background material polling system.
pub struct SymbiosPbrPlugin;

impl Plugin for SymbiosPbrPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, async_gen::poll_material_tasks);
    }
}
