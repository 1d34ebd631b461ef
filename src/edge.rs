//! Normals from luminance gradients of the seamless albedo.
//!
//! Sharp and detail-preserving, but blind to large-scale shape: an evenly
//! lit surface yields a flat map whatever its actual relief.

use crate::{
    buffer::{GrayscaleBuffer, PixelBuffer},
    cancel::CancelToken,
    config::{NormalNormalization, PbrConfig},
    error::PbrError,
    filter::{BoundaryMode, SobelKernels, sobel, sobel_kernels},
    luminance::{LuminanceWeights, luminance},
    normal::{NormalMap, encode_gradients},
};

/// Normals from luminance gradients.
///
/// Captures fine surface detail such as mortar lines and cracks at full
/// resolution but sees no large-scale shape: a photo of uniform brightness
/// yields a flat map whatever the real relief.  Pair it with
/// [`DepthNormalEstimator`](crate::depth::DepthNormalEstimator) through
/// [`NormalBlender`](crate::blend::NormalBlender).
#[derive(Clone, Debug)]
pub struct EdgeNormalEstimator {
    kernels: SobelKernels,
    z_bias: f32,
    weights: LuminanceWeights,
    normalization: NormalNormalization,
    boundary: BoundaryMode,
}

impl EdgeNormalEstimator {
    /// Build Sobel kernels from `config.edge`.  Fails with
    /// [`PbrError::InvalidConfig`] for an even or oversized aperture.
    pub fn new(config: &PbrConfig) -> Result<Self, PbrError> {
        Ok(Self {
            kernels: sobel_kernels(config.edge.sobel_kernel_size)?,
            z_bias: config.edge.z_bias,
            weights: config.luminance,
            normalization: config.normalization,
            boundary: config.boundary,
        })
    }

    /// Convert `albedo` to luminance, then derive normals from it.
    pub fn from_luminance(
        &self,
        albedo: &PixelBuffer,
        cancel: &CancelToken,
    ) -> Result<NormalMap, PbrError> {
        let gray = luminance(albedo, self.weights, cancel)?;
        self.from_gray(&gray, cancel)
    }

    /// Derive normals from an already extracted luminance channel.
    pub fn from_gray(
        &self,
        gray: &GrayscaleBuffer,
        cancel: &CancelToken,
    ) -> Result<NormalMap, PbrError> {
        let (gx, gy) = sobel(&gray.to_field(), &self.kernels, self.boundary, cancel)?;
        encode_gradients(&gx, &gy, self.z_bias, self.normalization, cancel)
    }
}
