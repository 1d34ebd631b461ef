//! Normals from a monocular depth field.
//!
//! Captures coarse shape (bumps and dents implied by apparent depth) that
//! luminance gradients cannot see, at the cost of depending on an external
//! model whose output varies across versions and weights.

use crate::{
    buffer::{PixelBuffer, ScalarField},
    cancel::CancelToken,
    config::{NormalNormalization, PbrConfig},
    error::PbrError,
    filter::{BoundaryMode, SobelKernels, sobel, sobel_kernels},
    normal::{NormalMap, encode_gradients},
    resample::resize_field,
};

/// Monocular depth inference, supplied by the caller.
///
/// The pipeline always passes a 3-channel RGB image: alpha is dropped and
/// gray photos are replicated into R, G and B.
///
/// The returned field may have any resolution; the pipeline resizes it to
/// the albedo.  Values must be finite and strictly monotonic with perceived
/// distance, **larger = farther**.  Estimators whose native output is inverse
/// depth (disparity) must negate or invert it first.
///
/// Implementations are loaded once by the caller and shared across runs, so
/// they take `&self` and must be thread-safe.
pub trait DepthEstimator: Send + Sync {
    fn estimate(&self, image: &PixelBuffer) -> Result<ScalarField, PbrError>;
}

impl<F> DepthEstimator for F
where
    F: Fn(&PixelBuffer) -> Result<ScalarField, PbrError> + Send + Sync,
{
    fn estimate(&self, image: &PixelBuffer) -> Result<ScalarField, PbrError> {
        self(image)
    }
}

/// Normals from the gradients of a depth field.
///
/// Accepts depth at any resolution and any value range: the field is min-max
/// normalised to `[0, 1]` and resized to the albedo before differentiation,
/// so the configured z-bias means the same thing regardless of the model.
#[derive(Clone, Debug)]
pub struct DepthNormalEstimator {
    kernels: SobelKernels,
    z_bias: f32,
    normalization: NormalNormalization,
    boundary: BoundaryMode,
}

impl DepthNormalEstimator {
    /// Build Sobel kernels from `config.depth`.  Fails with
    /// [`PbrError::InvalidConfig`] for an even or oversized aperture.
    pub fn new(config: &PbrConfig) -> Result<Self, PbrError> {
        Ok(Self {
            kernels: sobel_kernels(config.depth.sobel_kernel_size)?,
            z_bias: config.depth.z_bias,
            normalization: config.normalization,
            boundary: config.boundary,
        })
    }

    /// Min-max normalize `depth` to `[0, 1]`, resize it to `target`, and
    /// encode its Sobel gradients as a normal map.
    pub fn from_depth(
        &self,
        depth: &ScalarField,
        target: (u32, u32),
        cancel: &CancelToken,
    ) -> Result<NormalMap, PbrError> {
        let (tw, th) = target;
        if tw == 0 || th == 0 {
            return Err(PbrError::DimensionMismatch(format!(
                "cannot resize depth {:?} to {tw}×{th}",
                depth.dimensions()
            )));
        }
        if !depth.is_finite() {
            return Err(PbrError::DepthEstimation(
                "depth field contains NaN or infinite values".into(),
            ));
        }

        let normalized = resize_field(&depth.normalized(), tw, th)?;
        cancel.check()?;
        let (gx, gy) = sobel(&normalized, &self.kernels, self.boundary, cancel)?;
        encode_gradients(&gx, &gy, self.z_bias, self.normalization, cancel)
    }
}
