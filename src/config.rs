//! Tunable parameters for every stage, persisted as JSON.
//!
//! Defaults reproduce the reference behaviour: a σ = 1.5 seam blur, 5×5 Sobel
//! kernels, a 15×15 AO blur, Rec.601 luma and a 0.6 depth/edge blend.

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::PbrError, filter::BoundaryMode, luminance::LuminanceWeights};

/// Largest Sobel aperture accepted (matches the usual OpenCV limit).
pub const MAX_SOBEL_KERNEL: usize = 31;

/// Largest AO blur kernel accepted.
pub const MAX_BLUR_KERNEL: usize = 255;

/// Largest seam-blur σ accepted; its `ceil(3σ)` radius stays within
/// [`MAX_BLUR_KERNEL`].
pub const MAX_SEAM_SIGMA: f32 = 42.0;

/// Full pipeline configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PbrConfig {
    pub tiling: TilingConfig,
    pub edge: EdgeNormalConfig,
    pub depth: DepthNormalConfig,
    pub blend: BlendConfig,
    pub ao: AoConfig,
    pub luminance: LuminanceWeights,
    pub normalization: NormalNormalization,
    pub boundary: BoundaryMode,
    pub output: OutputFormat,
}

/// Seamless tiling parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    /// Gaussian σ (texels) of the seam-softening blur; `0` disables it.
    pub seam_blur_sigma: f32,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            seam_blur_sigma: 1.5,
        }
    }
}

/// Luminance-gradient normal parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeNormalConfig {
    pub sobel_kernel_size: usize,
    /// Constant Z component assembled before normalisation.  Luminance
    /// gradients are in 8-bit units, hence the large default.
    pub z_bias: f32,
}

impl Default for EdgeNormalConfig {
    fn default() -> Self {
        Self {
            sobel_kernel_size: 5,
            z_bias: 255.0,
        }
    }
}

/// Depth-gradient normal parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthNormalConfig {
    pub sobel_kernel_size: usize,
    /// Constant Z component; depth is normalised to `[0, 1]` first.
    pub z_bias: f32,
    /// Upper bound on the depth estimator call; `None` waits indefinitely.
    pub timeout_ms: Option<u64>,
}

impl Default for DepthNormalConfig {
    fn default() -> Self {
        Self {
            sobel_kernel_size: 5,
            z_bias: 1.0,
            timeout_ms: Some(120_000),
        }
    }
}

impl DepthNormalConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Normal fusion parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendConfig {
    /// Weight of the depth-derived normal; `1 - alpha` goes to the edge normal.
    pub alpha: f32,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self { alpha: 0.6 }
    }
}

/// Ambient-occlusion blur parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AoConfig {
    /// Odd kernel width/height in texels.
    pub kernel_size: usize,
    /// Gaussian σ; derived from `kernel_size` when `None`.
    pub sigma: Option<f32>,
}

impl Default for AoConfig {
    fn default() -> Self {
        Self {
            kernel_size: 15,
            sigma: None,
        }
    }
}

/// How assembled normal vectors are range-compressed to bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalNormalization {
    /// Independent min/max per component.  A component with no range encodes
    /// as the flat-normal value (128 for X/Y, 255 for Z).
    #[default]
    PerChannel,
    /// One min/max over all three components together.
    Global,
}

/// Raster format of written map files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg { quality: u8 },
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg { .. } => "jpg",
        }
    }
}

fn check_odd_kernel(name: &str, size: usize, max: usize) -> Result<(), PbrError> {
    if size == 0 || size % 2 == 0 || size > max {
        return Err(PbrError::InvalidConfig(format!(
            "{name} must be odd and in 1..={max} (got {size})"
        )));
    }
    Ok(())
}

fn check_finite(name: &str, v: f32) -> Result<(), PbrError> {
    if !v.is_finite() {
        return Err(PbrError::InvalidConfig(format!("{name} must be finite (got {v})")));
    }
    Ok(())
}

impl PbrConfig {
    /// Reject out-of-range values before any work starts.
    pub fn validate(&self) -> Result<(), PbrError> {
        let sigma = self.tiling.seam_blur_sigma;
        check_finite("tiling.seam_blur_sigma", sigma)?;
        if !(0.0..=MAX_SEAM_SIGMA).contains(&sigma) {
            return Err(PbrError::InvalidConfig(format!(
                "tiling.seam_blur_sigma must be in [0, {MAX_SEAM_SIGMA}] (got {sigma})"
            )));
        }
        check_odd_kernel(
            "edge.sobel_kernel_size",
            self.edge.sobel_kernel_size,
            MAX_SOBEL_KERNEL,
        )?;
        check_odd_kernel(
            "depth.sobel_kernel_size",
            self.depth.sobel_kernel_size,
            MAX_SOBEL_KERNEL,
        )?;
        check_finite("edge.z_bias", self.edge.z_bias)?;
        check_finite("depth.z_bias", self.depth.z_bias)?;
        if self.depth.timeout_ms == Some(0) {
            return Err(PbrError::InvalidConfig(
                "depth.timeout_ms must be positive".into(),
            ));
        }
        let alpha = self.blend.alpha;
        if !(0.0..=1.0).contains(&alpha) {
            return Err(PbrError::InvalidConfig(format!(
                "blend.alpha must be in [0, 1] (got {alpha})"
            )));
        }
        check_odd_kernel("ao.kernel_size", self.ao.kernel_size, MAX_BLUR_KERNEL)?;
        if let Some(s) = self.ao.sigma {
            check_finite("ao.sigma", s)?;
            if s <= 0.0 {
                return Err(PbrError::InvalidConfig(format!(
                    "ao.sigma must be > 0 (got {s})"
                )));
            }
        }
        if let OutputFormat::Jpeg { quality } = self.output {
            if !(1..=100).contains(&quality) {
                return Err(PbrError::InvalidConfig(format!(
                    "output jpeg quality must be in 1..=100 (got {quality})"
                )));
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, PbrError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PbrError::InvalidConfig(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, PbrError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PbrError::InvalidConfig(format!("unserializable config: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PbrError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PbrError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
