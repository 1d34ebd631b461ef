//! Error taxonomy for map derivation and file I/O.

use std::fmt;

/// Every way a stage of the map-derivation pipeline can fail.
#[derive(Debug, thiserror::Error)]
pub enum PbrError {
    /// The input buffer is empty, zero-sized, or has an unusable channel layout.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// The codec does not recognise the file's raster format.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// The file was recognised but could not be decoded.
    #[error("corrupt image file: {0}")]
    CorruptFile(String),

    /// Maps that must share a resolution cannot be reconciled.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// The depth estimator did not answer within the configured timeout.
    #[error("depth estimation timed out after {timeout_ms} ms")]
    DepthEstimationTimeout { timeout_ms: u64 },

    /// The depth estimator failed or returned an unusable field.
    #[error("depth estimation failed: {0}")]
    DepthEstimation(String),

    /// A configuration value is outside its legal range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The run's [`CancelToken`](crate::cancel::CancelToken) was triggered.
    #[error("pipeline run cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Named step of a pipeline run, reported alongside failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Config,
    Decode,
    Tile,
    Luminance,
    EdgeNormal,
    DepthEstimation,
    DepthNormal,
    Roughness,
    AmbientOcclusion,
    Blend,
    Encode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Decode => "decode",
            Stage::Tile => "tile",
            Stage::Luminance => "luminance",
            Stage::EdgeNormal => "edge-normal",
            Stage::DepthEstimation => "depth-estimation",
            Stage::DepthNormal => "depth-normal",
            Stage::Roughness => "roughness",
            Stage::AmbientOcclusion => "ao",
            Stage::Blend => "blend",
            Stage::Encode => "encode",
        };
        f.write_str(name)
    }
}

/// A [`PbrError`] tagged with the stage that raised it and the input being processed.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed for `{input}`: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    /// Caller-visible identifier of the input (file path or caller-chosen id).
    pub input: String,
    #[source]
    pub source: PbrError,
}

impl PipelineError {
    pub fn new(stage: Stage, input: impl Into<String>, source: PbrError) -> Self {
        Self {
            stage,
            input: input.into(),
            source,
        }
    }

    /// `true` if the run was aborted by cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, PbrError::Cancelled)
    }

    /// `true` if the run failed because the depth estimator timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self.source, PbrError::DepthEstimationTimeout { .. })
    }
}

/// Attach stage/input context to a `Result<T, PbrError>`.
pub(crate) trait StageContext<T> {
    fn at(self, stage: Stage, input: &str) -> Result<T, PipelineError>;
}

impl<T> StageContext<T> for Result<T, PbrError> {
    fn at(self, stage: Stage, input: &str) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::new(stage, input, e))
    }
}
