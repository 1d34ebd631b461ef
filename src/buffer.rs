//! Raster types shared by every stage of the pipeline.
//!
//! All buffers are row-major with a top-left origin.  None of them is mutated
//! after the stage that produced it returns; downstream stages read them
//! through shared references and allocate their own outputs.

use crate::{error::PbrError, normal::NormalMap};

/// Maximum allowed image dimension (per side).
///
/// The widest intermediate is a 3 × f32 normal field, so an 8192² input peaks
/// around 800 MB per run.  Larger photos should be downscaled by the caller.
pub const MAX_DIMENSION: u32 = 8192;

/// Dimension guard used by every buffer constructor.
#[inline]
pub fn validate_dimensions(width: u32, height: u32) -> Result<(), PbrError> {
    if width == 0 || height == 0 {
        return Err(PbrError::InvalidImage(format!(
            "image dimensions must be non-zero (got {width}×{height})"
        )));
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(PbrError::InvalidImage(format!(
            "image dimensions {width}×{height} exceed MAX_DIMENSION={MAX_DIMENSION}"
        )));
    }
    Ok(())
}

fn check_len(actual: usize, expected: usize, what: &str) -> Result<(), PbrError> {
    if actual != expected {
        return Err(PbrError::InvalidImage(format!(
            "{what} holds {actual} samples, expected {expected}"
        )));
    }
    Ok(())
}

/// An 8-bit colour raster with 1–4 interleaved channels.
///
/// Decoded photos are RGB or RGBA.  The channel count is fixed at
/// construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap row-major interleaved `data`.  Fails if the dimensions are out of
    /// range, `channels` is not 1–4, or the length does not match.
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self, PbrError> {
        validate_dimensions(width, height)?;
        if !(1..=4).contains(&channels) {
            return Err(PbrError::InvalidImage(format!(
                "channel count must be 1–4 (got {channels})"
            )));
        }
        check_len(
            data.len(),
            width as usize * height as usize * channels as usize,
            "pixel buffer",
        )?;
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// A buffer where every texel equals `texel` (its length sets the channel count).
    pub fn filled(width: u32, height: u32, texel: &[u8]) -> Result<Self, PbrError> {
        let n = width as usize * height as usize;
        let data = texel.iter().copied().cycle().take(n * texel.len()).collect();
        Self::new(width, height, texel.len() as u8, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Interleaved samples per texel.
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Raw row-major samples.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub(crate) fn from_parts(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * channels as usize
        );
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    /// Samples of one texel.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = self.channels as usize;
        let idx = (y as usize * self.width as usize + x as usize) * c;
        &self.data[idx..idx + c]
    }

    /// Bytes per row.
    #[inline]
    pub(crate) fn stride(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    /// Three-channel copy: alpha is dropped and gray is replicated into R, G
    /// and B.  A buffer that is already RGB is cloned.
    pub fn to_rgb(&self) -> PixelBuffer {
        if self.channels == 3 {
            return self.clone();
        }
        let data = self
            .data
            .chunks_exact(self.channels as usize)
            .flat_map(|p| match p.len() {
                1 | 2 => [p[0], p[0], p[0]],
                _ => [p[0], p[1], p[2]],
            })
            .collect();
        PixelBuffer::from_parts(self.width, self.height, 3, data)
    }
}

/// An 8-bit single-channel raster: luminance, roughness, and AO maps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayscaleBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl GrayscaleBuffer {
    /// Wrap row-major `data`, one byte per texel.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, PbrError> {
        validate_dimensions(width, height)?;
        check_len(data.len(), width as usize * height as usize, "grayscale buffer")?;
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: u32, height: u32, value: u8) -> Result<Self, PbrError> {
        Self::new(width, height, vec![value; width as usize * height as usize])
    }

    pub(crate) fn from_parts(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self {
            width,
            height,
            data,
        }
    }

    /// Quantise a field to bytes (round to nearest, clamp to `[0, 255]`).
    pub fn from_field(field: &ScalarField) -> Self {
        Self {
            width: field.width,
            height: field.height,
            data: field
                .data
                .iter()
                .map(|&v| v.round().clamp(0.0, 255.0) as u8)
                .collect(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Widen to a float field in the same `[0, 255]` scale.
    pub fn to_field(&self) -> ScalarField {
        ScalarField {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|&v| v as f32).collect(),
        }
    }
}

impl From<&GrayscaleBuffer> for PixelBuffer {
    fn from(gray: &GrayscaleBuffer) -> Self {
        PixelBuffer::from_parts(gray.width, gray.height, 1, gray.data.clone())
    }
}

/// A single-precision scalar raster (depth, luminance, gradients).
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarField {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl ScalarField {
    /// Wrap row-major `data`.  Non-finite values are allowed here; stages
    /// that need finite input check [`is_finite`](Self::is_finite).
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self, PbrError> {
        validate_dimensions(width, height)?;
        check_len(data.len(), width as usize * height as usize, "scalar field")?;
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: u32, height: u32, value: f32) -> Result<Self, PbrError> {
        Self::new(width, height, vec![value; width as usize * height as usize])
    }

    /// Build a field by evaluating `f(x, y)` at every texel.
    pub fn from_fn(
        width: u32,
        height: u32,
        f: impl Fn(u32, u32) -> f32,
    ) -> Result<Self, PbrError> {
        validate_dimensions(width, height)?;
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Crate-internal constructor for stage outputs whose size is already known valid.
    pub(crate) fn from_parts(width: u32, height: u32, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Smallest and largest sample.
    pub fn min_max(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// Min-max rescale to `[0, 1]`.
    ///
    /// A constant field maps to all zeros (there is no range to stretch).
    pub fn normalized(&self) -> Self {
        let (lo, hi) = self.min_max();
        let range = hi - lo;
        let data = if range > 0.0 {
            self.data.iter().map(|&v| (v - lo) / range).collect()
        } else {
            vec![0.0; self.data.len()]
        };
        Self::from_parts(self.width, self.height, data)
    }
}

/// The four coregistered maps produced by one pipeline run.
///
/// All maps share the albedo's width and height.
#[derive(Clone, Debug)]
pub struct MaterialMapSet {
    /// Seam-tileable colour.
    pub albedo: PixelBuffer,
    /// Fused depth/edge normal map.
    pub normal: NormalMap,
    /// Inverted luminance.
    pub roughness: GrayscaleBuffer,
    /// Blurred luminance.
    pub ao: GrayscaleBuffer,
}

impl MaterialMapSet {
    pub fn width(&self) -> u32 {
        self.albedo.width()
    }

    pub fn height(&self) -> u32 {
        self.albedo.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_and_oversized_dimensions() {
        assert!(matches!(
            validate_dimensions(0, 4),
            Err(PbrError::InvalidImage(_))
        ));
        assert!(validate_dimensions(MAX_DIMENSION + 1, 4).is_err());
        assert!(validate_dimensions(MAX_DIMENSION, MAX_DIMENSION).is_ok());
    }

    #[test]
    fn pixel_buffer_checks_channels_and_length() {
        assert!(PixelBuffer::new(2, 2, 0, vec![]).is_err());
        assert!(PixelBuffer::new(2, 2, 5, vec![0; 20]).is_err());
        assert!(PixelBuffer::new(2, 2, 3, vec![0; 11]).is_err());
        let buf = PixelBuffer::new(2, 2, 3, (0..12).collect()).unwrap();
        assert_eq!(buf.pixel(1, 1), &[9, 10, 11]);
        assert_eq!(buf.stride(), 6);
    }

    #[test]
    fn filled_repeats_texel() {
        let buf = PixelBuffer::filled(3, 2, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buf.channels(), 4);
        assert!(buf.data().chunks(4).all(|p| p == [1, 2, 3, 4]));
    }

    #[test]
    fn to_rgb_drops_alpha_and_expands_gray() {
        let rgba = PixelBuffer::new(2, 1, 4, vec![1, 2, 3, 9, 4, 5, 6, 9]).unwrap();
        assert_eq!(rgba.to_rgb().data(), &[1, 2, 3, 4, 5, 6]);

        let gray_alpha = PixelBuffer::new(2, 1, 2, vec![7, 0, 8, 255]).unwrap();
        let rgb = gray_alpha.to_rgb();
        assert_eq!(rgb.channels(), 3);
        assert_eq!(rgb.data(), &[7, 7, 7, 8, 8, 8]);

        let gray = PixelBuffer::new(1, 1, 1, vec![42]).unwrap();
        assert_eq!(gray.to_rgb().pixel(0, 0), &[42, 42, 42]);
    }

    #[test]
    fn normalized_spans_unit_range() {
        let f = ScalarField::new(4, 1, vec![2.0, 4.0, 6.0, 10.0]).unwrap();
        let n = f.normalized();
        assert_eq!(n.data(), &[0.0, 0.25, 0.5, 1.0]);
    }

    #[test]
    fn normalized_constant_field_is_zero() {
        let f = ScalarField::filled(3, 3, 0.5).unwrap();
        assert!(f.normalized().data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn grayscale_quantises_with_rounding_and_clamp() {
        let f = ScalarField::new(4, 1, vec![-3.0, 12.4, 12.6, 300.0]).unwrap();
        let g = GrayscaleBuffer::from_field(&f);
        assert_eq!(g.data(), &[0, 12, 13, 255]);
        assert_eq!(g.to_field().get(3, 0), 255.0);
    }
}
