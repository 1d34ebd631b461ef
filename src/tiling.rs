//! Seam-tileable albedo from a single photograph.
//!
//! The image is cyclically shifted by half its width and height, which moves
//! the original borders into a cross through the centre: the new borders
//! wrap correctly, but the cross is visible.  A light Gaussian blur over the
//! whole image lowers the cross's contrast.  This is seam *masking*, not
//! content-aware inpainting; there is no guarantee the seam disappears.

use rayon::prelude::*;

use crate::{
    buffer::{PixelBuffer, ScalarField},
    cancel::CancelToken,
    config::TilingConfig,
    error::PbrError,
    filter::{BoundaryMode, gaussian_blur, gaussian_kernel, par_rows},
};

/// Toroidal shift by `(w / 2, h / 2)`:
/// `dst[x, y] = src[(x + w/2) mod w, (y + h/2) mod h]`.
///
/// Odd dimensions round the shift down, so the shift is its own inverse only
/// for even dimensions.
pub fn offset_half(image: &PixelBuffer) -> PixelBuffer {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    let c = image.channels() as usize;
    let (ox, oy) = (w / 2, h / 2);
    let stride = image.stride();
    let src = image.data();

    let mut out = vec![0u8; src.len()];
    out.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        let sy = (y + oy) % h;
        let line = &src[sy * stride..(sy + 1) * stride];
        // Rotating the row left by `ox` texels is exactly the X shift.
        let split = ox * c;
        row[..stride - split].copy_from_slice(&line[split..]);
        row[stride - split..].copy_from_slice(&line[..split]);
    });
    PixelBuffer::from_parts(width, height, image.channels(), out)
}

/// Makes a single photograph tile seamlessly.
///
/// Holds the precomputed seam-blur kernel so one tiler can be shared by every
/// run.  The blur always wraps at the borders, so its output stays tileable.
#[derive(Clone, Debug)]
pub struct SeamlessTiler {
    kernel: Vec<f32>,
}

impl Default for SeamlessTiler {
    fn default() -> Self {
        Self::new(&TilingConfig::default())
    }
}

impl SeamlessTiler {
    /// Build the seam-blur kernel from `config.seam_blur_sigma`.  A σ of `0`
    /// makes [`tile`](Self::tile) a pure shift.
    pub fn new(config: &TilingConfig) -> Self {
        Self {
            kernel: gaussian_kernel(config.seam_blur_sigma),
        }
    }

    /// Shift and seam-blur `image`.  Width, height and channel count are
    /// preserved.  Alpha (the last channel of 2- and 4-channel buffers) is
    /// shifted but not blurred.
    ///
    /// The blur always wraps at the borders so the result stays tileable.
    pub fn tile(&self, image: &PixelBuffer, cancel: &CancelToken) -> Result<PixelBuffer, PbrError> {
        if image.data().is_empty() || image.channels() == 0 {
            return Err(PbrError::InvalidImage("cannot tile an empty image".into()));
        }
        let shifted = offset_half(image);
        if self.kernel.len() == 1 {
            return Ok(shifted);
        }

        let (width, height) = shifted.dimensions();
        let c = shifted.channels() as usize;
        let colour_channels = if c % 2 == 0 { c - 1 } else { c };

        let blurred = (0..colour_channels)
            .into_par_iter()
            .map(|ch| {
                let plane = ScalarField::from_parts(
                    width,
                    height,
                    shifted.data().iter().skip(ch).step_by(c).map(|&v| v as f32).collect(),
                );
                gaussian_blur(&plane, &self.kernel, BoundaryMode::Wrap, cancel)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let w = width as usize;
        let src = shifted.data();
        let mut out = vec![0u8; src.len()];
        par_rows(&mut out, w * c, cancel, |y, row| {
            for (x, texel) in row.chunks_exact_mut(c).enumerate() {
                let i = y * w + x;
                for (ch, v) in texel.iter_mut().enumerate() {
                    *v = match blurred.get(ch) {
                        Some(plane) => plane.data()[i].round().clamp(0.0, 255.0) as u8,
                        None => src[i * c + ch],
                    };
                }
            }
        })?;
        Ok(PixelBuffer::from_parts(width, height, shifted.channels(), out))
    }
}
