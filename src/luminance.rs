//! Luminance extraction and the two maps derived directly from it.
//!
//! Roughness is inverted luminance (bright texels read as smooth) and ambient
//! occlusion is heavily blurred luminance (locally averaged darkness).  Both
//! are heuristics, not measured material properties.

use serde::{Deserialize, Serialize};

use crate::{
    buffer::{GrayscaleBuffer, PixelBuffer},
    cancel::CancelToken,
    config::AoConfig,
    error::PbrError,
    filter::{BoundaryMode, gaussian_blur, gaussian_kernel_sized, par_rows},
};

/// RGB → gray weighting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LuminanceWeights {
    /// ITU-R BT.601 luma: `0.299 R + 0.587 G + 0.114 B`.
    #[default]
    Rec601,
    /// ITU-R BT.709 luma: `0.2126 R + 0.7152 G + 0.0722 B`.
    Rec709,
    /// Unweighted mean of R, G and B.
    Average,
}

impl LuminanceWeights {
    pub fn coefficients(self) -> [f32; 3] {
        match self {
            LuminanceWeights::Rec601 => [0.299, 0.587, 0.114],
            LuminanceWeights::Rec709 => [0.2126, 0.7152, 0.0722],
            LuminanceWeights::Average => [1.0 / 3.0; 3],
        }
    }

    /// Gray value of one texel.  Single- and dual-channel texels are already
    /// gray (the second channel is alpha); alpha is ignored for RGBA.
    #[inline]
    pub fn luma(self, texel: &[u8]) -> u8 {
        if texel.len() < 3 {
            return texel[0];
        }
        let [wr, wg, wb] = self.coefficients();
        let y = wr * texel[0] as f32 + wg * texel[1] as f32 + wb * texel[2] as f32;
        y.round().clamp(0.0, 255.0) as u8
    }
}

/// Convert a colour buffer to 8-bit luminance.
pub fn luminance(
    albedo: &PixelBuffer,
    weights: LuminanceWeights,
    cancel: &CancelToken,
) -> Result<GrayscaleBuffer, PbrError> {
    let (width, height) = albedo.dimensions();
    let w = width as usize;
    let c = albedo.channels() as usize;
    let stride = albedo.stride();
    let src = albedo.data();

    let mut gray = vec![0u8; w * height as usize];
    par_rows(&mut gray, w, cancel, |y, row| {
        let line = &src[y * stride..(y + 1) * stride];
        for (out, texel) in row.iter_mut().zip(line.chunks_exact(c)) {
            *out = weights.luma(texel);
        }
    })?;
    Ok(GrayscaleBuffer::from_parts(width, height, gray))
}

/// Roughness and AO derivation from a luminance channel.
#[derive(Clone, Debug)]
pub struct LuminanceDerivedMaps {
    ao_kernel: Vec<f32>,
    boundary: BoundaryMode,
}

impl LuminanceDerivedMaps {
    /// Precompute the AO kernel; `boundary` governs border texels of the blur.
    pub fn new(ao: &AoConfig, boundary: BoundaryMode) -> Self {
        Self {
            ao_kernel: gaussian_kernel_sized(ao.kernel_size, ao.sigma),
            boundary,
        }
    }

    /// `255 - luminance` per texel.
    pub fn roughness(&self, luminance: &GrayscaleBuffer) -> GrayscaleBuffer {
        let data = luminance.data().iter().map(|&v| !v).collect();
        GrayscaleBuffer::from_parts(luminance.width(), luminance.height(), data)
    }

    /// Gaussian-blurred luminance.
    pub fn ao(
        &self,
        luminance: &GrayscaleBuffer,
        cancel: &CancelToken,
    ) -> Result<GrayscaleBuffer, PbrError> {
        let blurred = gaussian_blur(&luminance.to_field(), &self.ao_kernel, self.boundary, cancel)?;
        Ok(GrayscaleBuffer::from_field(&blurred))
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    fn variance(data: &[u8]) -> f64 {
        let n = data.len() as f64;
        let mean = data.iter().map(|&v| v as f64).sum::<f64>() / n;
        data.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n
    }

    fn random_albedo(seed: u64, width: u32, height: u32) -> PixelBuffer {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..width * height * 3).map(|_| rng.random::<u8>()).collect();
        PixelBuffer::new(width, height, 3, data).unwrap()
    }

    #[test]
    fn rec601_matches_reference_values() {
        let w = LuminanceWeights::Rec601;
        assert_eq!(w.luma(&[255, 255, 255]), 255);
        assert_eq!(w.luma(&[0, 0, 0]), 0);
        assert_eq!(w.luma(&[255, 0, 0]), 76);
        assert_eq!(w.luma(&[0, 255, 0]), 150);
        assert_eq!(w.luma(&[128, 128, 128, 0]), 128);
        assert_eq!(w.luma(&[77, 255]), 77);
    }

    #[test]
    fn roughness_is_exact_inversion() {
        let albedo = random_albedo(11, 37, 23);
        let cancel = CancelToken::new();
        let lum = luminance(&albedo, LuminanceWeights::Rec601, &cancel).unwrap();
        let maps = LuminanceDerivedMaps::new(&AoConfig::default(), BoundaryMode::Wrap);
        let rough = maps.roughness(&lum);
        for (&r, &l) in rough.data().iter().zip(lum.data()) {
            assert_eq!(r as u16 + l as u16, 255);
        }
    }

    #[test]
    fn ao_never_increases_variance() {
        let cancel = CancelToken::new();
        let maps = LuminanceDerivedMaps::new(&AoConfig::default(), BoundaryMode::Wrap);
        for seed in 0..4 {
            let albedo = random_albedo(seed, 64, 48);
            let lum = luminance(&albedo, LuminanceWeights::Average, &cancel).unwrap();
            let ao = maps.ao(&lum, &cancel).unwrap();
            assert!(variance(ao.data()) <= variance(lum.data()));
        }
    }

    #[test]
    fn ao_of_flat_luminance_is_unchanged() {
        let lum = GrayscaleBuffer::filled(20, 20, 128).unwrap();
        let maps = LuminanceDerivedMaps::new(&AoConfig::default(), BoundaryMode::Reflect);
        let ao = maps.ao(&lum, &CancelToken::new()).unwrap();
        assert!(ao.data().iter().all(|&v| v == 128));
    }
}
