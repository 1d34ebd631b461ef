//! Weighted fusion of two normal maps.
//!
//! `alpha · a + (1 − alpha) · b`, per channel, on the encoded bytes.  The
//! result is not renormalized to unit length; renderers consuming the map
//! must renormalize after decoding.

use crate::{
    buffer::PixelBuffer,
    cancel::CancelToken,
    error::PbrError,
    filter::par_rows,
    normal::NormalMap,
    resample::resize_pixels,
};

/// Default weight of the first (depth-derived) map.
pub const DEFAULT_ALPHA: f32 = 0.6;

/// Weighted per-channel average of two encoded normal maps.
///
/// The result is not renormalised; decoded vectors may be slightly shorter
/// than unit length and renderers are expected to normalise on sampling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalBlender {
    alpha: f32,
}

impl Default for NormalBlender {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
        }
    }
}

impl NormalBlender {
    /// `alpha` weighs the first map and `1 - alpha` the second.
    pub fn new(alpha: f32) -> Result<Self, PbrError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(PbrError::InvalidConfig(format!(
                "blend alpha must be in [0, 1] (got {alpha})"
            )));
        }
        Ok(Self { alpha })
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Blend `b` into `a`; `b` is resized to `a`'s dimensions first if needed.
    pub fn blend(
        &self,
        a: &NormalMap,
        b: &NormalMap,
        cancel: &CancelToken,
    ) -> Result<NormalMap, PbrError> {
        let (width, height) = a.dimensions();
        let resized;
        let b_buf = if b.dimensions() == (width, height) {
            b.as_buffer()
        } else {
            resized = resize_pixels(b.as_buffer(), width, height)?;
            &resized
        };

        let alpha = self.alpha;
        let beta = 1.0 - alpha;
        let stride = width as usize * 3;
        let (src_a, src_b) = (a.as_buffer().data(), b_buf.data());

        let mut out = vec![0u8; src_a.len()];
        par_rows(&mut out, stride, cancel, |y, row| {
            let ra = &src_a[y * stride..(y + 1) * stride];
            let rb = &src_b[y * stride..(y + 1) * stride];
            for ((o, &va), &vb) in row.iter_mut().zip(ra).zip(rb) {
                *o = (alpha * va as f32 + beta * vb as f32)
                    .round()
                    .clamp(0.0, 255.0) as u8;
            }
        })?;

        NormalMap::new(PixelBuffer::from_parts(width, height, 3, out))
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    fn random_map(seed: u64, w: u32, h: u32) -> NormalMap {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..w * h * 3).map(|_| rng.random::<u8>()).collect();
        NormalMap::new(PixelBuffer::new(w, h, 3, data).unwrap()).unwrap()
    }

    #[test]
    fn blending_identical_maps_is_identity() {
        let a = random_map(1, 33, 17);
        for alpha in [0.0, 0.13, 0.5, DEFAULT_ALPHA, 0.97, 1.0] {
            let out = NormalBlender::new(alpha)
                .unwrap()
                .blend(&a, &a, &CancelToken::new())
                .unwrap();
            assert_eq!(out, a, "alpha={alpha}");
        }
    }

    #[test]
    fn endpoints_select_one_input() {
        let a = random_map(2, 20, 20);
        let b = random_map(3, 20, 20);
        let cancel = CancelToken::new();
        assert_eq!(NormalBlender::new(1.0).unwrap().blend(&a, &b, &cancel).unwrap(), a);
        assert_eq!(NormalBlender::new(0.0).unwrap().blend(&a, &b, &cancel).unwrap(), b);
    }

    #[test]
    fn default_weights_favour_first_map() {
        let a = NormalMap::new(PixelBuffer::filled(2, 2, &[200, 200, 255]).unwrap()).unwrap();
        let b = NormalMap::new(PixelBuffer::filled(2, 2, &[100, 100, 255]).unwrap()).unwrap();
        let out = NormalBlender::default()
            .blend(&a, &b, &CancelToken::new())
            .unwrap();
        assert_eq!(out.texel(1, 1), [160, 160, 255]);
    }

    #[test]
    fn second_map_is_resized_to_first() {
        let a = NormalMap::flat(16, 12).unwrap();
        let b = NormalMap::flat(5, 7).unwrap();
        let out = NormalBlender::new(0.3)
            .unwrap()
            .blend(&a, &b, &CancelToken::new())
            .unwrap();
        assert_eq!(out, a);
    }

    #[test]
    fn rejects_alpha_out_of_range() {
        assert!(NormalBlender::new(1.5).is_err());
        assert!(NormalBlender::new(-0.01).is_err());
    }
}
