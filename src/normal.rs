//! Tangent-space normal maps and the gradient → normal encoding shared by
//! the edge and depth estimators.
//!
//! Each texel's candidate vector is `(gx, gy, z_bias)` where `gx`/`gy` are raw
//! Sobel responses.  The whole map is then range-compressed to `[0, 255]` by
//! min-max scaling across the image (not per texel), so a texel encodes
//! *relative* slope:
//!   R = X  (gradient toward +X, image right)
//!   G = Y  (gradient toward +Y, image down)
//!   B = Z
//!
//! Vectors are not unit length after encoding; consumers renormalize.

use crate::{
    buffer::{PixelBuffer, ScalarField},
    cancel::CancelToken,
    config::NormalNormalization,
    error::PbrError,
    filter::par_rows,
};

/// Encoding of an undeflected normal: zero X/Y, full Z.
pub const FLAT_NORMAL: [u8; 3] = [128, 128, 255];

/// An RGB8 buffer whose channels encode a perturbation vector per texel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalMap {
    buffer: PixelBuffer,
}

impl NormalMap {
    /// Wrap an existing buffer; it must have exactly three channels.
    pub fn new(buffer: PixelBuffer) -> Result<Self, PbrError> {
        if buffer.channels() != 3 {
            return Err(PbrError::InvalidImage(format!(
                "normal maps are RGB (got {} channels)",
                buffer.channels()
            )));
        }
        Ok(Self { buffer })
    }

    /// A map where every texel is [`FLAT_NORMAL`].
    pub fn flat(width: u32, height: u32) -> Result<Self, PbrError> {
        Ok(Self {
            buffer: PixelBuffer::filled(width, height, &FLAT_NORMAL)?,
        })
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    pub fn as_buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    pub fn into_buffer(self) -> PixelBuffer {
        self.buffer
    }

    #[inline]
    pub fn texel(&self, x: u32, y: u32) -> [u8; 3] {
        let p = self.buffer.pixel(x, y);
        [p[0], p[1], p[2]]
    }

    /// Decode one texel back to `[-1, 1]` per component (not renormalized).
    #[inline]
    pub fn vector(&self, x: u32, y: u32) -> [f32; 3] {
        self.texel(x, y).map(decode_component)
    }
}

#[inline]
pub(crate) fn decode_component(v: u8) -> f32 {
    v as f32 / 127.5 - 1.0
}

/// Per-component affine map onto `[0, 255]`, or a fixed byte when the
/// component has no range.
#[derive(Clone, Copy, Debug)]
enum ChannelScale {
    Linear { lo: f32, scale: f32 },
    Constant(u8),
}

impl ChannelScale {
    fn from_range(lo: f32, hi: f32, flat: u8) -> Self {
        if hi > lo {
            ChannelScale::Linear {
                lo,
                scale: 255.0 / (hi - lo),
            }
        } else {
            ChannelScale::Constant(flat)
        }
    }

    #[inline]
    fn apply(self, v: f32) -> u8 {
        match self {
            ChannelScale::Linear { lo, scale } => ((v - lo) * scale).round().clamp(0.0, 255.0) as u8,
            ChannelScale::Constant(c) => c,
        }
    }
}

/// Assemble `(gx, gy, z_bias)` per texel and min-max encode the map.
///
/// Under [`NormalNormalization::PerChannel`] the constant Z component always
/// encodes as 255 and a gradient-free input yields [`FLAT_NORMAL`]
/// everywhere.  Under [`NormalNormalization::Global`] one range spans all
/// three components.
pub fn encode_gradients(
    gx: &ScalarField,
    gy: &ScalarField,
    z_bias: f32,
    mode: NormalNormalization,
    cancel: &CancelToken,
) -> Result<NormalMap, PbrError> {
    if gx.dimensions() != gy.dimensions() {
        return Err(PbrError::DimensionMismatch(format!(
            "gradient fields differ: {:?} vs {:?}",
            gx.dimensions(),
            gy.dimensions()
        )));
    }
    if !z_bias.is_finite() || !gx.is_finite() || !gy.is_finite() {
        return Err(PbrError::InvalidImage(
            "gradients contain non-finite values".into(),
        ));
    }

    let (x_lo, x_hi) = gx.min_max();
    let (y_lo, y_hi) = gy.min_max();
    let scales = match mode {
        NormalNormalization::PerChannel => [
            ChannelScale::from_range(x_lo, x_hi, FLAT_NORMAL[0]),
            ChannelScale::from_range(y_lo, y_hi, FLAT_NORMAL[1]),
            ChannelScale::from_range(z_bias, z_bias, FLAT_NORMAL[2]),
        ],
        NormalNormalization::Global => {
            let lo = x_lo.min(y_lo).min(z_bias);
            let hi = x_hi.max(y_hi).max(z_bias);
            if hi > lo {
                [ChannelScale::from_range(lo, hi, 0); 3]
            } else {
                FLAT_NORMAL.map(ChannelScale::Constant)
            }
        }
    };

    let (width, height) = gx.dimensions();
    let w = width as usize;
    let (xs, ys) = (gx.data(), gy.data());
    let z = scales[2].apply(z_bias);

    let mut out = vec![0u8; w * height as usize * 3];
    par_rows(&mut out, w * 3, cancel, |y, row| {
        for (x, texel) in row.chunks_exact_mut(3).enumerate() {
            let i = y * w + x;
            texel[0] = scales[0].apply(xs[i]);
            texel[1] = scales[1].apply(ys[i]);
            texel[2] = z;
        }
    })?;

    Ok(NormalMap {
        buffer: PixelBuffer::from_parts(width, height, 3, out),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(w: u32, h: u32, data: Vec<f32>) -> ScalarField {
        ScalarField::new(w, h, data).unwrap()
    }

    #[test]
    fn zero_gradients_encode_flat_per_channel() {
        let zero = ScalarField::filled(5, 4, 0.0).unwrap();
        let map = encode_gradients(
            &zero,
            &zero,
            1.0,
            NormalNormalization::PerChannel,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(map, NormalMap::flat(5, 4).unwrap());
    }

    #[test]
    fn per_channel_spans_full_byte_range() {
        let gx = field(3, 1, vec![-2.0, 0.0, 2.0]);
        let gy = field(3, 1, vec![5.0, 5.0, 9.0]);
        let map = encode_gradients(
            &gx,
            &gy,
            1.0,
            NormalNormalization::PerChannel,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(map.texel(0, 0), [0, 0, 255]);
        assert_eq!(map.texel(1, 0), [128, 0, 255]);
        assert_eq!(map.texel(2, 0), [255, 255, 255]);
    }

    #[test]
    fn global_mode_shares_one_range() {
        let gx = field(2, 1, vec![0.0, 0.0]);
        let gy = field(2, 1, vec![0.0, 0.0]);
        let map = encode_gradients(
            &gx,
            &gy,
            255.0,
            NormalNormalization::Global,
            &CancelToken::new(),
        )
        .unwrap();
        // X/Y sit at the bottom of the shared range, Z at the top.
        assert_eq!(map.texel(0, 0), [0, 0, 255]);
    }

    #[test]
    fn mismatched_gradients_are_rejected() {
        let a = ScalarField::filled(2, 2, 0.0).unwrap();
        let b = ScalarField::filled(3, 2, 0.0).unwrap();
        let err = encode_gradients(
            &a,
            &b,
            1.0,
            NormalNormalization::PerChannel,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PbrError::DimensionMismatch(_)));
    }

    #[test]
    fn normal_map_requires_three_channels() {
        let rgba = PixelBuffer::filled(2, 2, &[0, 0, 0, 0]).unwrap();
        assert!(NormalMap::new(rgba).is_err());
        let flat = NormalMap::flat(1, 1).unwrap();
        let v = flat.vector(0, 0);
        assert!(v[0].abs() < 0.01 && v[1].abs() < 0.01 && v[2] == 1.0);
    }
}
