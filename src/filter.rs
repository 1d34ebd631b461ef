//! Separable convolution kernels: Gaussian blur and Sobel derivatives.
//!
//! All filters are applied as correlation (`out[x] = Σ k[i] · src[x + i - r]`),
//! so a derivative kernel `[-1, 0, 1]` yields a positive response where the
//! signal increases toward +X / +Y (right / down in image space).

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{buffer::ScalarField, cancel::CancelToken, error::PbrError};

/// Rows processed between two cancellation checks.
pub(crate) const ROWS_PER_CHUNK: usize = 32;

/// How pixel neighbours outside the image are fetched.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum BoundaryMode {
    /// Wrap indices toroidally, matching the seamless albedo and every
    /// map derived from it.
    #[default]
    Wrap,
    /// Repeat the edge texel.
    Clamp,
    /// Mirror about the edge texel without repeating it (`…2 1 | 0 1 2…`).
    Reflect,
}

impl BoundaryMode {
    /// Map a possibly out-of-range index onto `0..n`.
    #[inline]
    pub fn resolve(self, i: isize, n: usize) -> usize {
        let n_i = n as isize;
        match self {
            BoundaryMode::Wrap => i.rem_euclid(n_i) as usize,
            BoundaryMode::Clamp => i.clamp(0, n_i - 1) as usize,
            BoundaryMode::Reflect => {
                if n == 1 {
                    return 0;
                }
                let period = 2 * (n_i - 1);
                let m = i.rem_euclid(period);
                (if m < n_i { m } else { period - m }) as usize
            }
        }
    }
}

/// Normalised 1-D Gaussian with radius `ceil(3σ)`, capped so the kernel is
/// at most [`MAX_BLUR_KERNEL`](crate::config::MAX_BLUR_KERNEL) taps wide.
///
/// A non-positive or non-finite σ yields the identity kernel `[1]`.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return vec![1.0];
    }
    let max_radius = crate::config::MAX_BLUR_KERNEL / 2;
    let radius = ((3.0 * sigma).ceil() as usize).min(max_radius);
    gaussian_weights(radius, sigma)
}

/// Normalised 1-D Gaussian of odd width `size`.
///
/// Without an explicit σ the width-derived value OpenCV uses for `sigma = 0`
/// is applied: `0.3 · ((size − 1) / 2 − 1) + 0.8`.
pub fn gaussian_kernel_sized(size: usize, sigma: Option<f32>) -> Vec<f32> {
    let size = size.max(1) | 1;
    let sigma = sigma.unwrap_or(0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8);
    gaussian_weights(size / 2, sigma)
}

fn gaussian_weights(radius: usize, sigma: f32) -> Vec<f32> {
    let denom = 2.0 * sigma * sigma;
    let mut k: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let d = i as f32 - radius as f32;
            (-d * d / denom).exp()
        })
        .collect();
    let sum: f32 = k.iter().sum();
    k.iter_mut().for_each(|w| *w /= sum);
    k
}

/// Separable parts of a Sobel operator.
///
/// The X derivative is `derivative` along X combined with `smooth` along Y;
/// the Y derivative swaps the roles.
#[derive(Clone, Debug, PartialEq)]
pub struct SobelKernels {
    pub smooth: Vec<f32>,
    pub derivative: Vec<f32>,
}

/// Build Sobel kernels of odd aperture `size` (1..=31).
///
/// Size 1 is the bare central difference with no cross-smoothing; larger
/// sizes use binomial smoothing, e.g. size 5 gives
/// `smooth = [1, 4, 6, 4, 1]`, `derivative = [-1, -2, 0, 2, 1]`.
pub fn sobel_kernels(size: usize) -> Result<SobelKernels, PbrError> {
    if size == 0 || size % 2 == 0 || size > crate::config::MAX_SOBEL_KERNEL {
        return Err(PbrError::InvalidConfig(format!(
            "Sobel kernel size must be odd and in 1..={} (got {size})",
            crate::config::MAX_SOBEL_KERNEL
        )));
    }
    if size == 1 {
        return Ok(SobelKernels {
            smooth: vec![1.0],
            derivative: vec![-1.0, 0.0, 1.0],
        });
    }
    Ok(SobelKernels {
        smooth: binomial(size - 1),
        derivative: convolve_full(&binomial(size - 3), &[-1.0, 0.0, 1.0]),
    })
}

/// Coefficients of `(1 + x)^n`.
fn binomial(n: usize) -> Vec<f32> {
    let mut row = vec![1.0f32];
    for _ in 0..n {
        row = convolve_full(&row, &[1.0, 1.0]);
    }
    row
}

fn convolve_full(a: &[f32], b: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Fill `out` (a `width`-wide row-major raster) in parallel row chunks.
///
/// `f(y, row)` writes one row.  The cancellation token is checked before
/// each chunk; the first failed check aborts the whole fill.
pub(crate) fn par_rows<T, F>(
    out: &mut [T],
    width: usize,
    cancel: &CancelToken,
    f: F,
) -> Result<(), PbrError>
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync,
{
    out.par_chunks_mut(width * ROWS_PER_CHUNK)
        .enumerate()
        .try_for_each(|(chunk_idx, chunk)| {
            cancel.check()?;
            for (dy, row) in chunk.chunks_mut(width).enumerate() {
                f(chunk_idx * ROWS_PER_CHUNK + dy, row);
            }
            Ok(())
        })
}

/// Correlate `field` with `kx` along X, then `ky` along Y.
pub fn convolve_separable(
    field: &ScalarField,
    kx: &[f32],
    ky: &[f32],
    boundary: BoundaryMode,
    cancel: &CancelToken,
) -> Result<ScalarField, PbrError> {
    let (width, height) = field.dimensions();
    let w = width as usize;
    let h = height as usize;
    let src = field.data();

    let rx = (kx.len() / 2) as isize;
    let mut horizontal = vec![0.0f32; w * h];
    par_rows(&mut horizontal, w, cancel, |y, row| {
        let line = &src[y * w..(y + 1) * w];
        for (x, out) in row.iter_mut().enumerate() {
            *out = kx
                .iter()
                .enumerate()
                .map(|(i, &k)| k * line[boundary.resolve(x as isize + i as isize - rx, w)])
                .sum();
        }
    })?;

    let ry = (ky.len() / 2) as isize;
    let mut out = vec![0.0f32; w * h];
    par_rows(&mut out, w, cancel, |y, row| {
        for (i, &k) in ky.iter().enumerate() {
            let sy = boundary.resolve(y as isize + i as isize - ry, h);
            let line = &horizontal[sy * w..(sy + 1) * w];
            for (o, &v) in row.iter_mut().zip(line) {
                *o += k * v;
            }
        }
    })?;

    Ok(ScalarField::from_parts(width, height, out))
}

/// Isotropic Gaussian blur with the given 1-D kernel.
pub fn gaussian_blur(
    field: &ScalarField,
    kernel: &[f32],
    boundary: BoundaryMode,
    cancel: &CancelToken,
) -> Result<ScalarField, PbrError> {
    convolve_separable(field, kernel, kernel, boundary, cancel)
}

/// Horizontal and vertical Sobel responses `(gx, gy)`.
pub fn sobel(
    field: &ScalarField,
    kernels: &SobelKernels,
    boundary: BoundaryMode,
    cancel: &CancelToken,
) -> Result<(ScalarField, ScalarField), PbrError> {
    let gx = convolve_separable(field, &kernels.derivative, &kernels.smooth, boundary, cancel)?;
    let gy = convolve_separable(field, &kernels.smooth, &kernels.derivative, boundary, cancel)?;
    Ok((gx, gy))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn boundary_modes_resolve_out_of_range_indices() {
        assert_eq!(BoundaryMode::Wrap.resolve(-1, 5), 4);
        assert_eq!(BoundaryMode::Wrap.resolve(6, 5), 1);
        assert_eq!(BoundaryMode::Clamp.resolve(-3, 5), 0);
        assert_eq!(BoundaryMode::Clamp.resolve(9, 5), 4);
        assert_eq!(BoundaryMode::Reflect.resolve(-1, 5), 1);
        assert_eq!(BoundaryMode::Reflect.resolve(5, 5), 3);
        assert_eq!(BoundaryMode::Reflect.resolve(-2, 1), 0);
    }

    #[test]
    fn sobel_kernels_match_opencv_apertures() {
        let k3 = sobel_kernels(3).unwrap();
        assert_eq!(k3.smooth, vec![1.0, 2.0, 1.0]);
        assert_eq!(k3.derivative, vec![-1.0, 0.0, 1.0]);

        let k5 = sobel_kernels(5).unwrap();
        assert_eq!(k5.smooth, vec![1.0, 4.0, 6.0, 4.0, 1.0]);
        assert_eq!(k5.derivative, vec![-1.0, -2.0, 0.0, 2.0, 1.0]);

        let k7 = sobel_kernels(7).unwrap();
        assert_eq!(k7.derivative, vec![-1.0, -4.0, -5.0, 0.0, 5.0, 4.0, 1.0]);

        assert!(sobel_kernels(4).is_err());
        assert!(sobel_kernels(33).is_err());
    }

    #[test]
    fn gaussian_kernels_are_normalised_and_symmetric() {
        for k in [gaussian_kernel(1.5), gaussian_kernel_sized(15, None)] {
            assert!(approx(k.iter().sum(), 1.0));
            assert_eq!(k.len() % 2, 1);
            let n = k.len();
            for i in 0..n / 2 {
                assert!(approx(k[i], k[n - 1 - i]));
            }
        }
        assert_eq!(gaussian_kernel(1.5).len(), 11);
        assert_eq!(gaussian_kernel_sized(15, None).len(), 15);
        assert_eq!(gaussian_kernel(0.0), vec![1.0]);
        assert_eq!(gaussian_kernel(1e18).len(), crate::config::MAX_BLUR_KERNEL);
    }

    #[test]
    fn blur_of_constant_field_is_constant() {
        let field = ScalarField::filled(9, 7, 42.0).unwrap();
        let kernel = gaussian_kernel_sized(15, None);
        for mode in [BoundaryMode::Wrap, BoundaryMode::Clamp, BoundaryMode::Reflect] {
            let out = gaussian_blur(&field, &kernel, mode, &CancelToken::new()).unwrap();
            assert!(out.data().iter().all(|&v| approx(v, 42.0)), "{mode:?}");
        }
    }

    #[test]
    fn sobel_responds_to_ramp_direction() {
        // Value increases to the right only.
        let field = ScalarField::from_fn(16, 16, |x, _| x as f32).unwrap();
        let kernels = sobel_kernels(3).unwrap();
        let (gx, gy) = sobel(&field, &kernels, BoundaryMode::Clamp, &CancelToken::new()).unwrap();
        // Interior: derivative 2 per texel step, times smoothing sum 4.
        assert!(approx(gx.get(8, 8), 8.0));
        assert!(approx(gy.get(8, 8), 0.0));
    }

    #[test]
    fn cancelled_token_aborts_convolution() {
        let field = ScalarField::filled(8, 8, 1.0).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = gaussian_blur(&field, &gaussian_kernel(1.0), BoundaryMode::Wrap, &cancel);
        assert!(matches!(result, Err(PbrError::Cancelled)));
    }
}
