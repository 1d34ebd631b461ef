//! Smooth resizing of fields and colour buffers via the `image` crate.

use image::{ImageBuffer, Luma, imageops::FilterType};

use crate::{
    buffer::{PixelBuffer, ScalarField, validate_dimensions},
    codec::{from_dynamic, to_dynamic},
    error::PbrError,
};

/// Bicubic (Catmull-Rom) resize of a scalar field.
///
/// The resampler works on unit-range floats, so the field is mapped to
/// `[0, 1]` by its own min/max, resized, and mapped back.  Overshoot of the
/// cubic kernel is clipped to the original range.
pub fn resize_field(field: &ScalarField, width: u32, height: u32) -> Result<ScalarField, PbrError> {
    validate_dimensions(width, height)?;
    if field.dimensions() == (width, height) {
        return Ok(field.clone());
    }
    let (lo, hi) = field.min_max();
    let range = hi - lo;
    if range <= 0.0 {
        return ScalarField::filled(width, height, lo);
    }

    let unit: Vec<f32> = field.data().iter().map(|&v| (v - lo) / range).collect();
    let src: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(field.width(), field.height(), unit).ok_or_else(|| {
            PbrError::DimensionMismatch("scalar field does not match its dimensions".into())
        })?;
    let resized = image::imageops::resize(&src, width, height, FilterType::CatmullRom);
    let data = resized
        .into_raw()
        .into_iter()
        .map(|v| lo + v.clamp(0.0, 1.0) * range)
        .collect();
    ScalarField::new(width, height, data)
}

/// Bilinear resize of a colour buffer, keeping its channel count.
pub fn resize_pixels(buf: &PixelBuffer, width: u32, height: u32) -> Result<PixelBuffer, PbrError> {
    validate_dimensions(width, height)?;
    if buf.dimensions() == (width, height) {
        return Ok(buf.clone());
    }
    let resized = to_dynamic(buf)?.resize_exact(width, height, FilterType::Triangle);
    from_dynamic(resized, buf.channels())
}
