//! Image file decoding and encoding.
//!
//! The pipeline only talks to the [`ImageCodec`] trait; [`FileCodec`] is the
//! default implementation backed by the `image` crate (PNG and JPEG).

use std::{
    fs::File,
    io::BufWriter,
    path::Path,
};

use image::{
    DynamicImage, ImageBuffer, ImageError, ImageFormat, ImageReader, codecs::jpeg::JpegEncoder,
};

use crate::{buffer::PixelBuffer, config::OutputFormat, error::PbrError};

/// Decodes and encodes raster files.
pub trait ImageCodec: Send + Sync {
    /// Decode the file at `path` into an RGB or RGBA buffer.
    fn decode(&self, path: &Path) -> Result<PixelBuffer, PbrError>;

    /// Encode `image` to `path` in `format`.
    fn encode(&self, image: &PixelBuffer, path: &Path, format: OutputFormat)
    -> Result<(), PbrError>;
}

/// [`ImageCodec`] over the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileCodec;

impl ImageCodec for FileCodec {
    fn decode(&self, path: &Path) -> Result<PixelBuffer, PbrError> {
        let reader = ImageReader::open(path)?
            .with_guessed_format()
            .map_err(PbrError::Io)?;
        let image = reader.decode().map_err(map_image_error)?;
        from_decoded(image)
    }

    fn encode(
        &self,
        image: &PixelBuffer,
        path: &Path,
        format: OutputFormat,
    ) -> Result<(), PbrError> {
        let dynamic = to_dynamic(image)?;
        match format {
            OutputFormat::Png => dynamic
                .save_with_format(path, ImageFormat::Png)
                .map_err(map_image_error),
            OutputFormat::Jpeg { quality } => {
                let writer = BufWriter::new(File::create(path)?);
                let mut encoder = JpegEncoder::new_with_quality(writer, quality);
                // JPEG carries no alpha; gray stays gray.
                let result = if image.channels() <= 2 {
                    encoder.encode_image(&dynamic.to_luma8())
                } else {
                    encoder.encode_image(&dynamic.to_rgb8())
                };
                result.map_err(map_image_error)
            }
        }
    }
}

/// Decode an in-memory PNG/JPEG file.
pub fn decode_bytes(bytes: &[u8]) -> Result<PixelBuffer, PbrError> {
    let image = image::load_from_memory(bytes).map_err(map_image_error)?;
    from_decoded(image)
}

/// Photos keep their alpha channel if they have one; everything else is RGB.
fn from_decoded(image: DynamicImage) -> Result<PixelBuffer, PbrError> {
    let channels = if image.color().has_alpha() { 4 } else { 3 };
    from_dynamic(image, channels)
}

fn map_image_error(err: ImageError) -> PbrError {
    match err {
        ImageError::Unsupported(e) => PbrError::UnsupportedFormat(e.to_string()),
        ImageError::Decoding(e) => PbrError::CorruptFile(e.to_string()),
        ImageError::IoError(e) => PbrError::Io(e),
        ImageError::Limits(e) => PbrError::InvalidImage(e.to_string()),
        ImageError::Parameter(e) => PbrError::InvalidImage(e.to_string()),
        ImageError::Encoding(e) => PbrError::Io(std::io::Error::other(e.to_string())),
    }
}

/// Convert a [`PixelBuffer`] into the matching `image` representation.
pub(crate) fn to_dynamic(buf: &PixelBuffer) -> Result<DynamicImage, PbrError> {
    let (w, h) = buf.dimensions();
    let raw = buf.data().to_vec();
    let dynamic = match buf.channels() {
        1 => ImageBuffer::from_raw(w, h, raw).map(DynamicImage::ImageLuma8),
        2 => ImageBuffer::from_raw(w, h, raw).map(DynamicImage::ImageLumaA8),
        3 => ImageBuffer::from_raw(w, h, raw).map(DynamicImage::ImageRgb8),
        4 => ImageBuffer::from_raw(w, h, raw).map(DynamicImage::ImageRgba8),
        _ => None,
    };
    dynamic.ok_or_else(|| {
        PbrError::InvalidImage(format!(
            "cannot represent a {}-channel {w}×{h} buffer",
            buf.channels()
        ))
    })
}

/// Convert an `image` value into a [`PixelBuffer`] with `channels` channels.
pub(crate) fn from_dynamic(image: DynamicImage, channels: u8) -> Result<PixelBuffer, PbrError> {
    let (w, h) = (image.width(), image.height());
    let raw = match channels {
        1 => image.into_luma8().into_raw(),
        2 => image.into_luma_alpha8().into_raw(),
        3 => image.into_rgb8().into_raw(),
        4 => image.into_rgba8().into_raw(),
        other => {
            return Err(PbrError::InvalidImage(format!(
                "channel count must be 1–4 (got {other})"
            )));
        }
    };
    PixelBuffer::new(w, h, channels, raw)
}
