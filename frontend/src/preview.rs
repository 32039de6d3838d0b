//! Savestate preview images as RGBA8 PNG.

use std::io::{Read, Write};

use dotmatrix_core::savestate::{CodecError, PreviewImage};

#[derive(Debug)]
pub enum PreviewError {
    Encode(png::EncodingError),
    Decode(png::DecodingError),
    /// Decoded fine, but not 8-bit RGBA.
    Format(String),
    Size(CodecError),
}

impl std::fmt::Display for PreviewError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "PNG encode failed: {e}"),
            Self::Decode(e) => write!(f, "PNG decode failed: {e}"),
            Self::Format(what) => write!(f, "unsupported preview format: {what}"),
            Self::Size(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PreviewError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Size(e) => Some(e),
            Self::Format(_) => None,
        }
    }
}

impl From<png::EncodingError> for PreviewError {
    fn from(e: png::EncodingError) -> Self {
        Self::Encode(e)
    }
}

impl From<png::DecodingError> for PreviewError {
    fn from(e: png::DecodingError) -> Self {
        Self::Decode(e)
    }
}

pub fn write_png(image: &PreviewImage, out: impl Write) -> Result<(), PreviewError> {
    let mut encoder = png::Encoder::new(out, image.width(), image.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(image.pixels())?;
    writer.finish()?;
    Ok(())
}

pub fn read_png(input: impl Read) -> Result<PreviewImage, PreviewError> {
    let decoder = png::Decoder::new(input);
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf)?;
    if info.color_type != png::ColorType::Rgba || info.bit_depth != png::BitDepth::Eight {
        return Err(PreviewError::Format(format!(
            "{:?} at {:?}",
            info.color_type, info.bit_depth
        )));
    }
    buf.truncate(info.buffer_size());
    PreviewImage::from_rgba(info.width, info.height, buf).map_err(PreviewError::Size)
}

pub fn encode(image: &PreviewImage) -> Result<Vec<u8>, PreviewError> {
    let mut out = Vec::new();
    write_png(image, &mut out)?;
    Ok(out)
}
