//! Reading and writing image files as ViewFx buffers.

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use image::DynamicImage;
use viewfx_core::{BitDepth, Components, ImageBuffer, PixelData, RectI};

/// Channel storage used while processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Depth {
    U8,
    #[default]
    U16,
    F32,
}

impl From<Depth> for BitDepth {
    fn from(depth: Depth) -> Self {
        match depth {
            Depth::U8 => BitDepth::UByte,
            Depth::U16 => BitDepth::UShort,
            Depth::F32 => BitDepth::Float,
        }
    }
}

/// Load `path` as an RGBA buffer at `depth`. Floats are normalised to `[0, 1]`.
pub fn load(path: &Path, depth: Depth) -> Result<ImageBuffer> {
    let img = image::open(path).with_context(|| format!("failed to open image: {}", path.display()))?;
    let bounds = RectI::from_size(img.width(), img.height());
    let buffer = match depth {
        Depth::U8 => ImageBuffer::from_pixels(bounds, Components::Rgba, img.into_rgba8().into_raw()),
        Depth::U16 => ImageBuffer::from_pixels(bounds, Components::Rgba, img.into_rgba16().into_raw()),
        Depth::F32 => ImageBuffer::from_pixels(bounds, Components::Rgba, img.into_rgba32f().into_raw()),
    }?;
    tracing::debug!(path = %path.display(), ?depth, width = bounds.width(), height = bounds.height(), "image loaded");
    Ok(buffer)
}

/// Save an RGBA buffer. The file format follows the extension; float data
/// is written as 16-bit unless the format stores floats.
pub fn save(path: &Path, buffer: ImageBuffer) -> Result<()> {
    if buffer.components() != Components::Rgba {
        anyhow::bail!("only RGBA buffers can be saved, got {:?}", buffer.components());
    }
    let bounds = buffer.bounds();
    let (width, height) = (bounds.width() as u32, bounds.height() as u32);
    let size_error = || anyhow::anyhow!("pixel data does not fill a {}x{} image", width, height);

    let dynamic = match buffer.into_data() {
        PixelData::UByte(data) => {
            DynamicImage::ImageRgba8(image::RgbaImage::from_raw(width, height, data).ok_or_else(size_error)?)
        }
        PixelData::UShort(data) => DynamicImage::ImageRgba16(
            image::ImageBuffer::from_raw(width, height, data).ok_or_else(size_error)?,
        ),
        PixelData::Float(data) => {
            DynamicImage::ImageRgba32F(image::Rgba32FImage::from_raw(width, height, data).ok_or_else(size_error)?)
        }
    };

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let dynamic = match extension.as_str() {
        "jpg" | "jpeg" => DynamicImage::ImageRgb8(dynamic.to_rgb8()),
        "exr" => DynamicImage::ImageRgba32F(dynamic.to_rgba32f()),
        _ if matches!(dynamic, DynamicImage::ImageRgba32F(_)) => DynamicImage::ImageRgba16(dynamic.to_rgba16()),
        _ => dynamic,
    };
    dynamic
        .save(path)
        .with_context(|| format!("failed to write image: {}", path.display()))?;
    Ok(())
}
