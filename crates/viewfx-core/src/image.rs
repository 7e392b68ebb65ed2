//! Pixel buffers and the borrowed views the effects render through.
//!
//! Host images are addressed by `(x, y)` inside their `bounds`; storage is
//! row-major starting at `bounds.y1`, with an explicit row stride counted in
//! channel elements. The effects never allocate or free host images, they only
//! see [`ImageRef`] / [`ImageMut`] views over them.

use serde::{Deserialize, Serialize};

use crate::error::{ViewFxError, ViewFxResult};
use crate::geometry::{RectI, RenderScale};

/// Storage type of a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitDepth {
    /// 8-bit unsigned integer.
    UByte,
    /// 16-bit unsigned integer.
    UShort,
    /// 32-bit float.
    Float,
}

impl BitDepth {
    pub fn bytes_per_channel(&self) -> usize {
        match self {
            BitDepth::UByte => 1,
            BitDepth::UShort => 2,
            BitDepth::Float => 4,
        }
    }
}

/// Channel layout of a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Components {
    /// Single alpha channel.
    Alpha,
    /// Two channels (motion vectors or disparity). Neither effect renders it.
    Xy,
    /// Red, green, blue.
    Rgb,
    /// Red, green, blue, alpha.
    Rgba,
}

impl Components {
    pub fn count(&self) -> usize {
        match self {
            Components::Alpha => 1,
            Components::Xy => 2,
            Components::Rgb => 3,
            Components::Rgba => 4,
        }
    }
}

/// Video field carried by an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Field {
    /// Progressive frame.
    #[default]
    None,
    /// Both fields interleaved.
    Both,
    Lower,
    Upper,
}

/// A channel storage type the effects can be instantiated over.
pub trait Pixel: Copy + Default + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    const DEPTH: BitDepth;

    fn to_f64(self) -> f64;

    /// Convert back to storage. Integer types round to nearest (half away
    /// from zero) and saturate at their range; floats convert as-is.
    fn from_f64(v: f64) -> Self;

    fn slice<'a>(data: PixelSlice<'a>) -> Option<&'a [Self]>;

    fn slice_mut<'a>(data: PixelSliceMut<'a>) -> Option<&'a mut [Self]>;

    fn into_data(pixels: Vec<Self>) -> PixelData;
}

impl Pixel for u8 {
    const DEPTH: BitDepth = BitDepth::UByte;

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64(v: f64) -> Self {
        v.round() as u8
    }

    fn slice<'a>(data: PixelSlice<'a>) -> Option<&'a [Self]> {
        match data {
            PixelSlice::UByte(d) => Some(d),
            _ => None,
        }
    }

    fn slice_mut<'a>(data: PixelSliceMut<'a>) -> Option<&'a mut [Self]> {
        match data {
            PixelSliceMut::UByte(d) => Some(d),
            _ => None,
        }
    }

    fn into_data(pixels: Vec<Self>) -> PixelData {
        PixelData::UByte(pixels)
    }
}

impl Pixel for u16 {
    const DEPTH: BitDepth = BitDepth::UShort;

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64(v: f64) -> Self {
        v.round() as u16
    }

    fn slice<'a>(data: PixelSlice<'a>) -> Option<&'a [Self]> {
        match data {
            PixelSlice::UShort(d) => Some(d),
            _ => None,
        }
    }

    fn slice_mut<'a>(data: PixelSliceMut<'a>) -> Option<&'a mut [Self]> {
        match data {
            PixelSliceMut::UShort(d) => Some(d),
            _ => None,
        }
    }

    fn into_data(pixels: Vec<Self>) -> PixelData {
        PixelData::UShort(pixels)
    }
}

impl Pixel for f32 {
    const DEPTH: BitDepth = BitDepth::Float;

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn slice<'a>(data: PixelSlice<'a>) -> Option<&'a [Self]> {
        match data {
            PixelSlice::Float(d) => Some(d),
            _ => None,
        }
    }

    fn slice_mut<'a>(data: PixelSliceMut<'a>) -> Option<&'a mut [Self]> {
        match data {
            PixelSliceMut::Float(d) => Some(d),
            _ => None,
        }
    }

    fn into_data(pixels: Vec<Self>) -> PixelData {
        PixelData::Float(pixels)
    }
}

/// Owned channel storage.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    UByte(Vec<u8>),
    UShort(Vec<u16>),
    Float(Vec<f32>),
}

impl PixelData {
    fn zeroed(depth: BitDepth, len: usize) -> Self {
        match depth {
            BitDepth::UByte => PixelData::UByte(vec![0; len]),
            BitDepth::UShort => PixelData::UShort(vec![0; len]),
            BitDepth::Float => PixelData::Float(vec![0.0; len]),
        }
    }

    pub fn depth(&self) -> BitDepth {
        match self {
            PixelData::UByte(_) => BitDepth::UByte,
            PixelData::UShort(_) => BitDepth::UShort,
            PixelData::Float(_) => BitDepth::Float,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PixelData::UByte(d) => d.len(),
            PixelData::UShort(d) => d.len(),
            PixelData::Float(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> PixelSlice<'_> {
        match self {
            PixelData::UByte(d) => PixelSlice::UByte(d),
            PixelData::UShort(d) => PixelSlice::UShort(d),
            PixelData::Float(d) => PixelSlice::Float(d),
        }
    }

    pub fn as_slice_mut(&mut self) -> PixelSliceMut<'_> {
        match self {
            PixelData::UByte(d) => PixelSliceMut::UByte(d),
            PixelData::UShort(d) => PixelSliceMut::UShort(d),
            PixelData::Float(d) => PixelSliceMut::Float(d),
        }
    }
}

/// Borrowed channel storage.
#[derive(Debug, Clone, Copy)]
pub enum PixelSlice<'a> {
    UByte(&'a [u8]),
    UShort(&'a [u16]),
    Float(&'a [f32]),
}

impl PixelSlice<'_> {
    pub fn depth(&self) -> BitDepth {
        match self {
            PixelSlice::UByte(_) => BitDepth::UByte,
            PixelSlice::UShort(_) => BitDepth::UShort,
            PixelSlice::Float(_) => BitDepth::Float,
        }
    }

    fn len(&self) -> usize {
        match self {
            PixelSlice::UByte(d) => d.len(),
            PixelSlice::UShort(d) => d.len(),
            PixelSlice::Float(d) => d.len(),
        }
    }
}

/// Mutably borrowed channel storage.
#[derive(Debug)]
pub enum PixelSliceMut<'a> {
    UByte(&'a mut [u8]),
    UShort(&'a mut [u16]),
    Float(&'a mut [f32]),
}

impl PixelSliceMut<'_> {
    pub fn depth(&self) -> BitDepth {
        match self {
            PixelSliceMut::UByte(_) => BitDepth::UByte,
            PixelSliceMut::UShort(_) => BitDepth::UShort,
            PixelSliceMut::Float(_) => BitDepth::Float,
        }
    }

    fn len(&self) -> usize {
        match self {
            PixelSliceMut::UByte(d) => d.len(),
            PixelSliceMut::UShort(d) => d.len(),
            PixelSliceMut::Float(d) => d.len(),
        }
    }
}

fn check_layout(bounds: RectI, components: Components, stride: usize, len: usize) -> ViewFxResult<()> {
    let row = bounds.width() as usize * components.count();
    if stride < row {
        return Err(ViewFxError::InvalidArgument(format!(
            "row stride {} shorter than a row of {} elements",
            stride, row
        )));
    }
    let needed = stride * bounds.height() as usize;
    if len < needed {
        return Err(ViewFxError::InvalidArgument(format!(
            "pixel storage holds {} elements, bounds {:?} need {}",
            len, bounds, needed
        )));
    }
    Ok(())
}

/// Host-side image storage. Used by tests and the CLI to stand in for the
/// host's own buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    bounds: RectI,
    components: Components,
    render_scale: RenderScale,
    field: Field,
    data: PixelData,
}

impl ImageBuffer {
    /// Create a zero-filled image.
    pub fn new(bounds: RectI, depth: BitDepth, components: Components) -> Self {
        let len = bounds.width() as usize * bounds.height() as usize * components.count();
        Self {
            bounds,
            components,
            render_scale: RenderScale::FULL,
            field: Field::None,
            data: PixelData::zeroed(depth, len),
        }
    }

    /// Wrap tightly packed pixels.
    pub fn from_pixels<P: Pixel>(
        bounds: RectI,
        components: Components,
        pixels: Vec<P>,
    ) -> ViewFxResult<Self> {
        let stride = bounds.width() as usize * components.count();
        check_layout(bounds, components, stride, pixels.len())?;
        Ok(Self {
            bounds,
            components,
            render_scale: RenderScale::FULL,
            field: Field::None,
            data: P::into_data(pixels),
        })
    }

    /// Create an image with every pixel set to `value`.
    pub fn filled<P: Pixel>(bounds: RectI, components: Components, value: &[P]) -> ViewFxResult<Self> {
        if value.len() != components.count() {
            return Err(ViewFxError::InvalidArgument(format!(
                "fill value has {} channels, layout {:?} has {}",
                value.len(),
                components,
                components.count()
            )));
        }
        let count = bounds.width() as usize * bounds.height() as usize;
        let pixels: Vec<P> = value.iter().copied().cycle().take(count * value.len()).collect();
        Self::from_pixels(bounds, components, pixels)
    }

    pub fn with_render_scale(mut self, scale: RenderScale) -> Self {
        self.render_scale = scale;
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.field = field;
        self
    }

    pub fn bounds(&self) -> RectI {
        self.bounds
    }

    pub fn depth(&self) -> BitDepth {
        self.data.depth()
    }

    pub fn components(&self) -> Components {
        self.components
    }

    pub fn data(&self) -> &PixelData {
        &self.data
    }

    pub fn into_data(self) -> PixelData {
        self.data
    }

    /// Channels of the pixel at `(x, y)`, or None outside bounds or on a depth mismatch.
    pub fn pixel<P: Pixel>(&self, x: i32, y: i32) -> Option<&[P]> {
        self.view().typed::<P>()?.pixel(x, y)
    }

    pub fn view(&self) -> ImageRef<'_> {
        ImageRef {
            bounds: self.bounds,
            components: self.components,
            stride: self.bounds.width() as usize * self.components.count(),
            render_scale: self.render_scale,
            field: self.field,
            data: self.data.as_slice(),
        }
    }

    pub fn view_mut(&mut self) -> ImageMut<'_> {
        ImageMut {
            bounds: self.bounds,
            components: self.components,
            stride: self.bounds.width() as usize * self.components.count(),
            render_scale: self.render_scale,
            field: self.field,
            data: self.data.as_slice_mut(),
        }
    }
}

/// Non-owning read-only view of a host image.
#[derive(Debug, Clone, Copy)]
pub struct ImageRef<'a> {
    bounds: RectI,
    components: Components,
    stride: usize,
    render_scale: RenderScale,
    field: Field,
    data: PixelSlice<'a>,
}

impl<'a> ImageRef<'a> {
    /// Wrap host memory. `stride` is the distance between rows in channel elements.
    pub fn new(
        bounds: RectI,
        components: Components,
        stride: usize,
        data: PixelSlice<'a>,
    ) -> ViewFxResult<Self> {
        check_layout(bounds, components, stride, data.len())?;
        Ok(Self {
            bounds,
            components,
            stride,
            render_scale: RenderScale::FULL,
            field: Field::None,
            data,
        })
    }

    pub fn with_render_scale(mut self, scale: RenderScale) -> Self {
        self.render_scale = scale;
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.field = field;
        self
    }

    pub fn bounds(&self) -> RectI {
        self.bounds
    }

    pub fn depth(&self) -> BitDepth {
        self.data.depth()
    }

    pub fn components(&self) -> Components {
        self.components
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn render_scale(&self) -> RenderScale {
        self.render_scale
    }

    pub fn field(&self) -> Field {
        self.field
    }

    /// Typed plane access; None when `P` is not this image's storage type.
    pub fn typed<P: Pixel>(&self) -> Option<Plane<'a, P>> {
        Some(Plane {
            bounds: self.bounds,
            channels: self.components.count(),
            stride: self.stride,
            data: P::slice(self.data)?,
        })
    }
}

/// Non-owning writable view of a host image.
#[derive(Debug)]
pub struct ImageMut<'a> {
    bounds: RectI,
    components: Components,
    stride: usize,
    render_scale: RenderScale,
    field: Field,
    data: PixelSliceMut<'a>,
}

impl<'a> ImageMut<'a> {
    pub fn new(
        bounds: RectI,
        components: Components,
        stride: usize,
        data: PixelSliceMut<'a>,
    ) -> ViewFxResult<Self> {
        check_layout(bounds, components, stride, data.len())?;
        Ok(Self {
            bounds,
            components,
            stride,
            render_scale: RenderScale::FULL,
            field: Field::None,
            data,
        })
    }

    pub fn with_render_scale(mut self, scale: RenderScale) -> Self {
        self.render_scale = scale;
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.field = field;
        self
    }

    pub fn bounds(&self) -> RectI {
        self.bounds
    }

    pub fn depth(&self) -> BitDepth {
        self.data.depth()
    }

    pub fn components(&self) -> Components {
        self.components
    }

    pub fn render_scale(&self) -> RenderScale {
        self.render_scale
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn typed_mut<P: Pixel>(self) -> Option<PlaneMut<'a, P>> {
        Some(PlaneMut {
            bounds: self.bounds,
            channels: self.components.count(),
            stride: self.stride,
            data: P::slice_mut(self.data)?,
        })
    }
}

/// Typed read-only plane.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a, P> {
    bounds: RectI,
    channels: usize,
    stride: usize,
    data: &'a [P],
}

impl<'a, P: Pixel> Plane<'a, P> {
    pub fn bounds(&self) -> RectI {
        self.bounds
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Channels of the pixel at `(x, y)`; None outside bounds.
    #[inline]
    pub fn pixel(&self, x: i32, y: i32) -> Option<&'a [P]> {
        if !self.bounds.contains_point(x, y) {
            return None;
        }
        let offset = (y - self.bounds.y1) as usize * self.stride
            + (x - self.bounds.x1) as usize * self.channels;
        self.data.get(offset..offset + self.channels)
    }

    /// The whole row `y` across the bounds.
    pub fn row(&self, y: i32) -> Option<&'a [P]> {
        if y < self.bounds.y1 || y >= self.bounds.y2 {
            return None;
        }
        let start = (y - self.bounds.y1) as usize * self.stride;
        self.data
            .get(start..start + self.bounds.width() as usize * self.channels)
    }
}

/// Typed writable plane, consumed by the tile scheduler.
#[derive(Debug)]
pub struct PlaneMut<'a, P> {
    bounds: RectI,
    channels: usize,
    stride: usize,
    data: &'a mut [P],
}

impl<'a, P: Pixel> PlaneMut<'a, P> {
    pub fn bounds(&self) -> RectI {
        self.bounds
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn pixel_mut(&mut self, x: i32, y: i32) -> Option<&mut [P]> {
        if !self.bounds.contains_point(x, y) {
            return None;
        }
        let offset = (y - self.bounds.y1) as usize * self.stride
            + (x - self.bounds.x1) as usize * self.channels;
        self.data.get_mut(offset..offset + self.channels)
    }

    pub(crate) fn into_parts(self) -> (RectI, usize, usize, &'a mut [P]) {
        (self.bounds, self.channels, self.stride, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_rounding_is_nearest() {
        assert_eq!(u8::from_f64(37.5), 38);
        assert_eq!(u8::from_f64(37.49), 37);
        assert_eq!(u8::from_f64(300.0), 255);
        assert_eq!(u8::from_f64(-4.0), 0);
        assert_eq!(u16::from_f64(65535.4), 65535);
        assert_eq!(f32::from_f64(1.25), 1.25);
    }

    #[test]
    fn test_pixel_addressing_uses_bounds() {
        let bounds = RectI::new(10, 20, 12, 22);
        let pixels: Vec<u8> = (0..16).collect();
        let img = ImageBuffer::from_pixels(bounds, Components::Rgba, pixels).unwrap();
        assert_eq!(img.pixel::<u8>(10, 20), Some(&[0u8, 1, 2, 3][..]));
        assert_eq!(img.pixel::<u8>(11, 21), Some(&[12u8, 13, 14, 15][..]));
        assert_eq!(img.pixel::<u8>(12, 21), None);
        assert_eq!(img.pixel::<u8>(0, 0), None);
        assert_eq!(img.pixel::<f32>(10, 20), None);
    }

    #[test]
    fn test_layout_validation_rejects_short_storage() {
        let bounds = RectI::from_size(4, 4);
        let err = ImageBuffer::from_pixels(bounds, Components::Rgb, vec![0u16; 10]).unwrap_err();
        assert!(matches!(err, ViewFxError::InvalidArgument(_)));
    }

    #[test]
    fn test_strided_view() {
        // Two rows of one RGB pixel, padded to 5 elements per row.
        let data = [1.0f32, 2.0, 3.0, -1.0, -1.0, 4.0, 5.0, 6.0, -1.0, -1.0];
        let view = ImageRef::new(
            RectI::from_size(1, 2),
            Components::Rgb,
            5,
            PixelSlice::Float(&data),
        )
        .unwrap();
        let plane = view.typed::<f32>().unwrap();
        assert_eq!(plane.pixel(0, 1), Some(&[4.0f32, 5.0, 6.0][..]));
        assert_eq!(plane.row(0), Some(&[1.0f32, 2.0, 3.0][..]));
    }

    #[test]
    fn test_filled_image() {
        let img = ImageBuffer::filled(RectI::from_size(2, 2), Components::Alpha, &[7u16]).unwrap();
        assert_eq!(img.depth(), BitDepth::UShort);
        assert_eq!(img.data(), &PixelData::UShort(vec![7; 4]));
        assert!(ImageBuffer::filled(RectI::from_size(2, 2), Components::Rgb, &[7u16]).is_err());
    }
}
