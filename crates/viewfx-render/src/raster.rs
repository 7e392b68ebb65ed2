//! Software rasterizer for the warp mesh.
//!
//! Every destination pixel centre is tested against the mesh triangles; the
//! last triangle in draw order that contains it supplies an affinely
//! interpolated texture coordinate, which is then filtered out of the source.
//! Pixels no triangle covers come out as zero.
//!
//! Filtering follows the usual texture-unit model: bilinear at texel centres,
//! transparent black outside the source, an optional box-filtered mip chain
//! with trilinear blending, and optional anisotropic taps along the major
//! axis of the pixel footprint. Footprints are constant per triangle because
//! the mapping is affine, so level selection happens once per triangle.

use viewfx_core::{
    AbortFlag, BandMut, BitDepth, Components, ImageMut, ImageRef, Pixel, Plane, PointD, RectI,
    TileScheduler, ViewFxError, ViewFxResult,
};

use crate::mesh::MeshTriangle;
use crate::validate::check_source;

/// Fractions closer than this to a texel centre snap onto it, so an identity
/// mapping reproduces the source exactly despite rounding in the mesh setup.
const SNAP: f64 = 1e-6;

/// Pixel centres this close outside a triangle edge still count as inside.
const EDGE_EPS: f64 = 1e-7;

pub const MAX_ANISOTROPY: usize = 16;

/// Texture filtering switches for one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleOptions {
    pub mipmap: bool,
    pub anisotropic: bool,
}

#[derive(Debug, Clone)]
struct MipLevel {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl MipLevel {
    fn texel<const N: usize>(&self, i: i64, j: i64) -> [f64; N] {
        if i < 0 || j < 0 || i as usize >= self.width || j as usize >= self.height {
            return [0.0; N];
        }
        let offset = (j as usize * self.width + i as usize) * N;
        std::array::from_fn(|c| self.data[offset + c])
    }

    /// 2x2 box filter; odd edges average the texels that exist.
    fn downsample<const N: usize>(&self) -> MipLevel {
        let width = self.width.div_ceil(2);
        let height = self.height.div_ceil(2);
        let mut data = vec![0.0; width * height * N];
        for j in 0..height {
            for i in 0..width {
                let mut sum = [0.0; N];
                let mut count = 0.0;
                for y in (2 * j)..(2 * j + 2).min(self.height) {
                    for x in (2 * i)..(2 * i + 2).min(self.width) {
                        let offset = (y * self.width + x) * N;
                        for c in 0..N {
                            sum[c] += self.data[offset + c];
                        }
                        count += 1.0;
                    }
                }
                let out = (j * width + i) * N;
                for c in 0..N {
                    data[out + c] = sum[c] / count;
                }
            }
        }
        MipLevel {
            width,
            height,
            data,
        }
    }
}

/// Reduced copies of a source image, level 1 (half size) down to 1x1.
/// Level 0 is the source itself and is not stored.
#[derive(Debug, Clone)]
pub struct MipChain<const N: usize> {
    levels: Vec<MipLevel>,
}

impl<const N: usize> MipChain<N> {
    pub fn build<P: Pixel>(base: &Plane<'_, P>) -> Self {
        let bounds = base.bounds();
        let width = bounds.width() as usize;
        let height = bounds.height() as usize;
        let mut levels = Vec::new();
        if width == 0 || height == 0 {
            return Self { levels };
        }

        let mut data = Vec::with_capacity(width * height * N);
        for y in bounds.y1..bounds.y2 {
            for x in bounds.x1..bounds.x2 {
                match base.pixel(x, y) {
                    Some(px) => data.extend(px.iter().take(N).map(|v| v.to_f64())),
                    None => data.extend([0.0; N]),
                }
            }
        }
        let mut current = MipLevel {
            width,
            height,
            data,
        };
        while current.width > 1 || current.height > 1 {
            let next = current.downsample::<N>();
            levels.push(next.clone());
            current = next;
        }
        Self { levels }
    }

    /// Number of levels including the source.
    pub fn level_count(&self) -> usize {
        self.levels.len() + 1
    }

    /// Size of `level`; level 0 is not stored and reports None.
    pub fn level_size(&self, level: usize) -> Option<(usize, usize)> {
        let l = self.levels.get(level.checked_sub(1)?)?;
        Some((l.width, l.height))
    }
}

/// Filtered reads from a source plane and its optional mip chain.
#[derive(Debug, Clone, Copy)]
pub struct Sampler<'a, P, const N: usize> {
    base: Plane<'a, P>,
    mips: Option<&'a MipChain<N>>,
}

impl<'a, P: Pixel, const N: usize> Sampler<'a, P, N> {
    pub fn new(base: Plane<'a, P>, mips: Option<&'a MipChain<N>>) -> Self {
        Self { base, mips }
    }

    fn max_lod(&self) -> f64 {
        self.mips.map_or(0.0, |m| m.levels.len() as f64)
    }

    /// Texel `(i, j)` of `level`, counted from the source origin.
    fn texel(&self, level: usize, i: i64, j: i64) -> [f64; N] {
        if level == 0 {
            let b = self.base.bounds();
            let x = i64::from(b.x1).saturating_add(i);
            let y = i64::from(b.y1).saturating_add(j);
            let (Ok(x), Ok(y)) = (i32::try_from(x), i32::try_from(y)) else {
                return [0.0; N];
            };
            return match self.base.pixel(x, y) {
                Some(px) => std::array::from_fn(|c| px[c].to_f64()),
                None => [0.0; N],
            };
        }
        match self.mips.and_then(|m| m.levels.get(level - 1)) {
            Some(l) => l.texel::<N>(i, j),
            None => [0.0; N],
        }
    }

    fn bilinear(&self, level: usize, u: f64, v: f64) -> [f64; N] {
        let (x0, tx) = split_texel(u - 0.5);
        let (y0, ty) = split_texel(v - 0.5);
        let a = self.texel(level, x0, y0);
        if tx == 0.0 && ty == 0.0 {
            return a;
        }
        let b = self.texel(level, x0.saturating_add(1), y0);
        let c = self.texel(level, x0, y0.saturating_add(1));
        let d = self.texel(level, x0.saturating_add(1), y0.saturating_add(1));
        std::array::from_fn(|k| {
            let top = a[k] * (1.0 - tx) + b[k] * tx;
            let bottom = c[k] * (1.0 - tx) + d[k] * tx;
            top * (1.0 - ty) + bottom * ty
        })
    }

    fn level_sample(&self, level: usize, ru: f64, rv: f64) -> [f64; N] {
        let size = f64::from(1u32 << level.min(31));
        self.bilinear(level, ru / size, rv / size)
    }

    /// Sample at source pixel coordinates `(u, v)` with level of detail `lod`.
    pub fn sample(&self, u: f64, v: f64, lod: f64) -> [f64; N] {
        let b = self.base.bounds();
        let ru = u - f64::from(b.x1);
        let rv = v - f64::from(b.y1);
        let lod = if lod.is_finite() {
            lod.clamp(0.0, self.max_lod())
        } else {
            0.0
        };
        let level = lod.floor() as usize;
        let frac = lod - level as f64;
        let near = self.level_sample(level, ru, rv);
        if frac < SNAP || level as f64 >= self.max_lod() {
            return near;
        }
        let far = self.level_sample(level + 1, ru, rv);
        std::array::from_fn(|k| near[k] * (1.0 - frac) + far[k] * frac)
    }
}

/// Split a texel-space coordinate into its integer texel and blend fraction.
fn split_texel(f: f64) -> (i64, f64) {
    let floor = f.floor();
    let mut texel = floor as i64;
    let mut t = f - floor;
    if t < SNAP {
        t = 0.0;
    } else if t > 1.0 - SNAP {
        texel = texel.saturating_add(1);
        t = 0.0;
    }
    (texel, t)
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    nx: f64,
    ny: f64,
    c: f64,
}

impl Edge {
    fn distance(&self, x: f64, y: f64) -> f64 {
        self.nx * x + self.ny * y + self.c
    }
}

/// A mesh triangle set up for scan conversion: edge equations, the affine
/// pixel-to-texture mapping and the filtering footprint.
#[derive(Debug, Clone, Copy)]
pub struct PreparedTriangle {
    min: PointD,
    max: PointD,
    edges: [Edge; 3],
    origin: PointD,
    uv0: PointD,
    /// (du/dx, du/dy)
    du: (f64, f64),
    /// (dv/dx, dv/dy)
    dv: (f64, f64),
    lod: f64,
    taps: usize,
    axis: PointD,
}

impl PreparedTriangle {
    /// None for degenerate (zero-area) triangles.
    pub fn new(tri: &MeshTriangle, options: SampleOptions) -> Option<Self> {
        let [p0, p1, p2] = tri.pos;
        let [t0, t1, t2] = tri.uv;
        let d1 = p1.sub(p0);
        let d2 = p2.sub(p0);
        let det = d1.x * d2.y - d2.x * d1.y;
        if !det.is_finite() || det.abs() < 1e-12 {
            return None;
        }

        let (du1, du2) = (t1.x - t0.x, t2.x - t0.x);
        let (dv1, dv2) = (t1.y - t0.y, t2.y - t0.y);
        let du = (
            (du1 * d2.y - du2 * d1.y) / det,
            (du2 * d1.x - du1 * d2.x) / det,
        );
        let dv = (
            (dv1 * d2.y - dv2 * d1.y) / det,
            (dv2 * d1.x - dv1 * d2.x) / det,
        );

        let sign = det.signum();
        let edge = |a: PointD, b: PointD| {
            let len = a.distance_squared(b).sqrt();
            let nx = -(b.y - a.y) * sign / len;
            let ny = (b.x - a.x) * sign / len;
            Edge {
                nx,
                ny,
                c: -(nx * a.x + ny * a.y),
            }
        };

        let along_x = (du.0 * du.0 + dv.0 * dv.0).sqrt();
        let along_y = (du.1 * du.1 + dv.1 * dv.1).sqrt();
        let (major, minor, axis) = if along_x >= along_y {
            (along_x, along_y, PointD::new(du.0, dv.0))
        } else {
            (along_y, along_x, PointD::new(du.1, dv.1))
        };
        let taps = if options.anisotropic && major > 0.0 {
            let ratio = if minor > 0.0 {
                major / minor
            } else {
                MAX_ANISOTROPY as f64
            };
            (ratio.ceil() as usize).clamp(1, MAX_ANISOTROPY)
        } else {
            1
        };
        let lod = if options.mipmap && major > 0.0 {
            (major / taps as f64).log2().max(0.0)
        } else {
            0.0
        };

        Some(Self {
            min: PointD::new(p0.x.min(p1.x).min(p2.x), p0.y.min(p1.y).min(p2.y)),
            max: PointD::new(p0.x.max(p1.x).max(p2.x), p0.y.max(p1.y).max(p2.y)),
            edges: [edge(p0, p1), edge(p1, p2), edge(p2, p0)],
            origin: p0,
            uv0: t0,
            du,
            dv,
            lod,
            taps,
            axis,
        })
    }

    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min.x - EDGE_EPS
            && x <= self.max.x + EDGE_EPS
            && y >= self.min.y - EDGE_EPS
            && y <= self.max.y + EDGE_EPS
            && self.edges.iter().all(|e| e.distance(x, y) >= -EDGE_EPS)
    }

    /// Texture coordinate at pixel position `(x, y)`.
    #[inline]
    pub fn texcoord(&self, x: f64, y: f64) -> PointD {
        let dx = x - self.origin.x;
        let dy = y - self.origin.y;
        PointD::new(
            self.uv0.x + self.du.0 * dx + self.du.1 * dy,
            self.uv0.y + self.dv.0 * dx + self.dv.1 * dy,
        )
    }

    pub fn lod(&self) -> f64 {
        self.lod
    }

    pub fn taps(&self) -> usize {
        self.taps
    }

    fn shade<P: Pixel, const N: usize>(&self, x: f64, y: f64, sampler: &Sampler<'_, P, N>) -> [f64; N] {
        let uv = self.texcoord(x, y);
        if self.taps == 1 {
            return sampler.sample(uv.x, uv.y, self.lod);
        }
        let mut acc = [0.0; N];
        let n = self.taps as f64;
        for i in 0..self.taps {
            let t = (i as f64 + 0.5) / n - 0.5;
            let s = sampler.sample(uv.x + self.axis.x * t, uv.y + self.axis.y * t, self.lod);
            for c in 0..N {
                acc[c] += s[c];
            }
        }
        acc.map(|v| v / n)
    }
}

/// Rasterize `triangles` (draw order) into one band of the destination.
pub fn rasterize_band<P: Pixel, const N: usize>(
    mut band: BandMut<'_, P>,
    triangles: &[PreparedTriangle],
    sampler: &Sampler<'_, P, N>,
) {
    let x1 = band.rect().x1;
    for (y, row) in band.rows() {
        let py = f64::from(y) + 0.5;
        for (i, out) in row.chunks_exact_mut(N).enumerate() {
            let px = f64::from(x1 + i as i32) + 0.5;
            let value = triangles
                .iter()
                .rev()
                .find(|t| t.contains(px, py))
                .map_or([0.0; N], |t| t.shade(px, py, sampler));
            for (o, v) in out.iter_mut().zip(value) {
                *o = P::from_f64(v);
            }
        }
    }
}

/// Warp `src` into `window` of `dst` through `triangles` (pixel space).
pub fn warp_image(
    scheduler: &TileScheduler,
    src: ImageRef<'_>,
    dst: ImageMut<'_>,
    window: RectI,
    triangles: &[MeshTriangle],
    options: SampleOptions,
    abort: &AbortFlag,
) -> ViewFxResult<()> {
    check_source("Source", &src, &dst)?;
    match dst.depth() {
        BitDepth::UByte => warp_depth::<u8>(scheduler, src, dst, window, triangles, options, abort),
        BitDepth::UShort => warp_depth::<u16>(scheduler, src, dst, window, triangles, options, abort),
        BitDepth::Float => warp_depth::<f32>(scheduler, src, dst, window, triangles, options, abort),
    }
}

fn warp_depth<P: Pixel>(
    scheduler: &TileScheduler,
    src: ImageRef<'_>,
    dst: ImageMut<'_>,
    window: RectI,
    triangles: &[MeshTriangle],
    options: SampleOptions,
    abort: &AbortFlag,
) -> ViewFxResult<()> {
    match dst.components() {
        Components::Alpha => warp_typed::<P, 1>(scheduler, src, dst, window, triangles, options, abort),
        Components::Rgb => warp_typed::<P, 3>(scheduler, src, dst, window, triangles, options, abort),
        Components::Rgba => warp_typed::<P, 4>(scheduler, src, dst, window, triangles, options, abort),
        Components::Xy => Err(ViewFxError::unsupported("two-channel images cannot be warped")),
    }
}

fn warp_typed<P: Pixel, const N: usize>(
    scheduler: &TileScheduler,
    src: ImageRef<'_>,
    dst: ImageMut<'_>,
    window: RectI,
    triangles: &[MeshTriangle],
    options: SampleOptions,
    abort: &AbortFlag,
) -> ViewFxResult<()> {
    let mismatch = || ViewFxError::Render("image storage does not match its bit depth".into());
    let src = src.typed::<P>().ok_or_else(mismatch)?;
    let dst = dst.typed_mut::<P>().ok_or_else(mismatch)?;

    let prepared: Vec<PreparedTriangle> = triangles
        .iter()
        .filter_map(|t| PreparedTriangle::new(t, options))
        .collect();
    let mips = (options.mipmap && prepared.iter().any(|t| t.lod > SNAP))
        .then(|| MipChain::<N>::build(&src));
    let sampler = Sampler::new(src, mips.as_ref());

    tracing::debug!(
        triangles = prepared.len(),
        mip_levels = mips.as_ref().map_or(1, |m| m.level_count()),
        anisotropic = options.anisotropic,
        "rasterizing warp mesh"
    );
    scheduler.process_rows(dst, window, abort, |band| {
        rasterize_band::<P, N>(band, &prepared, &sampler)
    })
}

/// Write zero into `window` of `dst`.
pub fn clear_window(
    scheduler: &TileScheduler,
    dst: ImageMut<'_>,
    window: RectI,
    abort: &AbortFlag,
) -> ViewFxResult<()> {
    match dst.depth() {
        BitDepth::UByte => clear_typed::<u8>(scheduler, dst, window, abort),
        BitDepth::UShort => clear_typed::<u16>(scheduler, dst, window, abort),
        BitDepth::Float => clear_typed::<f32>(scheduler, dst, window, abort),
    }
}

fn clear_typed<P: Pixel>(
    scheduler: &TileScheduler,
    dst: ImageMut<'_>,
    window: RectI,
    abort: &AbortFlag,
) -> ViewFxResult<()> {
    let plane = dst
        .typed_mut::<P>()
        .ok_or_else(|| ViewFxError::Render("destination storage does not match its bit depth".into()))?;
    scheduler.process_rows(plane, window, abort, |mut band| {
        for (_, row) in band.rows() {
            row.fill(P::default());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{WarpDirection, WarpMesh};
    use viewfx_core::{ImageBuffer, PixelData, RectD};

    fn gradient(width: u32, height: u32) -> ImageBuffer {
        let pixels: Vec<f32> = (0..width * height).map(|i| i as f32).collect();
        ImageBuffer::from_pixels(RectI::from_size(width, height), Components::Alpha, pixels).unwrap()
    }

    fn quad(bounds: RectD, uv: RectD) -> Vec<MeshTriangle> {
        let p = [
            PointD::new(bounds.x1, bounds.y1),
            PointD::new(bounds.x2, bounds.y1),
            PointD::new(bounds.x2, bounds.y2),
            PointD::new(bounds.x1, bounds.y2),
        ];
        let t = [
            PointD::new(uv.x1, uv.y1),
            PointD::new(uv.x2, uv.y1),
            PointD::new(uv.x2, uv.y2),
            PointD::new(uv.x1, uv.y2),
        ];
        vec![
            MeshTriangle {
                pos: [p[0], p[1], p[2]],
                uv: [t[0], t[1], t[2]],
            },
            MeshTriangle {
                pos: [p[0], p[2], p[3]],
                uv: [t[0], t[2], t[3]],
            },
        ]
    }

    #[test]
    fn test_split_texel_snaps_noise() {
        assert_eq!(split_texel(3.0000000001), (3, 0.0));
        assert_eq!(split_texel(2.9999999999), (3, 0.0));
        assert_eq!(split_texel(-0.5), (-1, 0.5));
    }

    #[test]
    fn test_bilinear_midpoint_and_border() {
        let src = ImageBuffer::from_pixels(
            RectI::from_size(2, 1),
            Components::Alpha,
            vec![0.0f32, 10.0],
        )
        .unwrap();
        let plane = src.view().typed::<f32>().unwrap();
        let sampler = Sampler::<f32, 1>::new(plane, None);
        assert_eq!(sampler.sample(1.0, 0.5, 0.0), [5.0]);
        assert_eq!(sampler.sample(1.5, 0.5, 0.0), [10.0]);
        // Half a texel past the right edge blends with transparent black.
        assert_eq!(sampler.sample(2.0, 0.5, 0.0), [5.0]);
        assert_eq!(sampler.sample(10.0, 0.5, 0.0), [0.0]);
    }

    #[test]
    fn test_mip_chain_box_filter() {
        let src = gradient(4, 2);
        let plane = src.view().typed::<f32>().unwrap();
        let chain = MipChain::<1>::build(&plane);
        assert_eq!(chain.level_count(), 3);
        assert_eq!(chain.level_size(1), Some((2, 1)));
        assert_eq!(chain.level_size(2), Some((1, 1)));
        // Level 1 texel 0 averages 0, 1, 4, 5.
        assert_eq!(chain.levels[0].data, vec![2.5, 4.5]);
        assert_eq!(chain.levels[1].data, vec![3.5]);
    }

    #[test]
    fn test_identity_mesh_reproduces_source() {
        let src = gradient(7, 5);
        let bounds = RectD::new(0.0, 0.0, 7.0, 5.0);
        let mesh = WarpMesh::new(
            bounds,
            PointD::new(2.3, 3.7),
            PointD::new(2.3, 3.7),
            WarpDirection::Forward,
        );
        let mut dst = ImageBuffer::new(RectI::from_size(7, 5), BitDepth::Float, Components::Alpha);
        warp_image(
            &TileScheduler::single_band(),
            src.view(),
            dst.view_mut(),
            RectI::from_size(7, 5),
            &mesh.triangles(),
            SampleOptions {
                mipmap: true,
                anisotropic: true,
            },
            &AbortFlag::new(),
        )
        .unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn test_uncovered_pixels_are_zero() {
        let src = ImageBuffer::filled(RectI::from_size(4, 4), Components::Rgba, &[9u8, 9, 9, 9]).unwrap();
        let tris = quad(RectD::new(0.0, 0.0, 2.0, 4.0), RectD::new(0.0, 0.0, 2.0, 4.0));
        let mut dst = ImageBuffer::filled(RectI::from_size(4, 4), Components::Rgba, &[1u8, 1, 1, 1]).unwrap();
        warp_image(
            &TileScheduler::single_band(),
            src.view(),
            dst.view_mut(),
            RectI::from_size(4, 4),
            &tris,
            SampleOptions::default(),
            &AbortFlag::new(),
        )
        .unwrap();
        assert_eq!(dst.pixel::<u8>(1, 1), Some(&[9u8, 9, 9, 9][..]));
        assert_eq!(dst.pixel::<u8>(2, 1), Some(&[0u8, 0, 0, 0][..]));
    }

    #[test]
    fn test_minification_selects_coarser_level() {
        // Squeeze an 8-wide source into 2 destination pixels.
        let tris = quad(RectD::new(0.0, 0.0, 2.0, 2.0), RectD::new(0.0, 0.0, 8.0, 2.0));
        let plain = PreparedTriangle::new(&tris[0], SampleOptions::default()).unwrap();
        assert_eq!(plain.lod(), 0.0);
        assert_eq!(plain.taps(), 1);

        let mipped = PreparedTriangle::new(
            &tris[0],
            SampleOptions {
                mipmap: true,
                anisotropic: false,
            },
        )
        .unwrap();
        assert_eq!(mipped.lod(), 2.0);

        let aniso = PreparedTriangle::new(
            &tris[0],
            SampleOptions {
                mipmap: true,
                anisotropic: true,
            },
        )
        .unwrap();
        assert_eq!(aniso.taps(), 4);
        assert_eq!(aniso.lod(), 0.0);
    }

    #[test]
    fn test_anisotropic_taps_average_along_major_axis() {
        let src = gradient(8, 1);
        let tris = quad(RectD::new(0.0, 0.0, 2.0, 1.0), RectD::new(0.0, 0.0, 8.0, 1.0));
        let mut dst = ImageBuffer::new(RectI::from_size(2, 1), BitDepth::Float, Components::Alpha);
        warp_image(
            &TileScheduler::single_band(),
            src.view(),
            dst.view_mut(),
            RectI::from_size(2, 1),
            &tris,
            SampleOptions {
                mipmap: false,
                anisotropic: true,
            },
            &AbortFlag::new(),
        )
        .unwrap();
        // Each pixel covers four texels; the taps land on their centres.
        assert_eq!(dst.data(), &PixelData::Float(vec![1.5, 5.5]));
    }

    #[test]
    fn test_degenerate_triangle_is_skipped() {
        let p = PointD::new(1.0, 1.0);
        let tri = MeshTriangle {
            pos: [p, p, PointD::new(2.0, 2.0)],
            uv: [p, p, p],
        };
        assert!(PreparedTriangle::new(&tri, SampleOptions::default()).is_none());
    }
}
