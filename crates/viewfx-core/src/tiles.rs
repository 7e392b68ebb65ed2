//! Tile scheduler: fans a render window out to workers as disjoint row bands.

use std::slice::ChunksMut;
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::RenderConfig;
use crate::error::{ViewFxError, ViewFxResult};
use crate::geometry::RectI;
use crate::host::AbortFlag;
use crate::image::{Pixel, PlaneMut};

/// Splits render windows into row bands and runs them on a thread pool.
///
/// The pool belongs to whoever built the scheduler (usually the host side);
/// without one the global rayon pool is used.
#[derive(Debug, Clone, Default)]
pub struct TileScheduler {
    pool: Option<Arc<rayon::ThreadPool>>,
    bands: Option<usize>,
}

impl TileScheduler {
    pub fn new(pool: Option<Arc<rayon::ThreadPool>>) -> Self {
        Self { pool, bands: None }
    }

    /// Build a dedicated pool sized by `config.threads`.
    pub fn from_config(config: &RenderConfig) -> ViewFxResult<Self> {
        let pool = match config.threads {
            Some(threads) => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("viewfx-band-{}", i))
                    .build()
                    .map_err(|e| ViewFxError::Config(format!("failed to build thread pool: {}", e)))?,
            )),
            None => None,
        };
        Ok(Self {
            pool,
            bands: config.bands,
        })
    }

    /// Force a fixed band count instead of one band per worker.
    pub fn with_bands(mut self, bands: usize) -> Self {
        self.bands = Some(bands.max(1));
        self
    }

    /// A scheduler that processes every window as one band on the caller's thread.
    pub fn single_band() -> Self {
        Self {
            pool: None,
            bands: Some(1),
        }
    }

    pub fn band_count(&self) -> usize {
        self.bands.unwrap_or_else(|| match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        })
    }

    /// Run `f` once per band of `window`.
    ///
    /// Each band gets exclusive access to its rows of `dst`; pixels outside
    /// `window` are never handed out. Bands finish in any order.
    pub fn process_rows<P, F>(
        &self,
        dst: PlaneMut<'_, P>,
        window: RectI,
        abort: &AbortFlag,
        f: F,
    ) -> ViewFxResult<()>
    where
        P: Pixel,
        F: Fn(BandMut<'_, P>) + Send + Sync,
    {
        let (bounds, channels, stride, data) = dst.into_parts();
        if !bounds.contains(&window) {
            return Err(ViewFxError::InvalidArgument(format!(
                "render window {:?} is outside destination bounds {:?}",
                window, bounds
            )));
        }
        if window.is_empty() {
            return Ok(());
        }

        let bands = window.split_rows(self.band_count());
        tracing::debug!(bands = bands.len(), ?window, "dispatching row bands");

        let start = (window.y1 - bounds.y1) as usize * stride;
        let end = (window.y2 - bounds.y1) as usize * stride;
        let x_offset = (window.x1 - bounds.x1) as usize * channels;
        let row_len = window.width() as usize * channels;

        let mut rest = &mut data[start..end];
        let mut jobs = Vec::with_capacity(bands.len());
        for rect in bands {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(rect.height() as usize * stride);
            rest = tail;
            jobs.push(BandMut {
                rect,
                channels,
                stride,
                x_offset,
                row_len,
                data: head,
                abort,
            });
        }

        let run = || jobs.into_par_iter().for_each(|band| f(band));
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
        Ok(())
    }
}

/// Exclusive access to one band of the destination.
#[derive(Debug)]
pub struct BandMut<'a, P> {
    rect: RectI,
    channels: usize,
    stride: usize,
    x_offset: usize,
    row_len: usize,
    data: &'a mut [P],
    abort: &'a AbortFlag,
}

impl<'a, P: Pixel> BandMut<'a, P> {
    /// The band's pixel rectangle.
    pub fn rect(&self) -> RectI {
        self.rect
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Rows of the band, top to bottom, each trimmed to the window's x-span.
    /// Iteration ends early once an abort has been requested.
    pub fn rows(&mut self) -> BandRows<'_, P> {
        BandRows {
            rows: (self.rect.y1..self.rect.y2).zip(self.data.chunks_mut(self.stride)),
            x_offset: self.x_offset,
            row_len: self.row_len,
            abort: self.abort,
        }
    }
}

/// Iterator over `(y, row)` pairs of a band.
pub struct BandRows<'b, P> {
    rows: std::iter::Zip<std::ops::Range<i32>, ChunksMut<'b, P>>,
    x_offset: usize,
    row_len: usize,
    abort: &'b AbortFlag,
}

impl<'b, P> Iterator for BandRows<'b, P> {
    type Item = (i32, &'b mut [P]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.abort.is_requested() {
            return None;
        }
        let (y, chunk) = self.rows.next()?;
        Some((y, &mut chunk[self.x_offset..self.x_offset + self.row_len]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Components, ImageBuffer, PixelData};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fill_with_row_index(scheduler: &TileScheduler, img: &mut ImageBuffer, window: RectI) {
        let abort = AbortFlag::new();
        let plane = img.view_mut().typed_mut::<u16>().unwrap();
        scheduler
            .process_rows(plane, window, &abort, |mut band| {
                for (y, row) in band.rows() {
                    row.fill(y as u16 + 1);
                }
            })
            .unwrap();
    }

    #[test]
    fn test_bands_only_touch_window() {
        let bounds = RectI::new(0, 0, 6, 6);
        let mut img = ImageBuffer::new(bounds, crate::image::BitDepth::UShort, Components::Alpha);
        let window = RectI::new(1, 2, 4, 5);
        fill_with_row_index(&TileScheduler::default().with_bands(3), &mut img, window);

        for y in 0..6 {
            for x in 0..6 {
                let v = img.pixel::<u16>(x, y).unwrap()[0];
                if window.contains_point(x, y) {
                    assert_eq!(v, y as u16 + 1, "inside at ({}, {})", x, y);
                } else {
                    assert_eq!(v, 0, "outside at ({}, {})", x, y);
                }
            }
        }
    }

    #[test]
    fn test_band_count_does_not_change_output() {
        let bounds = RectI::new(-3, -2, 9, 11);
        let window = RectI::new(-1, 0, 7, 10);
        let mut one = ImageBuffer::new(bounds, crate::image::BitDepth::UShort, Components::Rgb);
        let mut many = one.clone();
        fill_with_row_index(&TileScheduler::single_band(), &mut one, window);
        fill_with_row_index(&TileScheduler::default().with_bands(7), &mut many, window);
        assert_eq!(one, many);
    }

    #[test]
    fn test_every_band_runs_once() {
        let mut img = ImageBuffer::new(RectI::from_size(4, 16), crate::image::BitDepth::UByte, Components::Rgba);
        let calls = AtomicUsize::new(0);
        let abort = AbortFlag::new();
        let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap());
        let scheduler = TileScheduler::new(Some(pool));
        assert_eq!(scheduler.band_count(), 4);
        scheduler
            .process_rows(img.view_mut().typed_mut::<u8>().unwrap(), RectI::from_size(4, 16), &abort, |band| {
                assert_eq!(band.rect().height(), 4);
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_abort_stops_rows() {
        let mut img = ImageBuffer::new(RectI::from_size(2, 8), crate::image::BitDepth::UByte, Components::Alpha);
        let abort = AbortFlag::new();
        TileScheduler::single_band()
            .process_rows(img.view_mut().typed_mut::<u8>().unwrap(), RectI::from_size(2, 8), &abort, |mut band| {
                for (_, row) in band.rows() {
                    row.fill(9);
                    abort.request();
                }
            })
            .unwrap();
        match img.data() {
            PixelData::UByte(d) => {
                assert_eq!(&d[..2], &[9, 9]);
                assert!(d[2..].iter().all(|&v| v == 0));
            }
            other => panic!("unexpected storage {:?}", other),
        }
    }

    #[test]
    fn test_window_outside_bounds_is_rejected() {
        let mut img = ImageBuffer::new(RectI::from_size(4, 4), crate::image::BitDepth::Float, Components::Alpha);
        let abort = AbortFlag::new();
        let err = TileScheduler::default()
            .process_rows(img.view_mut().typed_mut::<f32>().unwrap(), RectI::new(0, 0, 5, 4), &abort, |_| {})
            .unwrap_err();
        assert!(matches!(err, ViewFxError::InvalidArgument(_)));
    }
}
