//! Backend selection and the per-instance rendering contexts of the warp.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[cfg(feature = "gpu")]
use parking_lot::Mutex;
use viewfx_core::{
    AbortFlag, ImageMut, ImageRef, RectI, TileScheduler, ViewFxError, ViewFxResult,
};

#[cfg(feature = "gpu")]
use crate::gpu::GpuContext;
#[cfg(feature = "gpu")]
use crate::gpu_warp::GpuWarp;
use crate::mesh::MeshTriangle;
use crate::raster::{self, SampleOptions};

/// Which execution path serves a render call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Gpu,
    Software,
}

/// Choose the backend for one render call.
///
/// The GPU path wins when it was requested and is compiled in; otherwise the
/// software rasterizer is used if compiled in. Never cached: the host may
/// toggle GPU rendering between calls.
pub fn select_backend(gpu_requested: bool) -> ViewFxResult<BackendKind> {
    if gpu_requested && cfg!(feature = "gpu") {
        return Ok(BackendKind::Gpu);
    }
    if cfg!(feature = "software") {
        return Ok(BackendKind::Software);
    }
    Err(ViewFxError::BackendUnavailable(if gpu_requested {
        "no warp backend compiled in".to_string()
    } else {
        "GPU rendering not requested and the software rasterizer is not compiled in".to_string()
    }))
}

/// Driver used when rendering on the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuDriver {
    /// Single band on the calling thread. The only CPU driver with
    /// anisotropic filtering.
    Reference,
    /// Bands spread over the tile scheduler's pool.
    #[default]
    Threaded,
    /// wgpu's software fallback adapter running the GPU pipeline.
    Fallback,
}

impl CpuDriver {
    pub const ALL: [CpuDriver; 3] = [CpuDriver::Reference, CpuDriver::Threaded, CpuDriver::Fallback];

    pub fn from_index(index: usize) -> ViewFxResult<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| ViewFxError::param("cpuDriver", format!("no option at index {}", index)))
    }

    pub fn index(&self) -> usize {
        match self {
            CpuDriver::Reference => 0,
            CpuDriver::Threaded => 1,
            CpuDriver::Fallback => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CpuDriver::Reference => "reference",
            CpuDriver::Threaded => "threaded",
            CpuDriver::Fallback => "fallback",
        }
    }
}

impl fmt::Display for CpuDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CpuDriver {
    type Err = ViewFxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reference" => Ok(CpuDriver::Reference),
            "threaded" => Ok(CpuDriver::Threaded),
            "fallback" => Ok(CpuDriver::Fallback),
            other => Err(ViewFxError::param(
                "cpuDriver",
                format!("unknown driver '{}' (expected reference, threaded or fallback)", other),
            )),
        }
    }
}

/// Everything one warp render needs, in pixel space.
pub struct WarpJob<'a> {
    pub src: ImageRef<'a>,
    pub dst: ImageMut<'a>,
    pub window: RectI,
    pub triangles: &'a [MeshTriangle],
    pub options: SampleOptions,
    pub abort: &'a AbortFlag,
}

/// A warp execution path.
pub trait WarpRenderer: Send + Sync {
    fn render(&self, job: WarpJob<'_>) -> ViewFxResult<()>;

    /// Human-readable description of the driver behind this renderer.
    fn describe(&self) -> String;
}

/// The embedded CPU rasterizer.
pub struct SoftwareRenderer {
    driver: CpuDriver,
    scheduler: TileScheduler,
}

impl SoftwareRenderer {
    /// `driver` must be `Reference` or `Threaded`.
    pub fn new(driver: CpuDriver, scheduler: TileScheduler) -> ViewFxResult<Self> {
        let scheduler = match driver {
            CpuDriver::Reference => TileScheduler::single_band(),
            CpuDriver::Threaded => scheduler,
            CpuDriver::Fallback => {
                return Err(ViewFxError::InvalidArgument(
                    "the fallback driver runs on wgpu, not on the software rasterizer".into(),
                ))
            }
        };
        Ok(Self { driver, scheduler })
    }

    pub fn driver(&self) -> CpuDriver {
        self.driver
    }

    fn supports_anisotropic(&self) -> bool {
        self.driver == CpuDriver::Reference
    }
}

impl WarpRenderer for SoftwareRenderer {
    fn render(&self, job: WarpJob<'_>) -> ViewFxResult<()> {
        let options = SampleOptions {
            mipmap: job.options.mipmap,
            anisotropic: job.options.anisotropic && self.supports_anisotropic(),
        };
        raster::warp_image(
            &self.scheduler,
            job.src,
            job.dst,
            job.window,
            job.triangles,
            options,
            job.abort,
        )
    }

    fn describe(&self) -> String {
        let filtering = if self.supports_anisotropic() {
            "bilinear, mipmap, anisotropic x16"
        } else {
            "bilinear, mipmap"
        };
        format!(
            "ViewFx software rasterizer\ndriver: {}\nbands per render: {}\nfiltering: {}",
            self.driver,
            self.scheduler.band_count(),
            filtering
        )
    }
}

/// Rendering contexts of one effect instance.
///
/// GPU contexts go from uninitialized to acquired on the first render that
/// needs them and are torn down with the instance. The locks guard only the
/// slot; device creation runs unlocked and the first stored context wins.
pub struct BackendState {
    scheduler: TileScheduler,
    #[cfg(feature = "gpu")]
    gpu: Mutex<Option<Arc<GpuWarp>>>,
    #[cfg(feature = "gpu")]
    fallback: Mutex<Option<Arc<GpuWarp>>>,
}

impl BackendState {
    pub fn new(scheduler: TileScheduler) -> Self {
        Self {
            scheduler,
            #[cfg(feature = "gpu")]
            gpu: Mutex::new(None),
            #[cfg(feature = "gpu")]
            fallback: Mutex::new(None),
        }
    }

    /// The renderer for `kind`; `driver` picks among the CPU paths.
    pub fn renderer(&self, kind: BackendKind, driver: CpuDriver) -> ViewFxResult<Arc<dyn WarpRenderer>> {
        match (kind, driver) {
            (BackendKind::Gpu, _) => self.gpu_renderer(false),
            (BackendKind::Software, CpuDriver::Fallback) => self.gpu_renderer(true),
            (BackendKind::Software, driver) => {
                Ok(Arc::new(SoftwareRenderer::new(driver, self.scheduler.clone())?))
            }
        }
    }

    /// True once the context for `fallback` has been acquired.
    #[cfg(feature = "gpu")]
    pub fn has_context(&self, fallback: bool) -> bool {
        self.slot(fallback).lock().is_some()
    }

    #[cfg(not(feature = "gpu"))]
    pub fn has_context(&self, _fallback: bool) -> bool {
        false
    }

    #[cfg(feature = "gpu")]
    fn slot(&self, fallback: bool) -> &Mutex<Option<Arc<GpuWarp>>> {
        if fallback {
            &self.fallback
        } else {
            &self.gpu
        }
    }

    #[cfg(feature = "gpu")]
    fn gpu_renderer(&self, fallback: bool) -> ViewFxResult<Arc<dyn WarpRenderer>> {
        let slot = self.slot(fallback);
        if let Some(warp) = slot.lock().as_ref() {
            return Ok(warp.clone());
        }

        let context = GpuContext::init(fallback)?;
        let warp = Arc::new(GpuWarp::new(Arc::new(context)));
        let mut guard = slot.lock();
        let stored = guard.get_or_insert(warp).clone();
        Ok(stored)
    }

    #[cfg(not(feature = "gpu"))]
    fn gpu_renderer(&self, fallback: bool) -> ViewFxResult<Arc<dyn WarpRenderer>> {
        Err(ViewFxError::BackendUnavailable(if fallback {
            "the fallback CPU driver needs the `gpu` feature".to_string()
        } else {
            "GPU rendering is not compiled in".to_string()
        }))
    }
}

impl Drop for BackendState {
    fn drop(&mut self) {
        #[cfg(feature = "gpu")]
        {
            let gpu = self.gpu.get_mut().take().is_some();
            let fallback = self.fallback.get_mut().take().is_some();
            if gpu || fallback {
                tracing::info!(gpu, fallback, "releasing warp contexts");
            }
        }
    }
}
