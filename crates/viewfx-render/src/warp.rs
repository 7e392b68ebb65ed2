//! The `TestWarp` effect: moves one mesh point of the source image from
//! `from` to `to`, on the GPU or with the software rasterizer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use viewfx_core::{
    BitDepth, ClipName, Components, Host, HostDescription, ImageEffect, ImageMut, ImageSource,
    MessageKind, ParamSet, ParamStore, ParamValue, PluginDescriptor, PointD, ProjectInfo, RectD,
    RenderArgs, RenderScale, RoiSetter, TileScheduler, ViewFxError, ViewFxResult,
};

use crate::backend::{select_backend, BackendKind, BackendState, CpuDriver, WarpJob};
use crate::mesh::{WarpDirection, WarpMesh};
use crate::raster::{clear_window, SampleOptions};
use crate::renderer_info::RendererInfo;
use crate::validate::{check_destination, check_source, require_destination};

pub const PARAM_FROM: &str = "from";
pub const PARAM_TO: &str = "to";
pub const PARAM_DIRECTION: &str = "direction";
pub const PARAM_MIPMAP: &str = "mipmap";
pub const PARAM_ANISOTROPIC: &str = "anisotropic";
pub const PARAM_ENABLE_GPU: &str = "enableGPU";
pub const PARAM_CPU_DRIVER: &str = "cpuDriver";
pub const PARAM_RENDERER_INFO: &str = "rendererInfo";
pub const PARAM_DEFAULTS_NORMALISED: &str = "defaultsNormalised";

pub const RENDERER_INFO_UNAVAILABLE: &str =
    "Renderer info not yet available.\nPlease execute at least one image render and try again.";

/// Hosts advertising GPU render under this name never call render with it.
const GPU_SHY_HOST_PREFIX: &str = "DaVinciResolve";

/// Switching GPU render from the effect side needs this API version.
const GPU_TOGGLE_API: (u32, u32) = (1, 4);

const DEFAULT_POINT: PointD = PointD { x: 0.5, y: 0.5 };

pub struct TestWarp {
    host: Arc<dyn Host>,
    params: Arc<dyn ParamStore>,
    scheduler: TileScheduler,
    backends: BackendState,
    renderer_info: RendererInfo,
    /// Whether this instance currently accepts GPU renders.
    gpu_render: AtomicBool,
}

impl TestWarp {
    pub const IDENTIFIER: &'static str = "net.sf.openfx.TestWarp";

    /// Create an instance with its own parameter set.
    pub fn new(host: Arc<dyn Host>, scheduler: TileScheduler) -> ViewFxResult<Self> {
        let params = ParamSet::new();
        Self::define_params(&params, host.description(), host.project())?;
        Self::with_params(host, Arc::new(params), scheduler)
    }

    /// Create an instance over a parameter store owned elsewhere.
    ///
    /// Point defaults the host could not declare as normalised are converted
    /// to canonical coordinates here, once.
    pub fn with_params(
        host: Arc<dyn Host>,
        params: Arc<dyn ParamStore>,
        scheduler: TileScheduler,
    ) -> ViewFxResult<Self> {
        if params.exists(PARAM_DEFAULTS_NORMALISED) && params.bool_at(PARAM_DEFAULTS_NORMALISED, 0.0)? {
            let project = host.project();
            for name in [PARAM_TO, PARAM_FROM] {
                let p = params.double2d_at(name, 0.0)?;
                params.set_value(name, ParamValue::Double2D(project.denormalise(p)))?;
            }
            params.set_value(PARAM_DEFAULTS_NORMALISED, ParamValue::Bool(false))?;
            tracing::debug!("denormalised point defaults");
        }

        let gpu_render = host_supports_gpu(host.description()) && params.bool_at(PARAM_ENABLE_GPU, 0.0)?;
        Ok(Self {
            backends: BackendState::new(scheduler.clone()),
            host,
            params,
            scheduler,
            renderer_info: RendererInfo::new(),
            gpu_render: AtomicBool::new(gpu_render),
        })
    }

    pub fn define_params(params: &ParamSet, host: &HostDescription, project: ProjectInfo) -> ViewFxResult<()> {
        let point = if host.supports_normalised_defaults {
            project.denormalise(DEFAULT_POINT)
        } else {
            DEFAULT_POINT
        };
        params.define(PARAM_FROM, ParamValue::Double2D(point));
        params.define(PARAM_TO, ParamValue::Double2D(point));
        params.define(PARAM_DIRECTION, ParamValue::Choice(WarpDirection::default().index()));
        params.define(PARAM_MIPMAP, ParamValue::Bool(true));
        params.define(PARAM_ANISOTROPIC, ParamValue::Bool(true));

        let gpu_default = host_supports_gpu(host) && !host.name.starts_with(GPU_SHY_HOST_PREFIX);
        params.define(PARAM_ENABLE_GPU, ParamValue::Bool(gpu_default));
        if !gpu_default || host.api_version < GPU_TOGGLE_API {
            params.set_enabled(PARAM_ENABLE_GPU, false)?;
        }

        params.define(PARAM_CPU_DRIVER, ParamValue::Choice(CpuDriver::default().index()));
        params.define_button(PARAM_RENDERER_INFO);
        if !host.supports_normalised_defaults {
            params.define(PARAM_DEFAULTS_NORMALISED, ParamValue::Bool(true));
            params.set_enabled(PARAM_DEFAULTS_NORMALISED, false)?;
        }
        Ok(())
    }

    pub fn params(&self) -> &dyn ParamStore {
        self.params.as_ref()
    }

    pub fn renderer_info(&self) -> &RendererInfo {
        &self.renderer_info
    }

    pub fn supports_gpu_render(&self) -> bool {
        self.gpu_render.load(Ordering::Acquire)
    }

    fn sample_options(&self, time: f64) -> ViewFxResult<SampleOptions> {
        Ok(SampleOptions {
            mipmap: self.params.bool_at(PARAM_MIPMAP, time)?,
            anisotropic: self.params.bool_at(PARAM_ANISOTROPIC, time)?,
        })
    }
}

fn host_supports_gpu(host: &HostDescription) -> bool {
    host.supports_gpu_render && cfg!(feature = "gpu")
}

impl ImageEffect for TestWarp {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            identifier: Self::IDENTIFIER,
            label: "TestWarpOFX",
            grouping: "Other/Test",
            description: "Test a mesh warp rendered on the GPU or with the software rasterizer.",
            version: (1, 0),
            bit_depths: vec![BitDepth::UByte, BitDepth::UShort, BitDepth::Float],
            components: vec![Components::Rgba, Components::Alpha],
            supports_tiles: true,
            supports_multi_resolution: true,
            supports_gpu_render: cfg!(feature = "gpu"),
        }
    }

    fn render(
        &self,
        args: &RenderArgs,
        sources: &dyn ImageSource,
        dst: Option<ImageMut<'_>>,
    ) -> ViewFxResult<()> {
        let dst = require_destination(dst)?;
        check_destination(self.host.as_ref(), args, &dst)?;
        if !matches!(dst.components(), Components::Rgba | Components::Alpha) {
            return Err(ViewFxError::unsupported(format!(
                "{:?} images cannot be warped",
                dst.components()
            )));
        }

        let time = args.time;
        let window = args.render_window;
        let Some(src) = sources.fetch(ClipName::Source, time, None) else {
            tracing::debug!(window = ?window, "no source image, clearing output");
            return clear_window(&self.scheduler, dst, window, &args.abort);
        };
        check_source("Source", &src, &dst)?;

        let from = self.params.double2d_at(PARAM_FROM, time)?;
        let to = self.params.double2d_at(PARAM_TO, time)?;
        let direction = WarpDirection::from_index(self.params.choice_at(PARAM_DIRECTION, time)?)?;
        let driver = CpuDriver::from_index(self.params.choice_at(PARAM_CPU_DRIVER, time)?)?;
        let options = self.sample_options(time)?;

        let kind = select_backend(args.gpu_enabled && self.supports_gpu_render())?;
        let renderer = self.backends.renderer(kind, driver)?;
        self.renderer_info.query_or_insert_with(|| renderer.describe());
        if kind == BackendKind::Gpu && options.mipmap {
            tracing::debug!("mipmapping is only available with CPU rendering");
        }

        let bounds = src.bounds();
        let src_rect = RectD::new(
            f64::from(bounds.x1),
            f64::from(bounds.y1),
            f64::from(bounds.x2),
            f64::from(bounds.y2),
        );
        let scale = args.render_scale;
        let mesh = WarpMesh::new(src_rect, from.scale(scale), to.scale(scale), direction);
        let triangles = mesh.triangles();

        tracing::debug!(
            time,
            backend = ?kind,
            driver = %driver,
            ?direction,
            window = ?window,
            "warping source"
        );
        renderer.render(WarpJob {
            src,
            dst,
            window,
            triangles: &triangles,
            options,
            abort: &args.abort,
        })
    }

    fn regions_of_interest(
        &self,
        time: f64,
        _scale: RenderScale,
        _window: RectD,
        sources: &dyn ImageSource,
        rois: &mut RoiSetter,
    ) {
        if let Some(rod) = sources.region_of_definition(ClipName::Source, time) {
            rois.set(ClipName::Source, rod);
        }
    }

    fn region_of_definition(
        &self,
        _time: f64,
        _scale: RenderScale,
        _sources: &dyn ImageSource,
    ) -> ViewFxResult<Option<RectD>> {
        Ok(Some(self.host.project().rect()))
    }

    fn changed_param(&self, name: &str, time: f64) -> ViewFxResult<()> {
        match name {
            PARAM_RENDERER_INFO => {
                let text = self.renderer_info.get();
                if text.is_empty() {
                    self.host.send_message(MessageKind::Message, RENDERER_INFO_UNAVAILABLE);
                } else {
                    self.host.send_message(MessageKind::Message, &text);
                }
            }
            PARAM_ENABLE_GPU => {
                let enabled = self.params.bool_at(PARAM_ENABLE_GPU, time)?
                    && host_supports_gpu(self.host.description());
                self.gpu_render.store(enabled, Ordering::Release);
                self.renderer_info.clear();
                tracing::debug!(enabled, "GPU render toggled");
            }
            PARAM_CPU_DRIVER => self.renderer_info.clear(),
            _ => {}
        }
        Ok(())
    }
}
