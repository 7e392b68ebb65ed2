//! Stereo view mixing: `dst = left * (1 - w) + right * w`, per channel.

use std::sync::Arc;

use viewfx_core::{
    AbortFlag, BandMut, BitDepth, ClipName, Components, Host, ImageEffect, ImageMut, ImageRef,
    ImageSource, ParamSet, ParamStore, ParamValue, Pixel, Plane, PluginDescriptor, RectD, RectI,
    RenderArgs, RenderScale, RoiSetter, TileScheduler, ViewFxError, ViewFxResult,
};

use crate::validate::{check_destination, check_source, require_destination};

pub const PARAM_MIX: &str = "mix";

const LEFT_VIEW: usize = 0;
const RIGHT_VIEW: usize = 1;

/// Blend one band. An absent source, or a pixel outside a source's bounds,
/// contributes zero.
pub fn mix_band<P: Pixel, const N: usize>(
    mut band: BandMut<'_, P>,
    left: Option<Plane<'_, P>>,
    right: Option<Plane<'_, P>>,
    weight: f64,
) {
    let x1 = band.rect().x1;
    let keep = 1.0 - weight;
    for (y, row) in band.rows() {
        for (i, out) in row.chunks_exact_mut(N).enumerate() {
            let x = x1 + i as i32;
            let l = left.and_then(|p| p.pixel(x, y));
            let r = right.and_then(|p| p.pixel(x, y));
            for c in 0..N {
                let lv = l.map_or(0.0, |px| px[c].to_f64());
                let rv = r.map_or(0.0, |px| px[c].to_f64());
                out[c] = P::from_f64(lv * keep + rv * weight);
            }
        }
    }
}

/// Mix `left` and `right` into `window` of `dst`.
///
/// Fails before touching `dst` when a present source does not share the
/// destination's bit depth and component layout.
pub fn mix_views(
    scheduler: &TileScheduler,
    dst: ImageMut<'_>,
    left: Option<ImageRef<'_>>,
    right: Option<ImageRef<'_>>,
    weight: f64,
    window: RectI,
    abort: &AbortFlag,
) -> ViewFxResult<()> {
    if let Some(src) = &left {
        check_source("Source (left view)", src, &dst)?;
    }
    if let Some(src) = &right {
        check_source("Source (right view)", src, &dst)?;
    }
    match dst.depth() {
        BitDepth::UByte => mix_typed::<u8>(scheduler, dst, left, right, weight, window, abort),
        BitDepth::UShort => mix_typed::<u16>(scheduler, dst, left, right, weight, window, abort),
        BitDepth::Float => mix_typed::<f32>(scheduler, dst, left, right, weight, window, abort),
    }
}

fn mix_typed<P: Pixel>(
    scheduler: &TileScheduler,
    dst: ImageMut<'_>,
    left: Option<ImageRef<'_>>,
    right: Option<ImageRef<'_>>,
    weight: f64,
    window: RectI,
    abort: &AbortFlag,
) -> ViewFxResult<()> {
    let components = dst.components();
    let plane = dst
        .typed_mut::<P>()
        .ok_or_else(|| ViewFxError::Render("destination storage does not match its bit depth".into()))?;
    let left = left.and_then(|img| img.typed::<P>());
    let right = right.and_then(|img| img.typed::<P>());

    match components {
        Components::Alpha => scheduler.process_rows(plane, window, abort, |band| {
            mix_band::<P, 1>(band, left, right, weight)
        }),
        Components::Rgb => scheduler.process_rows(plane, window, abort, |band| {
            mix_band::<P, 3>(band, left, right, weight)
        }),
        Components::Rgba => scheduler.process_rows(plane, window, abort, |band| {
            mix_band::<P, 4>(band, left, right, weight)
        }),
        Components::Xy => Err(ViewFxError::unsupported("two-channel images cannot be mixed")),
    }
}

/// The `MixViews` effect: blends the left and right views of a stereo clip.
pub struct MixViews {
    host: Arc<dyn Host>,
    params: Arc<dyn ParamStore>,
    scheduler: TileScheduler,
}

impl MixViews {
    pub const IDENTIFIER: &'static str = "net.sf.openfx.mixViewsPlugin";

    /// Create an instance with its own parameter set.
    pub fn new(host: Arc<dyn Host>, scheduler: TileScheduler) -> ViewFxResult<Self> {
        let params = ParamSet::new();
        Self::define_params(&params);
        Self::with_params(host, Arc::new(params), scheduler)
    }

    /// Create an instance over a parameter store owned elsewhere.
    pub fn with_params(
        host: Arc<dyn Host>,
        params: Arc<dyn ParamStore>,
        scheduler: TileScheduler,
    ) -> ViewFxResult<Self> {
        require_multiview(host.as_ref())?;
        Ok(Self {
            host,
            params,
            scheduler,
        })
    }

    pub fn define_params(params: &ParamSet) {
        params.define(PARAM_MIX, ParamValue::Double(0.0));
    }

    pub fn params(&self) -> &dyn ParamStore {
        self.params.as_ref()
    }
}

fn require_multiview(host: &dyn Host) -> ViewFxResult<()> {
    if host.description().supports_multiview {
        Ok(())
    } else {
        Err(ViewFxError::MissingCapability(
            "host does not support fetching stereoscopic views".into(),
        ))
    }
}

impl ImageEffect for MixViews {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            identifier: Self::IDENTIFIER,
            label: "MixViewsOFX",
            grouping: "Views/Stereo",
            description: "Mix two views together.",
            version: (1, 0),
            bit_depths: vec![BitDepth::UByte, BitDepth::UShort, BitDepth::Float],
            components: vec![Components::Rgba, Components::Rgb, Components::Alpha],
            supports_tiles: true,
            supports_multi_resolution: true,
            supports_gpu_render: false,
        }
    }

    fn render(
        &self,
        args: &RenderArgs,
        sources: &dyn ImageSource,
        dst: Option<ImageMut<'_>>,
    ) -> ViewFxResult<()> {
        require_multiview(self.host.as_ref())?;
        let dst = require_destination(dst)?;
        check_destination(self.host.as_ref(), args, &dst)?;

        let left = sources.fetch(ClipName::Source, args.time, Some(LEFT_VIEW));
        let right = sources.fetch(ClipName::Source, args.time, Some(RIGHT_VIEW));
        let weight = self.params.double_at(PARAM_MIX, args.time)?;

        tracing::debug!(
            time = args.time,
            weight,
            left = left.is_some(),
            right = right.is_some(),
            window = ?args.render_window,
            "mixing views"
        );
        mix_views(
            &self.scheduler,
            dst,
            left,
            right,
            weight,
            args.render_window,
            &args.abort,
        )
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
        Ok(None)
    }
}
