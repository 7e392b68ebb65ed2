use std::sync::Arc;

use viewfx_core::{
    BitDepth, ClipName, Components, Field, HostDescription, ImageBuffer, ImageEffect, LocalHost,
    MemorySource, MessageKind, ParamStore, ParamValue, PixelData, PointD, ProjectInfo, RectI,
    RenderArgs, RenderScale, RenderStatus, RoiSetter, TileScheduler, ViewFxError,
};
use viewfx_render::mix::PARAM_MIX;
use viewfx_render::warp::{
    PARAM_ANISOTROPIC, PARAM_CPU_DRIVER, PARAM_DIRECTION, PARAM_ENABLE_GPU, PARAM_FROM,
    PARAM_MIPMAP, PARAM_RENDERER_INFO, PARAM_TO, RENDERER_INFO_UNAVAILABLE,
};
use viewfx_render::{CpuDriver, MixViews, TestWarp, WarpDirection};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("viewfx_core=debug,viewfx_render=debug")
        .with_test_writer()
        .try_init();
}

fn local_host() -> Arc<LocalHost> {
    Arc::new(LocalHost::new(
        HostDescription::default(),
        ProjectInfo::from_size(1920.0, 1080.0),
    ))
}

fn gradient_rgba(width: u32, height: u32) -> ImageBuffer {
    let pixels: Vec<f32> = (0..width * height * 4).map(|i| (i % 97) as f32 * 0.125).collect();
    ImageBuffer::from_pixels(RectI::from_size(width, height), Components::Rgba, pixels)
        .expect("pixel count matches bounds")
}

fn gradient_alpha_u8(width: u32, height: u32) -> ImageBuffer {
    let pixels: Vec<u8> = (0..width * height).map(|i| (i * 7 % 251) as u8).collect();
    ImageBuffer::from_pixels(RectI::from_size(width, height), Components::Alpha, pixels)
        .expect("pixel count matches bounds")
}

fn stereo_source(left: ImageBuffer, right: ImageBuffer) -> MemorySource {
    MemorySource::new()
        .with(ClipName::Source, 0, left)
        .with(ClipName::Source, 1, right)
}

fn warp_with_points(from: PointD, to: PointD, direction: WarpDirection) -> TestWarp {
    let warp = TestWarp::new(local_host(), TileScheduler::default().with_bands(3))
        .expect("warp instance");
    let params = warp.params();
    params.set_value(PARAM_FROM, ParamValue::Double2D(from)).unwrap();
    params.set_value(PARAM_TO, ParamValue::Double2D(to)).unwrap();
    params
        .set_value(PARAM_DIRECTION, ParamValue::Choice(direction.index()))
        .unwrap();
    warp
}

#[test]
fn test_mix_quarter_weight_example() {
    init_logging();
    let bounds = RectI::from_size(4, 4);
    let left = ImageBuffer::filled(bounds, Components::Rgba, &[200u8, 100, 50, 255]).unwrap();
    let right = ImageBuffer::filled(bounds, Components::Rgba, &[0u8, 0, 0, 255]).unwrap();
    let sources = stereo_source(left, right);

    let mix = MixViews::new(local_host(), TileScheduler::default()).unwrap();
    mix.params().set_value(PARAM_MIX, ParamValue::Double(0.25)).unwrap();

    let mut dst = ImageBuffer::new(bounds, BitDepth::UByte, Components::Rgba);
    mix.render(&RenderArgs::new(0.0, bounds), &sources, Some(dst.view_mut()))
        .unwrap();
    assert_eq!(dst.data(), &PixelData::UByte([150, 75, 38, 255].repeat(16)));
}

#[test]
fn test_mix_endpoints_reproduce_views() {
    let bounds = RectI::from_size(9, 5);
    let left = gradient_rgba(9, 5);
    let right = ImageBuffer::filled(bounds, Components::Rgba, &[0.75f32, 0.5, 0.25, 1.0]).unwrap();
    let sources = stereo_source(left.clone(), right.clone());
    let mix = MixViews::new(local_host(), TileScheduler::default().with_bands(4)).unwrap();

    for (weight, expected) in [(0.0, &left), (1.0, &right)] {
        mix.params().set_value(PARAM_MIX, ParamValue::Double(weight)).unwrap();
        let mut dst = ImageBuffer::new(bounds, BitDepth::Float, Components::Rgba);
        mix.render(&RenderArgs::new(0.0, bounds), &sources, Some(dst.view_mut()))
            .unwrap();
        assert_eq!(dst.data(), expected.data(), "weight {}", weight);
    }
}

#[test]
fn test_mix_animated_weight_is_sampled_per_call() {
    let bounds = RectI::from_size(2, 2);
    let left = ImageBuffer::filled(bounds, Components::Alpha, &[1000u16]).unwrap();
    let right = ImageBuffer::filled(bounds, Components::Alpha, &[3000u16]).unwrap();
    let sources = stereo_source(left, right);

    let params = Arc::new(viewfx_core::ParamSet::new());
    MixViews::define_params(&params);
    params.set_keyframe(PARAM_MIX, 0.0, ParamValue::Double(0.0)).unwrap();
    params.set_keyframe(PARAM_MIX, 10.0, ParamValue::Double(1.0)).unwrap();
    let mix = MixViews::with_params(local_host(), params, TileScheduler::single_band()).unwrap();

    let mut dst = ImageBuffer::new(bounds, BitDepth::UShort, Components::Alpha);
    mix.render(&RenderArgs::new(5.0, bounds), &sources, Some(dst.view_mut()))
        .unwrap();
    assert_eq!(dst.data(), &PixelData::UShort(vec![2000; 4]));
}

#[test]
fn test_mix_without_multiview_is_missing_host_feature() {
    let host = Arc::new(LocalHost::new(
        HostDescription {
            supports_multiview: false,
            ..HostDescription::default()
        },
        ProjectInfo::from_size(8.0, 8.0),
    ));
    let err = MixViews::new(host, TileScheduler::default()).err().expect("creation fails");
    assert_eq!(err.status(), RenderStatus::MissingHostFeature);
}

#[test]
fn test_mix_banding_matches_single_band() {
    let bounds = RectI::new(-3, -2, 13, 11);
    let window = RectI::new(-1, 0, 12, 10);
    let pixels: Vec<f32> = (0..16 * 13 * 4).map(|i| (i % 41) as f32 * 0.3).collect();
    let left = ImageBuffer::from_pixels(bounds, Components::Rgba, pixels).unwrap();
    let right = ImageBuffer::filled(bounds, Components::Rgba, &[0.1f32, 0.2, 0.3, 0.4]).unwrap();
    let sources = stereo_source(left, right);

    let render = |scheduler: TileScheduler| {
        let mix = MixViews::new(local_host(), scheduler).unwrap();
        mix.params().set_value(PARAM_MIX, ParamValue::Double(0.3)).unwrap();
        let mut dst = ImageBuffer::new(bounds, BitDepth::Float, Components::Rgba);
        mix.render(&RenderArgs::new(0.0, window), &sources, Some(dst.view_mut()))
            .unwrap();
        dst
    };
    let reference = render(TileScheduler::single_band());
    let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap());
    for bands in [2, 5, 10, 32] {
        let banded = render(TileScheduler::new(Some(pool.clone())).with_bands(bands));
        assert_eq!(banded, reference, "{} bands", bands);
    }
}

#[test]
fn test_missing_destination_fails_the_call() {
    let mix = MixViews::new(local_host(), TileScheduler::default()).unwrap();
    let err = mix
        .render(&RenderArgs::new(0.0, RectI::from_size(2, 2)), &MemorySource::new(), None)
        .unwrap_err();
    assert!(matches!(err, ViewFxError::MissingImage { .. }));
    assert_eq!(err.status(), RenderStatus::Failed);
}

#[test]
fn test_wrong_scale_is_reported_before_any_write() {
    let host = local_host();
    let warp = TestWarp::new(host.clone(), TileScheduler::default()).unwrap();
    let bounds = RectI::from_size(4, 4);
    let sources = MemorySource::new().with(ClipName::Source, 0, gradient_rgba(4, 4));
    let mut dst = ImageBuffer::filled(bounds, Components::Rgba, &[9.0f32; 4])
        .unwrap()
        .with_render_scale(RenderScale::new(0.5, 0.5));
    let before = dst.clone();

    let err = warp
        .render(&RenderArgs::new(0.0, bounds), &sources, Some(dst.view_mut()))
        .unwrap_err();
    assert!(matches!(err, ViewFxError::GeometryMismatch { .. }));
    assert_eq!(dst, before);
    let (kind, text) = host.persistent_message().expect("user-visible message");
    assert_eq!(kind, MessageKind::Error);
    assert!(text.contains("wrong scale or field"));
}

#[test]
fn test_fielded_destination_matching_request_is_accepted() {
    let mix = MixViews::new(local_host(), TileScheduler::default()).unwrap();
    let bounds = RectI::from_size(2, 2);
    let mut dst = ImageBuffer::new(bounds, BitDepth::Float, Components::Rgb).with_field(Field::Lower);
    let mut args = RenderArgs::new(0.0, bounds);
    args.field = Field::Lower;
    mix.render(&args, &MemorySource::new(), Some(dst.view_mut())).unwrap();

    args.field = Field::Upper;
    let err = mix
        .render(&args, &MemorySource::new(), Some(dst.view_mut()))
        .unwrap_err();
    assert!(matches!(err, ViewFxError::GeometryMismatch { .. }));
}

#[test]
fn test_forward_warp_with_zero_displacement_is_identity() {
    init_logging();
    let src = gradient_rgba(12, 9);
    let sources = MemorySource::new().with(ClipName::Source, 0, src.clone());
    let point = PointD::new(5.25, 3.5);
    let warp = warp_with_points(point, point, WarpDirection::Forward);

    let mut dst = ImageBuffer::new(src.bounds(), BitDepth::Float, Components::Rgba);
    warp.render(&RenderArgs::new(0.0, src.bounds()), &sources, Some(dst.view_mut()))
        .unwrap();
    assert_eq!(dst.data(), src.data());
}

#[test]
fn test_backward_warp_with_zero_displacement_is_identity() {
    let src = gradient_alpha_u8(10, 7);
    let sources = MemorySource::new().with(ClipName::Source, 0, src.clone());
    let point = PointD::new(2.0, 6.0);
    let warp = warp_with_points(point, point, WarpDirection::Backward);

    for driver in [CpuDriver::Reference, CpuDriver::Threaded] {
        warp.params()
            .set_value(PARAM_CPU_DRIVER, ParamValue::Choice(driver.index()))
            .unwrap();
        let mut dst = ImageBuffer::new(src.bounds(), BitDepth::UByte, Components::Alpha);
        warp.render(&RenderArgs::new(0.0, src.bounds()), &sources, Some(dst.view_mut()))
            .unwrap();
        assert_eq!(dst.data(), src.data(), "driver {}", driver);
    }
}

#[test]
fn test_identity_warp_on_a_sub_window_only_touches_the_window() {
    let src = gradient_rgba(8, 8);
    let sources = MemorySource::new().with(ClipName::Source, 0, src.clone());
    let point = PointD::new(4.0, 4.0);
    let warp = warp_with_points(point, point, WarpDirection::Forward);

    let window = RectI::new(2, 1, 7, 5);
    let mut dst = ImageBuffer::filled(src.bounds(), Components::Rgba, &[-1.0f32; 4]).unwrap();
    warp.render(&RenderArgs::new(0.0, window), &sources, Some(dst.view_mut()))
        .unwrap();
    for y in 0..8 {
        for x in 0..8 {
            let got = dst.pixel::<f32>(x, y).unwrap();
            if (window.x1..window.x2).contains(&x) && (window.y1..window.y2).contains(&y) {
                assert_eq!(got, src.pixel::<f32>(x, y).unwrap());
            } else {
                assert_eq!(got, &[-1.0; 4]);
            }
        }
    }
}

/// Render a displaced warp of a 32x32 gradient with plain bilinear sampling.
fn displaced_warp(direction: WarpDirection, driver: CpuDriver) -> (ImageBuffer, ImageBuffer) {
    let src = gradient_rgba(32, 32);
    let sources = MemorySource::new().with(ClipName::Source, 0, src.clone());
    let warp = warp_with_points(PointD::new(16.5, 16.5), PointD::new(20.5, 16.5), direction);
    let params = warp.params();
    params.set_value(PARAM_MIPMAP, ParamValue::Bool(false)).unwrap();
    params.set_value(PARAM_ANISOTROPIC, ParamValue::Bool(false)).unwrap();
    params
        .set_value(PARAM_CPU_DRIVER, ParamValue::Choice(driver.index()))
        .unwrap();

    let mut dst = ImageBuffer::new(src.bounds(), BitDepth::Float, Components::Rgba);
    warp.render(&RenderArgs::new(0.0, src.bounds()), &sources, Some(dst.view_mut()))
        .unwrap();
    (src, dst)
}

fn assert_pixel_close(got: &[f32], want: &[f32]) {
    for (g, w) in got.iter().zip(want) {
        assert!((g - w).abs() < 1e-4, "{:?} vs {:?}", got, want);
    }
}

#[test]
fn test_forward_warp_moves_from_onto_to() {
    for driver in [CpuDriver::Reference, CpuDriver::Threaded] {
        let (src, dst) = displaced_warp(WarpDirection::Forward, driver);
        assert_pixel_close(dst.pixel::<f32>(20, 16).unwrap(), src.pixel::<f32>(16, 16).unwrap());
    }
}

#[test]
fn test_backward_warp_reads_from_the_mirrored_offset() {
    for driver in [CpuDriver::Reference, CpuDriver::Threaded] {
        let (src, dst) = displaced_warp(WarpDirection::Backward, driver);
        // from - (to - from) = (12.5, 16.5)
        assert_pixel_close(dst.pixel::<f32>(16, 16).unwrap(), src.pixel::<f32>(12, 16).unwrap());
    }
}

#[test]
fn test_backend_is_chosen_per_render_call() {
    let warp = TestWarp::new(local_host(), TileScheduler::default()).unwrap();
    let sources = MemorySource::new().with(ClipName::Source, 0, gradient_rgba(4, 4));
    let bounds = RectI::from_size(4, 4);

    warp.params()
        .set_value(PARAM_ENABLE_GPU, ParamValue::Bool(false))
        .unwrap();
    warp.changed_param(PARAM_ENABLE_GPU, 0.0).unwrap();
    assert!(!warp.supports_gpu_render());

    // The host offers the GPU but the instance has it switched off.
    let mut dst = ImageBuffer::new(bounds, BitDepth::Float, Components::Rgba);
    warp.render(&RenderArgs::new(0.0, bounds).with_gpu(true), &sources, Some(dst.view_mut()))
        .unwrap();
    assert!(warp.renderer_info().get().contains("software rasterizer"));

    warp.params()
        .set_value(PARAM_ENABLE_GPU, ParamValue::Bool(true))
        .unwrap();
    warp.changed_param(PARAM_ENABLE_GPU, 0.0).unwrap();
    assert_eq!(warp.supports_gpu_render(), cfg!(feature = "gpu"));
    assert!(warp.renderer_info().is_empty());

    // Instance allows the GPU but this call does not ask for it.
    let mut dst = ImageBuffer::new(bounds, BitDepth::Float, Components::Rgba);
    warp.render(&RenderArgs::new(0.0, bounds), &sources, Some(dst.view_mut()))
        .unwrap();
    assert!(warp.renderer_info().get().contains("software rasterizer"));
}

#[test]
fn test_default_points_are_denormalised_to_project_pixels() {
    let warp = TestWarp::new(local_host(), TileScheduler::default()).unwrap();
    assert_eq!(
        warp.params().double2d_at(PARAM_FROM, 0.0).unwrap(),
        PointD::new(960.0, 540.0)
    );
    assert_eq!(
        warp.params().double2d_at(PARAM_TO, 0.0).unwrap(),
        PointD::new(960.0, 540.0)
    );
}

#[test]
fn test_warp_without_source_writes_zero() {
    let warp = TestWarp::new(local_host(), TileScheduler::default()).unwrap();
    let bounds = RectI::from_size(3, 3);
    let mut dst = ImageBuffer::filled(bounds, Components::Alpha, &[7u16]).unwrap();
    warp.render(&RenderArgs::new(0.0, bounds), &MemorySource::new(), Some(dst.view_mut()))
        .unwrap();
    assert_eq!(dst.data(), &PixelData::UShort(vec![0; 9]));
}

#[test]
fn test_warp_rejects_mismatched_source() {
    let warp = TestWarp::new(local_host(), TileScheduler::default()).unwrap();
    let sources = MemorySource::new().with(ClipName::Source, 0, gradient_alpha_u8(4, 4));
    let mut dst = ImageBuffer::new(RectI::from_size(4, 4), BitDepth::Float, Components::Alpha);
    let err = warp
        .render(&RenderArgs::new(0.0, RectI::from_size(4, 4)), &sources, Some(dst.view_mut()))
        .unwrap_err();
    assert!(matches!(err, ViewFxError::FormatMismatch { .. }));
    assert_eq!(err.status(), RenderStatus::Unsupported);
    assert_eq!(dst.data(), &PixelData::Float(vec![0.0; 16]));
}

#[test]
fn test_warp_rejects_rgb() {
    let warp = TestWarp::new(local_host(), TileScheduler::default()).unwrap();
    let mut dst = ImageBuffer::new(RectI::from_size(2, 2), BitDepth::Float, Components::Rgb);
    let err = warp
        .render(&RenderArgs::new(0.0, RectI::from_size(2, 2)), &MemorySource::new(), Some(dst.view_mut()))
        .unwrap_err();
    assert!(matches!(err, ViewFxError::Unsupported { .. }));
}

#[test]
fn test_abort_before_render_returns_normally() {
    let src = gradient_rgba(16, 16);
    let sources = MemorySource::new().with(ClipName::Source, 0, src.clone());
    let warp = warp_with_points(PointD::new(8.0, 8.0), PointD::new(10.0, 6.0), WarpDirection::Forward);
    let args = RenderArgs::new(0.0, src.bounds());
    args.abort.request();

    let mut dst = ImageBuffer::filled(src.bounds(), Components::Rgba, &[3.0f32; 4]).unwrap();
    warp.render(&args, &sources, Some(dst.view_mut())).unwrap();
    assert_eq!(dst.bounds(), src.bounds());
}

#[test]
fn test_abort_during_render_stays_inside_the_window() {
    let src = gradient_rgba(32, 32);
    let sources = MemorySource::new().with(ClipName::Source, 0, src.clone());
    let warp = warp_with_points(PointD::new(16.0, 16.0), PointD::new(20.0, 12.0), WarpDirection::Backward);
    let args = RenderArgs::new(0.0, RectI::new(4, 4, 28, 28));

    let abort = args.abort.clone();
    let canceller = std::thread::spawn(move || abort.request());
    let mut dst = ImageBuffer::filled(src.bounds(), Components::Rgba, &[-2.0f32; 4]).unwrap();
    warp.render(&args, &sources, Some(dst.view_mut())).unwrap();
    canceller.join().unwrap();

    for y in 0..32 {
        for x in 0..32 {
            if !(4..28).contains(&x) || !(4..28).contains(&y) {
                assert_eq!(dst.pixel::<f32>(x, y).unwrap(), &[-2.0; 4]);
            }
        }
    }
}

#[test]
fn test_renderer_info_message_before_and_after_render() {
    let host = local_host();
    let warp = TestWarp::new(host.clone(), TileScheduler::default()).unwrap();
    warp.changed_param(PARAM_RENDERER_INFO, 0.0).unwrap();
    assert_eq!(
        host.messages().last().unwrap(),
        &(MessageKind::Message, RENDERER_INFO_UNAVAILABLE.to_string())
    );

    let sources = MemorySource::new().with(ClipName::Source, 0, gradient_rgba(4, 4));
    let mut dst = ImageBuffer::new(RectI::from_size(4, 4), BitDepth::Float, Components::Rgba);
    warp.render(&RenderArgs::new(0.0, RectI::from_size(4, 4)), &sources, Some(dst.view_mut()))
        .unwrap();
    warp.changed_param(PARAM_RENDERER_INFO, 0.0).unwrap();
    let (_, text) = host.messages().last().cloned().unwrap();
    assert!(text.contains("software rasterizer"));
    assert!(text.contains("driver: threaded"));

    warp.params()
        .set_value(PARAM_CPU_DRIVER, ParamValue::Choice(CpuDriver::Reference.index()))
        .unwrap();
    warp.changed_param(PARAM_CPU_DRIVER, 0.0).unwrap();
    assert!(warp.renderer_info().is_empty());
}

#[test]
fn test_regions_of_interest_ask_for_full_source() {
    let src = ImageBuffer::new(RectI::new(-4, -2, 20, 10), BitDepth::Float, Components::Rgba);
    let sources = MemorySource::new().with(ClipName::Source, 0, src);
    let warp = TestWarp::new(local_host(), TileScheduler::default()).unwrap();
    let mut rois = RoiSetter::new();
    warp.regions_of_interest(
        0.0,
        RenderScale::FULL,
        viewfx_core::RectD::new(0.0, 0.0, 1.0, 1.0),
        &sources,
        &mut rois,
    );
    assert_eq!(
        rois.get(ClipName::Source),
        Some(viewfx_core::RectD::new(-4.0, -2.0, 20.0, 10.0))
    );
}

#[cfg(feature = "gpu")]
mod gpu {
    use super::*;
    use viewfx_render::{GpuContext, GpuWarp, SampleOptions, WarpJob, WarpMesh, WarpRenderer};

    fn context(fallback: bool) -> Option<Arc<GpuContext>> {
        match GpuContext::init(fallback) {
            Ok(ctx) => Some(Arc::new(ctx)),
            Err(e) => {
                eprintln!("skipping GPU test: {}", e);
                None
            }
        }
    }

    fn identity_on(ctx: Arc<GpuContext>) {
        let pixels: Vec<f32> = (0..8 * 6 * 4).map(|i| (i % 13) as f32 / 13.0).collect();
        let src = ImageBuffer::from_pixels(RectI::from_size(8, 6), Components::Rgba, pixels).unwrap();
        let rect = viewfx_core::RectD::new(0.0, 0.0, 8.0, 6.0);
        let p = PointD::new(3.0, 2.5);
        let triangles = WarpMesh::new(rect, p, p, WarpDirection::Forward).triangles();
        let warp = GpuWarp::new(ctx.clone());
        let abort = viewfx_core::AbortFlag::new();

        let mut dst = ImageBuffer::new(src.bounds(), BitDepth::Float, Components::Rgba);
        warp.render(WarpJob {
            src: src.view(),
            dst: dst.view_mut(),
            window: src.bounds(),
            triangles: &triangles,
            options: SampleOptions::default(),
            abort: &abort,
        })
        .unwrap();

        let (PixelData::Float(got), PixelData::Float(want)) = (dst.data(), src.data()) else {
            panic!("float images expected");
        };
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-3, "{} vs {}", g, w);
        }
        assert_eq!(ctx.texture_pool.free_count(), 2);
        assert!(warp.describe().contains("max texture size"));
    }

    #[test]
    fn test_gpu_identity_warp() {
        if let Some(ctx) = context(false) {
            identity_on(ctx);
        }
    }

    #[test]
    fn test_fallback_adapter_identity_warp() {
        if let Some(ctx) = context(true) {
            identity_on(ctx);
        }
    }

    #[test]
    fn test_enabled_instance_renders_on_the_gpu() {
        if context(false).is_none() {
            return;
        }
        let warp = TestWarp::new(local_host(), TileScheduler::default()).unwrap();
        assert!(warp.supports_gpu_render());
        let sources = MemorySource::new().with(ClipName::Source, 0, gradient_rgba(4, 4));
        let bounds = RectI::from_size(4, 4);
        let mut dst = ImageBuffer::new(bounds, BitDepth::Float, Components::Rgba);
        warp.render(&RenderArgs::new(0.0, bounds).with_gpu(true), &sources, Some(dst.view_mut()))
            .unwrap();
        let info = warp.renderer_info().get();
        assert!(info.contains("max texture size"));
        assert!(!info.contains("software rasterizer"));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_context_teardown_is_logged_at_info() {
        if context(true).is_none() {
            return;
        }
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let warp = TestWarp::new(local_host(), TileScheduler::default()).unwrap();
            warp.params()
                .set_value(PARAM_CPU_DRIVER, ParamValue::Choice(CpuDriver::Fallback.index()))
                .unwrap();
            let sources = MemorySource::new().with(ClipName::Source, 0, gradient_rgba(4, 4));
            let bounds = RectI::from_size(4, 4);
            let mut dst = ImageBuffer::new(bounds, BitDepth::Float, Components::Rgba);
            warp.render(&RenderArgs::new(0.0, bounds), &sources, Some(dst.view_mut()))
                .unwrap();
        });

        let text = String::from_utf8(logs.0.lock().clone()).unwrap();
        let line = text
            .lines()
            .find(|l| l.contains("releasing warp contexts"))
            .expect("teardown logged");
        assert!(line.contains("INFO"));
    }
}
