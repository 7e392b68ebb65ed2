use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use viewfx_core::{
    BitDepth, ClipName, Components, HostDescription, ImageBuffer, ImageEffect, LocalHost,
    MemorySource, ParamStore, ParamValue, PointD, ProjectInfo, RenderArgs, TileScheduler,
    ViewFxConfig,
};
use viewfx_render::mix::PARAM_MIX;
use viewfx_render::warp::{
    PARAM_ANISOTROPIC, PARAM_CPU_DRIVER, PARAM_DIRECTION, PARAM_FROM, PARAM_MIPMAP,
    PARAM_RENDERER_INFO, PARAM_TO,
};
use viewfx_render::{CpuDriver, MixViews, TestWarp, WarpDirection};

mod image_io;

use image_io::Depth;

const DEFAULT_CONFIG_FILE: &str = "viewfx.toml";

#[derive(Parser)]
#[command(
    name = "viewfx",
    version,
    about = "ViewFx: stereo view mixing and mesh warping for still images",
    long_about = None
)]
struct Cli {
    /// Configuration file (default: ./viewfx.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Blend a left and a right view: out = left * (1 - weight) + right * weight
    Mix {
        /// Left view image
        left: PathBuf,

        /// Right view image
        right: PathBuf,

        /// Output image path
        #[arg(short, long)]
        output: PathBuf,

        /// Mix weight; 0 gives the left view, 1 the right view
        #[arg(short, long, default_value_t = 0.5)]
        weight: f64,

        /// Channel storage used while processing
        #[arg(long, value_enum, default_value_t = Depth::U16)]
        depth: Depth,
    },

    /// Warp an image by moving the point FROM to TO
    Warp {
        /// Input image
        input: PathBuf,

        /// Output image path
        #[arg(short, long)]
        output: PathBuf,

        /// Source point as "x,y" in pixels (default: image centre)
        #[arg(long, value_parser = parse_point)]
        from: Option<PointD>,

        /// Target point as "x,y" in pixels (default: image centre)
        #[arg(long, value_parser = parse_point)]
        to: Option<PointD>,

        /// Offset texture coordinates instead of moving the mesh
        #[arg(long)]
        backward: bool,

        /// Disable mipmapping
        #[arg(long)]
        no_mipmap: bool,

        /// Disable anisotropic filtering
        #[arg(long)]
        no_anisotropic: bool,

        /// Render on the GPU when available
        #[arg(long)]
        gpu: bool,

        /// CPU driver: reference, threaded or fallback (default from config)
        #[arg(long)]
        driver: Option<CpuDriver>,

        /// Channel storage used while processing
        #[arg(long, value_enum, default_value_t = Depth::U16)]
        depth: Depth,

        /// Print the renderer description after rendering
        #[arg(long)]
        renderer_info: bool,
    },

    /// Show build features, configuration and available renderers
    Info {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,

        /// Try to acquire a GPU device and describe it
        #[arg(long)]
        probe_gpu: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Also write it to this file
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn parse_point(s: &str) -> Result<PointD, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected \"x,y\", got \"{}\"", s))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid coordinate \"{}\": {}", v.trim(), e))
    };
    Ok(PointD::new(parse(x)?, parse(y)?))
}

fn load_config(path: Option<&Path>) -> Result<ViewFxConfig> {
    match path {
        Some(path) => ViewFxConfig::load_from_file(path)
            .with_context(|| format!("failed to load config: {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            ViewFxConfig::load_from_file(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("failed to load config: {}", DEFAULT_CONFIG_FILE))
        }
        None => Ok(ViewFxConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Mix {
            left,
            right,
            output,
            weight,
            depth,
        } => cmd_mix(&config, &left, &right, &output, weight, depth),
        Commands::Warp {
            input,
            output,
            from,
            to,
            backward,
            no_mipmap,
            no_anisotropic,
            gpu,
            driver,
            depth,
            renderer_info,
        } => {
            let driver = match driver {
                Some(driver) => driver,
                None => config.render.cpu_driver.parse()?,
            };
            let options = WarpOptions {
                from,
                to,
                direction: if backward {
                    WarpDirection::Backward
                } else {
                    WarpDirection::Forward
                },
                mipmap: !no_mipmap,
                anisotropic: !no_anisotropic,
                gpu: gpu && config.render.gpu,
                driver,
                depth,
                renderer_info,
            };
            cmd_warp(&config, &input, &output, &options)
        }
        Commands::Info { json, probe_gpu } => cmd_info(&config, json, probe_gpu),
        Commands::Config { write } => cmd_config(&config, write.as_deref()),
    }
}

/// Host stand-in for one command: the project is the image itself.
fn local_host(config: &ViewFxConfig, image: &ImageBuffer) -> Arc<LocalHost> {
    let bounds = image.bounds();
    Arc::new(LocalHost::new(
        HostDescription {
            name: "viewfx.cli".to_string(),
            supports_gpu_render: config.render.gpu,
            ..HostDescription::default()
        },
        ProjectInfo::from_size(f64::from(bounds.width()), f64::from(bounds.height())),
    ))
}

fn cmd_mix(
    config: &ViewFxConfig,
    left: &Path,
    right: &Path,
    output: &Path,
    weight: f64,
    depth: Depth,
) -> Result<()> {
    let left = image_io::load(left, depth)?;
    let right = image_io::load(right, depth)?;
    if left.bounds() != right.bounds() {
        tracing::warn!(
            left = ?left.bounds(),
            right = ?right.bounds(),
            "views differ in size; missing pixels count as zero"
        );
    }
    let bounds = left.bounds();
    let host = local_host(config, &left);
    let sources = MemorySource::new()
        .with(ClipName::Source, 0, left)
        .with(ClipName::Source, 1, right);

    let effect = MixViews::new(host, TileScheduler::from_config(&config.render)?)?;
    effect.params().set_value(PARAM_MIX, ParamValue::Double(weight))?;

    let mut dst = ImageBuffer::new(bounds, BitDepth::from(depth), Components::Rgba);
    let started = std::time::Instant::now();
    effect
        .render(&RenderArgs::new(0.0, bounds), &sources, Some(dst.view_mut()))
        .context("mix render failed")?;
    tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, weight, "views mixed");

    image_io::save(output, dst)?;
    println!("✓ Mixed views written to {}", output.display());
    Ok(())
}

struct WarpOptions {
    from: Option<PointD>,
    to: Option<PointD>,
    direction: WarpDirection,
    mipmap: bool,
    anisotropic: bool,
    gpu: bool,
    driver: CpuDriver,
    depth: Depth,
    renderer_info: bool,
}

fn cmd_warp(config: &ViewFxConfig, input: &Path, output: &Path, options: &WarpOptions) -> Result<()> {
    let src = image_io::load(input, options.depth)?;
    let bounds = src.bounds();
    let host = local_host(config, &src);
    let sources = MemorySource::new().with(ClipName::Source, 0, src);

    let effect = TestWarp::new(host.clone(), TileScheduler::from_config(&config.render)?)?;
    let params = effect.params();
    if let Some(from) = options.from {
        params.set_value(PARAM_FROM, ParamValue::Double2D(from))?;
    }
    if let Some(to) = options.to {
        params.set_value(PARAM_TO, ParamValue::Double2D(to))?;
    }
    params.set_value(PARAM_DIRECTION, ParamValue::Choice(options.direction.index()))?;
    params.set_value(PARAM_MIPMAP, ParamValue::Bool(options.mipmap))?;
    params.set_value(PARAM_ANISOTROPIC, ParamValue::Bool(options.anisotropic))?;
    params.set_value(PARAM_CPU_DRIVER, ParamValue::Choice(options.driver.index()))?;

    let mut dst = ImageBuffer::new(bounds, BitDepth::from(options.depth), Components::Rgba);
    let args = RenderArgs::new(0.0, bounds).with_gpu(options.gpu);
    let started = std::time::Instant::now();
    effect
        .render(&args, &sources, Some(dst.view_mut()))
        .context("warp render failed")?;
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        gpu = options.gpu,
        driver = %options.driver,
        "image warped"
    );

    if options.renderer_info {
        effect.changed_param(PARAM_RENDERER_INFO, 0.0)?;
        if let Some((_, text)) = host.messages().last() {
            println!("{}", text);
        }
    }

    image_io::save(output, dst)?;
    println!("✓ Warped image written to {}", output.display());
    Ok(())
}

#[derive(Serialize)]
struct InfoReport {
    version: &'static str,
    backends: Vec<&'static str>,
    cpu_drivers: Vec<&'static str>,
    default_cpu_driver: String,
    threads: Option<usize>,
    bands: Option<usize>,
    gpu_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    gpu: Option<String>,
}

fn cmd_info(config: &ViewFxConfig, json: bool, probe_gpu: bool) -> Result<()> {
    let mut backends = vec!["software"];
    if cfg!(feature = "gpu") {
        backends.push("gpu");
    }
    let report = InfoReport {
        version: env!("CARGO_PKG_VERSION"),
        backends,
        cpu_drivers: CpuDriver::ALL.iter().map(|d| d.name()).collect(),
        default_cpu_driver: config.render.cpu_driver.clone(),
        threads: config.render.threads,
        bands: config.render.bands,
        gpu_enabled: config.render.gpu,
        gpu: if probe_gpu { Some(probe_gpu_device()) } else { None },
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("🎞  ViewFx");
    println!("   Version:     {}", report.version);
    println!("   Backends:    {}", report.backends.join(", "));
    println!("   CPU drivers: {}", report.cpu_drivers.join(", "));
    println!("   Driver:      {}", report.default_cpu_driver);
    println!(
        "   Threads:     {}",
        report.threads.map_or("rayon default".to_string(), |t| t.to_string())
    );
    println!("   GPU render:  {}", if report.gpu_enabled { "enabled" } else { "disabled" });
    if let Some(gpu) = &report.gpu {
        println!();
        for line in gpu.lines() {
            println!("   {}", line);
        }
    }
    Ok(())
}

#[cfg(feature = "gpu")]
fn probe_gpu_device() -> String {
    match viewfx_render::GpuContext::init(false) {
        Ok(ctx) => ctx.describe(),
        Err(e) => format!("no GPU device: {}", e),
    }
}

#[cfg(not(feature = "gpu"))]
fn probe_gpu_device() -> String {
    "GPU support not compiled in".to_string()
}

fn cmd_config(config: &ViewFxConfig, write: Option<&Path>) -> Result<()> {
    print!("{}", config.to_toml_string()?);
    if let Some(path) = write {
        config.save_to_file(path)?;
        println!("✓ Configuration written to {}", path.display());
    }
    Ok(())
}
