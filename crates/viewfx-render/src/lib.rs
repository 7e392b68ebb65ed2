//! # viewfx-render
//!
//! The ViewFx effects. `MixViews` blends the two views of a stereo clip;
//! `TestWarp` deforms an image through a four-triangle mesh, either with the
//! built-in software rasterizer or on the GPU through wgpu.

pub mod backend;
pub mod mesh;
pub mod mix;
pub mod raster;
pub mod renderer_info;
pub mod validate;
pub mod warp;

#[cfg(feature = "gpu")]
pub mod gpu;
#[cfg(feature = "gpu")]
pub mod gpu_warp;

pub use backend::{select_backend, BackendKind, BackendState, CpuDriver, SoftwareRenderer, WarpJob, WarpRenderer};
pub use mesh::{MeshTriangle, WarpDirection, WarpMesh};
pub use mix::{mix_views, MixViews};
pub use raster::{warp_image, SampleOptions};
pub use renderer_info::RendererInfo;
pub use warp::TestWarp;

#[cfg(feature = "gpu")]
pub use gpu::GpuContext;
#[cfg(feature = "gpu")]
pub use gpu_warp::GpuWarp;
