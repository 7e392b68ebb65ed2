use std::sync::Arc;

use viewfx_core::{
    BitDepth, Components, ImageRef, Pixel, PlaneMut, RectI, TileScheduler, ViewFxError,
    ViewFxResult,
};
use wgpu::util::DeviceExt;

use crate::backend::{WarpJob, WarpRenderer};
use crate::gpu::GpuContext;
use crate::mesh::MeshTriangle;
use crate::validate::check_source;

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const TEXEL_BYTES: u32 = 16;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 2],
    uv: [f32; 2],
}

/// The warp mesh drawn with wgpu into a float render target.
pub struct GpuWarp {
    gpu: Arc<GpuContext>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    sampler_anisotropic: wgpu::Sampler,
}

impl GpuWarp {
    pub fn new(gpu: Arc<GpuContext>) -> Self {
        let shader = gpu.device.create_shader_module(wgpu::include_wgsl!("warp.wgsl"));

        let bind_group_layout = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("warp_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("warp_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = gpu.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("warp_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TEXTURE_FORMAT,
                    // Later triangles replace earlier ones.
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("warp_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        // Anisotropy requires every filter to be linear.
        let sampler_anisotropic = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("warp_sampler_anisotropic"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            anisotropy_clamp: crate::raster::MAX_ANISOTROPY as u16,
            ..Default::default()
        });

        Self {
            gpu,
            pipeline,
            bind_group_layout,
            sampler,
            sampler_anisotropic,
        }
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.gpu
    }

    /// Draw `vertices` over the source texels into a `window`-sized target and
    /// read it back as tightly packed RGBA rows.
    fn draw(
        &self,
        texels: &[f32],
        src_size: (u32, u32),
        target_size: (u32, u32),
        vertices: &[Vertex],
        anisotropic: bool,
    ) -> anyhow::Result<Vec<f32>> {
        let (src_w, src_h) = src_size;
        let (dst_w, dst_h) = target_size;
        let max = self.gpu.device.limits().max_texture_dimension_2d;
        if src_w.max(src_h).max(dst_w).max(dst_h) > max {
            anyhow::bail!(
                "texture of {}x{} or target of {}x{} exceeds the device limit of {}",
                src_w,
                src_h,
                dst_w,
                dst_h,
                max
            );
        }

        let usage_src = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        let tex_src = self.gpu.texture_pool.acquire(
            &self.gpu.device,
            Some("warp_src"),
            src_w,
            src_h,
            TEXTURE_FORMAT,
            usage_src,
        );
        let usage_dst = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
        let tex_dst = self.gpu.texture_pool.acquire(
            &self.gpu.device,
            Some("warp_dst"),
            dst_w,
            dst_h,
            TEXTURE_FORMAT,
            usage_dst,
        );

        self.gpu.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &tex_src,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(texels),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(src_w * TEXEL_BYTES),
                rows_per_image: Some(src_h),
            },
            wgpu::Extent3d {
                width: src_w,
                height: src_h,
                depth_or_array_layers: 1,
            },
        );

        let view_src = tex_src.create_view(&wgpu::TextureViewDescriptor::default());
        let view_dst = tex_dst.create_view(&wgpu::TextureViewDescriptor::default());

        let vb = self.gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("warp_vertex_buffer"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let sampler = if anisotropic {
            &self.sampler_anisotropic
        } else {
            &self.sampler
        };
        let bind_group = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("warp_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view_src),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        let padded_row = padded_bytes_per_row(dst_w);
        let out_buf = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("warp_readback"),
            size: u64::from(padded_row) * u64::from(dst_h),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("warp_encoder"),
            });

        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("warp_render_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view_dst,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            rpass.set_pipeline(&self.pipeline);
            rpass.set_bind_group(0, &bind_group, &[]);
            rpass.set_vertex_buffer(0, vb.slice(..));
            rpass.draw(0..vertices.len() as u32, 0..1);
        }

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &tex_dst,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &out_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(dst_h),
                },
            },
            wgpu::Extent3d {
                width: dst_w,
                height: dst_h,
                depth_or_array_layers: 1,
            },
        );

        self.gpu.queue.submit(Some(encoder.finish()));

        let slice = out_buf.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        self.gpu.device.poll(wgpu::Maintain::Wait);

        let mapped = rx
            .recv()
            .map_err(|_| anyhow::anyhow!("readback callback dropped"))
            .and_then(|r| r.map_err(|e| anyhow::anyhow!("failed to map warp readback buffer: {}", e)));

        let result = mapped.map(|()| {
            let data = slice.get_mapped_range();
            let row_bytes = (dst_w * TEXEL_BYTES) as usize;
            let mut texels = Vec::with_capacity((dst_w * dst_h * 4) as usize);
            for row in data.chunks_exact(padded_row as usize) {
                texels.extend(
                    row[..row_bytes]
                        .chunks_exact(4)
                        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
                );
            }
            texels
        });
        if result.is_ok() {
            out_buf.unmap();
        }

        self.gpu.texture_pool.release(tex_src);
        self.gpu.texture_pool.release(tex_dst);
        result
    }
}

fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * TEXEL_BYTES;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Mesh triangles in NDC of the `window` target, texture coordinates
/// normalised over `src`.
fn build_vertices(triangles: &[MeshTriangle], window: RectI, src: RectI) -> Vec<Vertex> {
    let (win_w, win_h) = (window.width() as f64, window.height() as f64);
    let (src_w, src_h) = (src.width() as f64, src.height() as f64);
    triangles
        .iter()
        .flat_map(|t| {
            (0..3).map(move |i| {
                let p = t.pos[i];
                let uv = t.uv[i];
                Vertex {
                    position: [
                        ((p.x - f64::from(window.x1)) / win_w * 2.0 - 1.0) as f32,
                        (1.0 - (p.y - f64::from(window.y1)) / win_h * 2.0) as f32,
                    ],
                    uv: [
                        ((uv.x - f64::from(src.x1)) / src_w) as f32,
                        ((uv.y - f64::from(src.y1)) / src_h) as f32,
                    ],
                }
            })
        })
        .collect()
}

/// Source pixels as RGBA float texels. Alpha-only images go to the alpha
/// channel; RGB images get zero alpha.
fn expand_texels<P: Pixel>(src: &ImageRef<'_>) -> Option<Vec<f32>> {
    let plane = src.typed::<P>()?;
    let bounds = plane.bounds();
    let channels = plane.channels();
    let mut texels = Vec::with_capacity(bounds.width() as usize * bounds.height() as usize * 4);
    for y in bounds.y1..bounds.y2 {
        let row = plane.row(y)?;
        for px in row.chunks_exact(channels) {
            let v = |c: usize| px[c].to_f64() as f32;
            match channels {
                1 => texels.extend([0.0, 0.0, 0.0, v(0)]),
                3 => texels.extend([v(0), v(1), v(2), 0.0]),
                _ => texels.extend([v(0), v(1), v(2), v(3)]),
            }
        }
    }
    Some(texels)
}

fn store_texels<P: Pixel>(
    plane: PlaneMut<'_, P>,
    window: RectI,
    texels: &[f32],
    abort: &viewfx_core::AbortFlag,
) -> ViewFxResult<()> {
    let channels = plane.channels();
    let width = window.width() as usize;
    TileScheduler::single_band().process_rows(plane, window, abort, |mut band| {
        for (y, row) in band.rows() {
            let start = (y - window.y1) as usize * width * 4;
            let src_row = &texels[start..start + width * 4];
            for (out, texel) in row.chunks_exact_mut(channels).zip(src_row.chunks_exact(4)) {
                match channels {
                    1 => out[0] = P::from_f64(f64::from(texel[3])),
                    n => {
                        for c in 0..n.min(4) {
                            out[c] = P::from_f64(f64::from(texel[c]));
                        }
                    }
                }
            }
        }
    })
}

fn store_typed<P: Pixel>(
    dst: viewfx_core::ImageMut<'_>,
    window: RectI,
    texels: &[f32],
    abort: &viewfx_core::AbortFlag,
) -> ViewFxResult<()> {
    let plane = dst
        .typed_mut::<P>()
        .ok_or_else(|| ViewFxError::Render("destination storage does not match its bit depth".into()))?;
    store_texels(plane, window, texels, abort)
}

impl WarpRenderer for GpuWarp {
    fn render(&self, job: WarpJob<'_>) -> ViewFxResult<()> {
        let WarpJob {
            src,
            dst,
            window,
            triangles,
            options,
            abort,
        } = job;
        check_source("Source", &src, &dst)?;
        if dst.components() == Components::Xy {
            return Err(ViewFxError::unsupported("two-channel images cannot be warped"));
        }
        if !dst.bounds().contains(&window) {
            return Err(ViewFxError::InvalidArgument(format!(
                "render window {:?} is outside destination bounds {:?}",
                window,
                dst.bounds()
            )));
        }
        if window.is_empty() || abort.is_requested() {
            return Ok(());
        }

        let src_bounds = src.bounds();
        let width = window.width() as usize;
        let height = window.height() as usize;
        let texels = if src_bounds.is_empty() {
            vec![0.0; width * height * 4]
        } else {
            let upload = match src.depth() {
                BitDepth::UByte => expand_texels::<u8>(&src),
                BitDepth::UShort => expand_texels::<u16>(&src),
                BitDepth::Float => expand_texels::<f32>(&src),
            }
            .ok_or_else(|| ViewFxError::Render("source storage does not match its bit depth".into()))?;
            let vertices = build_vertices(triangles, window, src_bounds);
            if options.mipmap {
                tracing::debug!("mipmapping is not available on the GPU path");
            }
            self.draw(
                &upload,
                (src_bounds.width() as u32, src_bounds.height() as u32),
                (window.width() as u32, window.height() as u32),
                &vertices,
                options.anisotropic,
            )
            .map_err(|e| ViewFxError::Render(format!("{:#}", e)))?
        };

        tracing::debug!(window = ?window, fallback = self.gpu.fallback, "GPU warp finished");
        match dst.depth() {
            BitDepth::UByte => store_typed::<u8>(dst, window, &texels, abort),
            BitDepth::UShort => store_typed::<u16>(dst, window, &texels, abort),
            BitDepth::Float => store_typed::<f32>(dst, window, &texels, abort),
        }
    }

    fn describe(&self) -> String {
        format!(
            "{}\nfiltering: bilinear, anisotropic x{} (no mipmaps)",
            self.gpu.describe(),
            crate::raster::MAX_ANISOTROPY
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viewfx_core::{ImageBuffer, PointD};

    #[test]
    fn test_padded_rows_are_aligned() {
        assert_eq!(padded_bytes_per_row(16), 256);
        assert_eq!(padded_bytes_per_row(17), 512);
        assert_eq!(padded_bytes_per_row(1), 256);
    }

    #[test]
    fn test_vertices_map_window_to_ndc() {
        let tri = MeshTriangle {
            pos: [
                PointD::new(10.0, 20.0),
                PointD::new(30.0, 20.0),
                PointD::new(30.0, 60.0),
            ],
            uv: [
                PointD::new(0.0, 0.0),
                PointD::new(50.0, 0.0),
                PointD::new(50.0, 100.0),
            ],
        };
        let verts = build_vertices(&[tri], RectI::new(10, 20, 30, 60), RectI::new(0, 0, 100, 100));
        assert_eq!(verts.len(), 3);
        assert_eq!(verts[0].position, [-1.0, 1.0]);
        assert_eq!(verts[2].position, [1.0, -1.0]);
        assert_eq!(verts[1].uv, [0.5, 0.0]);
        assert_eq!(verts[2].uv, [0.5, 1.0]);
    }

    #[test]
    fn test_alpha_expands_into_alpha_channel() {
        let img = ImageBuffer::from_pixels(RectI::from_size(2, 1), Components::Alpha, vec![7u16, 9]).unwrap();
        let texels = expand_texels::<u16>(&img.view()).unwrap();
        assert_eq!(texels, vec![0.0, 0.0, 0.0, 7.0, 0.0, 0.0, 0.0, 9.0]);
    }
}
