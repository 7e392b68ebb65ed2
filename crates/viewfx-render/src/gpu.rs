use parking_lot::Mutex;
use std::collections::HashMap;
use viewfx_core::{ViewFxError, ViewFxResult};
use wgpu::{
    Adapter, AdapterInfo, Device, Extent3d, Instance, Queue, Texture, TextureDescriptor,
    TextureFormat, TextureUsages,
};

#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct TextureDescKey {
    width: u32,
    height: u32,
    format: TextureFormat,
    usage: TextureUsages,
}

/// Free textures kept between renders, keyed by size, format and usage.
pub struct TexturePool {
    free_textures: Mutex<HashMap<TextureDescKey, Vec<Texture>>>,
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}

impl TexturePool {
    pub fn new() -> Self {
        Self {
            free_textures: Mutex::new(HashMap::new()),
        }
    }

    pub fn acquire(
        &self,
        device: &Device,
        label: Option<&str>,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsages,
    ) -> Texture {
        let key = TextureDescKey {
            width,
            height,
            format,
            usage,
        };
        if let Some(texture) = self
            .free_textures
            .lock()
            .get_mut(&key)
            .and_then(|textures| textures.pop())
        {
            return texture;
        }

        device.create_texture(&TextureDescriptor {
            label,
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        })
    }

    pub fn release(&self, texture: Texture) {
        let key = TextureDescKey {
            width: texture.width(),
            height: texture.height(),
            format: texture.format(),
            usage: texture.usage(),
        };
        self.free_textures.lock().entry(key).or_default().push(texture);
    }

    /// Number of textures waiting for reuse.
    pub fn free_count(&self) -> usize {
        self.free_textures.lock().values().map(Vec::len).sum()
    }
}

/// A wgpu device shared by every GPU warp of one effect instance.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
    pub texture_pool: TexturePool,
    pub info: AdapterInfo,
    /// Created on wgpu's software fallback adapter.
    pub fallback: bool,
}

impl GpuContext {
    /// Features the warp cannot run without: float textures are sampled with
    /// linear filtering.
    pub const REQUIRED_FEATURES: wgpu::Features = wgpu::Features::FLOAT32_FILTERABLE;

    /// Initialize wgpu on the best available adapter, or on the CPU fallback
    /// adapter when `fallback` is set.
    pub fn init(fallback: bool) -> ViewFxResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None, // Headless rendering
            force_fallback_adapter: fallback,
        }))
        .ok_or_else(|| {
            ViewFxError::BackendUnavailable(if fallback {
                "no wgpu fallback adapter available".to_string()
            } else {
                "failed to find a suitable wgpu adapter".to_string()
            })
        })?;

        let info = adapter.get_info();
        let missing = Self::REQUIRED_FEATURES - adapter.features();
        if !missing.is_empty() {
            return Err(ViewFxError::MissingCapability(format!(
                "adapter '{}' lacks {:?}",
                info.name, missing
            )));
        }

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("ViewFx Warp Device"),
                required_features: Self::REQUIRED_FEATURES,
                required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
            },
            None,
        ))
        .map_err(|e| ViewFxError::BackendUnavailable(format!("wgpu device request failed: {}", e)))?;

        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            fallback,
            "GPU context acquired"
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            texture_pool: TexturePool::new(),
            info,
            fallback,
        })
    }

    /// Human-readable adapter description for the renderer info message.
    pub fn describe(&self) -> String {
        let kind = if self.fallback {
            "wgpu fallback adapter (CPU)"
        } else {
            "wgpu GPU adapter"
        };
        format!(
            "{}\nrenderer: {}\nbackend: {:?}\ndevice type: {:?}\ndriver: {} {}\nmax texture size: {}",
            kind,
            self.info.name,
            self.info.backend,
            self.info.device_type,
            self.info.driver,
            self.info.driver_info,
            self.device.limits().max_texture_dimension_2d,
        )
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        tracing::info!(adapter = %self.info.name, fallback = self.fallback, "GPU context torn down");
    }
}
