use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use wgpu::util::DeviceExt;

use crate::drawer::DrawRequest;
use crate::errors::ReadbackError;
use crate::texture::TextureId;
use crate::types::{AdapterProfile, FeatureLevel};

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const PROGRAM_SOURCE: &str = include_str!("programs.wgsl");

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct DrawUniforms {
    tex_matrix: [f32; 16],
    mvp: [f32; 16],
    color_matrix: [f32; 16],
    color_offset: [f32; 4],
    effect: u32,
    _pad: [u32; 3],
}

impl DrawUniforms {
    fn from_request(request: &DrawRequest) -> Self {
        let (color_matrix, color_offset) = request.program.color_matrix_columns();
        Self {
            tex_matrix: request.tex_matrix,
            mvp: request.mvp,
            color_matrix,
            color_offset,
            effect: request.program.effect.index(),
            _pad: [0; 3],
        }
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct ProgramPipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

/// Hardware device shared by every context in a share group.
pub(crate) struct WgpuDevice {
    profile: AdapterProfile,
    device: wgpu::Device,
    queue: wgpu::Queue,
    programs: ProgramPipeline,
    textures: Mutex<HashMap<TextureId, GpuTexture>>,
}

impl WgpuDevice {
    pub(crate) fn open(label: &str) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let info = adapter.get_info();
        let limits = adapter.limits();
        let feature_level = if adapter.get_downlevel_capabilities().is_webgpu_compliant() {
            FeatureLevel::High
        } else {
            FeatureLevel::Baseline
        };
        let profile = AdapterProfile::from_wgpu(
            &info,
            &limits,
            feature_level,
            extension_names(adapter.features()),
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let programs = ProgramPipeline::new(&device);

        Ok(Self {
            profile,
            device,
            queue,
            programs,
            textures: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn profile(&self) -> &AdapterProfile {
        &self.profile
    }

    fn textures(&self) -> Result<MutexGuard<'_, HashMap<TextureId, GpuTexture>>> {
        self.textures
            .lock()
            .map_err(|_| anyhow!("gpu texture table poisoned"))
    }

    pub(crate) fn create_texture(&self, id: TextureId, width: u32, height: u32) -> Result<()> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pipeline texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.textures()?.insert(
            id,
            GpuTexture {
                texture,
                view,
                width: width.max(1),
                height: height.max(1),
            },
        );
        Ok(())
    }

    pub(crate) fn write_texture(&self, id: TextureId, pixels: &RgbaImage) -> Result<()> {
        let textures = self.textures()?;
        let slot = textures
            .get(&id)
            .ok_or_else(|| anyhow!("unknown texture {id}"))?;
        let (width, height) = pixels.dimensions();
        if (slot.width, slot.height) != (width, height) {
            bail!(
                "upload of {width}x{height} into {id} sized {}x{}",
                slot.width,
                slot.height
            );
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &slot.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    pub(crate) fn texture_size(&self, id: TextureId) -> Option<(u32, u32)> {
        self.textures
            .lock()
            .ok()
            .and_then(|textures| textures.get(&id).map(|t| (t.width, t.height)))
    }

    pub(crate) fn destroy_texture(&self, id: TextureId) -> bool {
        let removed = self
            .textures
            .lock()
            .ok()
            .and_then(|mut textures| textures.remove(&id));
        match removed {
            Some(entry) => {
                entry.texture.destroy();
                true
            }
            None => false,
        }
    }

    pub(crate) fn texture_count(&self) -> usize {
        self.textures.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub(crate) fn draw(&self, request: &DrawRequest) -> Result<()> {
        let textures = self.textures()?;
        let source = textures
            .get(&request.source)
            .ok_or_else(|| anyhow!("unknown draw source {}", request.source))?;
        let target = textures
            .get(&request.target)
            .ok_or_else(|| anyhow!("unknown draw target {}", request.target))?;
        if request.source == request.target {
            bail!("cannot draw {} into itself", request.source);
        }

        let uniforms = DrawUniforms::from_request(request);
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("draw uniforms"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("draw bind group"),
            layout: &self.programs.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.programs.sampler),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("draw encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("draw pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_pipeline(&self.programs.pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..6, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    pub(crate) fn read_texture(&self, id: TextureId) -> Result<RgbaImage, ReadbackError> {
        let textures = self
            .textures
            .lock()
            .map_err(|_| ReadbackError::Map("gpu texture table poisoned".to_string()))?;
        let source = textures
            .get(&id)
            .ok_or(ReadbackError::UnknownTexture(id.raw()))?;
        let (width, height) = (source.width, source.height);
        let unpadded = width * 4;
        let padded = aligned_bytes_per_row(width);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size: u64::from(padded) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        drop(textures);

        let slice = staging.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| ReadbackError::Map(err.to_string()))?;
        rx.recv()
            .map_err(|_| ReadbackError::Map("map callback dropped".to_string()))?
            .map_err(|err| ReadbackError::Map(err.to_string()))?;

        let mut pixels = Vec::with_capacity((unpadded * height) as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded as usize).take(height as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        staging.unmap();

        let actual = pixels.len();
        RgbaImage::from_raw(width, height, pixels).ok_or(ReadbackError::SizeMismatch {
            expected: (unpadded * height) as usize,
            actual,
        })
    }
}

impl ProgramPipeline {
    fn new(device: &wgpu::Device) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("built-in programs"),
            source: wgpu::ShaderSource::Wgsl(PROGRAM_SOURCE.into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("program layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("program pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("program pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TEXTURE_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            pipeline,
            layout,
            sampler,
        }
    }
}

fn aligned_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

fn extension_names(features: wgpu::Features) -> Vec<String> {
    let mut names = vec!["external-texture".to_string(), "color-matrix".to_string()];
    let optional = [
        (wgpu::Features::TEXTURE_COMPRESSION_BC, "texture-compression-bc"),
        (wgpu::Features::FLOAT32_FILTERABLE, "float32-filterable"),
        (wgpu::Features::TIMESTAMP_QUERY, "timestamp-query"),
        (wgpu::Features::PUSH_CONSTANTS, "push-constants"),
    ];
    for (feature, name) in optional {
        if features.contains(feature) {
            names.push(name.to_string());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<DrawUniforms>(), 224);
    }

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(aligned_bytes_per_row(1), 256);
        assert_eq!(aligned_bytes_per_row(64), 256);
        assert_eq!(aligned_bytes_per_row(65), 512);
    }

    #[test]
    #[ignore = "requires GPU adapter"]
    fn gpu_copy_round_trips_pixels() {
        let device = WgpuDevice::open("test device").expect("adapter");
        let image = RgbaImage::from_fn(5, 3, |x, y| image::Rgba([x as u8 * 40, y as u8 * 60, 9, 255]));
        device.create_texture(TextureId(1), 5, 3).unwrap();
        device.create_texture(TextureId(2), 5, 3).unwrap();
        device.write_texture(TextureId(1), &image).unwrap();
        device
            .draw(&DrawRequest::copy(TextureId(1), TextureId(2)))
            .unwrap();
        assert_eq!(device.read_texture(TextureId(2)).unwrap(), image);
    }
}
