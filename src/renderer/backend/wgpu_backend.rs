// renderer/backend/wgpu_backend.rs
// wgpu implementation of `GpuBackend`.
// Render-pass commands are buffered while a pass is open and replayed into
// a real `wgpu::RenderPass` on `end_render_pass`. Bind groups are built from
// the bound slots at draw time and cached by their exact contents.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;
use std::ops::Range;
use std::sync::Arc;

use winit::window::Window;

use super::{
    AddressMode, BackendError, BackendResult, BindingKind, BlendMode, BufferDescriptor,
    BufferHandle, BufferUsages, CompareFunction, CullMode, FilterMode, GpuBackend, IndexFormat,
    LoadOp, PipelineHandle, RenderPassDescriptor, RenderPipelineDescriptor, SampleKind,
    SamplerDescriptor, SamplerHandle, ScissorRect, ShaderStage, TextureDescriptor, TextureFormat,
    TextureHandle, TextureUsages, VertexFormat, Viewport,
};
use crate::settings::RenderSettings;

const BACK_BUFFER_ID: u64 = 0;

struct TextureEntry {
    texture: Option<wgpu::Texture>,
    view: wgpu::TextureView,
    sample_view: Option<wgpu::TextureView>,
    width: u32,
    height: u32,
    format: TextureFormat,
}

impl TextureEntry {
    fn sampled_view(&self) -> &wgpu::TextureView {
        self.sample_view.as_ref().unwrap_or(&self.view)
    }
}

struct BufferEntry {
    buffer: wgpu::Buffer,
    size: u64,
}

struct PipelineEntry {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    slots: Vec<super::BindingSlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BoundResource {
    Buffer { id: u64, offset: u64, size: u64 },
    Texture(u64),
    Sampler(u64),
}

type BindKey = (u64, Vec<BoundResource>);

enum PassCommand {
    SetPipeline(u64),
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetVertexBuffer(u32, u64, u64),
    SetIndexBuffer(u64, IndexFormat),
    SetBindGroup(BindKey),
    Draw(Range<u32>, Range<u32>),
    DrawIndexed(Range<u32>, i32, Range<u32>),
}

struct PendingPass {
    desc: RenderPassDescriptor,
    commands: Vec<PassCommand>,
    pipeline: Option<u64>,
    bindings: BTreeMap<u32, BoundResource>,
}

struct BlitResources {
    shader: wgpu::ShaderModule,
    layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
}

pub struct WgpuBackend {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    surface_format: TextureFormat,
    next_id: u64,
    textures: HashMap<u64, TextureEntry>,
    buffers: HashMap<u64, BufferEntry>,
    samplers: HashMap<u64, wgpu::Sampler>,
    pipelines: HashMap<u64, PipelineEntry>,
    bind_groups: HashMap<BindKey, wgpu::BindGroup>,
    encoder: Option<wgpu::CommandEncoder>,
    finished: Vec<wgpu::CommandBuffer>,
    pass: Option<PendingPass>,
    frame: Option<wgpu::SurfaceTexture>,
    blit: BlitResources,
}

impl WgpuBackend {
    pub async fn new(window: Arc<Window>, settings: &RenderSettings) -> BackendResult<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .map_err(|err| BackendError::SurfaceCreationFailed(err.to_string()))?;

        log::info!("Surface created successfully!");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| BackendError::InitializationFailed(err.to_string()))?;

        log::info!("Using adapter: {:?}", adapter.get_info());
        log::info!("Using backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|err| BackendError::DeviceCreationFailed(err.to_string()))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let (format, surface_format) = surface_caps
            .formats
            .iter()
            .copied()
            .filter(|f| !f.is_srgb())
            .chain(surface_caps.formats.iter().copied())
            .find_map(|f| from_wgpu_format(f).map(|ours| (f, ours)))
            .ok_or_else(|| {
                BackendError::SurfaceCreationFailed(format!(
                    "no supported surface format in {:?}",
                    surface_caps.formats
                ))
            })?;

        let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT;
        if surface_caps.usages.contains(wgpu::TextureUsages::COPY_DST) {
            usage |= wgpu::TextureUsages::COPY_DST;
        }

        let config = wgpu::SurfaceConfiguration {
            usage,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: settings.present_mode(&surface_caps.present_modes),
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let blit = BlitResources::new(&device);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            surface_format,
            next_id: BACK_BUFFER_ID + 1,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            samplers: HashMap::new(),
            pipelines: HashMap::new(),
            bind_groups: HashMap::new(),
            encoder: None,
            finished: Vec::new(),
            pass: None,
            frame: None,
            blit,
        })
    }

    pub fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    /// Acquires the next surface texture and exposes it as the back buffer.
    pub fn acquire_frame(&mut self) -> BackendResult<TextureHandle> {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(BackendError::OutOfMemory),
            Err(err) => {
                log::warn!("Surface texture unavailable ({err}), reconfiguring");
                self.surface.configure(&self.device, &self.config);
                return Err(BackendError::SurfaceLost);
            }
        };

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.bind_groups
            .retain(|key, _| !key.1.contains(&BoundResource::Texture(BACK_BUFFER_ID)));
        self.textures.insert(
            BACK_BUFFER_ID,
            TextureEntry {
                texture: None,
                view,
                sample_view: None,
                width: self.config.width,
                height: self.config.height,
                format: self.surface_format,
            },
        );
        self.frame = Some(frame);
        Ok(TextureHandle(BACK_BUFFER_ID))
    }

    pub fn present(&mut self) {
        self.textures.remove(&BACK_BUFFER_ID);
        if let Some(frame) = self.frame.take() {
            frame.present();
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn bind_group_for(&mut self, pipeline_id: u64) -> Option<BindKey> {
        let pass = self.pass.as_ref()?;
        let entry = self.pipelines.get(&pipeline_id)?;

        let mut resources = Vec::with_capacity(entry.slots.len());
        for slot in &entry.slots {
            match pass.bindings.get(&slot.binding) {
                Some(resource) => resources.push(*resource),
                None => {
                    log::warn!(
                        "Draw skipped: binding {} of pipeline {} is unbound",
                        slot.binding,
                        pipeline_id
                    );
                    return None;
                }
            }
        }

        let key = (pipeline_id, resources);
        if !self.bind_groups.contains_key(&key) {
            let group = self.create_bind_group(entry, &key.1)?;
            self.bind_groups.insert(key.clone(), group);
        }
        Some(key)
    }

    fn create_bind_group(
        &self,
        entry: &PipelineEntry,
        resources: &[BoundResource],
    ) -> Option<wgpu::BindGroup> {
        let mut entries = Vec::with_capacity(resources.len());
        for (slot, resource) in entry.slots.iter().zip(resources) {
            let binding_resource = match *resource {
                BoundResource::Buffer { id, offset, size } => {
                    let buffer = &self.buffers.get(&id)?.buffer;
                    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer,
                        offset,
                        size: NonZeroU64::new(size),
                    })
                }
                BoundResource::Texture(id) => {
                    wgpu::BindingResource::TextureView(self.textures.get(&id)?.sampled_view())
                }
                BoundResource::Sampler(id) => {
                    wgpu::BindingResource::Sampler(self.samplers.get(&id)?)
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: slot.binding,
                resource: binding_resource,
            });
        }

        Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SlotBindGroup"),
            layout: &entry.layout,
            entries: &entries,
        }))
    }

    fn push_pass_command(&mut self, command: PassCommand) {
        match self.pass.as_mut() {
            Some(pass) => pass.commands.push(command),
            None => log::warn!("Pass command recorded outside a render pass; ignored"),
        }
    }

    fn bind(&mut self, binding: u32, resource: BoundResource) {
        match self.pass.as_mut() {
            Some(pass) => {
                pass.bindings.insert(binding, resource);
            }
            None => log::warn!("Binding {} set outside a render pass; ignored", binding),
        }
    }

    fn blit(&mut self, source: u64, destination: u64) -> BackendResult<()> {
        let dst_format = self
            .textures
            .get(&destination)
            .map(|entry| to_wgpu_format(entry.format))
            .ok_or_else(|| BackendError::UnknownResource("blit destination".to_string()))?;

        if !self.blit.pipelines.contains_key(&dst_format) {
            let pipeline = self.blit.create_pipeline(&self.device, dst_format);
            self.blit.pipelines.insert(dst_format, pipeline);
        }

        let src = self
            .textures
            .get(&source)
            .ok_or_else(|| BackendError::UnknownResource("blit source".to_string()))?;
        let dst = self
            .textures
            .get(&destination)
            .ok_or_else(|| BackendError::UnknownResource("blit destination".to_string()))?;
        let pipeline = self
            .blit
            .pipelines
            .get(&dst_format)
            .ok_or_else(|| BackendError::PipelineCreationFailed("blit".to_string()))?;
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| BackendError::CopyRejected("no open command scope".to_string()))?;

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("BlitBindGroup"),
            layout: &self.blit.layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(src.sampled_view()),
            }],
        });

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("BlitPass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &dst.view,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rpass.set_pipeline(pipeline);
        rpass.set_bind_group(0, &bind_group, &[]);
        rpass.draw(0..3, 0..1);
        Ok(())
    }
}

impl GpuBackend for WgpuBackend {
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{} has invalid extent {}x{} (max {})",
                desc.label, desc.width, desc.height, max
            )));
        }

        let format = to_wgpu_format(desc.format);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: to_wgpu_texture_usage(desc.usage),
            view_formats: &[],
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::TextureCreationFailed(format!(
                "{}: {}",
                desc.label, err
            )));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sample_view = desc.format.has_stencil().then(|| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(&format!("{}DepthView", desc.label)),
                aspect: wgpu::TextureAspect::DepthOnly,
                ..Default::default()
            })
        });

        let id = self.allocate_id();
        log::debug!(
            "Created texture {} ({}x{} {:?}) as #{}",
            desc.label,
            desc.width,
            desc.height,
            desc.format,
            id
        );
        self.textures.insert(
            id,
            TextureEntry {
                texture: Some(texture),
                view,
                sample_view,
                width: desc.width,
                height: desc.height,
                format: desc.format,
            },
        );
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if texture.0 == BACK_BUFFER_ID {
            return;
        }
        if let Some(entry) = self.textures.remove(&texture.0) {
            self.bind_groups
                .retain(|key, _| !key.1.contains(&BoundResource::Texture(texture.0)));
            if let Some(raw) = entry.texture {
                raw.destroy();
            }
        }
    }

    fn texture_exists(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture.0)
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures
            .get(&texture.0)
            .map(|entry| (entry.width, entry.height))
    }

    fn texture_format(&self, texture: TextureHandle) -> Option<TextureFormat> {
        self.textures.get(&texture.0).map(|entry| entry.format)
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) {
        let Some(entry) = self.textures.get(&texture.0) else {
            log::warn!("write_texture on unknown texture #{}", texture.0);
            return;
        };
        let Some(raw) = entry.texture.as_ref() else {
            return;
        };
        let bytes_per_row = entry.width * entry.format.bytes_per_pixel();
        if data.len() as u64 != bytes_per_row as u64 * entry.height as u64 {
            log::warn!(
                "write_texture size mismatch: {} bytes for {}x{}",
                data.len(),
                entry.width,
                entry.height
            );
            return;
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: raw,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(entry.height),
            },
            wgpu::Extent3d {
                width: entry.width,
                height: entry.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{} has zero size",
                desc.label
            )));
        }
        let size = desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size,
            usage: to_wgpu_buffer_usage(desc.usage),
            mapped_at_creation: false,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::BufferCreationFailed(format!(
                "{}: {}",
                desc.label, err
            )));
        }

        let id = self.allocate_id();
        self.buffers.insert(id, BufferEntry { buffer, size });
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(entry) = self.buffers.remove(&buffer.0) {
            self.bind_groups.retain(|key, _| {
                !key.1
                    .iter()
                    .any(|r| matches!(r, BoundResource::Buffer { id, .. } if *id == buffer.0))
            });
            entry.buffer.destroy();
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(entry) = self.buffers.get(&buffer.0) else {
            log::warn!("write_buffer on unknown buffer #{}", buffer.0);
            return;
        };
        if offset + data.len() as u64 > entry.size {
            log::error!(
                "write_buffer overflow: {} bytes at {} into {} byte buffer",
                data.len(),
                offset,
                entry.size
            );
            return;
        }
        self.queue.write_buffer(&entry.buffer, offset, data);
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let filter = match desc.filter {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        };
        let address = match desc.address_mode {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
        };
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&desc.label),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: filter,
            compare: desc.compare.map(to_wgpu_compare),
            ..Default::default()
        });
        let id = self.allocate_id();
        self.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = desc
            .bindings
            .iter()
            .map(|slot| wgpu::BindGroupLayoutEntry {
                binding: slot.binding,
                visibility: match slot.stage {
                    ShaderStage::Vertex => wgpu::ShaderStages::VERTEX,
                    ShaderStage::Fragment => wgpu::ShaderStages::FRAGMENT,
                    ShaderStage::VertexFragment => wgpu::ShaderStages::VERTEX_FRAGMENT,
                },
                ty: match slot.kind {
                    BindingKind::UniformBuffer { size } => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(size),
                    },
                    BindingKind::Texture(sample) => wgpu::BindingType::Texture {
                        sample_type: match sample {
                            SampleKind::Float { filterable } => {
                                wgpu::TextureSampleType::Float { filterable }
                            }
                            SampleKind::Depth => wgpu::TextureSampleType::Depth,
                        },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    BindingKind::Sampler { comparison } => {
                        wgpu::BindingType::Sampler(if comparison {
                            wgpu::SamplerBindingType::Comparison
                        } else {
                            wgpu::SamplerBindingType::Filtering
                        })
                    }
                },
                count: None,
            })
            .collect();

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{}Layout", desc.label)),
                entries: &layout_entries,
            });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{}PipelineLayout", desc.label)),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });

        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("{}Shader", desc.label)),
                source: wgpu::ShaderSource::Wgsl(desc.shader_source.into()),
            });

        let attributes: Vec<wgpu::VertexAttribute> = desc
            .vertex_layout
            .iter()
            .flat_map(|layout| layout.attributes.iter())
            .map(|attr| wgpu::VertexAttribute {
                format: match attr.format {
                    VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
                    VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
                    VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
                },
                offset: attr.offset,
                shader_location: attr.location,
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex_layout
            .iter()
            .map(|layout| wgpu::VertexBufferLayout {
                array_stride: layout.stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            })
            .collect();

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_targets
            .iter()
            .map(|target| {
                Some(wgpu::ColorTargetState {
                    format: to_wgpu_format(target.format),
                    blend: match target.blend {
                        BlendMode::Replace => None,
                        BlendMode::Additive => Some(wgpu::BlendState {
                            color: wgpu::BlendComponent {
                                src_factor: wgpu::BlendFactor::One,
                                dst_factor: wgpu::BlendFactor::One,
                                operation: wgpu::BlendOperation::Add,
                            },
                            alpha: wgpu::BlendComponent {
                                src_factor: wgpu::BlendFactor::One,
                                dst_factor: wgpu::BlendFactor::One,
                                operation: wgpu::BlendOperation::Add,
                            },
                        }),
                        BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
                    },
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let depth_stencil = desc.depth.map(|depth| wgpu::DepthStencilState {
            format: to_wgpu_format(depth.format),
            depth_write_enabled: depth.write,
            depth_compare: to_wgpu_compare(depth.compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState {
                constant: depth.constant_bias,
                slope_scale: depth.slope_bias,
                clamp: 0.0,
            },
        });

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&desc.label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some(desc.vertex_entry),
                    buffers: &vertex_buffers,
                    compilation_options: Default::default(),
                },
                fragment: desc.fragment_entry.map(|entry| wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(entry),
                    targets: &color_targets,
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: match desc.cull_mode {
                        CullMode::None => None,
                        CullMode::Back => Some(wgpu::Face::Back),
                        CullMode::Front => Some(wgpu::Face::Front),
                    },
                    front_face: wgpu::FrontFace::Ccw,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{}: {}",
                desc.label, err
            )));
        }

        let id = self.allocate_id();
        log::info!("Created pipeline {} as #{}", desc.label, id);
        self.pipelines.insert(
            id,
            PipelineEntry {
                pipeline,
                layout,
                slots: desc.bindings.clone(),
            },
        );
        Ok(PipelineHandle(id))
    }

    fn back_buffer(&self) -> Option<TextureHandle> {
        self.frame
            .as_ref()
            .map(|_| TextureHandle(BACK_BUFFER_ID))
    }

    fn begin_commands(&mut self, label: &str) {
        if self.encoder.is_some() {
            log::warn!("begin_commands({label}) while a scope is open; closing it first");
            self.end_commands();
        }
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) }),
        );
    }

    fn end_commands(&mut self) {
        if self.pass.is_some() {
            log::warn!("end_commands with an open render pass; ending it");
            self.end_render_pass();
        }
        if let Some(encoder) = self.encoder.take() {
            self.finished.push(encoder.finish());
        }
    }

    fn execute(&mut self) {
        if self.finished.is_empty() {
            return;
        }
        self.queue.submit(self.finished.drain(..));
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        if self.pass.is_some() {
            log::warn!("begin_render_pass({}) while a pass is open", desc.label);
            self.end_render_pass();
        }
        self.pass = Some(PendingPass {
            desc: desc.clone(),
            commands: Vec::new(),
            pipeline: None,
            bindings: BTreeMap::new(),
        });
    }

    fn end_render_pass(&mut self) {
        let Some(pass) = self.pass.take() else {
            log::warn!("end_render_pass without an open pass");
            return;
        };
        let Some(encoder) = self.encoder.as_mut() else {
            log::warn!("Render pass {} recorded outside a command scope", pass.desc.label);
            return;
        };

        let textures = &self.textures;
        let mut color_attachments = Vec::with_capacity(pass.desc.color_attachments.len());
        for attachment in &pass.desc.color_attachments {
            let Some(entry) = textures.get(&attachment.texture.0) else {
                log::warn!(
                    "Render pass {} skipped: color target #{} is gone",
                    pass.desc.label,
                    attachment.texture.0
                );
                return;
            };
            color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                view: &entry.view,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: match attachment.load {
                        LoadOp::Clear(c) => wgpu::LoadOp::Clear(wgpu::Color {
                            r: c[0],
                            g: c[1],
                            b: c[2],
                            a: c[3],
                        }),
                        LoadOp::Load => wgpu::LoadOp::Load,
                    },
                    store: wgpu::StoreOp::Store,
                },
            }));
        }

        let depth_stencil_attachment = match pass.desc.depth_attachment {
            Some(attachment) => {
                let Some(entry) = textures.get(&attachment.texture.0) else {
                    log::warn!(
                        "Render pass {} skipped: depth target #{} is gone",
                        pass.desc.label,
                        attachment.texture.0
                    );
                    return;
                };
                let (depth_ops, stencil_ops) = if attachment.depth_write {
                    let depth_ops = wgpu::Operations {
                        load: match attachment.depth_load {
                            LoadOp::Clear(value) => wgpu::LoadOp::Clear(value),
                            LoadOp::Load => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    };
                    let stencil_ops = entry.format.has_stencil().then(|| wgpu::Operations {
                        load: match attachment.stencil_load {
                            LoadOp::Clear(value) => wgpu::LoadOp::Clear(value),
                            LoadOp::Load => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    });
                    (Some(depth_ops), stencil_ops)
                } else {
                    (None, None)
                };
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &entry.view,
                    depth_ops,
                    stencil_ops,
                })
            }
            None => None,
        };

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&pass.desc.label),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for command in &pass.commands {
            match command {
                PassCommand::SetPipeline(id) => {
                    if let Some(entry) = self.pipelines.get(id) {
                        rpass.set_pipeline(&entry.pipeline);
                    }
                }
                PassCommand::SetViewport(v) => {
                    rpass.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth)
                }
                PassCommand::SetScissor(r) => rpass.set_scissor_rect(r.x, r.y, r.width, r.height),
                PassCommand::SetVertexBuffer(slot, id, offset) => {
                    if let Some(entry) = self.buffers.get(id) {
                        rpass.set_vertex_buffer(*slot, entry.buffer.slice(*offset..));
                    }
                }
                PassCommand::SetIndexBuffer(id, format) => {
                    if let Some(entry) = self.buffers.get(id) {
                        let format = match format {
                            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
                        };
                        rpass.set_index_buffer(entry.buffer.slice(..), format);
                    }
                }
                PassCommand::SetBindGroup(key) => {
                    if let Some(group) = self.bind_groups.get(key) {
                        rpass.set_bind_group(0, group, &[]);
                    }
                }
                PassCommand::Draw(vertices, instances) => {
                    rpass.draw(vertices.clone(), instances.clone())
                }
                PassCommand::DrawIndexed(indices, base_vertex, instances) => {
                    rpass.draw_indexed(indices.clone(), *base_vertex, instances.clone())
                }
            }
        }
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        if let Some(pass) = self.pass.as_mut() {
            pass.pipeline = Some(pipeline.0);
        }
        self.push_pass_command(PassCommand::SetPipeline(pipeline.0));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.push_pass_command(PassCommand::SetViewport(viewport));
    }

    fn set_scissor(&mut self, rect: ScissorRect) {
        self.push_pass_command(PassCommand::SetScissor(rect));
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.push_pass_command(PassCommand::SetVertexBuffer(slot, buffer.0, offset));
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat) {
        self.push_pass_command(PassCommand::SetIndexBuffer(buffer.0, format));
    }

    fn bind_constant_buffer(&mut self, binding: u32, buffer: BufferHandle, offset: u64, size: u64) {
        self.bind(
            binding,
            BoundResource::Buffer {
                id: buffer.0,
                offset,
                size,
            },
        );
    }

    fn bind_texture(&mut self, binding: u32, texture: TextureHandle) {
        self.bind(binding, BoundResource::Texture(texture.0));
    }

    fn bind_sampler(&mut self, binding: u32, sampler: SamplerHandle) {
        self.bind(binding, BoundResource::Sampler(sampler.0));
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        let Some(pipeline) = self.pass.as_ref().and_then(|pass| pass.pipeline) else {
            log::warn!("Draw without a pipeline; skipped");
            return;
        };
        if let Some(key) = self.bind_group_for(pipeline) {
            self.push_pass_command(PassCommand::SetBindGroup(key));
            self.push_pass_command(PassCommand::Draw(vertices, instances));
        }
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        let Some(pipeline) = self.pass.as_ref().and_then(|pass| pass.pipeline) else {
            log::warn!("Indexed draw without a pipeline; skipped");
            return;
        };
        if let Some(key) = self.bind_group_for(pipeline) {
            self.push_pass_command(PassCommand::SetBindGroup(key));
            self.push_pass_command(PassCommand::DrawIndexed(indices, base_vertex, instances));
        }
    }

    fn copy_texture(
        &mut self,
        source: TextureHandle,
        destination: TextureHandle,
    ) -> BackendResult<()> {
        if self.pass.is_some() {
            return Err(BackendError::CopyRejected(
                "copy inside an open render pass".to_string(),
            ));
        }
        let (Some(src), Some(dst)) = (
            self.texture_size(source).zip(self.texture_format(source)),
            self.texture_size(destination).zip(self.texture_format(destination)),
        ) else {
            return Err(BackendError::UnknownResource(
                "copy source or destination".to_string(),
            ));
        };
        let ((width, height), src_format) = src;
        let (dst_size, dst_format) = dst;
        if (width, height) != dst_size {
            return Err(BackendError::CopyRejected(format!(
                "{}x{} into {}x{}",
                width, height, dst_size.0, dst_size.1
            )));
        }
        if src_format != dst_format {
            return self.blit(source.0, destination.0);
        }

        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let (Some(src_raw), Some(dst_raw)) = (
            raw_texture(&self.textures, &self.frame, source.0),
            raw_texture(&self.textures, &self.frame, destination.0),
        ) else {
            return Err(BackendError::UnknownResource("raw copy texture".to_string()));
        };
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| BackendError::CopyRejected("no open command scope".to_string()))?;
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: src_raw,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: dst_raw,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            extent,
        );
        Ok(())
    }
}

impl BlitResources {
    fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("BlitShader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shader/blit.wgsl").into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("BlitLayout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("BlitPipelineLayout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        Self {
            shader,
            layout,
            pipeline_layout,
            pipelines: HashMap::new(),
        }
    }

    fn create_pipeline(
        &self,
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
    ) -> wgpu::RenderPipeline {
        log::info!("Creating blit pipeline for {:?}", format);
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("BlitPipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.shader,
                entry_point: Some("vs_fullscreen"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.shader,
                entry_point: Some("fs_blit"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

fn raw_texture<'a>(
    textures: &'a HashMap<u64, TextureEntry>,
    frame: &'a Option<wgpu::SurfaceTexture>,
    id: u64,
) -> Option<&'a wgpu::Texture> {
    if id == BACK_BUFFER_ID {
        return frame.as_ref().map(|frame| &frame.texture);
    }
    textures.get(&id).and_then(|entry| entry.texture.as_ref())
}

fn to_wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

fn from_wgpu_format(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    match format {
        wgpu::TextureFormat::Rgba8Unorm => Some(TextureFormat::Rgba8Unorm),
        wgpu::TextureFormat::Rgba8UnormSrgb => Some(TextureFormat::Rgba8UnormSrgb),
        wgpu::TextureFormat::Bgra8Unorm => Some(TextureFormat::Bgra8Unorm),
        wgpu::TextureFormat::Bgra8UnormSrgb => Some(TextureFormat::Bgra8UnormSrgb),
        _ => None,
    }
}

fn to_wgpu_texture_usage(usage: TextureUsages) -> wgpu::TextureUsages {
    let mut out = wgpu::TextureUsages::empty();
    if usage.contains(TextureUsages::COPY_SRC) {
        out |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(TextureUsages::COPY_DST) {
        out |= wgpu::TextureUsages::COPY_DST;
    }
    if usage.contains(TextureUsages::SAMPLED) {
        out |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsages::RENDER_TARGET) {
        out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    out
}

fn to_wgpu_buffer_usage(usage: BufferUsages) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsages::VERTEX) {
        out |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsages::INDEX) {
        out |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsages::UNIFORM) {
        out |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsages::COPY_DST) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    out
}

fn to_wgpu_compare(compare: CompareFunction) -> wgpu::CompareFunction {
    match compare {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}
