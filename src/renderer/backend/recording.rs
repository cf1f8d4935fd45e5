// renderer/backend/recording.rs
// Backend that performs no GPU work and records every command.
// Used by the headless tests and anywhere the frame core must run without
// an adapter.

use std::collections::HashMap;
use std::ops::Range;

use super::{
    BackendError, BackendResult, BufferDescriptor, BufferHandle, GpuBackend, IndexFormat,
    PipelineHandle, RenderPassDescriptor, RenderPipelineDescriptor, SamplerDescriptor,
    SamplerHandle, ScissorRect, TextureDescriptor, TextureFormat, TextureHandle, Viewport,
};

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginCommands(String),
    EndCommands,
    Execute,
    BeginRenderPass(RenderPassDescriptor),
    EndRenderPass,
    SetPipeline(PipelineHandle),
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetVertexBuffer { slot: u32, buffer: BufferHandle },
    SetIndexBuffer(BufferHandle),
    BindConstantBuffer { binding: u32, buffer: BufferHandle, offset: u64 },
    BindTexture { binding: u32, texture: TextureHandle },
    BindSampler { binding: u32, sampler: SamplerHandle },
    Draw { vertices: Range<u32> },
    DrawIndexed { indices: Range<u32>, base_vertex: i32 },
    CopyTexture { source: TextureHandle, destination: TextureHandle },
}

#[derive(Debug, Clone)]
struct TextureRecord {
    label: String,
    width: u32,
    height: u32,
    format: TextureFormat,
}

#[derive(Debug)]
pub struct RecordingBackend {
    next_id: u64,
    textures: HashMap<u64, TextureRecord>,
    buffers: HashMap<u64, BufferDescriptor>,
    pipelines: HashMap<u64, String>,
    back_buffer: TextureHandle,
    commands: Vec<RecordedCommand>,
    failing_labels: Vec<String>,
    texture_creations: usize,
}

impl RecordingBackend {
    pub fn new(width: u32, height: u32) -> Self {
        let mut backend = Self {
            next_id: 1,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            pipelines: HashMap::new(),
            back_buffer: TextureHandle(0),
            commands: Vec::new(),
            failing_labels: Vec::new(),
            texture_creations: 0,
        };
        backend.textures.insert(
            0,
            TextureRecord {
                label: "BackBuffer".to_string(),
                width,
                height,
                format: TextureFormat::Bgra8Unorm,
            },
        );
        backend
    }

    /// Makes every texture whose label starts with `prefix` fail to allocate.
    pub fn fail_textures_with_prefix(&mut self, prefix: impl Into<String>) {
        self.failing_labels.push(prefix.into());
    }

    pub fn clear_failures(&mut self) {
        self.failing_labels.clear();
    }

    pub fn resize_back_buffer(&mut self, width: u32, height: u32) {
        if let Some(record) = self.textures.get_mut(&self.back_buffer.0) {
            record.width = width;
            record.height = height;
        }
    }

    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn texture_label(&self, texture: TextureHandle) -> Option<&str> {
        self.textures.get(&texture.0).map(|t| t.label.as_str())
    }

    pub fn pipeline_label(&self, pipeline: PipelineHandle) -> Option<&str> {
        self.pipelines.get(&pipeline.0).map(String::as_str)
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn texture_creations(&self) -> usize {
        self.texture_creations
    }

    /// Removes a texture behind the owner's back, as a lost device would.
    pub fn forget_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    /// Labels of the pipelines bound before each draw, in recording order.
    pub fn draw_pipeline_labels(&self) -> Vec<String> {
        let mut current = None;
        let mut labels = Vec::new();
        for command in &self.commands {
            match command {
                RecordedCommand::SetPipeline(handle) => current = Some(*handle),
                RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. } => {
                    let label = current
                        .and_then(|handle| self.pipeline_label(handle))
                        .unwrap_or("<none>");
                    labels.push(label.to_string());
                }
                _ => {}
            }
        }
        labels
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, command: RecordedCommand) {
        log::trace!("RecordingBackend: {:?}", command);
        self.commands.push(command);
    }
}

impl GpuBackend for RecordingBackend {
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{} has zero extent",
                desc.label
            )));
        }
        if self
            .failing_labels
            .iter()
            .any(|prefix| desc.label.starts_with(prefix.as_str()))
        {
            return Err(BackendError::TextureCreationFailed(format!(
                "{} rejected by test configuration",
                desc.label
            )));
        }

        let id = self.allocate_id();
        self.texture_creations += 1;
        self.textures.insert(
            id,
            TextureRecord {
                label: desc.label.clone(),
                width: desc.width,
                height: desc.height,
                format: desc.format,
            },
        );
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if texture != self.back_buffer {
            self.textures.remove(&texture.0);
        }
    }

    fn texture_exists(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture.0)
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&texture.0).map(|t| (t.width, t.height))
    }

    fn texture_format(&self, texture: TextureHandle) -> Option<TextureFormat> {
        self.textures.get(&texture.0).map(|t| t.format)
    }

    fn write_texture(&mut self, _texture: TextureHandle, _data: &[u8]) {}

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{} has zero size",
                desc.label
            )));
        }
        let id = self.allocate_id();
        self.buffers.insert(id, desc.clone());
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(desc) = self.buffers.get(&buffer.0) {
            debug_assert!(
                offset + data.len() as u64 <= desc.size,
                "write past the end of {}",
                desc.label
            );
        }
    }

    fn create_sampler(&mut self, _desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        Ok(SamplerHandle(self.allocate_id()))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        let id = self.allocate_id();
        self.pipelines.insert(id, desc.label.clone());
        Ok(PipelineHandle(id))
    }

    fn back_buffer(&self) -> Option<TextureHandle> {
        Some(self.back_buffer)
    }

    fn begin_commands(&mut self, label: &str) {
        self.record(RecordedCommand::BeginCommands(label.to_string()));
    }

    fn end_commands(&mut self) {
        self.record(RecordedCommand::EndCommands);
    }

    fn execute(&mut self) {
        self.record(RecordedCommand::Execute);
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.record(RecordedCommand::BeginRenderPass(desc.clone()));
    }

    fn end_render_pass(&mut self) {
        self.record(RecordedCommand::EndRenderPass);
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        self.record(RecordedCommand::SetPipeline(pipeline));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.record(RecordedCommand::SetViewport(viewport));
    }

    fn set_scissor(&mut self, rect: ScissorRect) {
        self.record(RecordedCommand::SetScissor(rect));
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, _offset: u64) {
        self.record(RecordedCommand::SetVertexBuffer { slot, buffer });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, _format: IndexFormat) {
        self.record(RecordedCommand::SetIndexBuffer(buffer));
    }

    fn bind_constant_buffer(&mut self, binding: u32, buffer: BufferHandle, offset: u64, _size: u64) {
        self.record(RecordedCommand::BindConstantBuffer {
            binding,
            buffer,
            offset,
        });
    }

    fn bind_texture(&mut self, binding: u32, texture: TextureHandle) {
        self.record(RecordedCommand::BindTexture { binding, texture });
    }

    fn bind_sampler(&mut self, binding: u32, sampler: SamplerHandle) {
        self.record(RecordedCommand::BindSampler { binding, sampler });
    }

    fn draw(&mut self, vertices: Range<u32>, _instances: Range<u32>) {
        self.record(RecordedCommand::Draw { vertices });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, _instances: Range<u32>) {
        self.record(RecordedCommand::DrawIndexed {
            indices,
            base_vertex,
        });
    }

    fn copy_texture(
        &mut self,
        source: TextureHandle,
        destination: TextureHandle,
    ) -> BackendResult<()> {
        let (Some(src), Some(dst)) = (self.texture_size(source), self.texture_size(destination))
        else {
            return Err(BackendError::UnknownResource(
                "copy source or destination".to_string(),
            ));
        };
        if src != dst {
            return Err(BackendError::CopyRejected(format!(
                "{}x{} into {}x{}",
                src.0, src.1, dst.0, dst.1
            )));
        }
        self.record(RecordedCommand::CopyTexture {
            source,
            destination,
        });
        Ok(())
    }
}
