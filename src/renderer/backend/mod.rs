// renderer/backend/mod.rs
// Narrow command interface the frame core records against.
// Resources are addressed through opaque handles. Bindings are set per slot
// and snapshotted by the backend at draw time, so callers never build
// bind groups themselves.

mod recording;
mod types;
mod wgpu_backend;

use std::ops::Range;

use thiserror::Error;

pub use recording::{RecordedCommand, RecordingBackend};
pub use types::*;
pub use wgpu_backend::WgpuBackend;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Unknown resource handle: {0}")]
    UnknownResource(String),
    #[error("Copy rejected: {0}")]
    CopyRejected(String),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// GPU command interface consumed by the frame core.
///
/// Recording is scoped: `begin_commands` opens a command list, render
/// passes are recorded inside it, `end_commands` closes it and `execute`
/// submits every closed list in order.
pub trait GpuBackend {
    // Resources

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn texture_exists(&self, texture: TextureHandle) -> bool;

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)>;

    fn texture_format(&self, texture: TextureHandle) -> Option<TextureFormat>;

    /// Uploads tightly packed texel rows covering the whole texture.
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]);

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<PipelineHandle>;

    /// Minimum offset alignment for constant buffer bindings.
    fn uniform_alignment(&self) -> u64 {
        256
    }

    /// Current presentable target, if one has been acquired this frame.
    fn back_buffer(&self) -> Option<TextureHandle>;

    // Command scopes

    fn begin_commands(&mut self, label: &str);

    fn end_commands(&mut self);

    fn execute(&mut self);

    // Pass recording

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor);

    fn end_render_pass(&mut self);

    fn set_pipeline(&mut self, pipeline: PipelineHandle);

    fn set_viewport(&mut self, viewport: Viewport);

    fn set_scissor(&mut self, rect: ScissorRect);

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);

    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat);

    fn bind_constant_buffer(&mut self, binding: u32, buffer: BufferHandle, offset: u64, size: u64);

    fn bind_texture(&mut self, binding: u32, texture: TextureHandle);

    fn bind_sampler(&mut self, binding: u32, sampler: SamplerHandle);

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>);

    /// Copies `source` into `destination` outside of any render pass.
    fn copy_texture(&mut self, source: TextureHandle, destination: TextureHandle) -> BackendResult<()>;
}
