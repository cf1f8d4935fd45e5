// src/renderer/pipeline_builder.rs

use crate::renderer::backend::{
    BackendResult, BindingKind, BindingSlot, BlendMode, ColorTarget, CompareFunction, CullMode,
    DepthState, GpuBackend, PipelineHandle, RenderPipelineDescriptor, SampleKind, ShaderStage,
    TextureFormat, VertexLayout,
};

/// Builder for creating render pipelines with sensible defaults
///
/// Reduces boilerplate when creating pipelines by providing a fluent API
/// and presets for depth, full-screen passes and slot declarations.
pub struct PipelineBuilder {
    desc: RenderPipelineDescriptor,
}

impl PipelineBuilder {
    /// Create a new pipeline builder with required parameters
    pub fn new(label: &str, shader_source: &'static str) -> Self {
        Self {
            desc: RenderPipelineDescriptor {
                label: label.to_string(),
                shader_source,
                vertex_entry: "vs_main",
                fragment_entry: Some("fs_main"),
                vertex_layout: None,
                bindings: Vec::new(),
                color_targets: Vec::new(),
                depth: None,
                cull_mode: CullMode::Back,
            },
        }
    }

    /// Full-screen triangle pass: no vertex buffer, `vs_fullscreen`, no culling
    pub fn fullscreen(label: &str, shader_source: &'static str) -> Self {
        Self::new(label, shader_source)
            .with_vertex_entry("vs_fullscreen")
            .with_no_culling()
    }

    /// Set the vertex shader entry point (default: "vs_main")
    pub fn with_vertex_entry(mut self, entry: &'static str) -> Self {
        self.desc.vertex_entry = entry;
        self
    }

    /// Set the fragment shader entry point (default: "fs_main")
    pub fn with_fragment_entry(mut self, entry: &'static str) -> Self {
        self.desc.fragment_entry = Some(entry);
        self
    }

    /// Create a depth-only pipeline (no fragment shader)
    pub fn depth_only(mut self) -> Self {
        self.desc.fragment_entry = None;
        self.desc.color_targets.clear();
        self
    }

    pub fn with_vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.desc.vertex_layout = Some(layout);
        self
    }

    pub fn with_color_target(mut self, format: TextureFormat, blend: BlendMode) -> Self {
        self.desc.color_targets.push(ColorTarget { format, blend });
        self
    }

    pub fn with_uniform(mut self, binding: u32, stage: ShaderStage, size: u64) -> Self {
        self.desc.bindings.push(BindingSlot {
            binding,
            stage,
            kind: BindingKind::UniformBuffer { size },
        });
        self
    }

    /// Texture read with `textureLoad` or a non-filtering sampler
    pub fn with_texture(mut self, binding: u32, filterable: bool) -> Self {
        self.desc.bindings.push(BindingSlot {
            binding,
            stage: ShaderStage::Fragment,
            kind: BindingKind::Texture(SampleKind::Float { filterable }),
        });
        self
    }

    pub fn with_depth_texture(mut self, binding: u32) -> Self {
        self.desc.bindings.push(BindingSlot {
            binding,
            stage: ShaderStage::Fragment,
            kind: BindingKind::Texture(SampleKind::Depth),
        });
        self
    }

    pub fn with_sampler(mut self, binding: u32, comparison: bool) -> Self {
        self.desc.bindings.push(BindingSlot {
            binding,
            stage: ShaderStage::Fragment,
            kind: BindingKind::Sampler { comparison },
        });
        self
    }

    /// Configure depth/stencil state
    pub fn with_depth_stencil(
        mut self,
        format: TextureFormat,
        depth_write: bool,
        depth_compare: CompareFunction,
    ) -> Self {
        self.desc.depth = Some(DepthState {
            format,
            write: depth_write,
            compare: depth_compare,
            constant_bias: 0,
            slope_bias: 0.0,
        });
        self
    }

    /// Configure depth/stencil with custom bias (for shadow maps)
    pub fn with_depth_stencil_biased(
        mut self,
        format: TextureFormat,
        depth_write: bool,
        depth_compare: CompareFunction,
        constant_bias: i32,
        slope_bias: f32,
    ) -> Self {
        self.desc.depth = Some(DepthState {
            format,
            write: depth_write,
            compare: depth_compare,
            constant_bias,
            slope_bias,
        });
        self
    }

    /// Disable backface culling
    pub fn with_no_culling(mut self) -> Self {
        self.desc.cull_mode = CullMode::None;
        self
    }

    pub fn descriptor(&self) -> &RenderPipelineDescriptor {
        &self.desc
    }

    /// Build the render pipeline
    pub fn build(self, gpu: &mut dyn GpuBackend) -> BackendResult<PipelineHandle> {
        gpu.create_render_pipeline(&self.desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_only_drops_fragment_stage_and_targets() {
        let builder = PipelineBuilder::new("Depth", "")
            .with_color_target(TextureFormat::Rgba8Unorm, BlendMode::Replace)
            .depth_only();
        assert!(builder.descriptor().fragment_entry.is_none());
        assert!(builder.descriptor().color_targets.is_empty());
    }

    #[test]
    fn fullscreen_preset_uses_triangle_entry() {
        let builder = PipelineBuilder::fullscreen("Blit", "");
        assert_eq!(builder.descriptor().vertex_entry, "vs_fullscreen");
        assert_eq!(builder.descriptor().cull_mode, CullMode::None);
        assert!(builder.descriptor().vertex_layout.is_none());
    }
}
