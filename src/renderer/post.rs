// renderer/post.rs
// Post-processing hooks run after the lit scene is composited.

use std::collections::HashMap;

use glam::Mat4;

use crate::renderer::backend::{
    BackendResult, BlendMode, ColorAttachment, GpuBackend, LoadOp, PipelineHandle,
    RenderPassDescriptor, ScissorRect, ShaderStage, TextureFormat, TextureHandle,
};
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::uniforms::{ColorUniform, UniformArena};

const TONEMAP_SHADER: &str = include_str!("../shader/tonemap.wgsl");

/// Index of an effect in the orchestrator's [`PostEffectRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PostEffectHandle(pub usize);

pub trait PostEffect {
    fn name(&self) -> &str;

    fn enabled(&self) -> bool {
        true
    }

    /// `false` for effects that only observe the frame and never write the chain.
    fn is_post_processing_pass(&self) -> bool {
        true
    }

    /// Called before the camera's geometry pass.
    fn on_pre_render(&mut self, _dt: f32, _view: Mat4, _proj: Mat4) {}

    /// Reads `source` and writes `destination` inside `viewport`.
    fn on_post_render(
        &mut self,
        dt: f32,
        gpu: &mut dyn GpuBackend,
        source: TextureHandle,
        destination: TextureHandle,
        viewport: ScissorRect,
    ) -> BackendResult<()>;
}

#[derive(Default)]
pub struct PostEffectRegistry {
    effects: Vec<Box<dyn PostEffect>>,
}

impl PostEffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, effect: Box<dyn PostEffect>) -> PostEffectHandle {
        log::info!("Registered post effect '{}'", effect.name());
        self.effects.push(effect);
        PostEffectHandle(self.effects.len() - 1)
    }

    pub fn get(&self, handle: PostEffectHandle) -> Option<&dyn PostEffect> {
        self.effects.get(handle.0).map(|effect| effect.as_ref())
    }

    pub fn get_mut(&mut self, handle: PostEffectHandle) -> Option<&mut Box<dyn PostEffect>> {
        self.effects.get_mut(handle.0)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn pre_render(&mut self, handles: &[PostEffectHandle], dt: f32, view: Mat4, proj: Mat4) {
        for handle in handles {
            if let Some(effect) = self.effects.get_mut(handle.0) {
                if effect.enabled() {
                    effect.on_pre_render(dt, view, proj);
                }
            }
        }
    }

    /// Enabled post-processing passes among `handles`, in list order.
    pub fn active_chain(&self, handles: &[PostEffectHandle]) -> Vec<PostEffectHandle> {
        handles
            .iter()
            .copied()
            .filter(|handle| match self.effects.get(handle.0) {
                Some(effect) => effect.enabled() && effect.is_post_processing_pass(),
                None => {
                    log::warn!("Camera references unknown post effect {:?}", handle);
                    false
                }
            })
            .collect()
    }
}

/// Exposure followed by Reinhard tone mapping.
pub struct TonemapEffect {
    pub exposure: f32,
    pub enabled: bool,
    pipelines: HashMap<TextureFormat, PipelineHandle>,
    uniforms: Option<UniformArena>,
}

impl TonemapEffect {
    pub fn new(exposure: f32) -> Self {
        Self {
            exposure,
            enabled: true,
            pipelines: HashMap::new(),
            uniforms: None,
        }
    }

    fn pipeline_for(&mut self, gpu: &mut dyn GpuBackend, format: TextureFormat) -> BackendResult<PipelineHandle> {
        if let Some(pipeline) = self.pipelines.get(&format) {
            return Ok(*pipeline);
        }
        let pipeline = PipelineBuilder::fullscreen(&format!("TonemapPipeline{:?}", format), TONEMAP_SHADER)
            .with_uniform(0, ShaderStage::Fragment, std::mem::size_of::<ColorUniform>() as u64)
            .with_texture(1, false)
            .with_color_target(format, BlendMode::Replace)
            .build(gpu)?;
        self.pipelines.insert(format, pipeline);
        Ok(pipeline)
    }
}

impl PostEffect for TonemapEffect {
    fn name(&self) -> &str {
        "Tonemap"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn on_post_render(
        &mut self,
        _dt: f32,
        gpu: &mut dyn GpuBackend,
        source: TextureHandle,
        destination: TextureHandle,
        viewport: ScissorRect,
    ) -> BackendResult<()> {
        let format = gpu
            .texture_format(destination)
            .unwrap_or(TextureFormat::Rgba8Unorm);
        let pipeline = self.pipeline_for(gpu, format)?;

        if self.uniforms.is_none() {
            self.uniforms = Some(UniformArena::new(gpu, "TonemapUniforms", 1)?);
        }
        let Some(uniforms) = self.uniforms.as_mut() else {
            return Ok(());
        };
        uniforms.begin(gpu, 1)?;
        let slot = uniforms
            .push(&ColorUniform {
                color: [self.exposure, 0.0, 0.0, 0.0],
            })
            .unwrap_or(0);
        uniforms.flush(gpu);

        gpu.begin_render_pass(&RenderPassDescriptor {
            label: "TonemapPass".to_string(),
            color_attachments: vec![ColorAttachment {
                texture: destination,
                load: LoadOp::Load,
            }],
            depth_attachment: None,
        });
        gpu.set_viewport(viewport.viewport());
        gpu.set_scissor(viewport);
        gpu.set_pipeline(pipeline);
        uniforms.bind::<ColorUniform>(gpu, 0, slot);
        gpu.bind_texture(1, source);
        gpu.draw(0..3, 0..1);
        gpu.end_render_pass();
        Ok(())
    }
}
