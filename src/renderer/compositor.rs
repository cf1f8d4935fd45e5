// renderer/compositor.rs
// Resolves a camera's lighting into the final image: albedo x luminance,
// skybox, post chain, then the destination.

use glam::{Mat4, Vec3};

use crate::renderer::backend::{
    BackendResult, ColorAttachment, DepthAttachment, GpuBackend, LoadOp, RenderPassDescriptor,
    ScissorRect, TextureDescriptor, TextureHandle, TextureUsages,
};
use crate::renderer::gbuffer::GBuffer;
use crate::renderer::library::{PipelineLibrary, FINAL_LIT_FORMAT};
use crate::renderer::post::{PostEffectHandle, PostEffectRegistry};
use crate::renderer::uniforms::{SkyUniform, UniformArena};

pub struct SkyDraw {
    pub texture: TextureHandle,
    pub intensity: f32,
    pub view_proj: Mat4,
    pub camera_position: Vec3,
}

pub struct FrameCompositor {
    label: String,
    final_lit: Option<TextureHandle>,
    scratch: Option<[TextureHandle; 2]>,
    size: (u32, u32),
    sky_uniforms: UniformArena,
}

impl FrameCompositor {
    pub fn new(gpu: &mut dyn GpuBackend, label: &str, width: u32, height: u32) -> BackendResult<Self> {
        let mut compositor = Self {
            label: label.to_string(),
            final_lit: None,
            scratch: None,
            size: (0, 0),
            sky_uniforms: UniformArena::new(gpu, &format!("{label}SkyUniforms"), 1)?,
        };
        compositor.resize(gpu, width, height);
        Ok(compositor)
    }

    fn target(&self, name: &str, width: u32, height: u32) -> TextureDescriptor {
        TextureDescriptor::render_target(format!("{}{}", self.label, name), width, height, FINAL_LIT_FORMAT)
            .with_usage(
                TextureUsages::RENDER_TARGET
                    | TextureUsages::SAMPLED
                    | TextureUsages::COPY_SRC
                    | TextureUsages::COPY_DST,
            )
    }

    fn release(&mut self, gpu: &mut dyn GpuBackend) {
        if let Some(final_lit) = self.final_lit.take() {
            gpu.destroy_texture(final_lit);
        }
        if let Some(scratch) = self.scratch.take() {
            for texture in scratch {
                gpu.destroy_texture(texture);
            }
        }
    }

    pub fn resize(&mut self, gpu: &mut dyn GpuBackend, width: u32, height: u32) {
        self.release(gpu);
        self.size = (width, height);

        match gpu.create_texture(&self.target("FinalLit", width, height)) {
            Ok(texture) => self.final_lit = Some(texture),
            Err(err) => log::error!("{} final lit texture creation failed: {}", self.label, err),
        }

        let first = gpu.create_texture(&self.target("PostScratchA", width, height));
        let second = gpu.create_texture(&self.target("PostScratchB", width, height));
        match (first, second) {
            (Ok(a), Ok(b)) => self.scratch = Some([a, b]),
            (a, b) => {
                for texture in [a, b].into_iter().flatten() {
                    gpu.destroy_texture(texture);
                }
                log::error!("{} post scratch textures unavailable; effects disabled", self.label);
            }
        }

        if let Err(err) = self.sky_uniforms.recreate(gpu) {
            log::error!("{} sky uniform recreation failed: {}", self.label, err);
        }
    }

    pub fn final_lit(&self) -> Option<TextureHandle> {
        self.final_lit
    }

    pub fn scratch(&self) -> Option<[TextureHandle; 2]> {
        self.scratch
    }

    /// Writes albedo x `final_luminance` into the final lit texture. Pixels no
    /// geometry covered keep the background color from the albedo target.
    pub fn draw_final_lit_texture(
        &self,
        gpu: &mut dyn GpuBackend,
        library: &PipelineLibrary,
        gbuffer: &GBuffer,
        final_luminance: TextureHandle,
        scissor: ScissorRect,
    ) -> bool {
        let Some(final_lit) = self.final_lit else {
            log::warn!("{}: no final lit texture, skipping composite", self.label);
            return false;
        };
        gpu.begin_render_pass(&RenderPassDescriptor {
            label: format!("{}CompositePass", self.label),
            color_attachments: vec![ColorAttachment {
                texture: final_lit,
                load: LoadOp::Load,
            }],
            depth_attachment: None,
        });
        gpu.set_viewport(scissor.viewport());
        gpu.set_scissor(scissor);
        gpu.set_pipeline(library.composite);
        gpu.bind_texture(0, gbuffer.albedo);
        gpu.bind_texture(1, final_luminance);
        gpu.bind_texture(2, gbuffer.position);
        gpu.draw(0..3, 0..1);
        gpu.end_render_pass();
        true
    }

    /// Fills pixels the geometry pass left at the far plane.
    pub fn draw_skybox(
        &mut self,
        gpu: &mut dyn GpuBackend,
        library: &PipelineLibrary,
        gbuffer: &GBuffer,
        sky: &SkyDraw,
        scissor: ScissorRect,
    ) -> bool {
        let Some(final_lit) = self.final_lit else {
            return false;
        };
        if let Err(err) = self.sky_uniforms.begin(gpu, 1) {
            log::error!("{}: sky uniform allocation failed: {}", self.label, err);
            return false;
        }
        let Some(slot) = self.sky_uniforms.push(&SkyUniform {
            inverse_view_proj: sky.view_proj.inverse().to_cols_array_2d(),
            camera_pos: sky.camera_position.extend(1.0).to_array(),
            params: [sky.intensity, 0.0, 0.0, 0.0],
        }) else {
            return false;
        };
        self.sky_uniforms.flush(gpu);

        gpu.begin_render_pass(&RenderPassDescriptor {
            label: format!("{}SkyboxPass", self.label),
            color_attachments: vec![ColorAttachment {
                texture: final_lit,
                load: LoadOp::Load,
            }],
            depth_attachment: Some(DepthAttachment {
                texture: gbuffer.depth,
                depth_load: LoadOp::Load,
                depth_write: false,
                stencil_load: LoadOp::Load,
            }),
        });
        gpu.set_viewport(scissor.viewport());
        gpu.set_scissor(scissor);
        gpu.set_pipeline(library.skybox);
        self.sky_uniforms.bind::<SkyUniform>(gpu, 0, slot);
        gpu.bind_texture(1, sky.texture);
        gpu.bind_sampler(2, library.sky_sampler);
        gpu.draw(0..3, 0..1);
        gpu.end_render_pass();
        true
    }

    /// Runs the enabled post passes in `chain`, ping-ponging the scratch
    /// textures, with the last pass writing `destination`. Without passes, or
    /// when the last pass fails, the latest output is copied instead. Returns
    /// the number of effect passes run.
    pub fn resolve(
        &self,
        gpu: &mut dyn GpuBackend,
        effects: &mut PostEffectRegistry,
        chain: &[PostEffectHandle],
        dt: f32,
        destination: TextureHandle,
        scissor: ScissorRect,
    ) -> u32 {
        let Some(final_lit) = self.final_lit else {
            return 0;
        };
        if final_lit == destination {
            return 0;
        }
        let destination_size = gpu.texture_size(destination);
        if destination_size != Some(self.size) {
            log::warn!(
                "{}: destination size {:?} does not match scene {:?}, skipping resolve",
                self.label,
                destination_size,
                self.size
            );
            return 0;
        }

        let active = effects.active_chain(chain);
        let Some(scratch) = self.scratch.filter(|_| !active.is_empty()) else {
            if let Err(err) = gpu.copy_texture(final_lit, destination) {
                log::warn!("{}: copy to destination skipped: {}", self.label, err);
            }
            return 0;
        };

        let mut source = final_lit;
        let mut passes = 0;
        let mut destination_written = false;
        for (i, handle) in active.iter().enumerate() {
            let last = i + 1 == active.len();
            // Never the texture being read, even after a failed pass.
            let target = if last {
                destination
            } else if source == scratch[0] {
                scratch[1]
            } else {
                scratch[0]
            };
            let Some(effect) = effects.get_mut(*handle) else {
                continue;
            };
            match effect.on_post_render(dt, gpu, source, target, scissor) {
                Ok(()) => {
                    source = target;
                    passes += 1;
                    destination_written = last;
                }
                Err(err) => log::error!("Post effect '{}' failed: {}", effect.name(), err),
            }
        }

        if !destination_written {
            log::warn!(
                "{}: post chain did not reach the destination, copying its last output",
                self.label
            );
            if let Err(err) = gpu.copy_texture(source, destination) {
                log::warn!("{}: copy to destination skipped: {}", self.label, err);
            }
        }
        passes
    }

    pub fn destroy(&mut self, gpu: &mut dyn GpuBackend) {
        self.release(gpu);
        self.sky_uniforms.destroy(gpu);
    }
}
