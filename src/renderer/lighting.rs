// renderer/lighting.rs
// Ping-pong luminance accumulation, one full-screen pass per virtual light.

use glam::{Mat4, Vec3};

use crate::renderer::backend::{
    BackendResult, ColorAttachment, GpuBackend, LoadOp, RenderPassDescriptor, ScissorRect,
    TextureDescriptor, TextureHandle,
};
use crate::renderer::gbuffer::GBuffer;
use crate::renderer::library::{PipelineLibrary, LUMINANCE_FORMAT};
use crate::renderer::uniforms::{ColorUniform, LightUniform, UniformArena};
use crate::renderer::virtualizer::{LightParams, VirtualLight};

pub const LIGHT_KIND_DIRECTIONAL: u32 = 0;
pub const LIGHT_KIND_POINT: u32 = 1;
pub const LIGHT_KIND_SPOT: u32 = 2;
pub const LIGHT_KIND_AMBIENT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumBuffer {
    A,
    B,
}

/// `(source, destination)` for light `index`. Light 0 reads the seeded A.
pub fn ping_pong(index: usize) -> (AccumBuffer, AccumBuffer) {
    if index % 2 == 0 {
        (AccumBuffer::A, AccumBuffer::B)
    } else {
        (AccumBuffer::B, AccumBuffer::A)
    }
}

/// Buffer holding the result after `count` lights.
pub fn final_buffer_for(count: usize) -> AccumBuffer {
    if count % 2 == 0 {
        AccumBuffer::A
    } else {
        AccumBuffer::B
    }
}

impl LightUniform {
    pub fn pack(light: &VirtualLight, camera_position: Vec3, camera_forward: Vec3, has_shadow: bool) -> Self {
        let color = light.light.color;
        let (kind, position, radius, direction, range) = match light.params {
            LightParams::Directional {
                direction,
                cascade_near,
                cascade_far,
            } => (LIGHT_KIND_DIRECTIONAL, Vec3::ZERO, 0.0, direction, [cascade_near, cascade_far]),
            LightParams::Point {
                position,
                radius,
                face_forward,
            } => (LIGHT_KIND_POINT, position, radius, face_forward, [0.0, 0.0]),
            LightParams::Spot {
                position,
                direction,
                radius,
                cos_inner,
                cos_outer,
            } => (LIGHT_KIND_SPOT, position, radius, direction, [cos_inner, cos_outer]),
            LightParams::Ambient => (LIGHT_KIND_AMBIENT, Vec3::ZERO, 0.0, Vec3::ZERO, [0.0, 0.0]),
        };

        Self {
            header: [kind, has_shadow as u32, 0, 0],
            camera_pos: camera_position.extend(1.0).to_array(),
            camera_forward: camera_forward.extend(0.0).to_array(),
            color_intensity: color.extend(light.light.intensity).to_array(),
            position_radius: position.extend(radius).to_array(),
            direction: direction.extend(0.0).to_array(),
            range: [range[0], range[1], 0.0, 0.0],
            light_view_proj: light
                .light_view_proj
                .unwrap_or(Mat4::IDENTITY)
                .to_cols_array_2d(),
        }
    }
}

/// A virtual light ready to shade, with its shadow map if it got one.
#[derive(Debug, Clone, Copy)]
pub struct LitLight<'a> {
    pub light: &'a VirtualLight,
    pub shadow_map: Option<TextureHandle>,
}

pub struct LightAccumulator {
    label: String,
    buffers: Option<(TextureHandle, TextureHandle)>,
    size: (u32, u32),
    light_uniforms: UniformArena,
    seed_uniforms: UniformArena,
}

impl LightAccumulator {
    pub fn new(
        gpu: &mut dyn GpuBackend,
        label: &str,
        width: u32,
        height: u32,
        max_lights: u32,
    ) -> BackendResult<Self> {
        let mut accumulator = Self {
            label: label.to_string(),
            buffers: None,
            size: (0, 0),
            light_uniforms: UniformArena::new(gpu, &format!("{label}LightUniforms"), max_lights)?,
            seed_uniforms: UniformArena::new(gpu, &format!("{label}SeedUniforms"), 1)?,
        };
        accumulator.resize(gpu, width, height);
        Ok(accumulator)
    }

    pub fn resize(&mut self, gpu: &mut dyn GpuBackend, width: u32, height: u32) {
        if let Some((a, b)) = self.buffers.take() {
            gpu.destroy_texture(a);
            gpu.destroy_texture(b);
        }
        self.size = (0, 0);

        let create = |gpu: &mut dyn GpuBackend, name: &str| {
            gpu.create_texture(&TextureDescriptor::render_target(
                format!("{}Luminance{}", self.label, name),
                width,
                height,
                LUMINANCE_FORMAT,
            ))
        };
        match create(gpu, "A") {
            Ok(a) => match create(gpu, "B") {
                Ok(b) => {
                    self.buffers = Some((a, b));
                    self.size = (width, height);
                }
                Err(err) => {
                    gpu.destroy_texture(a);
                    log::error!("{} luminance buffer creation failed: {}", self.label, err);
                }
            },
            Err(err) => log::error!("{} luminance buffer creation failed: {}", self.label, err),
        }

        for arena in [&mut self.light_uniforms, &mut self.seed_uniforms] {
            if let Err(err) = arena.recreate(gpu) {
                log::error!("{} uniform buffer recreation failed: {}", self.label, err);
            }
        }
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.buffers.map(|_| self.size)
    }

    pub fn texture(&self, buffer: AccumBuffer) -> Option<TextureHandle> {
        self.buffers.map(|(a, b)| match buffer {
            AccumBuffer::A => a,
            AccumBuffer::B => b,
        })
    }

    /// Texture holding the summed luminance after `count` lights.
    pub fn final_buffer(&self, count: usize) -> Option<TextureHandle> {
        self.texture(final_buffer_for(count))
    }

    fn open_pass(&self, gpu: &mut dyn GpuBackend, label: &str, target: TextureHandle, scissor: ScissorRect) {
        gpu.begin_render_pass(&RenderPassDescriptor {
            label: format!("{}{}", self.label, label),
            color_attachments: vec![ColorAttachment {
                texture: target,
                load: LoadOp::Load,
            }],
            depth_attachment: None,
        });
        gpu.set_viewport(scissor.viewport());
        gpu.set_scissor(scissor);
    }

    /// Seeds buffer A with zero inside `scissor`.
    pub fn init_light_texture(
        &mut self,
        gpu: &mut dyn GpuBackend,
        library: &PipelineLibrary,
        scissor: ScissorRect,
    ) -> bool {
        let Some(target) = self.texture(AccumBuffer::A) else {
            log::warn!("{}: no luminance buffers, skipping lighting", self.label);
            return false;
        };
        if let Err(err) = self.seed_uniforms.begin(gpu, 1) {
            log::error!("{}: seed uniform allocation failed: {}", self.label, err);
            return false;
        }
        let Some(slot) = self.seed_uniforms.push(&ColorUniform { color: [0.0; 4] }) else {
            return false;
        };
        self.seed_uniforms.flush(gpu);

        self.open_pass(gpu, "LightInitPass", target, scissor);
        gpu.set_pipeline(library.light_init);
        self.seed_uniforms.bind::<ColorUniform>(gpu, 0, slot);
        gpu.draw(0..3, 0..1);
        gpu.end_render_pass();
        true
    }

    /// One full-screen pass: reads the source luminance, adds light `index`
    /// and writes the other buffer.
    #[allow(clippy::too_many_arguments)]
    pub fn accumulate(
        &self,
        gpu: &mut dyn GpuBackend,
        library: &PipelineLibrary,
        gbuffer: &GBuffer,
        index: usize,
        uniform_slot: u32,
        shadow_map: Option<TextureHandle>,
        scissor: ScissorRect,
    ) {
        let (Some(a), Some(b)) = (self.texture(AccumBuffer::A), self.texture(AccumBuffer::B)) else {
            return;
        };
        let pick = |buffer| match buffer {
            AccumBuffer::A => a,
            AccumBuffer::B => b,
        };
        let (source, destination) = ping_pong(index);

        self.open_pass(gpu, "LightingPass", pick(destination), scissor);
        gpu.set_pipeline(library.lighting);
        self.light_uniforms.bind::<LightUniform>(gpu, 0, uniform_slot);
        gpu.bind_texture(1, gbuffer.albedo);
        gpu.bind_texture(2, gbuffer.normal);
        gpu.bind_texture(3, gbuffer.position);
        gpu.bind_texture(4, gbuffer.material);
        gpu.bind_texture(5, shadow_map.unwrap_or(library.defaults.null_shadow));
        gpu.bind_sampler(6, library.shadow_sampler);
        gpu.bind_texture(7, pick(source));
        gpu.draw(0..3, 0..1);
        gpu.end_render_pass();
    }

    /// Seeds, then accumulates every light in order. Returns the final
    /// luminance texture, or `None` when the frame had to be skipped.
    #[allow(clippy::too_many_arguments)]
    pub fn accumulate_all(
        &mut self,
        gpu: &mut dyn GpuBackend,
        library: &PipelineLibrary,
        gbuffer: &GBuffer,
        lights: &[LitLight],
        camera_position: Vec3,
        camera_forward: Vec3,
        scissor: ScissorRect,
    ) -> Option<TextureHandle> {
        if let Err(err) = self.light_uniforms.begin(gpu, lights.len() as u32) {
            log::error!("{}: light uniform allocation failed: {}", self.label, err);
            return None;
        }
        let slots: Vec<Option<u32>> = lights
            .iter()
            .map(|lit| {
                self.light_uniforms.push(&LightUniform::pack(
                    lit.light,
                    camera_position,
                    camera_forward,
                    lit.shadow_map.is_some(),
                ))
            })
            .collect();
        self.light_uniforms.flush(gpu);

        if !self.init_light_texture(gpu, library, scissor) {
            return None;
        }
        for (index, (lit, slot)) in lights.iter().zip(slots).enumerate() {
            // begin() sized the arena, so every push got a slot
            let slot = slot.unwrap_or(0);
            self.accumulate(gpu, library, gbuffer, index, slot, lit.shadow_map, scissor);
        }
        self.final_buffer(lights.len())
    }

    pub fn destroy(&mut self, gpu: &mut dyn GpuBackend) {
        if let Some((a, b)) = self.buffers.take() {
            gpu.destroy_texture(a);
            gpu.destroy_texture(b);
        }
        self.light_uniforms.destroy(gpu);
        self.seed_uniforms.destroy(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{RecordedCommand, RecordingBackend};
    use crate::scene::components::Light;
    use crate::scene::Transform;
    use hecs::Entity;

    fn ambient() -> VirtualLight {
        VirtualLight {
            id: 0,
            source: Entity::DANGLING,
            light: Light::ambient(Vec3::ONE, 0.3),
            transform: Transform::IDENTITY,
            params: LightParams::Ambient,
            light_view_proj: None,
            shadow_key: None,
        }
    }

    #[test]
    fn parity_law() {
        assert_eq!(final_buffer_for(0), AccumBuffer::A);
        assert_eq!(final_buffer_for(1), AccumBuffer::B);
        assert_eq!(final_buffer_for(10), AccumBuffer::A);
        assert_eq!(ping_pong(0), (AccumBuffer::A, AccumBuffer::B));
        assert_eq!(ping_pong(1), (AccumBuffer::B, AccumBuffer::A));
    }

    #[test]
    fn spot_packs_cone_cosines() {
        let light = VirtualLight {
            params: LightParams::Spot {
                position: Vec3::new(1.0, 2.0, 3.0),
                direction: Vec3::NEG_Y,
                radius: 8.0,
                cos_inner: 0.9,
                cos_outer: 0.8,
            },
            light_view_proj: Some(Mat4::IDENTITY),
            ..ambient()
        };
        let packed = LightUniform::pack(&light, Vec3::ZERO, Vec3::NEG_Z, true);
        assert_eq!(packed.header, [LIGHT_KIND_SPOT, 1, 0, 0]);
        assert_eq!(packed.position_radius, [1.0, 2.0, 3.0, 8.0]);
        assert_eq!(packed.range, [0.9, 0.8, 0.0, 0.0]);
    }

    #[test]
    fn each_light_reads_what_the_previous_one_wrote() {
        let mut gpu = RecordingBackend::new(16, 16);
        let library = PipelineLibrary::new(&mut gpu).unwrap();
        let gbuffer = GBuffer::create(&mut gpu, "Test", 16, 16).unwrap();
        let mut accumulator = LightAccumulator::new(&mut gpu, "Test", 16, 16, 2).unwrap();
        let a = accumulator.texture(AccumBuffer::A).unwrap();
        let b = accumulator.texture(AccumBuffer::B).unwrap();

        let light = ambient();
        let lights = vec![
            LitLight {
                light: &light,
                shadow_map: None,
            };
            3
        ];
        let result = accumulator.accumulate_all(
            &mut gpu,
            &library,
            &gbuffer,
            &lights,
            Vec3::ZERO,
            Vec3::NEG_Z,
            ScissorRect::full(16, 16),
        );
        assert_eq!(result, Some(b));

        let targets: Vec<TextureHandle> = gpu
            .commands()
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass(desc) => desc.color_attachments.first().map(|c| c.texture),
                _ => None,
            })
            .collect();
        assert_eq!(targets, vec![a, b, a, b]);

        let sources: Vec<TextureHandle> = gpu
            .commands()
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BindTexture { binding: 7, texture } => Some(*texture),
                _ => None,
            })
            .collect();
        assert_eq!(sources, vec![a, b, a]);
    }

    #[test]
    fn resize_reports_new_size() {
        let mut gpu = RecordingBackend::new(16, 16);
        let mut accumulator = LightAccumulator::new(&mut gpu, "Test", 16, 16, 2).unwrap();
        accumulator.resize(&mut gpu, 40, 30);
        assert_eq!(accumulator.size(), Some((40, 30)));
        assert_eq!(gpu.live_texture_count(), 3);
    }
}
