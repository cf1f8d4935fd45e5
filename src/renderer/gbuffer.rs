// renderer/gbuffer.rs
// Geometry pass: rasterizes opaque meshes into albedo, normal, position and
// material targets plus depth.

use std::collections::HashMap;

use glam::{Mat4, Vec3};
use hecs::Entity;

use crate::asset::{Assets, Model, TextureRef, TextureSlot};
use crate::renderer::backend::{
    BackendResult, ColorAttachment, DepthAttachment, GpuBackend, LoadOp, RenderPassDescriptor,
    ScissorRect, TextureDescriptor, TextureHandle,
};
use crate::renderer::library::{
    PipelineLibrary, ALBEDO_FORMAT, DEPTH_FORMAT, MATERIAL_FORMAT, NORMAL_FORMAT, POSITION_FORMAT,
};
use crate::renderer::uniforms::{CameraUniform, ColorUniform, ObjectUniform, UniformArena};
use crate::scene::camera::Camera;

pub struct GBuffer {
    pub albedo: TextureHandle,
    pub normal: TextureHandle,
    pub position: TextureHandle,
    pub material: TextureHandle,
    pub depth: TextureHandle,
    width: u32,
    height: u32,
}

impl GBuffer {
    pub fn create(gpu: &mut dyn GpuBackend, label: &str, width: u32, height: u32) -> BackendResult<Self> {
        let mut created: Vec<TextureHandle> = Vec::with_capacity(5);
        let targets = [
            ("Albedo", ALBEDO_FORMAT),
            ("Normal", NORMAL_FORMAT),
            ("Position", POSITION_FORMAT),
            ("Material", MATERIAL_FORMAT),
            ("Depth", DEPTH_FORMAT),
        ];
        for (name, format) in targets {
            let desc = TextureDescriptor::render_target(format!("{label}GBuffer{name}"), width, height, format);
            match gpu.create_texture(&desc) {
                Ok(handle) => created.push(handle),
                Err(err) => {
                    for handle in created {
                        gpu.destroy_texture(handle);
                    }
                    return Err(err);
                }
            }
        }

        Ok(Self {
            albedo: created[0],
            normal: created[1],
            position: created[2],
            material: created[3],
            depth: created[4],
            width,
            height,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn destroy(&self, gpu: &mut dyn GpuBackend) {
        for handle in [self.albedo, self.normal, self.position, self.material, self.depth] {
            gpu.destroy_texture(handle);
        }
    }
}

/// Resolves material texture references for one frame.
pub struct TextureSource<'a> {
    pub assets: &'a Assets,
    /// Render targets of virtual cameras, by camera entity.
    pub camera_outputs: &'a HashMap<Entity, TextureHandle>,
}

impl TextureSource<'_> {
    pub fn resolve(&self, texture: TextureRef) -> Option<TextureHandle> {
        match texture {
            TextureRef::Asset(handle) => self.assets.textures.get(handle).map(|t| t.handle),
            TextureRef::CameraOutput(entity) => self.camera_outputs.get(&entity).copied(),
        }
    }
}

pub struct GBufferPass {
    label: String,
    gbuffer: Option<GBuffer>,
    camera_uniforms: UniformArena,
    clear_uniforms: UniformArena,
    objects: UniformArena,
    reserved_objects: u32,
    active: Option<ScissorRect>,
    draws: u32,
}

impl GBufferPass {
    pub fn new(
        gpu: &mut dyn GpuBackend,
        label: &str,
        width: u32,
        height: u32,
        max_objects: u32,
    ) -> BackendResult<Self> {
        let mut pass = Self {
            label: label.to_string(),
            gbuffer: None,
            camera_uniforms: UniformArena::new(gpu, &format!("{label}CameraUniforms"), 1)?,
            clear_uniforms: UniformArena::new(gpu, &format!("{label}ClearUniforms"), 1)?,
            objects: UniformArena::new(gpu, &format!("{label}ObjectUniforms"), max_objects)?,
            reserved_objects: 0,
            active: None,
            draws: 0,
        };
        pass.resize(gpu, width, height);
        Ok(pass)
    }

    pub fn gbuffer(&self) -> Option<&GBuffer> {
        self.gbuffer.as_ref()
    }

    /// `false` while the targets could not be (re)created.
    pub fn is_enabled(&self) -> bool {
        self.gbuffer.is_some()
    }

    pub fn is_frame_active(&self) -> bool {
        self.active.is_some()
    }

    /// Recreates the targets at the new size. On failure the pass stays
    /// disabled until the next successful resize.
    pub fn resize(&mut self, gpu: &mut dyn GpuBackend, width: u32, height: u32) {
        if let Some(old) = self.gbuffer.take() {
            old.destroy(gpu);
        }
        self.active = None;
        match GBuffer::create(gpu, &self.label, width, height) {
            Ok(gbuffer) => {
                log::debug!("{} G-buffer recreated at {}x{}", self.label, width, height);
                self.gbuffer = Some(gbuffer);
            }
            Err(err) => {
                log::error!("{} G-buffer creation failed, pass disabled: {}", self.label, err);
            }
        }
        for arena in [&mut self.camera_uniforms, &mut self.clear_uniforms, &mut self.objects] {
            if let Err(err) = arena.recreate(gpu) {
                log::error!("{} uniform buffer recreation failed: {}", self.label, err);
            }
        }
    }

    /// Sub-mesh count the next frame will submit.
    pub fn reserve_objects(&mut self, count: u32) {
        self.reserved_objects = count;
    }

    /// Opens the geometry pass for `camera`. Returns `false` and leaves the
    /// frame disabled when there is nothing to draw into.
    pub fn begin_frame(
        &mut self,
        gpu: &mut dyn GpuBackend,
        library: &PipelineLibrary,
        camera: &Camera,
        view: Mat4,
        proj: Mat4,
        camera_position: Vec3,
    ) -> bool {
        self.active = None;
        self.draws = 0;

        let Some(gbuffer) = self.gbuffer.as_ref() else {
            log::warn!("{}: no G-buffer, skipping geometry pass", self.label);
            return false;
        };
        let (x, y, width, height) = camera.viewport.to_pixels(gbuffer.width, gbuffer.height);
        let scissor = ScissorRect { x, y, width, height };
        if scissor.is_empty() {
            log::warn!("{}: camera viewport has zero area, frame disabled", self.label);
            return false;
        }

        let prepared = self
            .camera_uniforms
            .begin(gpu, 1)
            .and_then(|_| self.clear_uniforms.begin(gpu, 1))
            .and_then(|_| self.objects.begin(gpu, self.reserved_objects));
        if let Err(err) = prepared {
            log::error!("{}: uniform allocation failed: {}", self.label, err);
            return false;
        }
        let camera_slot = self
            .camera_uniforms
            .push(&CameraUniform::new(proj * view, camera_position));
        let clear_slot = self.clear_uniforms.push(&ColorUniform {
            color: camera.background_color.to_array(),
        });
        let (Some(camera_slot), Some(clear_slot)) = (camera_slot, clear_slot) else {
            return false;
        };
        self.camera_uniforms.flush(gpu);
        self.clear_uniforms.flush(gpu);

        let color = |texture| ColorAttachment {
            texture,
            load: LoadOp::Load,
        };
        gpu.begin_render_pass(&RenderPassDescriptor {
            label: format!("{}GBufferPass", self.label),
            color_attachments: vec![
                color(gbuffer.albedo),
                color(gbuffer.normal),
                color(gbuffer.position),
                color(gbuffer.material),
            ],
            depth_attachment: Some(DepthAttachment {
                texture: gbuffer.depth,
                depth_load: LoadOp::Load,
                depth_write: true,
                stencil_load: LoadOp::Load,
            }),
        });
        gpu.set_viewport(scissor.viewport());
        gpu.set_scissor(scissor);

        if camera.clear_on_render {
            gpu.set_pipeline(library.gbuffer_clear);
            self.clear_uniforms.bind::<ColorUniform>(gpu, 0, clear_slot);
            gpu.draw(0..3, 0..1);
        }

        gpu.set_pipeline(library.gbuffer);
        self.camera_uniforms.bind::<CameraUniform>(gpu, 0, camera_slot);
        gpu.bind_sampler(7, library.material_sampler);

        self.active = Some(scissor);
        true
    }

    /// Draws every sub-mesh of `model`. Empty material slots bind the engine
    /// default for that slot.
    pub fn submit_model(
        &mut self,
        gpu: &mut dyn GpuBackend,
        library: &PipelineLibrary,
        textures: &TextureSource,
        model: &Model,
        world: Mat4,
    ) {
        if self.active.is_none() {
            return;
        }

        for sub_mesh in &model.meshes {
            let material = &sub_mesh.material;
            let object = ObjectUniform::new(world, material.base_color, material.metallic, material.roughness);
            let Some(slot) = self.objects.push(&object) else {
                continue;
            };
            self.objects.bind::<ObjectUniform>(gpu, 1, slot);

            for texture_slot in TextureSlot::ALL {
                let handle = material
                    .texture(texture_slot)
                    .and_then(|texture| textures.resolve(texture))
                    .filter(|handle| gpu.texture_exists(*handle))
                    .unwrap_or_else(|| library.defaults.get(texture_slot));
                gpu.bind_texture(2 + texture_slot.index() as u32, handle);
            }

            gpu.set_vertex_buffer(0, sub_mesh.vertex_buffer, 0);
            gpu.set_index_buffer(sub_mesh.index_buffer, sub_mesh.index_format);
            gpu.draw_indexed(0..sub_mesh.index_count, 0, 0..1);
            self.draws += 1;
        }
    }

    /// Closes the geometry pass. Returns the number of draws issued.
    pub fn end_frame(&mut self, gpu: &mut dyn GpuBackend) -> u32 {
        if self.active.take().is_none() {
            return 0;
        }
        gpu.end_render_pass();
        self.objects.flush(gpu);
        self.draws
    }

    pub fn destroy(&mut self, gpu: &mut dyn GpuBackend) {
        if let Some(gbuffer) = self.gbuffer.take() {
            gbuffer.destroy(gpu);
        }
        self.camera_uniforms.destroy(gpu);
        self.clear_uniforms.destroy(gpu);
        self.objects.destroy(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Material, TextureData};
    use crate::renderer::backend::{RecordedCommand, RecordingBackend};
    use crate::renderer::primitives::cube_mesh;
    use crate::scene::camera::ViewportRect;

    struct Fixture {
        gpu: RecordingBackend,
        library: PipelineLibrary,
        pass: GBufferPass,
        assets: Assets,
        outputs: HashMap<Entity, TextureHandle>,
    }

    fn fixture() -> Fixture {
        let mut gpu = RecordingBackend::new(64, 32);
        let library = PipelineLibrary::new(&mut gpu).unwrap();
        let pass = GBufferPass::new(&mut gpu, "Test", 64, 32, 4).unwrap();
        Fixture {
            gpu,
            library,
            pass,
            assets: Assets::new(),
            outputs: HashMap::new(),
        }
    }

    fn bound_textures(commands: &[RecordedCommand]) -> Vec<(u32, TextureHandle)> {
        commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BindTexture { binding, texture } => Some((*binding, *texture)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn missing_slots_bind_defaults() {
        let mut f = fixture();
        let model = Model::single(&mut f.gpu, "Cube", &cube_mesh(), Material::default()).unwrap();
        f.gpu.take_commands();

        assert!(f.pass.begin_frame(&mut f.gpu, &f.library, &Camera::default(), Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO));
        let source = TextureSource {
            assets: &f.assets,
            camera_outputs: &f.outputs,
        };
        f.pass.submit_model(&mut f.gpu, &f.library, &source, &model, Mat4::IDENTITY);
        assert_eq!(f.pass.end_frame(&mut f.gpu), 1);

        let bound = bound_textures(f.gpu.commands());
        for slot in TextureSlot::ALL {
            assert!(bound.contains(&(2 + slot.index() as u32, f.library.defaults.get(slot))));
        }
    }

    #[test]
    fn authored_texture_replaces_default() {
        let mut f = fixture();
        let albedo = f
            .assets
            .add_texture(&mut f.gpu, "Bricks", &TextureData::solid([200, 10, 10, 255]))
            .unwrap();
        let gpu_handle = f.assets.textures.get(albedo).unwrap().handle;
        let material = Material::default().with_texture(TextureSlot::Albedo, TextureRef::Asset(albedo));
        let model = Model::single(&mut f.gpu, "Cube", &cube_mesh(), material).unwrap();
        f.gpu.take_commands();

        f.pass.begin_frame(&mut f.gpu, &f.library, &Camera::default(), Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO);
        let source = TextureSource {
            assets: &f.assets,
            camera_outputs: &f.outputs,
        };
        f.pass.submit_model(&mut f.gpu, &f.library, &source, &model, Mat4::IDENTITY);
        f.pass.end_frame(&mut f.gpu);

        let bound = bound_textures(f.gpu.commands());
        assert!(bound.contains(&(2, gpu_handle)));
        assert!(bound.contains(&(3, f.library.defaults.get(TextureSlot::Normal))));
    }

    #[test]
    fn clear_draw_only_when_requested() {
        let mut f = fixture();
        let camera = Camera {
            clear_on_render: false,
            ..Camera::default()
        };
        f.pass.begin_frame(&mut f.gpu, &f.library, &camera, Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO);
        f.pass.end_frame(&mut f.gpu);
        assert!(f.gpu.draw_pipeline_labels().is_empty());

        f.gpu.take_commands();
        f.pass.begin_frame(&mut f.gpu, &f.library, &Camera::default(), Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO);
        f.pass.end_frame(&mut f.gpu);
        assert_eq!(f.gpu.draw_pipeline_labels(), vec!["GBufferClearPipeline".to_string()]);
    }

    #[test]
    fn viewport_scissor_matches_camera_rect() {
        let mut f = fixture();
        let camera = Camera::default().with_viewport(ViewportRect {
            x: 0.5,
            y: 0.0,
            width: 0.5,
            height: 1.0,
        });
        f.pass.begin_frame(&mut f.gpu, &f.library, &camera, Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO);
        f.pass.end_frame(&mut f.gpu);
        assert!(f.gpu.commands().contains(&RecordedCommand::SetScissor(ScissorRect {
            x: 32,
            y: 0,
            width: 32,
            height: 32,
        })));
    }

    #[test]
    fn failed_creation_disables_until_resize() {
        let mut f = fixture();
        f.gpu.fail_textures_with_prefix("TestGBuffer");
        f.pass.resize(&mut f.gpu, 80, 40);
        assert!(!f.pass.is_enabled());
        assert!(!f.pass.begin_frame(&mut f.gpu, &f.library, &Camera::default(), Mat4::IDENTITY, Mat4::IDENTITY, Vec3::ZERO));

        f.gpu.clear_failures();
        f.pass.resize(&mut f.gpu, 80, 40);
        assert_eq!(f.pass.gbuffer().map(GBuffer::size), Some((80, 40)));
    }
}
