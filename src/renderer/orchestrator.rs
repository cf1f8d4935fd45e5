// renderer/orchestrator.rs
// Per-frame camera ordering and the deferred pipeline instance each camera
// renders through.

use std::collections::{HashMap, HashSet};

use hecs::{Entity, World};
use thiserror::Error;

use crate::asset::Assets;
use crate::renderer::backend::{
    BackendError, BackendResult, GpuBackend, ScissorRect, TextureDescriptor, TextureHandle,
    TextureUsages,
};
use crate::renderer::compositor::{FrameCompositor, SkyDraw};
use crate::renderer::gbuffer::{GBufferPass, TextureSource};
use crate::renderer::library::{PipelineLibrary, FINAL_LIT_FORMAT};
use crate::renderer::lighting::{LightAccumulator, LitLight};
use crate::renderer::post::{PostEffect, PostEffectHandle, PostEffectRegistry};
use crate::renderer::shadow_cache::{ShadowDepthPass, ShadowMapCache};
use crate::renderer::virtualizer::{self, CameraView};
use crate::scene::camera::{camera_forward, TargetPolicy};
use crate::scene::extract::{extract_scene, CameraInstance, FrameScene};
use crate::settings::{RenderSettings, ShadowKeyPolicy};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("surface lost")]
    SurfaceLost,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub cameras_rendered: u32,
    pub cameras_skipped: u32,
    pub virtual_lights: u32,
    pub shadow_passes: u32,
    pub geometry_draws: u32,
    pub post_effect_passes: u32,
}

/// Everything a pipeline instance reads while rendering one camera.
pub struct FrameInputs<'a> {
    pub library: &'a PipelineLibrary,
    pub assets: &'a Assets,
    pub scene: &'a FrameScene,
    pub camera_outputs: &'a HashMap<Entity, TextureHandle>,
    pub dt: f32,
    pub frame: u64,
}

/// One set of G-buffer, shadow, luminance and composite targets.
pub struct DeferredPipeline {
    label: String,
    size: (u32, u32),
    gbuffer: GBufferPass,
    shadow_cache: ShadowMapCache,
    shadow_pass: ShadowDepthPass,
    accumulator: LightAccumulator,
    compositor: FrameCompositor,
    key_policy: ShadowKeyPolicy,
}

impl DeferredPipeline {
    pub fn new(
        gpu: &mut dyn GpuBackend,
        label: &str,
        width: u32,
        height: u32,
        settings: &RenderSettings,
    ) -> BackendResult<Self> {
        log::info!("Creating deferred pipeline '{}' at {}x{}", label, width, height);
        Ok(Self {
            label: label.to_string(),
            size: (width, height),
            gbuffer: GBufferPass::new(gpu, label, width, height, settings.max_objects_per_frame)?,
            shadow_cache: ShadowMapCache::new(
                settings.shadow_map_size,
                settings.shadow_cache_max_idle_frames,
            ),
            shadow_pass: ShadowDepthPass::new(
                gpu,
                settings.max_lights_per_frame,
                settings.max_objects_per_frame,
            )?,
            accumulator: LightAccumulator::new(gpu, label, width, height, settings.max_lights_per_frame)?,
            compositor: FrameCompositor::new(gpu, label, width, height)?,
            key_policy: settings.shadow_key_policy,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Recreates size-dependent targets. Shadow maps are left alone.
    pub fn resize(&mut self, gpu: &mut dyn GpuBackend, width: u32, height: u32) {
        if (width, height) == self.size {
            return;
        }
        log::info!("Resizing '{}' to {}x{}", self.label, width, height);
        self.size = (width, height);
        self.gbuffer.resize(gpu, width, height);
        self.accumulator.resize(gpu, width, height);
        self.compositor.resize(gpu, width, height);
        if let Err(err) = self.shadow_pass.recreate(gpu) {
            log::error!("'{}' shadow uniform recreation failed: {}", self.label, err);
        }
    }

    pub fn gbuffer_pass(&self) -> &GBufferPass {
        &self.gbuffer
    }

    pub fn accumulator(&self) -> &LightAccumulator {
        &self.accumulator
    }

    pub fn shadow_cache(&self) -> &ShadowMapCache {
        &self.shadow_cache
    }

    pub fn final_lit_texture(&self) -> Option<TextureHandle> {
        self.compositor.final_lit()
    }

    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.gbuffer.gbuffer().map(|g| g.depth)
    }

    /// Runs geometry, shadow, lighting, composite and post for one camera in
    /// its own command scope. Returns `false` when the camera was skipped.
    pub fn render_camera(
        &mut self,
        gpu: &mut dyn GpuBackend,
        inputs: &FrameInputs,
        effects: &mut PostEffectRegistry,
        camera: &CameraInstance,
        destination: TextureHandle,
        stats: &mut FrameStats,
    ) -> bool {
        let (width, height) = self.size;
        let (x, y, w, h) = camera.camera.viewport.to_pixels(width, height);
        let scissor = ScissorRect {
            x,
            y,
            width: w,
            height: h,
        };
        if scissor.is_empty() {
            log::warn!("Camera {:?} has a zero-area viewport, skipping", camera.entity);
            return false;
        }

        let view = camera.render_transform.view_matrix();
        let proj = camera.camera.projection_matrix(w as f32 / h as f32);
        effects.pre_render(&camera.camera.post_effects, inputs.dt, view, proj);

        gpu.begin_commands(&format!("{}Camera{:?}", self.label, camera.entity));
        let rendered = self.record_camera(gpu, inputs, effects, camera, destination, scissor, stats);
        gpu.end_commands();
        gpu.execute();
        rendered
    }

    #[allow(clippy::too_many_arguments)]
    fn record_camera(
        &mut self,
        gpu: &mut dyn GpuBackend,
        inputs: &FrameInputs,
        effects: &mut PostEffectRegistry,
        camera: &CameraInstance,
        destination: TextureHandle,
        scissor: ScissorRect,
        stats: &mut FrameStats,
    ) -> bool {
        let library = inputs.library;
        let aspect = scissor.width as f32 / scissor.height as f32;
        let transform = camera.render_transform;
        let view = transform.view_matrix();
        let proj = camera.camera.projection_matrix(aspect);
        let camera_position = transform.translation;

        // geometry
        let visible: Vec<_> = inputs
            .scene
            .meshes
            .iter()
            .filter(|mesh| !camera.hidden_meshes.contains(&mesh.entity))
            .filter_map(|mesh| inputs.assets.models.get(mesh.model).map(|model| (mesh, model)))
            .collect();
        let sub_meshes: usize = visible.iter().map(|(_, model)| model.meshes.len()).sum();
        self.gbuffer.reserve_objects(sub_meshes as u32);
        if !self
            .gbuffer
            .begin_frame(gpu, library, &camera.camera, view, proj, camera_position)
        {
            return false;
        }
        let textures = TextureSource {
            assets: inputs.assets,
            camera_outputs: inputs.camera_outputs,
        };
        for (mesh, model) in &visible {
            self.gbuffer
                .submit_model(gpu, library, &textures, model, mesh.world);
        }
        stats.geometry_draws += self.gbuffer.end_frame(gpu);

        let Some(gbuffer) = self.gbuffer.gbuffer() else {
            return false;
        };

        // shadows
        let camera_view = CameraView::new(&camera.camera, transform, aspect);
        let lights = virtualizer::expand(&inputs.scene.lights, &camera_view, self.key_policy);
        stats.virtual_lights += lights.len() as u32;

        self.shadow_cache.begin_frame(inputs.frame);
        let mut shadow_maps: Vec<Option<TextureHandle>> = vec![None; lights.len()];
        let mut shadowed = Vec::new();
        for light in &lights {
            let (Some(key), Some(matrix)) = (light.shadow_key, light.light_view_proj) else {
                continue;
            };
            if let Some(entry) = self.shadow_cache.get_or_create(gpu, key) {
                entry.light_view_proj = matrix;
                shadowed.push((light.id, *entry));
            }
        }
        let matrices: Vec<_> = shadowed.iter().map(|(_, entry)| entry.light_view_proj).collect();
        match self.shadow_pass.prepare(gpu, &matrices, &inputs.scene.meshes) {
            Ok(slots) => {
                for ((id, entry), slot) in shadowed.iter().zip(slots) {
                    self.shadow_pass.render_depth(
                        gpu,
                        library.shadow_depth,
                        entry,
                        slot,
                        &inputs.scene.meshes,
                        inputs.assets,
                    );
                    shadow_maps[*id] = Some(entry.depth_texture);
                    stats.shadow_passes += 1;
                }
            }
            Err(err) => log::error!("'{}' shadow uniforms unavailable, lights unshadowed: {}", self.label, err),
        }
        self.shadow_cache.evict_idle(gpu);

        // lighting
        let lit: Vec<LitLight> = lights
            .iter()
            .zip(&shadow_maps)
            .map(|(light, shadow_map)| LitLight {
                light,
                shadow_map: *shadow_map,
            })
            .collect();
        let Some(final_luminance) = self.accumulator.accumulate_all(
            gpu,
            library,
            gbuffer,
            &lit,
            camera_position,
            camera_forward(&transform),
            scissor,
        ) else {
            return false;
        };

        // composite
        if !self
            .compositor
            .draw_final_lit_texture(gpu, library, gbuffer, final_luminance, scissor)
        {
            return false;
        }
        if let Some(skybox) = inputs.scene.skybox {
            match inputs.assets.textures.get(skybox.texture) {
                Some(texture) => {
                    let sky = SkyDraw {
                        texture: texture.handle,
                        intensity: skybox.intensity,
                        view_proj: proj * view,
                        camera_position,
                    };
                    self.compositor
                        .draw_skybox(gpu, library, gbuffer, &sky, scissor);
                }
                None => log::warn!("Skybox texture {:?} is not loaded", skybox.texture),
            }
        }
        stats.post_effect_passes += self.compositor.resolve(
            gpu,
            effects,
            &camera.camera.post_effects,
            inputs.dt,
            destination,
            scissor,
        );
        true
    }

    pub fn destroy(&mut self, gpu: &mut dyn GpuBackend) {
        self.gbuffer.destroy(gpu);
        self.shadow_cache.clear(gpu);
        self.shadow_pass.destroy(gpu);
        self.accumulator.destroy(gpu);
        self.compositor.destroy(gpu);
    }
}

struct VirtualTarget {
    policy: TargetPolicy,
    texture: TextureHandle,
    pipeline: DeferredPipeline,
}

impl VirtualTarget {
    fn create(
        gpu: &mut dyn GpuBackend,
        entity: Entity,
        policy: TargetPolicy,
        screen: (u32, u32),
        settings: &RenderSettings,
    ) -> BackendResult<Self> {
        let (width, height) = policy.resolve(screen.0, screen.1);
        let label = format!("VirtualCamera{}", entity.id());
        let texture = gpu.create_texture(
            &TextureDescriptor::render_target(format!("{label}Target"), width, height, FINAL_LIT_FORMAT)
                .with_usage(
                    TextureUsages::RENDER_TARGET
                        | TextureUsages::SAMPLED
                        | TextureUsages::COPY_SRC
                        | TextureUsages::COPY_DST,
                ),
        )?;
        match DeferredPipeline::new(gpu, &label, width, height, settings) {
            Ok(pipeline) => Ok(Self {
                policy,
                texture,
                pipeline,
            }),
            Err(err) => {
                gpu.destroy_texture(texture);
                Err(err)
            }
        }
    }

    fn destroy(mut self, gpu: &mut dyn GpuBackend) {
        gpu.destroy_texture(self.texture);
        self.pipeline.destroy(gpu);
    }
}

/// Owns the main pipeline, one pipeline per virtual camera and the post
/// effects, and renders every active camera each frame.
pub struct CameraOrchestrator {
    settings: RenderSettings,
    library: PipelineLibrary,
    main: DeferredPipeline,
    virtual_targets: HashMap<Entity, VirtualTarget>,
    effects: PostEffectRegistry,
    screen: (u32, u32),
    frame: u64,
    last_depth: Option<TextureHandle>,
}

impl CameraOrchestrator {
    pub fn new(
        gpu: &mut dyn GpuBackend,
        settings: RenderSettings,
        width: u32,
        height: u32,
    ) -> BackendResult<Self> {
        let library = PipelineLibrary::new(gpu)?;
        let main = DeferredPipeline::new(gpu, "Main", width.max(1), height.max(1), &settings)?;
        Ok(Self {
            settings,
            library,
            main,
            virtual_targets: HashMap::new(),
            effects: PostEffectRegistry::new(),
            screen: (width, height),
            frame: 0,
            last_depth: None,
        })
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn library(&self) -> &PipelineLibrary {
        &self.library
    }

    pub fn main_pipeline(&self) -> &DeferredPipeline {
        &self.main
    }

    pub fn virtual_pipeline(&self, camera: Entity) -> Option<&DeferredPipeline> {
        self.virtual_targets.get(&camera).map(|t| &t.pipeline)
    }

    pub fn register_effect(&mut self, effect: Box<dyn PostEffect>) -> PostEffectHandle {
        self.effects.register(effect)
    }

    pub fn effects_mut(&mut self) -> &mut PostEffectRegistry {
        &mut self.effects
    }

    /// Render target of a virtual camera.
    pub fn camera_output(&self, camera: Entity) -> Option<TextureHandle> {
        self.virtual_targets.get(&camera).map(|t| t.texture)
    }

    pub fn final_lit_texture(&self) -> Option<TextureHandle> {
        self.main.final_lit_texture()
    }

    /// Depth of the most recently rendered camera.
    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.last_depth
    }

    pub fn on_resize(&mut self, gpu: &mut dyn GpuBackend, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {}x{}", width, height);
            return;
        }
        self.screen = (width, height);
        self.main.resize(gpu, width, height);

        let screen_bound: Vec<Entity> = self
            .virtual_targets
            .iter()
            .filter(|(_, target)| target.policy.follows_screen())
            .map(|(entity, _)| *entity)
            .collect();
        for entity in screen_bound {
            self.recreate_target(gpu, entity);
        }
    }

    fn recreate_target(&mut self, gpu: &mut dyn GpuBackend, entity: Entity) {
        let Some(old) = self.virtual_targets.remove(&entity) else {
            return;
        };
        let policy = old.policy;
        old.destroy(gpu);
        match VirtualTarget::create(gpu, entity, policy, self.screen, &self.settings) {
            Ok(target) => {
                self.virtual_targets.insert(entity, target);
            }
            Err(err) => log::error!("Virtual camera {:?} target recreation failed: {}", entity, err),
        }
    }

    /// Creates, recreates and drops virtual targets to match this frame's cameras.
    fn sync_virtual_targets(&mut self, gpu: &mut dyn GpuBackend, cameras: &[CameraInstance]) {
        let live: HashSet<Entity> = cameras
            .iter()
            .filter(|c| c.is_virtual())
            .map(|c| c.entity)
            .collect();
        let stale: Vec<Entity> = self
            .virtual_targets
            .keys()
            .filter(|entity| !live.contains(entity))
            .copied()
            .collect();
        for entity in stale {
            if let Some(target) = self.virtual_targets.remove(&entity) {
                log::debug!("Releasing target of removed virtual camera {:?}", entity);
                target.destroy(gpu);
            }
        }

        for camera in cameras {
            let Some(policy) = camera.virtual_target else {
                continue;
            };
            let current = self.virtual_targets.get(&camera.entity).map(|t| t.policy);
            if current == Some(policy) {
                continue;
            }
            if let Some(old) = self.virtual_targets.remove(&camera.entity) {
                old.destroy(gpu);
            }
            let (width, height) = policy.resolve(self.screen.0, self.screen.1);
            if width == 0 || height == 0 {
                log::warn!("Virtual camera {:?} resolves to a zero-size target", camera.entity);
                continue;
            }
            match VirtualTarget::create(gpu, camera.entity, policy, self.screen, &self.settings) {
                Ok(target) => {
                    self.virtual_targets.insert(camera.entity, target);
                }
                Err(err) => {
                    log::error!("Virtual camera {:?} target creation failed: {}", camera.entity, err)
                }
            }
        }
    }

    /// Virtual cameras first, each group by ascending priority.
    pub fn order_cameras(cameras: &mut [CameraInstance]) {
        cameras.sort_by_key(|camera| (!camera.is_virtual(), camera.camera.priority));
    }

    pub fn render_frame(
        &mut self,
        gpu: &mut dyn GpuBackend,
        world: &World,
        assets: &Assets,
        dt: f32,
    ) -> FrameStats {
        self.frame += 1;
        let mut stats = FrameStats::default();
        let mut scene = extract_scene(world);
        let mut cameras = std::mem::take(&mut scene.cameras);
        Self::order_cameras(&mut cameras);

        self.sync_virtual_targets(gpu, &cameras);
        let camera_outputs: HashMap<Entity, TextureHandle> = self
            .virtual_targets
            .iter()
            .map(|(entity, target)| (*entity, target.texture))
            .collect();
        let back_buffer = gpu.back_buffer();

        let inputs = FrameInputs {
            library: &self.library,
            assets,
            scene: &scene,
            camera_outputs: &camera_outputs,
            dt,
            frame: self.frame,
        };

        for camera in &cameras {
            let (pipeline, destination) = if camera.is_virtual() {
                match self.virtual_targets.get_mut(&camera.entity) {
                    Some(target) => (&mut target.pipeline, target.texture),
                    None => {
                        stats.cameras_skipped += 1;
                        continue;
                    }
                }
            } else {
                match back_buffer {
                    Some(back_buffer) => (&mut self.main, back_buffer),
                    None => {
                        log::warn!("No back buffer this frame, skipping camera {:?}", camera.entity);
                        stats.cameras_skipped += 1;
                        continue;
                    }
                }
            };

            if pipeline.render_camera(gpu, &inputs, &mut self.effects, camera, destination, &mut stats) {
                stats.cameras_rendered += 1;
                self.last_depth = pipeline.depth_texture();
            } else {
                stats.cameras_skipped += 1;
            }
        }

        log::trace!("Frame {} stats: {:?}", self.frame, stats);
        stats
    }

    pub fn destroy(mut self, gpu: &mut dyn GpuBackend) {
        for (_, target) in self.virtual_targets.drain() {
            target.destroy(gpu);
        }
        self.main.destroy(gpu);
    }
}
