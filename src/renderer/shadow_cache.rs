// renderer/shadow_cache.rs
// Persistent shadow maps keyed by virtual light, and the depth-only pass
// that fills them.

use std::collections::HashMap;

use glam::Mat4;
use rayon::prelude::*;

use crate::asset::Assets;
use crate::renderer::backend::{
    BackendResult, DepthAttachment, GpuBackend, LoadOp, PipelineHandle, RenderPassDescriptor,
    ScissorRect, TextureDescriptor, TextureHandle, TextureUsages,
};
use crate::renderer::library::SHADOW_FORMAT;
use crate::renderer::uniforms::{MatrixUniform, UniformArena};
use crate::renderer::virtualizer::ShadowKey;
use crate::scene::extract::MeshInstance;

#[derive(Debug, Clone, Copy)]
pub struct ShadowMapEntry {
    pub depth_texture: TextureHandle,
    pub light_view_proj: Mat4,
    last_used: u64,
}

pub struct ShadowMapCache {
    resolution: u32,
    entries: HashMap<ShadowKey, ShadowMapEntry>,
    max_idle_frames: Option<u64>,
    frame: u64,
}

impl ShadowMapCache {
    pub fn new(resolution: u32, max_idle_frames: Option<u64>) -> Self {
        Self {
            resolution: resolution.max(1),
            entries: HashMap::new(),
            max_idle_frames,
            frame: 0,
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &ShadowKey) -> Option<&ShadowMapEntry> {
        self.entries.get(key)
    }

    /// Marks the start of a frame for idle tracking.
    pub fn begin_frame(&mut self, frame: u64) {
        self.frame = frame;
    }

    /// Returns the entry for `key`, allocating its depth texture on first use
    /// or when the previous one is gone. `None` if allocation fails.
    pub fn get_or_create(
        &mut self,
        gpu: &mut dyn GpuBackend,
        key: ShadowKey,
    ) -> Option<&mut ShadowMapEntry> {
        let alive = self
            .entries
            .get(&key)
            .is_some_and(|entry| gpu.texture_exists(entry.depth_texture));

        if !alive {
            if self.entries.remove(&key).is_some() {
                log::debug!("Shadow map for {:?} was lost; recreating", key);
            }
            let desc = TextureDescriptor::new(
                format!("ShadowMap{:?}", key),
                self.resolution,
                self.resolution,
                SHADOW_FORMAT,
            )
            .with_usage(TextureUsages::RENDER_TARGET | TextureUsages::SAMPLED);

            match gpu.create_texture(&desc) {
                Ok(depth_texture) => {
                    log::debug!(
                        "Allocated {}x{} shadow map for {:?}",
                        self.resolution,
                        self.resolution,
                        key
                    );
                    self.entries.insert(
                        key,
                        ShadowMapEntry {
                            depth_texture,
                            light_view_proj: Mat4::IDENTITY,
                            last_used: self.frame,
                        },
                    );
                }
                Err(err) => {
                    log::error!("Shadow map allocation for {:?} failed: {}", key, err);
                    return None;
                }
            }
        }

        let frame = self.frame;
        self.entries.get_mut(&key).map(|entry| {
            entry.last_used = frame;
            entry
        })
    }

    /// Drops entries idle for longer than the configured limit.
    pub fn evict_idle(&mut self, gpu: &mut dyn GpuBackend) -> usize {
        let Some(max_idle) = self.max_idle_frames else {
            return 0;
        };
        let frame = self.frame;
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            let keep = frame.saturating_sub(entry.last_used) <= max_idle;
            if !keep {
                log::debug!("Evicting idle shadow map {:?}", key);
                gpu.destroy_texture(entry.depth_texture);
            }
            keep
        });
        before - self.entries.len()
    }

    pub fn clear(&mut self, gpu: &mut dyn GpuBackend) {
        for entry in self.entries.values() {
            gpu.destroy_texture(entry.depth_texture);
        }
        self.entries.clear();
    }
}

/// Constant buffers for the depth-only pass: light matrices at binding 0,
/// caster model matrices at binding 1.
pub struct ShadowDepthPass {
    light_matrices: UniformArena,
    caster_matrices: UniformArena,
}

impl ShadowDepthPass {
    pub fn new(gpu: &mut dyn GpuBackend, max_lights: u32, max_casters: u32) -> BackendResult<Self> {
        Ok(Self {
            light_matrices: UniformArena::new(gpu, "ShadowLightMatrices", max_lights)?,
            caster_matrices: UniformArena::new(gpu, "ShadowCasterMatrices", max_casters)?,
        })
    }

    /// Uploads caster matrices in `meshes` order and light matrices in
    /// `lights` order. Returns the light slots.
    pub fn prepare(
        &mut self,
        gpu: &mut dyn GpuBackend,
        lights: &[Mat4],
        meshes: &[MeshInstance],
    ) -> BackendResult<Vec<u32>> {
        self.light_matrices.begin(gpu, lights.len() as u32)?;
        self.caster_matrices.begin(gpu, meshes.len() as u32)?;

        let casters: Vec<MatrixUniform> = meshes
            .par_iter()
            .map(|mesh| MatrixUniform::new(mesh.world))
            .collect();
        for caster in &casters {
            self.caster_matrices.push(caster);
        }

        let slots = lights
            .iter()
            .filter_map(|matrix| self.light_matrices.push(&MatrixUniform::new(*matrix)))
            .collect();

        self.light_matrices.flush(gpu);
        self.caster_matrices.flush(gpu);
        Ok(slots)
    }

    /// Clears the entry's depth texture and draws every caster into it.
    /// Returns the number of indexed draws.
    pub fn render_depth(
        &self,
        gpu: &mut dyn GpuBackend,
        pipeline: PipelineHandle,
        entry: &ShadowMapEntry,
        light_slot: u32,
        meshes: &[MeshInstance],
        assets: &Assets,
    ) -> u32 {
        let size = gpu.texture_size(entry.depth_texture).unwrap_or((1, 1));
        gpu.begin_render_pass(&RenderPassDescriptor {
            label: "ShadowPass".to_string(),
            color_attachments: Vec::new(),
            depth_attachment: Some(DepthAttachment {
                texture: entry.depth_texture,
                depth_load: LoadOp::Clear(1.0),
                depth_write: true,
                stencil_load: LoadOp::Load,
            }),
        });
        let rect = ScissorRect::full(size.0, size.1);
        gpu.set_viewport(rect.viewport());
        gpu.set_scissor(rect);
        gpu.set_pipeline(pipeline);
        self.light_matrices.bind::<MatrixUniform>(gpu, 0, light_slot);

        let mut draws = 0;
        for (caster_slot, mesh) in meshes.iter().enumerate() {
            let Some(model) = assets.models.get(mesh.model) else {
                continue;
            };
            self.caster_matrices
                .bind::<MatrixUniform>(gpu, 1, caster_slot as u32);
            for sub_mesh in &model.meshes {
                gpu.set_vertex_buffer(0, sub_mesh.vertex_buffer, 0);
                gpu.set_index_buffer(sub_mesh.index_buffer, sub_mesh.index_format);
                gpu.draw_indexed(0..sub_mesh.index_count, 0, 0..1);
                draws += 1;
            }
        }

        gpu.end_render_pass();
        draws
    }

    pub fn recreate(&mut self, gpu: &mut dyn GpuBackend) -> BackendResult<()> {
        self.light_matrices.recreate(gpu)?;
        self.caster_matrices.recreate(gpu)
    }

    pub fn destroy(&self, gpu: &mut dyn GpuBackend) {
        self.light_matrices.destroy(gpu);
        self.caster_matrices.destroy(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::RecordingBackend;

    fn key(i: usize) -> ShadowKey {
        ShadowKey::Positional(i)
    }

    #[test]
    fn entries_are_reused_across_frames() {
        let mut gpu = RecordingBackend::new(4, 4);
        let mut cache = ShadowMapCache::new(512, None);
        let first = cache.get_or_create(&mut gpu, key(0)).unwrap().depth_texture;
        cache.begin_frame(1);
        let second = cache.get_or_create(&mut gpu, key(0)).unwrap().depth_texture;
        assert_eq!(first, second);
        assert_eq!(gpu.texture_size(first), Some((512, 512)));
    }

    #[test]
    fn lost_texture_is_recreated() {
        let mut gpu = RecordingBackend::new(4, 4);
        let mut cache = ShadowMapCache::new(64, None);
        let first = cache.get_or_create(&mut gpu, key(3)).unwrap().depth_texture;
        gpu.forget_texture(first);
        let second = cache.get_or_create(&mut gpu, key(3)).unwrap().depth_texture;
        assert_ne!(first, second);
        assert!(gpu.texture_exists(second));
    }

    #[test]
    fn allocation_failure_returns_none() {
        let mut gpu = RecordingBackend::new(4, 4);
        gpu.fail_textures_with_prefix("ShadowMap");
        let mut cache = ShadowMapCache::new(64, None);
        assert!(cache.get_or_create(&mut gpu, key(0)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn idle_entries_are_evicted_only_when_enabled() {
        let mut gpu = RecordingBackend::new(4, 4);
        let mut keep_all = ShadowMapCache::new(16, None);
        keep_all.get_or_create(&mut gpu, key(0));
        keep_all.begin_frame(1000);
        assert_eq!(keep_all.evict_idle(&mut gpu), 0);

        let mut cache = ShadowMapCache::new(16, Some(2));
        cache.get_or_create(&mut gpu, key(0));
        cache.get_or_create(&mut gpu, key(1));
        cache.begin_frame(3);
        cache.get_or_create(&mut gpu, key(1));
        assert_eq!(cache.evict_idle(&mut gpu), 1);
        assert!(cache.get(&key(0)).is_none());
        assert!(cache.get(&key(1)).is_some());
    }
}
