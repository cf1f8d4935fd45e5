// renderer/defaults.rs
// Engine-wide fallback textures bound when a material slot is empty.

use crate::asset::TextureSlot;
use crate::renderer::backend::{
    BackendResult, GpuBackend, TextureDescriptor, TextureFormat, TextureHandle, TextureUsages,
};

pub struct DefaultTextures {
    slots: [TextureHandle; 5],
    /// 1x1 depth texture bound for lights without a shadow map.
    pub null_shadow: TextureHandle,
}

impl DefaultTextures {
    pub fn new(gpu: &mut dyn GpuBackend) -> BackendResult<Self> {
        let mut slots = Vec::with_capacity(TextureSlot::ALL.len());
        for slot in TextureSlot::ALL {
            let handle = gpu.create_texture(&TextureDescriptor::new(
                format!("Default{:?}", slot),
                1,
                1,
                TextureFormat::Rgba8Unorm,
            ))?;
            gpu.write_texture(handle, &slot.default_texel());
            slots.push(handle);
        }

        let null_shadow = gpu.create_texture(
            &TextureDescriptor::new("NullShadowMap", 1, 1, TextureFormat::Depth32Float)
                .with_usage(TextureUsages::SAMPLED | TextureUsages::RENDER_TARGET),
        )?;

        Ok(Self {
            slots: [slots[0], slots[1], slots[2], slots[3], slots[4]],
            null_shadow,
        })
    }

    pub fn get(&self, slot: TextureSlot) -> TextureHandle {
        self.slots[slot.index()]
    }

    pub fn contains(&self, texture: TextureHandle) -> bool {
        self.slots.contains(&texture)
    }
}
