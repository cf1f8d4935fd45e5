use glam::Vec4;
use hecs::Entity;

use super::{Handle, Texture};

/// Where a material slot samples from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextureRef {
    Asset(Handle<Texture>),
    /// Render target of a virtual camera, resolved every frame.
    CameraOutput(Entity),
}

/// Texture slots in binding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    Albedo,
    Normal,
    Metallic,
    Roughness,
    AmbientOcclusion,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; 5] = [
        TextureSlot::Albedo,
        TextureSlot::Normal,
        TextureSlot::Metallic,
        TextureSlot::Roughness,
        TextureSlot::AmbientOcclusion,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Texel used when the material leaves the slot empty.
    pub fn default_texel(&self) -> [u8; 4] {
        match self {
            TextureSlot::Albedo => [255, 255, 255, 255],
            TextureSlot::Normal => [128, 128, 255, 255],
            TextureSlot::Metallic => [0, 0, 0, 255],
            TextureSlot::Roughness => [255, 255, 255, 255],
            TextureSlot::AmbientOcclusion => [255, 255, 255, 255],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub textures: [Option<TextureRef>; 5],
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.6,
            textures: [None; 5],
        }
    }
}

impl Material {
    pub fn colored(base_color: Vec4) -> Self {
        Self {
            base_color,
            ..Self::default()
        }
    }

    pub fn with_texture(mut self, slot: TextureSlot, texture: TextureRef) -> Self {
        self.textures[slot.index()] = Some(texture);
        self
    }

    pub fn with_metallic_roughness(mut self, metallic: f32, roughness: f32) -> Self {
        self.metallic = metallic.clamp(0.0, 1.0);
        self.roughness = roughness.clamp(0.0, 1.0);
        self
    }

    pub fn texture(&self, slot: TextureSlot) -> Option<TextureRef> {
        self.textures[slot.index()]
    }
}
