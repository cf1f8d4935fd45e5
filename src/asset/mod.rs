pub mod cache;
pub mod handle;
pub mod material;
pub mod mesh;
pub mod texture;

pub use cache::AssetCache;
pub use handle::Handle;
pub use material::{Material, TextureRef, TextureSlot};
pub use mesh::{Model, SubMesh};
pub use texture::{Texture, TextureData};

use crate::renderer::backend::{BackendResult, GpuBackend};
use crate::renderer::primitives::MeshData;

/// GPU-resident models and textures referenced by scene components.
pub struct Assets {
    pub models: AssetCache<Model>,
    pub textures: AssetCache<Texture>,
}

impl Assets {
    pub fn new() -> Self {
        Self {
            models: AssetCache::new(),
            textures: AssetCache::new(),
        }
    }

    pub fn add_texture(
        &mut self,
        gpu: &mut dyn GpuBackend,
        label: &str,
        data: &TextureData,
    ) -> BackendResult<Handle<Texture>> {
        let texture = Texture::upload(gpu, label, data)?;
        Ok(self.textures.insert(texture))
    }

    pub fn add_model(
        &mut self,
        gpu: &mut dyn GpuBackend,
        label: &str,
        mesh: &MeshData,
        material: Material,
    ) -> BackendResult<Handle<Model>> {
        let model = Model::single(gpu, label, mesh, material)?;
        Ok(self.models.insert(model))
    }
}

impl Default for Assets {
    fn default() -> Self {
        Self::new()
    }
}
