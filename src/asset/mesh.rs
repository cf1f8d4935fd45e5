use crate::asset::Material;
use crate::renderer::backend::{
    BackendResult, BufferDescriptor, BufferHandle, BufferUsages, GpuBackend, IndexFormat,
};
use crate::renderer::primitives::MeshData;
use crate::renderer::Vertex;

/// One drawable range with its own material.
#[derive(Debug, Clone)]
pub struct SubMesh {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    pub index_format: IndexFormat,
    pub vertex_stride: u64,
    pub material: Material,
}

impl SubMesh {
    pub fn upload(
        gpu: &mut dyn GpuBackend,
        label: &str,
        mesh: &MeshData,
        material: Material,
    ) -> BackendResult<Self> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);
        let vertex_buffer = gpu.create_buffer(&BufferDescriptor {
            label: format!("{label}VertexBuffer"),
            size: vertex_bytes.len() as u64,
            usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
        })?;
        gpu.write_buffer(vertex_buffer, 0, vertex_bytes);

        // u32 indices keep the slice a multiple of four bytes
        let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);
        let index_buffer = gpu.create_buffer(&BufferDescriptor {
            label: format!("{label}IndexBuffer"),
            size: index_bytes.len() as u64,
            usage: BufferUsages::INDEX | BufferUsages::COPY_DST,
        })?;
        gpu.write_buffer(index_buffer, 0, index_bytes);

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
            index_format: IndexFormat::Uint32,
            vertex_stride: Vertex::STRIDE,
            material,
        })
    }
}

/// A set of sub-meshes drawn with one world matrix.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub meshes: Vec<SubMesh>,
}

impl Model {
    pub fn upload(
        gpu: &mut dyn GpuBackend,
        label: &str,
        parts: &[(MeshData, Material)],
    ) -> BackendResult<Self> {
        let meshes = parts
            .iter()
            .enumerate()
            .filter(|(_, (mesh, _))| !mesh.indices.is_empty())
            .map(|(i, (mesh, material))| {
                SubMesh::upload(gpu, &format!("{label}[{i}]"), mesh, material.clone())
            })
            .collect::<BackendResult<Vec<_>>>()?;
        Ok(Self { meshes })
    }

    pub fn single(
        gpu: &mut dyn GpuBackend,
        label: &str,
        mesh: &MeshData,
        material: Material,
    ) -> BackendResult<Self> {
        Self::upload(gpu, label, &[(mesh.clone(), material)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::RecordingBackend;
    use crate::renderer::primitives::{cube_mesh, MeshData};

    #[test]
    fn empty_parts_are_dropped() {
        let mut gpu = RecordingBackend::new(4, 4);
        let model = Model::upload(
            &mut gpu,
            "Mixed",
            &[
                (cube_mesh(), Material::default()),
                (MeshData::default(), Material::default()),
            ],
        )
        .unwrap();
        assert_eq!(model.meshes.len(), 1);
        assert_eq!(model.meshes[0].index_count, 36);
        assert_eq!(model.meshes[0].vertex_stride, 48);
    }
}
