// renderer/uniforms.rs
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::renderer::backend::{
    BackendResult, BufferDescriptor, BufferHandle, BufferUsages, GpuBackend,
};

/// Constant-buffer slots are padded to the common 256-byte offset alignment.
pub const UNIFORM_SLOT_STRIDE: u64 = 256;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
}

impl CameraUniform {
    pub fn new(view_proj: Mat4, camera_pos: Vec3) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            camera_pos: camera_pos.extend(1.0).to_array(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct ObjectUniform {
    pub model: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
    pub base_color: [f32; 4],
    /// metallic, roughness, unused, unused
    pub material: [f32; 4],
}

impl ObjectUniform {
    pub fn new(model: Mat4, base_color: Vec4, metallic: f32, roughness: f32) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            normal_matrix: model.inverse().transpose().to_cols_array_2d(),
            base_color: base_color.to_array(),
            material: [metallic, roughness, 0.0, 0.0],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct MatrixUniform {
    pub matrix: [[f32; 4]; 4],
}

impl MatrixUniform {
    pub fn new(matrix: Mat4) -> Self {
        Self {
            matrix: matrix.to_cols_array_2d(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct LightUniform {
    /// kind, has_shadow, unused, unused
    pub header: [u32; 4],
    pub camera_pos: [f32; 4],
    pub camera_forward: [f32; 4],
    pub color_intensity: [f32; 4],
    pub position_radius: [f32; 4],
    pub direction: [f32; 4],
    /// Spot: cos inner, cos outer. Directional: cascade near, far.
    pub range: [f32; 4],
    pub light_view_proj: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct SkyUniform {
    pub inverse_view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
    /// intensity, unused, unused, unused
    pub params: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct ColorUniform {
    pub color: [f32; 4],
}

/// Slot-addressed constant buffer, grown by doubling.
pub struct UniformArena {
    label: String,
    buffer: BufferHandle,
    capacity: u32,
    initial_capacity: u32,
    scratch: Vec<u8>,
    used: u32,
}

impl UniformArena {
    pub fn new(gpu: &mut dyn GpuBackend, label: &str, capacity: u32) -> BackendResult<Self> {
        let capacity = capacity.max(1);
        let buffer = Self::create_buffer(gpu, label, capacity)?;
        Ok(Self {
            label: label.to_string(),
            buffer,
            capacity,
            initial_capacity: capacity,
            scratch: Vec::with_capacity(capacity as usize * UNIFORM_SLOT_STRIDE as usize),
            used: 0,
        })
    }

    fn create_buffer(
        gpu: &mut dyn GpuBackend,
        label: &str,
        capacity: u32,
    ) -> BackendResult<BufferHandle> {
        gpu.create_buffer(&BufferDescriptor {
            label: label.to_string(),
            size: capacity as u64 * UNIFORM_SLOT_STRIDE,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        })
    }

    /// Starts a new fill and makes room for `required` slots.
    pub fn begin(&mut self, gpu: &mut dyn GpuBackend, required: u32) -> BackendResult<()> {
        self.scratch.clear();
        self.used = 0;
        if required > self.capacity {
            let new_capacity = required.max(self.capacity * 2);
            log::info!(
                "Growing {}: {} -> {} slots",
                self.label,
                self.capacity,
                new_capacity
            );
            let buffer = Self::create_buffer(gpu, &self.label, new_capacity)?;
            gpu.destroy_buffer(self.buffer);
            self.buffer = buffer;
            self.capacity = new_capacity;
        }
        Ok(())
    }

    /// Appends a value and returns its slot, or `None` when full.
    pub fn push<T: Pod>(&mut self, value: &T) -> Option<u32> {
        if self.used >= self.capacity {
            log::error!("{} is full ({} slots)", self.label, self.capacity);
            return None;
        }
        let bytes = bytemuck::bytes_of(value);
        debug_assert!(bytes.len() as u64 <= UNIFORM_SLOT_STRIDE);
        let slot = self.used;
        self.scratch.extend_from_slice(bytes);
        self.scratch
            .resize((slot as usize + 1) * UNIFORM_SLOT_STRIDE as usize, 0);
        self.used += 1;
        Some(slot)
    }

    /// Uploads every slot pushed since `begin`.
    pub fn flush(&mut self, gpu: &mut dyn GpuBackend) {
        if !self.scratch.is_empty() {
            gpu.write_buffer(self.buffer, 0, &self.scratch);
        }
    }

    pub fn bind<T: Pod>(&self, gpu: &mut dyn GpuBackend, binding: u32, slot: u32) {
        gpu.bind_constant_buffer(
            binding,
            self.buffer,
            slot as u64 * UNIFORM_SLOT_STRIDE,
            std::mem::size_of::<T>() as u64,
        );
    }

    /// Drops the grown buffer and starts over at the initial size.
    pub fn recreate(&mut self, gpu: &mut dyn GpuBackend) -> BackendResult<()> {
        let buffer = Self::create_buffer(gpu, &self.label, self.initial_capacity)?;
        gpu.destroy_buffer(self.buffer);
        self.buffer = buffer;
        self.capacity = self.initial_capacity;
        self.scratch.clear();
        self.used = 0;
        Ok(())
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn destroy(&self, gpu: &mut dyn GpuBackend) {
        gpu.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::RecordingBackend;

    #[test]
    fn uniforms_fit_in_one_slot() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 80);
        assert_eq!(std::mem::size_of::<ObjectUniform>(), 160);
        assert_eq!(std::mem::size_of::<LightUniform>(), 176);
        assert_eq!(std::mem::size_of::<SkyUniform>(), 96);
        assert!(std::mem::size_of::<LightUniform>() as u64 <= UNIFORM_SLOT_STRIDE);
    }

    #[test]
    fn arena_grows_to_fit_request() {
        let mut gpu = RecordingBackend::new(4, 4);
        let mut arena = UniformArena::new(&mut gpu, "TestArena", 2).unwrap();
        arena.begin(&mut gpu, 5).unwrap();
        assert_eq!(arena.capacity(), 5);
        arena.begin(&mut gpu, 6).unwrap();
        assert_eq!(arena.capacity(), 10);
    }

    #[test]
    fn arena_refuses_push_past_capacity() {
        let mut gpu = RecordingBackend::new(4, 4);
        let mut arena = UniformArena::new(&mut gpu, "TestArena", 1).unwrap();
        arena.begin(&mut gpu, 1).unwrap();
        let value = ColorUniform { color: [1.0; 4] };
        assert_eq!(arena.push(&value), Some(0));
        assert_eq!(arena.push(&value), None);
    }

    #[test]
    fn recreate_restores_initial_capacity() {
        let mut gpu = RecordingBackend::new(4, 4);
        let mut arena = UniformArena::new(&mut gpu, "TestArena", 2).unwrap();
        arena.begin(&mut gpu, 9).unwrap();
        arena.recreate(&mut gpu).unwrap();
        assert_eq!(arena.capacity(), 2);
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let model = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let object = ObjectUniform::new(model, Vec4::ONE, 0.0, 0.5);
        let normal = Mat4::from_cols_array_2d(&object.normal_matrix);
        let n = normal.transform_vector3(Vec3::X);
        assert!(n.abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-6));
    }
}
