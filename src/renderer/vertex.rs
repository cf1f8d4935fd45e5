use bytemuck::{Pod, Zeroable};
use std::mem;

use crate::renderer::backend::{VertexAttribute, VertexFormat, VertexLayout};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 4],
}

impl Vertex {
    pub const STRIDE: u64 = mem::size_of::<Vertex>() as u64;

    pub fn layout() -> VertexLayout {
        VertexLayout {
            stride: Self::STRIDE,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    offset: 0,
                    format: VertexFormat::Float32x3,
                },
                VertexAttribute {
                    location: 1,
                    offset: 12,
                    format: VertexFormat::Float32x3,
                },
                VertexAttribute {
                    location: 2,
                    offset: 24,
                    format: VertexFormat::Float32x2,
                },
                VertexAttribute {
                    location: 3,
                    offset: 32,
                    format: VertexFormat::Float32x4,
                },
            ],
        }
    }

    /// Same stride, position attribute only. Used by depth-only passes.
    pub fn position_only_layout() -> VertexLayout {
        VertexLayout {
            stride: Self::STRIDE,
            attributes: vec![VertexAttribute {
                location: 0,
                offset: 0,
                format: VertexFormat::Float32x3,
            }],
        }
    }
}

#[inline]
pub fn v(pos: [f32; 3], normal: [f32; 3], uv: [f32; 2], tangent: [f32; 4]) -> Vertex {
    Vertex {
        pos,
        normal,
        uv,
        tangent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn vertex_stride_matches_struct_size() {
        assert_eq!(Vertex::layout().stride, std::mem::size_of::<Vertex>() as u64);
        assert_eq!(Vertex::STRIDE, 48);
    }

    #[test]
    fn attribute_offsets_match_fields() {
        let offsets: Vec<u64> = Vertex::layout().attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32]);
        assert_eq!(Vertex::position_only_layout().stride, Vertex::STRIDE);
    }
}
