use super::vertex::{v, Vertex};
use std::f32::consts::PI;

/// CPU-side geometry ready for upload.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

pub fn sphere_mesh(segments: u32, rings: u32) -> MeshData {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    for ring in 0..=rings {
        let phi = PI * ring as f32 / rings as f32;
        let y = phi.cos();
        let ring_radius = phi.sin();

        for segment in 0..=segments {
            let theta = 2.0 * PI * segment as f32 / segments as f32;
            let x = ring_radius * theta.cos();
            let z = ring_radius * theta.sin();

            let u = segment as f32 / segments as f32;
            let tex_v = ring as f32 / rings as f32;
            let tangent = [-theta.sin(), 0.0, theta.cos(), 1.0];

            vertices.push(v([x, y, z], [x, y, z], [u, tex_v], tangent));
        }
    }

    for ring in 0..rings {
        for segment in 0..segments {
            let current = ring * (segments + 1) + segment;
            let next = current + segments + 1;

            indices.extend_from_slice(&[current, next, current + 1]);
            indices.extend_from_slice(&[current + 1, next, next + 1]);
        }
    }

    MeshData { vertices, indices }
}

/// Unit cube centred on the origin, four vertices per face.
pub fn cube_mesh() -> MeshData {
    // (normal, tangent); bitangent = normal x tangent
    let faces: [([f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (face, (normal, tangent)) in faces.iter().enumerate() {
        let n = glam::Vec3::from_array(*normal);
        let t = glam::Vec3::from_array(*tangent);
        let b = n.cross(t);
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        for (su, sv) in corners {
            let pos = (n + t * su + b * sv) * 0.5;
            let uv = [(su + 1.0) * 0.5, 1.0 - (sv + 1.0) * 0.5];
            vertices.push(v(
                pos.to_array(),
                *normal,
                uv,
                [tangent[0], tangent[1], tangent[2], 1.0],
            ));
        }
        let o = face as u32 * 4;
        indices.extend_from_slice(&[o, o + 1, o + 2, o, o + 2, o + 3]);
    }

    MeshData { vertices, indices }
}

/// Square in the XZ plane facing +Y, side length `size`.
pub fn plane_mesh(size: f32, uv_repeat: f32) -> MeshData {
    let h = size * 0.5;
    let normal = [0.0, 1.0, 0.0];
    let tangent = [1.0, 0.0, 0.0, 1.0];
    let vertices = vec![
        v([-h, 0.0, h], normal, [0.0, uv_repeat], tangent),
        v([h, 0.0, h], normal, [uv_repeat, uv_repeat], tangent),
        v([h, 0.0, -h], normal, [uv_repeat, 0.0], tangent),
        v([-h, 0.0, -h], normal, [0.0, 0.0], tangent),
    ];
    MeshData {
        vertices,
        indices: vec![0, 1, 2, 0, 2, 3],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn assert_ccw_outward(mesh: &MeshData) {
        for tri in mesh.indices.chunks(3) {
            let a = Vec3::from_array(mesh.vertices[tri[0] as usize].pos);
            let b = Vec3::from_array(mesh.vertices[tri[1] as usize].pos);
            let c = Vec3::from_array(mesh.vertices[tri[2] as usize].pos);
            let n = Vec3::from_array(mesh.vertices[tri[0] as usize].normal);
            assert!((b - a).cross(c - a).dot(n) > 0.0);
        }
    }

    #[test]
    fn cube_counts_look_right() {
        let mesh = cube_mesh();
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
    }

    #[test]
    fn cube_triangles_wind_counter_clockwise() {
        assert_ccw_outward(&cube_mesh());
    }

    #[test]
    fn plane_faces_up() {
        assert_ccw_outward(&plane_mesh(4.0, 1.0));
    }

    #[test]
    fn sphere_indices_stay_in_range() {
        let mesh = sphere_mesh(8, 4);
        let max = mesh.vertices.len() as u32;
        assert!(mesh.indices.iter().all(|&i| i < max));
    }
}
