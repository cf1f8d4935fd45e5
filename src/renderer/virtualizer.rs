// renderer/virtualizer.rs
// Expands authored lights into the per-face / per-cascade lights the
// shadow and lighting passes iterate over.

use std::f32::consts::{FRAC_PI_2, PI};

use glam::{Mat4, Quat, Vec3};
use hecs::Entity;

use crate::scene::camera::{camera_forward, Camera, Projection};
use crate::scene::components::{Light, LightKind};
use crate::scene::extract::SceneLight;
use crate::scene::Transform;
use crate::settings::ShadowKeyPolicy;

/// Split points of the three directional cascades, as fractions of `[near, far]`.
pub const CASCADE_FRACTIONS: [f32; 4] = [0.0, 0.1, 0.5, 1.0];
pub const CASCADE_COUNT: usize = 3;
pub const POINT_FACE_COUNT: usize = 6;

const SHADOW_NEAR: f32 = 0.1;
const ORTHO_PADDING: f32 = 1.2;
const MIN_DEPTH_RANGE: f32 = 0.5;

/// Cache key of a shadow map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowKey {
    /// Source light entity plus face / cascade index. Survives reordering.
    Stable { source: Entity, sub_index: u8 },
    /// Index in the flattened list. Shifts whenever a light is added or removed.
    Positional(usize),
}

/// Type-specific lighting inputs, one variant per light kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightParams {
    Directional {
        direction: Vec3,
        cascade_near: f32,
        cascade_far: f32,
    },
    Point {
        position: Vec3,
        radius: f32,
        face_forward: Vec3,
    },
    Spot {
        position: Vec3,
        direction: Vec3,
        radius: f32,
        cos_inner: f32,
        cos_outer: f32,
    },
    Ambient,
}

#[derive(Debug, Clone, Copy)]
pub struct VirtualLight {
    /// Position in the frame's flattened list.
    pub id: usize,
    pub source: Entity,
    pub light: Light,
    /// Synthetic transform: rotated per point face, moved per cascade.
    pub transform: Transform,
    pub params: LightParams,
    /// `None` for lights that never cast shadows.
    pub light_view_proj: Option<Mat4>,
    pub shadow_key: Option<ShadowKey>,
}

/// The viewer a frame's lights are virtualized against.
#[derive(Debug, Clone, Copy)]
pub struct CameraView {
    pub transform: Transform,
    pub projection: Projection,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl CameraView {
    pub fn new(camera: &Camera, transform: Transform, aspect: f32) -> Self {
        Self {
            transform,
            projection: camera.projection,
            aspect,
            near: camera.near,
            far: camera.far,
        }
    }
}

/// Placement of one directional cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrthoFit {
    pub position: Vec3,
    /// Width and height of the square ortho volume.
    pub size: f32,
    /// Extent of the slice along the light direction.
    pub depth_range: f32,
    pub up: Vec3,
}

pub fn virtual_lights_per(kind: &LightKind) -> usize {
    match kind {
        LightKind::Directional => CASCADE_COUNT,
        LightKind::Point { .. } => POINT_FACE_COUNT,
        LightKind::Spot { .. } | LightKind::Ambient => 1,
    }
}

pub fn virtual_light_count<'a>(lights: impl IntoIterator<Item = &'a Light>) -> usize {
    lights
        .into_iter()
        .map(|light| virtual_lights_per(&light.kind))
        .sum()
}

pub fn cascade_splits(near: f32, far: f32) -> [(f32, f32); CASCADE_COUNT] {
    let span = far - near;
    let at = |i: usize| near + CASCADE_FRACTIONS[i] * span;
    [(at(0), at(1)), (at(1), at(2)), (at(2), far)]
}

/// Face rotations applied to the base `-Z` forward: front, yaw +90, yaw -90,
/// yaw 180, pitch +90, pitch -90.
pub fn point_face_rotations() -> [Quat; POINT_FACE_COUNT] {
    [
        Quat::IDENTITY,
        Quat::from_rotation_y(FRAC_PI_2),
        Quat::from_rotation_y(-FRAC_PI_2),
        Quat::from_rotation_y(PI),
        Quat::from_rotation_x(FRAC_PI_2),
        Quat::from_rotation_x(-FRAC_PI_2),
    ]
}

/// Index of the point face that shades `to_pixel`, using the same rule as
/// `owns_point_face` in the lighting shader: the dominant axis wins, and ties
/// on a face diagonal go to x, then y, then z.
pub fn owning_point_face(to_pixel: Vec3) -> Option<usize> {
    if to_pixel == Vec3::ZERO {
        return None;
    }
    let a = to_pixel.abs();
    let axis = if a.z > a.x && a.z > a.y {
        Vec3::new(0.0, 0.0, to_pixel.z.signum())
    } else if a.y > a.x {
        Vec3::new(0.0, to_pixel.y.signum(), 0.0)
    } else {
        Vec3::new(to_pixel.x.signum(), 0.0, 0.0)
    };
    point_face_rotations()
        .iter()
        .position(|rotation| (*rotation * Vec3::NEG_Z).dot(axis) > 0.5)
}

fn safe_normalize(v: Vec3, fallback: Vec3) -> Vec3 {
    if v.length_squared() > 1e-6 {
        v.normalize()
    } else {
        fallback
    }
}

/// Up vector for a light basis; switches to world right near vertical.
fn light_up_reference(forward: Vec3) -> Vec3 {
    if forward.dot(Vec3::Y).abs() > 0.99 {
        Vec3::X
    } else {
        Vec3::Y
    }
}

/// World-space corners of the camera frustum slice `[split_near, split_far]`.
pub fn slice_corners(view: &CameraView, split_near: f32, split_far: f32) -> [Vec3; 8] {
    let origin = view.transform.translation;
    let forward = camera_forward(&view.transform);
    let right = safe_normalize(view.transform.right(), Vec3::X);
    let up = safe_normalize(view.transform.up(), Vec3::Y);

    let mut corners = [Vec3::ZERO; 8];
    for (i, depth) in [split_near, split_far].into_iter().enumerate() {
        let (hx, hy) = view.projection.half_extents(depth, view.aspect);
        let center = origin + forward * depth;
        corners[i * 4] = center - right * hx - up * hy;
        corners[i * 4 + 1] = center + right * hx - up * hy;
        corners[i * 4 + 2] = center + right * hx + up * hy;
        corners[i * 4 + 3] = center - right * hx + up * hy;
    }
    corners
}

/// Fits a square orthographic volume around a frustum slice as seen from the light.
pub fn compute_ortho_size(
    split_near: f32,
    split_far: f32,
    view: &CameraView,
    light_transform: &Transform,
) -> OrthoFit {
    let corners = slice_corners(view, split_near, split_far);
    let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;

    let forward = safe_normalize(light_transform.forward(), Vec3::NEG_Y);
    let right = forward.cross(light_up_reference(forward)).normalize();
    let up = right.cross(forward);

    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    for corner in corners {
        let local = corner - center;
        let p = Vec3::new(local.dot(right), local.dot(up), local.dot(forward));
        min = min.min(p);
        max = max.max(p);
    }
    let bounds = max - min;
    let depth_range = bounds.z.max(MIN_DEPTH_RANGE);

    // center of the light-space box, back in world space
    let mid = (min + max) * 0.5;
    let slice_center = center + right * mid.x + up * mid.y + forward * mid.z;

    OrthoFit {
        position: slice_center - forward * (2.0 * depth_range),
        size: bounds.x.max(bounds.y) * ORTHO_PADDING,
        depth_range,
        up,
    }
}

fn cascade_view_proj(fit: &OrthoFit, forward: Vec3) -> Mat4 {
    let half = fit.size * 0.5;
    let projection = Mat4::orthographic_rh(-half, half, -half, half, 0.0, 4.0 * fit.depth_range);
    projection * Mat4::look_to_rh(fit.position, forward, fit.up)
}

fn point_face_view_proj(position: Vec3, rotation: Quat, radius: f32) -> Mat4 {
    let projection = Mat4::perspective_rh(FRAC_PI_2, 1.0, SHADOW_NEAR, radius.max(SHADOW_NEAR * 2.0));
    projection * Mat4::look_to_rh(position, rotation * Vec3::NEG_Z, rotation * Vec3::Y)
}

fn spot_view_proj(transform: &Transform, radius: f32, outer_angle: f32) -> Mat4 {
    let fov = (outer_angle * 2.0).clamp(0.1, PI - 0.1);
    let forward = safe_normalize(transform.forward(), Vec3::NEG_Z);
    let mut up = safe_normalize(transform.up(), Vec3::Y);
    let mut right = forward.cross(up);
    if right.length_squared() < 1e-8 {
        let fallback = if forward.dot(Vec3::X).abs() < 0.9 {
            Vec3::X
        } else {
            Vec3::Y
        };
        right = forward.cross(fallback);
    }
    right = right.normalize();
    up = right.cross(forward).normalize();

    let projection = Mat4::perspective_rh(fov, 1.0, SHADOW_NEAR, radius.max(SHADOW_NEAR * 2.0));
    projection * Mat4::look_to_rh(transform.translation, forward, up)
}

fn shadow_key(policy: ShadowKeyPolicy, source: Entity, sub_index: usize, id: usize) -> ShadowKey {
    match policy {
        ShadowKeyPolicy::Stable => ShadowKey::Stable {
            source,
            sub_index: sub_index as u8,
        },
        ShadowKeyPolicy::Positional => ShadowKey::Positional(id),
    }
}

/// Flattens `lights` in input order; `id` is the index in the result.
pub fn expand(lights: &[SceneLight], view: &CameraView, policy: ShadowKeyPolicy) -> Vec<VirtualLight> {
    let mut out = Vec::with_capacity(virtual_light_count(lights.iter().map(|l| &l.light)));

    for scene_light in lights {
        let light = scene_light.light;
        let transform = scene_light.transform;
        let source = scene_light.entity;

        match light.kind {
            LightKind::Directional => {
                let forward = safe_normalize(transform.forward(), Vec3::NEG_Y);
                for (sub_index, (split_near, split_far)) in
                    cascade_splits(view.near, view.far).into_iter().enumerate()
                {
                    let fit = compute_ortho_size(split_near, split_far, view, &transform);
                    let id = out.len();
                    out.push(VirtualLight {
                        id,
                        source,
                        light,
                        transform: Transform::from_trs(fit.position, transform.rotation, Vec3::ONE),
                        params: LightParams::Directional {
                            direction: forward,
                            cascade_near: split_near,
                            cascade_far: split_far,
                        },
                        light_view_proj: Some(cascade_view_proj(&fit, forward)),
                        shadow_key: Some(shadow_key(policy, source, sub_index, id)),
                    });
                }
            }
            LightKind::Point { radius } => {
                let position = transform.translation;
                for (sub_index, rotation) in point_face_rotations().into_iter().enumerate() {
                    let id = out.len();
                    out.push(VirtualLight {
                        id,
                        source,
                        light,
                        transform: Transform::from_trs(position, rotation, Vec3::ONE),
                        params: LightParams::Point {
                            position,
                            radius,
                            face_forward: rotation * Vec3::NEG_Z,
                        },
                        light_view_proj: Some(point_face_view_proj(position, rotation, radius)),
                        shadow_key: Some(shadow_key(policy, source, sub_index, id)),
                    });
                }
            }
            LightKind::Spot {
                radius,
                inner_angle,
                outer_angle,
            } => {
                let id = out.len();
                let outer = outer_angle.max(1e-3);
                out.push(VirtualLight {
                    id,
                    source,
                    light,
                    transform,
                    params: LightParams::Spot {
                        position: transform.translation,
                        direction: safe_normalize(transform.forward(), Vec3::NEG_Z),
                        radius,
                        cos_inner: inner_angle.min(outer).cos(),
                        cos_outer: outer.cos(),
                    },
                    light_view_proj: Some(spot_view_proj(&transform, radius, outer)),
                    shadow_key: Some(shadow_key(policy, source, 0, id)),
                });
            }
            LightKind::Ambient => {
                out.push(VirtualLight {
                    id: out.len(),
                    source,
                    light,
                    transform,
                    params: LightParams::Ambient,
                    light_view_proj: None,
                    shadow_key: None,
                });
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> CameraView {
        CameraView {
            transform: Transform::looking_at(Vec3::new(0.0, 2.0, 8.0), Vec3::ZERO, Vec3::Y),
            projection: Projection::Perspective { fov_y: 1.0 },
            aspect: 1.5,
            near: 0.1,
            far: 50.0,
        }
    }

    fn sun() -> Transform {
        let rotation = Quat::from_rotation_arc(Vec3::NEG_Z, Vec3::new(0.3, -1.0, -0.4).normalize());
        Transform::from_trs(Vec3::ZERO, rotation, Vec3::ONE)
    }

    #[test]
    fn point_faces_cover_all_axes() {
        let forwards: Vec<Vec3> = point_face_rotations()
            .iter()
            .map(|r| *r * Vec3::NEG_Z)
            .collect();
        for axis in [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z] {
            assert!(
                forwards.iter().any(|f| f.abs_diff_eq(axis, 1e-6)),
                "missing face for {axis:?}"
            );
        }
    }

    #[test]
    fn cascades_partition_the_range() {
        let splits = cascade_splits(1.0, 101.0);
        assert_eq!(splits[0], (1.0, 11.0));
        assert_eq!(splits[1], (11.0, 51.0));
        assert_eq!(splits[2], (51.0, 101.0));
    }

    #[test]
    fn ortho_fit_contains_slice() {
        let view = view();
        let light = sun();
        let fit = compute_ortho_size(0.1, 5.0, &view, &light);
        let matrix = cascade_view_proj(&fit, light.forward());
        for corner in slice_corners(&view, 0.1, 5.0) {
            let ndc = matrix.project_point3(corner);
            assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0, "corner outside: {ndc:?}");
            assert!((0.0..=1.0).contains(&ndc.z), "corner clipped in depth: {ndc:?}");
        }
    }

    #[test]
    fn vertical_light_uses_fallback_axis() {
        let light = Transform::from_trs(
            Vec3::ZERO,
            Quat::from_rotation_arc(Vec3::NEG_Z, Vec3::NEG_Y),
            Vec3::ONE,
        );
        let fit = compute_ortho_size(0.1, 5.0, &view(), &light);
        assert!(fit.size.is_finite() && fit.size > 0.0);
        assert!(fit.up.is_finite());
        assert!(fit.up.dot(Vec3::NEG_Y).abs() < 1e-5);
    }

    #[test]
    fn spot_and_ambient_map_to_one_light() {
        let lights = [
            Light::spot(Vec3::ONE, 1.0, 10.0, 0.3, 0.5),
            Light::ambient(Vec3::ONE, 0.1),
        ];
        assert_eq!(virtual_light_count(lights.iter()), 2);
    }

    #[test]
    fn ambient_has_no_shadow() {
        let lights = [SceneLight {
            entity: Entity::DANGLING,
            light: Light::ambient(Vec3::ONE, 0.2),
            transform: Transform::IDENTITY,
        }];
        let expanded = expand(&lights, &view(), ShadowKeyPolicy::Stable);
        assert_eq!(expanded.len(), 1);
        assert!(expanded[0].light_view_proj.is_none());
        assert!(expanded[0].shadow_key.is_none());
    }

    #[test]
    fn positional_keys_follow_flattened_index() {
        let lights = [
            SceneLight {
                entity: Entity::DANGLING,
                light: Light::spot(Vec3::ONE, 1.0, 10.0, 0.3, 0.5),
                transform: Transform::IDENTITY,
            },
            SceneLight {
                entity: Entity::DANGLING,
                light: Light::point(Vec3::ONE, 1.0, 5.0),
                transform: Transform::IDENTITY,
            },
        ];
        let expanded = expand(&lights, &view(), ShadowKeyPolicy::Positional);
        for (i, light) in expanded.iter().enumerate() {
            assert_eq!(light.id, i);
            assert_eq!(light.shadow_key, Some(ShadowKey::Positional(i)));
        }
    }
}
