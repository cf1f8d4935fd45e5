use glam::{Mat4, Vec3};
use hecs::World;

use wgpu_deferred::renderer::virtualizer::{
    cascade_splits, compute_ortho_size, expand, owning_point_face, point_face_rotations,
    slice_corners, virtual_light_count, CameraView, LightParams,
};
use wgpu_deferred::renderer::ShadowKey;
use wgpu_deferred::scene::{Camera, Light, SceneLight, Transform};
use wgpu_deferred::settings::ShadowKeyPolicy;

const EPSILON: f32 = 1e-4;

fn camera_view() -> CameraView {
    let camera = Camera::perspective(60f32.to_radians(), 0.5, 80.0);
    let transform = Transform::looking_at(Vec3::new(0.0, 4.0, 12.0), Vec3::ZERO, Vec3::Y);
    CameraView::new(&camera, transform, 16.0 / 9.0)
}

fn scene_lights(world: &mut World) -> Vec<SceneLight> {
    let mut lights = Vec::new();
    for (light, transform) in [
        (
            Light::directional(Vec3::ONE, 1.0),
            Transform::looking_at(Vec3::new(5.0, 10.0, 3.0), Vec3::ZERO, Vec3::Y),
        ),
        (
            Light::point(Vec3::ONE, 1.0, 6.0),
            Transform::from_translation(Vec3::new(1.0, 2.0, -1.0)),
        ),
        (
            Light::spot(Vec3::ONE, 1.0, 9.0, 0.2, 0.4),
            Transform::looking_at(Vec3::new(-2.0, 5.0, 0.0), Vec3::ZERO, Vec3::Y),
        ),
        (Light::ambient(Vec3::ONE, 0.1), Transform::IDENTITY),
    ] {
        let entity = world.spawn(());
        lights.push(SceneLight {
            entity,
            light,
            transform,
        });
    }
    lights
}

fn project(matrix: Mat4, point: Vec3) -> Vec3 {
    let clip = matrix * point.extend(1.0);
    clip.truncate() / clip.w
}

#[test]
fn count_follows_the_per_kind_law() {
    let mut world = World::new();
    let lights = scene_lights(&mut world);
    let count = virtual_light_count(lights.iter().map(|l| &l.light));
    assert_eq!(count, 3 + 6 + 1 + 1);
    assert_eq!(expand(&lights, &camera_view(), ShadowKeyPolicy::Stable).len(), count);
}

#[test]
fn ids_are_dense_and_sources_grouped_in_input_order() {
    let mut world = World::new();
    let lights = scene_lights(&mut world);
    let virtual_lights = expand(&lights, &camera_view(), ShadowKeyPolicy::Stable);

    for (i, light) in virtual_lights.iter().enumerate() {
        assert_eq!(light.id, i);
    }
    let sources: Vec<_> = virtual_lights.iter().map(|l| l.source).collect();
    let mut expected = Vec::new();
    for (light, n) in lights.iter().zip([3, 6, 1, 1]) {
        expected.extend(std::iter::repeat(light.entity).take(n));
    }
    assert_eq!(sources, expected);
}

#[test]
fn cascades_cover_the_view_range_contiguously() {
    let view = camera_view();
    let splits = cascade_splits(view.near, view.far);
    assert!((splits[0].0 - view.near).abs() < EPSILON);
    assert!((splits[2].1 - view.far).abs() < EPSILON);
    assert!((splits[0].1 - splits[1].0).abs() < EPSILON);
    assert!((splits[1].1 - splits[2].0).abs() < EPSILON);
    let span = view.far - view.near;
    assert!((splits[0].1 - (view.near + 0.1 * span)).abs() < EPSILON);
    assert!((splits[1].1 - (view.near + 0.5 * span)).abs() < EPSILON);
}

#[test]
fn each_cascade_volume_contains_its_frustum_slice() {
    let mut world = World::new();
    let lights = scene_lights(&mut world);
    let view = camera_view();
    let virtual_lights = expand(&lights, &view, ShadowKeyPolicy::Stable);

    for light in virtual_lights.iter().take(3) {
        let LightParams::Directional {
            cascade_near,
            cascade_far,
            ..
        } = light.params
        else {
            panic!("expected a directional cascade, got {:?}", light.params);
        };
        let matrix = light.light_view_proj.unwrap();
        for corner in slice_corners(&view, cascade_near, cascade_far) {
            let ndc = project(matrix, corner);
            assert!(ndc.x.abs() <= 1.0 + EPSILON, "x {} outside cascade", ndc.x);
            assert!(ndc.y.abs() <= 1.0 + EPSILON, "y {} outside cascade", ndc.y);
            assert!((-EPSILON..=1.0 + EPSILON).contains(&ndc.z), "z {} outside cascade", ndc.z);
        }
    }
}

#[test]
fn straight_down_sun_still_gets_a_valid_basis() {
    let view = camera_view();
    let sun = Transform::looking_at(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO, Vec3::Z);
    let fit = compute_ortho_size(view.near, view.far, &view, &sun);
    assert!(fit.up.is_finite());
    assert!((fit.up.length() - 1.0).abs() < EPSILON);
    assert!(fit.size > 0.0);
    assert!(fit.depth_range >= 0.5);
}

#[test]
fn point_faces_cover_all_six_axes() {
    let mut forwards: Vec<Vec3> = point_face_rotations()
        .iter()
        .map(|rotation| *rotation * Vec3::NEG_Z)
        .collect();
    for axis in [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z] {
        let position = forwards
            .iter()
            .position(|f| f.abs_diff_eq(axis, EPSILON))
            .unwrap_or_else(|| panic!("no face looks along {:?}", axis));
        forwards.remove(position);
    }
    assert!(forwards.is_empty());
}

#[test]
fn ambient_gets_no_shadow_and_keys_follow_policy() {
    let mut world = World::new();
    let lights = scene_lights(&mut world);
    let view = camera_view();

    let stable = expand(&lights, &view, ShadowKeyPolicy::Stable);
    let ambient = stable.last().unwrap();
    assert!(ambient.light_view_proj.is_none());
    assert!(ambient.shadow_key.is_none());
    assert_eq!(
        stable[4].shadow_key,
        Some(ShadowKey::Stable {
            source: lights[1].entity,
            sub_index: 1,
        })
    );

    let positional = expand(&lights, &view, ShadowKeyPolicy::Positional);
    assert_eq!(positional[4].shadow_key, Some(ShadowKey::Positional(4)));
}

#[test]
fn expansion_is_bit_identical_across_runs() {
    let mut world = World::new();
    let lights = scene_lights(&mut world);
    let view = camera_view();
    let first = expand(&lights, &view, ShadowKeyPolicy::Stable);
    let second = expand(&lights, &view, ShadowKeyPolicy::Stable);

    for (a, b) in first.iter().zip(&second) {
        let bits = |m: Option<Mat4>| m.map(|m| m.to_cols_array().map(f32::to_bits));
        assert_eq!(bits(a.light_view_proj), bits(b.light_view_proj));
        assert_eq!(a.shadow_key, b.shadow_key);
    }
}

#[test]
fn every_direction_is_shaded_by_exactly_one_point_face() {
    let forwards: Vec<Vec3> = point_face_rotations()
        .iter()
        .map(|rotation| *rotation * Vec3::NEG_Z)
        .collect();
    let face_along = |axis: Vec3| forwards.iter().position(|f| f.abs_diff_eq(axis, EPSILON));

    assert_eq!(owning_point_face(Vec3::new(0.2, -3.0, 1.0)), face_along(Vec3::NEG_Y));
    assert_eq!(owning_point_face(Vec3::new(0.0, 0.5, -2.0)), face_along(Vec3::NEG_Z));
    assert_eq!(owning_point_face(Vec3::ZERO), None);

    // Diagonals: x beats y and z, y beats z.
    assert_eq!(owning_point_face(Vec3::new(1.0, 1.0, 0.0)), face_along(Vec3::X));
    assert_eq!(owning_point_face(Vec3::new(-1.0, 0.0, -1.0)), face_along(Vec3::NEG_X));
    assert_eq!(owning_point_face(Vec3::new(0.0, -1.0, 1.0)), face_along(Vec3::NEG_Y));
    assert_eq!(owning_point_face(Vec3::new(1.0, 1.0, 1.0)), face_along(Vec3::X));

    for x in [-1.0f32, 0.0, 1.0] {
        for y in [-1.0f32, 0.0, 1.0] {
            for z in [-1.0f32, 0.0, 1.0] {
                let to_pixel = Vec3::new(x, y, z);
                if to_pixel == Vec3::ZERO {
                    continue;
                }
                let face = owning_point_face(to_pixel)
                    .unwrap_or_else(|| panic!("no face shades {:?}", to_pixel));
                assert!(forwards[face].dot(to_pixel) >= to_pixel.abs().max_element() - EPSILON);
            }
        }
    }
}
