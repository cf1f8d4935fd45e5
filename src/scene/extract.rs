// scene/extract.rs
// Per-frame snapshot of the hecs world, filtered by `Active`.

use std::collections::HashSet;

use glam::Mat4;
use hecs::{Entity, World};
use rayon::prelude::*;

use crate::asset::{Handle, Model};
use crate::scene::camera::{Camera, TargetPolicy, VirtualCamera};
use crate::scene::components::{Active, Light, MeshRenderer, Skybox, WorldTransform};
use crate::scene::Transform;

#[derive(Debug, Clone)]
pub struct CameraInstance {
    pub entity: Entity,
    pub camera: Camera,
    /// Transform used for rendering; differs from the authored one for relative views.
    pub render_transform: Transform,
    pub virtual_target: Option<TargetPolicy>,
    pub hidden_meshes: HashSet<Entity>,
}

impl CameraInstance {
    pub fn is_virtual(&self) -> bool {
        self.virtual_target.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SceneLight {
    pub entity: Entity,
    pub light: Light,
    pub transform: Transform,
}

#[derive(Debug, Clone, Copy)]
pub struct MeshInstance {
    pub entity: Entity,
    pub model: Handle<Model>,
    pub world: Mat4,
}

#[derive(Debug, Clone, Default)]
pub struct FrameScene {
    pub cameras: Vec<CameraInstance>,
    pub lights: Vec<SceneLight>,
    pub meshes: Vec<MeshInstance>,
    pub skybox: Option<Skybox>,
}

pub fn extract_scene(world: &World) -> FrameScene {
    FrameScene {
        cameras: collect_cameras(world),
        lights: collect_lights(world),
        meshes: collect_meshes(world),
        skybox: find_skybox(world),
    }
}

fn is_active(active: Option<&Active>) -> bool {
    active.map(|a| a.0).unwrap_or(true)
}

pub fn collect_cameras(world: &World) -> Vec<CameraInstance> {
    let mut cameras = Vec::new();

    for (entity, (camera, transform, active)) in world
        .query::<(&Camera, &WorldTransform, Option<&Active>)>()
        .iter()
    {
        if !is_active(active) {
            continue;
        }
        cameras.push(CameraInstance {
            entity,
            camera: camera.clone(),
            render_transform: transform.0,
            virtual_target: None,
            hidden_meshes: HashSet::new(),
        });
    }

    for (entity, (virtual_camera, transform, active)) in world
        .query::<(&VirtualCamera, &WorldTransform, Option<&Active>)>()
        .iter()
    {
        if !is_active(active) {
            continue;
        }
        cameras.push(CameraInstance {
            entity,
            camera: virtual_camera.camera.clone(),
            render_transform: resolve_render_transform(world, virtual_camera, transform.0),
            virtual_target: Some(virtual_camera.target),
            hidden_meshes: virtual_camera.hidden_meshes.clone(),
        });
    }

    cameras
}

/// Relative views recompose the transform from their reference entity.
/// The authored component is left untouched.
fn resolve_render_transform(world: &World, camera: &VirtualCamera, authored: Transform) -> Transform {
    let Some(relative) = camera.relative_view else {
        return authored;
    };
    match world.get::<&WorldTransform>(relative.reference) {
        Ok(reference) => relative.compose(&reference.0),
        Err(_) => {
            log::warn!(
                "Relative view reference {:?} has no WorldTransform; using authored transform",
                relative.reference
            );
            authored
        }
    }
}

/// Lights sorted by entity so expansion order stays stable across frames.
pub fn collect_lights(world: &World) -> Vec<SceneLight> {
    let mut lights: Vec<SceneLight> = world
        .query::<(&Light, &WorldTransform, Option<&Active>)>()
        .iter()
        .filter(|(_, (_, _, active))| is_active(*active))
        .map(|(entity, (light, transform, _))| SceneLight {
            entity,
            light: *light,
            transform: transform.0,
        })
        .collect();
    lights.sort_by_key(|l| l.entity.to_bits());
    lights
}

pub fn collect_meshes(world: &World) -> Vec<MeshInstance> {
    let raw: Vec<(Entity, Handle<Model>, Transform)> = world
        .query::<(&MeshRenderer, &WorldTransform, Option<&Active>)>()
        .iter()
        .filter(|(_, (_, _, active))| is_active(*active))
        .filter_map(|(entity, (renderer, transform, _))| {
            renderer.0.map(|model| (entity, model, transform.0))
        })
        .collect();

    let mut meshes: Vec<MeshInstance> = raw
        .into_par_iter()
        .map(|(entity, model, transform)| MeshInstance {
            entity,
            model,
            world: transform.matrix(),
        })
        .collect();
    meshes.sort_by_key(|m| m.entity.to_bits());
    meshes
}

pub fn find_skybox(world: &World) -> Option<Skybox> {
    world
        .query::<(&Skybox, Option<&Active>)>()
        .iter()
        .find(|(_, (_, active))| is_active(*active))
        .map(|(_, (skybox, _))| *skybox)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::camera::RelativeView;
    use glam::{Vec3, Vec4};

    #[test]
    fn inactive_entities_are_filtered() {
        let mut world = World::new();
        world.spawn((
            Light::point(Vec3::ONE, 1.0, 5.0),
            WorldTransform(Transform::IDENTITY),
        ));
        world.spawn((
            Light::point(Vec3::ONE, 1.0, 5.0),
            WorldTransform(Transform::IDENTITY),
            Active(false),
        ));
        world.spawn((
            MeshRenderer(Some(Handle::new(0))),
            WorldTransform(Transform::IDENTITY),
            Active(false),
        ));

        let scene = extract_scene(&world);
        assert_eq!(scene.lights.len(), 1);
        assert!(scene.meshes.is_empty());
    }

    #[test]
    fn meshes_without_model_are_skipped() {
        let mut world = World::new();
        world.spawn((MeshRenderer(None), WorldTransform(Transform::IDENTITY)));
        world.spawn((
            MeshRenderer(Some(Handle::new(3))),
            WorldTransform(Transform::from_translation(Vec3::X)),
        ));

        let meshes = collect_meshes(&world);
        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].model.index(), 3);
        assert!(meshes[0].world.w_axis.truncate().abs_diff_eq(Vec3::X, 1e-6));
    }

    #[test]
    fn relative_view_does_not_mutate_authored_transform() {
        let mut world = World::new();
        let reference = world.spawn((WorldTransform(Transform::from_translation(Vec3::new(
            0.0, 0.0, 10.0,
        ))),));
        let authored = Transform::from_translation(Vec3::new(5.0, 0.0, 0.0));
        let portal = world.spawn((
            VirtualCamera::new(Camera::default(), TargetPolicy::Fixed { width: 64, height: 64 })
                .with_relative_view(RelativeView {
                    reference,
                    modifier: Mat4::from_translation(Vec3::Y),
                    exit: Transform::IDENTITY,
                }),
            WorldTransform(authored),
        ));

        let cameras = collect_cameras(&world);
        assert_eq!(cameras.len(), 1);
        assert!(cameras[0]
            .render_transform
            .translation
            .abs_diff_eq(Vec3::new(0.0, 1.0, 10.0), 1e-5));

        let stored = world.get::<&WorldTransform>(portal).unwrap();
        assert!(stored.0.translation.abs_diff_eq(authored.translation, 1e-6));
    }

    #[test]
    fn virtual_and_real_cameras_are_both_collected() {
        let mut world = World::new();
        world.spawn((Camera::default(), WorldTransform(Transform::IDENTITY)));
        world.spawn((
            VirtualCamera::new(
                Camera {
                    background_color: Vec4::ONE,
                    ..Camera::default()
                },
                TargetPolicy::MatchScreen { scale: 1.0 },
            ),
            WorldTransform(Transform::IDENTITY),
        ));

        let cameras = collect_cameras(&world);
        assert_eq!(cameras.iter().filter(|c| c.is_virtual()).count(), 1);
        assert_eq!(cameras.iter().filter(|c| !c.is_virtual()).count(), 1);
    }
}
