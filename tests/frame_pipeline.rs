use glam::{Vec3, Vec4};
use hecs::{Entity, World};

use wgpu_deferred::asset::{Assets, Handle, Material, TextureRef, TextureSlot};
use wgpu_deferred::renderer::backend::{
    GpuBackend, RecordedCommand, RecordingBackend, TextureHandle,
};
use wgpu_deferred::renderer::primitives::{cube_mesh, plane_mesh};
use wgpu_deferred::renderer::{AccumBuffer, CameraOrchestrator, FrameStats, ShadowKey};
use wgpu_deferred::scene::{
    Camera, Light, MeshRenderer, TargetPolicy, Transform, ViewportRect, VirtualCamera,
    WorldTransform,
};
use wgpu_deferred::settings::{RenderSettings, ShadowKeyPolicy};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 32;

fn settings() -> RenderSettings {
    RenderSettings {
        shadow_map_size: 128,
        ..RenderSettings::default()
    }
}

fn setup() -> (RecordingBackend, CameraOrchestrator, World, Assets) {
    let mut gpu = RecordingBackend::new(WIDTH, HEIGHT);
    let orchestrator = CameraOrchestrator::new(&mut gpu, settings(), WIDTH, HEIGHT).unwrap();
    gpu.take_commands();
    (gpu, orchestrator, World::new(), Assets::new())
}

fn spawn_camera(world: &mut World, camera: Camera) -> Entity {
    world.spawn((
        camera,
        WorldTransform(Transform::looking_at(
            Vec3::new(0.0, 3.0, 8.0),
            Vec3::ZERO,
            Vec3::Y,
        )),
    ))
}

fn spawn_model(
    gpu: &mut RecordingBackend,
    world: &mut World,
    assets: &mut Assets,
    material: Material,
) -> Entity {
    let model = assets.add_model(gpu, "Cube", &cube_mesh(), material).unwrap();
    world.spawn((
        MeshRenderer(Some(model)),
        WorldTransform(Transform::from_translation(Vec3::Y)),
    ))
}

/// One point (6), one directional (3) and one spot (1): ten virtual lights.
fn spawn_three_lights(world: &mut World) -> [Entity; 3] {
    let point = world.spawn((
        Light::point(Vec3::ONE, 2.0, 10.0),
        WorldTransform(Transform::from_translation(Vec3::new(2.0, 3.0, 0.0))),
    ));
    let sun = world.spawn((
        Light::directional(Vec3::ONE, 1.0),
        WorldTransform(Transform::looking_at(
            Vec3::new(3.0, 6.0, 2.0),
            Vec3::ZERO,
            Vec3::Y,
        )),
    ));
    let spot = world.spawn((
        Light::spot(Vec3::ONE, 4.0, 12.0, 0.3, 0.5),
        WorldTransform(Transform::looking_at(
            Vec3::new(-3.0, 5.0, 0.0),
            Vec3::ZERO,
            Vec3::Y,
        )),
    ));
    [point, sun, spot]
}

fn render(
    gpu: &mut RecordingBackend,
    orchestrator: &mut CameraOrchestrator,
    world: &World,
    assets: &Assets,
) -> FrameStats {
    orchestrator.render_frame(gpu, world, assets, 1.0 / 60.0)
}

/// Textures bound at `binding` while a pipeline with `pipeline_label` is set.
fn bound_textures(gpu: &RecordingBackend, pipeline_label: &str, binding: u32) -> Vec<TextureHandle> {
    let mut current = None;
    let mut textures = Vec::new();
    for command in gpu.commands() {
        match command {
            RecordedCommand::SetPipeline(handle) => current = gpu.pipeline_label(*handle),
            RecordedCommand::BindTexture { binding: b, texture } if *b == binding => {
                if current == Some(pipeline_label) {
                    textures.push(*texture);
                }
            }
            _ => {}
        }
    }
    textures
}

fn scope_labels(gpu: &RecordingBackend) -> Vec<String> {
    gpu.commands()
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::BeginCommands(label) => Some(label.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn ten_virtual_lights_end_in_buffer_a() {
    let (mut gpu, mut orchestrator, mut world, mut assets) = setup();
    spawn_camera(&mut world, Camera::default());
    spawn_model(&mut gpu, &mut world, &mut assets, Material::default());
    spawn_three_lights(&mut world);

    let stats = render(&mut gpu, &mut orchestrator, &world, &assets);
    assert_eq!(stats.virtual_lights, 10);
    assert_eq!(stats.shadow_passes, 10);
    assert_eq!(stats.cameras_rendered, 1);

    let accumulator = orchestrator.main_pipeline().accumulator();
    let composite_luminance = bound_textures(&gpu, "CompositePipeline", 1);
    assert_eq!(composite_luminance, vec![accumulator.texture(AccumBuffer::A).unwrap()]);
    assert_eq!(
        gpu.draw_pipeline_labels()
            .iter()
            .filter(|label| label.as_str() == "LightingPipeline")
            .count(),
        10
    );
}

#[test]
fn every_camera_gets_exactly_one_scope() {
    let (mut gpu, mut orchestrator, mut world, mut assets) = setup();
    spawn_camera(&mut world, Camera::default());
    spawn_model(&mut gpu, &mut world, &mut assets, Material::default());
    spawn_three_lights(&mut world);

    render(&mut gpu, &mut orchestrator, &world, &assets);
    let begins = scope_labels(&gpu).len();
    let ends = gpu
        .commands()
        .iter()
        .filter(|c| matches!(c, RecordedCommand::EndCommands))
        .count();
    let executes = gpu
        .commands()
        .iter()
        .filter(|c| matches!(c, RecordedCommand::Execute))
        .count();
    assert_eq!((begins, ends, executes), (1, 1, 1));
    assert_eq!(gpu.commands().last(), Some(&RecordedCommand::Execute));
}

#[test]
fn shadow_maps_survive_resize_at_their_own_resolution() {
    let (mut gpu, mut orchestrator, mut world, mut assets) = setup();
    spawn_camera(&mut world, Camera::default());
    spawn_model(&mut gpu, &mut world, &mut assets, Material::default());
    let [point, ..] = spawn_three_lights(&mut world);

    render(&mut gpu, &mut orchestrator, &world, &assets);
    let key = ShadowKey::Stable {
        source: point,
        sub_index: 0,
    };
    let before = orchestrator.main_pipeline().shadow_cache().get(&key).unwrap().depth_texture;

    gpu.resize_back_buffer(128, 96);
    orchestrator.on_resize(&mut gpu, 128, 96);
    render(&mut gpu, &mut orchestrator, &world, &assets);

    let cache = orchestrator.main_pipeline().shadow_cache();
    assert_eq!(cache.len(), 10);
    let after = cache.get(&key).unwrap().depth_texture;
    assert_eq!(before, after);
    assert_eq!(gpu.texture_size(after), Some((128, 128)));

    let gbuffer = orchestrator.main_pipeline().gbuffer_pass().gbuffer().unwrap();
    assert_eq!(gbuffer.size(), (128, 96));
}

#[test]
fn zero_area_viewport_records_nothing() {
    let (mut gpu, mut orchestrator, mut world, mut assets) = setup();
    spawn_camera(
        &mut world,
        Camera::default().with_viewport(ViewportRect {
            width: 0.0,
            ..ViewportRect::FULL
        }),
    );
    spawn_model(&mut gpu, &mut world, &mut assets, Material::default());
    spawn_three_lights(&mut world);

    let stats = render(&mut gpu, &mut orchestrator, &world, &assets);
    assert_eq!(stats.cameras_rendered, 0);
    assert_eq!(stats.cameras_skipped, 1);
    assert!(!gpu
        .commands()
        .iter()
        .any(|c| matches!(c, RecordedCommand::BeginRenderPass(_))));
    assert!(!orchestrator.main_pipeline().gbuffer_pass().is_frame_active());
}

#[test]
fn failed_shadow_allocation_leaves_lights_unshadowed() {
    let (mut gpu, mut orchestrator, mut world, mut assets) = setup();
    gpu.fail_textures_with_prefix("ShadowMap");
    spawn_camera(&mut world, Camera::default());
    spawn_model(&mut gpu, &mut world, &mut assets, Material::default());
    spawn_three_lights(&mut world);

    let stats = render(&mut gpu, &mut orchestrator, &world, &assets);
    assert_eq!(stats.cameras_rendered, 1);
    assert_eq!(stats.shadow_passes, 0);
    assert!(orchestrator.main_pipeline().shadow_cache().is_empty());

    let null_shadow = orchestrator.library().defaults.null_shadow;
    let shadows = bound_textures(&gpu, "LightingPipeline", 5);
    assert_eq!(shadows.len(), 10);
    assert!(shadows.iter().all(|t| *t == null_shadow));
    assert!(gpu.commands().contains(&RecordedCommand::CopyTexture {
        source: orchestrator.final_lit_texture().unwrap(),
        destination: gpu.back_buffer().unwrap(),
    }));
}

#[test]
fn virtual_cameras_render_before_real_ones() {
    let (mut gpu, mut orchestrator, mut world, mut assets) = setup();
    spawn_camera(&mut world, Camera::default().with_priority(-10));
    world.spawn((
        VirtualCamera::new(
            Camera::default().with_priority(10),
            TargetPolicy::Fixed {
                width: 16,
                height: 16,
            },
        ),
        WorldTransform(Transform::from_translation(Vec3::new(0.0, 2.0, 5.0))),
    ));
    spawn_model(&mut gpu, &mut world, &mut assets, Material::default());

    let stats = render(&mut gpu, &mut orchestrator, &world, &assets);
    assert_eq!(stats.cameras_rendered, 2);
    let scopes = scope_labels(&gpu);
    assert_eq!(scopes.len(), 2);
    assert!(scopes[0].starts_with("VirtualCamera"));
    assert!(scopes[1].starts_with("Main"));
}

#[test]
fn materials_sample_virtual_camera_output() {
    let (mut gpu, mut orchestrator, mut world, mut assets) = setup();
    spawn_camera(&mut world, Camera::default());
    let monitor_camera = world.spawn((
        VirtualCamera::new(
            Camera::default(),
            TargetPolicy::MatchScreen { scale: 0.5 },
        ),
        WorldTransform(Transform::from_translation(Vec3::new(0.0, 2.0, 5.0))),
    ));
    let floor = assets
        .add_model(
            &mut gpu,
            "Floor",
            &plane_mesh(4.0, 1.0),
            Material::default().with_texture(
                TextureSlot::Albedo,
                TextureRef::CameraOutput(monitor_camera),
            ),
        )
        .unwrap();
    world.spawn((MeshRenderer(Some(floor)), WorldTransform(Transform::IDENTITY)));

    render(&mut gpu, &mut orchestrator, &world, &assets);
    let output = orchestrator.camera_output(monitor_camera).unwrap();
    assert_eq!(gpu.texture_size(output), Some((WIDTH / 2, HEIGHT / 2)));
    assert!(bound_textures(&gpu, "GBufferPipeline", 2).contains(&output));
}

#[test]
fn missing_material_textures_bind_defaults() {
    let (mut gpu, mut orchestrator, mut world, mut assets) = setup();
    spawn_camera(&mut world, Camera::default());
    spawn_model(
        &mut gpu,
        &mut world,
        &mut assets,
        Material::default().with_texture(TextureSlot::Normal, TextureRef::Asset(Handle::new(42))),
    );

    render(&mut gpu, &mut orchestrator, &world, &assets);
    let defaults = &orchestrator.library().defaults;
    for slot in TextureSlot::ALL {
        let bound = bound_textures(&gpu, "GBufferPipeline", 2 + slot.index() as u32);
        assert_eq!(bound, vec![defaults.get(slot)], "slot {:?}", slot);
    }
}

#[test]
fn hidden_meshes_still_cast_shadows() {
    let (mut gpu, mut orchestrator, mut world, mut assets) = setup();
    let hidden = spawn_model(&mut gpu, &mut world, &mut assets, Material::default());
    spawn_model(
        &mut gpu,
        &mut world,
        &mut assets,
        Material::colored(Vec4::new(1.0, 0.0, 0.0, 1.0)),
    );
    world.spawn((
        VirtualCamera::new(
            Camera::default(),
            TargetPolicy::Fixed {
                width: 32,
                height: 32,
            },
        )
        .hide(hidden),
        WorldTransform(Transform::from_translation(Vec3::new(0.0, 2.0, 6.0))),
    ));
    world.spawn((
        Light::spot(Vec3::ONE, 4.0, 12.0, 0.3, 0.5),
        WorldTransform(Transform::looking_at(
            Vec3::new(0.0, 6.0, 0.0),
            Vec3::ZERO,
            Vec3::Z,
        )),
    ));

    let stats = render(&mut gpu, &mut orchestrator, &world, &assets);
    assert_eq!(stats.geometry_draws, 1);
    assert_eq!(stats.shadow_passes, 1);
    let shadow_draws = gpu
        .draw_pipeline_labels()
        .iter()
        .filter(|label| label.as_str() == "ShadowDepthPipeline")
        .count();
    assert_eq!(shadow_draws, 2);
}

#[test]
fn identical_frames_record_identical_commands() {
    let record = || {
        let (mut gpu, mut orchestrator, mut world, mut assets) = setup();
        spawn_camera(&mut world, Camera::default());
        spawn_model(&mut gpu, &mut world, &mut assets, Material::default());
        spawn_three_lights(&mut world);
        render(&mut gpu, &mut orchestrator, &world, &assets);
        gpu.take_commands()
    };
    assert_eq!(record(), record());
}

fn shadow_texture(orchestrator: &CameraOrchestrator, key: ShadowKey) -> TextureHandle {
    orchestrator
        .main_pipeline()
        .shadow_cache()
        .get(&key)
        .unwrap_or_else(|| panic!("no shadow map cached for {:?}", key))
        .depth_texture
}

#[test]
fn stable_keys_keep_shadow_maps_when_a_light_is_removed() {
    let (mut gpu, mut orchestrator, mut world, mut assets) = setup();
    spawn_camera(&mut world, Camera::default());
    spawn_model(&mut gpu, &mut world, &mut assets, Material::default());
    let [point, sun, spot] = spawn_three_lights(&mut world);

    render(&mut gpu, &mut orchestrator, &world, &assets);
    let mut expected: Vec<TextureHandle> = (0..3)
        .map(|sub_index| shadow_texture(&orchestrator, ShadowKey::Stable { source: sun, sub_index }))
        .collect();
    expected.push(shadow_texture(
        &orchestrator,
        ShadowKey::Stable {
            source: spot,
            sub_index: 0,
        },
    ));

    world.despawn(point).unwrap();
    gpu.take_commands();
    let stats = render(&mut gpu, &mut orchestrator, &world, &assets);
    assert_eq!(stats.virtual_lights, 4);

    for (sub_index, texture) in expected.iter().take(3).enumerate() {
        let key = ShadowKey::Stable {
            source: sun,
            sub_index: sub_index as u8,
        };
        assert_eq!(shadow_texture(&orchestrator, key), *texture);
    }
    assert_eq!(bound_textures(&gpu, "LightingPipeline", 5), expected);
}

#[test]
fn positional_keys_hand_a_removed_light_map_to_its_successor() {
    let mut gpu = RecordingBackend::new(WIDTH, HEIGHT);
    let settings = RenderSettings {
        shadow_key_policy: ShadowKeyPolicy::Positional,
        ..settings()
    };
    let mut orchestrator = CameraOrchestrator::new(&mut gpu, settings, WIDTH, HEIGHT).unwrap();
    let (mut world, mut assets) = (World::new(), Assets::new());
    spawn_camera(&mut world, Camera::default());
    spawn_model(&mut gpu, &mut world, &mut assets, Material::default());
    let [point, _, _] = spawn_three_lights(&mut world);

    gpu.take_commands();
    render(&mut gpu, &mut orchestrator, &world, &assets);
    let first_frame = bound_textures(&gpu, "LightingPipeline", 5);
    assert_eq!(first_frame.len(), 10);
    let sun_cascade = first_frame[6];
    let point_face = first_frame[0];
    assert_eq!(shadow_texture(&orchestrator, ShadowKey::Positional(0)), point_face);

    world.despawn(point).unwrap();
    gpu.take_commands();
    render(&mut gpu, &mut orchestrator, &world, &assets);
    let second_frame = bound_textures(&gpu, "LightingPipeline", 5);
    assert_eq!(second_frame.len(), 4);

    // The sun's first cascade now sits at index 0 and inherits the point face map.
    assert_eq!(second_frame[0], point_face);
    assert_ne!(second_frame[0], sun_cascade);
}
