// app.rs
use std::sync::Arc;

use glam::{Quat, Vec3, Vec4};
use hecs::{Entity, World};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::*,
    event_loop::ActiveEventLoop,
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::asset::{Assets, Material, TextureData, TextureRef, TextureSlot};
use crate::renderer::backend::{BackendError, BackendResult, GpuBackend, WgpuBackend};
use crate::renderer::primitives::{cube_mesh, plane_mesh, sphere_mesh};
use crate::renderer::{CameraOrchestrator, RenderError, TonemapEffect};
use crate::scene::{
    Camera, Light, MeshRenderer, Name, Skybox, TargetPolicy, Transform, VirtualCamera,
    WorldTransform,
};
use crate::settings::RenderSettings;
use crate::time::FrameClock;

/// Entities the demo animates every frame.
struct DemoScene {
    orbiting_light: Entity,
    spinning_cube: Entity,
    elapsed: f32,
}

impl DemoScene {
    /// One light of each kind, a few shaded objects, a skybox and a monitor
    /// quad that shows what a virtual camera sees.
    fn spawn(
        gpu: &mut dyn GpuBackend,
        world: &mut World,
        assets: &mut Assets,
        orchestrator: &mut CameraOrchestrator,
    ) -> BackendResult<Self> {
        let tonemap = orchestrator.register_effect(Box::new(TonemapEffect::new(1.2)));

        world.spawn((
            Name::new("MainCamera"),
            Camera {
                background_color: Vec4::new(0.05, 0.06, 0.09, 1.0),
                ..Camera::perspective(60f32.to_radians(), 0.1, 100.0)
            }
            .with_post_effect(tonemap),
            WorldTransform(Transform::looking_at(
                Vec3::new(0.0, 4.0, 10.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::Y,
            )),
        ));

        let security_camera = world.spawn((
            Name::new("SecurityCamera"),
            VirtualCamera::new(
                Camera {
                    background_color: Vec4::new(0.2, 0.1, 0.1, 1.0),
                    ..Camera::perspective(70f32.to_radians(), 0.1, 50.0)
                },
                TargetPolicy::Fixed {
                    width: 512,
                    height: 512,
                },
            ),
            WorldTransform(Transform::looking_at(
                Vec3::new(6.0, 5.0, 6.0),
                Vec3::ZERO,
                Vec3::Y,
            )),
        ));

        let checker = assets.add_texture(
            gpu,
            "FloorChecker",
            &TextureData::checker(256, 8, [200, 200, 200, 255], [90, 90, 90, 255]),
        )?;
        let floor = assets.add_model(
            gpu,
            "Floor",
            &plane_mesh(20.0, 4.0),
            Material::default().with_texture(TextureSlot::Albedo, TextureRef::Asset(checker)),
        )?;
        world.spawn((
            Name::new("Floor"),
            MeshRenderer(Some(floor)),
            WorldTransform(Transform::IDENTITY),
        ));

        let cube = assets.add_model(
            gpu,
            "Cube",
            &cube_mesh(),
            Material::colored(Vec4::new(0.8, 0.3, 0.2, 1.0)).with_metallic_roughness(0.1, 0.4),
        )?;
        let spinning_cube = world.spawn((
            Name::new("Cube"),
            MeshRenderer(Some(cube)),
            WorldTransform(Transform::from_translation(Vec3::new(-2.0, 1.0, 0.0))),
        ));

        let sphere = assets.add_model(
            gpu,
            "Sphere",
            &sphere_mesh(32, 16),
            Material::colored(Vec4::new(0.9, 0.9, 0.95, 1.0)).with_metallic_roughness(0.9, 0.2),
        )?;
        world.spawn((
            Name::new("Sphere"),
            MeshRenderer(Some(sphere)),
            WorldTransform(Transform::from_translation(Vec3::new(2.0, 1.0, 0.0))),
        ));

        let monitor = assets.add_model(
            gpu,
            "Monitor",
            &plane_mesh(3.0, 1.0),
            Material::default().with_texture(
                TextureSlot::Albedo,
                TextureRef::CameraOutput(security_camera),
            ),
        )?;
        world.spawn((
            Name::new("Monitor"),
            MeshRenderer(Some(monitor)),
            WorldTransform(Transform::from_trs(
                Vec3::new(0.0, 2.5, -4.0),
                Quat::from_rotation_x(std::f32::consts::FRAC_PI_2),
                Vec3::ONE,
            )),
        ));

        let sky = assets.add_texture(
            gpu,
            "SkyGradient",
            &TextureData::from_fn(256, 128, |_, y| {
                let t = y as f32 / 127.0;
                let lerp = |a: f32, b: f32| (a + (b - a) * t) as u8;
                [lerp(90.0, 230.0), lerp(140.0, 220.0), lerp(220.0, 200.0), 255]
            }),
        )?;
        world.spawn((Skybox {
            texture: sky,
            intensity: 1.0,
        },));

        world.spawn((
            Name::new("Sun"),
            Light::directional(Vec3::new(1.0, 0.95, 0.85), 2.0),
            WorldTransform(Transform::looking_at(
                Vec3::new(4.0, 8.0, 3.0),
                Vec3::ZERO,
                Vec3::Y,
            )),
        ));
        let orbiting_light = world.spawn((
            Name::new("OrbitingLamp"),
            Light::point(Vec3::new(0.3, 0.6, 1.0), 6.0, 8.0),
            WorldTransform(Transform::from_translation(Vec3::new(3.0, 2.0, 0.0))),
        ));
        world.spawn((
            Name::new("Spotlight"),
            Light::spot(
                Vec3::new(1.0, 0.8, 0.5),
                8.0,
                15.0,
                20f32.to_radians(),
                30f32.to_radians(),
            ),
            WorldTransform(Transform::looking_at(
                Vec3::new(-4.0, 6.0, 2.0),
                Vec3::new(-2.0, 0.0, 0.0),
                Vec3::Y,
            )),
        ));
        world.spawn((
            Name::new("Ambient"),
            Light::ambient(Vec3::ONE, 0.15),
            WorldTransform(Transform::IDENTITY),
        ));

        log::info!("Demo scene spawned with {} entities", world.len());

        Ok(Self {
            orbiting_light,
            spinning_cube,
            elapsed: 0.0,
        })
    }

    fn update(&mut self, world: &mut World, dt: f32) {
        self.elapsed += dt;
        let angle = self.elapsed * 0.6;

        if let Ok(mut transform) = world.get::<&mut WorldTransform>(self.orbiting_light) {
            transform.0.translation = Vec3::new(angle.cos() * 3.5, 2.0, angle.sin() * 3.5);
        }
        if let Ok(mut transform) = world.get::<&mut WorldTransform>(self.spinning_cube) {
            transform.0.rotation = Quat::from_rotation_y(self.elapsed);
        }
    }
}

struct GpuState {
    window: Arc<Window>,
    backend: WgpuBackend,
    orchestrator: CameraOrchestrator,
    demo: DemoScene,
}

pub struct App {
    settings: RenderSettings,
    state: Option<GpuState>,
    world: World,
    assets: Assets,
    clock: FrameClock,
}

impl App {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            settings,
            state: None,
            world: World::new(),
            assets: Assets::new(),
            clock: FrameClock::new(),
        }
    }

    fn init(&mut self, window: Arc<Window>) -> BackendResult<GpuState> {
        let mut backend = pollster::block_on(WgpuBackend::new(window.clone(), &self.settings))?;
        let (width, height) = backend.surface_size();
        let mut orchestrator =
            CameraOrchestrator::new(&mut backend, self.settings.clone(), width, height)?;
        let demo = DemoScene::spawn(
            &mut backend,
            &mut self.world,
            &mut self.assets,
            &mut orchestrator,
        )?;
        Ok(GpuState {
            window,
            backend,
            orchestrator,
            demo,
        })
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.backend.resize(size.width, size.height);
        state
            .orchestrator
            .on_resize(&mut state.backend, size.width, size.height);
    }

    fn redraw(&mut self) -> Result<(), RenderError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        let dt = self.clock.tick();
        state.demo.update(&mut self.world, dt);

        match state.backend.acquire_frame() {
            Ok(_) => {}
            Err(BackendError::SurfaceLost) => return Err(RenderError::SurfaceLost),
            Err(err) => return Err(err.into()),
        }
        let stats = state
            .orchestrator
            .render_frame(&mut state.backend, &self.world, &self.assets, dt);
        state.backend.present();

        if self.clock.frame() % 600 == 0 {
            log::info!("Frame {}: {:?}", self.clock.frame(), stats);
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let attributes = Window::default_attributes()
            .with_title("wgpu deferred renderer")
            .with_inner_size(PhysicalSize::new(
                self.settings.resolution.width,
                self.settings.resolution.height,
            ));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Window creation failed: {}", err);
                event_loop.exit();
                return;
            }
        };

        match self.init(window) {
            Ok(state) => {
                state.window.request_redraw();
                self.state = Some(state);
            }
            Err(err) => {
                log::error!("Renderer initialization failed: {}", err);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        let Some(window) = self.state.as_ref().map(|state| state.window.clone()) else {
            return;
        };
        if window.id() != id {
            return;
        }

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                self.resize(size);
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                self.resize(window.inner_size());
            }
            WindowEvent::RedrawRequested => {
                match self.redraw() {
                    Ok(()) => {}
                    Err(RenderError::SurfaceLost) => {
                        log::warn!("Surface lost, skipping frame");
                    }
                    Err(err) => {
                        log::error!("Frame failed: {}", err);
                        event_loop.exit();
                        return;
                    }
                }
                window.request_redraw();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                event_loop.exit();
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.orchestrator.destroy(&mut state.backend);
        }
    }
}
