use std::collections::HashSet;

use glam::{Mat4, Vec3, Vec4};
use hecs::Entity;

use crate::renderer::PostEffectHandle;
use crate::scene::Transform;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    /// Vertical field of view in radians.
    Perspective { fov_y: f32 },
    /// Full vertical extent in world units.
    Orthographic { size: f32 },
}

impl Projection {
    /// Half extents (x, y) of the view volume cross-section at `depth`.
    pub fn half_extents(&self, depth: f32, aspect: f32) -> (f32, f32) {
        let half_y = match *self {
            Projection::Perspective { fov_y } => (fov_y * 0.5).tan() * depth,
            Projection::Orthographic { size } => size * 0.5,
        };
        (half_y * aspect, half_y)
    }
}

/// Viewport in normalized target coordinates, origin top-left.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ViewportRect {
    pub const FULL: Self = Self {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    /// Scales to pixels, clamped to the target. Returns `(x, y, w, h)`.
    pub fn to_pixels(&self, target_width: u32, target_height: u32) -> (u32, u32, u32, u32) {
        let tw = target_width as f32;
        let th = target_height as f32;
        let x0 = (self.x.clamp(0.0, 1.0) * tw).round();
        let y0 = (self.y.clamp(0.0, 1.0) * th).round();
        let x1 = ((self.x + self.width).clamp(0.0, 1.0) * tw).round();
        let y1 = ((self.y + self.height).clamp(0.0, 1.0) * th).round();
        (
            x0 as u32,
            y0 as u32,
            (x1 - x0).max(0.0) as u32,
            (y1 - y0).max(0.0) as u32,
        )
    }
}

impl Default for ViewportRect {
    fn default() -> Self {
        Self::FULL
    }
}

/// Authored camera. The renderer only reads it.
#[derive(Clone, Debug)]
pub struct Camera {
    pub projection: Projection,
    pub near: f32,
    pub far: f32,
    pub viewport: ViewportRect,
    pub background_color: Vec4,
    pub clear_on_render: bool,
    pub priority: i32,
    pub post_effects: Vec<PostEffectHandle>,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            projection: Projection::Perspective {
                fov_y: 60f32.to_radians(),
            },
            near: 0.1,
            far: 100.0,
            viewport: ViewportRect::FULL,
            background_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            clear_on_render: true,
            priority: 0,
            post_effects: Vec::new(),
        }
    }
}

impl Camera {
    pub fn perspective(fov_y: f32, near: f32, far: f32) -> Self {
        Self {
            projection: Projection::Perspective { fov_y },
            near,
            far,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_viewport(mut self, viewport: ViewportRect) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_post_effect(mut self, effect: PostEffectHandle) -> Self {
        self.post_effects.push(effect);
        self
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        match self.projection {
            Projection::Perspective { fov_y } => {
                Mat4::perspective_rh(fov_y, aspect.max(1e-4), self.near, self.far)
            }
            Projection::Orthographic { size } => {
                let half_h = size * 0.5;
                let half_w = half_h * aspect;
                Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, self.near, self.far)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TargetPolicy {
    Fixed { width: u32, height: u32 },
    /// Follows the window size, scaled.
    MatchScreen { scale: f32 },
}

impl TargetPolicy {
    pub fn resolve(&self, screen_width: u32, screen_height: u32) -> (u32, u32) {
        match *self {
            TargetPolicy::Fixed { width, height } => (width, height),
            TargetPolicy::MatchScreen { scale } => (
                (screen_width as f32 * scale).round() as u32,
                (screen_height as f32 * scale).round() as u32,
            ),
        }
    }

    pub fn follows_screen(&self) -> bool {
        matches!(self, TargetPolicy::MatchScreen { .. })
    }
}

/// Portal-style remap: the camera renders from
/// `exit * modifier * reference` instead of its own transform.
#[derive(Clone, Copy, Debug)]
pub struct RelativeView {
    pub reference: Entity,
    pub modifier: Mat4,
    pub exit: Transform,
}

impl RelativeView {
    pub fn compose(&self, reference: &Transform) -> Transform {
        Transform::from_matrix(self.exit.matrix() * self.modifier * reference.matrix())
    }
}

/// Camera that renders into its own texture.
#[derive(Clone, Debug)]
pub struct VirtualCamera {
    pub camera: Camera,
    pub target: TargetPolicy,
    pub hidden_meshes: HashSet<Entity>,
    pub relative_view: Option<RelativeView>,
}

impl VirtualCamera {
    pub fn new(camera: Camera, target: TargetPolicy) -> Self {
        Self {
            camera,
            target,
            hidden_meshes: HashSet::new(),
            relative_view: None,
        }
    }

    pub fn hide(mut self, mesh: Entity) -> Self {
        self.hidden_meshes.insert(mesh);
        self
    }

    pub fn with_relative_view(mut self, view: RelativeView) -> Self {
        self.relative_view = Some(view);
        self
    }
}

/// Forward direction of a camera transform, never zero.
pub fn camera_forward(transform: &Transform) -> Vec3 {
    let forward = transform.forward();
    if forward.length_squared() > 1e-6 {
        forward.normalize()
    } else {
        Vec3::NEG_Z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_proj_is_reasonable() {
        let cam = Camera::default();
        let view = Transform::looking_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y).view_matrix();
        let vp = cam.projection_matrix(16.0 / 9.0) * view;
        let id = vp * vp.inverse();
        assert!(id.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn viewport_scales_and_clamps() {
        let rect = ViewportRect {
            x: 0.5,
            y: 0.25,
            width: 0.75,
            height: 0.5,
        };
        assert_eq!(rect.to_pixels(200, 100), (100, 25, 100, 50));
    }

    #[test]
    fn zero_sized_viewport_has_no_pixels() {
        let rect = ViewportRect {
            width: 0.0,
            ..ViewportRect::FULL
        };
        let (_, _, w, h) = rect.to_pixels(640, 480);
        assert_eq!(w, 0);
        assert_eq!(h, 480);
    }

    #[test]
    fn perspective_half_extents_grow_with_depth() {
        let proj = Projection::Perspective {
            fov_y: std::f32::consts::FRAC_PI_2,
        };
        let (hx, hy) = proj.half_extents(2.0, 2.0);
        assert!((hy - 2.0).abs() < 1e-5);
        assert!((hx - 4.0).abs() < 1e-5);
    }

    #[test]
    fn orthographic_half_extents_are_constant() {
        let proj = Projection::Orthographic { size: 10.0 };
        assert_eq!(proj.half_extents(1.0, 1.0), proj.half_extents(50.0, 1.0));
    }

    #[test]
    fn match_screen_policy_scales_window() {
        let policy = TargetPolicy::MatchScreen { scale: 0.5 };
        assert_eq!(policy.resolve(1280, 720), (640, 360));
        assert!(policy.follows_screen());
        assert!(!TargetPolicy::Fixed { width: 1, height: 1 }.follows_screen());
    }

    #[test]
    fn relative_view_with_identity_parts_returns_reference() {
        let reference = Transform::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let view = RelativeView {
            reference: Entity::DANGLING,
            modifier: Mat4::IDENTITY,
            exit: Transform::IDENTITY,
        };
        let composed = view.compose(&reference);
        assert!(composed.translation.abs_diff_eq(reference.translation, 1e-6));
    }
}
