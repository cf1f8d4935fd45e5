// scene/components.rs
// Pure hecs components consumed by the frame core

use crate::asset::{Handle, Model, Texture};
use crate::scene::Transform;
use glam::Vec3;

// ============================================================================
// Core Components
// ============================================================================

/// World-space transform
#[derive(Debug, Clone, Copy)]
pub struct WorldTransform(pub Transform);

/// Mesh renderer; entities without a model are skipped
#[derive(Debug, Clone, Copy)]
pub struct MeshRenderer(pub Option<Handle<Model>>);

/// Active filter; entities without the component count as active
#[derive(Debug, Clone, Copy)]
pub struct Active(pub bool);

impl Default for Active {
    fn default() -> Self {
        Self(true)
    }
}

/// Equirectangular sky texture drawn behind the lit scene
#[derive(Debug, Clone, Copy)]
pub struct Skybox {
    pub texture: Handle<Texture>,
    pub intensity: f32,
}

// ============================================================================
// Lighting Components
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Directional,
    Point {
        radius: f32,
    },
    /// Cone angles are half-angles in radians.
    Spot {
        radius: f32,
        inner_angle: f32,
        outer_angle: f32,
    },
    Ambient,
}

#[derive(Debug, Clone, Copy)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
}

impl Light {
    pub fn directional(color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            color,
            intensity,
        }
    }

    pub fn point(color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            kind: LightKind::Point { radius },
            color,
            intensity,
        }
    }

    pub fn spot(color: Vec3, intensity: f32, radius: f32, inner_angle: f32, outer_angle: f32) -> Self {
        Self {
            kind: LightKind::Spot {
                radius,
                inner_angle,
                outer_angle,
            },
            color,
            intensity,
        }
    }

    pub fn ambient(color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Ambient,
            color,
            intensity,
        }
    }

    pub fn casts_shadow(&self) -> bool {
        !matches!(self.kind, LightKind::Ambient)
    }
}

// ============================================================================
// Utility Components
// ============================================================================

/// Name component for debugging
#[derive(Debug, Clone)]
pub struct Name(pub String);

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}
