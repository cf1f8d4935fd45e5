// scene/mod.rs

pub mod camera;
pub mod components;
pub mod extract;
pub mod transform;

// Re-export commonly used types
pub use camera::{Camera, Projection, RelativeView, TargetPolicy, ViewportRect, VirtualCamera};
pub use extract::{extract_scene, CameraInstance, FrameScene, MeshInstance, SceneLight};
pub use transform::Transform;

pub use components::{Active, Light, LightKind, MeshRenderer, Name, Skybox, WorldTransform};
