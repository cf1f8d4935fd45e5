pub mod backend;
pub mod compositor;
pub mod defaults;
pub mod gbuffer;
pub mod library;
pub mod lighting;
pub mod orchestrator;
pub mod pipeline_builder;
pub mod post;
pub mod primitives;
pub mod shadow_cache;
pub mod uniforms;
pub mod vertex;
pub mod virtualizer;

pub use compositor::FrameCompositor;
pub use gbuffer::{GBuffer, GBufferPass};
pub use library::PipelineLibrary;
pub use lighting::{AccumBuffer, LightAccumulator};
pub use orchestrator::{CameraOrchestrator, DeferredPipeline, FrameStats, RenderError};
pub use post::{PostEffect, PostEffectHandle, PostEffectRegistry, TonemapEffect};
pub use primitives::{cube_mesh, plane_mesh, sphere_mesh, MeshData};
pub use shadow_cache::{ShadowMapCache, ShadowMapEntry};
pub use vertex::Vertex;
pub use virtualizer::{ShadowKey, VirtualLight};
