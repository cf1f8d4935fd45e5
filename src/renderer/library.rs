// renderer/library.rs
// Pipelines and samplers shared by every deferred pipeline instance.

use std::mem::size_of;

use crate::renderer::backend::{
    AddressMode, BackendResult, BlendMode, CompareFunction, GpuBackend, PipelineHandle,
    SamplerDescriptor, SamplerHandle, ShaderStage, TextureFormat,
};
use crate::renderer::defaults::DefaultTextures;
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::uniforms::{
    CameraUniform, ColorUniform, LightUniform, MatrixUniform, ObjectUniform, SkyUniform,
};
use crate::renderer::Vertex;

pub const ALBEDO_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
pub const NORMAL_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const POSITION_FORMAT: TextureFormat = TextureFormat::Rgba32Float;
pub const MATERIAL_FORMAT: TextureFormat = TextureFormat::Rg8Unorm;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24PlusStencil8;
pub const SHADOW_FORMAT: TextureFormat = TextureFormat::Depth32Float;
pub const LUMINANCE_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const FINAL_LIT_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

const GBUFFER_SHADER: &str = include_str!("../shader/gbuffer.wgsl");
const GBUFFER_CLEAR_SHADER: &str = include_str!("../shader/gbuffer_clear.wgsl");
const SHADOW_SHADER: &str = include_str!("../shader/shadow_depth.wgsl");
const LIGHT_INIT_SHADER: &str = include_str!("../shader/light_init.wgsl");
const LIGHTING_SHADER: &str = include_str!("../shader/lighting.wgsl");
const COMPOSITE_SHADER: &str = include_str!("../shader/composite.wgsl");
const SKYBOX_SHADER: &str = include_str!("../shader/skybox.wgsl");

pub struct PipelineLibrary {
    pub gbuffer: PipelineHandle,
    pub gbuffer_clear: PipelineHandle,
    pub shadow_depth: PipelineHandle,
    pub light_init: PipelineHandle,
    pub lighting: PipelineHandle,
    pub composite: PipelineHandle,
    pub skybox: PipelineHandle,
    pub material_sampler: SamplerHandle,
    pub sky_sampler: SamplerHandle,
    pub shadow_sampler: SamplerHandle,
    pub defaults: DefaultTextures,
}

fn with_gbuffer_targets(builder: PipelineBuilder) -> PipelineBuilder {
    builder
        .with_color_target(ALBEDO_FORMAT, BlendMode::Replace)
        .with_color_target(NORMAL_FORMAT, BlendMode::Replace)
        .with_color_target(POSITION_FORMAT, BlendMode::Replace)
        .with_color_target(MATERIAL_FORMAT, BlendMode::Replace)
}

impl PipelineLibrary {
    pub fn new(gpu: &mut dyn GpuBackend) -> BackendResult<Self> {
        let gbuffer = with_gbuffer_targets(
            PipelineBuilder::new("GBufferPipeline", GBUFFER_SHADER)
                .with_vertex_layout(Vertex::layout())
                .with_uniform(0, ShaderStage::VertexFragment, size_of::<CameraUniform>() as u64)
                .with_uniform(1, ShaderStage::VertexFragment, size_of::<ObjectUniform>() as u64)
                .with_texture(2, true)
                .with_texture(3, true)
                .with_texture(4, true)
                .with_texture(5, true)
                .with_texture(6, true)
                .with_sampler(7, false),
        )
        .with_depth_stencil(DEPTH_FORMAT, true, CompareFunction::Less)
        .build(gpu)?;

        let gbuffer_clear = with_gbuffer_targets(
            PipelineBuilder::fullscreen("GBufferClearPipeline", GBUFFER_CLEAR_SHADER)
                .with_uniform(0, ShaderStage::Fragment, size_of::<ColorUniform>() as u64),
        )
        .with_depth_stencil(DEPTH_FORMAT, true, CompareFunction::Always)
        .build(gpu)?;

        let shadow_depth = PipelineBuilder::new("ShadowDepthPipeline", SHADOW_SHADER)
            .with_vertex_layout(Vertex::position_only_layout())
            .with_uniform(0, ShaderStage::Vertex, size_of::<MatrixUniform>() as u64)
            .with_uniform(1, ShaderStage::Vertex, size_of::<MatrixUniform>() as u64)
            .depth_only()
            .with_depth_stencil_biased(SHADOW_FORMAT, true, CompareFunction::LessEqual, 2, 2.0)
            .build(gpu)?;

        let light_init = PipelineBuilder::fullscreen("LightInitPipeline", LIGHT_INIT_SHADER)
            .with_uniform(0, ShaderStage::Fragment, size_of::<ColorUniform>() as u64)
            .with_color_target(LUMINANCE_FORMAT, BlendMode::Replace)
            .build(gpu)?;

        let lighting = PipelineBuilder::fullscreen("LightingPipeline", LIGHTING_SHADER)
            .with_uniform(0, ShaderStage::Fragment, size_of::<LightUniform>() as u64)
            .with_texture(1, false)
            .with_texture(2, false)
            .with_texture(3, false)
            .with_texture(4, false)
            .with_depth_texture(5)
            .with_sampler(6, true)
            .with_texture(7, false)
            .with_color_target(LUMINANCE_FORMAT, BlendMode::Replace)
            .build(gpu)?;

        let composite = PipelineBuilder::fullscreen("CompositePipeline", COMPOSITE_SHADER)
            .with_texture(0, false)
            .with_texture(1, false)
            .with_texture(2, false)
            .with_color_target(FINAL_LIT_FORMAT, BlendMode::Replace)
            .build(gpu)?;

        let skybox = PipelineBuilder::fullscreen("SkyboxPipeline", SKYBOX_SHADER)
            .with_uniform(0, ShaderStage::Fragment, size_of::<SkyUniform>() as u64)
            .with_texture(1, true)
            .with_sampler(2, false)
            .with_color_target(FINAL_LIT_FORMAT, BlendMode::Replace)
            .with_depth_stencil(DEPTH_FORMAT, false, CompareFunction::LessEqual)
            .build(gpu)?;

        let material_sampler =
            gpu.create_sampler(&SamplerDescriptor::linear("MaterialSampler", AddressMode::Repeat))?;
        let sky_sampler =
            gpu.create_sampler(&SamplerDescriptor::linear("SkySampler", AddressMode::ClampToEdge))?;
        let shadow_sampler = gpu.create_sampler(&SamplerDescriptor::comparison("ShadowSampler"))?;

        let defaults = DefaultTextures::new(gpu)?;

        log::info!("Deferred pipeline library ready");

        Ok(Self {
            gbuffer,
            gbuffer_clear,
            shadow_depth,
            light_init,
            lighting,
            composite,
            skybox,
            material_sampler,
            sky_sampler,
            shadow_sampler,
            defaults,
        })
    }
}
