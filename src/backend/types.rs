//! Common types shared between the renderer and device implementations

use crate::backend::traits::{
    BufferHandle, DescriptorSetLayoutHandle, FramebufferHandle, ImageHandle, SamplerHandle,
    ShaderHandle,
};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const MAP_WRITE: Self = Self(1 << 0);
    pub const COPY_SRC: Self = Self(1 << 1);
    pub const COPY_DST: Self = Self(1 << 2);
    pub const INDEX: Self = Self(1 << 3);
    pub const VERTEX: Self = Self(1 << 4);
    pub const UNIFORM: Self = Self(1 << 5);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Host-visible uniform buffer of `size` bytes
    pub fn uniform(label: impl Into<String>, size: u64) -> Self {
        Self {
            label: Some(label.into()),
            size,
            usage: BufferUsage::UNIFORM | BufferUsage::MAP_WRITE,
        }
    }
}

/// Image formats the renderer asks for
///
/// `Depth` resolves to the first depth format the device supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Rgba8Unorm,
    Rgba8Srgb,
    Depth,
}

impl ImageFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, ImageFormat::Depth)
    }
}

/// Image usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageUsage(u32);

impl ImageUsage {
    pub const SAMPLED: Self = Self(1 << 0);
    pub const TRANSFER_DST: Self = Self(1 << 1);
    pub const TRANSFER_SRC: Self = Self(1 << 2);
    pub const DEPTH_ATTACHMENT: Self = Self(1 << 3);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for ImageUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Image descriptor
#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: ImageFormat,
    pub usage: ImageUsage,
}

impl ImageDescriptor {
    /// Sampled color texture that receives an upload
    pub fn texture(label: impl Into<String>, width: u32, height: u32, mip_levels: u32) -> Self {
        Self {
            label: Some(label.into()),
            width,
            height,
            mip_levels,
            format: ImageFormat::Rgba8Srgb,
            usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST | ImageUsage::TRANSFER_SRC,
        }
    }

    /// Square depth target that is later sampled as a shadow map
    pub fn shadow_map(label: impl Into<String>, resolution: u32) -> Self {
        Self {
            label: Some(label.into()),
            width: resolution,
            height: resolution,
            mip_levels: 1,
            format: ImageFormat::Depth,
            usage: ImageUsage::SAMPLED | ImageUsage::DEPTH_ATTACHMENT,
        }
    }
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ClampToEdge,
    ClampToBorder,
    Repeat,
}

/// Compare function for depth tests and comparison samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    Always,
}

/// Sampler descriptor
#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub filter: FilterMode,
    pub address_mode: AddressMode,
    pub max_lod: f32,
    pub compare: Option<CompareFunction>,
}

impl SamplerDescriptor {
    /// Trilinear repeat sampler for material textures
    pub fn material(mip_levels: u32) -> Self {
        Self {
            label: Some("material sampler".into()),
            filter: FilterMode::Linear,
            address_mode: AddressMode::Repeat,
            max_lod: mip_levels as f32,
            compare: None,
        }
    }

    /// Comparison sampler for shadow maps
    pub fn shadow() -> Self {
        Self {
            label: Some("shadow sampler".into()),
            filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToBorder,
            max_lod: 1.0,
            compare: Some(CompareFunction::Less),
        }
    }
}

/// Shader stages a binding is visible to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStages(u32);

impl ShaderStages {
    pub const VERTEX: Self = Self(1 << 0);
    pub const FRAGMENT: Self = Self(1 << 1);
    pub const VERTEX_FRAGMENT: Self = Self((1 << 0) | (1 << 1));

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

/// Kind of resource bound at a descriptor binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    UniformBuffer,
    SampledImage,
    Sampler,
    InputAttachment,
}

/// One binding of a descriptor set layout
#[derive(Debug, Clone, Copy)]
pub struct LayoutBinding {
    pub binding: u32,
    pub kind: BindingKind,
    pub stages: ShaderStages,
}

impl LayoutBinding {
    pub fn new(binding: u32, kind: BindingKind, stages: ShaderStages) -> Self {
        Self {
            binding,
            kind,
            stages,
        }
    }
}

/// Descriptor pool capacity
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorPoolDescriptor {
    pub max_sets: u32,
    pub uniform_buffers: u32,
    pub sampled_images: u32,
    pub samplers: u32,
    pub input_attachments: u32,
}

/// G-buffer attachments read by the deferred lighting subpass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GBufferAttachment {
    Position,
    Normal,
    Albedo,
    Material,
}

impl GBufferAttachment {
    pub const ALL: [GBufferAttachment; 4] = [
        GBufferAttachment::Position,
        GBufferAttachment::Normal,
        GBufferAttachment::Albedo,
        GBufferAttachment::Material,
    ];
}

/// A single descriptor write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    UniformBuffer { binding: u32, buffer: BufferHandle },
    Image { binding: u32, image: ImageHandle },
    Sampler { binding: u32, sampler: SamplerHandle },
    /// Bound to whatever the current swapchain-sized G-buffer attachment is
    InputAttachment { binding: u32, attachment: GBufferAttachment },
}

/// Render pass flavors the device provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Depth-only pass into the swapchain-sized depth target
    DepthPrepass,
    /// Depth-only pass into a light's shadow map
    Shadow,
    /// Forward color pass (optionally multisampled)
    Forward,
    /// G-buffer output subpass followed by the lighting subpass
    Deferred,
}

/// Which framebuffer a pass renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTarget {
    Swapchain(u32),
    Offscreen(FramebufferHandle),
}

/// Arguments to begin a render pass
#[derive(Debug, Clone, Copy)]
pub struct PassBegin {
    pub kind: PassKind,
    pub target: PassTarget,
}

/// Pipeline flavors a draw batch owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// Forward shading, subpass 0 of the forward pass
    Forward,
    /// Depth-only geometry for the pre-pass
    DepthOnly,
    /// Depth-only geometry with dynamic depth bias for shadow maps
    Shadow,
    /// G-buffer output, subpass 0 of the deferred pass
    GBufferOutput,
    /// Fullscreen lighting, subpass 1 of the deferred pass
    GBufferLighting,
}

impl PipelineKind {
    pub fn pass(&self) -> PassKind {
        match self {
            PipelineKind::Forward => PassKind::Forward,
            PipelineKind::DepthOnly => PassKind::DepthPrepass,
            PipelineKind::Shadow => PassKind::Shadow,
            PipelineKind::GBufferOutput | PipelineKind::GBufferLighting => PassKind::Deferred,
        }
    }

    pub fn subpass(&self) -> u32 {
        match self {
            PipelineKind::GBufferLighting => 1,
            _ => 0,
        }
    }

    /// Entry points this flavor needs from a shader program
    pub fn entry_points(&self) -> (&'static str, Option<&'static str>) {
        match self {
            PipelineKind::Forward => ("vs_main", Some("fs_main")),
            PipelineKind::DepthOnly | PipelineKind::Shadow => ("vs_depth", None),
            PipelineKind::GBufferOutput => ("vs_main", Some("fs_gbuffer")),
            PipelineKind::GBufferLighting => ("vs_lighting", Some("fs_lighting")),
        }
    }

    /// Whether the pipeline consumes mesh vertices
    pub fn uses_vertices(&self) -> bool {
        !matches!(self, PipelineKind::GBufferLighting)
    }
}

/// Graphics pipeline descriptor
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    pub label: Option<String>,
    pub kind: PipelineKind,
    pub shader: ShaderHandle,
    pub layout: DescriptorSetLayoutHandle,
}

/// Constant/slope depth bias applied while rendering shadow maps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthBias {
    pub constant: f32,
    pub clamp: f32,
    pub slope: f32,
}

/// Layout transitions of depth images recorded outside render passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutTransition {
    /// Shader-readable to depth attachment, before shadow passes write
    ToDepthAttachment,
    /// Depth attachment back to shader-readable, before the color pass samples
    ToShaderRead,
}

/// Mesh vertex
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub color: Vec4,
    pub position: Vec3,
    pub normal: Vec3,
    pub tangent: Vec3,
    pub tex_coord: Vec2,
    pub _padding: f32,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, tex_coord: Vec2) -> Self {
        Self {
            color: Vec4::ONE,
            position,
            normal,
            tangent: Vec3::X,
            tex_coord,
            _padding: 0.0,
        }
    }

    pub fn with_color(mut self, color: Vec4) -> Self {
        self.color = color;
        self
    }

    pub fn with_tangent(mut self, tangent: Vec3) -> Self {
        self.tangent = tangent;
        self
    }
}

/// Camera parameter block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub position: Vec4,
    pub direction: Vec4,
}

/// Material parameter block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialUniform {
    pub color: Vec4,
    pub roughness: f32,
    pub metallic: f32,
    pub _padding: [f32; 2],
}

/// Per-mesh transform block for color, pre-pass and shadow passes
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TransformUniform {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
    /// Deferred lighting group written to the G-buffer, 0 in forward mode
    pub lighting_group: u32,
    pub _padding: [u32; 3],
}

/// Id of one deferred lighting draw; it shades only pixels tagged with it
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightingGroupUniform {
    pub group: u32,
    pub _padding: [u32; 3],
}

/// One light inside a light channel block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightUniform {
    pub id: u32,
    pub kind: u32,
    pub intensity: f32,
    /// Shadow slot the light samples from, or -1.0 without a shadow map
    pub shadow_slot: f32,
    pub position: Vec4,
    pub color: Vec4,
    pub direction: Vec4,
    pub view: Mat4,
    pub proj: Mat4,
}

/// Light channel parameter block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightChannelUniform {
    pub count: u32,
    pub _padding: [u32; 3],
    pub lights: [LightUniform; crate::MAX_LIGHT_NUM],
}

/// Binding numbers shared by descriptor layouts and shaders
pub mod bindings {
    use crate::MAX_LIGHT_NUM;

    // Mesh set (forward and G-buffer output)
    pub const TRANSFORM: u32 = 0;
    pub const CAMERA: u32 = 1;
    pub const MATERIAL: u32 = 2;
    pub const LIGHT_CHANNEL: u32 = 3;
    pub const SHADOW_MAP: u32 = 4;
    pub const SHADOW_SAMPLER: u32 = SHADOW_MAP + MAX_LIGHT_NUM as u32;
    pub const TEXTURE: u32 = SHADOW_SAMPLER + 1;
    pub const TEXTURE_SAMPLER: u32 = TEXTURE + crate::resources::TextureKind::COUNT as u32;

    // Lighting set (deferred lighting subpass)
    pub const LIGHTING_CAMERA: u32 = 0;
    pub const LIGHTING_LIGHT_CHANNEL: u32 = 1;
    pub const LIGHTING_SHADOW_MAP: u32 = 2;
    pub const LIGHTING_SHADOW_SAMPLER: u32 = LIGHTING_SHADOW_MAP + MAX_LIGHT_NUM as u32;
    pub const LIGHTING_GBUFFER: u32 = LIGHTING_SHADOW_SAMPLER + 1;
    pub const LIGHTING_GROUP: u32 = LIGHTING_GBUFFER + 4;
}
