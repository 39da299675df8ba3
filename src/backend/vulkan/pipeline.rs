//! Shader compilation and graphics pipeline creation.
//!
//! A shader variant is `<dir>/<variant>.wgsl`, compiled per entry point with
//! naga. An entry point may be overridden by precompiled SPIR-V at
//! `<dir>/<variant>.<entry>.spv` (entry named `main`); `fs_lighting` needs
//! this, since WGSL cannot declare input attachments.

use std::collections::HashMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};

use ash::vk;

use super::conversion::convert_sample_count;
use crate::backend::traits::{BackendError, BackendResult};
use crate::backend::types::{PipelineKind, Vertex};

/// A parsed shader variant and the stage modules built from it so far
pub struct ShaderProgram {
    name: String,
    path: PathBuf,
    module: Option<(naga::Module, naga::valid::ModuleInfo)>,
    debug_info: bool,
    stages: HashMap<String, (vk::ShaderModule, CString)>,
}

impl ShaderProgram {
    /// Load and validate a variant
    ///
    /// Fails when neither WGSL source nor any SPIR-V override exists, or when
    /// the WGSL does not parse or validate.
    pub fn load(dir: &Path, variant: &str, debug_info: bool) -> BackendResult<Self> {
        let path = dir.join(variant);
        let wgsl_path = path.with_extension("wgsl");

        let module = match std::fs::read_to_string(&wgsl_path) {
            Ok(source) => Some(Self::parse(&source, variant)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(BackendError::ShaderCreationFailed(format!(
                    "{}: {}",
                    wgsl_path.display(),
                    e
                )))
            }
        };

        let program = Self {
            name: variant.to_string(),
            path,
            module,
            debug_info,
            stages: HashMap::new(),
        };
        if program.module.is_none() && !program.has_spirv_override() {
            return Err(BackendError::ShaderCreationFailed(format!(
                "no shader source for variant '{}' in {}",
                variant,
                dir.display()
            )));
        }
        Ok(program)
    }

    fn parse(source: &str, variant: &str) -> BackendResult<(naga::Module, naga::valid::ModuleInfo)> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| {
            BackendError::ShaderCreationFailed(format!("'{}': WGSL parse error: {}", variant, e))
        })?;
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        let info = validator.validate(&module).map_err(|e| {
            BackendError::ShaderCreationFailed(format!("'{}': validation error: {}", variant, e))
        })?;
        Ok((module, info))
    }

    fn spirv_path(&self, entry_point: &str) -> PathBuf {
        let mut file = self.path.clone().into_os_string();
        file.push(format!(".{}.spv", entry_point));
        PathBuf::from(file)
    }

    fn has_spirv_override(&self) -> bool {
        ["vs_main", "fs_main", "vs_depth", "fs_gbuffer", "vs_lighting", "fs_lighting"]
            .iter()
            .any(|entry| self.spirv_path(entry).exists())
    }

    /// Build the module of one stage unless it exists already
    pub fn prepare_stage(
        &mut self,
        device: &ash::Device,
        entry_point: &str,
        stage: naga::ShaderStage,
    ) -> BackendResult<()> {
        if self.stages.contains_key(entry_point) {
            return Ok(());
        }
        let (code, name) = self.compile(entry_point, stage)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.create_shader_module(&create_info, None) }.map_err(|e| {
            BackendError::ShaderCreationFailed(format!("'{}' {}: {:?}", self.name, entry_point, e))
        })?;
        self.stages.insert(entry_point.to_string(), (module, name));
        Ok(())
    }

    /// Module and entry name of a prepared stage
    pub fn stage(&self, entry_point: &str) -> Option<(vk::ShaderModule, &std::ffi::CStr)> {
        self.stages
            .get(entry_point)
            .map(|(module, name)| (*module, name.as_c_str()))
    }

    fn compile(&self, entry_point: &str, stage: naga::ShaderStage) -> BackendResult<(Vec<u32>, CString)> {
        let fail = |msg: String| BackendError::ShaderCreationFailed(format!("'{}' {}: {}", self.name, entry_point, msg));

        let spirv_path = self.spirv_path(entry_point);
        if spirv_path.exists() {
            let mut file = std::fs::File::open(&spirv_path).map_err(|e| fail(e.to_string()))?;
            let code = ash::util::read_spv(&mut file).map_err(|e| fail(e.to_string()))?;
            log::debug!("Loaded {}", spirv_path.display());
            return Ok((code, c"main".to_owned()));
        }

        let (module, info) = self
            .module
            .as_ref()
            .ok_or_else(|| fail("no WGSL source".into()))?;
        module
            .entry_points
            .iter()
            .find(|ep| ep.name == entry_point && ep.stage == stage)
            .ok_or_else(|| fail(format!("entry point not found for stage {:?}", stage)))?;

        let mut flags = naga::back::spv::WriterFlags::empty();
        if self.debug_info {
            flags |= naga::back::spv::WriterFlags::DEBUG;
        }
        let options = naga::back::spv::Options {
            lang_version: (1, 3),
            flags,
            ..Default::default()
        };
        let pipeline_options = naga::back::spv::PipelineOptions {
            shader_stage: stage,
            entry_point: entry_point.to_string(),
        };
        let code = naga::back::spv::write_vec(module, info, &options, Some(&pipeline_options))
            .map_err(|e| fail(format!("SPIR-V generation error: {}", e)))?;
        let name = CString::new(entry_point).map_err(|e| fail(e.to_string()))?;
        Ok((code, name))
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for (_, (module, _)) in self.stages.drain() {
            unsafe { device.destroy_shader_module(module, None) };
        }
    }
}

/// Fixed-function setup of one pipeline flavor
pub struct PipelineTarget {
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub samples: u32,
    pub color_attachments: usize,
}

fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 5] {
    let attribute = |location: u32, format: vk::Format, offset: usize| {
        vk::VertexInputAttributeDescription::default()
            .location(location)
            .binding(0)
            .format(format)
            .offset(offset as u32)
    };
    [
        attribute(0, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Vertex, position)),
        attribute(1, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Vertex, normal)),
        attribute(2, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Vertex, tangent)),
        attribute(3, vk::Format::R32G32_SFLOAT, std::mem::offset_of!(Vertex, tex_coord)),
        attribute(4, vk::Format::R32G32B32A32_SFLOAT, std::mem::offset_of!(Vertex, color)),
    ]
}

/// Create a graphics pipeline of `kind` with dynamic viewport and scissor.
pub fn create_graphics_pipeline(
    device: &ash::Device,
    kind: PipelineKind,
    vertex: (vk::ShaderModule, &std::ffi::CStr),
    fragment: Option<(vk::ShaderModule, &std::ffi::CStr)>,
    layout: vk::PipelineLayout,
    target: &PipelineTarget,
) -> BackendResult<vk::Pipeline> {
    let mut stages = vec![vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vertex.0)
        .name(vertex.1)];
    if let Some((module, name)) = fragment {
        stages.push(
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(module)
                .name(name),
        );
    }

    let bindings = [vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(std::mem::size_of::<Vertex>() as u32)
        .input_rate(vk::VertexInputRate::VERTEX)];
    let attributes = vertex_attributes();
    let vertex_input_state = if kind.uses_vertices() {
        vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes)
    } else {
        vk::PipelineVertexInputStateCreateInfo::default()
    };

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let shadow = kind == PipelineKind::Shadow;
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(shadow);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(convert_sample_count(target.samples));

    let depth_tested = kind != PipelineKind::GBufferLighting;
    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(depth_tested)
        .depth_write_enable(depth_tested)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments = vec![
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false);
        target.color_attachments
    ];
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let mut dynamic_states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    if shadow {
        dynamic_states.push(vk::DynamicState::DEPTH_BIAS);
    }
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(target.render_pass)
        .subpass(target.subpass);

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| BackendError::PipelineCreationFailed(format!("{:?}: {:?}", kind, e)))?;

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::PipelineCreationFailed(format!("{:?}: no pipeline returned", kind)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vkengine-shaders-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    const SOURCE: &str = r#"
        struct VertexOutput {
            @builtin(position) position: vec4<f32>,
        };

        @vertex
        fn vs_main(@location(0) position: vec3<f32>) -> VertexOutput {
            var out: VertexOutput;
            out.position = vec4<f32>(position, 1.0);
            return out;
        }

        @fragment
        fn fs_main() -> @location(0) vec4<f32> {
            return vec4<f32>(1.0, 0.0, 1.0, 1.0);
        }
    "#;

    #[test]
    fn test_missing_variant_fails() {
        let dir = temp_dir("missing");
        assert!(matches!(
            ShaderProgram::load(&dir, "nope", false),
            Err(BackendError::ShaderCreationFailed(_))
        ));
    }

    #[test]
    fn test_invalid_wgsl_fails() {
        let dir = temp_dir("invalid");
        std::fs::write(dir.join("broken.wgsl"), "fn vs_main( {").unwrap();
        let err = ShaderProgram::load(&dir, "broken", false).err().unwrap();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_entry_points_compile() {
        let dir = temp_dir("valid");
        std::fs::write(dir.join("flat.wgsl"), SOURCE).unwrap();
        let program = ShaderProgram::load(&dir, "flat", true).unwrap();

        let (code, name) = program.compile("vs_main", naga::ShaderStage::Vertex).unwrap();
        assert_eq!(code[0], 0x0723_0203);
        assert_eq!(name.to_str().unwrap(), "vs_main");

        // Wrong stage for the entry point
        assert!(program.compile("vs_main", naga::ShaderStage::Fragment).is_err());
        assert!(program.compile("fs_lighting", naga::ShaderStage::Fragment).is_err());
    }
}
