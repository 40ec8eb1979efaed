//! SPIR-V shader modules and graphics pipeline creation
//!
//! Vulkan has no driver-side compiler, so the two build steps of a program
//! map onto different work than in OpenGL:
//!
//! - **compile** checks that each stage is a SPIR-V word stream with a sane
//!   header (magic, version, id bound, schema) and creates its shader module;
//! - **link** creates the graphics pipeline from every module, the vertex
//!   layouts of the objects it will draw and the frame's render pass.
//!
//! Failures in either step leave the program unusable with a diagnostic in
//! its [`ProgramStatus`] instead of returning an error.
//!
//! Instructions after the header are not parsed. A module with a valid header
//! and a malformed body is handed to `vkCreateShaderModule` as is, and only
//! the validation layers (when enabled) will report it.

use std::ffi::CStr;
use std::io::Cursor;
use std::sync::Arc;

use ash::vk;

use super::context::{DeviceShared, LogicalDevice, VulkanResult};
use super::frame::{InFlight, VkEncoder, VkFrame};
use super::Vulkan;
use crate::foundation::memory::MemoryBlock;
use crate::render::api::ShaderProgram;
use crate::render::layout::{AttributeFormat, InputRate, VertexLayout};
use crate::render::shader::{ProgramStatus, ShaderBuilder, ShaderStage};
use crate::render::{RenderError, RenderResult};

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Size of the push-constant range shared by all stages
pub const PUSH_CONSTANT_BYTES: u32 = 128;

const SPIRV_HEADER_WORDS: usize = 5;
const SPIRV_MAX_MINOR_VERSION: u32 = 6;
const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Check that `bytes` is a SPIR-V module and return its words
///
/// Byte-swapped modules are accepted and returned in host order.
pub fn validate_spirv(bytes: &[u8]) -> Result<Vec<u32>, String> {
    if bytes.is_empty() {
        return Err("shader source is empty".to_string());
    }
    if bytes.len() % 4 != 0 {
        return Err(format!(
            "SPIR-V must be a whole number of 32-bit words, got {} bytes",
            bytes.len()
        ));
    }

    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| format!("failed to read SPIR-V: {e}"))?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(format!(
            "missing SPIR-V magic number 0x{SPIRV_MAGIC:08x}, found 0x{:08x}",
            words.first().copied().unwrap_or_default()
        ));
    }
    if words.len() < SPIRV_HEADER_WORDS {
        return Err(format!(
            "SPIR-V header needs {SPIRV_HEADER_WORDS} words, module has {}",
            words.len()
        ));
    }

    let version = words[1];
    let (major, minor) = ((version >> 16) & 0xff, (version >> 8) & 0xff);
    if version & 0xff00_00ff != 0 || major != 1 || minor > SPIRV_MAX_MINOR_VERSION {
        return Err(format!("unsupported SPIR-V version word 0x{version:08x}"));
    }
    if words[3] == 0 {
        return Err("SPIR-V id bound must be non-zero".to_string());
    }
    if words[4] != 0 {
        return Err(format!("reserved SPIR-V schema word must be 0, found {}", words[4]));
    }
    Ok(words)
}

/// Validate every stage of `builder`, stopping at the first failure
pub(crate) fn compile_stages(builder: &ShaderBuilder) -> Result<Vec<(ShaderStage, Vec<u32>)>, ProgramStatus> {
    builder.require_graphics_stages()?;
    builder
        .stages()
        .map(|(stage, source)| {
            validate_spirv(source)
                .map(|words| (stage, words))
                .map_err(|log| ProgramStatus::compile_failed(stage, log))
        })
        .collect()
}

/// Pipeline stage flag for a shader stage
pub const fn stage_flags(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
    }
}

/// Vertex input format for an attribute format
pub const fn vertex_format(format: AttributeFormat) -> vk::Format {
    match format {
        AttributeFormat::Float => vk::Format::R32_SFLOAT,
        AttributeFormat::Vec2 => vk::Format::R32G32_SFLOAT,
        AttributeFormat::Vec3 => vk::Format::R32G32B32_SFLOAT,
        AttributeFormat::Vec4 => vk::Format::R32G32B32A32_SFLOAT,
        AttributeFormat::UByte4Norm => vk::Format::R8G8B8A8_UNORM,
        AttributeFormat::UInt => vk::Format::R32_UINT,
    }
}

/// Binding and attribute descriptions, one binding per layout in order
pub fn vertex_input_descriptions(
    layouts: &[VertexLayout],
) -> (Vec<vk::VertexInputBindingDescription>, Vec<vk::VertexInputAttributeDescription>) {
    let mut bindings = Vec::with_capacity(layouts.len());
    let mut attributes = Vec::new();

    for (binding, layout) in (0u32..).zip(layouts) {
        bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride: layout.stride(),
            input_rate: match layout.rate() {
                InputRate::Vertex => vk::VertexInputRate::VERTEX,
                InputRate::Instance => vk::VertexInputRate::INSTANCE,
            },
        });
        attributes.extend(layout.attributes().iter().map(|attribute| vk::VertexInputAttributeDescription {
            location: attribute.location,
            binding,
            format: vertex_format(attribute.format),
            offset: attribute.offset,
        }));
    }

    (bindings, attributes)
}

/// Check that a push-constant write of `size` bytes at `offset` fits the range
pub fn check_push_constant_write(offset: u32, size: usize) -> RenderResult<()> {
    if u64::from(offset) + size as u64 > u64::from(PUSH_CONSTANT_BYTES) {
        return Err(RenderError::PushConstantOverflow {
            offset,
            size,
            capacity: PUSH_CONSTANT_BYTES,
        });
    }
    if offset % 4 != 0 || size % 4 != 0 {
        return Err(RenderError::BackendError(format!(
            "push constant writes must be 4-byte aligned, got offset {offset} size {size}"
        )));
    }
    Ok(())
}

/// SPIR-V shader module wrapper with automatic resource management
struct ShaderModule {
    shared: Arc<DeviceShared>,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl ShaderModule {
    fn new(shared: &Arc<DeviceShared>, stage: ShaderStage, words: &[u32]) -> Result<Self, vk::Result> {
        log::debug!("[SHADER] Creating {} module from {} words", stage, words.len());
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);
        let module = unsafe { shared.device.create_shader_module(&create_info, None)? };
        Ok(Self {
            shared: Arc::clone(shared),
            module,
            stage,
        })
    }

    fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage_flags(self.stage))
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.shared.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Graphics pipeline wrapper with RAII cleanup
pub(crate) struct GraphicsPipeline {
    shared: Arc<DeviceShared>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        log::debug!("[PIPELINE] Dropping GraphicsPipeline {:?}", self.pipeline);
        unsafe {
            self.shared.device.destroy_pipeline(self.pipeline, None);
            self.shared.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Linked SPIR-V program: a graphics pipeline bound to one frame's render pass
pub struct VkShaderProgram {
    status: ProgramStatus,
    pipeline: Option<Arc<GraphicsPipeline>>,
    layouts: Vec<VertexLayout>,
}

impl VkShaderProgram {
    /// Build a program drawing into `frame` from objects with `layouts`
    ///
    /// Compile and link failures are reported through [`status`](ShaderProgram::status);
    /// only failures unrelated to the shaders themselves are errors.
    pub fn new(
        device: &LogicalDevice,
        frame: &VkFrame,
        builder: &ShaderBuilder,
        layouts: &[VertexLayout],
    ) -> VulkanResult<Self> {
        let shared = device.shared();

        let stages = match compile_stages(builder) {
            Ok(stages) => stages,
            Err(status) => return Ok(Self::failed(status, layouts)),
        };

        let mut modules = Vec::with_capacity(stages.len());
        for (stage, words) in &stages {
            match ShaderModule::new(shared, *stage, words) {
                Ok(module) => modules.push(module),
                Err(e) => {
                    return Ok(Self::failed(
                        ProgramStatus::compile_failed(*stage, format!("vkCreateShaderModule failed: {e:?}")),
                        layouts,
                    ))
                }
            }
        }

        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::ALL_GRAPHICS,
            offset: 0,
            size: PUSH_CONSTANT_BYTES,
        }];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { shared.device.create_pipeline_layout(&layout_info, None)? };

        match Self::create_pipeline(shared, frame.render_pass(), layout, &modules, layouts) {
            Ok(pipeline) => {
                log::debug!("[SHADER] Linked pipeline {:?} from {} stages", pipeline, modules.len());
                Ok(Self {
                    status: ProgramStatus::Linked,
                    pipeline: Some(Arc::new(GraphicsPipeline {
                        shared: Arc::clone(shared),
                        pipeline,
                        layout,
                    })),
                    layouts: layouts.to_vec(),
                })
            }
            Err(e) => {
                unsafe { shared.device.destroy_pipeline_layout(layout, None) };
                Ok(Self::failed(
                    ProgramStatus::link_failed(format!("vkCreateGraphicsPipelines failed: {e:?}")),
                    layouts,
                ))
            }
        }
    }

    fn failed(status: ProgramStatus, layouts: &[VertexLayout]) -> Self {
        log::error!("[SHADER] Program build failed: {}", status);
        Self {
            status,
            pipeline: None,
            layouts: layouts.to_vec(),
        }
    }

    fn create_pipeline(
        shared: &DeviceShared,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
        modules: &[ShaderModule],
        layouts: &[VertexLayout],
    ) -> Result<vk::Pipeline, vk::Result> {
        let shader_stages: Vec<_> = modules.iter().map(ShaderModule::stage_info).collect();
        let tessellated = modules
            .iter()
            .any(|module| module.stage == ShaderStage::TessellationControl);

        let (bindings, attributes) = vertex_input_descriptions(layouts);
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(if tessellated {
                vk::PrimitiveTopology::PATCH_LIST
            } else {
                vk::PrimitiveTopology::TRIANGLE_LIST
            })
            .primitive_restart_enable(false);
        let tessellation = vk::PipelineTessellationStateCreateInfo::builder().patch_control_points(3);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);
        if tessellated {
            pipeline_info = pipeline_info.tessellation_state(&tessellation);
        }

        let pipelines = unsafe {
            shared
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, err)| err)?
        };
        Ok(pipelines[0])
    }

    /// Write `data` into the push-constant range at byte `offset`
    ///
    /// Offset and size must be multiples of four and the write must end
    /// inside the 128-byte range.
    pub fn push_constants(&self, encoder: &VkEncoder, offset: u32, data: MemoryBlock<'_>) -> RenderResult<()> {
        let pipeline = self.linked_pipeline()?;
        check_push_constant_write(offset, data.size())?;
        if data.is_empty() {
            return Ok(());
        }
        encoder.retain(InFlight::Pipeline(Arc::clone(pipeline)));

        unsafe {
            encoder.device().cmd_push_constants(
                encoder.command_buffer(),
                pipeline.layout,
                vk::ShaderStageFlags::ALL_GRAPHICS,
                offset,
                data.as_bytes(),
            );
        }
        Ok(())
    }

    fn linked_pipeline(&self) -> RenderResult<&Arc<GraphicsPipeline>> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| RenderError::BackendError(format!("program is not usable: {}", self.status)))
    }
}

impl ShaderProgram<Vulkan> for VkShaderProgram {
    fn status(&self) -> &ProgramStatus {
        &self.status
    }

    fn vertex_layouts(&self) -> Option<&[VertexLayout]> {
        Some(&self.layouts)
    }

    fn bind(&self, encoder: &VkEncoder) -> RenderResult<()> {
        let pipeline = self.linked_pipeline()?;
        encoder.retain(InFlight::Pipeline(Arc::clone(pipeline)));
        unsafe {
            encoder
                .device()
                .cmd_bind_pipeline(encoder.command_buffer(), vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::Frame;

    fn header_only_module() -> Vec<u8> {
        let words: [u32; 5] = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        bytemuck::cast_slice(&words).to_vec()
    }

    #[test]
    fn spirv_header_is_accepted() {
        let words = validate_spirv(&header_only_module()).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words.len(), 5);
    }

    #[test]
    fn byte_swapped_spirv_is_normalized() {
        let swapped: Vec<u8> = header_only_module()
            .chunks_exact(4)
            .flat_map(|word| word.iter().rev().copied().collect::<Vec<_>>())
            .collect();
        assert_eq!(validate_spirv(&swapped).unwrap()[0], SPIRV_MAGIC);
    }

    #[test]
    fn malformed_spirv_is_rejected() {
        assert!(validate_spirv(b"").is_err());
        assert!(validate_spirv(b"void main() {}").unwrap_err().contains("32-bit words"));
        assert!(validate_spirv(&[0u8; 20]).unwrap_err().contains("magic"));
        assert!(validate_spirv(&header_only_module()[..8]).unwrap_err().contains("header"));
    }

    #[test]
    fn spirv_header_fields_are_range_checked() {
        let module = |version: u32, bound: u32, schema: u32| -> Vec<u8> {
            bytemuck::cast_slice(&[SPIRV_MAGIC, version, 0, bound, schema]).to_vec()
        };

        assert!(validate_spirv(&module(0x0001_0600, 8, 0)).is_ok());
        assert!(validate_spirv(&module(0x0002_0000, 8, 0)).unwrap_err().contains("version"));
        assert!(validate_spirv(&module(0x0001_0700, 8, 0)).unwrap_err().contains("version"));
        assert!(validate_spirv(&module(0x0001_0001, 8, 0)).unwrap_err().contains("version"));
        assert!(validate_spirv(&module(0x0001_0000, 0, 0)).unwrap_err().contains("bound"));
        assert!(validate_spirv(&module(0x0001_0000, 8, 7)).unwrap_err().contains("schema"));
    }

    #[test]
    fn failed_program_keeps_its_vertex_layouts() {
        let layouts = [VertexLayout::packed(&[AttributeFormat::Vec3])];
        let program = VkShaderProgram::failed(ProgramStatus::link_failed("no entry point"), &layouts);
        assert!(!program.usable());
        assert_eq!(program.vertex_layouts(), Some(&layouts[..]));
    }

    #[test]
    fn malformed_vertex_stage_leaves_program_unusable() {
        let mut builder = ShaderBuilder::new();
        builder
            .set_shader_source(ShaderStage::Vertex, "#version 450\nvoid main() { gl_Position = vec4(0.0) }")
            .set_shader_source(ShaderStage::Fragment, header_only_module());

        let status = compile_stages(&builder).unwrap_err();
        assert!(matches!(status, ProgramStatus::CompileFailed { stage: ShaderStage::Vertex, .. }));
        assert!(!status.is_linked());
        assert!(status.diagnostic().is_some_and(|log| !log.is_empty()));
    }

    #[test]
    fn stages_compile_in_pipeline_order() {
        let mut builder = ShaderBuilder::new();
        builder
            .set_shader_source(ShaderStage::Fragment, header_only_module())
            .set_shader_source(ShaderStage::Vertex, header_only_module());

        let stages: Vec<_> = compile_stages(&builder).unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(stages, vec![ShaderStage::Vertex, ShaderStage::Fragment]);
    }

    #[test]
    fn push_constant_writes_must_fit_the_range() {
        assert!(check_push_constant_write(0, 128).is_ok());
        assert!(check_push_constant_write(64, 64).is_ok());
        assert!(matches!(
            check_push_constant_write(64, 68),
            Err(RenderError::PushConstantOverflow { offset: 64, size: 68, capacity: 128 })
        ));
        assert!(matches!(check_push_constant_write(u32::MAX, 4), Err(RenderError::PushConstantOverflow { .. })));
        assert!(matches!(check_push_constant_write(2, 4), Err(RenderError::BackendError(_))));
    }

    #[test]
    fn vertex_input_uses_one_binding_per_layout() {
        let layouts = [
            VertexLayout::packed(&[AttributeFormat::Vec3, AttributeFormat::Vec2]),
            VertexLayout::new(16).with_attribute(2, AttributeFormat::Vec4, 0).per_instance(),
        ];
        let (bindings, attributes) = vertex_input_descriptions(&layouts);

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].stride, 20);
        assert_eq!(bindings[1].input_rate, vk::VertexInputRate::INSTANCE);
        assert_eq!(attributes.len(), 3);
        assert_eq!(attributes[1].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attributes[2].binding, 1);
    }

    #[test]
    fn invalid_vertex_stage_on_hardware_is_a_compile_failure() {
        let Some(device) = super::super::context::tests::headless_device() else {
            return;
        };
        let frame = VkFrame::new(&device, 4, 4).unwrap();

        let mut builder = ShaderBuilder::new();
        builder
            .set_shader_source(ShaderStage::Vertex, [0u8; 3])
            .set_shader_source(ShaderStage::Fragment, header_only_module());

        let program = VkShaderProgram::new(&device, &frame, &builder, &[]).unwrap();
        assert!(!program.usable());
        assert!(program.bind(frame.encoder()).is_err());
        assert!(matches!(
            program.push_constants(frame.encoder(), 0, MemoryBlock::new(&[0u32; 4])),
            Err(RenderError::BackendError(_))
        ));
    }
}
