use anyhow::Result;
use ash::vk;

use crate::pipeline::render_pass::{create_render_pass_from_recipe, RenderPassRecipe};
use crate::shader::reflection::ShaderReflection;
use crate::vulkan::device::Device;

/// Declarative description of one graphics pipeline. Vertex
/// bindings/attributes empty ⇒ no vertex input (a fullscreen-triangle
/// pass generates its geometry in the vertex shader from `gl_VertexIndex`).
pub struct PipelineSpec<'a> {
    pub vertex_shader_path: &'a std::path::Path,
    pub fragment_shader_path: &'a std::path::Path,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub cull_mode: vk::CullModeFlags,
    pub wireframe: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub blend_enabled: bool,
    pub samples: vk::SampleCountFlags,
    pub dynamic_cull_mode: bool,
    pub dynamic_depth_write: bool,
    pub dynamic_stencil_reference: bool,
    /// Used only when the pipeline is built without reflection (no
    /// `ShaderReflection` passed to `build_graphics_pipeline`).
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    /// Recipe the builder uses to create a render pass when none is
    /// supplied. `None` means the caller must supply an existing one.
    pub render_pass_recipe: Option<RenderPassRecipe>,
    /// Expected size (bytes) of the merged push-constant footprint,
    /// checked by `ShaderReflection::validate_push_constant_size` when the
    /// owning group's debug flag is on. `None` skips the check.
    pub expected_push_constant_bytes: Option<u32>,
    /// Expected `(set, binding, size-bytes)` triples for reflected UBO/SSBO
    /// bindings, checked by `ShaderReflection::validate_ubo_size` when the
    /// owning group's debug flag is on.
    pub expected_ubo_sizes: Vec<(u32, u32, u32)>,
}

impl<'a> PipelineSpec<'a> {
    pub fn new(vertex_shader_path: &'a std::path::Path, fragment_shader_path: &'a std::path::Path) -> Self {
        Self {
            vertex_shader_path,
            fragment_shader_path,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            cull_mode: vk::CullModeFlags::BACK,
            wireframe: false,
            depth_test: true,
            depth_write: true,
            blend_enabled: false,
            samples: vk::SampleCountFlags::TYPE_1,
            dynamic_cull_mode: false,
            dynamic_depth_write: false,
            dynamic_stencil_reference: false,
            push_constant_ranges: Vec::new(),
            render_pass_recipe: None,
            expected_push_constant_bytes: None,
            expected_ubo_sizes: Vec::new(),
        }
    }
}

pub struct BuiltPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub descriptor_set_layouts: Vec<vk::DescriptorSetLayout>,
}

/// Builds set layouts/push-constant ranges, a pipeline layout, a render
/// pass and the graphics pipeline itself. `existing_render_pass` and
/// `existing_layout` are reused verbatim when supplied; otherwise a render
/// pass is created from `spec.render_pass_recipe` and a layout is created
/// from `reflection` (or, absent reflection, from
/// `spec.push_constant_ranges` with no descriptor sets). Viewport/scissor
/// are always dynamic state; cull mode, depth-write and stencil reference
/// join dynamic state only when the spec asks for it.
pub fn build_graphics_pipeline(
    device: &Device,
    spec: &PipelineSpec,
    reflection: Option<&ShaderReflection>,
    existing_render_pass: Option<vk::RenderPass>,
    existing_layout: Option<vk::PipelineLayout>,
    vertex_spirv: &[u32],
    fragment_spirv: &[u32],
) -> Result<BuiltPipeline> {
    let render_pass = match existing_render_pass {
        Some(render_pass) => render_pass,
        None => {
            let recipe = spec
                .render_pass_recipe
                .ok_or_else(|| anyhow::anyhow!("no render pass supplied and no render_pass_recipe set on PipelineSpec"))?;
            create_render_pass_from_recipe(device, recipe, spec.samples)?
        }
    };

    let (layout, descriptor_set_layouts) = match existing_layout {
        Some(layout) => (layout, Vec::new()),
        None => {
            let descriptor_set_layouts = match reflection {
                Some(reflection) => create_descriptor_set_layouts(device, reflection)?,
                None => Vec::new(),
            };
            let push_constant_ranges = match reflection {
                Some(reflection) => reflection
                    .push_constant_ranges()
                    .iter()
                    .map(|r| {
                        vk::PushConstantRange::default()
                            .stage_flags(r.stage_flags)
                            .offset(r.offset)
                            .size(r.size)
                    })
                    .collect::<Vec<_>>(),
                None => spec.push_constant_ranges.clone(),
            };

            let layout_info = vk::PipelineLayoutCreateInfo::default()
                .set_layouts(&descriptor_set_layouts)
                .push_constant_ranges(&push_constant_ranges);
            let layout = unsafe { device.raw().create_pipeline_layout(&layout_info, None)? };
            (layout, descriptor_set_layouts)
        }
    };

    let vertex_module = create_shader_module(device, vertex_spirv)?;
    let fragment_module = create_shader_module(device, fragment_spirv)?;

    let entry_point = std::ffi::CString::new("main").unwrap();
    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_module)
            .name(&entry_point),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_module)
            .name(&entry_point),
    ];

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&spec.vertex_bindings)
        .vertex_attribute_descriptions(&spec.vertex_attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(if spec.wireframe {
            vk::PolygonMode::LINE
        } else {
            vk::PolygonMode::FILL
        })
        .cull_mode(spec.cull_mode)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(spec.samples);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(spec.depth_test)
        .depth_write_enable(spec.depth_test && spec.depth_write)
        .depth_compare_op(vk::CompareOp::LESS);

    let blend_attachment = if spec.blend_enabled {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    } else {
        vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA)
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
        .attachments(std::slice::from_ref(&blend_attachment));

    let mut dynamic_states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    if spec.dynamic_cull_mode {
        dynamic_states.push(vk::DynamicState::CULL_MODE);
    }
    if spec.dynamic_depth_write {
        dynamic_states.push(vk::DynamicState::DEPTH_WRITE_ENABLE);
    }
    if spec.dynamic_stencil_reference {
        dynamic_states.push(vk::DynamicState::STENCIL_REFERENCE);
    }
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device
            .raw()
            .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&create_info), None)
            .map_err(|(_, e)| anyhow::anyhow!("failed to create graphics pipeline: {e}"))?
    };

    unsafe {
        device.raw().destroy_shader_module(vertex_module, None);
        device.raw().destroy_shader_module(fragment_module, None);
    }

    Ok(BuiltPipeline {
        pipeline: pipelines[0],
        layout,
        render_pass,
        descriptor_set_layouts,
    })
}

fn create_shader_module(device: &Device, spirv: &[u32]) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::default().code(spirv);
    Ok(unsafe { device.raw().create_shader_module(&info, None)? })
}

fn create_descriptor_set_layouts(
    device: &Device,
    reflection: &ShaderReflection,
) -> Result<Vec<vk::DescriptorSetLayout>> {
    let sets = reflection.descriptor_sets();
    sets.iter()
        .map(|set_info| {
            let bindings = set_info
                .bindings
                .iter()
                .map(|b| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(b.binding)
                        .descriptor_type(b.descriptor_type)
                        .descriptor_count(b.count)
                        .stage_flags(b.stage_flags)
                })
                .collect::<Vec<_>>();
            let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            Ok(unsafe { device.raw().create_descriptor_set_layout(&info, None)? })
        })
        .collect()
}
