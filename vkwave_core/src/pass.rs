use ash::vk;

use crate::pipeline::builder::PipelineSpec;
use crate::vulkan::command::CommandBuffer;

/// A plain data container describing one pipeline's shader/state inputs
/// and how to record draw commands against it. A pass never holds a
/// pointer back to the group or graph that hosts it — the owner passes it
/// by reference into the group's record closure; `ExecutionGroup::submit`
/// has already bound the pipeline and slot 0 descriptor set by the time
/// `record` runs.
pub trait Pass {
    fn pipeline_spec(&self) -> PipelineSpec<'_>;
    fn record(&self, cmd: &CommandBuffer, slot: usize);
}

/// Fullscreen triangle with no vertex input and no descriptor bindings
/// beyond an auto UBO carrying the clear color. Exercises the graph
/// end-to-end without depending on any of the shading logic the original
/// engine's PBR/composite/overlay passes implement.
pub struct SolidColorPass {
    vertex_shader_path: std::path::PathBuf,
    fragment_shader_path: std::path::PathBuf,
}

impl SolidColorPass {
    pub fn new(vertex_shader_path: impl Into<std::path::PathBuf>, fragment_shader_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            vertex_shader_path: vertex_shader_path.into(),
            fragment_shader_path: fragment_shader_path.into(),
        }
    }
}

impl Pass for SolidColorPass {
    fn pipeline_spec(&self) -> PipelineSpec<'_> {
        let mut spec = PipelineSpec::new(&self.vertex_shader_path, &self.fragment_shader_path);
        spec.depth_test = false;
        spec.depth_write = false;
        spec.cull_mode = vk::CullModeFlags::NONE;
        spec.expected_push_constant_bytes = Some(0);
        spec.expected_ubo_sizes = vec![(0, 0, 16)];
        spec
    }

    fn record(&self, cmd: &CommandBuffer, _slot: usize) {
        cmd.draw(3, 1);
    }
}
