use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::graph::frame_resources::{create_frame_resources, destroy_frame_resources, FrameResources};
use crate::graph::gating::GatingMode;
use crate::pipeline::builder::{build_graphics_pipeline, BuiltPipeline, PipelineSpec};
use crate::shader::compiler::{ShaderCompiler, ShaderStage};
use crate::shader::reflection::{buffer_usage_for_descriptor_type, ShaderReflection};
use crate::vulkan::buffer::{Buffer, BufferDescriptor};
use crate::vulkan::command::CommandBuffer;
use crate::vulkan::device::{Device, DeviceShared};
use crate::vulkan::queue::{Queue, SemaphoreSubmit};
use crate::vulkan::semaphore::{Semaphore, SemaphoreType};

/// A registered auto-buffer: one reflected `(set, binding)` with
/// `block_size > 0`, backed by a ring of N host-visible buffers.
struct AutoBufferSlot {
    set: u32,
    binding: u32,
    size: u64,
    usage: vk::BufferUsageFlags,
    buffers: Vec<Buffer>,
}

pub type RecordFn = Box<dyn Fn(&CommandBuffer, usize) + Send + Sync>;

/// A pipeline plus its ring of per-slot resources, reflected auto-buffers
/// and descriptor sets, one timeline counter, and the submission protocol
/// that gates, records and signals each frame.
pub struct ExecutionGroup {
    name: String,
    debug: bool,
    device: Arc<DeviceShared>,
    destroyed: bool,

    pipeline: BuiltPipeline,

    frames: Vec<FrameResources>,
    extent: vk::Extent2D,

    timeline: Semaphore,
    slot_signal_values: Vec<u64>,
    next_signal_value: u64,
    slot_submitted_last: Vec<bool>,

    present_semaphores: Vec<Semaphore>,
    signal_binary_present: bool,

    auto_buffers: Vec<AutoBufferSlot>,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,

    gating: GatingMode,
    last_run_time: f64,

    clear_values: Vec<vk::ClearValue>,

    record_fn: Option<RecordFn>,
    post_record_fn: Option<RecordFn>,
}

impl ExecutionGroup {
    pub fn builder<'a>(
        name: impl Into<String>,
        spec: PipelineSpec<'a>,
    ) -> ExecutionGroupBuilder<'a> {
        ExecutionGroupBuilder {
            name: name.into(),
            spec,
            render_pass: None,
            debug: false,
            clear_color: [0.02, 0.02, 0.03, 1.0],
            gating: GatingMode::Always,
            signal_binary_present: false,
        }
    }

    fn new(
        device: &Device,
        compiler: &ShaderCompiler,
        name: String,
        spec: PipelineSpec,
        render_pass: Option<vk::RenderPass>,
        debug: bool,
        clear_color: [f32; 4],
        gating: GatingMode,
        signal_binary_present: bool,
    ) -> Result<Self> {
        let vertex_spirv = compiler.compile_file(spec.vertex_shader_path, ShaderStage::Vertex)?;
        let fragment_spirv = compiler.compile_file(spec.fragment_shader_path, ShaderStage::Fragment)?;

        let mut reflection = ShaderReflection::new();
        reflection.add_stage(&vertex_spirv, ShaderStage::Vertex)?;
        reflection.add_stage(&fragment_spirv, ShaderStage::Fragment)?;
        reflection.finalize();

        if let Some(expected) = spec.expected_push_constant_bytes {
            reflection.validate_push_constant_size(debug, expected);
        }
        for &(set, binding, size) in &spec.expected_ubo_sizes {
            reflection.validate_ubo_size(debug, set, binding, size);
        }

        let pipeline = build_graphics_pipeline(
            device,
            &spec,
            Some(&reflection),
            render_pass,
            None,
            &vertex_spirv,
            &fragment_spirv,
        )?;

        let depth_enabled = spec.depth_test;
        let has_depth_clear = depth_enabled;

        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        }];
        if has_depth_clear {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            });
        }

        let auto_buffer_specs = reflection
            .descriptor_sets()
            .into_iter()
            .flat_map(|set_info| {
                set_info
                    .bindings
                    .into_iter()
                    .filter(|b| b.block_size > 0)
                    .map(move |b| (set_info.set, b))
            })
            .collect::<Vec<_>>();

        let timeline = Semaphore::new(device.shared.clone(), SemaphoreType::Timeline, 0)?;

        Ok(Self {
            name,
            debug,
            device: device.shared.clone(),
            destroyed: false,
            pipeline,
            frames: Vec::new(),
            extent: vk::Extent2D { width: 0, height: 0 },
            timeline,
            slot_signal_values: Vec::new(),
            next_signal_value: 1,
            slot_submitted_last: Vec::new(),
            present_semaphores: Vec::new(),
            signal_binary_present,
            auto_buffers: auto_buffer_specs
                .into_iter()
                .map(|(set, binding)| AutoBufferSlot {
                    set,
                    binding: binding.binding,
                    size: binding.block_size as u64,
                    usage: buffer_usage_for_descriptor_type(binding.descriptor_type),
                    buffers: Vec::new(),
                })
                .collect(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: Vec::new(),
            gating,
            last_run_time: 0.0,
            clear_values,
            record_fn: None,
            post_record_fn: None,
        })
    }

    /// Number of ring slots currently allocated (0 before `create_frame_resources`).
    pub fn slot_count(&self) -> usize {
        self.frames.len()
    }

    pub fn set_record_fn(&mut self, f: RecordFn) {
        self.record_fn = Some(f);
    }

    pub fn set_post_record_fn(&mut self, f: RecordFn) {
        self.post_record_fn = Some(f);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.pipeline.render_pass
    }

    pub fn timeline_semaphore(&self) -> &Semaphore {
        &self.timeline
    }

    pub fn present_semaphore(&self, slot: usize) -> &Semaphore {
        &self.present_semaphores[slot]
    }

    pub fn latest_signal_value(&self) -> u64 {
        self.next_signal_value.saturating_sub(1)
    }

    pub fn set_gating(&mut self, gating: GatingMode) {
        self.gating = gating;
    }

    pub fn should_submit(&self, elapsed: f64, is_vsync: bool) -> bool {
        self.gating.should_submit(elapsed, self.last_run_time, is_vsync)
    }

    /// Allocates `count` ring slots: frame resources, framebuffers built
    /// from `attachment_views[slot]` at `extent`, present semaphores, and
    /// a fresh ring of auto-buffers + descriptor sets. `slot_signal_values`
    /// resets to zero but `next_signal_value` is left untouched.
    pub fn create_frame_resources(
        &mut self,
        device: &Device,
        attachment_views: &[Vec<vk::ImageView>],
        extent: vk::Extent2D,
    ) -> Result<()> {
        let count = attachment_views.len() as u32;
        self.extent = extent;
        self.frames = create_frame_resources(device, count)?;

        for (slot, frame) in self.frames.iter_mut().enumerate() {
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(self.pipeline.render_pass)
                .attachments(&attachment_views[slot])
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            frame.framebuffer = Some(unsafe { device.raw().create_framebuffer(&info, None)? });
        }

        self.present_semaphores = (0..count)
            .map(|_| Semaphore::new(device.shared.clone(), SemaphoreType::Binary, 0))
            .collect::<Result<_>>()?;

        self.slot_signal_values = vec![0; count as usize];
        self.slot_submitted_last = vec![false; count as usize];

        self.create_auto_buffers_and_descriptors(device, count)?;

        Ok(())
    }

    fn create_auto_buffers_and_descriptors(&mut self, device: &Device, count: u32) -> Result<()> {
        for slot_buffer in &mut self.auto_buffers {
            slot_buffer.buffers = (0..count)
                .map(|i| {
                    Buffer::new(
                        device,
                        BufferDescriptor {
                            name: &format!("{}-auto-{}-{}-{}", self.name, slot_buffer.set, slot_buffer.binding, i),
                            size: slot_buffer.size,
                            usage: slot_buffer.usage,
                            location: MemoryLocation::CpuToGpu,
                        },
                    )
                })
                .collect::<Result<_>>()?;
        }

        if self.auto_buffers.is_empty() || self.pipeline.descriptor_set_layouts.is_empty() {
            return Ok(());
        }

        let mut pool_sizes_by_type: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for slot_buffer in &self.auto_buffers {
            let ty = if slot_buffer.usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
                vk::DescriptorType::UNIFORM_BUFFER
            } else {
                vk::DescriptorType::STORAGE_BUFFER
            };
            *pool_sizes_by_type.entry(ty).or_insert(0) += count;
        }
        let pool_sizes = pool_sizes_by_type
            .into_iter()
            .map(|(ty, descriptor_count)| vk::DescriptorPoolSize::default().ty(ty).descriptor_count(descriptor_count))
            .collect::<Vec<_>>();

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(count)
            .pool_sizes(&pool_sizes);
        self.descriptor_pool = unsafe { device.raw().create_descriptor_pool(&pool_info, None)? };

        let layouts = vec![self.pipeline.descriptor_set_layouts[0]; count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        self.descriptor_sets = unsafe { device.raw().allocate_descriptor_sets(&alloc_info)? };

        for (slot, &set) in self.descriptor_sets.iter().enumerate() {
            let buffer_infos = self
                .auto_buffers
                .iter()
                .map(|b| {
                    vec![vk::DescriptorBufferInfo::default()
                        .buffer(b.buffers[slot].raw())
                        .offset(0)
                        .range(b.size)]
                })
                .collect::<Vec<_>>();

            let writes = self
                .auto_buffers
                .iter()
                .zip(buffer_infos.iter())
                .map(|(b, info)| {
                    let ty = if b.usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
                        vk::DescriptorType::UNIFORM_BUFFER
                    } else {
                        vk::DescriptorType::STORAGE_BUFFER
                    };
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(b.binding)
                        .descriptor_type(ty)
                        .buffer_info(info)
                })
                .collect::<Vec<_>>();

            unsafe { device.raw().update_descriptor_sets(&writes, &[]) };
        }

        Ok(())
    }

    /// Destroys every per-slot resource (framebuffers, auto-buffers,
    /// descriptor pool, present semaphores, command pools). Calling this
    /// twice in a row is a no-op on the second call. Uses the group's own
    /// stored device handle rather than taking one, so it can be driven
    /// from `Drop` as well as from `resize`/`destroy`.
    pub fn destroy_frame_resources(&mut self) {
        if self.descriptor_pool != vk::DescriptorPool::null() {
            unsafe { self.device.raw.destroy_descriptor_pool(self.descriptor_pool, None) };
            self.descriptor_pool = vk::DescriptorPool::null();
        }
        self.descriptor_sets.clear();
        for slot_buffer in &mut self.auto_buffers {
            slot_buffer.buffers.clear();
        }
        self.present_semaphores.clear();
        destroy_frame_resources(&self.device.raw, &mut self.frames);
    }

    /// Writes `data` into the auto-buffer registered at `(set, binding)`
    /// for `slot`, if one was registered by reflection. Meant to be called
    /// by the frame-loop owner between `begin_frame(slot, ..)` (whose wait
    /// guarantees the GPU is done with that slot's prior contents) and
    /// `submit(slot, ..)`. Record closures have no back-reference to this
    /// group, so unlike the source engine's `ubo(set, binding)` accessor —
    /// reachable from inside the record callback — this one is driven from
    /// the outside with an explicit slot index.
    pub fn write_auto_buffer<T: bytemuck::Pod>(&mut self, slot: usize, set: u32, binding: u32, data: &[T]) {
        if let Some(b) = self.auto_buffers.iter_mut().find(|b| b.set == set && b.binding == binding) {
            b.buffers[slot].write(data, 0);
        }
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline.layout
    }

    /// Waits for `slot`'s previous submission (if any) to complete, then
    /// records whether this call intends to submit: the next call to
    /// `begin_frame` on this slot will only wait if `will_submit` was true
    /// last time and the slot has a nonzero signaled value.
    pub fn begin_frame(&mut self, slot: usize, will_submit: bool) -> Result<()> {
        if self.slot_submitted_last[slot] && self.slot_signal_values[slot] > 0 {
            self.timeline.wait_at_least(self.slot_signal_values[slot])?;
        }
        self.slot_submitted_last[slot] = will_submit;
        Ok(())
    }

    pub fn submit(&mut self, slot: usize, waits: &[SemaphoreSubmit], queue: &Queue, elapsed_time: f64) -> Result<()> {
        self.last_run_time = elapsed_time;

        let frame = &self.frames[slot];
        frame.command_pool.reset()?;
        let cmd = &frame.command_buffer;
        cmd.begin()?;

        cmd.begin_render_pass(
            self.pipeline.render_pass,
            frame.framebuffer.expect("frame resources created"),
            self.extent,
            &self.clear_values,
        );
        cmd.set_viewport_scissor(self.extent);
        cmd.bind_pipeline(self.pipeline.pipeline);
        if let Some(&set) = self.descriptor_sets.get(slot) {
            cmd.bind_descriptor_set(self.pipeline.layout, set);
        }
        if let Some(record_fn) = &self.record_fn {
            record_fn(cmd, slot);
        }
        cmd.end_render_pass();

        if let Some(post_record_fn) = &self.post_record_fn {
            post_record_fn(cmd, slot);
        }

        cmd.end()?;

        let signal_value = self.next_signal_value;
        self.next_signal_value += 1;
        self.slot_signal_values[slot] = signal_value;

        let mut signals = vec![SemaphoreSubmit::timeline(
            &self.timeline,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            signal_value,
        )];
        if self.signal_binary_present {
            signals.push(SemaphoreSubmit::binary(
                &self.present_semaphores[slot],
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            ));
        }

        queue.submit(std::slice::from_ref(&cmd.raw), waits, &signals)?;

        Ok(())
    }

    /// Blocks until every submission made on this group has completed.
    pub fn drain(&self) -> Result<()> {
        if self.next_signal_value <= 1 {
            return Ok(());
        }
        self.timeline.wait_at_least(self.next_signal_value - 1)
    }

    /// Tears down the pipeline, layout, set layouts, render pass and every
    /// per-slot resource. Idempotent; safe to call more than once (the
    /// `Drop` impl relies on this to avoid a double-destroy when the owner
    /// already called this explicitly).
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.destroy_frame_resources();
        unsafe {
            self.device.raw.destroy_pipeline(self.pipeline.pipeline, None);
            self.device.raw.destroy_pipeline_layout(self.pipeline.layout, None);
            for layout in self.pipeline.descriptor_set_layouts.drain(..) {
                self.device.raw.destroy_descriptor_set_layout(layout, None);
            }
            self.device.raw.destroy_render_pass(self.pipeline.render_pass, None);
        }
    }
}

impl Drop for ExecutionGroup {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        if let Err(err) = self.drain() {
            log::error!("execution group '{}' drain on drop failed: {err}", self.name);
        }
        self.destroy();
    }
}

/// Builder for `ExecutionGroup::new`, collecting the pieces the generic
/// constructor needs without an unwieldy positional-argument signature.
pub struct ExecutionGroupBuilder<'a> {
    name: String,
    spec: PipelineSpec<'a>,
    render_pass: Option<vk::RenderPass>,
    debug: bool,
    clear_color: [f32; 4],
    gating: GatingMode,
    signal_binary_present: bool,
}

impl<'a> ExecutionGroupBuilder<'a> {
    pub fn render_pass(mut self, render_pass: vk::RenderPass) -> Self {
        self.render_pass = Some(render_pass);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn gating(mut self, gating: GatingMode) -> Self {
        self.gating = gating;
        self
    }

    pub fn signal_binary_present(mut self, signal: bool) -> Self {
        self.signal_binary_present = signal;
        self
    }

    /// `render_pass(..)` may be left unset: `ExecutionGroup::new` then
    /// creates one from `spec.render_pass_recipe`.
    pub fn build(self, device: &Device, compiler: &ShaderCompiler) -> Result<ExecutionGroup> {
        ExecutionGroup::new(
            device,
            compiler,
            self.name,
            self.spec,
            self.render_pass,
            self.debug,
            self.clear_color,
            self.gating,
            self.signal_binary_present,
        )
    }
}

