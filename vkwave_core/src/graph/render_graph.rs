use std::time::Instant;

use anyhow::Result;
use ash::vk;

use crate::graph::execution_group::ExecutionGroup;
use crate::vulkan::device::Device;
use crate::vulkan::image::{Image, ImageDescriptor};
use crate::vulkan::queue::SemaphoreSubmit;
use crate::vulkan::semaphore::{Semaphore, SemaphoreType};
use crate::vulkan::swapchain::{Swapchain, SwapchainError};

/// Supplies (and, on resize, rebuilds) the attachment image views an
/// offscreen group's framebuffers bind. Implementations own the backing
/// GPU images; the graph only ever sees views.
pub trait OffscreenAttachments {
    /// Returns one `Vec<ImageView>` per ring slot (`depth` entries), sized
    /// to `extent`. Called once by `RenderGraph::build` and again by
    /// `RenderGraph::resize` after the swapchain has already been recreated
    /// at the new extent.
    fn attachment_views(&mut self, device: &Device, extent: vk::Extent2D, depth: u32) -> Result<Vec<Vec<vk::ImageView>>>;
}

/// A single device-local color image ring, reallocated at the requested
/// extent/depth on every call. The common case for an HDR scene target: no
/// MSAA, no depth attachment (those are layered on by a richer
/// `OffscreenAttachments` impl when a concrete pass needs them).
pub struct OwnedColorTarget {
    name: &'static str,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    images: Vec<Image>,
}

impl OwnedColorTarget {
    pub fn new(name: &'static str, format: vk::Format, extra_usage: vk::ImageUsageFlags) -> Self {
        Self {
            name,
            format,
            usage: extra_usage | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            images: Vec::new(),
        }
    }

    pub fn image(&self, slot: usize) -> &Image {
        &self.images[slot]
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl OffscreenAttachments for OwnedColorTarget {
    fn attachment_views(&mut self, device: &Device, extent: vk::Extent2D, depth: u32) -> Result<Vec<Vec<vk::ImageView>>> {
        self.images = (0..depth)
            .map(|i| {
                Image::new(
                    device,
                    ImageDescriptor {
                        name: &format!("{}-{}", self.name, i),
                        extent,
                        format: self.format,
                        usage: self.usage,
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        samples: vk::SampleCountFlags::TYPE_1,
                    },
                )
            })
            .collect::<Result<_>>()?;
        Ok(self.images.iter().map(|img| vec![img.view]).collect())
    }
}

struct OffscreenSlot {
    group: ExecutionGroup,
    attachments: Box<dyn OffscreenAttachments>,
}

/// Composes an ordered list of offscreen `ExecutionGroup`s and exactly one
/// present group into a single, correctly-synchronized frame. Owns the
/// acquire-semaphore ring and the CPU-side wall clock; delegates GPU
/// synchronization entirely to the groups' timeline counters plus one
/// binary present semaphore per swapchain image.
pub struct RenderGraph {
    offscreen: Vec<OffscreenSlot>,
    present: Option<ExecutionGroup>,

    acquire_semaphores: Vec<Semaphore>,
    sem_to_image: Vec<Option<u32>>,
    cpu_frame: u64,

    requested_offscreen_depth: Option<u32>,
    resolved_offscreen_depth: u32,

    start_time: Option<Instant>,
    prev_time: Option<Instant>,
    elapsed: f64,
    delta: f64,
}

impl RenderGraph {
    /// `offscreen_depth`: ring depth for offscreen groups. `None` defaults
    /// to the swapchain's image count at `build()` time.
    pub fn new(offscreen_depth: Option<u32>) -> Self {
        Self {
            offscreen: Vec::new(),
            present: None,
            acquire_semaphores: Vec::new(),
            sem_to_image: Vec::new(),
            cpu_frame: 0,
            requested_offscreen_depth: offscreen_depth,
            resolved_offscreen_depth: 1,
            start_time: None,
            prev_time: None,
            elapsed: 0.0,
            delta: 0.0,
        }
    }

    pub fn add_offscreen_group(&mut self, group: ExecutionGroup, attachments: Box<dyn OffscreenAttachments>) {
        self.offscreen.push(OffscreenSlot { group, attachments });
    }

    pub fn set_present_group(&mut self, group: ExecutionGroup) {
        self.present = Some(group);
    }

    pub fn cpu_frame(&self) -> u64 {
        self.cpu_frame
    }

    pub fn elapsed_time(&self) -> f64 {
        self.elapsed
    }

    pub fn delta_time(&self) -> f64 {
        self.delta
    }

    pub fn offscreen_group_mut(&mut self, index: usize) -> &mut ExecutionGroup {
        &mut self.offscreen[index].group
    }

    pub fn last_offscreen_group_mut(&mut self) -> Option<&mut ExecutionGroup> {
        self.offscreen.last_mut().map(|s| &mut s.group)
    }

    pub fn present_group_mut(&mut self) -> &mut ExecutionGroup {
        self.present.as_mut().expect("present group must be set")
    }

    pub fn offscreen_depth(&self) -> u32 {
        self.resolved_offscreen_depth
    }

    /// Allocates every group's per-slot resources at the swapchain's
    /// current extent. Must be called once before the first `render_frame`,
    /// and again (via `resize`) whenever the swapchain is recreated.
    pub fn build(&mut self, device: &Device, swapchain: &Swapchain) -> Result<()> {
        let n_sw = swapchain.image_count();
        self.acquire_semaphores = (0..n_sw)
            .map(|_| Semaphore::new(device.shared.clone(), SemaphoreType::Binary, 0))
            .collect::<Result<_>>()?;
        self.sem_to_image = vec![None; n_sw as usize];

        self.resolved_offscreen_depth = self.requested_offscreen_depth.unwrap_or(n_sw).max(1);

        let extent = swapchain.extent();
        for slot in &mut self.offscreen {
            let views = slot.attachments.attachment_views(device, extent, self.resolved_offscreen_depth)?;
            slot.group.create_frame_resources(device, &views, extent)?;
        }

        let present = self.present.as_mut().expect("present group must be set before build()");
        let present_views = swapchain.image_views().iter().map(|&v| vec![v]).collect::<Vec<_>>();
        present.create_frame_resources(device, &present_views, extent)?;

        Ok(())
    }

    /// Runs one frame. Returns `Ok(false)` when the swapchain reported
    /// out-of-date (caller must call `resize` and retry), `Ok(true)`
    /// otherwise — including frames where the present gate skipped
    /// presentation entirely.
    pub fn render_frame(&mut self, device: &Device, swapchain: &Swapchain) -> Result<bool> {
        self.tick_clock();
        let elapsed = self.elapsed;

        let offscreen_slot = (self.cpu_frame % self.resolved_offscreen_depth as u64) as usize;
        for slot in &mut self.offscreen {
            slot.group.begin_frame(offscreen_slot, true)?;
            slot.group.submit(offscreen_slot, &[], device.graphics_queue(), elapsed)?;
        }

        let is_vsync = swapchain.is_vsync();
        let present = self.present.as_mut().expect("present group must be set before render_frame()");
        if !present.should_submit(elapsed, is_vsync) {
            self.cpu_frame += 1;
            return Ok(true);
        }

        let n_sw = self.acquire_semaphores.len() as u64;
        let sem_index = (self.cpu_frame % n_sw) as usize;

        if let Some(prior_image_index) = self.sem_to_image[sem_index] {
            present.begin_frame(prior_image_index as usize, false)?;
        }

        let (image_index, suboptimal) = match swapchain.acquire_next_image(self.acquire_semaphores[sem_index].raw()) {
            Ok(v) => v,
            Err(err) if is_out_of_date(&err) => {
                self.cpu_frame += 1;
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        if suboptimal {
            log::debug!("swapchain suboptimal at image index {image_index}");
        }
        self.sem_to_image[sem_index] = Some(image_index);

        let mut waits = vec![SemaphoreSubmit::binary(
            &self.acquire_semaphores[sem_index],
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        )];
        if let Some(last) = self.offscreen.last() {
            waits.push(SemaphoreSubmit::timeline(
                last.group.timeline_semaphore(),
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                last.group.latest_signal_value(),
            ));
        }

        present.begin_frame(image_index as usize, true)?;
        present.submit(image_index as usize, &waits, device.graphics_queue(), elapsed)?;

        let present_semaphore = present.present_semaphore(image_index as usize).raw();
        match swapchain.queue_present(device.graphics_queue().raw(), &[present_semaphore], image_index) {
            Ok(_) => {}
            Err(err) if is_out_of_date(&err) => {
                self.cpu_frame += 1;
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        self.cpu_frame += 1;
        Ok(true)
    }

    /// Waits for every group's in-flight work, then waits for device idle
    /// as an outer safety net. Only used at teardown or before a resize.
    pub fn drain(&self, device: &Device) -> Result<()> {
        for slot in &self.offscreen {
            slot.group.drain()?;
        }
        if let Some(present) = &self.present {
            present.drain()?;
        }
        device.wait_for_device_idle()
    }

    /// Drains, tears down every group's frame resources, drops the
    /// acquire-semaphore ring, and rebuilds against the (already
    /// recreated) swapchain. `next_signal_value` is untouched by this path —
    /// only `destroy_frame_resources` runs, never group destruction.
    pub fn resize(&mut self, device: &Device, swapchain: &Swapchain) -> Result<()> {
        self.drain(device)?;

        if let Some(present) = &mut self.present {
            present.destroy_frame_resources();
        }
        for slot in &mut self.offscreen {
            slot.group.destroy_frame_resources();
        }
        self.acquire_semaphores.clear();
        self.sem_to_image.clear();

        self.build(device, swapchain)
    }

    /// Tears down every group (frame resources, pipeline, render pass,
    /// timeline). The caller must have drained already. Idempotent, since
    /// each group's own `destroy` is.
    pub fn destroy(&mut self) {
        if let Some(mut present) = self.present.take() {
            present.destroy();
        }
        for mut slot in self.offscreen.drain(..) {
            slot.group.destroy();
        }
    }
}

/// Drains every group (logging, not propagating, any wait failure) before
/// the groups themselves drop and self-destruct. Mirrors `ExecutionGroup`'s
/// own `Drop`, giving the graph the same RAII guarantee its groups have
/// individually: a caller that forgets `drain()` + `destroy()` no longer
/// leaks or races a GPU wait against resource destruction.
impl Drop for RenderGraph {
    fn drop(&mut self) {
        for slot in &self.offscreen {
            if let Err(err) = slot.group.drain() {
                log::error!("offscreen group '{}' drain on drop failed: {err}", slot.group.name());
            }
        }
        if let Some(present) = &self.present {
            if let Err(err) = present.drain() {
                log::error!("present group drain on drop failed: {err}");
            }
        }
    }
}

impl RenderGraph {
    fn tick_clock(&mut self) {
        let now = Instant::now();
        let start = *self.start_time.get_or_insert(now);
        let prev = self.prev_time.unwrap_or(now);
        self.delta = (now - prev).as_secs_f64();
        self.elapsed = (now - start).as_secs_f64();
        self.prev_time = Some(now);
    }
}

fn is_out_of_date(err: &anyhow::Error) -> bool {
    err.downcast_ref::<SwapchainError>()
        .map(|e| matches!(e, SwapchainError::OutOfDate))
        .unwrap_or(false)
}
