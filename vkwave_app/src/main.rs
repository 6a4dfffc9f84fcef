use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use parking_lot::Mutex;
use winit::dpi;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::raw_window_handle::{HasDisplayHandle, HasRawDisplayHandle, HasRawWindowHandle, HasWindowHandle};
use winit::window::WindowBuilder;

use vkwave_core::config::AppConfig;
use vkwave_core::graph::{ExecutionGroup, GatingMode, OffscreenAttachments, OwnedColorTarget, RenderGraph, ScreenshotCapture};
use vkwave_core::pass::{Pass, SolidColorPass};
use vkwave_core::pipeline::{create_composite_render_pass, create_scene_render_pass, SceneRenderPassDesc};
use vkwave_core::shader::ShaderCompiler;
use vkwave_core::vulkan::device::Device;
use vkwave_core::vulkan::swapchain::Swapchain;
use vkwave_core::vulkan::vk;

const HDR_COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
const SCENE_CLEAR_COLOR: [f32; 4] = [0.01, 0.01, 0.02, 1.0];
const PRESENT_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// A GPU rendering demo exercising the render graph end-to-end with a
/// trivial solid-color pass: no scene loading, no PBR shading.
#[derive(Parser, Debug)]
#[command(name = "vkwave")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "vkwave.toml")]
    config: PathBuf,

    /// Exit after N CPU frames. 0 means unlimited.
    #[arg(long)]
    max_frames: Option<u64>,

    /// One of immediate|mailbox|fifo|fifo_relaxed.
    #[arg(long)]
    present_mode: Option<String>,

    /// Unused by the solid-color demo pass; accepted for CLI-surface parity.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Unused by the solid-color demo pass; accepted for CLI-surface parity.
    #[arg(long)]
    hdr: Option<PathBuf>,

    /// Emit a shell completion script to stdout and exit.
    #[arg(long)]
    complete: Option<clap_complete::Shell>,
}

/// Writes each group's clear color into every ring slot's auto-UBO.
/// `ClearColorBlock` never changes frame to frame in this demo, and the
/// present group's live slot index (the acquired swapchain image index) is
/// only resolved deep inside `render_frame`, so the simplest correct fix is
/// to populate every slot once, right after (re)allocation, rather than
/// threading a live index back out through the graph's API.
fn write_clear_colors(graph: &mut RenderGraph) {
    let scene = graph.offscreen_group_mut(0);
    for slot in 0..scene.slot_count() {
        scene.write_auto_buffer(slot, 0, 0, &[SCENE_CLEAR_COLOR]);
    }
    let present = graph.present_group_mut();
    for slot in 0..present.slot_count() {
        present.write_auto_buffer(slot, 0, 0, &[PRESENT_CLEAR_COLOR]);
    }
}

fn parse_present_mode(name: &str) -> Result<vk::PresentModeKHR> {
    match name {
        "immediate" => Ok(vk::PresentModeKHR::IMMEDIATE),
        "mailbox" => Ok(vk::PresentModeKHR::MAILBOX),
        "fifo" => Ok(vk::PresentModeKHR::FIFO),
        "fifo_relaxed" => Ok(vk::PresentModeKHR::FIFO_RELAXED),
        other => Err(anyhow::anyhow!("unknown present mode {other:?}")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(shell) = cli.complete {
        clap_complete::generate(shell, &mut Cli::command(), "vkwave", &mut io::stdout());
        return Ok(());
    }

    let mut config = AppConfig::load(&cli.config)?;
    if let Some(max_frames) = cli.max_frames {
        config.debug.max_frames = max_frames;
    }
    if let Some(present_mode) = &cli.present_mode {
        config.vulkan.present_mode = present_mode.clone();
    }

    let env = env_logger::Env::default().filter_or("VKWAVE_LOG", &config.debug.log_level);
    env_logger::init_from_env(env);

    if let Err(err) = run(config) {
        log::error!("fatal: {err:?}");
        std::process::exit(1);
    }
    Ok(())
}

fn run(config: AppConfig) -> Result<()> {
    let event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title(&config.window.title)
        .with_inner_size(dpi::PhysicalSize::new(config.window.width, config.window.height))
        .build(&event_loop)?;

    let debug_enabled = true;
    let device = Arc::new(Device::new(
        window.window_handle()?.raw_window_handle()?,
        window.display_handle()?.raw_display_handle()?,
        debug_enabled,
    )?);

    let present_mode = parse_present_mode(&config.vulkan.present_mode)?;
    let mut swapchain = Swapchain::new(&device, present_mode, config.vulkan.swapchain_images)?;

    let compiler = ShaderCompiler::new(config.debug.shader_optimize, config.debug.shader_debug)?;

    let scene_render_pass = create_scene_render_pass(
        &device,
        &SceneRenderPassDesc {
            color_format: HDR_COLOR_FORMAT,
            depth_format: None,
            samples: vk::SampleCountFlags::TYPE_1,
        },
    )?;
    let composite_render_pass = create_composite_render_pass(&device, swapchain.image_format())?;

    let scene_pass = SolidColorPass::new("vkwave_app/shaders/solid_color.vert", "vkwave_app/shaders/solid_color.frag");
    let composite_pass = SolidColorPass::new("vkwave_app/shaders/solid_color.vert", "vkwave_app/shaders/solid_color.frag");

    let scene_spec = scene_pass.pipeline_spec();
    let mut scene_group = ExecutionGroup::builder("scene", scene_spec)
        .render_pass(scene_render_pass)
        .debug(debug_enabled)
        .clear_color(SCENE_CLEAR_COLOR)
        .gating(GatingMode::Always)
        .build(&device, &compiler)?;
    scene_group.set_record_fn(Box::new(move |cmd, slot| scene_pass.record(cmd, slot)));

    let composite_spec = composite_pass.pipeline_spec();
    let present_gating = if swapchain.is_vsync() {
        GatingMode::Always
    } else {
        GatingMode::WallClock { hz: 60.0 }
    };
    let mut present_group = ExecutionGroup::builder("present", composite_spec)
        .render_pass(composite_render_pass)
        .debug(debug_enabled)
        .clear_color(PRESENT_CLEAR_COLOR)
        .gating(present_gating)
        .signal_binary_present(true)
        .build(&device, &compiler)?;
    present_group.set_record_fn(Box::new(move |cmd, slot| composite_pass.record(cmd, slot)));

    let color_target = Arc::new(Mutex::new(OwnedColorTarget::new(
        "scene-color",
        HDR_COLOR_FORMAT,
        vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC,
    )));

    let screenshot = Arc::new(Mutex::new(ScreenshotCapture::new("screenshot.png")));
    {
        let screenshot = screenshot.clone();
        let color_target = color_target.clone();
        let device = device.clone();
        scene_group.set_post_record_fn(Box::new(move |cmd, slot| {
            let target = color_target.lock();
            let image = target.image(slot);
            if let Err(err) = screenshot.lock().maybe_record(device.as_ref(), cmd, image) {
                log::error!("screenshot record failed: {err}");
            }
        }));
    }

    let mut graph = RenderGraph::new(None);
    graph.add_offscreen_group(scene_group, Box::new(SharedColorTarget(color_target)) as Box<dyn OffscreenAttachments>);
    graph.set_present_group(present_group);
    graph.build(&device, &swapchain)?;
    write_clear_colors(&mut graph);

    let max_frames = config.debug.max_frames;
    let mut exit_code = 0;

    event_loop.run(move |event, elwt| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => elwt.exit(),
                WindowEvent::Resized(size) => {
                    if size.width > 0 && size.height > 0 {
                        if let Err(err) = swapchain.recreate() {
                            log::error!("swapchain recreate failed: {err}");
                            elwt.exit();
                            return;
                        }
                        if let Err(err) = graph.resize(&device, &swapchain) {
                            log::error!("graph resize failed: {err}");
                            elwt.exit();
                            return;
                        }
                        write_clear_colors(&mut graph);
                    }
                }
                WindowEvent::KeyboardInput {
                    event: KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::F12),
                        state: ElementState::Pressed,
                        ..
                    },
                    ..
                } => {
                    let mut guard = screenshot.lock();
                    if !guard.is_busy() {
                        guard.request();
                        log::info!("screenshot requested");
                    }
                }
                WindowEvent::RedrawRequested => match graph.render_frame(&device, &swapchain) {
                    Ok(true) => {
                        if let Some(group) = graph.last_offscreen_group_mut() {
                            screenshot.lock().on_submitted(group.latest_signal_value());
                            if let Err(err) = screenshot.lock().poll(group.timeline_semaphore()) {
                                log::error!("screenshot poll failed: {err}");
                            }
                        }
                        if max_frames != 0 && graph.cpu_frame() >= max_frames {
                            elwt.exit();
                        }
                    }
                    Ok(false) => {
                        if let Err(err) = swapchain.recreate() {
                            log::error!("swapchain recreate failed: {err}");
                            exit_code = 1;
                            elwt.exit();
                            return;
                        }
                        if let Err(err) = graph.resize(&device, &swapchain) {
                            log::error!("graph resize failed: {err}");
                            exit_code = 1;
                            elwt.exit();
                            return;
                        }
                        write_clear_colors(&mut graph);
                    }
                    Err(err) => {
                        log::error!("render_frame failed: {err:?}");
                        exit_code = 1;
                        elwt.exit();
                    }
                },
                _ => {}
            },
            Event::AboutToWait => window.request_redraw(),
            Event::LoopExiting => {
                if let Err(err) = graph.drain(&device) {
                    log::error!("drain on exit failed: {err}");
                }
                graph.destroy();
            }
            _ => {}
        }
    })?;

    std::process::exit(exit_code);
}

struct SharedColorTarget(Arc<Mutex<OwnedColorTarget>>);

impl OffscreenAttachments for SharedColorTarget {
    fn attachment_views(&mut self, device: &Device, extent: vk::Extent2D, depth: u32) -> Result<Vec<Vec<vk::ImageView>>> {
        self.0.lock().attachment_views(device, extent, depth)
    }
}
