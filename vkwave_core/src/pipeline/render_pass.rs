use anyhow::Result;
use ash::vk;

use crate::vulkan::device::Device;

/// Three standard render-pass recipes, grounded on the source engine's
/// `make_scene_renderpass` / `make_composite_renderpass` and this spec's
/// explicit overlay-chaining requirement. Each attaches an
/// external-to-subpass dependency covering the stages its attachments use.
pub struct SceneRenderPassDesc {
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
    pub samples: vk::SampleCountFlags,
}

/// Which of the three standard recipes the pipeline builder should use to
/// create a render pass when the caller doesn't supply an existing one.
#[derive(Clone, Copy, Debug)]
pub enum RenderPassRecipe {
    Scene { color_format: vk::Format, depth_format: Option<vk::Format> },
    Composite { color_format: vk::Format },
    Overlay { color_format: vk::Format },
}

/// Dispatches to the matching recipe function, filling in `samples` for the
/// scene recipe (the only one that supports MSAA).
pub fn create_render_pass_from_recipe(
    device: &Device,
    recipe: RenderPassRecipe,
    samples: vk::SampleCountFlags,
) -> Result<vk::RenderPass> {
    match recipe {
        RenderPassRecipe::Scene { color_format, depth_format } => create_scene_render_pass(
            device,
            &SceneRenderPassDesc { color_format, depth_format, samples },
        ),
        RenderPassRecipe::Composite { color_format } => create_composite_render_pass(device, color_format),
        RenderPassRecipe::Overlay { color_format } => create_overlay_render_pass(device, color_format),
    }
}

pub fn create_scene_render_pass(device: &Device, desc: &SceneRenderPassDesc) -> Result<vk::RenderPass> {
    let msaa = desc.samples != vk::SampleCountFlags::TYPE_1;

    let mut attachments = Vec::new();
    let color_attachment_index = attachments.len() as u32;
    attachments.push(
        vk::AttachmentDescription::default()
            .format(desc.color_format)
            .samples(desc.samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(if msaa {
                vk::AttachmentStoreOp::DONT_CARE
            } else {
                vk::AttachmentStoreOp::STORE
            })
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(if msaa {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            }),
    );

    let depth_attachment_index = desc.depth_format.map(|format| {
        let index = attachments.len() as u32;
        attachments.push(
            vk::AttachmentDescription::default()
                .format(format)
                .samples(desc.samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                .stencil_store_op(vk::AttachmentStoreOp::STORE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
        index
    });

    let resolve_attachment_index = msaa.then(|| {
        let index = attachments.len() as u32;
        attachments.push(
            vk::AttachmentDescription::default()
                .format(desc.color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        );
        index
    });

    let color_ref = [vk::AttachmentReference::default()
        .attachment(color_attachment_index)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
    let depth_ref = depth_attachment_index.map(|i| {
        vk::AttachmentReference::default()
            .attachment(i)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
    });
    let resolve_ref = resolve_attachment_index.map(|i| {
        vk::AttachmentReference::default()
            .attachment(i)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
    });

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_ref);
    if let Some(depth_ref) = depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }
    if let Some(resolve_ref) = resolve_ref.as_ref() {
        subpass = subpass.resolve_attachments(std::slice::from_ref(resolve_ref));
    }

    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));

    Ok(unsafe { device.raw().create_render_pass(&info, None)? })
}

pub fn create_composite_render_pass(device: &Device, color_format: vk::Format) -> Result<vk::RenderPass> {
    let attachment = [vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];

    let color_ref = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_ref);

    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachment)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));

    Ok(unsafe { device.raw().create_render_pass(&info, None)? })
}

/// Load-preserving: initial and final layouts are both `PRESENT_SRC_KHR`,
/// so an overlay chains directly after the composite pass without an
/// intervening layout transition.
pub fn create_overlay_render_pass(device: &Device, color_format: vk::Format) -> Result<vk::RenderPass> {
    let attachment = [vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::LOAD)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];

    let color_ref = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_ref);

    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachment)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));

    Ok(unsafe { device.raw().create_render_pass(&info, None)? })
}
