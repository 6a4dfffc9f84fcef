pub mod builder;
pub mod render_pass;

pub use builder::{build_graphics_pipeline, BuiltPipeline, PipelineSpec};
pub use render_pass::{
    create_composite_render_pass, create_overlay_render_pass, create_render_pass_from_recipe,
    create_scene_render_pass, RenderPassRecipe, SceneRenderPassDesc,
};
