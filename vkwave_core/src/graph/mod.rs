pub mod execution_group;
pub mod frame_resources;
pub mod gating;
pub mod render_graph;
pub mod screenshot;

pub use execution_group::{ExecutionGroup, ExecutionGroupBuilder, RecordFn};
pub use frame_resources::FrameResources;
pub use gating::GatingMode;
pub use render_graph::{OffscreenAttachments, OwnedColorTarget, RenderGraph};
pub use screenshot::ScreenshotCapture;
