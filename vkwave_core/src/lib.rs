pub mod config;
pub mod graph;
pub mod pass;
pub mod pipeline;
pub mod shader;
pub mod vulkan;
