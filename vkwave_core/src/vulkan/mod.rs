pub mod buffer;
pub mod command;
pub mod device;
pub mod image;
mod instance;
pub mod queue;
pub mod semaphore;
mod surface;
pub mod swapchain;

pub use ash::vk;
