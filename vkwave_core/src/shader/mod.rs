pub mod compiler;
pub mod reflection;

pub use compiler::{ShaderCompiler, ShaderStage};
pub use reflection::{DescriptorBindingInfo, DescriptorSetInfo, PushConstantRange, ShaderReflection};
