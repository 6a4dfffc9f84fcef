use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    fn to_shaderc_kind(self) -> shaderc::ShaderKind {
        match self {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        }
    }

    pub fn to_vulkan_stage_flag(self) -> ash::vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => ash::vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => ash::vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

const SHADER_PREFIX: &str = "#version 460 core\n\
#extension GL_EXT_scalar_block_layout : require\n\
#extension GL_EXT_shader_explicit_arithmetic_types : require\n";

/// Compiles GLSL source to SPIR-V with `shaderc`, the same compiler the
/// original engine drove directly through its C++ API rather than shelling
/// out to a standalone validator binary.
pub struct ShaderCompiler {
    compiler: shaderc::Compiler,
    optimize: bool,
    debug_info: bool,
}

impl ShaderCompiler {
    pub fn new(optimize: bool, debug_info: bool) -> Result<Self> {
        let compiler =
            shaderc::Compiler::new().context("failed to initialize shaderc compiler")?;
        Ok(Self {
            compiler,
            optimize,
            debug_info,
        })
    }

    pub fn compile_file(&self, path: &Path, stage: ShaderStage) -> Result<Vec<u32>> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read shader source {}", path.display()))?;
        let source = resolve_includes(&source, path.parent().unwrap_or(Path::new(".")))?;
        let full_source = format!("{SHADER_PREFIX}{source}");

        let mut options = shaderc::CompileOptions::new()
            .context("failed to create shaderc compile options")?;
        options.set_target_env(shaderc::TargetEnv::Vulkan, shaderc::EnvVersion::Vulkan1_2 as u32);
        options.set_optimization_level(if self.optimize {
            shaderc::OptimizationLevel::Performance
        } else {
            shaderc::OptimizationLevel::Zero
        });
        if self.debug_info {
            options.set_generate_debug_info();
        }

        let file_name = path.to_string_lossy();
        let binary_result = self
            .compiler
            .compile_into_spirv(
                &full_source,
                stage.to_shaderc_kind(),
                &file_name,
                "main",
                Some(&options),
            )
            .with_context(|| format!("shader compilation failed for {file_name}"))?;

        Ok(binary_result.as_binary().to_vec())
    }
}

/// Resolves `#pragma INCLUDE("path")` directives relative to `base_dir`,
/// recursively. This mirrors the lightweight include scheme shared GLSL
/// snippets (common UBOs, lighting helpers) rely on across stages.
fn resolve_includes(source: &str, base_dir: &Path) -> Result<String> {
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("#pragma INCLUDE(") {
            let path_str = rest
                .trim_end()
                .trim_end_matches(')')
                .trim_matches(|c| c == '"' || c == '\'');
            let include_path: PathBuf = base_dir.join(path_str);
            let included = fs::read_to_string(&include_path).with_context(|| {
                format!("failed to resolve include {}", include_path.display())
            })?;
            let included = resolve_includes(&included, include_path.parent().unwrap_or(base_dir))?;
            out.push_str(&included);
            out.push('\n');
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    Ok(out)
}
