use std::collections::BTreeMap;

use anyhow::Result;
use ash::vk;
use spirv_reflect::types::ReflectDescriptorType;

use super::compiler::ShaderStage;

#[derive(Clone, Debug)]
pub struct DescriptorBindingInfo {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stage_flags: vk::ShaderStageFlags,
    /// Nonzero iff `descriptor_type` is a uniform or storage buffer.
    pub block_size: u32,
    pub name: String,
}

#[derive(Clone, Debug, Default)]
pub struct DescriptorSetInfo {
    pub set: u32,
    pub bindings: Vec<DescriptorBindingInfo>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushConstantRange {
    pub offset: u32,
    pub size: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

/// Merged descriptor-set and push-constant layout across every shader
/// stage fed into it, built without a hand-written per-pipeline registry.
///
/// Merge rule: two stages that declare a binding at the same `(set,
/// binding)` must agree on type, array count and block size; their stage
/// masks are OR'd together. Disagreement is a reflection bug in the
/// shaders themselves, not a caller-recoverable condition, so it panics.
#[derive(Default)]
pub struct ShaderReflection {
    sets: BTreeMap<u32, BTreeMap<u32, DescriptorBindingInfo>>,
    push_constants: Vec<PushConstantRange>,
    finalized: bool,
}

impl ShaderReflection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(&mut self, spirv: &[u32], stage: ShaderStage) -> Result<()> {
        debug_assert!(!self.finalized, "cannot add a stage after finalize()");

        let module = spirv_reflect::ShaderModule::load_u32_data(spirv)
            .map_err(|e| anyhow::anyhow!("spirv-reflect failed to load module: {e}"))?;

        let stage_flags = stage.to_vulkan_stage_flag();

        let push_blocks = module
            .enumerate_push_constant_blocks(Some("main"))
            .map_err(|e| anyhow::anyhow!("failed to enumerate push constants: {e}"))?;
        for block in push_blocks {
            self.push_constants.push(PushConstantRange {
                offset: block.offset,
                size: block.size,
                stage_flags,
            });
        }

        let descriptor_sets = module
            .enumerate_descriptor_sets(Some("main"))
            .map_err(|e| anyhow::anyhow!("failed to enumerate descriptor sets: {e}"))?;

        for refl_set in descriptor_sets {
            let set_bindings = self.sets.entry(refl_set.set).or_default();
            for refl_binding in refl_set.bindings {
                let descriptor_type = to_vulkan_descriptor_type(refl_binding.descriptor_type);
                let count = refl_binding.count.max(1);
                let block_size = match descriptor_type {
                    vk::DescriptorType::UNIFORM_BUFFER
                    | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
                    | vk::DescriptorType::STORAGE_BUFFER
                    | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => refl_binding.block.size,
                    _ => 0,
                };

                set_bindings
                    .entry(refl_binding.binding)
                    .and_modify(|existing| {
                        assert_eq!(
                            existing.descriptor_type, descriptor_type,
                            "binding (set={}, binding={}) type mismatch across stages",
                            refl_set.set, refl_binding.binding
                        );
                        assert_eq!(
                            existing.count, count,
                            "binding (set={}, binding={}) count mismatch across stages",
                            refl_set.set, refl_binding.binding
                        );
                        assert_eq!(
                            existing.block_size, block_size,
                            "binding (set={}, binding={}) block size mismatch across stages",
                            refl_set.set, refl_binding.binding
                        );
                        existing.stage_flags |= stage_flags;
                    })
                    .or_insert_with(|| DescriptorBindingInfo {
                        binding: refl_binding.binding,
                        descriptor_type,
                        count,
                        stage_flags,
                        block_size,
                        name: refl_binding.name.clone(),
                    });
            }
        }

        Ok(())
    }

    /// Merges push-constant ranges with identical `(offset, size)` across
    /// stages and sorts sets/bindings ascending. Idempotent.
    pub fn finalize(&mut self) {
        let mut merged: Vec<PushConstantRange> = Vec::new();
        for range in &self.push_constants {
            if let Some(existing) = merged
                .iter_mut()
                .find(|r| r.offset == range.offset && r.size == range.size)
            {
                existing.stage_flags |= range.stage_flags;
            } else {
                merged.push(*range);
            }
        }
        merged.sort_by_key(|r| r.offset);
        self.push_constants = merged;
        self.finalized = true;
    }

    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_constants
    }

    pub fn descriptor_sets(&self) -> Vec<DescriptorSetInfo> {
        self.sets
            .iter()
            .map(|(&set, bindings)| DescriptorSetInfo {
                set,
                bindings: bindings.values().cloned().collect(),
            })
            .collect()
    }

    /// No-op unless `debug` is true (the engine's runtime debug flag, not
    /// the Rust compile-time profile); then asserts the combined
    /// push-constant footprint is exactly `expected_bytes`.
    pub fn validate_push_constant_size(&self, debug: bool, expected_bytes: u32) {
        if !debug {
            return;
        }
        let max_extent = self
            .push_constants
            .iter()
            .map(|r| r.offset + r.size)
            .max()
            .unwrap_or(0);
        assert_eq!(
            max_extent, expected_bytes,
            "push constant footprint {max_extent} does not match expected {expected_bytes}"
        );
    }

    /// No-op unless `debug` is true. See `validate_push_constant_size`.
    pub fn validate_ubo_size(&self, debug: bool, set: u32, binding: u32, expected_bytes: u32) {
        if !debug {
            return;
        }
        let actual = self
            .sets
            .get(&set)
            .and_then(|b| b.get(&binding))
            .map(|b| b.block_size)
            .unwrap_or_else(|| panic!("no reflected binding at (set={set}, binding={binding})"));
        assert_eq!(
            actual, expected_bytes,
            "reflected UBO size {actual} at (set={set}, binding={binding}) does not match expected {expected_bytes}"
        );
    }
}

fn to_vulkan_descriptor_type(ty: ReflectDescriptorType) -> vk::DescriptorType {
    match ty {
        ReflectDescriptorType::Sampler => vk::DescriptorType::SAMPLER,
        ReflectDescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        ReflectDescriptorType::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        ReflectDescriptorType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        ReflectDescriptorType::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        ReflectDescriptorType::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        ReflectDescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        ReflectDescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        ReflectDescriptorType::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        ReflectDescriptorType::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        ReflectDescriptorType::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
        ReflectDescriptorType::AccelerationStructureNV => {
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
        }
        ReflectDescriptorType::Undefined => vk::DescriptorType::UNIFORM_BUFFER,
    }
}

/// Usage flags a buffer backing a reflected binding must be created with.
pub fn buffer_usage_for_descriptor_type(ty: vk::DescriptorType) -> vk::BufferUsageFlags {
    match ty {
        vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => {
            vk::BufferUsageFlags::UNIFORM_BUFFER
        }
        vk::DescriptorType::STORAGE_BUFFER | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => {
            vk::BufferUsageFlags::STORAGE_BUFFER
        }
        _ => vk::BufferUsageFlags::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_push_constant_ranges_with_same_offset_and_size() {
        let mut reflection = ShaderReflection::new();
        reflection.push_constants.push(PushConstantRange {
            offset: 0,
            size: 64,
            stage_flags: vk::ShaderStageFlags::VERTEX,
        });
        reflection.push_constants.push(PushConstantRange {
            offset: 0,
            size: 64,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
        });
        reflection.finalize();

        let ranges = reflection.push_constant_ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!(
            ranges[0].stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn keeps_distinct_ranges_separate() {
        let mut reflection = ShaderReflection::new();
        reflection.push_constants.push(PushConstantRange {
            offset: 0,
            size: 16,
            stage_flags: vk::ShaderStageFlags::VERTEX,
        });
        reflection.push_constants.push(PushConstantRange {
            offset: 16,
            size: 16,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
        });
        reflection.finalize();

        assert_eq!(reflection.push_constant_ranges().len(), 2);
    }

    #[test]
    fn validate_push_constant_size_is_noop_when_debug_is_off() {
        let mut reflection = ShaderReflection::new();
        reflection.push_constants.push(PushConstantRange {
            offset: 0,
            size: 108,
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        });
        reflection.finalize();

        // Wrong expected size would panic if debug were on.
        reflection.validate_push_constant_size(false, 107);
    }

    #[test]
    fn validate_push_constant_size_passes_when_matching() {
        let mut reflection = ShaderReflection::new();
        reflection.push_constants.push(PushConstantRange {
            offset: 0,
            size: 108,
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        });
        reflection.finalize();

        reflection.validate_push_constant_size(true, 108);
    }

    #[test]
    #[should_panic(expected = "does not match expected")]
    fn validate_push_constant_size_panics_on_mismatch_when_debug_is_on() {
        let mut reflection = ShaderReflection::new();
        reflection.push_constants.push(PushConstantRange {
            offset: 0,
            size: 108,
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        });
        reflection.finalize();

        reflection.validate_push_constant_size(true, 107);
    }

    #[test]
    fn validate_ubo_size_passes_when_matching() {
        let mut reflection = ShaderReflection::new();
        reflection.sets.entry(0).or_default().insert(
            0,
            DescriptorBindingInfo {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                block_size: 64,
                name: "clear_color".to_string(),
            },
        );

        reflection.validate_ubo_size(true, 0, 0, 64);
        // Off by default, a wrong expectation would panic if debug were on.
        reflection.validate_ubo_size(false, 0, 0, 63);
    }

    #[test]
    #[should_panic(expected = "does not match expected")]
    fn validate_ubo_size_panics_on_mismatch_when_debug_is_on() {
        let mut reflection = ShaderReflection::new();
        reflection.sets.entry(0).or_default().insert(
            0,
            DescriptorBindingInfo {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                block_size: 64,
                name: "clear_color".to_string(),
            },
        );

        reflection.validate_ubo_size(true, 0, 0, 63);
    }
}
