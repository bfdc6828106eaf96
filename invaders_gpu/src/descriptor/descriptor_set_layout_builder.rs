use ash::vk;

use crate::descriptor::DescriptorSetLayout;
use crate::device::LogicalDevice;
use crate::GpuError;

#[derive(Clone, Debug, Default)]
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<DescriptorSetLayoutBinding<'a>>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DescriptorSetLayoutBinding<'a> {
    handle: vk::DescriptorSetLayoutBinding<'a>,
}

impl DescriptorSetLayoutBinding<'_> {
    pub fn binding(mut self, binding: u32) -> Self {
        self.handle.binding = binding;
        self
    }

    pub fn descriptor_type(mut self, ty: vk::DescriptorType) -> Self {
        self.handle.descriptor_type = ty;
        self
    }

    pub fn descriptor_count(mut self, count: u32) -> Self {
        self.handle.descriptor_count = count;
        self
    }

    pub fn stage_flags(mut self, stage_flags: vk::ShaderStageFlags) -> Self {
        self.handle.stage_flags = stage_flags;
        self
    }
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Adds a single descriptor binding visible to `stage_flags`
    pub fn add_binding(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Builds the descriptor layout
    pub fn build(
        self,
        device: LogicalDevice,
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> Result<DescriptorSetLayout, GpuError> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> =
            self.bindings.iter().map(|binding| binding.handle).collect();
        DescriptorSetLayout::new(device, &bindings, flags)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::HeadlessBackend;

    #[test]
    fn build_keeps_every_binding() {
        let backend = Arc::new(HeadlessBackend::default());
        let device = LogicalDevice::from_arc(backend.clone());
        let layout = DescriptorSetLayoutBuilder::default()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX,
            )
            .add_binding(
                1,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build(device, vk::DescriptorSetLayoutCreateFlags::empty())
            .unwrap();
        assert_eq!(
            backend.layout_bindings(layout.handle()).unwrap(),
            vec![
                (0, vk::DescriptorType::UNIFORM_BUFFER),
                (1, vk::DescriptorType::STORAGE_BUFFER),
            ]
        );
        drop(layout);
        assert_eq!(backend.live_objects().descriptor_set_layouts, 0);
    }
}
