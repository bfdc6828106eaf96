use ash::vk;
#[allow(unused_imports)]
use tracing::trace;

use crate::device::LogicalDevice;
use crate::traits::Destructible;
use crate::GpuError;

#[derive(Debug)]
pub struct DescriptorSetLayout {
    handle: Option<vk::DescriptorSetLayout>,
    device: LogicalDevice,
}

impl DescriptorSetLayout {
    pub fn new(
        device: LogicalDevice,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> Result<Self, GpuError> {
        let handle = device
            .get_handle()
            .create_descriptor_set_layout(bindings, flags)?;

        #[cfg(feature = "log-lifetimes")]
        trace!("Creating VkDescriptorSetLayout {:?}", handle);

        Ok(Self {
            handle: Some(handle),
            device,
        })
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle.unwrap_or_default()
    }

    pub fn get_device(&self) -> &LogicalDevice {
        &self.device
    }
}

impl Destructible for DescriptorSetLayout {
    fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            #[cfg(feature = "log-lifetimes")]
            trace!("Destroying VkDescriptorSetLayout {:?}", handle);

            self.device
                .get_handle()
                .destroy_descriptor_set_layout(handle);
        }
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.destroy();
    }
}
