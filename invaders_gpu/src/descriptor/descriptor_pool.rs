use std::sync::Arc;

use ash::vk;
use derivative::Derivative;
#[allow(unused_imports)]
use tracing::trace;

use crate::descriptor::{DescriptorSet, DescriptorSetLayout};
use crate::device::LogicalDevice;
use crate::GpuError;

#[derive(Derivative)]
#[derivative(Debug)]
struct DescriptorPoolInner {
    handle: vk::DescriptorPool,
    flags: vk::DescriptorPoolCreateFlags,
    #[derivative(Debug = "ignore")]
    device: LogicalDevice,
}

impl Drop for DescriptorPoolInner {
    fn drop(&mut self) {
        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying VkDescriptorPool {:?}", self.handle);

        self.device.get_handle().destroy_descriptor_pool(self.handle);
    }
}

/// Allocates descriptor sets.
///
/// Cloning hands out another reference to the same pool; every [`DescriptorSet`] holds one, so
/// the pool is destroyed after the last set allocated from it.
#[derive(Debug, Clone)]
pub struct DescriptorPool {
    inner: Arc<DescriptorPoolInner>,
}

/// If you want to allocate descriptors based on a ratio
#[derive(Copy, Clone, PartialOrd, PartialEq, Debug, Default)]
pub struct PoolSizeRatio {
    pub descriptor_type: vk::DescriptorType,
    pub ratio: f32,
}

impl PoolSizeRatio {
    pub fn descriptor_type(mut self, descriptor_type: vk::DescriptorType) -> Self {
        self.descriptor_type = descriptor_type;
        self
    }
    pub fn ratio(mut self, ratio: f32) -> Self {
        self.ratio = ratio;
        self
    }
}

/// Create information for a [`DescriptorPool`].
///
/// # FromPoolSizeRatios
/// All ratios inputted in `ratios` will be scaled by `count`
pub enum DescriptorPoolCreateInfo {
    /// Allocate a pool from descriptor pool sizes
    FromPoolSizes {
        sizes: Vec<vk::DescriptorPoolSize>,
        flags: vk::DescriptorPoolCreateFlags,
        max_sets: u32,
    },

    FromPoolSizeRatios {
        ratios: Vec<PoolSizeRatio>,
        /// Scale the ratios by
        count: u32,
        flags: vk::DescriptorPoolCreateFlags,
        max_sets: u32,
    },
}

impl DescriptorPool {
    pub fn new(
        device: LogicalDevice,
        create_info: DescriptorPoolCreateInfo,
    ) -> Result<Self, GpuError> {
        let (sizes, flags, max_sets) = match create_info {
            DescriptorPoolCreateInfo::FromPoolSizes {
                sizes,
                flags,
                max_sets,
            } => (sizes, flags, max_sets),
            DescriptorPoolCreateInfo::FromPoolSizeRatios {
                ratios,
                count,
                flags,
                max_sets,
            } => (
                ratios
                    .iter()
                    .map(|ratio| vk::DescriptorPoolSize {
                        ty: ratio.descriptor_type,
                        descriptor_count: (ratio.ratio * count as f32).ceil() as u32,
                    })
                    .collect(),
                flags,
                max_sets,
            ),
        };
        let handle = device
            .get_handle()
            .create_descriptor_pool(&sizes, max_sets, flags)?;

        #[cfg(feature = "log-lifetimes")]
        trace!("Creating VkDescriptorPool {:?}", handle);

        Ok(Self {
            inner: Arc::new(DescriptorPoolInner {
                handle,
                flags,
                device,
            }),
        })
    }

    pub fn handle(&self) -> vk::DescriptorPool {
        self.inner.handle
    }

    pub fn flags(&self) -> vk::DescriptorPoolCreateFlags {
        self.inner.flags
    }

    /// Sets from this pool may be freed individually
    pub fn can_free_sets(&self) -> bool {
        self.inner
            .flags
            .contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
    }

    pub fn get_device(&self) -> &LogicalDevice {
        &self.inner.device
    }

    /// Allocate a single descriptor set with `layout`
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> Result<DescriptorSet, GpuError> {
        let handle = self
            .inner
            .device
            .get_handle()
            .allocate_descriptor_set(self.inner.handle, layout.handle())?;
        Ok(DescriptorSet::new(handle, self.clone()))
    }
}

impl PartialEq for DescriptorPool {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorSetLayoutBuilder;
    use crate::device::HeadlessBackend;

    fn uniform_layout(device: LogicalDevice) -> DescriptorSetLayout {
        DescriptorSetLayoutBuilder::default()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX,
            )
            .build(device, vk::DescriptorSetLayoutCreateFlags::empty())
            .unwrap()
    }

    #[test]
    fn exhausted_pool_reports_out_of_pool_memory() {
        let backend = Arc::new(HeadlessBackend::default());
        let device = LogicalDevice::from_arc(backend.clone());
        let layout = uniform_layout(device.clone());
        let pool = DescriptorPool::new(
            device,
            DescriptorPoolCreateInfo::FromPoolSizeRatios {
                ratios: vec![PoolSizeRatio::default()
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .ratio(1.0)],
                count: 1,
                flags: vk::DescriptorPoolCreateFlags::empty(),
                max_sets: 1,
            },
        )
        .unwrap();
        let set = pool.allocate(&layout).unwrap();
        assert_eq!(
            pool.allocate(&layout).err(),
            Some(GpuError::VkError(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
        );
        drop(pool);
        assert_eq!(backend.live_objects().descriptor_pools, 1);
        drop(set);
        drop(layout);
        assert_eq!(backend.live_objects().total(), 0);
        assert!(backend.validation_errors().is_empty());
    }
}
