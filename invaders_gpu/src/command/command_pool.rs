use std::sync::Arc;

use ash::vk;
use derivative::Derivative;
#[allow(unused_imports)]
use tracing::trace;

use crate::command::CommandBuffer;
use crate::device::{LogicalDevice, Queue};
use crate::GpuError;

#[derive(Derivative)]
#[derivative(Debug)]
struct CommandPoolInner {
    handle: vk::CommandPool,
    #[derivative(Debug = "ignore")]
    device: LogicalDevice,
}

impl Drop for CommandPoolInner {
    fn drop(&mut self) {
        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying VkCommandPool {:?}", self.handle);

        self.device.get_handle().destroy_command_pool(self.handle);
    }
}

/// Shared handle to a command pool.
///
/// Command buffers allocated from the pool keep it alive, so the pool is only destroyed once
/// every buffer has been freed back into it.
#[derive(Debug, Clone)]
pub struct CommandPool {
    inner: Arc<CommandPoolInner>,
}

impl PartialEq for CommandPool {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl CommandPool {
    pub fn new(
        device: LogicalDevice,
        queue: &Queue,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self, GpuError> {
        let handle = device
            .get_handle()
            .create_command_pool(queue.get_family_index(), flags)?;

        #[cfg(feature = "log-lifetimes")]
        trace!("Created VkCommandPool {:?}", handle);

        Ok(Self {
            inner: Arc::new(CommandPoolInner { handle, device }),
        })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.inner.handle
    }

    pub fn get_device(&self) -> &LogicalDevice {
        &self.inner.device
    }

    /// Allocate primary command buffers from a command pool
    pub fn allocate(&self, count: u32) -> Result<Vec<CommandBuffer>, GpuError> {
        Ok(self
            .inner
            .device
            .get_handle()
            .allocate_command_buffers(self.inner.handle, count)?
            .into_iter()
            .map(|handle| CommandBuffer::new(handle, self.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessBackend;

    #[test]
    fn pool_outlives_its_command_buffers() {
        let backend = Arc::new(HeadlessBackend::default());
        let device = LogicalDevice::from_arc(backend.clone());
        let pool = CommandPool::new(
            device,
            &backend.queue(),
            vk::CommandPoolCreateFlags::TRANSIENT,
        )
        .unwrap();
        let mut buffers = pool.allocate(2).unwrap();
        assert_eq!(buffers.len(), 2);
        drop(pool);
        assert_eq!(backend.live_objects().command_pools, 1);

        buffers.pop();
        assert_eq!(backend.live_objects().command_buffers, 1);
        buffers.clear();
        assert_eq!(backend.live_objects().total(), 0);
        assert!(backend.validation_errors().is_empty());
    }
}
