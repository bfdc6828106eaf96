use ash::vk;
use tracing::warn;

use crate::descriptor::DescriptorPool;
use crate::resource::Buffer;
use crate::traits::Destructible;
use crate::GpuError;

/// A descriptor set allocated from a [`DescriptorPool`].
///
/// Sets from pools created with [`vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET`] are freed
/// on drop; otherwise they are reclaimed when the pool itself is destroyed.
#[derive(Debug)]
pub struct DescriptorSet {
    handle: Option<vk::DescriptorSet>,
    pool: DescriptorPool,
}

impl DescriptorSet {
    pub(crate) fn new(handle: vk::DescriptorSet, pool: DescriptorPool) -> Self {
        Self {
            handle: Some(handle),
            pool,
        }
    }

    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle.unwrap_or_default()
    }

    pub fn get_pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// Point `binding` at the whole of `buffer`
    pub fn write_buffer(
        &self,
        binding: u32,
        ty: vk::DescriptorType,
        buffer: &Buffer,
    ) -> Result<(), GpuError> {
        let handle = self.handle.ok_or(GpuError::Destroyed)?;
        if buffer.is_destroyed() {
            return Err(GpuError::Destroyed);
        }
        self.pool.get_device().get_handle().write_buffer_descriptor(
            handle,
            binding,
            ty,
            buffer.descriptor_info(),
        );
        Ok(())
    }
}

impl Destructible for DescriptorSet {
    fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            if self.pool.can_free_sets() {
                if let Err(e) = self
                    .pool
                    .get_device()
                    .get_handle()
                    .free_descriptor_set(self.pool.handle(), handle)
                {
                    warn!("Failed to free descriptor set {:?}: {}", handle, e);
                }
            }
        }
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        self.destroy();
    }
}
