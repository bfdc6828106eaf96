//! [`DeviceBackend`] on top of [`ash`] with memory from [`gpu_allocator`]
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::vk;
use derivative::Derivative;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
#[allow(unused_imports)]
use tracing::{error, trace};

use crate::device::{DeviceBackend, RawBuffer, RawBufferDesc};
use crate::GpuError;

#[derive(Derivative)]
#[derivative(Debug)]
struct Memory {
    #[derivative(Debug = "ignore")]
    allocator: Option<Allocator>,
    /// Every live buffer's backing allocation
    #[derivative(Debug = "ignore")]
    allocations: HashMap<vk::Buffer, Allocation>,
}

/// A Vulkan device created elsewhere (instance, physical device and queue selection are the
/// bootstrap's business). Takes ownership of the [`ash::Device`] and destroys it on drop.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct VulkanBackend {
    #[derivative(Debug = "ignore")]
    handle: ash::Device,
    memory: Mutex<Memory>,
}

impl VulkanBackend {
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
    ) -> Result<Self, GpuError> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;
        Ok(Self {
            handle: device,
            memory: Mutex::new(Memory {
                allocator: Some(allocator),
                allocations: HashMap::new(),
            }),
        })
    }

    /// Get a reference to the underlying [`ash::Device`]
    pub fn get_handle(&self) -> &ash::Device {
        &self.handle
    }

    fn memory(&self) -> MutexGuard<'_, Memory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device_wait_idle() {
            error!("Failed to idle the device before teardown: {}", e);
        }
        {
            let mut memory = self.memory();
            let leaked: Vec<vk::Buffer> = memory.allocations.keys().copied().collect();
            if !leaked.is_empty() {
                error!("{} buffer(s) still alive while destroying the device", leaked.len());
            }
            for buffer in leaked {
                if let Some(allocation) = memory.allocations.remove(&buffer) {
                    unsafe { self.handle.destroy_buffer(buffer, None) };
                    if let Some(allocator) = memory.allocator.as_mut() {
                        let _ = allocator.free(allocation);
                    }
                }
            }
            // The allocator releases its memory blocks and must go before the device
            drop(memory.allocator.take());
        }

        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying VkDevice {:?}", self.handle.handle());

        unsafe {
            self.handle.destroy_device(None);
        }
    }
}

impl DeviceBackend for VulkanBackend {
    fn create_buffer(&self, desc: &RawBufferDesc) -> Result<RawBuffer, GpuError> {
        if desc.size == 0 {
            return Err(GpuError::ZeroSizedBuffer);
        }
        let handle = unsafe {
            self.handle.create_buffer(
                &vk::BufferCreateInfo::default()
                    .size(desc.size)
                    .usage(desc.usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                None,
            )?
        };
        let requirements = unsafe { self.handle.get_buffer_memory_requirements(handle) };

        let mut memory = self.memory();
        let allocation = memory
            .allocator
            .as_mut()
            .ok_or(GpuError::AllocationError("allocator already torn down".to_string()))
            .and_then(|allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: desc.name,
                        requirements,
                        location: desc.location.into(),
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(GpuError::from)
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.handle.destroy_buffer(handle, None) };
                return Err(err);
            }
        };
        let bound = unsafe {
            self.handle
                .bind_buffer_memory(handle, allocation.memory(), allocation.offset())
        };
        if let Err(err) = bound {
            unsafe { self.handle.destroy_buffer(handle, None) };
            if let Some(allocator) = memory.allocator.as_mut() {
                let _ = allocator.free(allocation);
            }
            return Err(err.into());
        }

        let mapped = if desc.location.is_host_visible() {
            match allocation.mapped_ptr() {
                Some(ptr) => Some(ptr.cast::<u8>()),
                None => {
                    unsafe { self.handle.destroy_buffer(handle, None) };
                    if let Some(allocator) = memory.allocator.as_mut() {
                        let _ = allocator.free(allocation);
                    }
                    return Err(GpuError::NoMappedPointer);
                }
            }
        } else {
            None
        };
        memory.allocations.insert(handle, allocation);

        #[cfg(feature = "log-lifetimes")]
        trace!("Created VkBuffer {:?} \"{}\"", handle, desc.name);

        Ok(RawBuffer { handle, mapped })
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        #[cfg(feature = "log-lifetimes")]
        trace!("Destroying VkBuffer {:?}", buffer);

        let mut memory = self.memory();
        unsafe { self.handle.destroy_buffer(buffer, None) };
        match memory.allocations.remove(&buffer) {
            Some(allocation) => {
                if let Some(allocator) = memory.allocator.as_mut() {
                    if let Err(err) = allocator.free(allocation) {
                        error!(?err, "Failed to free buffer memory");
                    }
                }
            }
            None => error!("Destroyed VkBuffer {:?} without a tracked allocation", buffer),
        }
    }

    fn create_command_pool(
        &self,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<vk::CommandPool, GpuError> {
        Ok(unsafe {
            self.handle.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .flags(flags)
                    .queue_family_index(queue_family_index),
                None,
            )?
        })
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.handle.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, GpuError> {
        Ok(unsafe {
            self.handle.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(count),
            )?
        })
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, command_buffers: &[vk::CommandBuffer]) {
        unsafe { self.handle.free_command_buffers(pool, command_buffers) }
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<(), GpuError> {
        unsafe {
            self.handle.begin_command_buffer(
                command_buffer,
                &vk::CommandBufferBeginInfo::default().flags(flags),
            )?
        };
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<(), GpuError> {
        unsafe { self.handle.end_command_buffer(command_buffer)? };
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe {
            self.handle
                .cmd_copy_buffer(command_buffer, src, dst, regions)
        }
    }

    fn cmd_memory_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_stage: vk::PipelineStageFlags,
        dst_access: vk::AccessFlags,
    ) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);
        unsafe {
            self.handle.cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                std::slice::from_ref(&barrier),
                &[],
                &[],
            )
        }
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.handle
                .cmd_bind_vertex_buffers(command_buffer, first_binding, buffers, offsets)
        }
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.handle
                .cmd_bind_index_buffer(command_buffer, buffer, offset, index_type)
        }
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.handle.cmd_draw_indexed(
                command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        command_buffers: &[vk::CommandBuffer],
        fence: vk::Fence,
    ) -> Result<(), GpuError> {
        let submit_info = vk::SubmitInfo::default().command_buffers(command_buffers);
        unsafe {
            self.handle
                .queue_submit(queue, std::slice::from_ref(&submit_info), fence)?
        };
        Ok(())
    }

    fn create_fence(&self, flags: vk::FenceCreateFlags) -> Result<vk::Fence, GpuError> {
        Ok(unsafe {
            self.handle
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)?
        })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.handle.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<bool, GpuError> {
        match unsafe { self.handle.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError> {
        unsafe { self.handle.reset_fences(&[fence])? };
        Ok(())
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> Result<vk::DescriptorSetLayout, GpuError> {
        Ok(unsafe {
            self.handle.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default()
                    .flags(flags)
                    .bindings(bindings),
                None,
            )?
        })
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.handle.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
        flags: vk::DescriptorPoolCreateFlags,
    ) -> Result<vk::DescriptorPool, GpuError> {
        Ok(unsafe {
            self.handle.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .flags(flags)
                    .max_sets(max_sets)
                    .pool_sizes(sizes),
                None,
            )?
        })
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.handle.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, GpuError> {
        let layouts = [layout];
        let mut sets = unsafe {
            self.handle.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .descriptor_pool(pool)
                    .set_layouts(&layouts),
            )?
        };
        sets.pop()
            .ok_or(GpuError::VkError(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
    }

    fn free_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        set: vk::DescriptorSet,
    ) -> Result<(), GpuError> {
        unsafe { self.handle.free_descriptor_sets(pool, &[set])? };
        Ok(())
    }

    fn write_buffer_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    ) {
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .descriptor_type(ty)
            .buffer_info(std::slice::from_ref(&info));
        unsafe {
            self.handle
                .update_descriptor_sets(std::slice::from_ref(&write), &[])
        }
    }

    fn device_wait_idle(&self) -> Result<(), GpuError> {
        unsafe { self.handle.device_wait_idle()? };
        Ok(())
    }
}
