//! The device abstraction surface every GPU resource in this crate is built on.
//!
//! [`DeviceBackend`] speaks raw [`ash::vk`] handles so the wrappers in [`crate::resource`],
//! [`crate::sync`], [`crate::command`] and [`crate::descriptor`] stay identical whether they sit
//! on a real Vulkan device ([`VulkanBackend`]) or on the in-memory [`HeadlessBackend`].

use std::fmt::Debug;
use std::ptr::NonNull;

use ash::vk;

use crate::allocators::MemoryLocation;
use crate::GpuError;

pub mod headless;
pub mod logical_device;
pub mod queue;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use headless::{FailPoint, HeadlessBackend, LiveObjects, RecordedCommand};
pub use logical_device::LogicalDevice;
pub use queue::Queue;
#[cfg(feature = "vulkan")]
pub use vulkan::VulkanBackend;

/// Everything a backend needs to create a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBufferDesc<'a> {
    pub name: &'a str,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
}

/// A buffer freshly created by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBuffer {
    pub handle: vk::Buffer,
    /// Persistent host mapping. Present if and only if the buffer is host-visible.
    pub mapped: Option<NonNull<u8>>,
}

/// Raw device calls. Every `destroy_*`/`free_*` call must be made at most once per handle;
/// the wrappers in this crate guarantee that.
pub trait DeviceBackend: Send + Sync + Debug {
    // Buffers

    /// Create a buffer and bind freshly allocated memory to it
    fn create_buffer(&self, desc: &RawBufferDesc) -> Result<RawBuffer, GpuError>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&self, buffer: vk::Buffer);

    // Commands

    fn create_command_pool(
        &self,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<vk::CommandPool, GpuError>;

    fn destroy_command_pool(&self, pool: vk::CommandPool);

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, GpuError>;

    fn free_command_buffers(&self, pool: vk::CommandPool, command_buffers: &[vk::CommandBuffer]);

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<(), GpuError>;

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<(), GpuError>;

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );

    /// Record a global memory barrier making `src_access` in `src_stage` available to
    /// `dst_access` in `dst_stage`
    fn cmd_memory_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_stage: vk::PipelineStageFlags,
        dst_access: vk::AccessFlags,
    );

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );

    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    /// Submit executable command buffers, signaling `fence` once they complete
    fn queue_submit(
        &self,
        queue: vk::Queue,
        command_buffers: &[vk::CommandBuffer],
        fence: vk::Fence,
    ) -> Result<(), GpuError>;

    // Synchronization

    fn create_fence(&self, flags: vk::FenceCreateFlags) -> Result<vk::Fence, GpuError>;

    fn destroy_fence(&self, fence: vk::Fence);

    /// Block until `fence` signals or `timeout_ns` elapses.
    ///
    /// Returns `Ok(true)` once signaled and `Ok(false)` on timeout
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<bool, GpuError>;

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError>;

    // Descriptors

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> Result<vk::DescriptorSetLayout, GpuError>;

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
        flags: vk::DescriptorPoolCreateFlags,
    ) -> Result<vk::DescriptorPool, GpuError>;

    /// Destroys the pool along with every set still allocated from it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, GpuError>;

    /// Only valid for pools created with [`vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET`]
    fn free_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        set: vk::DescriptorSet,
    ) -> Result<(), GpuError>;

    fn write_buffer_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    );

    fn device_wait_idle(&self) -> Result<(), GpuError>;
}
