use std::ptr::{self, NonNull};

use ash::vk;
#[allow(unused_imports)]
use tracing::trace;

use crate::allocators::MemoryLocation;
use crate::device::{LogicalDevice, RawBufferDesc};
use crate::traits::Destructible;
use crate::GpuError;

/// A block of GPU addressable memory bound to a [`vk::Buffer`].
///
/// Host-visible buffers ([`MemoryLocation::CpuToGpu`], [`MemoryLocation::GpuToCpu`]) carry a
/// persistent mapping, device-local ones never do. The buffer and its memory are released exactly
/// once, either through [`Destructible::destroy`] or on drop.
#[derive(Debug)]
pub struct Buffer {
    handle: Option<vk::Buffer>,
    device: LogicalDevice,
    name: String,
    size: vk::DeviceSize,
    usage_flags: vk::BufferUsageFlags,
    location: MemoryLocation,
    mapped: Option<NonNull<u8>>,
}

// SAFETY: the mapping points into memory owned by this buffer's allocation. It never leaves the
// crate and is only written through `&mut self`
unsafe impl Send for Buffer {}

pub enum BufferCreateInfo<'a> {
    /// Create a new empty buffer with the requested size
    NewEmptyBuffer {
        name: &'a str,
        size: vk::DeviceSize,
        memory_type: MemoryLocation,
        usage_flags: vk::BufferUsageFlags,
    },
    /// Create a host-visible buffer sized for and filled with `data`
    NewInitializedBuffer {
        name: &'a str,
        data: &'a [u8],
        memory_type: MemoryLocation,
        usage_flags: vk::BufferUsageFlags,
    },
}

impl Buffer {
    pub fn new(device: LogicalDevice, create_info: BufferCreateInfo) -> Result<Self, GpuError> {
        let (name, size, memory_type, usage_flags, data) = match create_info {
            BufferCreateInfo::NewEmptyBuffer {
                name,
                size,
                memory_type,
                usage_flags,
            } => (name, size, memory_type, usage_flags, None),
            BufferCreateInfo::NewInitializedBuffer {
                name,
                data,
                memory_type,
                usage_flags,
            } => {
                if !memory_type.is_host_visible() {
                    return Err(GpuError::NoMappedPointer);
                }
                (name, data.len() as vk::DeviceSize, memory_type, usage_flags, Some(data))
            }
        };
        if size == 0 {
            return Err(GpuError::ZeroSizedBuffer);
        }
        let raw = device.get_handle().create_buffer(&RawBufferDesc {
            name,
            size,
            usage: usage_flags,
            location: memory_type,
        })?;

        #[cfg(feature = "log-lifetimes")]
        trace!("Creating VkBuffer {:?} \"{}\" ({} bytes)", raw.handle, name, size);

        let mut buffer = Self {
            handle: Some(raw.handle),
            device,
            name: name.to_string(),
            size,
            usage_flags,
            location: memory_type,
            mapped: raw.mapped,
        };
        if let Some(data) = data {
            buffer.write_bytes(0, data)?;
        }
        Ok(buffer)
    }

    /// Raw handle, or [`vk::Buffer::null`] once destroyed
    pub fn handle(&self) -> vk::Buffer {
        self.handle.unwrap_or_default()
    }

    pub fn is_destroyed(&self) -> bool {
        self.handle.is_none()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn usage_flags(&self) -> vk::BufferUsageFlags {
        self.usage_flags
    }

    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    pub fn get_device(&self) -> &LogicalDevice {
        &self.device
    }

    /// Acquire the persistent host mapping, if the buffer has one
    pub(crate) fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.handle.and(self.mapped)
    }

    /// Copy `data` into the mapping at `offset`
    pub fn write_bytes(&mut self, offset: vk::DeviceSize, data: &[u8]) -> Result<(), GpuError> {
        let mapped = self.mapped_ptr().ok_or(if self.is_destroyed() {
            GpuError::Destroyed
        } else {
            GpuError::NoMappedPointer
        })?;
        if offset
            .checked_add(data.len() as vk::DeviceSize)
            .is_none_or(|end| end > self.size)
        {
            return Err(GpuError::InsufficientSpace);
        }
        unsafe {
            ptr::copy_nonoverlapping(
                data.as_ptr(),
                mapped.as_ptr().add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    /// Upload data to a mapped buffer with basic type safety ensured
    pub fn write<T: bytemuck::Pod>(
        &mut self,
        offset: vk::DeviceSize,
        content: &[T],
    ) -> Result<(), GpuError> {
        self.write_bytes(offset, bytemuck::cast_slice(content))
    }

    /// Copy the whole mapping out
    pub fn read_bytes(&self) -> Result<Vec<u8>, GpuError> {
        let mapped = self.mapped_ptr().ok_or(if self.is_destroyed() {
            GpuError::Destroyed
        } else {
            GpuError::NoMappedPointer
        })?;
        Ok(unsafe { std::slice::from_raw_parts(mapped.as_ptr(), self.size as usize) }.to_vec())
    }

    /// Give up ownership of the buffer and its memory without releasing them.
    ///
    /// Used when a submission that references the buffer may still be running.
    pub fn leak(mut self) -> vk::Buffer {
        self.mapped = None;
        self.handle.take().unwrap_or_default()
    }

    /// Descriptor info covering the whole buffer
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.handle(),
            offset: 0,
            range: self.size,
        }
    }
}

impl Destructible for Buffer {
    fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            #[cfg(feature = "log-lifetimes")]
            trace!("Destroying VkBuffer {:?} \"{}\"", handle, self.name);

            self.mapped = None;
            self.device.get_handle().destroy_buffer(handle);
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.destroy();
    }
}
