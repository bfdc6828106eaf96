use std::sync::PoisonError;
use std::time::Duration;

use ash::vk;
/// Possible errors
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("Fence was not signaled within {0:?}; the device is presumed lost or hung")]
    FenceTimeout(Duration),

    #[error("Buffers cannot be created with a size of zero")]
    ZeroSizedBuffer,

    #[error("Vulkan resource does not have a mapped pointer. You're most likely using GPU only")]
    NoMappedPointer,

    #[error("Insufficient space to upload the data")]
    InsufficientSpace,

    #[error("Buffer lacks the required usage flags {0:?}")]
    MissingUsage(vk::BufferUsageFlags),

    #[error("Resource has already been destroyed")]
    Destroyed,

    #[error("Poisoned mutex")]
    PoisonError,

    #[error("Allocation error: {0}")]
    AllocationError(String),

    #[error(transparent)]
    VkError(#[from] vk::Result),
}

impl GpuError {
    /// Whether the error came from a completion wait running out of time rather than a failed
    /// device call
    pub fn is_timeout(&self) -> bool {
        matches!(self, GpuError::FenceTimeout(_))
    }
}

impl<T> From<PoisonError<T>> for GpuError {
    fn from(_: PoisonError<T>) -> Self {
        GpuError::PoisonError
    }
}

#[cfg(feature = "vulkan")]
impl From<gpu_allocator::AllocationError> for GpuError {
    fn from(value: gpu_allocator::AllocationError) -> Self {
        match value {
            gpu_allocator::AllocationError::OutOfMemory => {
                GpuError::VkError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            }
            other => GpuError::AllocationError(other.to_string()),
        }
    }
}
