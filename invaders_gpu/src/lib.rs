pub mod allocators;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod resource;
pub mod sync;
pub mod traits;
pub mod util;

pub use error::GpuError;

// Re-exports
pub use ash;
#[cfg(feature = "vulkan")]
pub use gpu_allocator;

pub mod prelude {
    pub use crate::allocators::MemoryLocation;
    pub use crate::command::{
        CommandBuffer, CommandBufferExecutable, CommandBufferRecording, CommandPool,
    };
    pub use crate::descriptor::{
        DescriptorPool, DescriptorPoolCreateInfo, DescriptorSet, DescriptorSetLayout,
        DescriptorSetLayoutBuilder,
    };
    pub use crate::device::{DeviceBackend, HeadlessBackend, LogicalDevice, Queue};
    pub use crate::resource::{Buffer, BufferCreateInfo};
    pub use crate::sync::Fence;
    pub use crate::traits::Destructible;
    pub use crate::util::{TransferConfig, TransferUploader, UploadContext};
    pub use crate::GpuError;
}
