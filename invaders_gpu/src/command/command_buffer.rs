//! Command buffers have been divided into 3 structs: [`CommandBuffer`],
//! [`CommandBufferRecording`] and [`CommandBufferExecutable`].
//!
//! This type state ensures that no commands are recorded or submitted when they're not supposed
//! to be. Whichever state currently owns the command buffer frees it back into its pool on drop.

use ash::vk;

use crate::command::CommandPool;
use crate::device::{DeviceBackend, Queue};
use crate::resource::Buffer;
use crate::sync::Fence;
use crate::GpuError;

#[derive(Debug)]
struct OwnedCommandBuffer {
    handle: Option<vk::CommandBuffer>,
    pool: CommandPool,
}

impl OwnedCommandBuffer {
    fn handle(&self) -> vk::CommandBuffer {
        self.handle.unwrap_or_default()
    }

    fn device(&self) -> &dyn DeviceBackend {
        self.pool.get_device().get_handle()
    }
}

impl Drop for OwnedCommandBuffer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool
                .get_device()
                .get_handle()
                .free_command_buffers(self.pool.handle(), &[handle]);
        }
    }
}

/// A command buffer in its initial state
#[derive(Debug)]
pub struct CommandBuffer {
    inner: OwnedCommandBuffer,
}

impl CommandBuffer {
    pub(crate) fn new(handle: vk::CommandBuffer, pool: CommandPool) -> Self {
        Self {
            inner: OwnedCommandBuffer {
                handle: Some(handle),
                pool,
            },
        }
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.inner.handle()
    }

    /// Start recording. If beginning fails the command buffer is freed.
    pub fn begin(
        self,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<CommandBufferRecording, GpuError> {
        self.inner
            .device()
            .begin_command_buffer(self.inner.handle(), flags)?;
        Ok(CommandBufferRecording { inner: self.inner })
    }
}

#[derive(Debug)]
pub struct CommandBufferRecording {
    inner: OwnedCommandBuffer,
}

impl CommandBufferRecording {
    pub fn handle(&self) -> vk::CommandBuffer {
        self.inner.handle()
    }

    pub fn copy_buffer(&self, src: &Buffer, dst: &Buffer, regions: &[vk::BufferCopy]) {
        self.inner
            .device()
            .cmd_copy_buffer(self.handle(), src.handle(), dst.handle(), regions);
    }

    pub fn memory_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_stage: vk::PipelineStageFlags,
        dst_access: vk::AccessFlags,
    ) {
        self.inner.device().cmd_memory_barrier(
            self.handle(),
            src_stage,
            src_access,
            dst_stage,
            dst_access,
        );
    }

    pub fn bind_vertex_buffers(
        &self,
        first_binding: u32,
        buffers: &[&Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        let buffers: Vec<vk::Buffer> = buffers.iter().map(|buffer| buffer.handle()).collect();
        self.inner
            .device()
            .cmd_bind_vertex_buffers(self.handle(), first_binding, &buffers, offsets);
    }

    pub fn bind_index_buffer(
        &self,
        buffer: &Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.inner
            .device()
            .cmd_bind_index_buffer(self.handle(), buffer.handle(), offset, index_type);
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.inner.device().cmd_draw_indexed(
            self.handle(),
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
    }

    /// Ends recording into the command buffer
    pub fn end(self) -> Result<CommandBufferExecutable, GpuError> {
        self.inner.device().end_command_buffer(self.handle())?;
        Ok(CommandBufferExecutable { inner: self.inner })
    }
}

/// Command buffer is in its executable state and can now be executed via queue submission
#[derive(Debug)]
pub struct CommandBufferExecutable {
    inner: OwnedCommandBuffer,
}

impl CommandBufferExecutable {
    pub fn handle(&self) -> vk::CommandBuffer {
        self.inner.handle()
    }

    /// Submits the command buffer to the queue, signaling `fence` on completion.
    ///
    /// The command buffer must not be dropped until the fence has signaled.
    pub fn submit(&self, queue: &Queue, fence: &Fence) -> Result<(), GpuError> {
        self.inner
            .device()
            .queue_submit(queue.handle(), &[self.handle()], fence.handle())
    }

    /// Give up ownership without freeing the command buffer
    pub fn leak(mut self) -> vk::CommandBuffer {
        self.inner.handle.take().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::allocators::MemoryLocation;
    use crate::device::{HeadlessBackend, LogicalDevice, RecordedCommand};
    use crate::resource::BufferCreateInfo;

    #[test]
    fn recorded_copy_runs_on_submit() {
        let backend = Arc::new(HeadlessBackend::default());
        let device = LogicalDevice::from_arc(backend.clone());
        let queue = backend.queue();
        let pool = CommandPool::new(
            device.clone(),
            &queue,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )
        .unwrap();
        let src = Buffer::new(
            device.clone(),
            BufferCreateInfo::NewInitializedBuffer {
                name: "src",
                data: &[1, 2, 3, 4],
                memory_type: MemoryLocation::CpuToGpu,
                usage_flags: vk::BufferUsageFlags::TRANSFER_SRC,
            },
        )
        .unwrap();
        let dst = Buffer::new(
            device.clone(),
            BufferCreateInfo::NewEmptyBuffer {
                name: "dst",
                size: 4,
                memory_type: MemoryLocation::GpuOnly,
                usage_flags: vk::BufferUsageFlags::TRANSFER_DST,
            },
        )
        .unwrap();
        let fence = Fence::new(device, vk::FenceCreateFlags::empty()).unwrap();

        let cmd = pool
            .allocate(1)
            .unwrap()
            .pop()
            .unwrap()
            .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .unwrap();
        cmd.copy_buffer(
            &src,
            &dst,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 4,
            }],
        );
        assert_eq!(backend.recorded_commands(cmd.handle()).len(), 1);
        let cmd = cmd.end().unwrap();
        cmd.submit(&queue, &fence).unwrap();
        fence.wait(Duration::from_secs(1)).unwrap();

        assert_eq!(backend.read_buffer(dst.handle()).unwrap(), vec![1, 2, 3, 4]);
        drop((cmd, fence, src, dst, pool));
        assert_eq!(backend.live_objects().total(), 0);
        assert!(backend.validation_errors().is_empty());
    }

    #[test]
    fn draw_commands_are_recorded_in_order() {
        let backend = Arc::new(HeadlessBackend::default());
        let device = LogicalDevice::from_arc(backend.clone());
        let pool = CommandPool::new(
            device.clone(),
            &backend.queue(),
            vk::CommandPoolCreateFlags::empty(),
        )
        .unwrap();
        let vertices = Buffer::new(
            device,
            BufferCreateInfo::NewEmptyBuffer {
                name: "vertices",
                size: 16,
                memory_type: MemoryLocation::GpuOnly,
                usage_flags: vk::BufferUsageFlags::VERTEX_BUFFER,
            },
        )
        .unwrap();
        let cmd = pool
            .allocate(1)
            .unwrap()
            .pop()
            .unwrap()
            .begin(vk::CommandBufferUsageFlags::empty())
            .unwrap();
        cmd.bind_vertex_buffers(0, &[&vertices], &[0]);
        cmd.draw_indexed(3, 1, 0, 0, 0);

        let recorded = backend.recorded_commands(cmd.handle());
        assert_eq!(
            recorded,
            vec![
                RecordedCommand::BindVertexBuffers {
                    first_binding: 0,
                    buffers: vec![vertices.handle()],
                    offsets: vec![0],
                },
                RecordedCommand::DrawIndexed {
                    index_count: 3,
                    instance_count: 1,
                    first_index: 0,
                    vertex_offset: 0,
                    first_instance: 0,
                },
            ]
        );
    }
}
