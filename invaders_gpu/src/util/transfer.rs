//! Synchronous staging transfers between host memory and device-local buffers.
//!
//! Every transfer is one blocking handoff: record a single copy into a transient command buffer,
//! submit it with a fresh fence and wait for that fence. Transient resources are released by
//! scope exit on every path except a timed-out wait, where the device may still be using them.

use std::time::Duration;

use ash::vk;
use tracing::{debug, error};

use crate::allocators::MemoryLocation;
use crate::command::CommandPool;
use crate::device::{LogicalDevice, Queue};
use crate::resource::{Buffer, BufferCreateInfo};
use crate::sync::Fence;
use crate::GpuError;

/// 100 000 000 000 ns
pub const DEFAULT_FENCE_TIMEOUT: Duration = Duration::from_secs(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Upper bound on a single fence wait
    pub fence_timeout: Duration,
    /// Create uploaded buffers with `TRANSFER_SRC` so [`TransferUploader::download`] can read
    /// them back
    pub allow_readback: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            fence_timeout: DEFAULT_FENCE_TIMEOUT,
            allow_readback: false,
        }
    }
}

/// Everything a single transfer needs from its caller
#[derive(Debug, Clone, Copy)]
pub struct UploadContext<'a> {
    pub device: &'a LogicalDevice,
    pub queue: &'a Queue,
    /// Pool the transient command buffer is allocated from. It must be compatible with `queue`.
    pub command_pool: &'a CommandPool,
}

#[derive(Debug, Clone, Default)]
pub struct TransferUploader {
    config: TransferConfig,
}

impl TransferUploader {
    pub fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Copy `data` into a new device-local buffer usable as `usage`.
    ///
    /// Returns only once the copy has completed, so the buffer may be referenced by any later
    /// submission.
    pub fn upload(
        &self,
        ctx: &UploadContext,
        data: &[u8],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<Buffer, GpuError> {
        if data.is_empty() {
            return Err(GpuError::ZeroSizedBuffer);
        }
        let size = data.len() as vk::DeviceSize;
        let staging = Buffer::new(
            ctx.device.clone(),
            BufferCreateInfo::NewInitializedBuffer {
                name: &format!("{} staging", name),
                data,
                memory_type: MemoryLocation::CpuToGpu,
                usage_flags: vk::BufferUsageFlags::TRANSFER_SRC,
            },
        )?;
        let mut usage_flags = usage | vk::BufferUsageFlags::TRANSFER_DST;
        if self.config.allow_readback {
            usage_flags |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        let destination = Buffer::new(
            ctx.device.clone(),
            BufferCreateInfo::NewEmptyBuffer {
                name,
                size,
                memory_type: MemoryLocation::GpuOnly,
                usage_flags,
            },
        )?;

        match self.copy_and_wait(ctx, &staging, &destination, size, false) {
            Ok(()) => {
                debug!("Uploaded {} bytes into \"{}\"", size, name);
                Ok(destination)
            }
            Err(e) if e.is_timeout() => {
                error!(
                    "Upload of \"{}\" timed out, leaking its staging and destination buffers",
                    name
                );
                staging.leak();
                destination.leak();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Read the whole contents of a device buffer back to the host.
    ///
    /// `buffer` must have been created with `TRANSFER_SRC`, e.g. by an uploader with
    /// [`TransferConfig::allow_readback`] set. On timeout the caller must keep `buffer` alive
    /// because the device may still be reading from it.
    pub fn download(&self, ctx: &UploadContext, buffer: &Buffer) -> Result<Vec<u8>, GpuError> {
        if buffer.is_destroyed() {
            return Err(GpuError::Destroyed);
        }
        if !buffer
            .usage_flags()
            .contains(vk::BufferUsageFlags::TRANSFER_SRC)
        {
            return Err(GpuError::MissingUsage(vk::BufferUsageFlags::TRANSFER_SRC));
        }
        let readback = Buffer::new(
            ctx.device.clone(),
            BufferCreateInfo::NewEmptyBuffer {
                name: &format!("{} readback", buffer.name()),
                size: buffer.size(),
                memory_type: MemoryLocation::GpuToCpu,
                usage_flags: vk::BufferUsageFlags::TRANSFER_DST,
            },
        )?;

        match self.copy_and_wait(ctx, buffer, &readback, buffer.size(), true) {
            Ok(()) => readback.read_bytes(),
            Err(e) if e.is_timeout() => {
                error!(
                    "Readback of \"{}\" timed out, leaking its readback buffer",
                    buffer.name()
                );
                readback.leak();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Record, submit and wait for a single full copy of `size` bytes. On timeout the command
    /// buffer and fence are leaked, the buffers are the caller's responsibility.
    ///
    /// `host_read` follows the copy with a transfer-to-host barrier, without which the fence
    /// wait alone does not make the copied bytes visible through `dst`'s mapping.
    fn copy_and_wait(
        &self,
        ctx: &UploadContext,
        src: &Buffer,
        dst: &Buffer,
        size: vk::DeviceSize,
        host_read: bool,
    ) -> Result<(), GpuError> {
        let cmd = ctx
            .command_pool
            .allocate(1)?
            .pop()
            .ok_or(GpuError::VkError(vk::Result::ERROR_OUT_OF_HOST_MEMORY))?
            .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        cmd.copy_buffer(
            src,
            dst,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            }],
        );
        if host_read {
            cmd.memory_barrier(
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::HOST,
                vk::AccessFlags::HOST_READ,
            );
        }
        let cmd = cmd.end()?;
        let fence = Fence::new(ctx.device.clone(), vk::FenceCreateFlags::empty())?;
        cmd.submit(ctx.queue, &fence)?;

        match fence.wait(self.config.fence_timeout) {
            Err(e) if e.is_timeout() => {
                cmd.leak();
                fence.leak();
                Err(e)
            }
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::{FailPoint, HeadlessBackend, RecordedCommand};

    struct Harness {
        backend: Arc<HeadlessBackend>,
        device: LogicalDevice,
        queue: Queue,
        pool: CommandPool,
    }

    impl Harness {
        fn new() -> Self {
            let _ = tracing_subscriber::fmt().with_test_writer().try_init();
            let backend = Arc::new(HeadlessBackend::default());
            let device = LogicalDevice::from_arc(backend.clone());
            let queue = backend.queue();
            let pool = CommandPool::new(
                device.clone(),
                &queue,
                vk::CommandPoolCreateFlags::TRANSIENT,
            )
            .unwrap();
            Self {
                backend,
                device,
                queue,
                pool,
            }
        }

        fn ctx(&self) -> UploadContext<'_> {
            UploadContext {
                device: &self.device,
                queue: &self.queue,
                command_pool: &self.pool,
            }
        }
    }

    #[test]
    fn upload_then_download_round_trips() {
        let harness = Harness::new();
        let uploader = TransferUploader::new(TransferConfig {
            allow_readback: true,
            ..Default::default()
        });
        let data: Vec<u8> = (0..=255).collect();
        let buffer = uploader
            .upload(
                &harness.ctx(),
                &data,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                "vertices",
            )
            .unwrap();
        assert_eq!(buffer.size(), 256);
        assert!(buffer.mapped_ptr().is_none());
        assert_eq!(uploader.download(&harness.ctx(), &buffer).unwrap(), data);

        drop(buffer);
        // only the command pool remains
        assert_eq!(harness.backend.live_objects().total(), 1);
        assert!(harness.backend.validation_errors().is_empty());
    }

    #[test]
    fn download_makes_the_copy_visible_to_the_host() {
        let harness = Harness::new();
        let uploader = TransferUploader::new(TransferConfig {
            allow_readback: true,
            ..Default::default()
        });
        let buffer = uploader
            .upload(
                &harness.ctx(),
                &[9; 16],
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                "uniforms",
            )
            .unwrap();
        uploader.download(&harness.ctx(), &buffer).unwrap();

        let submitted = harness.backend.submitted_commands();
        assert_eq!(submitted.len(), 2);
        // uploads are read by later submissions, never by the host
        assert!(matches!(
            submitted[0].as_slice(),
            [RecordedCommand::CopyBuffer { .. }]
        ));
        match submitted[1].as_slice() {
            [
                RecordedCommand::CopyBuffer { src, regions, .. },
                RecordedCommand::MemoryBarrier {
                    src_stage,
                    src_access,
                    dst_stage,
                    dst_access,
                },
            ] => {
                assert_eq!(*src, buffer.handle());
                assert_eq!(regions[0].size, 16);
                assert_eq!(*src_stage, vk::PipelineStageFlags::TRANSFER);
                assert_eq!(*src_access, vk::AccessFlags::TRANSFER_WRITE);
                assert_eq!(*dst_stage, vk::PipelineStageFlags::HOST);
                assert_eq!(*dst_access, vk::AccessFlags::HOST_READ);
            }
            other => panic!("unexpected readback commands {:?}", other),
        }
    }

    #[test]
    fn destination_is_device_local_with_requested_usage() {
        let harness = Harness::new();
        let uploader = TransferUploader::default();
        let buffer = uploader
            .upload(
                &harness.ctx(),
                &[1, 2, 3, 4],
                vk::BufferUsageFlags::INDEX_BUFFER,
                "indices",
            )
            .unwrap();
        assert_eq!(
            harness.backend.buffer_location(buffer.handle()),
            Some(MemoryLocation::GpuOnly)
        );
        assert_eq!(
            harness.backend.buffer_usage(buffer.handle()),
            Some(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert_eq!(harness.backend.submission_count(), 1);
        assert_eq!(
            uploader.download(&harness.ctx(), &buffer).err(),
            Some(GpuError::MissingUsage(vk::BufferUsageFlags::TRANSFER_SRC))
        );
    }

    #[test]
    fn empty_payload_is_rejected_before_touching_the_device() {
        let harness = Harness::new();
        let result = TransferUploader::default().upload(
            &harness.ctx(),
            &[],
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "empty",
        );
        assert_eq!(result.err(), Some(GpuError::ZeroSizedBuffer));
        assert_eq!(harness.backend.live_objects().buffers, 0);
        assert_eq!(harness.backend.submission_count(), 0);
    }

    #[test]
    fn device_failures_release_transient_resources() {
        for point in [
            FailPoint::CreateBuffer,
            FailPoint::AllocateCommandBuffers,
            FailPoint::CreateFence,
            FailPoint::QueueSubmit,
        ] {
            let harness = Harness::new();
            harness.backend.fail_next(point);
            let result = TransferUploader::default().upload(
                &harness.ctx(),
                &[7; 32],
                vk::BufferUsageFlags::VERTEX_BUFFER,
                "vertices",
            );
            let err = result.unwrap_err();
            assert!(!err.is_timeout(), "{:?} reported as a timeout", point);

            let live = harness.backend.live_objects();
            assert_eq!(live.buffers, 0, "{:?} leaked a buffer", point);
            assert_eq!(live.command_buffers, 0, "{:?} leaked a command buffer", point);
            assert_eq!(live.fences, 0, "{:?} leaked a fence", point);
            assert!(harness.backend.validation_errors().is_empty());
        }
    }

    #[test]
    fn stalled_fence_times_out_and_leaks_in_flight_resources() {
        let harness = Harness::new();
        let timeout = Duration::from_millis(20);
        let uploader = TransferUploader::new(TransferConfig {
            fence_timeout: timeout,
            ..Default::default()
        });
        harness.backend.set_stalled(true);

        let started = std::time::Instant::now();
        let err = uploader
            .upload(
                &harness.ctx(),
                &[1; 64],
                vk::BufferUsageFlags::VERTEX_BUFFER,
                "vertices",
            )
            .unwrap_err();
        assert!(started.elapsed() >= timeout);
        assert_eq!(err, GpuError::FenceTimeout(timeout));

        let live = harness.backend.live_objects();
        assert_eq!(live.buffers, 2);
        assert_eq!(live.command_buffers, 1);
        assert_eq!(live.fences, 1);
        // Nothing was torn down underneath the pending submission
        assert!(harness.backend.validation_errors().is_empty());

        harness.backend.set_stalled(false);
        assert!(harness.backend.validation_errors().is_empty());
    }
}
