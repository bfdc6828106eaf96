//! An in-memory [`DeviceBackend`] with no GPU behind it.
//!
//! Buffer memory is plain host memory, recorded copies are executed when a command buffer is
//! submitted and fences signal as soon as their submission has run. Draws and barriers are only
//! recorded so callers can inspect them.
//!
//! The backend also does the bookkeeping a validation layer would: destroying unknown handles,
//! double frees, copies without the right usage flags or out of bounds, and resources torn down
//! while a submission still references them are all reported through
//! [`HeadlessBackend::validation_errors`] rather than crashing.

use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::ptr::{self, NonNull};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ash::vk;
use ash::vk::Handle;
use tracing::error;

use crate::allocators::MemoryLocation;
use crate::device::{DeviceBackend, Queue, RawBuffer, RawBufferDesc};
use crate::GpuError;

/// Device calls that can be made to fail on purpose
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateBuffer,
    AllocateCommandBuffers,
    QueueSubmit,
    CreateFence,
    CreateDescriptorSetLayout,
    AllocateDescriptorSet,
}

/// A single buffer-to-buffer copy region
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CopyRegion {
    pub src_offset: vk::DeviceSize,
    pub dst_offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

/// A command as it was recorded into a command buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<CopyRegion>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
        offsets: Vec<vk::DeviceSize>,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
    MemoryBarrier {
        src_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_stage: vk::PipelineStageFlags,
        dst_access: vk::AccessFlags,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
}

/// Number of objects of each kind currently alive on the device
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct LiveObjects {
    pub buffers: usize,
    pub command_pools: usize,
    pub command_buffers: usize,
    pub fences: usize,
    pub descriptor_set_layouts: usize,
    pub descriptor_pools: usize,
    pub descriptor_sets: usize,
}

impl LiveObjects {
    pub fn total(&self) -> usize {
        self.buffers
            + self.command_pools
            + self.command_buffers
            + self.fences
            + self.descriptor_set_layouts
            + self.descriptor_pools
            + self.descriptor_sets
    }
}

struct HeadlessBuffer {
    name: String,
    memory: NonNull<u8>,
    size: usize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
}

// SAFETY: the memory is exclusively owned by the buffer and only touched while the state mutex
// is held or through the mapping handed out to the buffer's single owner
unsafe impl Send for HeadlessBuffer {}

impl HeadlessBuffer {
    fn new(desc: &RawBufferDesc) -> Self {
        let memory = Box::into_raw(vec![0u8; desc.size as usize].into_boxed_slice());
        Self {
            name: desc.name.to_string(),
            // SAFETY: Box::into_raw never returns null
            memory: unsafe { NonNull::new_unchecked(memory as *mut u8) },
            size: desc.size as usize,
            usage: desc.usage,
            location: desc.location,
        }
    }

    fn contents(&self) -> Vec<u8> {
        unsafe { std::slice::from_raw_parts(self.memory.as_ptr(), self.size) }.to_vec()
    }
}

impl Drop for HeadlessBuffer {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.memory.as_ptr(),
                self.size,
            )));
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Pending,
}

struct HeadlessCommandBuffer {
    pool: u64,
    state: CommandBufferState,
    commands: Vec<RecordedCommand>,
}

struct HeadlessDescriptorPool {
    max_sets: u32,
    flags: vk::DescriptorPoolCreateFlags,
    sets: HashSet<u64>,
}

struct HeadlessDescriptorSet {
    pool: u64,
    layout: u64,
    bindings: HashMap<u32, vk::Buffer>,
}

struct Submission {
    command_buffers: Vec<u64>,
    fence: u64,
}

#[derive(Default)]
struct HeadlessState {
    next_handle: u64,
    buffers: HashMap<u64, HeadlessBuffer>,
    command_pools: HashMap<u64, HashSet<u64>>,
    command_buffers: HashMap<u64, HeadlessCommandBuffer>,
    fences: HashMap<u64, bool>,
    layouts: HashMap<u64, Vec<(u32, vk::DescriptorType)>>,
    descriptor_pools: HashMap<u64, HeadlessDescriptorPool>,
    descriptor_sets: HashMap<u64, HeadlessDescriptorSet>,
    pending: Vec<Submission>,
    submissions: usize,
    submitted_commands: Vec<Vec<RecordedCommand>>,
    stalled: bool,
    fail_points: HashSet<FailPoint>,
    validation_errors: Vec<String>,
}

impl HeadlessState {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn flag(&mut self, message: String) {
        error!("Headless validation: {}", message);
        self.validation_errors.push(message);
    }

    fn should_fail(&mut self, point: FailPoint) -> bool {
        self.fail_points.remove(&point)
    }

    fn record(&mut self, command_buffer: vk::CommandBuffer, command: RecordedCommand) {
        match self.command_buffers.get_mut(&command_buffer.as_raw()) {
            Some(cmd) if cmd.state == CommandBufferState::Recording => cmd.commands.push(command),
            Some(_) => self.flag(format!(
                "Recorded {:?} into command buffer {:#x} which is not recording",
                command,
                command_buffer.as_raw()
            )),
            None => self.flag(format!(
                "Recorded into unknown command buffer {:#x}",
                command_buffer.as_raw()
            )),
        }
    }

    fn in_flight(&self) -> impl Iterator<Item = &RecordedCommand> {
        self.pending
            .iter()
            .flat_map(|submission| submission.command_buffers.iter())
            .filter_map(|cmd| self.command_buffers.get(cmd))
            .flat_map(|cmd| cmd.commands.iter())
    }

    fn buffer_in_flight(&self, buffer: u64) -> bool {
        self.in_flight().any(|command| match command {
            RecordedCommand::CopyBuffer { src, dst, .. } => {
                src.as_raw() == buffer || dst.as_raw() == buffer
            }
            _ => false,
        })
    }

    fn copy(&mut self, src: vk::Buffer, dst: vk::Buffer, region: &CopyRegion) {
        let (Some(src_buffer), Some(dst_buffer)) = (
            self.buffers.get(&src.as_raw()),
            self.buffers.get(&dst.as_raw()),
        ) else {
            self.flag(format!(
                "Copy between unknown buffers {:#x} -> {:#x}",
                src.as_raw(),
                dst.as_raw()
            ));
            return;
        };
        let mut problems = Vec::new();
        if !src_buffer.usage.contains(vk::BufferUsageFlags::TRANSFER_SRC) {
            problems.push(format!("source \"{}\" lacks TRANSFER_SRC", src_buffer.name));
        }
        if !dst_buffer.usage.contains(vk::BufferUsageFlags::TRANSFER_DST) {
            problems.push(format!("destination \"{}\" lacks TRANSFER_DST", dst_buffer.name));
        }
        if region.src_offset + region.size > src_buffer.size as u64
            || region.dst_offset + region.size > dst_buffer.size as u64
        {
            problems.push(format!("region {:?} is out of bounds", region));
        }
        if problems.is_empty() {
            unsafe {
                ptr::copy(
                    src_buffer.memory.as_ptr().add(region.src_offset as usize),
                    dst_buffer.memory.as_ptr().add(region.dst_offset as usize),
                    region.size as usize,
                );
            }
        }
        for problem in problems {
            self.flag(format!("Invalid copy: {}", problem));
        }
    }

    fn execute(&mut self, submission: Submission) {
        for cmd in submission.command_buffers.iter() {
            let commands = match self.command_buffers.get_mut(cmd) {
                Some(command_buffer) => {
                    command_buffer.state = CommandBufferState::Executable;
                    command_buffer.commands.clone()
                }
                None => continue,
            };
            for command in commands.iter() {
                if let RecordedCommand::CopyBuffer { src, dst, regions } = command {
                    for region in regions {
                        self.copy(*src, *dst, region);
                    }
                }
            }
        }
        if let Some(signaled) = self.fences.get_mut(&submission.fence) {
            *signaled = true;
        }
    }
}

/// Software device used for tests and tooling
pub struct HeadlessBackend {
    state: Mutex<HeadlessState>,
    queue: Queue,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self {
            state: Mutex::new(HeadlessState::default()),
            queue: Queue::new(vk::Queue::from_raw(u64::MAX), 0),
        }
    }
}

impl Debug for HeadlessBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessBackend")
            .field("live", &self.live_objects())
            .finish()
    }
}

impl HeadlessBackend {
    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The device's single queue
    pub fn queue(&self) -> Queue {
        self.queue
    }

    pub fn live_objects(&self) -> LiveObjects {
        let state = self.state();
        LiveObjects {
            buffers: state.buffers.len(),
            command_pools: state.command_pools.len(),
            command_buffers: state.command_buffers.len(),
            fences: state.fences.len(),
            descriptor_set_layouts: state.layouts.len(),
            descriptor_pools: state.descriptor_pools.len(),
            descriptor_sets: state.descriptor_sets.len(),
        }
    }

    pub fn validation_errors(&self) -> Vec<String> {
        self.state().validation_errors.clone()
    }

    /// Number of queue submissions accepted so far
    pub fn submission_count(&self) -> usize {
        self.state().submissions
    }

    /// Commands of every accepted submission, in submission order. Outlives the command buffers.
    pub fn submitted_commands(&self) -> Vec<Vec<RecordedCommand>> {
        self.state().submitted_commands.clone()
    }

    /// Read a buffer's contents regardless of where it lives
    pub fn read_buffer(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state()
            .buffers
            .get(&buffer.as_raw())
            .map(HeadlessBuffer::contents)
    }

    pub fn buffer_location(&self, buffer: vk::Buffer) -> Option<MemoryLocation> {
        self.state()
            .buffers
            .get(&buffer.as_raw())
            .map(|buffer| buffer.location)
    }

    pub fn buffer_usage(&self, buffer: vk::Buffer) -> Option<vk::BufferUsageFlags> {
        self.state()
            .buffers
            .get(&buffer.as_raw())
            .map(|buffer| buffer.usage)
    }

    pub fn recorded_commands(&self, command_buffer: vk::CommandBuffer) -> Vec<RecordedCommand> {
        self.state()
            .command_buffers
            .get(&command_buffer.as_raw())
            .map(|cmd| cmd.commands.clone())
            .unwrap_or_default()
    }

    /// Buffer written into `binding` of `set`, if any
    pub fn descriptor_binding(&self, set: vk::DescriptorSet, binding: u32) -> Option<vk::Buffer> {
        self.state()
            .descriptor_sets
            .get(&set.as_raw())
            .and_then(|set| set.bindings.get(&binding).copied())
    }

    /// Bindings of a descriptor set layout as `(binding, type)` pairs
    pub fn layout_bindings(
        &self,
        layout: vk::DescriptorSetLayout,
    ) -> Option<Vec<(u32, vk::DescriptorType)>> {
        self.state().layouts.get(&layout.as_raw()).cloned()
    }

    /// Make the next call of the given kind fail
    pub fn fail_next(&self, point: FailPoint) {
        self.state().fail_points.insert(point);
    }

    /// While stalled, submissions are accepted but never run, so their fences never signal
    pub fn set_stalled(&self, stalled: bool) {
        let mut state = self.state();
        state.stalled = stalled;
        if !stalled {
            let pending = std::mem::take(&mut state.pending);
            for submission in pending {
                state.execute(submission);
            }
        }
    }
}

impl DeviceBackend for HeadlessBackend {
    fn create_buffer(&self, desc: &RawBufferDesc) -> Result<RawBuffer, GpuError> {
        let mut state = self.state();
        if state.should_fail(FailPoint::CreateBuffer) {
            return Err(GpuError::VkError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        if desc.size == 0 {
            return Err(GpuError::ZeroSizedBuffer);
        }
        let buffer = HeadlessBuffer::new(desc);
        let mapped = desc.location.is_host_visible().then_some(buffer.memory);
        let handle = state.next_handle();
        state.buffers.insert(handle, buffer);
        Ok(RawBuffer {
            handle: vk::Buffer::from_raw(handle),
            mapped,
        })
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state();
        if state.buffer_in_flight(buffer.as_raw()) {
            state.flag(format!(
                "Buffer {:#x} destroyed while a submission still uses it",
                buffer.as_raw()
            ));
        }
        if state.buffers.remove(&buffer.as_raw()).is_none() {
            state.flag(format!("Destroyed unknown buffer {:#x}", buffer.as_raw()));
        }
    }

    fn create_command_pool(
        &self,
        _queue_family_index: u32,
        _flags: vk::CommandPoolCreateFlags,
    ) -> Result<vk::CommandPool, GpuError> {
        let mut state = self.state();
        let handle = state.next_handle();
        state.command_pools.insert(handle, HashSet::new());
        Ok(vk::CommandPool::from_raw(handle))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state();
        match state.command_pools.remove(&pool.as_raw()) {
            Some(command_buffers) => {
                for cmd in command_buffers {
                    let pending = state
                        .command_buffers
                        .remove(&cmd)
                        .is_some_and(|cmd| cmd.state == CommandBufferState::Pending);
                    if pending {
                        state.flag(format!(
                            "Command pool {:#x} destroyed while command buffer {:#x} is pending",
                            pool.as_raw(),
                            cmd
                        ));
                    }
                }
            }
            None => state.flag(format!("Destroyed unknown command pool {:#x}", pool.as_raw())),
        }
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, GpuError> {
        let mut state = self.state();
        if state.should_fail(FailPoint::AllocateCommandBuffers) {
            return Err(GpuError::VkError(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        }
        if !state.command_pools.contains_key(&pool.as_raw()) {
            state.flag(format!("Allocated from unknown command pool {:#x}", pool.as_raw()));
            return Err(GpuError::VkError(vk::Result::ERROR_UNKNOWN));
        }
        let mut allocated = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let handle = state.next_handle();
            state.command_buffers.insert(
                handle,
                HeadlessCommandBuffer {
                    pool: pool.as_raw(),
                    state: CommandBufferState::Initial,
                    commands: Vec::new(),
                },
            );
            if let Some(pool) = state.command_pools.get_mut(&pool.as_raw()) {
                pool.insert(handle);
            }
            allocated.push(vk::CommandBuffer::from_raw(handle));
        }
        Ok(allocated)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, command_buffers: &[vk::CommandBuffer]) {
        let mut state = self.state();
        for cmd in command_buffers {
            match state.command_buffers.get(&cmd.as_raw()) {
                Some(command_buffer) if command_buffer.pool != pool.as_raw() => {
                    state.flag(format!(
                        "Command buffer {:#x} freed into a pool it was not allocated from",
                        cmd.as_raw()
                    ));
                    continue;
                }
                Some(command_buffer) if command_buffer.state == CommandBufferState::Pending => {
                    state.flag(format!(
                        "Command buffer {:#x} freed while pending",
                        cmd.as_raw()
                    ));
                }
                Some(_) => {}
                None => {
                    state.flag(format!("Freed unknown command buffer {:#x}", cmd.as_raw()));
                    continue;
                }
            }
            state.command_buffers.remove(&cmd.as_raw());
            if let Some(pool) = state.command_pools.get_mut(&pool.as_raw()) {
                pool.remove(&cmd.as_raw());
            }
        }
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> Result<(), GpuError> {
        let mut state = self.state();
        match state.command_buffers.get_mut(&command_buffer.as_raw()) {
            Some(cmd) if cmd.state != CommandBufferState::Pending => {
                cmd.state = CommandBufferState::Recording;
                cmd.commands.clear();
                Ok(())
            }
            _ => {
                state.flag(format!(
                    "Cannot begin command buffer {:#x}",
                    command_buffer.as_raw()
                ));
                Err(GpuError::VkError(vk::Result::ERROR_UNKNOWN))
            }
        }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<(), GpuError> {
        let mut state = self.state();
        match state.command_buffers.get_mut(&command_buffer.as_raw()) {
            Some(cmd) if cmd.state == CommandBufferState::Recording => {
                cmd.state = CommandBufferState::Executable;
                Ok(())
            }
            _ => {
                state.flag(format!(
                    "Cannot end command buffer {:#x} which is not recording",
                    command_buffer.as_raw()
                ));
                Err(GpuError::VkError(vk::Result::ERROR_UNKNOWN))
            }
        }
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        let regions = regions
            .iter()
            .map(|region| CopyRegion {
                src_offset: region.src_offset,
                dst_offset: region.dst_offset,
                size: region.size,
            })
            .collect();
        self.state().record(
            command_buffer,
            RecordedCommand::CopyBuffer { src, dst, regions },
        );
    }

    fn cmd_memory_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_stage: vk::PipelineStageFlags,
        dst_access: vk::AccessFlags,
    ) {
        self.state().record(
            command_buffer,
            RecordedCommand::MemoryBarrier {
                src_stage,
                src_access,
                dst_stage,
                dst_access,
            },
        );
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        self.state().record(
            command_buffer,
            RecordedCommand::BindVertexBuffers {
                first_binding,
                buffers: buffers.to_vec(),
                offsets: offsets.to_vec(),
            },
        );
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.state().record(
            command_buffer,
            RecordedCommand::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            },
        );
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
        self.state().record(
            command_buffer,
            RecordedCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            },
        );
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        command_buffers: &[vk::CommandBuffer],
        fence: vk::Fence,
    ) -> Result<(), GpuError> {
        let mut state = self.state();
        if state.should_fail(FailPoint::QueueSubmit) {
            return Err(GpuError::VkError(vk::Result::ERROR_DEVICE_LOST));
        }
        if queue != self.queue.handle() {
            state.flag(format!("Submitted to unknown queue {:#x}", queue.as_raw()));
            return Err(GpuError::VkError(vk::Result::ERROR_UNKNOWN));
        }
        match state.fences.get(&fence.as_raw()) {
            Some(false) => {}
            Some(true) => {
                state.flag(format!("Submitted with signaled fence {:#x}", fence.as_raw()));
                return Err(GpuError::VkError(vk::Result::ERROR_UNKNOWN));
            }
            None => {
                state.flag(format!("Submitted with unknown fence {:#x}", fence.as_raw()));
                return Err(GpuError::VkError(vk::Result::ERROR_UNKNOWN));
            }
        }
        for cmd in command_buffers {
            let executable = state
                .command_buffers
                .get(&cmd.as_raw())
                .is_some_and(|cmd| cmd.state == CommandBufferState::Executable);
            if !executable {
                state.flag(format!(
                    "Submitted command buffer {:#x} which is not executable",
                    cmd.as_raw()
                ));
                return Err(GpuError::VkError(vk::Result::ERROR_UNKNOWN));
            }
        }

        let submission = Submission {
            command_buffers: command_buffers.iter().map(|cmd| cmd.as_raw()).collect(),
            fence: fence.as_raw(),
        };
        state.submissions += 1;
        let commands = submission
            .command_buffers
            .iter()
            .filter_map(|cmd| state.command_buffers.get(cmd))
            .flat_map(|cmd| cmd.commands.iter().cloned())
            .collect();
        state.submitted_commands.push(commands);
        if state.stalled {
            for cmd in submission.command_buffers.iter() {
                if let Some(cmd) = state.command_buffers.get_mut(cmd) {
                    cmd.state = CommandBufferState::Pending;
                }
            }
            state.pending.push(submission);
        } else {
            state.execute(submission);
        }
        Ok(())
    }

    fn create_fence(&self, flags: vk::FenceCreateFlags) -> Result<vk::Fence, GpuError> {
        let mut state = self.state();
        if state.should_fail(FailPoint::CreateFence) {
            return Err(GpuError::VkError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        let handle = state.next_handle();
        state
            .fences
            .insert(handle, flags.contains(vk::FenceCreateFlags::SIGNALED));
        Ok(vk::Fence::from_raw(handle))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        if state
            .pending
            .iter()
            .any(|submission| submission.fence == fence.as_raw())
        {
            state.flag(format!(
                "Fence {:#x} destroyed while its submission is pending",
                fence.as_raw()
            ));
        }
        if state.fences.remove(&fence.as_raw()).is_none() {
            state.flag(format!("Destroyed unknown fence {:#x}", fence.as_raw()));
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<bool, GpuError> {
        {
            let mut state = self.state();
            match state.fences.get(&fence.as_raw()) {
                Some(true) => return Ok(true),
                Some(false) => {}
                None => {
                    state.flag(format!("Waited on unknown fence {:#x}", fence.as_raw()));
                    return Err(GpuError::VkError(vk::Result::ERROR_UNKNOWN));
                }
            }
        }
        // Work only ever completes at submission or when un-stalled, so nothing can signal the
        // fence while we sleep
        std::thread::sleep(Duration::from_nanos(timeout_ns));
        Ok(self
            .state()
            .fences
            .get(&fence.as_raw())
            .copied()
            .unwrap_or(false))
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError> {
        let mut state = self.state();
        match state.fences.get_mut(&fence.as_raw()) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => {
                state.flag(format!("Reset unknown fence {:#x}", fence.as_raw()));
                Err(GpuError::VkError(vk::Result::ERROR_UNKNOWN))
            }
        }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
        _flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> Result<vk::DescriptorSetLayout, GpuError> {
        let mut state = self.state();
        if state.should_fail(FailPoint::CreateDescriptorSetLayout) {
            return Err(GpuError::VkError(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        }
        let handle = state.next_handle();
        state.layouts.insert(
            handle,
            bindings
                .iter()
                .map(|binding| (binding.binding, binding.descriptor_type))
                .collect(),
        );
        Ok(vk::DescriptorSetLayout::from_raw(handle))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        let mut state = self.state();
        if state.layouts.remove(&layout.as_raw()).is_none() {
            state.flag(format!(
                "Destroyed unknown descriptor set layout {:#x}",
                layout.as_raw()
            ));
        }
    }

    fn create_descriptor_pool(
        &self,
        _sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
        flags: vk::DescriptorPoolCreateFlags,
    ) -> Result<vk::DescriptorPool, GpuError> {
        let mut state = self.state();
        let handle = state.next_handle();
        state.descriptor_pools.insert(
            handle,
            HeadlessDescriptorPool {
                max_sets,
                flags,
                sets: HashSet::new(),
            },
        );
        Ok(vk::DescriptorPool::from_raw(handle))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        match state.descriptor_pools.remove(&pool.as_raw()) {
            Some(pool) => {
                for set in pool.sets {
                    state.descriptor_sets.remove(&set);
                }
            }
            None => state.flag(format!(
                "Destroyed unknown descriptor pool {:#x}",
                pool.as_raw()
            )),
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, GpuError> {
        let mut state = self.state();
        if state.should_fail(FailPoint::AllocateDescriptorSet) {
            return Err(GpuError::VkError(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        if !state.layouts.contains_key(&layout.as_raw()) {
            state.flag(format!(
                "Allocated descriptor set with unknown layout {:#x}",
                layout.as_raw()
            ));
            return Err(GpuError::VkError(vk::Result::ERROR_UNKNOWN));
        }
        let exhausted = match state.descriptor_pools.get(&pool.as_raw()) {
            Some(descriptor_pool) => descriptor_pool.sets.len() as u32 >= descriptor_pool.max_sets,
            None => {
                state.flag(format!(
                    "Allocated from unknown descriptor pool {:#x}",
                    pool.as_raw()
                ));
                return Err(GpuError::VkError(vk::Result::ERROR_UNKNOWN));
            }
        };
        if exhausted {
            return Err(GpuError::VkError(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        let handle = state.next_handle();
        state.descriptor_sets.insert(
            handle,
            HeadlessDescriptorSet {
                pool: pool.as_raw(),
                layout: layout.as_raw(),
                bindings: HashMap::new(),
            },
        );
        if let Some(descriptor_pool) = state.descriptor_pools.get_mut(&pool.as_raw()) {
            descriptor_pool.sets.insert(handle);
        }
        Ok(vk::DescriptorSet::from_raw(handle))
    }

    fn free_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        set: vk::DescriptorSet,
    ) -> Result<(), GpuError> {
        let mut state = self.state();
        let freeable = state
            .descriptor_pools
            .get(&pool.as_raw())
            .map(|pool| {
                pool.flags
                    .contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            });
        match freeable {
            Some(true) => {}
            Some(false) => {
                state.flag(format!(
                    "Freed descriptor set {:#x} into pool without FREE_DESCRIPTOR_SET",
                    set.as_raw()
                ));
                return Err(GpuError::VkError(vk::Result::ERROR_UNKNOWN));
            }
            None => {
                state.flag(format!(
                    "Freed descriptor set into unknown pool {:#x}",
                    pool.as_raw()
                ));
                return Err(GpuError::VkError(vk::Result::ERROR_UNKNOWN));
            }
        }
        let owned = state
            .descriptor_sets
            .get(&set.as_raw())
            .is_some_and(|descriptor_set| descriptor_set.pool == pool.as_raw());
        if !owned {
            state.flag(format!(
                "Freed unknown descriptor set {:#x}",
                set.as_raw()
            ));
            return Err(GpuError::VkError(vk::Result::ERROR_UNKNOWN));
        }
        state.descriptor_sets.remove(&set.as_raw());
        if let Some(descriptor_pool) = state.descriptor_pools.get_mut(&pool.as_raw()) {
            descriptor_pool.sets.remove(&set.as_raw());
        }
        Ok(())
    }

    fn write_buffer_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    ) {
        let mut state = self.state();
        let Some(layout) = state
            .descriptor_sets
            .get(&set.as_raw())
            .map(|descriptor_set| descriptor_set.layout)
        else {
            state.flag(format!("Wrote to unknown descriptor set {:#x}", set.as_raw()));
            return;
        };
        let declared = state
            .layouts
            .get(&layout)
            .and_then(|bindings| bindings.iter().find(|(slot, _)| *slot == binding))
            .map(|(_, declared)| *declared);
        if declared != Some(ty) {
            state.flag(format!(
                "Binding {} of set {:#x} is declared as {:?}, written as {:?}",
                binding,
                set.as_raw(),
                declared,
                ty
            ));
            return;
        }
        let problem = match state.buffers.get(&info.buffer.as_raw()) {
            None => Some(format!(
                "Descriptor references unknown buffer {:#x}",
                info.buffer.as_raw()
            )),
            Some(buffer)
                if ty == vk::DescriptorType::UNIFORM_BUFFER
                    && !buffer.usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) =>
            {
                Some(format!("Buffer \"{}\" lacks UNIFORM_BUFFER", buffer.name))
            }
            Some(buffer)
                if info.range != vk::WHOLE_SIZE
                    && info.offset + info.range > buffer.size as u64 =>
            {
                Some(format!("Descriptor range overruns buffer \"{}\"", buffer.name))
            }
            Some(_) => None,
        };
        if let Some(problem) = problem {
            state.flag(problem);
            return;
        }
        if let Some(descriptor_set) = state.descriptor_sets.get_mut(&set.as_raw()) {
            descriptor_set.bindings.insert(binding, info.buffer);
        }
    }

    fn device_wait_idle(&self) -> Result<(), GpuError> {
        if self.state().pending.is_empty() {
            Ok(())
        } else {
            Err(GpuError::VkError(vk::Result::TIMEOUT))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(size: u64, usage: vk::BufferUsageFlags, location: MemoryLocation) -> RawBufferDesc<'static> {
        RawBufferDesc {
            name: "test",
            size,
            usage,
            location,
        }
    }

    #[test]
    fn only_host_visible_buffers_are_mapped() {
        let backend = HeadlessBackend::default();
        let host = backend
            .create_buffer(&desc(16, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu))
            .unwrap();
        let device = backend
            .create_buffer(&desc(16, vk::BufferUsageFlags::TRANSFER_DST, MemoryLocation::GpuOnly))
            .unwrap();
        assert!(host.mapped.is_some());
        assert!(device.mapped.is_none());
        assert_eq!(backend.live_objects().buffers, 2);
    }

    #[test]
    fn double_destroy_is_reported() {
        let backend = HeadlessBackend::default();
        let buffer = backend
            .create_buffer(&desc(4, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu))
            .unwrap();
        backend.destroy_buffer(buffer.handle);
        assert!(backend.validation_errors().is_empty());
        backend.destroy_buffer(buffer.handle);
        assert_eq!(backend.validation_errors().len(), 1);
    }

    #[test]
    fn copy_runs_on_submit_and_signals_fence() {
        let backend = HeadlessBackend::default();
        let src = backend
            .create_buffer(&desc(4, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu))
            .unwrap();
        let dst = backend
            .create_buffer(&desc(4, vk::BufferUsageFlags::TRANSFER_DST, MemoryLocation::GpuOnly))
            .unwrap();
        unsafe {
            ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), src.mapped.unwrap().as_ptr(), 4);
        }

        let pool = backend
            .create_command_pool(0, vk::CommandPoolCreateFlags::TRANSIENT)
            .unwrap();
        let cmd = backend.allocate_command_buffers(pool, 1).unwrap()[0];
        backend
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .unwrap();
        backend.cmd_copy_buffer(
            cmd,
            src.handle,
            dst.handle,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 4,
            }],
        );
        backend.end_command_buffer(cmd).unwrap();
        let fence = backend.create_fence(vk::FenceCreateFlags::empty()).unwrap();
        backend
            .queue_submit(backend.queue().handle(), &[cmd], fence)
            .unwrap();

        assert!(backend.wait_for_fence(fence, 0).unwrap());
        assert_eq!(backend.read_buffer(dst.handle).unwrap(), vec![1, 2, 3, 4]);
        assert!(backend.validation_errors().is_empty());
    }

    #[test]
    fn stalled_submissions_never_signal_until_resumed() {
        let backend = HeadlessBackend::default();
        let pool = backend
            .create_command_pool(0, vk::CommandPoolCreateFlags::empty())
            .unwrap();
        let cmd = backend.allocate_command_buffers(pool, 1).unwrap()[0];
        backend
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::empty())
            .unwrap();
        backend.end_command_buffer(cmd).unwrap();
        let fence = backend.create_fence(vk::FenceCreateFlags::empty()).unwrap();

        backend.set_stalled(true);
        backend
            .queue_submit(backend.queue().handle(), &[cmd], fence)
            .unwrap();
        assert!(!backend.wait_for_fence(fence, 1_000_000).unwrap());
        assert!(backend.device_wait_idle().is_err());

        backend.set_stalled(false);
        assert!(backend.wait_for_fence(fence, 0).unwrap());
        assert!(backend.device_wait_idle().is_ok());
    }

    #[test]
    fn descriptor_pool_enforces_max_sets() {
        let backend = HeadlessBackend::default();
        let layout = backend
            .create_descriptor_set_layout(
                &[vk::DescriptorSetLayoutBinding::default()
                    .binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .descriptor_count(1)],
                vk::DescriptorSetLayoutCreateFlags::empty(),
            )
            .unwrap();
        let pool = backend
            .create_descriptor_pool(&[], 1, vk::DescriptorPoolCreateFlags::empty())
            .unwrap();
        assert!(backend.allocate_descriptor_set(pool, layout).is_ok());
        assert_eq!(
            backend.allocate_descriptor_set(pool, layout),
            Err(GpuError::VkError(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
        );

        backend.destroy_descriptor_pool(pool);
        assert_eq!(backend.live_objects().descriptor_sets, 0);
    }

    #[test]
    fn fail_points_fire_once() {
        let backend = HeadlessBackend::default();
        backend.fail_next(FailPoint::CreateFence);
        assert!(backend.create_fence(vk::FenceCreateFlags::empty()).is_err());
        assert!(backend.create_fence(vk::FenceCreateFlags::empty()).is_ok());
    }
}
