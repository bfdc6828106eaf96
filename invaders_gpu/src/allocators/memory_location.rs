/// Where a buffer's memory lives and whether the host can see it
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Device-local memory, never mapped
    GpuOnly,
    /// Host-visible, host-coherent memory useful for uploading data to the device. Always
    /// persistently mapped.
    CpuToGpu,
    /// Host-visible memory useful for read back of data. Always persistently mapped.
    GpuToCpu,
}

impl MemoryLocation {
    /// Whether memory in this location has a persistent host mapping
    pub fn is_host_visible(&self) -> bool {
        !matches!(self, MemoryLocation::GpuOnly)
    }
}

#[cfg(feature = "vulkan")]
impl From<MemoryLocation> for gpu_allocator::MemoryLocation {
    fn from(value: MemoryLocation) -> Self {
        match value {
            MemoryLocation::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
            MemoryLocation::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
            MemoryLocation::GpuToCpu => gpu_allocator::MemoryLocation::GpuToCpu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_gpu_only_is_hidden_from_host() {
        assert!(!MemoryLocation::GpuOnly.is_host_visible());
        assert!(MemoryLocation::CpuToGpu.is_host_visible());
        assert!(MemoryLocation::GpuToCpu.is_host_visible());
    }
}
