use ash::vk;

/// Represents a [`vk::Queue`] and its family index.
///
/// Queues are owned by the device; this is only a copyable reference to one. Submission goes
/// through [`LogicalDevice`](crate::device::LogicalDevice) and is not internally synchronized.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Queue {
    handle: vk::Queue,
    family_index: u32,
}

impl Queue {
    pub fn new(handle: vk::Queue, family_index: u32) -> Self {
        Self {
            handle,
            family_index,
        }
    }

    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    pub fn get_family_index(&self) -> u32 {
        self.family_index
    }
}
