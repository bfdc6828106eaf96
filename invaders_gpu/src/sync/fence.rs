use std::time::Duration;

use ash::vk;
#[allow(unused_imports)]
use tracing::trace;

use crate::device::LogicalDevice;
use crate::traits::Destructible;
use crate::GpuError;

#[derive(Debug)]
pub struct Fence {
    handle: Option<vk::Fence>,
    device: LogicalDevice,
}

impl Fence {
    pub fn new(device: LogicalDevice, flags: vk::FenceCreateFlags) -> Result<Self, GpuError> {
        let handle = device.get_handle().create_fence(flags)?;

        #[cfg(feature = "log-lifetimes")]
        trace!("Creating VkFence {:?}", handle);

        Ok(Self {
            handle: Some(handle),
            device,
        })
    }

    /// Raw handle, or [`vk::Fence::null`] once destroyed
    pub fn handle(&self) -> vk::Fence {
        self.handle.unwrap_or_default()
    }

    /// Waits on the fence for at most `timeout`.
    ///
    /// Returns [`GpuError::FenceTimeout`] if the fence has not signaled by then.
    pub fn wait(&self, timeout: Duration) -> Result<(), GpuError> {
        let handle = self.handle.ok_or(GpuError::Destroyed)?;
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        if self.device.get_handle().wait_for_fence(handle, timeout_ns)? {
            Ok(())
        } else {
            Err(GpuError::FenceTimeout(timeout))
        }
    }

    /// Resets the fence
    pub fn reset(&self) -> Result<(), GpuError> {
        let handle = self.handle.ok_or(GpuError::Destroyed)?;
        self.device.get_handle().reset_fence(handle)
    }

    /// Give up ownership of the fence without destroying it.
    ///
    /// Used when work that signals the fence may still be in flight.
    pub fn leak(mut self) -> vk::Fence {
        self.handle.take().unwrap_or_default()
    }
}

impl Destructible for Fence {
    fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            #[cfg(feature = "log-lifetimes")]
            trace!("Destroying VkFence {:?}", handle);

            self.device.get_handle().destroy_fence(handle);
        }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::HeadlessBackend;

    #[test]
    fn signaled_fence_waits_immediately() {
        let backend = Arc::new(HeadlessBackend::default());
        let device = LogicalDevice::from_arc(backend.clone());
        let fence = Fence::new(device, vk::FenceCreateFlags::SIGNALED).unwrap();
        assert!(fence.wait(Duration::from_secs(1)).is_ok());

        fence.reset().unwrap();
        let err = fence.wait(Duration::from_millis(1)).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err, GpuError::FenceTimeout(Duration::from_millis(1)));

        drop(fence);
        assert_eq!(backend.live_objects().fences, 0);
        assert!(backend.validation_errors().is_empty());
    }

    #[test]
    fn leaked_fence_stays_alive() {
        let backend = Arc::new(HeadlessBackend::default());
        let device = LogicalDevice::from_arc(backend.clone());
        let fence = Fence::new(device, vk::FenceCreateFlags::empty()).unwrap();
        let raw = fence.leak();
        assert_ne!(raw, vk::Fence::null());
        assert_eq!(backend.live_objects().fences, 1);
    }
}
