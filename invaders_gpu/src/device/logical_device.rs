use std::sync::Arc;

use derivative::Derivative;

use crate::device::DeviceBackend;

/// Reference counted handle to a [`DeviceBackend`].
///
/// Every resource wrapper keeps a clone so it can release itself on drop; operations that need
/// a device take one explicitly. The backend itself is torn down once the last clone is gone.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct LogicalDevice {
    #[derivative(Debug = "ignore")]
    inner: Arc<dyn DeviceBackend>,
}

impl LogicalDevice {
    pub fn new<B: DeviceBackend + 'static>(backend: B) -> Self {
        Self {
            inner: Arc::new(backend),
        }
    }

    /// Wrap a backend that is already shared, e.g. to keep a typed handle to a
    /// [`HeadlessBackend`](crate::device::HeadlessBackend) for inspection
    pub fn from_arc(inner: Arc<dyn DeviceBackend>) -> Self {
        Self { inner }
    }

    /// Get a reference to the underlying backend
    pub fn get_handle(&self) -> &dyn DeviceBackend {
        self.inner.as_ref()
    }
}

impl PartialEq for LogicalDevice {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for LogicalDevice {}
