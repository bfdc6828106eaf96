/// Handles synchronization
pub mod fence;

pub use fence::Fence;
