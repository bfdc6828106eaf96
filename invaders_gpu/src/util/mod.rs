/// Utility functions commonly used
pub mod transfer;

pub use transfer::{TransferConfig, TransferUploader, UploadContext, DEFAULT_FENCE_TIMEOUT};
