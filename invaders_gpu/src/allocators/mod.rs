pub mod memory_location;

pub use memory_location::*;
