pub use descriptor_pool::{DescriptorPool, DescriptorPoolCreateInfo, PoolSizeRatio};
pub use descriptor_set::DescriptorSet;
pub use descriptor_set_layout::DescriptorSetLayout;
pub use descriptor_set_layout_builder::{DescriptorSetLayoutBinding, DescriptorSetLayoutBuilder};

pub mod descriptor_pool;
pub mod descriptor_set;
pub mod descriptor_set_layout;
pub mod descriptor_set_layout_builder;
