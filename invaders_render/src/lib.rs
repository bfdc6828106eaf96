mod bounding_box;
mod entity;
mod mesh;
mod mesh_cache;
mod scene;

pub use bounding_box::BoundingBox;
pub use entity::{Entity, GameEntity, SyncState, TransformUniform};
pub use mesh::MeshAsset;
pub use mesh_cache::MeshCache;
pub use scene::Scene;
