use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};

use anyhow::Result;
use invaders_assets::ParsedMesh;
use invaders_gpu::util::{TransferUploader, UploadContext};
use tracing::debug;

use crate::MeshAsset;

/// Owns every loaded [`MeshAsset`] by id and hands out weak references to entities.
///
/// Removing a mesh releases its buffers once no draw holds a temporary strong reference, so the
/// caller must make sure no submitted frame still uses it.
#[derive(Debug, Default)]
pub struct MeshCache {
    meshes: HashMap<String, Arc<MeshAsset>>,
}

impl MeshCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `mesh`, replacing any mesh with the same id
    pub fn insert(&mut self, mesh: MeshAsset) -> Weak<MeshAsset> {
        let id = mesh.id().to_string();
        let mesh = Arc::new(mesh);
        let weak = Arc::downgrade(&mesh);
        if self.meshes.insert(id.clone(), mesh).is_some() {
            debug!("Replaced cached mesh \"{}\"", id);
        }
        weak
    }

    pub fn load(
        &mut self,
        id: &str,
        parsed: &ParsedMesh,
        uploader: &TransferUploader,
        ctx: &UploadContext,
    ) -> Result<Weak<MeshAsset>> {
        Ok(self.insert(MeshAsset::load(id, parsed, uploader, ctx)?))
    }

    pub fn load_obj<P: AsRef<Path>>(
        &mut self,
        id: &str,
        path: P,
        uploader: &TransferUploader,
        ctx: &UploadContext,
    ) -> Result<Weak<MeshAsset>> {
        Ok(self.insert(MeshAsset::load_obj(id, path, uploader, ctx)?))
    }

    pub fn get(&self, id: &str) -> Option<Weak<MeshAsset>> {
        self.meshes.get(id).map(Arc::downgrade)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.meshes.contains_key(id)
    }

    /// Release a mesh. Entities referencing it stop drawing.
    pub fn remove(&mut self, id: &str) -> bool {
        self.meshes.remove(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.meshes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn clear(&mut self) {
        self.meshes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_references_die_with_the_cache_entry() {
        let mut cache = MeshCache::new();
        let ship = cache.insert(MeshAsset::empty("ship"));
        assert!(cache.contains("ship"));
        assert_eq!(cache.get("ship").and_then(|m| m.upgrade()).unwrap().id(), "ship");

        let replacement = cache.insert(MeshAsset::empty("ship"));
        assert!(ship.upgrade().is_none());
        assert_eq!(cache.len(), 1);

        assert!(cache.remove("ship"));
        assert!(!cache.remove("ship"));
        assert!(replacement.upgrade().is_none());
        assert!(cache.is_empty());
    }
}
