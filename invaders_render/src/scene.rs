use anyhow::Result;
use invaders_gpu::command::CommandBufferRecording;
use invaders_gpu::descriptor::DescriptorPool;
use invaders_gpu::device::LogicalDevice;
use tracing::debug;

use crate::GameEntity;

/// Uniform storage for every live entity.
///
/// Entities are allocated from the scene's descriptor pool on insertion. Use a pool created with
/// `FREE_DESCRIPTOR_SET` if entities come and go, otherwise removed entities keep their sets
/// until the pool is destroyed.
#[derive(Debug)]
pub struct Scene {
    device: LogicalDevice,
    descriptor_pool: DescriptorPool,
    entities: Vec<Box<dyn GameEntity>>,
}

impl Scene {
    pub fn new(device: LogicalDevice, descriptor_pool: DescriptorPool) -> Self {
        Self {
            device,
            descriptor_pool,
            entities: Vec::new(),
        }
    }

    /// Allocate the entity's resources and start simulating it. Returns its index.
    ///
    /// On failure the entity is dropped together with anything it allocated.
    pub fn insert<E: GameEntity + 'static>(&mut self, entity: E) -> Result<usize> {
        self.insert_boxed(Box::new(entity))
    }

    pub fn insert_boxed(&mut self, mut entity: Box<dyn GameEntity>) -> Result<usize> {
        entity.allocate_resources(&self.device, &self.descriptor_pool)?;
        self.entities.push(entity);
        Ok(self.entities.len() - 1)
    }

    pub fn update(&mut self, dt: f32) {
        for entity in self.entities.iter_mut() {
            entity.update(dt);
        }
    }

    pub fn draw(&self, cmd: &CommandBufferRecording) {
        for entity in self.entities.iter() {
            entity.draw(cmd);
        }
    }

    /// Remove and return the entity at `index`, shifting later entities down
    pub fn remove(&mut self, index: usize) -> Option<Box<dyn GameEntity>> {
        (index < self.entities.len()).then(|| self.entities.remove(index))
    }

    /// Keep only the entities for which `keep` returns true, releasing the others
    pub fn retain<F: FnMut(&dyn GameEntity) -> bool>(&mut self, mut keep: F) {
        let before = self.entities.len();
        self.entities.retain(|entity| keep(entity.as_ref()));
        let removed = before - self.entities.len();
        if removed > 0 {
            debug!("Released {} entities", removed);
        }
    }

    pub fn get(&self, index: usize) -> Option<&dyn GameEntity> {
        self.entities.get(index).map(|entity| entity.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn GameEntity> {
        self.entities.iter().map(|entity| entity.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    pub fn get_device(&self) -> &LogicalDevice {
        &self.device
    }

    pub fn descriptor_pool(&self) -> &DescriptorPool {
        &self.descriptor_pool
    }
}
