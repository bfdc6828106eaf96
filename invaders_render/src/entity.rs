use std::fmt::Debug;
use std::sync::{Arc, Weak};

use anyhow::{bail, Result};
use glam::{Mat4, Vec3};
use invaders_gpu::allocators::MemoryLocation;
use invaders_gpu::ash::vk;
use invaders_gpu::command::CommandBufferRecording;
use invaders_gpu::descriptor::{
    DescriptorPool, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBuilder,
};
use invaders_gpu::device::LogicalDevice;
use invaders_gpu::resource::{Buffer, BufferCreateInfo};
use invaders_gpu::traits::Destructible;
use invaders_gpu::GpuError;
use tracing::warn;

use crate::{BoundingBox, MeshAsset};

/// Anything the scene can allocate, simulate and draw
pub trait GameEntity: Debug {
    /// Create the entity's device resources. Called once per entity.
    fn allocate_resources(
        &mut self,
        device: &LogicalDevice,
        descriptor_pool: &DescriptorPool,
    ) -> Result<()>;

    /// Advance the simulation by `dt` seconds
    fn update(&mut self, dt: f32);

    fn draw(&self, cmd: &CommandBufferRecording);

    fn bounds(&self) -> BoundingBox;
}

/// Per-entity uniform data read by the vertex stage
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TransformUniform {
    pub model: Mat4,
}

impl TransformUniform {
    pub const IDENTITY: Self = Self {
        model: Mat4::IDENTITY,
    };
}

/// Whether the uniform buffer reflects the current position
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncState {
    Clean,
    Dirty,
}

/// Dropped in declaration order: set, layout, then the buffer the set references
#[derive(Debug)]
struct EntityResources {
    set: DescriptorSet,
    layout: DescriptorSetLayout,
    uniform: Buffer,
}

/// A movable drawable with its own transform uniform.
///
/// The mesh is shared and only referenced weakly; the entity never destroys it.
#[derive(Debug)]
pub struct Entity {
    position: Vec3,
    origin: Vec3,
    direction: Vec3,
    speed: Vec3,
    size: Vec3,
    state: SyncState,
    mesh: Option<Weak<MeshAsset>>,
    resources: Option<EntityResources>,
}

impl Entity {
    pub fn new(
        mesh: Option<Weak<MeshAsset>>,
        position: Vec3,
        direction: Vec3,
        speed: Vec3,
        size: Vec3,
    ) -> Self {
        Self {
            position,
            origin: position,
            direction,
            speed,
            size,
            state: SyncState::Dirty,
            mesh,
            resources: None,
        }
    }

    /// A projectile fired from `position` towards `direction`
    pub fn projectile(mesh: Weak<MeshAsset>, position: Vec3, direction: Vec3) -> Self {
        Self::new(
            Some(mesh),
            position,
            direction,
            Vec3::splat(7.5),
            Vec3::new(0.25, 0.5, 0.25),
        )
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Teleport the entity. The uniform is rewritten on the next update.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.state = SyncState::Dirty;
    }

    /// Where the entity was created
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Vec3) {
        self.direction = direction;
    }

    pub fn speed(&self) -> Vec3 {
        self.speed
    }

    pub fn size(&self) -> Vec3 {
        self.size
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_allocated(&self) -> bool {
        self.resources.is_some()
    }

    /// The referenced mesh, if it is still loaded
    pub fn mesh(&self) -> Option<Arc<MeshAsset>> {
        self.mesh.as_ref().and_then(Weak::upgrade)
    }

    pub fn set_mesh(&mut self, mesh: Option<Weak<MeshAsset>>) {
        self.mesh = mesh;
    }

    pub fn descriptor_set(&self) -> Option<&DescriptorSet> {
        self.resources.as_ref().map(|resources| &resources.set)
    }

    pub fn descriptor_set_layout(&self) -> Option<&DescriptorSetLayout> {
        self.resources.as_ref().map(|resources| &resources.layout)
    }

    pub fn uniform_buffer(&self) -> Option<&Buffer> {
        self.resources.as_ref().map(|resources| &resources.uniform)
    }

    /// Pure translation to the current position
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_translation(self.position)
    }

    pub fn distance_travelled(&self) -> f32 {
        self.position.distance(self.origin)
    }

    fn sync_uniform(&mut self) -> Result<(), GpuError> {
        let uniform = TransformUniform {
            model: self.model_matrix(),
        };
        let Some(resources) = self.resources.as_mut() else {
            return Ok(());
        };
        resources.uniform.write(0, &[uniform])?;
        self.state = SyncState::Clean;
        Ok(())
    }
}

impl GameEntity for Entity {
    fn allocate_resources(
        &mut self,
        device: &LogicalDevice,
        descriptor_pool: &DescriptorPool,
    ) -> Result<()> {
        if self.resources.is_some() {
            bail!("Entity resources are already allocated");
        }
        let uniform = Buffer::new(
            device.clone(),
            BufferCreateInfo::NewInitializedBuffer {
                name: "entity transform",
                data: bytemuck::bytes_of(&TransformUniform::IDENTITY),
                memory_type: MemoryLocation::CpuToGpu,
                usage_flags: vk::BufferUsageFlags::UNIFORM_BUFFER,
            },
        )?;
        let layout = DescriptorSetLayoutBuilder::default()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX,
            )
            .build(device.clone(), vk::DescriptorSetLayoutCreateFlags::empty())?;
        let set = descriptor_pool.allocate(&layout)?;
        set.write_buffer(0, vk::DescriptorType::UNIFORM_BUFFER, &uniform)?;

        self.resources = Some(EntityResources {
            set,
            layout,
            uniform,
        });
        self.state = SyncState::Dirty;
        Ok(())
    }

    fn update(&mut self, dt: f32) {
        self.position += self.direction * self.speed * dt;
        self.state = SyncState::Dirty;
        if self.resources.is_some() {
            if let Err(e) = self.sync_uniform() {
                warn!("Failed to write entity transform: {}", e);
            }
        }
    }

    fn draw(&self, cmd: &CommandBufferRecording) {
        if let Some(mesh) = self.mesh() {
            mesh.draw(cmd);
        }
    }

    fn bounds(&self) -> BoundingBox {
        BoundingBox::from_center_size(self.position, self.size)
    }
}

impl Destructible for Entity {
    fn destroy(&mut self) {
        if let Some(mut resources) = self.resources.take() {
            resources.set.destroy();
            resources.layout.destroy();
            resources.uniform.destroy();
        }
        self.state = SyncState::Dirty;
    }
}
