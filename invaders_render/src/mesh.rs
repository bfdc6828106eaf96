use std::path::Path;

use anyhow::{Context, Result};
use invaders_assets::{MeshGeometry, ParseError, ParsedMesh};
use invaders_gpu::ash::vk;
use invaders_gpu::command::CommandBufferRecording;
use invaders_gpu::resource::Buffer;
use invaders_gpu::traits::Destructible;
use invaders_gpu::util::{TransferUploader, UploadContext};
use tracing::{debug, error};

/// Device-local vertex and index buffers of a single mesh.
///
/// Built once at load time and immutable afterwards. A mesh that failed to parse is kept as an
/// empty asset which draws nothing.
#[derive(Debug)]
pub struct MeshAsset {
    id: String,
    vertex_count: u32,
    index_count: u32,
    vertex_buffer: Option<Buffer>,
    index_buffer: Option<Buffer>,
}

impl MeshAsset {
    /// An asset with no geometry and no device buffers
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vertex_count: 0,
            index_count: 0,
            vertex_buffer: None,
            index_buffer: None,
        }
    }

    /// Assemble `parsed` and upload it.
    ///
    /// Malformed geometry is logged and yields an empty asset, device failures are returned.
    pub fn load(
        id: impl Into<String>,
        parsed: &ParsedMesh,
        uploader: &TransferUploader,
        ctx: &UploadContext,
    ) -> Result<Self> {
        let id = id.into();
        match MeshGeometry::from_parsed(parsed) {
            Ok(geometry) => Self::from_geometry(id, &geometry, uploader, ctx),
            Err(e) => {
                error!("Could not build mesh \"{}\": {}", id, e);
                Ok(Self::empty(id))
            }
        }
    }

    /// Same as [`MeshAsset::load`], taking the parser's result as is
    pub fn from_parse_result(
        id: impl Into<String>,
        parsed: Result<ParsedMesh, ParseError>,
        uploader: &TransferUploader,
        ctx: &UploadContext,
    ) -> Result<Self> {
        let id = id.into();
        match parsed {
            Ok(parsed) => Self::load(id, &parsed, uploader, ctx),
            Err(e) => {
                error!("{}", e);
                Ok(Self::empty(id))
            }
        }
    }

    /// Parse and load a Wavefront OBJ file
    pub fn load_obj<P: AsRef<Path>>(
        id: impl Into<String>,
        path: P,
        uploader: &TransferUploader,
        ctx: &UploadContext,
    ) -> Result<Self> {
        Self::from_parse_result(id, invaders_assets::load_obj(path), uploader, ctx)
    }

    pub fn from_geometry(
        id: impl Into<String>,
        geometry: &MeshGeometry,
        uploader: &TransferUploader,
        ctx: &UploadContext,
    ) -> Result<Self> {
        let id = id.into();
        if geometry.is_empty() {
            debug!("Mesh \"{}\" has no faces, nothing to upload", id);
            return Ok(Self::empty(id));
        }
        let vertex_buffer = uploader
            .upload(
                ctx,
                geometry.vertex_bytes(),
                vk::BufferUsageFlags::VERTEX_BUFFER,
                &format!("{} vertices", id),
            )
            .with_context(|| format!("Failed to upload vertices of mesh \"{}\"", id))?;
        let index_buffer = uploader
            .upload(
                ctx,
                geometry.index_bytes(),
                vk::BufferUsageFlags::INDEX_BUFFER,
                &format!("{} indices", id),
            )
            .with_context(|| format!("Failed to upload indices of mesh \"{}\"", id))?;
        debug!(
            "Loaded mesh \"{}\": {} vertices, {} indices",
            id,
            geometry.vertex_count(),
            geometry.index_count()
        );

        Ok(Self {
            id,
            vertex_count: geometry.vertex_count(),
            index_count: geometry.index_count(),
            vertex_buffer: Some(vertex_buffer),
            index_buffer: Some(index_buffer),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_buffer(&self) -> Option<&Buffer> {
        self.vertex_buffer.as_ref()
    }

    pub fn index_buffer(&self) -> Option<&Buffer> {
        self.index_buffer.as_ref()
    }

    /// Whether [`MeshAsset::draw`] records anything
    pub fn is_drawable(&self) -> bool {
        self.index_count > 0 && self.vertex_buffer.is_some() && self.index_buffer.is_some()
    }

    /// Bind both buffers and issue one indexed draw over every index
    pub fn draw(&self, cmd: &CommandBufferRecording) {
        if self.index_count == 0 {
            return;
        }
        let (Some(vertex_buffer), Some(index_buffer)) = (&self.vertex_buffer, &self.index_buffer)
        else {
            return;
        };
        cmd.bind_vertex_buffers(0, &[vertex_buffer], &[0]);
        cmd.bind_index_buffer(index_buffer, 0, vk::IndexType::UINT32);
        cmd.draw_indexed(self.index_count, 1, 0, 0, 0);
    }
}

impl Destructible for MeshAsset {
    fn destroy(&mut self) {
        if let Some(mut buffer) = self.vertex_buffer.take() {
            buffer.destroy();
        }
        if let Some(mut buffer) = self.index_buffer.take() {
            buffer.destroy();
        }
        self.vertex_count = 0;
        self.index_count = 0;
    }
}
