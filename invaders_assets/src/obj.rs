//! Wavefront OBJ loading on top of [`tobj`].
//!
//! Attributes keep their separate index streams and faces are not triangulated, so the result
//! mirrors the file's face layout exactly.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::{FaceVertex, ParsedMesh, ParsedShape};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Could not load model \"{path}\": {message}")]
pub struct ParseError {
    pub path: String,
    pub message: String,
}

impl ParseError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            path: path.into(),
            message: if message.is_empty() {
                "unknown parser error".to_string()
            } else {
                message
            },
        }
    }
}

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        single_index: false,
        triangulate: false,
        ignore_points: true,
        ignore_lines: true,
        ..Default::default()
    }
}

fn chunk3(values: &[f32]) -> Vec<[f32; 3]> {
    values
        .chunks_exact(3)
        .map(|chunk| [chunk[0], chunk[1], chunk[2]])
        .collect()
}

fn chunk2(values: &[f32]) -> Vec<[f32; 2]> {
    values
        .chunks_exact(2)
        .map(|chunk| [chunk[0], chunk[1]])
        .collect()
}

/// Load every model in an OBJ file into a single [`ParsedMesh`], one shape per model.
///
/// Materials are ignored.
pub fn load_obj<P: AsRef<Path>>(path: P) -> Result<ParsedMesh, ParseError> {
    let path = path.as_ref();
    let (models, _materials) = tobj::load_obj(path, &load_options())
        .map_err(|e| ParseError::new(path.display().to_string(), e.to_string()))?;
    let parsed = from_models(&models);
    debug!(
        "Parsed \"{}\": {} shapes, {} positions",
        path.display(),
        parsed.shapes.len(),
        parsed.positions.len()
    );
    Ok(parsed)
}

/// Merge tobj models, whose attribute arrays are per model, into shared attribute arrays
pub fn from_models(models: &[tobj::Model]) -> ParsedMesh {
    let mut parsed = ParsedMesh::default();
    for model in models.iter() {
        let mesh = &model.mesh;
        let position_offset = parsed.positions.len() as u32;
        let normal_offset = parsed.normals.len() as u32;
        let texcoord_offset = parsed.texcoords.len() as u32;

        let positions = chunk3(&mesh.positions);
        let colors = chunk3(&mesh.vertex_color);
        // Colors are per position, keep both arrays aligned when models disagree
        if !colors.is_empty() || !parsed.colors.is_empty() {
            parsed.colors.resize(parsed.positions.len(), [0.0; 3]);
            if colors.len() == positions.len() {
                parsed.colors.extend(colors);
            } else {
                parsed.colors.resize(parsed.positions.len() + positions.len(), [0.0; 3]);
            }
        }
        parsed.positions.extend(positions);
        parsed.normals.extend(chunk3(&mesh.normals));
        parsed.texcoords.extend(chunk2(&mesh.texcoords));

        let face_arities = if mesh.face_arities.is_empty() {
            // tobj leaves arities empty for all-triangle meshes
            vec![3; mesh.indices.len() / 3]
        } else {
            mesh.face_arities.clone()
        };
        let indices = mesh
            .indices
            .iter()
            .enumerate()
            .map(|(i, position)| FaceVertex {
                position: position + position_offset,
                normal: mesh.normal_indices.get(i).map(|n| n + normal_offset),
                texcoord: mesh.texcoord_indices.get(i).map(|t| t + texcoord_offset),
            })
            .collect();
        parsed.shapes.push(ParsedShape {
            name: model.name.clone(),
            face_arities,
            indices,
        });
    }
    parsed
}
