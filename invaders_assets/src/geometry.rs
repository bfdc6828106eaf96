use glam::{Vec2, Vec3};
use thiserror::Error;
use tracing::warn;

use crate::{ParsedMesh, Vertex};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("Shape \"{shape}\": {attribute} index {index} is out of range ({len} available)")]
    IndexOutOfRange {
        shape: String,
        attribute: &'static str,
        index: u32,
        len: usize,
    },

    #[error("Shape \"{shape}\": face {face} has a corner without a normal index")]
    MissingNormal { shape: String, face: usize },

    #[error("Shape \"{shape}\": face {face} runs past the end of the index list")]
    FaceOverrun { shape: String, face: usize },

    #[error("Mesh has more corners than fit in a 32-bit index")]
    TooManyVertices,
}

/// Host-side vertex and index data ready to be uploaded.
///
/// Every face corner becomes its own vertex and vertices are never shared, so `indices` is
/// always `0..vertices.len()`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MeshGeometry {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

fn lookup<T: Copy>(
    values: &[T],
    index: u32,
    attribute: &'static str,
    shape: &str,
) -> Result<T, GeometryError> {
    values
        .get(index as usize)
        .copied()
        .ok_or_else(|| GeometryError::IndexOutOfRange {
            shape: shape.to_string(),
            attribute,
            index,
            len: values.len(),
        })
}

impl MeshGeometry {
    /// Assemble one vertex per face corner, shape by shape and face by face
    pub fn from_parsed(parsed: &ParsedMesh) -> Result<Self, GeometryError> {
        let corners = parsed.corner_count();
        if u32::try_from(corners).is_err() {
            return Err(GeometryError::TooManyVertices);
        }
        let mut vertices = Vec::with_capacity(corners);
        let mut indices = Vec::with_capacity(corners);

        for shape in parsed.shapes.iter() {
            let mut index_offset = 0usize;
            for (face, arity) in shape.face_arities.iter().enumerate() {
                let arity = *arity as usize;
                let corners = shape
                    .indices
                    .get(index_offset..index_offset + arity)
                    .ok_or_else(|| GeometryError::FaceOverrun {
                        shape: shape.name.clone(),
                        face,
                    })?;
                for corner in corners {
                    let normal = corner.normal.ok_or_else(|| GeometryError::MissingNormal {
                        shape: shape.name.clone(),
                        face,
                    })?;
                    let mut vertex = Vertex {
                        position: Vec3::from_array(lookup(
                            &parsed.positions,
                            corner.position,
                            "position",
                            &shape.name,
                        )?),
                        normal: Vec3::from_array(lookup(
                            &parsed.normals,
                            normal,
                            "normal",
                            &shape.name,
                        )?),
                        ..Default::default()
                    };
                    if !parsed.texcoords.is_empty() {
                        if let Some(texcoord) = corner.texcoord {
                            vertex.uv = Vec2::from_array(lookup(
                                &parsed.texcoords,
                                texcoord,
                                "texcoord",
                                &shape.name,
                            )?);
                        }
                    }
                    if !parsed.colors.is_empty() {
                        vertex.color = Vec3::from_array(lookup(
                            &parsed.colors,
                            corner.position,
                            "color",
                            &shape.name,
                        )?);
                    }
                    indices.push(vertices.len() as u32);
                    vertices.push(vertex);
                }
                index_offset += arity;
            }
            if index_offset < shape.indices.len() {
                warn!(
                    "Shape \"{}\" has {} corners not covered by any face, ignoring them",
                    shape.name,
                    shape.indices.len() - index_offset
                );
            }
        }

        Ok(Self { vertices, indices })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FaceVertex, ParsedShape};

    fn corner(position: u32, normal: u32) -> FaceVertex {
        FaceVertex {
            position,
            normal: Some(normal),
            texcoord: None,
        }
    }

    fn triangle() -> ParsedMesh {
        ParsedMesh {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]],
            shapes: vec![ParsedShape {
                name: "triangle".to_string(),
                face_arities: vec![3],
                indices: vec![corner(0, 0), corner(1, 0), corner(2, 0)],
            }],
            ..Default::default()
        }
    }

    /// A quad and a triangle in one shape plus a second triangle shape
    fn mixed() -> ParsedMesh {
        ParsedMesh {
            positions: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            normals: vec![[0.0, 0.0, 1.0], [0.0, 0.0, -1.0]],
            texcoords: vec![[0.0, 0.0], [1.0, 1.0]],
            colors: vec![
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [1.0, 1.0, 1.0],
            ],
            shapes: vec![
                ParsedShape {
                    name: "body".to_string(),
                    face_arities: vec![4, 3],
                    indices: vec![
                        corner(0, 0),
                        corner(1, 0),
                        corner(2, 0),
                        corner(3, 0),
                        FaceVertex {
                            position: 0,
                            normal: Some(1),
                            texcoord: Some(1),
                        },
                        corner(2, 1),
                        corner(1, 1),
                    ],
                },
                ParsedShape {
                    name: "fin".to_string(),
                    face_arities: vec![3],
                    indices: vec![corner(3, 0), corner(2, 0), corner(0, 0)],
                },
            ],
        }
    }

    #[test]
    fn single_triangle() {
        let geometry = MeshGeometry::from_parsed(&triangle()).unwrap();
        assert_eq!(geometry.vertex_count(), 3);
        assert_eq!(geometry.index_count(), 3);
        assert_eq!(geometry.indices, vec![0, 1, 2]);
        for vertex in geometry.vertices.iter() {
            assert_eq!(vertex.uv, Vec2::ZERO);
            assert_eq!(vertex.color, Vec3::ZERO);
            assert_eq!(vertex.normal, Vec3::Z);
        }
        assert_eq!(geometry.vertices[1].position, Vec3::X);
    }

    #[test]
    fn one_vertex_per_corner_across_shapes() {
        let parsed = mixed();
        let geometry = MeshGeometry::from_parsed(&parsed).unwrap();
        assert_eq!(parsed.corner_count(), 10);
        assert_eq!(geometry.vertex_count(), 10);
        assert_eq!(geometry.index_count(), 10);
        assert!(geometry
            .indices
            .iter()
            .enumerate()
            .all(|(j, index)| *index == j as u32));

        // colors follow the position index, texcoords their own index
        let fifth = geometry.vertices[4];
        assert_eq!(fifth.color, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(fifth.uv, Vec2::ONE);
        assert_eq!(fifth.normal, Vec3::NEG_Z);
        assert_eq!(geometry.vertices[7].color, Vec3::ONE);
    }

    #[test]
    fn assembly_is_deterministic() {
        let parsed = mixed();
        let first = MeshGeometry::from_parsed(&parsed).unwrap();
        let second = MeshGeometry::from_parsed(&parsed).unwrap();
        assert_eq!(first.vertex_bytes(), second.vertex_bytes());
        assert_eq!(first.index_bytes(), second.index_bytes());
        assert_eq!(first.vertex_bytes().len(), 10 * 44);
        assert_eq!(first.index_bytes().len(), 10 * 4);
    }

    #[test]
    fn malformed_geometry_is_rejected() {
        let mut out_of_range = triangle();
        out_of_range.shapes[0].indices[2].position = 3;
        assert!(matches!(
            MeshGeometry::from_parsed(&out_of_range),
            Err(GeometryError::IndexOutOfRange {
                attribute: "position",
                index: 3,
                len: 3,
                ..
            })
        ));

        let mut missing_normal = triangle();
        missing_normal.shapes[0].indices[0].normal = None;
        assert_eq!(
            MeshGeometry::from_parsed(&missing_normal),
            Err(GeometryError::MissingNormal {
                shape: "triangle".to_string(),
                face: 0
            })
        );

        let mut overrun = triangle();
        overrun.shapes[0].face_arities = vec![3, 3];
        assert_eq!(
            MeshGeometry::from_parsed(&overrun),
            Err(GeometryError::FaceOverrun {
                shape: "triangle".to_string(),
                face: 1
            })
        );

        let mut short_colors = triangle();
        short_colors.colors = vec![[1.0; 3]];
        assert!(matches!(
            MeshGeometry::from_parsed(&short_colors),
            Err(GeometryError::IndexOutOfRange {
                attribute: "color",
                ..
            })
        ));
    }

    #[test]
    fn empty_mesh_yields_empty_geometry() {
        let geometry = MeshGeometry::from_parsed(&ParsedMesh::default()).unwrap();
        assert!(geometry.is_empty());
        assert!(geometry.vertex_bytes().is_empty());
    }
}
