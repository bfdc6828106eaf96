/// Attribute indices of a single face corner.
///
/// `normal` and `texcoord` are [`None`] when the source omitted them.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FaceVertex {
    pub position: u32,
    pub normal: Option<u32>,
    pub texcoord: Option<u32>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedShape {
    pub name: String,
    /// Number of corners of each face, in order
    pub face_arities: Vec<u32>,
    /// Corners of every face, flattened in face order
    pub indices: Vec<FaceVertex>,
}

/// A mesh as handed over by a parser: flat attribute arrays shared by every shape.
///
/// Colors are per position, so a color is looked up with a corner's position index.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedMesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub texcoords: Vec<[f32; 2]>,
    pub colors: Vec<[f32; 3]>,
    pub shapes: Vec<ParsedShape>,
}

impl ParsedMesh {
    /// Total number of face corners across every shape
    pub fn corner_count(&self) -> usize {
        self.shapes
            .iter()
            .map(|shape| shape.face_arities.iter().map(|arity| *arity as usize).sum::<usize>())
            .sum()
    }
}
