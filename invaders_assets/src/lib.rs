mod geometry;
pub mod obj;
mod parsed;
mod vertex;

pub use geometry::{GeometryError, MeshGeometry};
pub use obj::{load_obj, ParseError};
pub use parsed::{FaceVertex, ParsedMesh, ParsedShape};
pub use vertex::Vertex;
