//! 几何体模块
//!
//! CPU 侧的顶点与网格定义，以及模型文件加载器。
//!
//! ```text
//! 文件 (OBJ) ─→ ObjLoader ─→ MeshData ─→ ResourceManager（顶点/索引缓冲区）
//! ```

pub mod loaders;
pub mod mesh;
pub mod vertex;

pub use mesh::{MeshData, Subset};
pub use vertex::Vertex;
