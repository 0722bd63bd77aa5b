//! 模型加载器
//!
//! 所有加载器都返回 CPU 侧的 [`MeshData`]，不涉及 GPU 资源。

use std::path::Path;

use crate::core::error::{MeshLoadError, Result};
use crate::geometry::mesh::MeshData;

pub mod obj_loader;

pub use obj_loader::ObjLoader;

/// 网格加载器 trait
pub trait MeshLoader {
    /// 从文件路径加载网格
    fn load_from_file(path: &Path) -> Result<MeshData>;

    /// 从内存中的文件内容加载网格
    fn load_from_memory(data: &[u8]) -> Result<MeshData>;

    /// 支持的文件扩展名（小写，不含点号）
    fn supported_extensions() -> &'static [&'static str];
}

/// 根据文件扩展名选择加载器
pub fn load_mesh(path: &Path) -> Result<MeshData> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| MeshLoadError::UnsupportedFormat(format!("{} has no extension", path.display())))?;

    if ObjLoader::supported_extensions().contains(&extension.as_str()) {
        ObjLoader::load_from_file(path)
    } else {
        Err(MeshLoadError::UnsupportedFormat(format!(".{}", extension)).into())
    }
}
