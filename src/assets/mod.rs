//! 资源文件加载
//!
//! 网格由 [`crate::geometry::loaders`] 负责，这里是纹理图像的解码与整理。

pub mod texture_loader;

pub use texture_loader::ImageData;
