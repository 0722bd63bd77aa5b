//! 场景组件
//!
//! 渲染对象的空间变换与观察相机。

mod camera;
mod transform;

pub use camera::Camera;
pub use transform::Transform;
