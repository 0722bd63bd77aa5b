//! dx12_engine - 显式资源管理的 DirectX 12 渲染引擎
//!
//! 引擎直接管理描述符堆、资源状态转换、上传暂存与帧同步；
//! 图形 API 通过 [`gfx::RenderDevice`] 接入，Windows 上为 DirectX 12，
//! 其他平台与测试中使用内存中的 headless 设备。
//!
//! # 模块结构
//!
//! - `core`: 配置、日志、错误处理与窗口层
//! - `math` / `component`: 矩阵工具、变换与相机
//! - `geometry` / `assets`: 网格与纹理的 CPU 侧数据及加载器
//! - `gfx`: 设备接缝与后端实现
//! - `renderer`: 描述符、资源、上传、管线缓存、材质与帧编排
//!
//! # 使用示例
//!
//! ```no_run
//! use std::rc::Rc;
//! use dx12_engine::core::Config;
//! use dx12_engine::geometry::MeshData;
//! use dx12_engine::gfx::HeadlessDevice;
//! use dx12_engine::renderer::material::BasicMaterial;
//! use dx12_engine::renderer::render_object::RenderObject;
//! use dx12_engine::renderer::Renderer;
//!
//! let config = Config::default();
//! let mut renderer = Renderer::new(Box::new(HeadlessDevice::new()), &config, None).unwrap();
//!
//! let rm = renderer.resources_mut();
//! let material = Rc::new(BasicMaterial::new(rm, "Red", [1.0, 0.0, 0.0, 1.0], None).unwrap());
//! let cube = RenderObject::new(rm, "Cube", &MeshData::unit_cube(), material).unwrap();
//!
//! let mut objects = vec![cube];
//! renderer.draw_frame(&mut objects).unwrap();
//! ```

pub mod assets;
pub mod component;
pub mod core;
pub mod geometry;
pub mod gfx;
pub mod math;
pub mod renderer;

pub use crate::core::{Config, EngineError, GraphicsError, Result};
pub use renderer::{FrameStatus, Renderer};
