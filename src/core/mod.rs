//! 核心功能模块
//!
//! 本模块提供了渲染引擎的基础功能：日志系统、配置管理、错误处理和窗口层。
//! 这些模块独立于具体的图形设备，可以被任何后端使用。
//!
//! # 模块组织
//!
//! - `log`：日志系统，提供结构化的日志记录功能
//! - `config`：配置管理，支持从配置文件加载引擎设置
//! - `error`：错误处理，定义统一的错误类型
//! - `window`：基于 winit 的窗口与输入轮询

pub mod config;
pub mod error;
pub mod log;
pub mod window;

pub use config::Config;
pub use error::{EngineError, GraphicsError, Result};
pub use window::{RenderWindow, WindowStatus};
