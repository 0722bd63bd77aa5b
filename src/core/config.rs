//! 配置管理模块
//!
//! 提供引擎配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1600
//! height = 900
//! title = "DX12 Engine"
//! resizable = true
//!
//! [graphics]
//! backend = "headless"  # 或 "dx12"
//! vsync = true
//!
//! [renderer]
//! rtv_heap_size = 8
//! dsv_heap_size = 8
//! render_pass_heap_size = 256
//! staging_budget_bytes = 67108864
//! clear_color = [0.0, 0.2, 0.4, 1.0]
//! headless_frames = 120
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 渲染器资源配置
    #[serde(default)]
    pub renderer: RendererConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// 窗口宽度
    #[serde(default = "default_width")]
    pub width: u32,

    /// 窗口高度
    #[serde(default = "default_height")]
    pub height: u32,

    /// 窗口标题
    #[serde(default = "default_title")]
    pub title: String,

    /// 是否可调整大小
    #[serde(default = "default_resizable")]
    pub resizable: bool,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 设备后端
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 垂直同步（Present 的 sync interval 为 1）
    #[serde(default = "default_vsync")]
    pub vsync: bool,

    /// 启用 D3D12 调试层
    #[serde(default = "default_debug_layer")]
    pub debug_layer: bool,
}

/// 设备后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// 软件模拟设备，不需要 GPU 与窗口
    Headless,
    /// DirectX 12 后端（仅 Windows）
    Dx12,
}

/// 渲染器资源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// RTV 堆容量
    #[serde(default = "default_rtv_heap_size")]
    pub rtv_heap_size: u32,

    /// DSV 堆容量
    #[serde(default = "default_dsv_heap_size")]
    pub dsv_heap_size: u32,

    /// 着色器可见的 CBV/SRV/UAV 堆容量
    #[serde(default = "default_render_pass_heap_size")]
    pub render_pass_heap_size: u32,

    /// 上传暂存缓冲区大小（字节）
    #[serde(default = "default_staging_budget")]
    pub staging_budget_bytes: u64,

    /// 后台缓冲区清除颜色
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],

    /// headless 模式下渲染的帧数
    #[serde(default = "default_headless_frames")]
    pub headless_frames: u32,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_width() -> u32 { 1600 }
fn default_height() -> u32 { 900 }
fn default_title() -> String { "DX12 Engine".to_string() }
fn default_resizable() -> bool { true }
fn default_backend() -> GraphicsBackend { GraphicsBackend::Headless }
fn default_vsync() -> bool { true }
fn default_debug_layer() -> bool { cfg!(debug_assertions) }
fn default_rtv_heap_size() -> u32 { 8 }
fn default_dsv_heap_size() -> u32 { 8 }
fn default_render_pass_heap_size() -> u32 { 256 }
fn default_staging_budget() -> u64 { 64 * 1024 * 1024 }
fn default_clear_color() -> [f32; 4] { [0.0, 0.2, 0.4, 1.0] }
fn default_headless_frames() -> u32 { 120 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "dx12_engine.log".to_string() }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
            resizable: default_resizable(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            vsync: default_vsync(),
            debug_layer: default_debug_layer(),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            rtv_heap_size: default_rtv_heap_size(),
            dsv_heap_size: default_dsv_heap_size(),
            render_pass_heap_size: default_render_pass_heap_size(),
            staging_budget_bytes: default_staging_budget(),
            clear_color: default_clear_color(),
            headless_frames: default_headless_frames(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径
    ///
    /// # 返回值
    ///
    /// 成功返回 `Config` 实例，失败返回错误
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--dx12`: 使用 DirectX 12 后端
    /// - `--headless`: 使用软件模拟设备
    /// - `--width <value>`: 设置窗口宽度
    /// - `--height <value>`: 设置窗口高度
    /// - `--frames <value>`: headless 模式渲染的帧数
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.graphics.backend = GraphicsBackend::Dx12;
        }

        if args.iter().any(|a| a == "--headless") {
            self.graphics.backend = GraphicsBackend::Headless;
        }

        if let Some(width) = arg_value(&args, "--width").and_then(|v| v.parse().ok()) {
            self.window.width = width;
        }

        if let Some(height) = arg_value(&args, "--height").and_then(|v| v.parse().ok()) {
            self.window.height = height;
        }

        if let Some(frames) = arg_value(&args, "--frames").and_then(|v| v.parse().ok()) {
            self.renderer.headless_frames = frames;
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(invalid("window.width/height", "Window dimensions must be greater than 0"));
        }

        // 交换链的两个后台缓冲区各需一个 RTV
        if self.renderer.rtv_heap_size < 2 {
            return Err(invalid("renderer.rtv_heap_size", "At least 2 RTV descriptors are required"));
        }

        // 立方体深度图每个面一个 DSV
        if self.renderer.dsv_heap_size < 1 {
            return Err(invalid("renderer.dsv_heap_size", "At least 1 DSV descriptor is required"));
        }

        if self.renderer.render_pass_heap_size == 0 {
            return Err(invalid(
                "renderer.render_pass_heap_size",
                "Render pass heap must hold at least one descriptor",
            ));
        }

        if self.renderer.staging_budget_bytes < 64 * 1024 {
            return Err(invalid(
                "renderer.staging_budget_bytes",
                "Staging budget must be at least 64 KiB",
            ));
        }

        Ok(())
    }
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|idx| args.get(idx + 1))
        .map(String::as_str)
}

fn invalid(field: &str, reason: &str) -> super::error::EngineError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

impl GraphicsConfig {
    /// Present 使用的 sync interval
    pub fn sync_interval(&self) -> u32 {
        if self.vsync { 1 } else { 0 }
    }
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Headless => "Headless",
            GraphicsBackend::Dx12 => "DirectX 12",
        }
    }
}
