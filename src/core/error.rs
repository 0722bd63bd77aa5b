//! 错误处理模块
//!
//! 定义了引擎中使用的统一错误类型。错误枚举手动实现 `Display`、`Error`
//! 与 `From`，便于在各层之间用 `?` 传播。
//!
//! # 错误分级
//!
//! - **初始化期**：`ResourceCreationFailure`、`DeviceCreation` 等，直接终止初始化
//! - **帧内可恢复**：`OutOfDescriptors`、`UploadTooLarge`、`ResourceNotReady`，
//!   由帧调度器跳过当前帧
//! - **编程错误**：`InvalidStateTransition`、`InvalidDescriptorHandle`

use std::fmt;
use std::path::PathBuf;

/// 引擎统一的 Result 类型
pub type Result<T> = std::result::Result<T, EngineError>;

/// 引擎错误类型
#[derive(Debug)]
pub enum EngineError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// 网格加载错误
    MeshLoading(MeshLoadError),

    /// 纹理加载错误
    TextureLoading(String),

    /// IO 错误
    Io(std::io::Error),

    /// 初始化错误
    Initialization(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug, Clone, PartialEq)]
pub enum GraphicsError {
    /// 设备创建失败
    DeviceCreation(String),

    /// 交换链错误
    SwapchainError(String),

    /// 着色器编译失败
    ShaderCompilation(String),

    /// GPU 资源、视图或管线对象创建失败
    ResourceCreationFailure(String),

    /// 命令记录或提交失败
    CommandExecution(String),

    /// 描述符堆空间不足
    OutOfDescriptors {
        heap: String,
        requested: u32,
        available: u32,
    },

    /// 句柄不属于该堆、已被释放或已过期
    InvalidDescriptorHandle(String),

    /// 单个上传项超过暂存缓冲区预算
    UploadTooLarge { size: u64, budget: u64 },

    /// 记录的屏障与资源当前跟踪的状态不一致
    InvalidStateTransition {
        resource: String,
        expected: String,
        actual: String,
    },

    /// 资源尚未完成上传或不处于绘制所需状态
    ResourceNotReady(String),
}

/// 网格加载相关的错误
#[derive(Debug)]
pub enum MeshLoadError {
    /// 文件不存在
    FileNotFound(PathBuf),

    /// 不支持的文件格式
    UnsupportedFormat(String),

    /// 解析失败
    ParseError(String),

    /// 数据验证失败
    ValidationError(String),

    /// 几何数据无效
    InvalidGeometry(String),
}

impl EngineError {
    /// 该错误是否只影响当前帧
    ///
    /// 帧调度器据此决定是跳过本帧继续运行，还是把错误交给宿主程序。
    pub fn is_frame_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::Graphics(
                GraphicsError::OutOfDescriptors { .. }
                    | GraphicsError::UploadTooLarge { .. }
                    | GraphicsError::ResourceNotReady(_)
            )
        )
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(e) => write!(f, "Configuration error: {}", e),
            EngineError::Graphics(e) => write!(f, "Graphics error: {}", e),
            EngineError::MeshLoading(e) => write!(f, "Mesh loading error: {}", e),
            EngineError::TextureLoading(msg) => write!(f, "Texture loading error: {}", msg),
            EngineError::Io(e) => write!(f, "IO error: {}", e),
            EngineError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            EngineError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::SwapchainError(msg) => write!(f, "Swapchain error: {}", msg),
            GraphicsError::ShaderCompilation(msg) => write!(f, "Shader compilation failed: {}", msg),
            GraphicsError::ResourceCreationFailure(msg) => {
                write!(f, "Resource creation failed: {}", msg)
            }
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
            GraphicsError::OutOfDescriptors { heap, requested, available } => write!(
                f,
                "Out of descriptors in {}: requested {}, {} free",
                heap, requested, available
            ),
            GraphicsError::InvalidDescriptorHandle(msg) => {
                write!(f, "Invalid descriptor handle: {}", msg)
            }
            GraphicsError::UploadTooLarge { size, budget } => write!(
                f,
                "Upload of {} bytes exceeds the staging budget of {} bytes",
                size, budget
            ),
            GraphicsError::InvalidStateTransition { resource, expected, actual } => write!(
                f,
                "Invalid state transition on '{}': barrier expects {}, resource is in {}",
                resource, expected, actual
            ),
            GraphicsError::ResourceNotReady(msg) => write!(f, "Resource not ready: {}", msg),
        }
    }
}

impl fmt::Display for MeshLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshLoadError::FileNotFound(path) => write!(f, "Mesh file not found: {}", path.display()),
            MeshLoadError::UnsupportedFormat(msg) => write!(f, "Unsupported mesh format: {}", msg),
            MeshLoadError::ParseError(msg) => write!(f, "Failed to parse mesh: {}", msg),
            MeshLoadError::ValidationError(msg) => write!(f, "Mesh validation failed: {}", msg),
            MeshLoadError::InvalidGeometry(msg) => write!(f, "Invalid geometry data: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(e) => Some(e),
            EngineError::Config(e) => Some(e),
            EngineError::Graphics(e) => Some(e),
            EngineError::MeshLoading(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}
impl std::error::Error for MeshLoadError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err)
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err)
    }
}

impl From<GraphicsError> for EngineError {
    fn from(err: GraphicsError) -> Self {
        EngineError::Graphics(err)
    }
}

impl From<MeshLoadError> for EngineError {
    fn from(err: MeshLoadError) -> Self {
        EngineError::MeshLoading(err)
    }
}

impl From<image::ImageError> for EngineError {
    fn from(err: image::ImageError) -> Self {
        EngineError::TextureLoading(err.to_string())
    }
}
