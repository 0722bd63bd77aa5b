//! 图形设备层
//!
//! [`device::RenderDevice`] 是渲染器与图形 API 之间的唯一接缝：
//! - `headless`：内存中的设备，记录所有调用，用于测试与无窗口运行
//! - `dx12`：Windows 上的 DirectX 12 实现

pub mod device;
pub mod headless;
#[cfg(target_os = "windows")]
pub mod dx12;

pub use device::RenderDevice;
pub use headless::HeadlessDevice;
#[cfg(target_os = "windows")]
pub use dx12::Dx12Device;
