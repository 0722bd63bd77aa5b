//! DirectX 12 设备实现（仅 Windows）
//!
//! 将 [`crate::gfx::device::RenderDevice`] 的调用翻译为 D3D12 / DXGI API。

mod convert;
mod device;

pub use device::Dx12Device;
