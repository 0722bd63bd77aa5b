//! 渲染设备抽象
//!
//! `RenderDevice` 是引擎与图形 API 之间唯一的接缝。渲染器只通过它创建原生对象、
//! 提交命令和同步；命令本身以 [`Command`] 值记录，设备在执行时翻译。
//!
//! 两个实现：
//!
//! - [`HeadlessDevice`](super::headless::HeadlessDevice)：主机内存模拟，带日志，用于测试与无窗口运行
//! - `Dx12Device`（仅 Windows）：基于 `windows` crate 的 D3D12 实现

use std::cell::Cell;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::core::error::{EngineError, Result};
use crate::renderer::command::Command;
use crate::renderer::pipeline::PipelineStateDesc;
use crate::renderer::root_signature::RootSignatureDesc;

/// 原生资源标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// 原生描述符堆标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHeapId(pub u64);

/// 缓存持有的根签名对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootSignatureId(pub u64);

/// 缓存持有的管线状态对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineStateId(pub u64);

/// CPU 描述符地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuDescriptor(pub usize);

/// GPU 描述符地址（仅着色器可见堆）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuDescriptor(pub u64);

/// 一次提交的原生分配
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeResource {
    pub id: ResourceId,
    /// 缓冲区的 GPU 虚拟地址；纹理为 0
    pub gpu_address: u64,
}

/// 像素与索引格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    R8G8B8A8Unorm,
    R32G32B32A32Float,
    R32G32B32Float,
    R32G32Float,
    R32Uint,
    R16Uint,
    D24UnormS8Uint,
    R24G8Typeless,
    R24UnormX8Typeless,
}

impl Format {
    /// 每像素（或每索引）字节数
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::R16Uint => 2,
            Format::R8G8B8A8Unorm
            | Format::R32Uint
            | Format::D24UnormS8Uint
            | Format::R24G8Typeless
            | Format::R24UnormX8Typeless => 4,
            Format::R32G32Float => 8,
            Format::R32G32B32Float => 12,
            Format::R32G32B32A32Float => 16,
        }
    }
}

/// 资源使用状态，对应 D3D12 的 `D3D12_RESOURCE_STATES`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    DepthWrite,
    DepthRead,
    CopyDest,
    CopySource,
    VertexAndConstantBuffer,
    IndexBuffer,
    PixelShaderResource,
    GenericRead,
}

/// 堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapType {
    /// GPU 本地内存
    Default,
    /// CPU 可写、GPU 可读
    Upload,
}

/// 缓冲区创建参数
#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub name: String,
    pub size: u64,
    pub heap: HeapType,
    pub initial_state: ResourceState,
}

/// 纹理用途
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureUsage {
    ShaderResource,
    RenderTarget,
    DepthStencil,
}

/// 二维纹理（或纹理数组 / 立方体贴图）创建参数
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// 立方体贴图为 6
    pub array_size: u32,
    pub mip_levels: u32,
    pub format: Format,
    pub usage: TextureUsage,
    pub initial_state: ResourceState,
}

impl TextureDesc {
    #[inline]
    pub fn subresource_count(&self) -> u32 {
        self.array_size * self.mip_levels
    }
}

/// 描述符堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    Rtv,
    Dsv,
    CbvSrvUav,
}

impl DescriptorHeapKind {
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorHeapKind::Rtv => "RTV",
            DescriptorHeapKind::Dsv => "DSV",
            DescriptorHeapKind::CbvSrvUav => "CBV/SRV/UAV",
        }
    }
}

/// 设备创建的描述符堆
#[derive(Debug, Clone, Copy)]
pub struct DescriptorHeapInfo {
    pub native: NativeHeapId,
    pub cpu_base: usize,
    pub gpu_base: Option<u64>,
    pub increment: u32,
}

/// 映射的存活标记
///
/// 设备持有一份，所有由它产生的 [`MappedRegion`] 共享同一份。
/// 设备释放底层分配时调用 [`revoke`](Self::revoke)，之后的读写返回错误。
#[derive(Debug, Clone)]
pub struct MappingLiveness(Rc<Cell<bool>>);

impl MappingLiveness {
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(true)))
    }

    pub fn revoke(&self) {
        self.0.set(false);
    }

    pub fn is_alive(&self) -> bool {
        self.0.get()
    }
}

impl Default for MappingLiveness {
    fn default() -> Self {
        Self::new()
    }
}

/// 持久映射的内存区域
#[derive(Debug, Clone)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
    liveness: MappingLiveness,
}

impl MappedRegion {
    /// # Safety
    ///
    /// 只要 `liveness` 仍存活，`[ptr, ptr + len)` 必须是可读写的有效内存。
    /// 释放这段内存的一方必须先调用 `liveness.revoke()`。
    pub unsafe fn new(ptr: NonNull<u8>, len: usize, liveness: MappingLiveness) -> Self {
        Self { ptr, len, liveness }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 底层分配是否仍然存在
    pub fn is_valid(&self) -> bool {
        self.liveness.is_alive()
    }

    /// 把 `bytes` 写入 `offset` 处
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check(offset, bytes.len())?;
        // SAFETY: 范围已检查，存活标记保证分配未被释放（见 `new`）
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.as_ptr().add(offset), bytes.len());
        }
        Ok(())
    }

    /// 读回 `[offset, offset + len)`
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.check(offset, len)?;
        let mut out = vec![0u8; len];
        // SAFETY: 同 `write`
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        if !self.liveness.is_alive() {
            return Err(EngineError::Runtime("Mapped resource has been released".to_string()));
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(EngineError::Runtime(format!(
                "Mapped range {}..{} exceeds {} bytes",
                offset,
                offset.saturating_add(len),
                self.len
            ))),
        }
    }
}

/// SRV 维度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrvDimension {
    Texture2D,
    TextureCube,
}

/// 着色器资源视图参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrvDesc {
    pub format: Format,
    pub dimension: SrvDimension,
    pub mip_levels: u32,
}

/// 交换链参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    pub format: Format,
}

/// 图形设备
///
/// 创建与提交都在渲染线程上发生，因此方法取 `&mut self`。
pub trait RenderDevice {
    /// 设备名称，用于日志
    fn name(&self) -> &str;

    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapInfo>;

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<NativeResource>;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<NativeResource>;

    /// 持久映射上传堆资源
    fn map(&mut self, resource: ResourceId) -> Result<MappedRegion>;

    fn create_render_target_view(&mut self, resource: ResourceId, dest: CpuDescriptor) -> Result<()>;

    /// `array_slice` 为 `Some` 时只覆盖一个面
    fn create_depth_stencil_view(
        &mut self,
        resource: ResourceId,
        format: Format,
        array_slice: Option<u32>,
        dest: CpuDescriptor,
    ) -> Result<()>;

    fn create_shader_resource_view(
        &mut self,
        resource: ResourceId,
        desc: &SrvDesc,
        dest: CpuDescriptor,
    ) -> Result<()>;

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> Result<RootSignatureId>;

    fn create_pipeline_state(&mut self, desc: &PipelineStateDesc) -> Result<PipelineStateId>;

    /// 编译 HLSL，返回字节码
    fn compile_shader(&mut self, source: &str, entry: &str, target: &str) -> Result<Vec<u8>>;

    /// 在直接队列上执行一个已关闭的命令列表
    fn execute(&mut self, commands: &[Command]) -> Result<()>;

    /// 在队列上设置 fence 值
    fn signal(&mut self, value: u64) -> Result<()>;

    fn completed_fence_value(&self) -> u64;

    /// 阻塞直到 fence 达到 `value`，无超时
    fn wait_for_fence(&mut self, value: u64) -> Result<()>;

    fn create_swap_chain(&mut self, desc: &SwapChainDesc) -> Result<Vec<NativeResource>>;

    /// 调用前必须已释放所有旧的后备缓冲区
    fn resize_swap_chain(&mut self, width: u32, height: u32) -> Result<Vec<NativeResource>>;

    fn present(&mut self, sync_interval: u32) -> Result<()>;

    fn current_back_buffer_index(&self) -> usize;

    /// 释放原生分配；调用者保证 GPU 已不再访问
    fn release(&mut self, resource: ResourceId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sizes() {
        assert_eq!(Format::R8G8B8A8Unorm.bytes_per_pixel(), 4);
        assert_eq!(Format::R16Uint.bytes_per_pixel(), 2);
        assert_eq!(Format::R32G32B32Float.bytes_per_pixel(), 12);
    }

    #[test]
    fn test_mapped_region_bounds() {
        let mut backing = vec![0u8; 16];
        let liveness = MappingLiveness::new();
        // SAFETY: backing 在 region 使用期间一直存在
        let region = unsafe { MappedRegion::new(NonNull::new(backing.as_mut_ptr()).unwrap(), backing.len(), liveness) };

        region.write(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(region.read(4, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(region.write(14, &[0; 4]).is_err());
        assert!(region.read(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_mapped_region_rejects_access_after_revoke() {
        let mut backing = vec![0u8; 8];
        let liveness = MappingLiveness::new();
        // SAFETY: 先 revoke 再丢弃 backing
        let region = unsafe { MappedRegion::new(NonNull::new(backing.as_mut_ptr()).unwrap(), backing.len(), liveness.clone()) };
        let copy = region.clone();

        liveness.revoke();
        drop(backing);

        assert!(!region.is_valid());
        assert!(region.write(0, &[1]).is_err());
        assert!(copy.read(0, 1).is_err());
    }
}
