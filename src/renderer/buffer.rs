//! 缓冲区类型
//!
//! - [`VertexBuffer`] / [`IndexBuffer`]：默认堆，创建后数据进入上传队列，一次性上传
//! - [`ConstantBuffer`]：上传堆，持久映射，每次源数据变化时由 CPU 直接写入

use bytemuck::Pod;

use super::command::{IndexBufferView, VertexBufferView};
use super::resource::{GpuResource, ReleaseQueue};
use super::uploader::Uploader;
use crate::core::error::{GraphicsError, Result};
use crate::geometry::vertex::Vertex;
use crate::gfx::device::{BufferDesc, Format, HeapType, MappedRegion, RenderDevice, ResourceState};

/// 常量缓冲区大小对齐（D3D12 要求 256 字节）
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

fn create_default_buffer(
    device: &mut dyn RenderDevice,
    uploader: &mut Uploader,
    releases: &ReleaseQueue,
    name: &str,
    bytes: &[u8],
    final_state: ResourceState,
) -> Result<GpuResource> {
    if bytes.is_empty() {
        return Err(GraphicsError::ResourceCreationFailure(format!("Buffer '{}' has no data", name)).into());
    }

    let size = bytes.len() as u64;
    let native = device.create_buffer(&BufferDesc {
        name: name.to_string(),
        size,
        heap: HeapType::Default,
        initial_state: ResourceState::CopyDest,
    })?;
    let resource = GpuResource::new(native, name, size, ResourceState::CopyDest, false, releases.clone());
    uploader.enqueue_buffer(&resource, bytes.to_vec(), final_state);
    Ok(resource)
}

/// 顶点缓冲区
#[derive(Debug)]
pub struct VertexBuffer {
    resource: GpuResource,
    stride: u32,
    vertex_count: u32,
}

impl VertexBuffer {
    pub fn new(
        device: &mut dyn RenderDevice,
        uploader: &mut Uploader,
        releases: &ReleaseQueue,
        name: &str,
        vertices: &[Vertex],
    ) -> Result<Self> {
        let resource = create_default_buffer(
            device,
            uploader,
            releases,
            name,
            bytemuck::cast_slice(vertices),
            ResourceState::VertexAndConstantBuffer,
        )?;
        Ok(Self {
            resource,
            stride: Vertex::STRIDE,
            vertex_count: vertices.len() as u32,
        })
    }

    pub fn resource(&self) -> &GpuResource {
        &self.resource
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn view(&self) -> VertexBufferView {
        VertexBufferView {
            address: self.resource.gpu_address(),
            size: self.resource.size() as u32,
            stride: self.stride,
        }
    }
}

/// 索引宽度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn stride(&self) -> u32 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }

    pub fn format(&self) -> Format {
        match self {
            IndexFormat::U16 => Format::R16Uint,
            IndexFormat::U32 => Format::R32Uint,
        }
    }
}

/// 索引缓冲区
///
/// 索引数由显式的索引格式决定，而不是假定 4 字节。
#[derive(Debug)]
pub struct IndexBuffer {
    resource: GpuResource,
    format: IndexFormat,
}

impl IndexBuffer {
    pub fn new_u32(
        device: &mut dyn RenderDevice,
        uploader: &mut Uploader,
        releases: &ReleaseQueue,
        name: &str,
        indices: &[u32],
    ) -> Result<Self> {
        Self::from_bytes(device, uploader, releases, name, bytemuck::cast_slice(indices), IndexFormat::U32)
    }

    pub fn new_u16(
        device: &mut dyn RenderDevice,
        uploader: &mut Uploader,
        releases: &ReleaseQueue,
        name: &str,
        indices: &[u16],
    ) -> Result<Self> {
        Self::from_bytes(device, uploader, releases, name, bytemuck::cast_slice(indices), IndexFormat::U16)
    }

    fn from_bytes(
        device: &mut dyn RenderDevice,
        uploader: &mut Uploader,
        releases: &ReleaseQueue,
        name: &str,
        bytes: &[u8],
        format: IndexFormat,
    ) -> Result<Self> {
        let resource = create_default_buffer(device, uploader, releases, name, bytes, ResourceState::IndexBuffer)?;
        Ok(Self { resource, format })
    }

    pub fn resource(&self) -> &GpuResource {
        &self.resource
    }

    pub fn index_format(&self) -> IndexFormat {
        self.format
    }

    pub fn index_count(&self) -> u32 {
        (self.resource.size() / self.format.stride() as u64) as u32
    }

    pub fn view(&self) -> IndexBufferView {
        IndexBufferView {
            address: self.resource.gpu_address(),
            size: self.resource.size() as u32,
            format: self.format.format(),
        }
    }
}

/// 常量缓冲区
///
/// 大小按 256 字节对齐，创建后保持映射直到销毁。
/// 写入前调用者须保证上一帧读取它的 GPU 工作已经完成。
#[derive(Debug)]
pub struct ConstantBuffer {
    resource: GpuResource,
    mapped: MappedRegion,
}

impl ConstantBuffer {
    pub fn new(device: &mut dyn RenderDevice, releases: &ReleaseQueue, name: &str, size: u64) -> Result<Self> {
        let aligned = align_up(size.max(1), CONSTANT_BUFFER_ALIGNMENT);
        let native = device.create_buffer(&BufferDesc {
            name: name.to_string(),
            size: aligned,
            heap: HeapType::Upload,
            initial_state: ResourceState::GenericRead,
        })?;
        let resource = GpuResource::new(native, name, aligned, ResourceState::GenericRead, true, releases.clone());
        let mapped = device.map(resource.id())?;
        Ok(Self { resource, mapped })
    }

    /// 以 `T` 的大小创建
    pub fn for_type<T: Pod>(device: &mut dyn RenderDevice, releases: &ReleaseQueue, name: &str) -> Result<Self> {
        Self::new(device, releases, name, std::mem::size_of::<T>() as u64)
    }

    /// 写入一个常量结构
    pub fn update<T: Pod>(&mut self, value: &T) -> Result<()> {
        self.write_bytes(0, bytemuck::bytes_of(value))
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.mapped.write(offset, bytes)
    }

    /// 读回映射内容
    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.mapped.read(offset, len)
    }

    pub fn gpu_address(&self) -> u64 {
        self.resource.gpu_address()
    }

    pub fn size(&self) -> u64 {
        self.resource.size()
    }

    pub fn resource(&self) -> &GpuResource {
        &self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessDevice;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(464, 256), 512);
    }

    #[test]
    fn test_constant_buffer_round_trip() {
        let mut device = HeadlessDevice::new();
        let releases = ReleaseQueue::new();
        let mut cb = ConstantBuffer::new(&mut device, &releases, "Floats", 40).unwrap();
        assert_eq!(cb.size(), 256);

        let floats: Vec<f32> = (0..10).map(|i| i as f32 * 1.5 - 3.0).collect();
        let bytes: &[u8] = bytemuck::cast_slice(&floats);
        cb.write_bytes(0, bytes).unwrap();

        assert_eq!(cb.read_bytes(0, bytes.len()).unwrap(), bytes);
        // 设备内存与映射是同一块
        assert_eq!(&device.read_resource(cb.resource().id()).unwrap()[..bytes.len()], bytes);
        assert!(cb.write_bytes(250, &[0; 8]).is_err());
    }

    #[test]
    fn test_constant_buffer_outliving_device_reports_error() {
        let mut device = HeadlessDevice::new();
        let releases = ReleaseQueue::new();
        let mut cb = ConstantBuffer::new(&mut device, &releases, "Orphan", 16).unwrap();
        cb.write_bytes(0, &[1; 16]).unwrap();

        drop(device);

        assert!(cb.read_bytes(0, 16).is_err());
        assert!(cb.update(&[0u32; 4]).is_err());
    }

    #[test]
    fn test_index_count_follows_format() {
        let mut device = HeadlessDevice::new();
        let releases = ReleaseQueue::new();
        let mut uploader = Uploader::new(1024, releases.clone());

        let wide = IndexBuffer::new_u32(&mut device, &mut uploader, &releases, "Wide", &[0, 1, 2, 2, 1, 3]).unwrap();
        let narrow = IndexBuffer::new_u16(&mut device, &mut uploader, &releases, "Narrow", &[0, 1, 2, 2, 1, 3]).unwrap();

        assert_eq!(wide.index_count(), 6);
        assert_eq!(narrow.index_count(), 6);
        assert_eq!(narrow.view().format, Format::R16Uint);
        assert_eq!(uploader.pending_count(), 2);
        assert!(!wide.resource().is_ready());
        assert_eq!(wide.resource().state(), ResourceState::CopyDest);
    }

    #[test]
    fn test_empty_vertex_buffer_rejected() {
        let mut device = HeadlessDevice::new();
        let releases = ReleaseQueue::new();
        let mut uploader = Uploader::new(1024, releases.clone());
        assert!(VertexBuffer::new(&mut device, &mut uploader, &releases, "Empty", &[]).is_err());
    }
}
