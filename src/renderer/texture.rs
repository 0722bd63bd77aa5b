//! 纹理与深度图
//!
//! [`Texture`] 在渲染通道堆中持有一个 SRV；像素数据进入上传队列，上传完成后
//! 转换到 `PixelShaderResource`。[`DepthMap`] 是可作为深度目标也可被着色器
//! 采样的表面，立方体深度图每个面各有一个 DSV。

use super::command::SubresourceFootprint;
use super::descriptor::{DescriptorHandle, DescriptorHeapAllocator};
use super::resource::{GpuResource, Release, ReleaseQueue};
use super::uploader::Uploader;
use crate::assets::ImageData;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::device::{
    Format, RenderDevice, ResourceState, SrvDesc, SrvDimension, TextureDesc, TextureUsage,
};

/// 拷贝源的行距对齐
pub const TEXTURE_ROW_PITCH_ALIGNMENT: u64 = 256;

/// 拷贝源中每个子资源起始位置的对齐
pub const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;

fn align(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) / alignment * alignment
}

/// 计算纹理全部子资源在暂存缓冲区中的布局
///
/// 返回每个子资源的 footprint（偏移相对 0）以及总字节数。
pub fn copyable_footprints(desc: &TextureDesc) -> (Vec<SubresourceFootprint>, u64) {
    let bpp = desc.format.bytes_per_pixel() as u64;
    let mut footprints = Vec::with_capacity(desc.subresource_count() as usize);
    let mut offset = 0u64;

    for _slice in 0..desc.array_size {
        for mip in 0..desc.mip_levels {
            let width = (desc.width >> mip).max(1);
            let height = (desc.height >> mip).max(1);
            let row_pitch = align(width as u64 * bpp, TEXTURE_ROW_PITCH_ALIGNMENT);

            offset = align(offset, TEXTURE_PLACEMENT_ALIGNMENT);
            footprints.push(SubresourceFootprint {
                offset,
                format: desc.format,
                width,
                height,
                row_pitch: row_pitch as u32,
            });
            offset += row_pitch * height as u64;
        }
    }

    (footprints, offset)
}

/// 着色器采样的纹理
#[derive(Debug)]
pub struct Texture {
    resource: GpuResource,
    desc: TextureDesc,
    srv: DescriptorHandle,
    srv_desc: SrvDesc,
    releases: ReleaseQueue,
}

impl Texture {
    /// 创建纹理并把像素数据加入上传队列
    ///
    /// 六层的图像创建为立方体贴图。
    pub fn new(
        device: &mut dyn RenderDevice,
        heap: &mut DescriptorHeapAllocator,
        uploader: &mut Uploader,
        releases: &ReleaseQueue,
        name: &str,
        image: &ImageData,
    ) -> Result<Self> {
        image.validate()?;

        let desc = image.texture_desc(name);
        let native = device.create_texture(&desc)?;
        let (_, size) = copyable_footprints(&desc);
        let resource = GpuResource::new(native, name, size, ResourceState::CopyDest, false, releases.clone());

        let srv_desc = SrvDesc {
            format: desc.format,
            dimension: if image.is_cube() {
                SrvDimension::TextureCube
            } else {
                SrvDimension::Texture2D
            },
            mip_levels: desc.mip_levels,
        };
        let srv = heap.allocate()?;
        if let Err(e) = device.create_shader_resource_view(resource.id(), &srv_desc, srv.cpu()) {
            releases.push(Release::Descriptor(srv));
            return Err(e);
        }

        uploader.enqueue_texture(&resource, &desc, image.subresources.clone(), ResourceState::PixelShaderResource);

        tracing::debug!(
            texture = name,
            width = desc.width,
            height = desc.height,
            mips = desc.mip_levels,
            layers = desc.array_size,
            "Texture created"
        );

        Ok(Self {
            resource,
            desc,
            srv,
            srv_desc,
            releases: releases.clone(),
        })
    }

    pub fn resource(&self) -> &GpuResource {
        &self.resource
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn srv(&self) -> DescriptorHandle {
        self.srv
    }

    pub fn srv_desc(&self) -> &SrvDesc {
        &self.srv_desc
    }

    pub fn is_cube_map(&self) -> bool {
        self.srv_desc.dimension == SrvDimension::TextureCube
    }

    /// 上传完成且处于可采样状态
    pub fn is_ready(&self) -> bool {
        self.resource.is_ready() && self.resource.state() == ResourceState::PixelShaderResource
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.releases.push(Release::Descriptor(self.srv));
    }
}

/// 深度图
#[derive(Debug)]
pub struct DepthMap {
    resource: GpuResource,
    width: u32,
    height: u32,
    dsvs: Vec<DescriptorHandle>,
    srv: DescriptorHandle,
    is_cube: bool,
    releases: ReleaseQueue,
}

impl DepthMap {
    /// 深度模板格式
    pub const DSV_FORMAT: Format = Format::D24UnormS8Uint;

    pub fn new(
        device: &mut dyn RenderDevice,
        dsv_heap: &mut DescriptorHeapAllocator,
        srv_heap: &mut DescriptorHeapAllocator,
        releases: &ReleaseQueue,
        name: &str,
        width: u32,
        height: u32,
        is_cube: bool,
    ) -> Result<Self> {
        if is_cube && width != height {
            return Err(GraphicsError::ResourceCreationFailure(format!(
                "Cube depth map '{}' must be square, got {}x{}",
                name, width, height
            ))
            .into());
        }

        let layers = if is_cube { 6 } else { 1 };
        let native = device.create_texture(&TextureDesc {
            name: name.to_string(),
            width,
            height,
            array_size: layers,
            mip_levels: 1,
            format: Format::R24G8Typeless,
            usage: TextureUsage::DepthStencil,
            initial_state: ResourceState::DepthWrite,
        })?;
        let size = width as u64 * height as u64 * 4 * layers as u64;
        let resource = GpuResource::new(native, name, size, ResourceState::DepthWrite, true, releases.clone());

        // 分配失败时已经拿到的槽位交给释放队列
        let mut dsvs = Vec::with_capacity(layers as usize);
        let created = (|| -> Result<DescriptorHandle> {
            if is_cube {
                for face in 0..6 {
                    let handle = dsv_heap.allocate()?;
                    dsvs.push(handle);
                    device.create_depth_stencil_view(resource.id(), Self::DSV_FORMAT, Some(face), handle.cpu())?;
                }
            } else {
                let handle = dsv_heap.allocate()?;
                dsvs.push(handle);
                device.create_depth_stencil_view(resource.id(), Self::DSV_FORMAT, None, handle.cpu())?;
            }

            let srv = srv_heap.allocate()?;
            let srv_desc = SrvDesc {
                format: Format::R24UnormX8Typeless,
                dimension: if is_cube {
                    SrvDimension::TextureCube
                } else {
                    SrvDimension::Texture2D
                },
                mip_levels: 1,
            };
            if let Err(e) = device.create_shader_resource_view(resource.id(), &srv_desc, srv.cpu()) {
                releases.push(Release::Descriptor(srv));
                return Err(e);
            }
            Ok(srv)
        })();

        let srv = match created {
            Ok(srv) => srv,
            Err(e) => {
                for handle in dsvs {
                    releases.push(Release::Descriptor(handle));
                }
                return Err(e);
            }
        };

        Ok(Self {
            resource,
            width,
            height,
            dsvs,
            srv,
            is_cube,
            releases: releases.clone(),
        })
    }

    pub fn resource(&self) -> &GpuResource {
        &self.resource
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// 第一个（平面深度图唯一的）DSV
    pub fn dsv(&self) -> DescriptorHandle {
        self.dsvs[0]
    }

    /// 立方体某一面的 DSV
    pub fn face_dsv(&self, face: usize) -> Option<DescriptorHandle> {
        self.dsvs.get(face).copied()
    }

    pub fn srv(&self) -> DescriptorHandle {
        self.srv
    }

    pub fn is_cube_map(&self) -> bool {
        self.is_cube
    }
}

impl Drop for DepthMap {
    fn drop(&mut self) {
        for handle in &self.dsvs {
            self.releases.push(Release::Descriptor(*handle));
        }
        self.releases.push(Release::Descriptor(self.srv));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::device::DescriptorHeapKind;
    use crate::gfx::headless::{HeadlessDevice, ViewKind};

    #[test]
    fn test_footprints_are_aligned() {
        let image = ImageData::solid_color(10, 3, [1, 2, 3, 4]).unwrap();
        let (footprints, total) = copyable_footprints(&image.texture_desc("Small"));
        assert_eq!(footprints.len(), 1);
        assert_eq!(footprints[0].row_pitch, 256);
        assert_eq!(total, 256 * 3);

        let cube = crate::assets::texture_loader::cube_from_faces(
            (0..6).map(|_| ImageData::solid_color(4, 4, [0; 4]).unwrap()).collect(),
        )
        .unwrap();
        let (footprints, _) = copyable_footprints(&cube.texture_desc("Cube"));
        assert_eq!(footprints.len(), 6);
        assert!(footprints.iter().all(|f| f.offset % TEXTURE_PLACEMENT_ALIGNMENT == 0));
        assert_eq!(footprints[1].offset, 1024);
    }

    #[test]
    fn test_texture_creates_srv_and_queues_upload() {
        let mut device = HeadlessDevice::new();
        let releases = ReleaseQueue::new();
        let mut heap =
            DescriptorHeapAllocator::new(&mut device, "Srv", DescriptorHeapKind::CbvSrvUav, 4, true).unwrap();
        let mut uploader = Uploader::new(1 << 20, releases.clone());

        let image = ImageData::checkerboard(16, 4, [255; 4], [0, 0, 0, 255], true).unwrap();
        let texture = Texture::new(&mut device, &mut heap, &mut uploader, &releases, "Checker", &image).unwrap();

        assert!(!texture.is_ready());
        assert!(texture.srv().gpu().is_some());
        assert_eq!(uploader.pending_count(), 1);
        assert_eq!(heap.allocated_count(), 1);

        drop(texture);
        let drained = releases.drain();
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn test_cube_depth_map_has_face_views() {
        let mut device = HeadlessDevice::new();
        let releases = ReleaseQueue::new();
        let mut dsv_heap = DescriptorHeapAllocator::new(&mut device, "Dsv", DescriptorHeapKind::Dsv, 8, false).unwrap();
        let mut srv_heap =
            DescriptorHeapAllocator::new(&mut device, "Srv", DescriptorHeapKind::CbvSrvUav, 8, true).unwrap();

        let depth = DepthMap::new(&mut device, &mut dsv_heap, &mut srv_heap, &releases, "Shadow", 64, 64, true).unwrap();
        assert!(depth.is_cube_map());
        assert_eq!(dsv_heap.allocated_count(), 6);
        assert!(depth.face_dsv(5).is_some());
        assert!(depth.face_dsv(6).is_none());

        let journal = device.journal();
        let journal = journal.borrow();
        let faces: Vec<_> = journal
            .views
            .iter()
            .filter_map(|v| match v.kind {
                ViewKind::DepthStencil { array_slice } => array_slice,
                _ => None,
            })
            .collect();
        assert_eq!(faces, vec![0, 1, 2, 3, 4, 5]);
        assert!(journal
            .views
            .iter()
            .any(|v| v.kind == ViewKind::ShaderResource(SrvDimension::TextureCube)));
    }

    #[test]
    fn test_depth_map_out_of_descriptors() {
        let mut device = HeadlessDevice::new();
        let releases = ReleaseQueue::new();
        let mut dsv_heap = DescriptorHeapAllocator::new(&mut device, "Dsv", DescriptorHeapKind::Dsv, 2, false).unwrap();
        let mut srv_heap =
            DescriptorHeapAllocator::new(&mut device, "Srv", DescriptorHeapKind::CbvSrvUav, 2, true).unwrap();

        let result = DepthMap::new(&mut device, &mut dsv_heap, &mut srv_heap, &releases, "Shadow", 32, 32, true);
        assert!(result.is_err());
        // 两个已分配的 DSV 和资源本身都进入释放队列
        assert_eq!(releases.len(), 3);
    }
}
