//! 交换链与帧目标
//!
//! [`RenderContext`] 持有交换链的后台缓冲区（每个一个 RTV）和窗口大小的深度缓冲。
//! 后台缓冲区在帧之间保持 `Present` 状态，帧内才转换到 `RenderTarget`。

use super::descriptor::DescriptorHandle;
use super::resource::{GpuResource, Release, ReleaseQueue};
use super::resource_manager::ResourceManager;
use super::texture::DepthMap;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::device::{CpuDescriptor, Format, NativeResource, ResourceState, SwapChainDesc};

/// 交换链缓冲区数量（双缓冲）
pub const SWAP_CHAIN_BUFFER_COUNT: u32 = 2;

/// 后台缓冲区格式
pub const BACK_BUFFER_FORMAT: Format = Format::R8G8B8A8Unorm;

#[derive(Debug)]
struct BackBuffer {
    resource: GpuResource,
    rtv: DescriptorHandle,
    releases: ReleaseQueue,
}

impl Drop for BackBuffer {
    fn drop(&mut self) {
        self.releases.push(Release::Descriptor(self.rtv));
    }
}

/// 帧目标：后台缓冲区与深度缓冲
///
/// 深度缓冲只在 `resize` 重建期间为空；重建失败时保持为空，下一次 `resize` 会重试。
#[derive(Debug)]
pub struct RenderContext {
    back_buffers: Vec<BackBuffer>,
    depth: Option<DepthMap>,
    width: u32,
    height: u32,
}

impl RenderContext {
    /// 创建交换链、后台缓冲区 RTV 与深度缓冲
    pub fn new(resources: &mut ResourceManager, width: u32, height: u32) -> Result<Self> {
        let natives = resources.device_mut().create_swap_chain(&SwapChainDesc {
            width,
            height,
            buffer_count: SWAP_CHAIN_BUFFER_COUNT,
            format: BACK_BUFFER_FORMAT,
        })?;
        let back_buffers = Self::wrap_back_buffers(resources, natives, width, height)?;
        let depth = resources.create_depth_map("DepthStencil", width, height, false)?;

        tracing::info!(width, height, buffers = back_buffers.len(), "Swap chain created");

        Ok(Self {
            back_buffers,
            depth: Some(depth),
            width,
            height,
        })
    }

    fn wrap_back_buffers(
        resources: &mut ResourceManager,
        natives: Vec<NativeResource>,
        width: u32,
        height: u32,
    ) -> Result<Vec<BackBuffer>> {
        let size = width as u64 * height as u64 * BACK_BUFFER_FORMAT.bytes_per_pixel() as u64;
        let mut back_buffers = Vec::with_capacity(natives.len());

        for (i, native) in natives.into_iter().enumerate() {
            let releases = resources.releases().clone();
            let resource = GpuResource::new(
                native,
                format!("BackBuffer{}", i),
                size,
                ResourceState::Present,
                true,
                releases.clone(),
            );
            let rtv = resources.heaps_mut().rtv.allocate()?;
            let back_buffer = BackBuffer {
                resource,
                rtv,
                releases,
            };
            resources
                .device_mut()
                .create_render_target_view(back_buffer.resource.id(), rtv.cpu())?;
            back_buffers.push(back_buffer);
        }

        Ok(back_buffers)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn buffer_count(&self) -> usize {
        self.back_buffers.len()
    }

    fn current(&self, resources: &ResourceManager) -> Result<&BackBuffer> {
        let index = resources.device().current_back_buffer_index();
        self.back_buffers.get(index).ok_or_else(|| {
            GraphicsError::SwapchainError(format!(
                "Back buffer index {} out of range ({} buffers)",
                index,
                self.back_buffers.len()
            ))
            .into()
        })
    }

    /// 当前帧的后台缓冲区
    pub fn current_back_buffer(&self, resources: &ResourceManager) -> Result<&GpuResource> {
        Ok(&self.current(resources)?.resource)
    }

    pub fn current_rtv(&self, resources: &ResourceManager) -> Result<CpuDescriptor> {
        Ok(self.current(resources)?.rtv.cpu())
    }

    pub fn depth_dsv(&self) -> Result<CpuDescriptor> {
        self.depth
            .as_ref()
            .map(|depth| depth.dsv().cpu())
            .ok_or_else(|| GraphicsError::SwapchainError("Depth buffer is missing after a failed resize".to_string()).into())
    }

    pub fn depth_map(&self) -> Option<&DepthMap> {
        self.depth.as_ref()
    }

    /// Present -> RenderTarget
    pub fn transition_to_render_target(&self, resources: &mut ResourceManager) -> Result<()> {
        self.transition(resources, ResourceState::Present, ResourceState::RenderTarget)
    }

    /// RenderTarget -> Present
    pub fn transition_to_present(&self, resources: &mut ResourceManager) -> Result<()> {
        self.transition(resources, ResourceState::RenderTarget, ResourceState::Present)
    }

    fn transition(&self, resources: &mut ResourceManager, before: ResourceState, after: ResourceState) -> Result<()> {
        let back_buffer = self.current(resources)?;
        resources
            .queue_mut()
            .command_list()
            .transition(&back_buffer.resource, before, after)
    }

    pub fn present(&self, resources: &mut ResourceManager, sync_interval: u32) -> Result<()> {
        resources.device_mut().present(sync_interval)
    }

    /// 撤销未提交帧中的转换：被丢弃的屏障不会执行，后台缓冲区仍处于 `Present`
    pub fn abandon_frame(&self, resources: &ResourceManager) {
        if let Ok(back_buffer) = self.current(resources) {
            if back_buffer.resource.state() != ResourceState::Present {
                back_buffer.resource.status().force_state(ResourceState::Present);
            }
        }
    }

    /// 调整交换链大小
    ///
    /// 等待 GPU 空闲后释放旧的后台缓冲区与深度缓冲，描述符回到空闲列表后
    /// 再重建缓冲区、RTV 与深度缓冲。大小只在全部重建成功后更新。
    pub fn resize(&mut self, resources: &mut ResourceManager, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let complete = !self.back_buffers.is_empty() && self.depth.is_some();
        if complete && width == self.width && height == self.height {
            return Ok(());
        }

        resources.wait_idle()?;
        self.back_buffers.clear();
        self.depth = None;
        resources.process_releases();
        resources.heaps_mut().advance_generation();

        let natives = resources.device_mut().resize_swap_chain(width, height)?;
        self.back_buffers = Self::wrap_back_buffers(resources, natives, width, height)?;
        self.depth = Some(resources.create_depth_map("DepthStencil", width, height, false)?);
        self.width = width;
        self.height = height;

        tracing::info!(width, height, "Swap chain resized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RendererConfig;
    use crate::gfx::device::RenderDevice;
    use crate::gfx::headless::{HeadlessDevice, ViewKind};

    fn setup() -> (ResourceManager, std::rc::Rc<std::cell::RefCell<crate::gfx::headless::HeadlessJournal>>) {
        let device = HeadlessDevice::new();
        let journal = device.journal();
        let rm = ResourceManager::new(Box::new(device), &RendererConfig::default()).unwrap();
        (rm, journal)
    }

    #[test]
    fn test_creates_back_buffer_views_and_depth() {
        let (mut rm, journal) = setup();
        let context = RenderContext::new(&mut rm, 640, 480).unwrap();

        assert_eq!(context.buffer_count(), 2);
        assert_eq!(rm.heaps().rtv.allocated_count(), 2);
        assert_eq!(rm.heaps().dsv.allocated_count(), 1);

        let journal = journal.borrow();
        let rtvs = journal
            .views
            .iter()
            .filter(|v| v.kind == ViewKind::RenderTarget)
            .count();
        assert_eq!(rtvs, 2);
        assert_eq!(context.current_back_buffer(&rm).unwrap().state(), ResourceState::Present);
    }

    #[test]
    fn test_transition_pair() {
        let (mut rm, _journal) = setup();
        let context = RenderContext::new(&mut rm, 64, 64).unwrap();
        rm.queue_mut().reset().unwrap();

        context.transition_to_render_target(&mut rm).unwrap();
        assert_eq!(context.current_back_buffer(&rm).unwrap().state(), ResourceState::RenderTarget);
        // 重复转换不匹配当前状态
        assert!(context.transition_to_render_target(&mut rm).is_err());

        context.transition_to_present(&mut rm).unwrap();
        assert_eq!(context.current_back_buffer(&rm).unwrap().state(), ResourceState::Present);
        assert_eq!(rm.queue().list().commands().len(), 2);
    }

    #[test]
    fn test_abandon_frame_restores_present() {
        let (mut rm, _journal) = setup();
        let context = RenderContext::new(&mut rm, 64, 64).unwrap();
        rm.queue_mut().reset().unwrap();
        context.transition_to_render_target(&mut rm).unwrap();

        rm.queue_mut().discard();
        context.abandon_frame(&rm);
        assert_eq!(context.current_back_buffer(&rm).unwrap().state(), ResourceState::Present);
    }

    #[test]
    fn test_resize_recreates_buffers() {
        let (mut rm, journal) = setup();
        let mut context = RenderContext::new(&mut rm, 64, 64).unwrap();
        let old = context.current_back_buffer(&rm).unwrap().id();

        context.resize(&mut rm, 128, 96).unwrap();
        assert_eq!((context.width(), context.height()), (128, 96));
        assert_eq!(context.buffer_count(), 2);
        assert!(journal.borrow().released.contains(&old));
        assert_eq!(rm.heaps().rtv.allocated_count(), 2);
        assert_eq!(context.depth_map().unwrap().width(), 128);
        assert_eq!(rm.device().current_back_buffer_index(), 0);
    }

    #[test]
    fn test_resize_to_zero_is_ignored() {
        let (mut rm, _journal) = setup();
        let mut context = RenderContext::new(&mut rm, 64, 64).unwrap();
        context.resize(&mut rm, 0, 0).unwrap();
        assert_eq!((context.width(), context.height()), (64, 64));
    }

    #[test]
    fn test_resize_with_single_dsv_slot() {
        let device = HeadlessDevice::new();
        let config = RendererConfig {
            dsv_heap_size: 1,
            ..RendererConfig::default()
        };
        let mut rm = ResourceManager::new(Box::new(device), &config).unwrap();
        let mut context = RenderContext::new(&mut rm, 64, 64).unwrap();
        assert_eq!(rm.heaps().dsv.allocated_count(), 1);

        context.resize(&mut rm, 128, 96).unwrap();
        context.resize(&mut rm, 32, 32).unwrap();

        assert_eq!((context.width(), context.height()), (32, 32));
        assert_eq!(context.depth_map().unwrap().width(), 32);
        assert_eq!(rm.heaps().dsv.allocated_count(), 1);
        assert!(context.depth_dsv().is_ok());
    }
}
