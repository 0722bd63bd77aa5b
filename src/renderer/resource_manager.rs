//! 资源管理器
//!
//! 显式构造、由应用根对象持有的渲染上下文：设备、描述符堆、直接队列、上传器、
//! 管线与根签名缓存、着色器库以及延迟释放队列都在这里。其他组件通过引用使用它。

use std::rc::Rc;

use super::buffer::{ConstantBuffer, IndexBuffer, VertexBuffer};
use super::cache::CacheStats;
use super::descriptor::{DescriptorHeapManager, DescriptorHeapStats, DescriptorRange};
use super::pipeline::{PipelineStateCache, PipelineStateDesc, ShaderBytecode};
use super::queue::CommandQueueManager;
use super::resource::{Release, ReleaseQueue};
use super::root_signature::{RootSignatureCache, RootSignatureDesc};
use super::shader::ShaderLibrary;
use super::sync::FenceValue;
use super::texture::{DepthMap, Texture};
use super::uploader::Uploader;
use crate::assets::ImageData;
use crate::core::config::RendererConfig;
use crate::core::error::{EngineError, Result};
use crate::geometry::vertex::Vertex;
use crate::gfx::device::{PipelineStateId, RenderDevice, RootSignatureId};

/// 渲染资源上下文
pub struct ResourceManager {
    device: Box<dyn RenderDevice>,
    heaps: DescriptorHeapManager,
    queue: CommandQueueManager,
    uploader: Uploader,
    root_signatures: RootSignatureCache,
    pipeline_states: PipelineStateCache,
    shaders: ShaderLibrary,
    releases: ReleaseQueue,
}

impl ResourceManager {
    /// 创建描述符堆并编译内置着色器
    ///
    /// 任何一步失败都会终止初始化。
    pub fn new(mut device: Box<dyn RenderDevice>, config: &RendererConfig) -> Result<Self> {
        let heaps = DescriptorHeapManager::new(device.as_mut(), config)?;
        let shaders = ShaderLibrary::with_builtins(device.as_mut())?;
        let releases = ReleaseQueue::new();

        tracing::info!(
            device = device.name(),
            rtv = config.rtv_heap_size,
            dsv = config.dsv_heap_size,
            render_pass = config.render_pass_heap_size,
            staging = config.staging_budget_bytes,
            "Resource manager initialized"
        );

        Ok(Self {
            device,
            heaps,
            queue: CommandQueueManager::new(),
            uploader: Uploader::new(config.staging_budget_bytes, releases.clone()),
            root_signatures: RootSignatureCache::new("RootSignature"),
            pipeline_states: PipelineStateCache::new("PipelineState"),
            shaders,
            releases,
        })
    }

    // ========== 访问器 ==========

    pub fn device(&self) -> &dyn RenderDevice {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn RenderDevice {
        self.device.as_mut()
    }

    pub fn heaps(&self) -> &DescriptorHeapManager {
        &self.heaps
    }

    pub fn heaps_mut(&mut self) -> &mut DescriptorHeapManager {
        &mut self.heaps
    }

    pub fn queue(&self) -> &CommandQueueManager {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut CommandQueueManager {
        &mut self.queue
    }

    /// 同时借出设备与队列
    pub fn device_and_queue(&mut self) -> (&mut dyn RenderDevice, &mut CommandQueueManager) {
        (self.device.as_mut(), &mut self.queue)
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    pub fn releases(&self) -> &ReleaseQueue {
        &self.releases
    }

    pub fn shaders(&self) -> &ShaderLibrary {
        &self.shaders
    }

    pub fn shaders_mut(&mut self) -> &mut ShaderLibrary {
        &mut self.shaders
    }

    pub fn shader(&self, name: &str) -> Result<ShaderBytecode> {
        self.shaders.get(name)
    }

    // ========== 资源创建 ==========

    pub fn create_vertex_buffer(&mut self, name: &str, vertices: &[Vertex]) -> Result<VertexBuffer> {
        VertexBuffer::new(self.device.as_mut(), &mut self.uploader, &self.releases, name, vertices)
    }

    pub fn create_index_buffer(&mut self, name: &str, indices: &[u32]) -> Result<IndexBuffer> {
        IndexBuffer::new_u32(self.device.as_mut(), &mut self.uploader, &self.releases, name, indices)
    }

    pub fn create_index_buffer_u16(&mut self, name: &str, indices: &[u16]) -> Result<IndexBuffer> {
        IndexBuffer::new_u16(self.device.as_mut(), &mut self.uploader, &self.releases, name, indices)
    }

    pub fn create_constant_buffer(&mut self, name: &str, size: u64) -> Result<ConstantBuffer> {
        ConstantBuffer::new(self.device.as_mut(), &self.releases, name, size)
    }

    /// 二维纹理；SRV 位于渲染通道堆
    pub fn create_texture(&mut self, name: &str, image: &ImageData) -> Result<Rc<Texture>> {
        let texture = Texture::new(
            self.device.as_mut(),
            &mut self.heaps.render_pass,
            &mut self.uploader,
            &self.releases,
            name,
            image,
        )?;
        Ok(Rc::new(texture))
    }

    /// 立方体贴图，`image` 必须有六层
    pub fn create_cube_map(&mut self, name: &str, image: &ImageData) -> Result<Rc<Texture>> {
        if !image.is_cube() {
            return Err(EngineError::TextureLoading(format!(
                "'{}' has {} layers, a cube map needs 6",
                name, image.array_size
            )));
        }
        self.create_texture(name, image)
    }

    pub fn create_depth_map(&mut self, name: &str, width: u32, height: u32, is_cube: bool) -> Result<DepthMap> {
        DepthMap::new(
            self.device.as_mut(),
            &mut self.heaps.dsv,
            &mut self.heaps.render_pass,
            &self.releases,
            name,
            width,
            height,
            is_cube,
        )
    }

    /// 在渲染通道堆中分配连续槽位
    pub fn allocate_descriptor_range(&mut self, count: u32) -> Result<DescriptorRange> {
        self.heaps.render_pass.allocate_contiguous(count)
    }

    pub fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> Result<RootSignatureId> {
        let device = self.device.as_mut();
        self.root_signatures
            .get_or_create(desc, |d| device.create_root_signature(d))
    }

    pub fn create_pipeline_state(&mut self, desc: &PipelineStateDesc) -> Result<PipelineStateId> {
        let device = self.device.as_mut();
        self.pipeline_states
            .get_or_create(desc, |d| device.create_pipeline_state(d))
    }

    pub fn root_signature_stats(&self) -> CacheStats {
        self.root_signatures.stats()
    }

    pub fn pipeline_state_stats(&self) -> CacheStats {
        self.pipeline_states.stats()
    }

    pub fn descriptor_stats(&self) -> Vec<DescriptorHeapStats> {
        self.heaps.all_stats()
    }

    // ========== 上传与同步 ==========

    pub fn upload_all_pending(&mut self) -> Result<bool> {
        self.uploader.upload_all_pending(self.device.as_mut(), &mut self.queue)
    }

    pub fn upload_texture_batch(&mut self, textures: &[&Texture]) -> Result<bool> {
        self.uploader
            .upload_texture_batch(self.device.as_mut(), &mut self.queue, textures)
    }

    /// 阻塞等待 `value`
    ///
    /// 等到最后一次提交完成时，GPU 已不再引用任何资源：处理延迟释放并推进描述符代数。
    pub fn wait_for_fence(&mut self, value: FenceValue) -> Result<()> {
        self.queue.wait_for_fence_cpu_blocking(self.device.as_mut(), value)?;
        if value >= self.queue.last_submitted() {
            self.process_releases();
            self.heaps.advance_generation();
        }
        Ok(())
    }

    /// 等待队列空闲
    pub fn wait_idle(&mut self) -> Result<()> {
        self.queue.flush(self.device.as_mut())?;
        self.process_releases();
        self.heaps.advance_generation();
        Ok(())
    }

    /// 释放所有已销毁对象的原生分配与描述符
    ///
    /// 只能在 GPU 完成最后一次提交之后调用。
    pub fn process_releases(&mut self) -> usize {
        let pending = self.releases.drain();
        let count = pending.len();
        for release in pending {
            let result = match release {
                Release::Resource(id) => {
                    self.device.release(id);
                    Ok(())
                }
                Release::Descriptor(handle) => self.heaps.free(handle),
                Release::Range(range) => self.heaps.free_range(range),
            };
            if let Err(e) = result {
                tracing::error!(?release, "Deferred release failed: {}", e);
            }
        }
        if count > 0 {
            tracing::debug!(count, "Deferred releases processed");
        }
        count
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        if let Err(e) = self.queue.flush(self.device.as_mut()) {
            tracing::warn!("Failed to flush the queue on shutdown: {}", e);
        }
        self.process_releases();
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("device", &self.device.name())
            .field("heaps", &self.heaps)
            .field("uploader", &self.uploader)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{HeadlessDevice, HeadlessJournal};
    use crate::renderer::pipeline::PipelineStateBuilder;
    use crate::renderer::shader::names;
    use std::cell::RefCell;

    fn manager() -> (ResourceManager, Rc<RefCell<HeadlessJournal>>) {
        let device = HeadlessDevice::new();
        let journal = device.journal();
        let rm = ResourceManager::new(Box::new(device), &RendererConfig::default()).unwrap();
        (rm, journal)
    }

    #[test]
    fn test_creates_three_heaps() {
        let (rm, journal) = manager();
        assert_eq!(journal.borrow().heaps_created.len(), 3);
        assert_eq!(rm.descriptor_stats().len(), 3);
        assert!(rm.shaders().contains(names::PBR_PS));
    }

    #[test]
    fn test_dropped_texture_released_after_fence() {
        let (mut rm, journal) = manager();
        let image = ImageData::solid_color(2, 2, [9; 4]).unwrap();
        let texture = rm.create_texture("Temp", &image).unwrap();
        assert!(rm.upload_all_pending().unwrap());
        assert_eq!(rm.heaps().render_pass.allocated_count(), 1);

        drop(texture);
        // 仍在队列中，直到下一次 fence 等待
        assert_eq!(rm.releases().len(), 2);
        assert_eq!(rm.heaps().render_pass.allocated_count(), 1);

        rm.wait_idle().unwrap();
        assert!(rm.releases().is_empty());
        assert_eq!(rm.heaps().render_pass.allocated_count(), 0);
        assert_eq!(rm.heaps().render_pass.available(), rm.heaps().render_pass.capacity());
        assert_eq!(journal.borrow().released.len(), 1);
    }

    #[test]
    fn test_cube_map_requires_six_layers() {
        let (mut rm, _) = manager();
        let flat = ImageData::solid_color(2, 2, [0; 4]).unwrap();
        assert!(rm.create_cube_map("Sky", &flat).is_err());
    }

    #[test]
    fn test_pipeline_cache_through_manager() {
        let (mut rm, journal) = manager();
        let root = rm.create_root_signature(&RootSignatureDesc::default_layout(0)).unwrap();
        let vs = rm.shader(names::BASIC_VS).unwrap();
        let ps = rm.shader(names::BASIC_PS_UNTEXTURED).unwrap();
        let desc = PipelineStateBuilder::configure_from_default(vs, ps, root)
            .build()
            .unwrap();

        let a = rm.create_pipeline_state(&desc).unwrap();
        let b = rm.create_pipeline_state(&desc.clone()).unwrap();
        assert_eq!(a, b);
        assert_eq!(journal.borrow().pipeline_states_created, 1);
        assert_eq!(rm.pipeline_state_stats().hits, 1);
    }
}
