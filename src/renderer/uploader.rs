//! 上传器
//!
//! 默认堆资源的初始数据先进入待上传队列，刷新时拷贝到一个持久映射的暂存缓冲区，
//! 在直接队列的命令列表上记录拷贝与状态转换，提交后阻塞等待 fence。
//!
//! 暂存缓冲区大小即单次提交的预算。队列中的数据超过预算时按顺序分成多批提交；
//! 单个资源超过预算则无法上传，返回 `UploadTooLarge`。
//!
//! 每次上传结束后命令列表处于刚重置的记录状态，帧可以直接在上面继续记录。
//!
//! 没有单独的复制队列与复制命令列表：上传与帧共用直接队列，作为独立的一次提交执行，
//! 并在返回前等待完成。因此上传不会与帧渲染重叠，也不需要跨队列同步。

use std::collections::VecDeque;
use std::rc::Weak;

use super::buffer::align_up;
use super::command::SubresourceFootprint;
use super::queue::CommandQueueManager;
use super::resource::{GpuResource, ReleaseQueue, ResourceStatus};
use super::texture::{copyable_footprints, Texture, TEXTURE_PLACEMENT_ALIGNMENT};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::device::{BufferDesc, HeapType, MappedRegion, RenderDevice, ResourceId, ResourceState, TextureDesc};

enum PendingData {
    Buffer(Vec<u8>),
    Texture {
        footprints: Vec<SubresourceFootprint>,
        size: u64,
        subresources: Vec<Vec<u8>>,
    },
}

struct PendingUpload {
    target: ResourceId,
    name: String,
    status: Weak<ResourceStatus>,
    data: PendingData,
    final_state: ResourceState,
}

impl PendingUpload {
    /// 在暂存缓冲区中占用的字节数
    fn staging_size(&self) -> u64 {
        match &self.data {
            PendingData::Buffer(bytes) => bytes.len() as u64,
            PendingData::Texture { size, .. } => *size,
        }
    }
}

impl std::fmt::Debug for PendingUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingUpload")
            .field("target", &self.target)
            .field("name", &self.name)
            .field("size", &self.staging_size())
            .finish()
    }
}

struct Staging {
    resource: GpuResource,
    mapped: MappedRegion,
}

/// 上传器
pub struct Uploader {
    budget: u64,
    staging: Option<Staging>,
    pending: VecDeque<PendingUpload>,
    releases: ReleaseQueue,
    batches_submitted: u64,
    bytes_uploaded: u64,
}

impl Uploader {
    /// `budget` 为暂存缓冲区大小，首次上传时才创建
    pub fn new(budget: u64, releases: ReleaseQueue) -> Self {
        Self {
            budget,
            staging: None,
            pending: VecDeque::new(),
            releases,
            batches_submitted: 0,
            bytes_uploaded: 0,
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// 队列中仍然存活的上传项数量
    pub fn pending_count(&self) -> usize {
        self.pending.iter().filter(|p| p.status.strong_count() > 0).count()
    }

    pub fn batches_submitted(&self) -> u64 {
        self.batches_submitted
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }

    /// 缓冲区数据入队
    pub fn enqueue_buffer(&mut self, resource: &GpuResource, bytes: Vec<u8>, final_state: ResourceState) {
        self.pending.push_back(PendingUpload {
            target: resource.id(),
            name: resource.name().to_string(),
            status: resource.status_weak(),
            data: PendingData::Buffer(bytes),
            final_state,
        });
    }

    /// 纹理数据入队，`subresources` 按子资源索引排列且紧密排列
    pub fn enqueue_texture(
        &mut self,
        resource: &GpuResource,
        desc: &TextureDesc,
        subresources: Vec<Vec<u8>>,
        final_state: ResourceState,
    ) {
        let (footprints, size) = copyable_footprints(desc);
        self.pending.push_back(PendingUpload {
            target: resource.id(),
            name: resource.name().to_string(),
            status: resource.status_weak(),
            data: PendingData::Texture {
                footprints,
                size,
                subresources,
            },
            final_state,
        });
    }

    /// 上传所有排队的数据
    ///
    /// 没有需要上传的数据时不提交任何命令并返回 `false`。
    pub fn upload_all_pending(&mut self, device: &mut dyn RenderDevice, queue: &mut CommandQueueManager) -> Result<bool> {
        self.prune_dropped();
        if self.pending.is_empty() {
            return Ok(false);
        }

        self.reject_oversized(|_| true)?;
        let items: Vec<PendingUpload> = self.pending.drain(..).collect();
        self.submit(device, queue, items)?;
        Ok(true)
    }

    /// 只上传指定纹理，一次批量提交；其余排队项保持不变
    pub fn upload_texture_batch(
        &mut self,
        device: &mut dyn RenderDevice,
        queue: &mut CommandQueueManager,
        textures: &[&Texture],
    ) -> Result<bool> {
        self.prune_dropped();
        let targets: Vec<ResourceId> = textures.iter().map(|t| t.resource().id()).collect();

        self.reject_oversized(|item| targets.contains(&item.target))?;

        let mut items = Vec::new();
        let mut rest = VecDeque::with_capacity(self.pending.len());
        for item in self.pending.drain(..) {
            if targets.contains(&item.target) {
                items.push(item);
            } else {
                rest.push_back(item);
            }
        }
        self.pending = rest;

        if items.is_empty() {
            return Ok(false);
        }
        self.submit(device, queue, items)?;
        Ok(true)
    }

    /// 丢弃目标资源已经销毁的上传项
    fn prune_dropped(&mut self) {
        self.pending.retain(|item| {
            let alive = item.status.strong_count() > 0;
            if !alive {
                tracing::debug!(resource = %item.name, "Skipping upload for dropped resource");
            }
            alive
        });
    }

    /// 把超过预算的上传项移出队列
    ///
    /// 在任何提交之前检查；被移出的资源保持未就绪状态。
    fn reject_oversized(&mut self, selected: impl Fn(&PendingUpload) -> bool) -> Result<()> {
        let budget = self.budget;
        let mut first_error = None;
        self.pending.retain(|item| {
            let size = item.staging_size();
            if selected(item) && size > budget {
                tracing::warn!(resource = %item.name, size, budget, "Upload exceeds staging budget");
                first_error.get_or_insert(GraphicsError::UploadTooLarge { size, budget });
                false
            } else {
                true
            }
        });

        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn ensure_staging(&mut self, device: &mut dyn RenderDevice) -> Result<()> {
        if self.staging.is_some() {
            return Ok(());
        }

        let native = device.create_buffer(&BufferDesc {
            name: "UploadStaging".to_string(),
            size: self.budget,
            heap: HeapType::Upload,
            initial_state: ResourceState::GenericRead,
        })?;
        let resource = GpuResource::new(
            native,
            "UploadStaging",
            self.budget,
            ResourceState::GenericRead,
            true,
            self.releases.clone(),
        );
        let mapped = device.map(resource.id())?;
        tracing::debug!(budget = self.budget, "Staging buffer created");
        self.staging = Some(Staging { resource, mapped });
        Ok(())
    }

    /// 按预算分批提交
    fn submit(&mut self, device: &mut dyn RenderDevice, queue: &mut CommandQueueManager, items: Vec<PendingUpload>) -> Result<()> {
        let list = queue.list();
        if list.is_recording() && !list.is_empty() {
            // 放回队列，等帧提交后再上传
            self.pending.extend(items);
            return Err(GraphicsError::CommandExecution(
                "Upload requested while the command list holds unsubmitted commands".to_string(),
            )
            .into());
        }

        self.ensure_staging(device)?;

        let mut batch = Vec::new();
        let mut cursor = 0u64;
        for item in items {
            let start = align_up(cursor, TEXTURE_PLACEMENT_ALIGNMENT);
            if !batch.is_empty() && start + item.staging_size() > self.budget {
                self.submit_batch(device, queue, std::mem::take(&mut batch))?;
                cursor = 0;
            }
            let start = align_up(cursor, TEXTURE_PLACEMENT_ALIGNMENT);
            cursor = start + item.staging_size();
            batch.push((start, item));
        }
        if !batch.is_empty() {
            self.submit_batch(device, queue, batch)?;
        }

        if !queue.list().is_recording() {
            queue.reset()?;
        }
        Ok(())
    }

    fn submit_batch(
        &mut self,
        device: &mut dyn RenderDevice,
        queue: &mut CommandQueueManager,
        batch: Vec<(u64, PendingUpload)>,
    ) -> Result<()> {
        let staging = self
            .staging
            .as_ref()
            .ok_or_else(|| GraphicsError::CommandExecution("Staging buffer missing".to_string()))?;

        if !queue.list().is_recording() {
            queue.reset()?;
        }

        let mut uploaded = Vec::with_capacity(batch.len());
        let mut bytes = 0u64;
        for (offset, item) in batch {
            let Some(status) = item.status.upgrade() else {
                continue;
            };

            match &item.data {
                PendingData::Buffer(data) => {
                    staging.mapped.write(offset as usize, data)?;
                    queue
                        .command_list()
                        .copy_buffer(item.target, 0, staging.resource.id(), offset, data.len() as u64)?;
                }
                PendingData::Texture {
                    footprints,
                    subresources,
                    ..
                } => {
                    for (index, (footprint, data)) in footprints.iter().zip(subresources).enumerate() {
                        let mut placed = *footprint;
                        placed.offset += offset;
                        write_rows(&staging.mapped, &placed, data)?;
                        queue
                            .command_list()
                            .copy_texture(item.target, index as u32, staging.resource.id(), placed)?;
                    }
                }
            }

            queue.command_list().transition_status(
                item.target,
                &item.name,
                &status,
                ResourceState::CopyDest,
                item.final_state,
            )?;
            bytes += item.staging_size();
            uploaded.push(status);
        }

        let fence = queue.execute_command_list(device)?;
        queue.wait_for_fence_cpu_blocking(device, fence)?;

        for status in &uploaded {
            status.set_ready(true);
        }
        self.batches_submitted += 1;
        self.bytes_uploaded += bytes;
        tracing::info!(resources = uploaded.len(), bytes, fence = fence.value(), "Upload batch completed");
        Ok(())
    }
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("budget", &self.budget)
            .field("pending", &self.pending)
            .field("batches_submitted", &self.batches_submitted)
            .finish()
    }
}

/// 把紧密排列的行按 footprint 行距写入暂存缓冲区
fn write_rows(mapped: &MappedRegion, footprint: &SubresourceFootprint, data: &[u8]) -> Result<()> {
    let rows = footprint.height as usize;
    if rows == 0 || data.len() % rows != 0 {
        return Err(GraphicsError::CommandExecution(format!(
            "Subresource data of {} bytes does not split into {} rows",
            data.len(),
            rows
        ))
        .into());
    }
    let row_bytes = data.len() / rows;
    for (row, line) in data.chunks_exact(row_bytes).enumerate() {
        mapped.write(footprint.offset as usize + row * footprint.row_pitch as usize, line)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::ImageData;
    use crate::core::error::EngineError;
    use crate::gfx::device::DescriptorHeapKind;
    use crate::gfx::headless::HeadlessDevice;
    use crate::renderer::buffer::VertexBuffer;
    use crate::renderer::command::Command;
    use crate::geometry::vertex::Vertex;
    use crate::renderer::descriptor::DescriptorHeapAllocator;

    fn setup(budget: u64) -> (HeadlessDevice, CommandQueueManager, Uploader, ReleaseQueue) {
        let releases = ReleaseQueue::new();
        (
            HeadlessDevice::new(),
            CommandQueueManager::new(),
            Uploader::new(budget, releases.clone()),
            releases,
        )
    }

    fn triangle() -> Vec<Vertex> {
        vec![
            Vertex::from_position([0.0, 0.5, 0.0]),
            Vertex::from_position([0.5, -0.5, 0.0]),
            Vertex::from_position([-0.5, -0.5, 0.0]),
        ]
    }

    #[test]
    fn test_upload_is_idempotent() {
        let (mut device, mut queue, mut uploader, releases) = setup(4096);
        let vb = VertexBuffer::new(&mut device, &mut uploader, &releases, "Triangle", &triangle()).unwrap();

        assert!(uploader.upload_all_pending(&mut device, &mut queue).unwrap());
        assert!(vb.resource().is_ready());
        assert_eq!(vb.resource().state(), ResourceState::VertexAndConstantBuffer);
        assert_eq!(
            device.read_resource(vb.resource().id()).unwrap(),
            bytemuck::cast_slice::<Vertex, u8>(&triangle()).to_vec()
        );

        let submissions = device.journal().borrow().submissions.len();
        assert!(!uploader.upload_all_pending(&mut device, &mut queue).unwrap());
        assert_eq!(device.journal().borrow().submissions.len(), submissions);

        // 列表保持在可记录状态
        assert!(queue.list().is_recording());
        assert!(queue.list().is_empty());
    }

    #[test]
    fn test_oversized_upload_is_rejected_and_removed() {
        let (mut device, mut queue, mut uploader, releases) = setup(64);
        let vertices = vec![Vertex::default(); 4];
        let vb = VertexBuffer::new(&mut device, &mut uploader, &releases, "Large", &vertices).unwrap();

        let err = uploader.upload_all_pending(&mut device, &mut queue).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Graphics(GraphicsError::UploadTooLarge { size: 176, budget: 64 })
        ));
        assert!(device.journal().borrow().submissions.is_empty());
        assert_eq!(uploader.pending_count(), 0);
        assert!(!vb.resource().is_ready());
        assert_eq!(vb.resource().state(), ResourceState::CopyDest);

        assert!(!uploader.upload_all_pending(&mut device, &mut queue).unwrap());
    }

    #[test]
    fn test_queue_split_into_batches() {
        let (mut device, mut queue, mut uploader, releases) = setup(1024);
        let buffers: Vec<_> = (0..3)
            .map(|i| {
                let vertices = vec![Vertex::from_position([i as f32, 0.0, 0.0]); 10];
                VertexBuffer::new(&mut device, &mut uploader, &releases, &format!("Vb{}", i), &vertices).unwrap()
            })
            .collect();

        // 每个 440 字节，512 对齐后两个一批
        assert!(uploader.upload_all_pending(&mut device, &mut queue).unwrap());
        assert_eq!(uploader.batches_submitted(), 2);
        assert!(buffers.iter().all(|b| b.resource().is_ready()));
        assert_eq!(device.read_resource(buffers[2].resource().id()).unwrap()[0..4], 2.0f32.to_ne_bytes());
    }

    #[test]
    fn test_dropped_resource_is_skipped() {
        let (mut device, mut queue, mut uploader, releases) = setup(4096);
        let vb = VertexBuffer::new(&mut device, &mut uploader, &releases, "Gone", &triangle()).unwrap();
        drop(vb);

        assert_eq!(uploader.pending_count(), 0);
        assert!(!uploader.upload_all_pending(&mut device, &mut queue).unwrap());
    }

    #[test]
    fn test_upload_refused_while_frame_recorded() {
        let (mut device, mut queue, mut uploader, releases) = setup(4096);
        let _vb = VertexBuffer::new(&mut device, &mut uploader, &releases, "Late", &triangle()).unwrap();

        queue.reset().unwrap();
        queue.command_list().draw_indexed(3).unwrap();
        assert!(uploader.upload_all_pending(&mut device, &mut queue).is_err());
        assert_eq!(uploader.pending_count(), 1);
    }

    #[test]
    fn test_texture_batch_uploads_only_listed_textures() {
        let (mut device, mut queue, mut uploader, releases) = setup(1 << 20);
        let mut heap =
            DescriptorHeapAllocator::new(&mut device, "Srv", DescriptorHeapKind::CbvSrvUav, 4, true).unwrap();

        let red = ImageData::solid_color(4, 4, [255, 0, 0, 255]).unwrap();
        let texture = Texture::new(&mut device, &mut heap, &mut uploader, &releases, "Red", &red).unwrap();
        let _vb = VertexBuffer::new(&mut device, &mut uploader, &releases, "Later", &triangle()).unwrap();

        assert!(uploader.upload_texture_batch(&mut device, &mut queue, &[&texture]).unwrap());
        assert!(texture.is_ready());
        assert_eq!(uploader.pending_count(), 1);
        assert_eq!(device.read_resource(texture.resource().id()).unwrap(), red.subresources[0]);

        let journal = device.journal();
        let journal = journal.borrow();
        let copies = journal.submissions[0]
            .iter()
            .filter(|c| matches!(c, Command::CopyTextureRegion { .. }))
            .count();
        assert_eq!(copies, 1);
    }

    #[test]
    fn test_staging_released_with_uploader() {
        let (mut device, mut queue, mut uploader, releases) = setup(4096);
        let _vb = VertexBuffer::new(&mut device, &mut uploader, &releases, "Tri", &triangle()).unwrap();
        uploader.upload_all_pending(&mut device, &mut queue).unwrap();

        drop(uploader);
        assert_eq!(releases.len(), 1);
    }
}
