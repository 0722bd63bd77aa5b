//! 无窗口设备
//!
//! 用主机内存模拟 GPU：资源是堆分配，拷贝命令在 `execute` 时直接搬运字节，
//! 提交后立即完成（fence 在 `signal` 时即到达）。屏障会与设备自己跟踪的状态比对，
//! 不一致时提交失败，相当于调试层的校验。
//!
//! 所有提交、呈现、原生对象创建与视图写入都记录在 [`HeadlessJournal`] 中，
//! 测试通过 [`HeadlessDevice::journal`] 取得共享句柄进行检查。

use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::rc::Rc;

use super::device::*;
use crate::core::error::{GraphicsError, Result};
use crate::renderer::command::{Command, SubresourceFootprint};
use crate::renderer::pipeline::PipelineStateDesc;
use crate::renderer::root_signature::RootSignatureDesc;

/// 视图写入记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    RenderTarget,
    DepthStencil { array_slice: Option<u32> },
    ShaderResource(SrvDimension),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewRecord {
    pub kind: ViewKind,
    pub resource: ResourceId,
    pub dest: CpuDescriptor,
}

/// 设备活动日志
#[derive(Debug, Default)]
pub struct HeadlessJournal {
    /// 每次 `execute` 的命令
    pub submissions: Vec<Vec<Command>>,
    pub presents: usize,
    pub root_signatures_created: usize,
    pub pipeline_states_created: usize,
    pub shaders_compiled: usize,
    pub views: Vec<ViewRecord>,
    pub released: Vec<ResourceId>,
    pub heaps_created: Vec<(DescriptorHeapKind, u32)>,
}

impl HeadlessJournal {
    /// 所有提交中的绘制命令
    pub fn draw_calls(&self) -> Vec<&Command> {
        self.submissions
            .iter()
            .flatten()
            .filter(|c| matches!(c, Command::DrawIndexedInstanced { .. }))
            .collect()
    }

    pub fn last_submission(&self) -> Option<&[Command]> {
        self.submissions.last().map(|s| s.as_slice())
    }
}

/// 主机内存分配
struct HostAllocation {
    ptr: NonNull<u8>,
    len: usize,
    liveness: MappingLiveness,
}

impl HostAllocation {
    fn zeroed(len: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len.max(1)].into_boxed_slice();
        let len = boxed.len();
        let raw = Box::into_raw(boxed) as *mut u8;
        Self {
            // SAFETY: Box::into_raw 不会返回空指针
            ptr: unsafe { NonNull::new_unchecked(raw) },
            len,
            liveness: MappingLiveness::new(),
        }
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: 分配在 drop 前有效
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: 同上，且 &mut self 保证没有其他 Rust 引用
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for HostAllocation {
    fn drop(&mut self) {
        // 已分发的映射在内存归还前失效
        self.liveness.revoke();
        // SAFETY: 指针与长度来自 `zeroed` 中的 Box::into_raw
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len)));
        }
    }
}

/// 纹理子资源在主机分配中的位置（紧密排列）
#[derive(Debug, Clone, Copy)]
struct SubresourceLayout {
    offset: usize,
    row_bytes: usize,
    rows: usize,
}

struct HostResource {
    name: String,
    memory: HostAllocation,
    state: ResourceState,
    subresources: Vec<SubresourceLayout>,
}

/// 无窗口渲染设备
pub struct HeadlessDevice {
    next_id: u64,
    resources: HashMap<ResourceId, HostResource>,
    next_heap_base: usize,
    fence_completed: u64,
    swap_chain: Option<SwapChainDesc>,
    back_buffers: Vec<ResourceId>,
    back_buffer_index: usize,
    journal: Rc<RefCell<HeadlessJournal>>,
}

const DESCRIPTOR_INCREMENT: u32 = 32;
const GPU_ADDRESS_STRIDE: u64 = 1 << 32;

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            resources: HashMap::new(),
            next_heap_base: 0x1000,
            fence_completed: 0,
            swap_chain: None,
            back_buffers: Vec::new(),
            back_buffer_index: 0,
            journal: Rc::new(RefCell::new(HeadlessJournal::default())),
        }
    }

    /// 日志的共享句柄，设备移交给 `ResourceManager` 后仍可检查
    pub fn journal(&self) -> Rc<RefCell<HeadlessJournal>> {
        Rc::clone(&self.journal)
    }

    /// 读取资源内容；纹理按子资源紧密排列
    pub fn read_resource(&self, id: ResourceId) -> Option<Vec<u8>> {
        self.resources.get(&id).map(|r| r.memory.bytes().to_vec())
    }

    /// 设备跟踪的资源状态
    pub fn resource_state(&self, id: ResourceId) -> Option<ResourceState> {
        self.resources.get(&id).map(|r| r.state)
    }

    pub fn live_resource_count(&self) -> usize {
        self.resources.len()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert(&mut self, name: &str, len: usize, state: ResourceState, subresources: Vec<SubresourceLayout>) -> ResourceId {
        let id = ResourceId(self.allocate_id());
        self.resources.insert(
            id,
            HostResource {
                name: name.to_string(),
                memory: HostAllocation::zeroed(len),
                state,
                subresources,
            },
        );
        id
    }

    fn resource(&self, id: ResourceId) -> Result<&HostResource> {
        self.resources.get(&id).ok_or_else(|| {
            GraphicsError::CommandExecution(format!("Unknown resource {:?}", id)).into()
        })
    }

    fn resource_mut(&mut self, id: ResourceId) -> Result<&mut HostResource> {
        self.resources.get_mut(&id).ok_or_else(|| {
            GraphicsError::CommandExecution(format!("Unknown resource {:?}", id)).into()
        })
    }

    fn check_view_target(&self, resource: ResourceId) -> Result<()> {
        self.resource(resource).map(|_| ())
    }

    fn copy_buffer(&mut self, dst: ResourceId, dst_offset: u64, src: ResourceId, src_offset: u64, size: u64) -> Result<()> {
        let bytes = {
            let src = self.resource(src)?.memory.bytes();
            let start = src_offset as usize;
            src.get(start..start + size as usize)
                .ok_or_else(|| GraphicsError::CommandExecution("Copy source out of range".to_string()))?
                .to_vec()
        };
        let dst = self.resource_mut(dst)?;
        let start = dst_offset as usize;
        dst.memory
            .bytes_mut()
            .get_mut(start..start + bytes.len())
            .ok_or_else(|| GraphicsError::CommandExecution("Copy destination out of range".to_string()))?
            .copy_from_slice(&bytes);
        Ok(())
    }

    fn copy_texture(&mut self, dst: ResourceId, subresource: u32, src: ResourceId, footprint: &SubresourceFootprint) -> Result<()> {
        let layout = *self
            .resource(dst)?
            .subresources
            .get(subresource as usize)
            .ok_or_else(|| GraphicsError::CommandExecution(format!("Subresource {} out of range", subresource)))?;

        let mut packed = Vec::with_capacity(layout.row_bytes * layout.rows);
        {
            let src = self.resource(src)?.memory.bytes();
            for row in 0..layout.rows.min(footprint.height as usize) {
                let start = footprint.offset as usize + row * footprint.row_pitch as usize;
                let line = src
                    .get(start..start + layout.row_bytes)
                    .ok_or_else(|| GraphicsError::CommandExecution("Texture copy source out of range".to_string()))?;
                packed.extend_from_slice(line);
            }
        }

        let dst = self.resource_mut(dst)?;
        dst.memory.bytes_mut()[layout.offset..layout.offset + packed.len()].copy_from_slice(&packed);
        Ok(())
    }

    fn apply(&mut self, command: &Command) -> Result<()> {
        match command {
            Command::ResourceBarrier(transition) => {
                let resource = self.resource_mut(transition.resource)?;
                if resource.state != transition.before {
                    return Err(GraphicsError::CommandExecution(format!(
                        "Barrier on '{}' expects {:?} but the resource is in {:?}",
                        resource.name, transition.before, resource.state
                    ))
                    .into());
                }
                resource.state = transition.after;
            }
            Command::CopyBufferRegion { dst, dst_offset, src, src_offset, size } => {
                self.copy_buffer(*dst, *dst_offset, *src, *src_offset, *size)?;
            }
            Command::CopyTextureRegion { dst, subresource, src, footprint } => {
                self.copy_texture(*dst, *subresource, *src, footprint)?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderDevice for HeadlessDevice {
    fn name(&self) -> &str {
        "Headless"
    }

    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapInfo> {
        let cpu_base = self.next_heap_base;
        self.next_heap_base += (capacity as usize + 1) * DESCRIPTOR_INCREMENT as usize;
        let native = NativeHeapId(self.allocate_id());
        self.journal.borrow_mut().heaps_created.push((kind, capacity));

        Ok(DescriptorHeapInfo {
            native,
            cpu_base,
            gpu_base: shader_visible.then_some(cpu_base as u64 | (1 << 48)),
            increment: DESCRIPTOR_INCREMENT,
        })
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<NativeResource> {
        if desc.size == 0 {
            return Err(GraphicsError::ResourceCreationFailure(format!(
                "Buffer '{}' has zero size",
                desc.name
            ))
            .into());
        }
        let id = self.insert(&desc.name, desc.size as usize, desc.initial_state, Vec::new());
        Ok(NativeResource {
            id,
            gpu_address: id.0 * GPU_ADDRESS_STRIDE,
        })
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<NativeResource> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 || desc.array_size == 0 {
            return Err(GraphicsError::ResourceCreationFailure(format!(
                "Texture '{}' has an empty extent",
                desc.name
            ))
            .into());
        }

        let bpp = desc.format.bytes_per_pixel() as usize;
        let mut subresources = Vec::with_capacity(desc.subresource_count() as usize);
        let mut offset = 0usize;
        for _slice in 0..desc.array_size {
            for mip in 0..desc.mip_levels {
                let width = (desc.width >> mip).max(1) as usize;
                let rows = (desc.height >> mip).max(1) as usize;
                subresources.push(SubresourceLayout {
                    offset,
                    row_bytes: width * bpp,
                    rows,
                });
                offset += width * bpp * rows;
            }
        }

        let id = self.insert(&desc.name, offset, desc.initial_state, subresources);
        Ok(NativeResource { id, gpu_address: 0 })
    }

    fn map(&mut self, resource: ResourceId) -> Result<MappedRegion> {
        let memory = &self.resource(resource)?.memory;
        // SAFETY: HostAllocation 在归还内存前调用 revoke
        Ok(unsafe { MappedRegion::new(memory.ptr, memory.len, memory.liveness.clone()) })
    }

    fn create_render_target_view(&mut self, resource: ResourceId, dest: CpuDescriptor) -> Result<()> {
        self.check_view_target(resource)?;
        self.journal.borrow_mut().views.push(ViewRecord {
            kind: ViewKind::RenderTarget,
            resource,
            dest,
        });
        Ok(())
    }

    fn create_depth_stencil_view(
        &mut self,
        resource: ResourceId,
        _format: Format,
        array_slice: Option<u32>,
        dest: CpuDescriptor,
    ) -> Result<()> {
        self.check_view_target(resource)?;
        self.journal.borrow_mut().views.push(ViewRecord {
            kind: ViewKind::DepthStencil { array_slice },
            resource,
            dest,
        });
        Ok(())
    }

    fn create_shader_resource_view(
        &mut self,
        resource: ResourceId,
        desc: &SrvDesc,
        dest: CpuDescriptor,
    ) -> Result<()> {
        self.check_view_target(resource)?;
        self.journal.borrow_mut().views.push(ViewRecord {
            kind: ViewKind::ShaderResource(desc.dimension),
            resource,
            dest,
        });
        Ok(())
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> Result<RootSignatureId> {
        if desc.parameters.is_empty() {
            return Err(GraphicsError::ResourceCreationFailure(
                "Root signature has no parameters".to_string(),
            )
            .into());
        }
        self.journal.borrow_mut().root_signatures_created += 1;
        Ok(RootSignatureId(self.allocate_id()))
    }

    fn create_pipeline_state(&mut self, _desc: &PipelineStateDesc) -> Result<PipelineStateId> {
        self.journal.borrow_mut().pipeline_states_created += 1;
        Ok(PipelineStateId(self.allocate_id()))
    }

    fn compile_shader(&mut self, source: &str, entry: &str, target: &str) -> Result<Vec<u8>> {
        if !source.contains(entry) {
            return Err(GraphicsError::ShaderCompilation(format!(
                "Entry point '{}' not found",
                entry
            ))
            .into());
        }
        self.journal.borrow_mut().shaders_compiled += 1;

        // 伪字节码：目标 + 入口 + 源码长度，保证不同着色器互不相等
        let mut blob = format!("DXBC:{}:{}:", target, entry).into_bytes();
        blob.extend_from_slice(&(source.len() as u64).to_le_bytes());
        Ok(blob)
    }

    fn execute(&mut self, commands: &[Command]) -> Result<()> {
        for command in commands {
            self.apply(command)?;
        }
        self.journal.borrow_mut().submissions.push(commands.to_vec());
        Ok(())
    }

    fn signal(&mut self, value: u64) -> Result<()> {
        self.fence_completed = self.fence_completed.max(value);
        Ok(())
    }

    fn completed_fence_value(&self) -> u64 {
        self.fence_completed
    }

    fn wait_for_fence(&mut self, value: u64) -> Result<()> {
        if value > self.fence_completed {
            return Err(GraphicsError::CommandExecution(format!(
                "Waiting on fence {} that was never signaled (completed {})",
                value, self.fence_completed
            ))
            .into());
        }
        Ok(())
    }

    fn create_swap_chain(&mut self, desc: &SwapChainDesc) -> Result<Vec<NativeResource>> {
        if desc.buffer_count == 0 {
            return Err(GraphicsError::SwapchainError("Swap chain needs at least one buffer".to_string()).into());
        }
        self.swap_chain = Some(*desc);
        self.back_buffer_index = 0;

        let bpp = desc.format.bytes_per_pixel() as usize;
        let len = desc.width as usize * desc.height as usize * bpp;
        let back_buffers: Vec<ResourceId> = (0..desc.buffer_count)
            .map(|i| {
                let layout = SubresourceLayout {
                    offset: 0,
                    row_bytes: desc.width as usize * bpp,
                    rows: desc.height as usize,
                };
                self.insert(&format!("BackBuffer{}", i), len, ResourceState::Present, vec![layout])
            })
            .collect();
        self.back_buffers = back_buffers;

        Ok(self
            .back_buffers
            .iter()
            .map(|&id| NativeResource { id, gpu_address: 0 })
            .collect())
    }

    fn resize_swap_chain(&mut self, width: u32, height: u32) -> Result<Vec<NativeResource>> {
        let mut desc = self
            .swap_chain
            .ok_or_else(|| GraphicsError::SwapchainError("Resize before swap chain creation".to_string()))?;

        if let Some(id) = self.back_buffers.iter().find(|id| self.resources.contains_key(*id)) {
            return Err(GraphicsError::SwapchainError(format!(
                "Back buffer {:?} still referenced during resize",
                id
            ))
            .into());
        }

        desc.width = width;
        desc.height = height;
        self.create_swap_chain(&desc)
    }

    fn present(&mut self, _sync_interval: u32) -> Result<()> {
        let count = self.back_buffers.len();
        if count == 0 {
            return Err(GraphicsError::SwapchainError("Present without a swap chain".to_string()).into());
        }

        let current = self.back_buffers[self.back_buffer_index];
        let state = self.resource(current)?.state;
        if state != ResourceState::Present {
            return Err(GraphicsError::SwapchainError(format!(
                "Back buffer presented in state {:?}",
                state
            ))
            .into());
        }

        self.back_buffer_index = (self.back_buffer_index + 1) % count;
        self.journal.borrow_mut().presents += 1;
        Ok(())
    }

    fn current_back_buffer_index(&self) -> usize {
        self.back_buffer_index
    }

    fn release(&mut self, resource: ResourceId) {
        if self.resources.remove(&resource).is_some() {
            self.journal.borrow_mut().released.push(resource);
        }
    }
}
