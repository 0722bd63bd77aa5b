//! 描述符堆管理
//!
//! 每个描述符堆是一个固定容量的槽位池。句柄是 (堆 id, 偏移, 代) 三元组，
//! 偏移本身不能跨堆作为标识。
//!
//! # 槽位生命周期
//!
//! ```text
//! Free --allocate--> Allocated --free--> Retired --advance_generation--> Free
//! ```
//!
//! 释放的槽位先进入 Retired，直到帧循环确认 GPU 已完成该帧的工作并推进代数，
//! 才会重新分配。这保证了 GPU 仍可能读取的描述符不会被覆盖。
//!
//! # 堆类型
//!
//! - **RTV**：渲染目标视图，仅 CPU 可见
//! - **DSV**：深度模板视图，仅 CPU 可见
//! - **CBV/SRV/UAV**：渲染通道堆，着色器可见，绑定为描述符表

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::core::config::RendererConfig;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::device::{CpuDescriptor, DescriptorHeapKind, GpuDescriptor, NativeHeapId, RenderDevice};

static NEXT_HEAP_ID: AtomicU32 = AtomicU32::new(1);

/// 进程内唯一的堆标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(u32);

/// 单个描述符槽位的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHandle {
    heap: HeapId,
    offset: u32,
    generation: u64,
    cpu: CpuDescriptor,
    gpu: Option<GpuDescriptor>,
}

impl DescriptorHandle {
    pub fn heap(&self) -> HeapId {
        self.heap
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn cpu(&self) -> CpuDescriptor {
        self.cpu
    }

    /// 着色器可见堆的 GPU 地址
    pub fn gpu(&self) -> Option<GpuDescriptor> {
        self.gpu
    }
}

/// 连续的多个槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    heap: HeapId,
    offset: u32,
    count: u32,
    generation: u64,
    cpu_base: CpuDescriptor,
    gpu_base: Option<GpuDescriptor>,
    increment: u32,
}

impl DescriptorRange {
    pub fn heap(&self) -> HeapId {
        self.heap
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// 第 `index` 个槽位的 CPU 地址
    pub fn cpu(&self, index: u32) -> CpuDescriptor {
        CpuDescriptor(self.cpu_base.0 + (index * self.increment) as usize)
    }

    /// 表的起始 GPU 地址
    pub fn gpu_base(&self) -> Option<GpuDescriptor> {
        self.gpu_base
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Allocated { generation: u64 },
    Retired,
}

/// 描述符堆分配器
#[derive(Debug)]
pub struct DescriptorHeapAllocator {
    id: HeapId,
    name: String,
    kind: DescriptorHeapKind,
    native: NativeHeapId,
    cpu_base: usize,
    gpu_base: Option<u64>,
    increment: u32,
    slots: Vec<Slot>,
    free: BTreeSet<u32>,
    retired: Vec<u32>,
    generation: u64,
}

impl DescriptorHeapAllocator {
    /// 在设备上创建堆
    pub fn new(
        device: &mut dyn RenderDevice,
        name: impl Into<String>,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<Self> {
        let name = name.into();
        let info = device.create_descriptor_heap(kind, capacity, shader_visible)?;

        tracing::debug!(
            heap = %name,
            kind = kind.name(),
            capacity,
            shader_visible,
            "Descriptor heap created"
        );

        Ok(Self {
            id: HeapId(NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed)),
            name,
            kind,
            native: info.native,
            cpu_base: info.cpu_base,
            gpu_base: info.gpu_base,
            increment: info.increment,
            slots: vec![Slot::Free; capacity as usize],
            free: (0..capacity).collect(),
            retired: Vec::new(),
            generation: 0,
        })
    }

    pub fn id(&self) -> HeapId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn native(&self) -> NativeHeapId {
        self.native
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// 当前处于 Allocated 的槽位数
    pub fn allocated_count(&self) -> u32 {
        self.capacity() - self.free.len() as u32 - self.retired.len() as u32
    }

    /// 可立即分配的槽位数
    pub fn available(&self) -> u32 {
        self.free.len() as u32
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn cpu_at(&self, offset: u32) -> CpuDescriptor {
        CpuDescriptor(self.cpu_base + (offset * self.increment) as usize)
    }

    fn gpu_at(&self, offset: u32) -> Option<GpuDescriptor> {
        self.gpu_base.map(|base| GpuDescriptor(base + (offset * self.increment) as u64))
    }

    fn out_of_descriptors(&self, requested: u32) -> GraphicsError {
        GraphicsError::OutOfDescriptors {
            heap: self.name.clone(),
            requested,
            available: self.available(),
        }
    }

    /// 分配一个槽位，取最小的空闲偏移
    pub fn allocate(&mut self) -> Result<DescriptorHandle> {
        let offset = self
            .free
            .pop_first()
            .ok_or_else(|| self.out_of_descriptors(1))?;
        self.slots[offset as usize] = Slot::Allocated {
            generation: self.generation,
        };

        Ok(DescriptorHandle {
            heap: self.id,
            offset,
            generation: self.generation,
            cpu: self.cpu_at(offset),
            gpu: self.gpu_at(offset),
        })
    }

    /// 原子地分配 `count` 个连续槽位；失败时不改变任何状态
    pub fn allocate_contiguous(&mut self, count: u32) -> Result<DescriptorRange> {
        if count == 0 {
            return Err(GraphicsError::InvalidDescriptorHandle(
                "Contiguous allocation of zero descriptors".to_string(),
            )
            .into());
        }

        let mut run_start = None;
        let mut run_len = 0;
        let mut previous: Option<u32> = None;
        for &offset in &self.free {
            match previous {
                Some(p) if p + 1 == offset => run_len += 1,
                _ => {
                    run_start = Some(offset);
                    run_len = 1;
                }
            }
            previous = Some(offset);
            if run_len == count {
                break;
            }
        }

        let start = match run_start {
            Some(start) if run_len == count => start,
            _ => return Err(self.out_of_descriptors(count).into()),
        };

        for offset in start..start + count {
            self.free.remove(&offset);
            self.slots[offset as usize] = Slot::Allocated {
                generation: self.generation,
            };
        }

        Ok(DescriptorRange {
            heap: self.id,
            offset: start,
            count,
            generation: self.generation,
            cpu_base: self.cpu_at(start),
            gpu_base: self.gpu_at(start),
            increment: self.increment,
        })
    }

    fn validate_slot(&self, heap: HeapId, offset: u32, generation: u64) -> Result<()> {
        if heap != self.id {
            return Err(GraphicsError::InvalidDescriptorHandle(format!(
                "Handle from heap {:?} freed into '{}'",
                heap, self.name
            ))
            .into());
        }
        match self.slots.get(offset as usize) {
            Some(Slot::Allocated { generation: g }) if *g == generation => Ok(()),
            Some(_) => Err(GraphicsError::InvalidDescriptorHandle(format!(
                "Slot {} of '{}' is not allocated by this handle",
                offset, self.name
            ))
            .into()),
            None => Err(GraphicsError::InvalidDescriptorHandle(format!(
                "Offset {} outside '{}'",
                offset, self.name
            ))
            .into()),
        }
    }

    /// 释放槽位；调用者保证 GPU 不再访问它
    pub fn free(&mut self, handle: DescriptorHandle) -> Result<()> {
        self.validate_slot(handle.heap, handle.offset, handle.generation)?;
        self.slots[handle.offset as usize] = Slot::Retired;
        self.retired.push(handle.offset);
        Ok(())
    }

    /// 释放整个连续区间
    pub fn free_range(&mut self, range: DescriptorRange) -> Result<()> {
        for offset in range.offset..range.offset + range.count {
            self.validate_slot(range.heap, offset, range.generation)?;
        }
        for offset in range.offset..range.offset + range.count {
            self.slots[offset as usize] = Slot::Retired;
            self.retired.push(offset);
        }
        Ok(())
    }

    /// 推进复用代数：此前释放的槽位重新可用
    ///
    /// 只能在该帧的 GPU 工作确认完成后调用。
    pub fn advance_generation(&mut self) {
        self.generation += 1;
        for offset in self.retired.drain(..) {
            self.slots[offset as usize] = Slot::Free;
            self.free.insert(offset);
        }
    }

    /// 堆使用统计
    pub fn stats(&self) -> DescriptorHeapStats {
        DescriptorHeapStats::new(self.kind, self.capacity(), self.allocated_count())
    }
}

/// 描述符堆统计信息
#[derive(Debug, Clone)]
pub struct DescriptorHeapStats {
    pub kind: DescriptorHeapKind,
    pub capacity: u32,
    pub used: u32,
    pub usage_ratio: f32,
}

impl DescriptorHeapStats {
    pub fn new(kind: DescriptorHeapKind, capacity: u32, used: u32) -> Self {
        let usage_ratio = if capacity > 0 {
            used as f32 / capacity as f32
        } else {
            0.0
        };
        Self {
            kind,
            capacity,
            used,
            usage_ratio,
        }
    }
}

/// 引擎的三个描述符堆
#[derive(Debug)]
pub struct DescriptorHeapManager {
    pub rtv: DescriptorHeapAllocator,
    pub dsv: DescriptorHeapAllocator,
    /// 着色器可见的渲染通道堆
    pub render_pass: DescriptorHeapAllocator,
}

impl DescriptorHeapManager {
    pub fn new(device: &mut dyn RenderDevice, config: &RendererConfig) -> Result<Self> {
        Ok(Self {
            rtv: DescriptorHeapAllocator::new(device, "RtvHeap", DescriptorHeapKind::Rtv, config.rtv_heap_size, false)?,
            dsv: DescriptorHeapAllocator::new(device, "DsvHeap", DescriptorHeapKind::Dsv, config.dsv_heap_size, false)?,
            render_pass: DescriptorHeapAllocator::new(
                device,
                "RenderPassHeap",
                DescriptorHeapKind::CbvSrvUav,
                config.render_pass_heap_size,
                true,
            )?,
        })
    }

    /// 按句柄所属的堆找到分配器
    pub fn heap_mut(&mut self, heap: HeapId) -> Result<&mut DescriptorHeapAllocator> {
        if heap == self.rtv.id() {
            Ok(&mut self.rtv)
        } else if heap == self.dsv.id() {
            Ok(&mut self.dsv)
        } else if heap == self.render_pass.id() {
            Ok(&mut self.render_pass)
        } else {
            Err(GraphicsError::InvalidDescriptorHandle(format!("Unknown heap {:?}", heap)).into())
        }
    }

    pub fn free(&mut self, handle: DescriptorHandle) -> Result<()> {
        self.heap_mut(handle.heap())?.free(handle)
    }

    pub fn free_range(&mut self, range: DescriptorRange) -> Result<()> {
        self.heap_mut(range.heap())?.free_range(range)
    }

    /// 帧的 GPU 工作完成后调用
    pub fn advance_generation(&mut self) {
        self.rtv.advance_generation();
        self.dsv.advance_generation();
        self.render_pass.advance_generation();
    }

    pub fn all_stats(&self) -> Vec<DescriptorHeapStats> {
        vec![self.rtv.stats(), self.dsv.stats(), self.render_pass.stats()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessDevice;

    fn heap(capacity: u32, shader_visible: bool) -> DescriptorHeapAllocator {
        let mut device = HeadlessDevice::new();
        DescriptorHeapAllocator::new(&mut device, "Test", DescriptorHeapKind::CbvSrvUav, capacity, shader_visible)
            .unwrap()
    }

    #[test]
    fn test_allocate_until_full() {
        let mut heap = heap(3, false);
        for expected in 0..3 {
            assert_eq!(heap.allocate().unwrap().offset(), expected);
        }
        let err = heap.allocate().unwrap_err();
        assert!(matches!(
            err,
            crate::core::error::EngineError::Graphics(GraphicsError::OutOfDescriptors { requested: 1, available: 0, .. })
        ));
        assert_eq!(heap.allocated_count(), 3);
    }

    #[test]
    fn test_freed_slot_waits_for_generation() {
        let mut heap = heap(2, false);
        let a = heap.allocate().unwrap();
        let _b = heap.allocate().unwrap();

        heap.free(a).unwrap();
        // 同一代内不会复用
        assert!(heap.allocate().is_err());

        heap.advance_generation();
        let c = heap.allocate().unwrap();
        assert_eq!(c.offset(), a.offset());
        assert_ne!(c, a);
    }

    #[test]
    fn test_stale_and_double_free_rejected() {
        let mut heap = heap(2, false);
        let a = heap.allocate().unwrap();
        heap.free(a).unwrap();
        assert!(heap.free(a).is_err());

        heap.advance_generation();
        let _reused = heap.allocate().unwrap();
        // 旧句柄的代数不匹配
        assert!(heap.free(a).is_err());
    }

    #[test]
    fn test_cross_heap_free_rejected() {
        let mut first = heap(2, false);
        let mut second = heap(2, false);
        let handle = first.allocate().unwrap();
        assert!(second.free(handle).is_err());
        assert!(first.free(handle).is_ok());
    }

    #[test]
    fn test_contiguous_allocation_is_atomic() {
        let mut heap = heap(6, true);
        let a = heap.allocate().unwrap(); // 0
        let _b = heap.allocate().unwrap(); // 1
        heap.free(a).unwrap();
        heap.advance_generation();

        // 空闲：0, 2..6；5 个连续不存在
        assert!(heap.allocate_contiguous(5).is_err());
        assert_eq!(heap.available(), 5);

        let range = heap.allocate_contiguous(4).unwrap();
        assert_eq!(range.offset(), 2);
        assert_eq!(range.len(), 4);
        assert!(range.gpu_base().is_some());
        assert_eq!(range.cpu(1).0 - range.cpu(0).0, 32);

        heap.free_range(range).unwrap();
        assert!(heap.free_range(range).is_err());
    }

    #[test]
    fn test_outstanding_never_exceeds_capacity() {
        let mut heap = heap(4, false);
        let mut live = Vec::new();
        for step in 0..40u32 {
            if step % 3 == 2 {
                if let Some(handle) = live.pop() {
                    heap.free(handle).unwrap();
                }
            } else if let Ok(handle) = heap.allocate() {
                live.push(handle);
            }
            if step % 7 == 6 {
                heap.advance_generation();
            }
            assert!(heap.allocated_count() <= heap.capacity());
            assert_eq!(heap.allocated_count() as usize, live.len());
        }
    }

    #[test]
    fn test_manager_routes_by_heap() {
        let mut device = HeadlessDevice::new();
        let config = RendererConfig::default();
        let mut heaps = DescriptorHeapManager::new(&mut device, &config).unwrap();

        let rtv = heaps.rtv.allocate().unwrap();
        assert!(rtv.gpu().is_none());
        let srv = heaps.render_pass.allocate().unwrap();
        assert!(srv.gpu().is_some());

        heaps.free(rtv).unwrap();
        heaps.free(srv).unwrap();
        assert_eq!(heaps.render_pass.allocated_count(), 0);
        assert_eq!(device.journal().borrow().heaps_created.len(), 3);
    }
}
