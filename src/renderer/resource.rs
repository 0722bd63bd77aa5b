//! GPU 资源与状态跟踪
//!
//! [`GpuResource`] 独占一个原生分配，并跟踪它当前的使用状态。状态只能通过
//! [`CommandList::transition`] 改变：记录屏障的同时立即更新跟踪值。
//!
//! 资源销毁时不会立刻释放原生分配，而是放入 [`ReleaseQueue`]，
//! 等下一次 fence 等待确认 GPU 不再使用后再释放。

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::command::{CommandList, Transition};
use super::descriptor::{DescriptorHandle, DescriptorRange};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::device::{NativeResource, ResourceId, ResourceState};

/// 延迟释放项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Resource(ResourceId),
    Descriptor(DescriptorHandle),
    Range(DescriptorRange),
}

/// 延迟释放队列
///
/// 资源、纹理和材质各持有一份克隆，销毁时把自己的分配推入队列。
#[derive(Debug, Clone, Default)]
pub struct ReleaseQueue {
    inner: Rc<RefCell<Vec<Release>>>,
}

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, release: Release) {
        self.inner.borrow_mut().push(release);
    }

    /// 取出所有待释放项
    pub fn drain(&self) -> Vec<Release> {
        std::mem::take(&mut *self.inner.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

/// 资源的可变状态，由资源与上传器共享
#[derive(Debug)]
pub struct ResourceStatus {
    state: Cell<ResourceState>,
    /// 数据是否已经上传完成
    ready: Cell<bool>,
}

impl ResourceStatus {
    pub fn state(&self) -> ResourceState {
        self.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.set(ready);
    }

    /// 不记录屏障直接改写状态；只用于撤销未提交的转换
    pub(crate) fn force_state(&self, state: ResourceState) {
        self.state.set(state);
    }
}

/// 一个 GPU 分配及其使用状态
#[derive(Debug)]
pub struct GpuResource {
    native: NativeResource,
    name: String,
    size: u64,
    status: Rc<ResourceStatus>,
    releases: ReleaseQueue,
}

impl GpuResource {
    /// 接管原生分配
    ///
    /// `ready` 为 false 表示数据还在上传队列中。
    pub fn new(
        native: NativeResource,
        name: impl Into<String>,
        size: u64,
        state: ResourceState,
        ready: bool,
        releases: ReleaseQueue,
    ) -> Self {
        Self {
            native,
            name: name.into(),
            size,
            status: Rc::new(ResourceStatus {
                state: Cell::new(state),
                ready: Cell::new(ready),
            }),
            releases,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.native.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gpu_address(&self) -> u64 {
        self.native.gpu_address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn state(&self) -> ResourceState {
        self.status.state()
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    pub(crate) fn status(&self) -> &ResourceStatus {
        &self.status
    }

    /// 上传队列持有的弱引用
    pub(crate) fn status_weak(&self) -> Weak<ResourceStatus> {
        Rc::downgrade(&self.status)
    }

    /// 绘制前检查：数据已上传且处于 `expected` 状态
    pub fn ensure_usable(&self, expected: ResourceState) -> Result<()> {
        if !self.is_ready() {
            return Err(GraphicsError::ResourceNotReady(format!("'{}' has not been uploaded", self.name)).into());
        }
        if self.state() != expected {
            return Err(GraphicsError::ResourceNotReady(format!(
                "'{}' is in {:?}, draw requires {:?}",
                self.name,
                self.state(),
                expected
            ))
            .into());
        }
        Ok(())
    }
}

impl Drop for GpuResource {
    fn drop(&mut self) {
        self.releases.push(Release::Resource(self.native.id));
    }
}

impl CommandList {
    /// 记录状态转换
    ///
    /// `before` 必须与资源当前跟踪的状态一致，否则返回 `InvalidStateTransition`，
    /// 不记录任何命令。
    pub fn transition(&mut self, resource: &GpuResource, before: ResourceState, after: ResourceState) -> Result<()> {
        self.transition_status(resource.id(), resource.name(), resource.status(), before, after)
    }

    pub(crate) fn transition_status(
        &mut self,
        id: ResourceId,
        name: &str,
        status: &ResourceStatus,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        let actual = status.state();
        if actual != before {
            tracing::error!(
                resource = name,
                expected = ?before,
                actual = ?actual,
                "Invalid resource state transition"
            );
            return Err(GraphicsError::InvalidStateTransition {
                resource: name.to_string(),
                expected: format!("{:?}", before),
                actual: format!("{:?}", actual),
            }
            .into());
        }

        self.barrier(Transition {
            resource: id,
            before,
            after,
        })?;
        status.state.set(after);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EngineError;
    use crate::renderer::command::Command;

    fn resource(releases: &ReleaseQueue) -> GpuResource {
        GpuResource::new(
            NativeResource {
                id: ResourceId(7),
                gpu_address: 0x7000,
            },
            "BackBuffer0",
            64,
            ResourceState::Present,
            true,
            releases.clone(),
        )
    }

    #[test]
    fn test_transition_records_barrier_and_updates_state() {
        let releases = ReleaseQueue::new();
        let back_buffer = resource(&releases);
        let mut list = CommandList::new();
        list.reset().unwrap();

        list.transition(&back_buffer, ResourceState::Present, ResourceState::RenderTarget)
            .unwrap();
        assert_eq!(back_buffer.state(), ResourceState::RenderTarget);
        assert_eq!(
            list.commands(),
            &[Command::ResourceBarrier(Transition {
                resource: ResourceId(7),
                before: ResourceState::Present,
                after: ResourceState::RenderTarget,
            })]
        );
    }

    #[test]
    fn test_mismatched_transition_is_rejected() {
        let releases = ReleaseQueue::new();
        let back_buffer = resource(&releases);
        let mut list = CommandList::new();
        list.reset().unwrap();

        let err = list
            .transition(&back_buffer, ResourceState::RenderTarget, ResourceState::Present)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Graphics(GraphicsError::InvalidStateTransition { .. })
        ));
        assert!(list.is_empty());
        assert_eq!(back_buffer.state(), ResourceState::Present);
    }

    #[test]
    fn test_drop_defers_release() {
        let releases = ReleaseQueue::new();
        drop(resource(&releases));
        assert_eq!(releases.drain(), vec![Release::Resource(ResourceId(7))]);
        assert!(releases.is_empty());
    }

    #[test]
    fn test_ensure_usable() {
        let releases = ReleaseQueue::new();
        let buffer = GpuResource::new(
            NativeResource {
                id: ResourceId(1),
                gpu_address: 0,
            },
            "Vertices",
            16,
            ResourceState::CopyDest,
            false,
            releases,
        );
        assert!(buffer.ensure_usable(ResourceState::VertexAndConstantBuffer).is_err());

        buffer.status().set_ready(true);
        buffer.status().force_state(ResourceState::VertexAndConstantBuffer);
        assert!(buffer.ensure_usable(ResourceState::VertexAndConstantBuffer).is_ok());
    }
}
