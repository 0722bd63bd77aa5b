//! 命令记录
//!
//! 命令以 [`Command`] 值记录到 [`CommandList`]，关闭后交给设备执行。
//! 列表遵循 D3D12 的生命周期：`reset` 后进入记录状态，`close` 后才能提交；
//! 新建的列表处于关闭状态。

use crate::core::error::{EngineError, GraphicsError, Result};
use crate::gfx::device::{
    CpuDescriptor, Format, GpuDescriptor, NativeHeapId, PipelineStateId, ResourceId,
    ResourceState, RootSignatureId,
};

/// 视口
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub top_left_x: f32,
    pub top_left_y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// 裁剪矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// 图元拓扑
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
}

/// 一次状态转换：屏障的值表示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub resource: ResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    pub address: u64,
    pub size: u32,
    pub stride: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferView {
    pub address: u64,
    pub size: u32,
    pub format: Format,
}

/// 暂存缓冲区中一个子资源的布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceFootprint {
    /// 相对暂存缓冲区起点的偏移（512 对齐）
    pub offset: u64,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    /// 行跨度（256 对齐）
    pub row_pitch: u32,
}

/// 记录的 GPU 命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ResourceBarrier(Transition),
    SetViewport(Viewport),
    SetScissorRect(ScissorRect),
    SetRenderTargets {
        rtv: CpuDescriptor,
        dsv: Option<CpuDescriptor>,
    },
    ClearRenderTargetView {
        rtv: CpuDescriptor,
        color: [f32; 4],
    },
    ClearDepthStencilView {
        dsv: CpuDescriptor,
        depth: f32,
        stencil: u8,
    },
    SetPrimitiveTopology(PrimitiveTopology),
    SetDescriptorHeaps(NativeHeapId),
    SetGraphicsRootSignature(RootSignatureId),
    SetGraphicsRootConstantBufferView {
        root_index: u32,
        address: u64,
    },
    SetGraphicsRootDescriptorTable {
        root_index: u32,
        base: GpuDescriptor,
    },
    SetPipelineState(PipelineStateId),
    SetVertexBuffers {
        start_slot: u32,
        views: Vec<VertexBufferView>,
    },
    SetIndexBuffer(IndexBufferView),
    DrawIndexedInstanced {
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    },
    CopyBufferRegion {
        dst: ResourceId,
        dst_offset: u64,
        src: ResourceId,
        src_offset: u64,
        size: u64,
    },
    CopyTextureRegion {
        dst: ResourceId,
        subresource: u32,
        src: ResourceId,
        footprint: SubresourceFootprint,
    },
}

/// 命令列表状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    Recording,
    Closed,
}

/// 直接命令列表
#[derive(Debug)]
pub struct CommandList {
    state: CommandListState,
    commands: Vec<Command>,
}

fn not_recording(op: &str) -> EngineError {
    GraphicsError::CommandExecution(format!("{} on a closed command list", op)).into()
}

impl CommandList {
    pub fn new() -> Self {
        Self {
            state: CommandListState::Closed,
            commands: Vec::new(),
        }
    }

    /// 清空并进入记录状态
    ///
    /// 只能在关闭状态下调用，对应分配器与列表的 `Reset`。
    pub fn reset(&mut self) -> Result<()> {
        if self.state == CommandListState::Recording {
            return Err(GraphicsError::CommandExecution(
                "Command list reset while still recording".to_string(),
            )
            .into());
        }
        self.commands.clear();
        self.state = CommandListState::Recording;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if self.state != CommandListState::Recording {
            return Err(not_recording("close"));
        }
        self.state = CommandListState::Closed;
        Ok(())
    }

    /// 丢弃已记录的命令并关闭
    pub fn discard(&mut self) {
        self.commands.clear();
        self.state = CommandListState::Closed;
    }

    pub fn state(&self) -> CommandListState {
        self.state
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.state == CommandListState::Recording
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// 记录一条命令
    pub fn record(&mut self, command: Command) -> Result<()> {
        if !self.is_recording() {
            return Err(not_recording("record"));
        }
        self.commands.push(command);
        Ok(())
    }

    pub fn barrier(&mut self, transition: Transition) -> Result<()> {
        self.record(Command::ResourceBarrier(transition))
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.record(Command::SetViewport(viewport))
    }

    pub fn set_scissor_rect(&mut self, rect: ScissorRect) -> Result<()> {
        self.record(Command::SetScissorRect(rect))
    }

    pub fn set_render_targets(&mut self, rtv: CpuDescriptor, dsv: Option<CpuDescriptor>) -> Result<()> {
        self.record(Command::SetRenderTargets { rtv, dsv })
    }

    pub fn clear_render_target(&mut self, rtv: CpuDescriptor, color: [f32; 4]) -> Result<()> {
        self.record(Command::ClearRenderTargetView { rtv, color })
    }

    pub fn clear_depth_stencil(&mut self, dsv: CpuDescriptor, depth: f32, stencil: u8) -> Result<()> {
        self.record(Command::ClearDepthStencilView { dsv, depth, stencil })
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) -> Result<()> {
        self.record(Command::SetPrimitiveTopology(topology))
    }

    pub fn set_descriptor_heap(&mut self, heap: NativeHeapId) -> Result<()> {
        self.record(Command::SetDescriptorHeaps(heap))
    }

    pub fn set_root_signature(&mut self, root_signature: RootSignatureId) -> Result<()> {
        self.record(Command::SetGraphicsRootSignature(root_signature))
    }

    pub fn set_root_cbv(&mut self, root_index: u32, address: u64) -> Result<()> {
        self.record(Command::SetGraphicsRootConstantBufferView { root_index, address })
    }

    pub fn set_root_descriptor_table(&mut self, root_index: u32, base: GpuDescriptor) -> Result<()> {
        self.record(Command::SetGraphicsRootDescriptorTable { root_index, base })
    }

    pub fn set_pipeline_state(&mut self, pipeline: PipelineStateId) -> Result<()> {
        self.record(Command::SetPipelineState(pipeline))
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, view: VertexBufferView) -> Result<()> {
        self.record(Command::SetVertexBuffers {
            start_slot: slot,
            views: vec![view],
        })
    }

    pub fn set_index_buffer(&mut self, view: IndexBufferView) -> Result<()> {
        self.record(Command::SetIndexBuffer(view))
    }

    pub fn draw_indexed(&mut self, index_count: u32) -> Result<()> {
        self.record(Command::DrawIndexedInstanced {
            index_count,
            instance_count: 1,
            start_index: 0,
            base_vertex: 0,
            start_instance: 0,
        })
    }

    pub fn copy_buffer(&mut self, dst: ResourceId, dst_offset: u64, src: ResourceId, src_offset: u64, size: u64) -> Result<()> {
        self.record(Command::CopyBufferRegion {
            dst,
            dst_offset,
            src,
            src_offset,
            size,
        })
    }

    pub fn copy_texture(
        &mut self,
        dst: ResourceId,
        subresource: u32,
        src: ResourceId,
        footprint: SubresourceFootprint,
    ) -> Result<()> {
        self.record(Command::CopyTextureRegion {
            dst,
            subresource,
            src,
            footprint,
        })
    }
}

impl Default for CommandList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_list_state_machine() {
        let mut list = CommandList::new();
        assert_eq!(list.state(), CommandListState::Closed);

        // 关闭状态下不能记录
        assert!(list.set_primitive_topology(PrimitiveTopology::TriangleList).is_err());

        list.reset().unwrap();
        assert!(list.is_recording());
        // 记录中不能重复 reset
        assert!(list.reset().is_err());

        list.set_primitive_topology(PrimitiveTopology::TriangleList).unwrap();
        list.draw_indexed(36).unwrap();
        assert_eq!(list.commands().len(), 2);

        list.close().unwrap();
        assert!(list.close().is_err());

        list.reset().unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_discard_drops_commands() {
        let mut list = CommandList::new();
        list.reset().unwrap();
        list.draw_indexed(3).unwrap();

        list.discard();
        assert!(list.is_empty());
        assert_eq!(list.state(), CommandListState::Closed);
    }
}
