//! 直接命令队列管理
//!
//! 引擎只有一个直接队列和一个命令列表（及其分配器）。帧与上传轮流使用同一个列表：
//! 每次提交后 CPU 阻塞等待 fence，再重置列表，因此分配器永远不会在 GPU 使用中被重置。

use super::command::CommandList;
use super::sync::{FenceTracker, FenceValue};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::device::RenderDevice;

/// 命令队列管理器
#[derive(Debug, Default)]
pub struct CommandQueueManager {
    list: CommandList,
    fence: FenceTracker,
    submissions: u64,
}

impl CommandQueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command_list(&mut self) -> &mut CommandList {
        &mut self.list
    }

    pub fn list(&self) -> &CommandList {
        &self.list
    }

    /// 重置分配器与列表，开始新的记录
    ///
    /// 前一次提交必须已经完成。
    pub fn reset(&mut self) -> Result<()> {
        if self.fence.has_pending_work() {
            return Err(GraphicsError::CommandExecution(format!(
                "Command allocator reset while fence {} is still pending",
                self.fence.current_value().value()
            ))
            .into());
        }
        self.list.reset()
    }

    /// 关闭并提交列表，返回本次提交的 fence 值
    pub fn execute_command_list(&mut self, device: &mut dyn RenderDevice) -> Result<FenceValue> {
        self.list.close()?;
        device.execute(self.list.commands())?;

        let value = self.fence.next_value();
        device.signal(value.value())?;
        self.submissions += 1;

        tracing::trace!(fence = value.value(), commands = self.list.commands().len(), "Command list executed");
        Ok(value)
    }

    /// 阻塞直到 `value` 完成
    pub fn wait_for_fence_cpu_blocking(&mut self, device: &mut dyn RenderDevice, value: FenceValue) -> Result<()> {
        if !self.fence.is_completed(value) {
            if device.completed_fence_value() < value.value() {
                device.wait_for_fence(value.value())?;
            }
            self.fence.update_completed_value(FenceValue::new(device.completed_fence_value().max(value.value())));
        }
        Ok(())
    }

    /// 单独发出一个 fence 并等待，使队列空闲
    pub fn flush(&mut self, device: &mut dyn RenderDevice) -> Result<()> {
        let value = self.fence.next_value();
        device.signal(value.value())?;
        self.wait_for_fence_cpu_blocking(device, value)
    }

    /// 丢弃未提交的记录
    pub fn discard(&mut self) {
        if !self.list.is_empty() {
            tracing::debug!(commands = self.list.commands().len(), "Discarding recorded commands");
        }
        self.list.discard();
    }

    pub fn last_submitted(&self) -> FenceValue {
        self.fence.current_value()
    }

    pub fn completed(&self) -> FenceValue {
        self.fence.completed_value()
    }

    /// 已提交的命令列表次数
    pub fn submission_count(&self) -> u64 {
        self.submissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessDevice;

    #[test]
    fn test_execute_returns_increasing_fence_values() {
        let mut device = HeadlessDevice::new();
        let mut queue = CommandQueueManager::new();

        queue.reset().unwrap();
        queue.command_list().draw_indexed(3).unwrap();
        let first = queue.execute_command_list(&mut device).unwrap();
        queue.wait_for_fence_cpu_blocking(&mut device, first).unwrap();

        queue.reset().unwrap();
        let second = queue.execute_command_list(&mut device).unwrap();
        assert!(second > first);
        assert_eq!(queue.submission_count(), 2);
        assert_eq!(device.journal().borrow().submissions.len(), 2);
    }

    #[test]
    fn test_reset_requires_completed_fence() {
        let mut device = HeadlessDevice::new();
        let mut queue = CommandQueueManager::new();

        queue.reset().unwrap();
        let value = queue.execute_command_list(&mut device).unwrap();
        // 尚未等待
        assert!(queue.reset().is_err());

        queue.wait_for_fence_cpu_blocking(&mut device, value).unwrap();
        queue.reset().unwrap();
    }

    #[test]
    fn test_execute_closed_list_fails() {
        let mut device = HeadlessDevice::new();
        let mut queue = CommandQueueManager::new();
        assert!(queue.execute_command_list(&mut device).is_err());
        assert!(device.journal().borrow().submissions.is_empty());
    }
}
