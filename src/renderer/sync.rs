//! CPU-GPU 同步
//!
//! 直接队列上只有一个 fence。CPU 侧为每次提交分配单调递增的 [`FenceValue`]，
//! 并记住 GPU 已确认完成的最大值。

/// Fence 值
///
/// 单调递增；GPU 完成某次提交后 fence 到达对应的值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个 Fence 值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// Fence 跟踪器
///
/// 只在渲染线程上使用，不需要原子操作。
#[derive(Debug, Default)]
pub struct FenceTracker {
    /// 最近一次分配的值（CPU 侧）
    current: FenceValue,
    /// 已确认完成的值（GPU 侧）
    completed: FenceValue,
}

impl FenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_value(&self) -> FenceValue {
        self.current
    }

    pub fn completed_value(&self) -> FenceValue {
        self.completed
    }

    /// 分配下一个 Fence 值
    pub fn next_value(&mut self) -> FenceValue {
        self.current = self.current.next();
        self.current
    }

    /// 记录 GPU 已完成的值；不会回退
    pub fn update_completed_value(&mut self, value: FenceValue) {
        self.completed = self.completed.max(value);
    }

    pub fn is_completed(&self, value: FenceValue) -> bool {
        self.completed >= value
    }

    /// 是否有尚未确认完成的提交
    pub fn has_pending_work(&self) -> bool {
        self.completed < self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_value() {
        let fence = FenceValue::new(1);
        assert_eq!(fence.value(), 1);
        assert_eq!(fence.next().value(), 2);
        assert!(FenceValue::new(1) < FenceValue::new(2));
    }

    #[test]
    fn test_fence_tracker() {
        let mut tracker = FenceTracker::new();
        assert_eq!(tracker.current_value().value(), 0);
        assert!(!tracker.has_pending_work());

        let v1 = tracker.next_value();
        let v2 = tracker.next_value();
        assert_eq!(v2.value(), 2);
        assert!(tracker.has_pending_work());

        tracker.update_completed_value(v1);
        assert!(tracker.is_completed(v1));
        assert!(!tracker.is_completed(v2));

        // 完成值不回退
        tracker.update_completed_value(FenceValue::new(0));
        assert!(tracker.is_completed(v1));

        tracker.update_completed_value(v2);
        assert!(!tracker.has_pending_work());
    }
}
