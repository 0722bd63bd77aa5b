//! 窗口与输入层
//!
//! 使用 winit 的 `pump_events` 以轮询方式驱动事件循环，
//! 让渲染循环由应用程序掌控：每帧调用一次 [`RenderWindow::poll`]。

use std::time::Duration;

use winit::dpi::{LogicalSize, PhysicalPosition};
use winit::event::{ElementState, Event, MouseButton, WindowEvent};
use winit::event_loop::EventLoop;
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowBuilder};

use super::config::WindowConfig;
use super::error::{EngineError, Result};

/// `poll` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStatus {
    /// 继续运行
    Continue,
    /// 用户请求退出
    Quit,
}

/// 渲染窗口
pub struct RenderWindow {
    event_loop: EventLoop<()>,
    window: Window,
    input: InputState,
}

/// 两次 `poll` 之间累积的输入
#[derive(Debug, Default)]
struct InputState {
    dragging: bool,
    last_cursor: Option<PhysicalPosition<f64>>,
    mouse_delta: (f32, f32),
    pending_resize: Option<(u32, u32)>,
    quit: bool,
}

impl RenderWindow {
    /// 创建窗口
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new()
            .map_err(|e| EngineError::Initialization(format!("Failed to create event loop: {}", e)))?;

        let window = WindowBuilder::new()
            .with_title(config.title.clone())
            .with_inner_size(LogicalSize::new(config.width, config.height))
            .with_resizable(config.resizable)
            .build(&event_loop)
            .map_err(|e| EngineError::Initialization(format!("Failed to create window: {}", e)))?;

        Ok(Self {
            event_loop,
            window,
            input: InputState::default(),
        })
    }

    /// 处理所有待处理的窗口消息
    pub fn poll(&mut self) -> WindowStatus {
        let input = &mut self.input;

        let status = self.event_loop.pump_events(Some(Duration::ZERO), |event, target| {
            if let Event::WindowEvent { event, .. } = event {
                match event {
                    WindowEvent::CloseRequested => {
                        input.quit = true;
                        target.exit();
                    }
                    WindowEvent::Resized(size) => {
                        input.pending_resize = Some((size.width, size.height));
                    }
                    WindowEvent::MouseInput {
                        state,
                        button: MouseButton::Left,
                        ..
                    } => {
                        input.dragging = state == ElementState::Pressed;
                        input.last_cursor = None;
                    }
                    WindowEvent::CursorMoved { position, .. } => {
                        if input.dragging {
                            if let Some(last) = input.last_cursor {
                                input.mouse_delta.0 += (position.x - last.x) as f32;
                                input.mouse_delta.1 += (position.y - last.y) as f32;
                            }
                            input.last_cursor = Some(position);
                        }
                    }
                    _ => {}
                }
            }
        });

        if input.quit || matches!(status, PumpStatus::Exit(_)) {
            WindowStatus::Quit
        } else {
            WindowStatus::Continue
        }
    }

    /// 当前客户区尺寸（物理像素）
    pub fn size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    /// 取出自上次调用以来左键拖拽的鼠标位移
    pub fn take_mouse_delta(&mut self) -> (f32, f32) {
        std::mem::take(&mut self.input.mouse_delta)
    }

    /// 取出最近一次尺寸变化（最小化时为 0 的尺寸会被忽略）
    pub fn take_resize(&mut self) -> Option<(u32, u32)> {
        self.input
            .pending_resize
            .take()
            .filter(|&(width, height)| width > 0 && height > 0)
    }

    /// 底层 winit 窗口，用于创建交换链
    pub fn window(&self) -> &Window {
        &self.window
    }
}
