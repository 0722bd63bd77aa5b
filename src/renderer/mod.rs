//! 渲染器模块
//!
//! 本模块实现了与具体图形 API 无关的渲染核心：资源与描述符管理、命令记录、
//! 上传、材质、渲染对象以及每帧的编排。底层设备通过 [`RenderDevice`] trait 接入，
//! 实现在 `gfx` 模块中（DirectX 12 或无窗口设备）。
//!
//! # 帧流程
//!
//! 1. [`Renderer::init_frame`]：提交待上传数据，重置命令列表，后台缓冲区转到 RenderTarget 并清屏
//! 2. [`Renderer::render`]：为每个对象记录绑定与一次索引绘制
//! 3. [`Renderer::present_frame`]：转回 Present，提交、呈现并等待 fence
//!
//! [`Renderer::draw_frame`] 把三步串起来；可恢复的错误只跳过当前帧。

pub mod buffer;
pub mod cache;
pub mod command;
pub mod context;
pub mod descriptor;
pub mod light;
pub mod material;
pub mod pipeline;
pub mod queue;
pub mod render_object;
pub mod resource;
pub mod resource_manager;
pub mod root_signature;
pub mod shader;
pub mod sync;
pub mod texture;
pub mod uploader;

use tracing::{debug, info, warn};

use crate::component::Camera;
use crate::core::config::Config;
use crate::core::error::{GraphicsError, Result};
use crate::core::window::{RenderWindow, WindowStatus};
use crate::gfx::device::RenderDevice;

use command::{PrimitiveTopology, ScissorRect, Viewport};
use context::RenderContext;
use light::LightBuffer;
use render_object::RenderObject;
use resource_manager::ResourceManager;
use root_signature::{LIGHT_ROOT_INDEX, OBJECT_ROOT_INDEX};

/// `draw_frame` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// 帧已提交并呈现
    Presented,
    /// 帧因可恢复的错误被跳过
    Skipped,
}

/// 帧编排器
///
/// 字段按销毁顺序排列：帧目标与灯光先于资源管理器销毁，
/// 它们推入释放队列的分配由资源管理器在关闭时统一处理。
pub struct Renderer {
    context: RenderContext,
    lights: LightBuffer,
    camera: Camera,
    clear_color: [f32; 4],
    sync_interval: u32,
    frame_in_progress: bool,
    frames_presented: u64,
    frames_skipped: u64,
    resources: ResourceManager,
    window: Option<RenderWindow>,
}

impl Renderer {
    /// 创建渲染器
    ///
    /// 有窗口时交换链使用窗口的客户区大小，否则使用配置中的尺寸。
    pub fn new(device: Box<dyn RenderDevice>, config: &Config, window: Option<RenderWindow>) -> Result<Self> {
        let (width, height) = window
            .as_ref()
            .map(|w| w.size())
            .unwrap_or((config.window.width, config.window.height));

        info!(device = device.name(), width, height, "Creating renderer");

        let mut resources = ResourceManager::new(device, &config.renderer)?;
        let context = RenderContext::new(&mut resources, width, height)?;
        let releases = resources.releases().clone();
        let lights = LightBuffer::new(resources.device_mut(), &releases)?;

        Ok(Self {
            context,
            lights,
            camera: Camera::new(width as f32 / height.max(1) as f32),
            clear_color: config.renderer.clear_color,
            sync_interval: config.graphics.sync_interval(),
            frame_in_progress: false,
            frames_presented: 0,
            frames_skipped: 0,
            resources,
            window,
        })
    }

    // ========== 访问器 ==========

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// 用于创建缓冲区、纹理、材质与渲染对象
    pub fn resources_mut(&mut self) -> &mut ResourceManager {
        &mut self.resources
    }

    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    pub fn light_buffer(&self) -> &LightBuffer {
        &self.lights
    }

    pub fn light_buffer_mut(&mut self) -> &mut LightBuffer {
        &mut self.lights
    }

    pub fn set_light_buffer(&mut self, lights: LightBuffer) {
        self.lights = lights;
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    pub fn has_window(&self) -> bool {
        self.window.is_some()
    }

    /// 覆盖整个窗口的视口
    pub fn default_viewport(&self) -> Viewport {
        Viewport {
            top_left_x: 0.0,
            top_left_y: 0.0,
            width: self.context.width() as f32,
            height: self.context.height() as f32,
            min_depth: -1.0,
            max_depth: 1.0,
        }
    }

    pub fn default_scissor_rect(&self) -> ScissorRect {
        ScissorRect {
            left: 0,
            top: 0,
            right: self.context.width() as i32,
            bottom: self.context.height() as i32,
        }
    }

    // ========== 窗口 ==========

    /// 处理窗口消息
    ///
    /// 左键拖拽转为相机环绕，窗口尺寸变化时调整交换链。没有窗口时总是继续。
    pub fn poll_window(&mut self) -> Result<WindowStatus> {
        let Some(window) = self.window.as_mut() else {
            return Ok(WindowStatus::Continue);
        };

        let status = window.poll();
        let (dx, dy) = window.take_mouse_delta();
        let resize = window.take_resize();

        if dx != 0.0 || dy != 0.0 {
            self.camera.orbit(dx, dy);
        }
        if let Some((width, height)) = resize {
            self.resize(width, height)?;
        }
        Ok(status)
    }

    /// 调整交换链与深度缓冲大小，并更新相机宽高比
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if self.frame_in_progress {
            return Err(GraphicsError::SwapchainError("Resize during an open frame".to_string()).into());
        }
        self.context.resize(&mut self.resources, width, height)?;
        self.camera
            .set_aspect(self.context.width() as f32 / self.context.height().max(1) as f32);
        Ok(())
    }

    // ========== 帧 ==========

    /// 开始一帧
    ///
    /// 先提交所有待上传数据；上传会把命令列表留在记录状态，此时不再重置。
    pub fn init_frame(&mut self, viewport: Viewport, scissor: ScissorRect) -> Result<()> {
        if self.frame_in_progress {
            return Err(GraphicsError::CommandExecution("init_frame called twice without present".to_string()).into());
        }

        let flushed = self.resources.upload_all_pending()?;
        if !flushed && !self.resources.queue().list().is_recording() {
            self.resources.queue_mut().reset()?;
        }
        self.frame_in_progress = true;

        // 上一帧的 GPU 工作已完成，可以直接写灯光常量
        self.lights.flush()?;

        self.context.transition_to_render_target(&mut self.resources)?;
        let rtv = self.context.current_rtv(&self.resources)?;
        let dsv = self.context.depth_dsv()?;
        let heap = self.resources.heaps().render_pass.native();

        let list = self.resources.queue_mut().command_list();
        list.set_viewport(viewport)?;
        list.set_scissor_rect(scissor)?;
        list.set_render_targets(rtv, Some(dsv))?;
        list.clear_render_target(rtv, self.clear_color)?;
        list.clear_depth_stencil(dsv, 1.0, 0)?;
        list.set_primitive_topology(PrimitiveTopology::TriangleList)?;
        list.set_descriptor_heap(heap)?;
        Ok(())
    }

    /// 记录一个对象的绘制
    ///
    /// 绑定顺序与根签名一致：根签名、灯光 (0)、物体常量 (1)、材质 (2, 3)，
    /// 然后是管线状态、顶点与索引缓冲区。同一对象在一帧内只能绘制一次。
    pub fn render(&mut self, object: &mut RenderObject) -> Result<()> {
        if !self.frame_in_progress {
            return Err(GraphicsError::CommandExecution("render called outside a frame".to_string()).into());
        }

        object.ensure_ready()?;
        object.update_constants(&self.camera)?;

        let material = object.material().clone();
        let list = self.resources.queue_mut().command_list();
        list.set_root_signature(material.root_signature())?;
        list.set_root_cbv(LIGHT_ROOT_INDEX, self.lights.gpu_address())?;
        list.set_root_cbv(OBJECT_ROOT_INDEX, object.constant_buffer().gpu_address())?;
        material.bind(list)?;
        list.set_pipeline_state(material.pipeline_state())?;
        list.set_vertex_buffer(0, object.vertex_buffer().view())?;
        list.set_index_buffer(object.index_buffer().view())?;
        list.draw_indexed(object.index_buffer().index_count())?;
        Ok(())
    }

    /// 结束并呈现一帧，阻塞到 GPU 完成
    pub fn present_frame(&mut self) -> Result<()> {
        if !self.frame_in_progress {
            return Err(GraphicsError::CommandExecution("present_frame called outside a frame".to_string()).into());
        }

        self.context.transition_to_present(&mut self.resources)?;
        let (device, queue) = self.resources.device_and_queue();
        let fence = queue.execute_command_list(device)?;
        self.frame_in_progress = false;

        let presented = self.context.present(&mut self.resources, self.sync_interval);
        // 即使呈现失败也要等本次提交完成
        self.resources.wait_for_fence(fence)?;
        presented?;

        self.frames_presented += 1;
        Ok(())
    }

    /// 渲染一帧
    ///
    /// 可恢复的错误（描述符耗尽、上传超出预算、资源未就绪）丢弃已记录的命令并跳过本帧；
    /// 其他错误同样清理后返回给调用者。
    pub fn draw_frame(&mut self, objects: &mut [RenderObject]) -> Result<FrameStatus> {
        match self.record_and_present(objects) {
            Ok(()) => Ok(FrameStatus::Presented),
            Err(e) => {
                self.abandon_frame();
                if e.is_frame_recoverable() {
                    self.frames_skipped += 1;
                    warn!(skipped = self.frames_skipped, "Frame skipped: {}", e);
                    Ok(FrameStatus::Skipped)
                } else {
                    Err(e)
                }
            }
        }
    }

    fn record_and_present(&mut self, objects: &mut [RenderObject]) -> Result<()> {
        self.init_frame(self.default_viewport(), self.default_scissor_rect())?;
        for object in objects.iter_mut() {
            self.render(object)?;
        }
        self.present_frame()
    }

    /// 丢弃未提交的帧
    fn abandon_frame(&mut self) {
        if self.resources.queue().list().is_recording() {
            self.resources.queue_mut().discard();
        }
        self.context.abandon_frame(&self.resources);
        self.frame_in_progress = false;
    }

    /// 记录资源统计
    pub fn log_statistics(&self) {
        let root_signatures = self.resources.root_signature_stats();
        let pipelines = self.resources.pipeline_state_stats();
        info!(
            presented = self.frames_presented,
            skipped = self.frames_skipped,
            submissions = self.resources.queue().submission_count(),
            uploaded_bytes = self.resources.uploader().bytes_uploaded(),
            "Frame statistics"
        );
        info!(
            root_signatures = root_signatures.entries,
            root_signature_hits = root_signatures.hits,
            pipeline_states = pipelines.entries,
            pipeline_state_hits = pipelines.hits,
            "Cache statistics"
        );
        for stats in self.resources.descriptor_stats() {
            debug!(
                heap = stats.kind.name(),
                used = stats.used,
                capacity = stats.capacity,
                usage = format!("{:.1}%", stats.usage_ratio * 100.0),
                "Descriptor heap usage"
            );
        }
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("size", &(self.context.width(), self.context.height()))
            .field("frames_presented", &self.frames_presented)
            .field("frames_skipped", &self.frames_skipped)
            .field("resources", &self.resources)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::assets::texture_loader::cube_from_faces;
    use crate::assets::ImageData;
    use crate::core::error::EngineError;
    use crate::geometry::MeshData;
    use crate::gfx::device::ResourceState;
    use crate::gfx::headless::{HeadlessDevice, HeadlessJournal};
    use crate::renderer::command::Command;
    use crate::renderer::material::{
        verify_binding_order, BasicMaterial, Material, PbrMaterial, PbrParameters, PbrTextures, SkyboxMaterial,
    };

    fn small_config() -> Config {
        let mut config = Config::default();
        config.window.width = 64;
        config.window.height = 48;
        config
    }

    fn headless_renderer() -> (Renderer, Rc<RefCell<HeadlessJournal>>) {
        renderer_with(&small_config())
    }

    fn renderer_with(config: &Config) -> (Renderer, Rc<RefCell<HeadlessJournal>>) {
        let device = HeadlessDevice::new();
        let journal = device.journal();
        let renderer = Renderer::new(Box::new(device), config, None).unwrap();
        (renderer, journal)
    }

    fn red_cube(renderer: &mut Renderer) -> RenderObject {
        let rm = renderer.resources_mut();
        let material = Rc::new(BasicMaterial::new(rm, "Red", [1.0, 0.0, 0.0, 1.0], None).unwrap());
        RenderObject::new(rm, "Cube", &MeshData::unit_cube(), material).unwrap()
    }

    fn skybox(renderer: &mut Renderer) -> RenderObject {
        let rm = renderer.resources_mut();
        let faces = (0..6u8)
            .map(|i| ImageData::solid_color(4, 4, [40 * i, 100, 200, 255]).unwrap())
            .collect();
        let cube_map = rm.create_cube_map("Sky", &cube_from_faces(faces).unwrap()).unwrap();
        let material = Rc::new(SkyboxMaterial::new(rm, "Sky", cube_map).unwrap());
        RenderObject::skybox(rm, material).unwrap()
    }

    /// 按根签名切分帧命令，逐个物体检查绑定顺序
    fn verify_each_object(frame: &[Command], objects: &[RenderObject]) {
        let starts: Vec<usize> = frame
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Command::SetGraphicsRootSignature(_)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(starts.len(), objects.len());

        for (i, object) in objects.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(frame.len());
            verify_binding_order(object.material().root_signature_desc(), &frame[starts[i]..end]).unwrap();
        }
    }

    fn draws(commands: &[Command]) -> Vec<u32> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::DrawIndexedInstanced { index_count, .. } => Some(*index_count),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_cube_frame_records_one_draw() {
        let (mut renderer, journal) = headless_renderer();
        let mut objects = vec![red_cube(&mut renderer)];

        assert_eq!(renderer.draw_frame(&mut objects).unwrap(), FrameStatus::Presented);

        let journal = journal.borrow();
        // 一次上传提交，一次帧提交
        assert_eq!(journal.submissions.len(), 2);
        assert!(draws(&journal.submissions[0]).is_empty());
        assert_eq!(journal.presents, 1);

        let frame = journal.last_submission().unwrap();
        assert_eq!(draws(frame), vec![36]);

        let slots: Vec<u32> = frame
            .iter()
            .filter_map(|c| match c {
                Command::SetVertexBuffers { start_slot, .. } => Some(*start_slot),
                _ => None,
            })
            .collect();
        assert_eq!(slots, vec![0]);

        let cbvs: Vec<u32> = frame
            .iter()
            .filter_map(|c| match c {
                Command::SetGraphicsRootConstantBufferView { root_index, .. } => Some(*root_index),
                _ => None,
            })
            .collect();
        assert_eq!(cbvs, vec![0, 1, 2]);
        assert!(!frame
            .iter()
            .any(|c| matches!(c, Command::SetGraphicsRootDescriptorTable { .. })));

        let desc = objects[0].material().root_signature_desc().clone();
        verify_binding_order(&desc, frame).unwrap();
    }

    #[test]
    fn test_frame_clears_and_transitions() {
        let (mut renderer, journal) = headless_renderer();
        renderer.draw_frame(&mut []).unwrap();

        let journal = journal.borrow();
        let frame = journal.last_submission().unwrap();
        assert!(draws(frame).is_empty());
        let rtv = renderer.context().current_rtv(renderer.resources()).unwrap();
        // 呈现后当前缓冲区已轮换，清屏的是另一个
        let cleared: Vec<_> = frame
            .iter()
            .filter_map(|c| match c {
                Command::ClearRenderTargetView { rtv, color } => Some((*rtv, *color)),
                _ => None,
            })
            .collect();
        assert_eq!(cleared.len(), 1);
        assert_ne!(cleared[0].0, rtv);
        assert_eq!(cleared[0].1, [0.0, 0.2, 0.4, 1.0]);
        assert!(frame
            .iter()
            .any(|c| matches!(c, Command::ClearDepthStencilView { depth, .. } if *depth == 1.0)));

        let barriers: Vec<(ResourceState, ResourceState)> = frame
            .iter()
            .filter_map(|c| match c {
                Command::ResourceBarrier(t) => Some((t.before, t.after)),
                _ => None,
            })
            .collect();
        assert_eq!(
            barriers,
            vec![
                (ResourceState::Present, ResourceState::RenderTarget),
                (ResourceState::RenderTarget, ResourceState::Present)
            ]
        );
    }

    #[test]
    fn test_back_buffers_alternate_and_return_to_present() {
        let (mut renderer, journal) = headless_renderer();
        let mut seen = Vec::new();

        for _ in 0..4 {
            let index = renderer.resources().device().current_back_buffer_index();
            seen.push(index);
            renderer.draw_frame(&mut []).unwrap();
            let back_buffer = renderer.context().current_back_buffer(renderer.resources()).unwrap();
            assert_eq!(back_buffer.state(), ResourceState::Present);
        }

        assert_eq!(seen, vec![0, 1, 0, 1]);
        assert_eq!(journal.borrow().presents, 4);
        assert_eq!(renderer.frames_presented(), 4);
    }

    #[test]
    fn test_textured_pbr_binds_descriptor_table() {
        let (mut renderer, journal) = headless_renderer();
        let rm = renderer.resources_mut();
        let mut texture = |name: &str, rgba: [u8; 4]| rm.create_texture(name, &ImageData::solid_color(4, 4, rgba).unwrap()).unwrap();
        let textures = PbrTextures {
            albedo: texture("Albedo", [200, 80, 40, 255]),
            normal: texture("Normal", [128, 128, 255, 255]),
            metallic: texture("Metallic", [0, 0, 0, 255]),
            roughness: texture("Roughness", [128, 128, 128, 255]),
            ao: texture("Ao", [255, 255, 255, 255]),
        };
        let material = Rc::new(PbrMaterial::new(rm, "Brick", PbrParameters::default(), Some(textures)).unwrap());
        let table = material.descriptor_table().unwrap();
        let mut objects = vec![RenderObject::new(rm, "Sphere", &MeshData::uv_sphere(0.5, 8, 8), material).unwrap()];

        assert_eq!(renderer.draw_frame(&mut objects).unwrap(), FrameStatus::Presented);

        let journal = journal.borrow();
        let frame = journal.last_submission().unwrap();
        assert!(frame.contains(&Command::SetGraphicsRootDescriptorTable {
            root_index: 3,
            base: table
        }));
        assert!(frame.contains(&Command::SetDescriptorHeaps(renderer.resources().heaps().render_pass.native())));
        assert!(objects[0].material().is_ready());
        verify_binding_order(objects[0].material().root_signature_desc(), frame).unwrap();
    }

    #[test]
    fn test_skybox_drawn_before_scene_objects() {
        let (mut renderer, journal) = headless_renderer();
        let sky = skybox(&mut renderer);
        let rm = renderer.resources_mut();
        let material = Rc::new(BasicMaterial::new(rm, "Blue", [0.0, 0.0, 1.0, 1.0], None).unwrap());
        let sphere = RenderObject::new(rm, "Sphere", &MeshData::uv_sphere(0.5, 8, 8), material).unwrap();
        let sphere_indices = sphere.index_buffer().index_count();
        assert_ne!(sphere_indices, 36);
        let mut objects = vec![sky, sphere];

        assert_eq!(renderer.draw_frame(&mut objects).unwrap(), FrameStatus::Presented);

        let journal = journal.borrow();
        let frame = journal.last_submission().unwrap();
        assert_eq!(draws(frame), vec![36, sphere_indices]);
        // 天空盒带立方体贴图表，球体只有三个 CBV
        assert!(frame
            .iter()
            .any(|c| matches!(c, Command::SetGraphicsRootDescriptorTable { root_index: 3, .. })));
        verify_each_object(frame, &objects);
    }

    #[test]
    fn test_unready_resources_skip_frame() {
        let mut config = small_config();
        config.renderer.staging_budget_bytes = 64 * 1024;
        let (mut renderer, journal) = renderer_with(&config);
        let mut objects = vec![red_cube(&mut renderer)];

        // 一个超出暂存预算的纹理：上传时被移出队列，永远不会就绪
        let budget = renderer.resources().uploader().budget();
        let side = ((budget / 4) as f64).sqrt() as u32 + 8;
        let rm = renderer.resources_mut();
        let huge = rm.create_texture("Huge", &ImageData::solid_color(side, side, [1, 2, 3, 4]).unwrap()).unwrap();
        let material = Rc::new(BasicMaterial::new(rm, "Huge", [1.0; 4], Some(huge)).unwrap());
        objects.push(RenderObject::new(rm, "Wall", &MeshData::unit_cube(), material).unwrap());

        // 第一帧：上传失败，帧被跳过
        assert_eq!(renderer.draw_frame(&mut objects).unwrap(), FrameStatus::Skipped);
        // 第二帧：其他数据已上传，但墙的贴图仍未就绪
        assert_eq!(renderer.draw_frame(&mut objects).unwrap(), FrameStatus::Skipped);
        assert_eq!(renderer.frames_skipped(), 2);
        assert_eq!(journal.borrow().presents, 0);
        assert!(journal.borrow().draw_calls().is_empty());

        // 移除问题对象后恢复正常
        objects.pop();
        assert_eq!(renderer.draw_frame(&mut objects).unwrap(), FrameStatus::Presented);
        assert_eq!(draws(journal.borrow().last_submission().unwrap()), vec![36]);
        let back_buffer = renderer.context().current_back_buffer(renderer.resources()).unwrap();
        assert_eq!(back_buffer.state(), ResourceState::Present);
    }

    #[test]
    fn test_render_outside_frame_fails() {
        let (mut renderer, _journal) = headless_renderer();
        let mut cube = red_cube(&mut renderer);
        let err = renderer.render(&mut cube).unwrap_err();
        assert!(matches!(err, EngineError::Graphics(GraphicsError::CommandExecution(_))));
        assert!(renderer.present_frame().is_err());
    }

    #[test]
    fn test_resize_updates_viewport_and_camera() {
        let (mut renderer, _journal) = headless_renderer();
        renderer.resize(200, 100).unwrap();

        let viewport = renderer.default_viewport();
        assert_eq!((viewport.width, viewport.height), (200.0, 100.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (-1.0, 1.0));
        assert_eq!(renderer.default_scissor_rect().right, 200);
        assert!((renderer.camera().aspect() - 2.0).abs() < 1e-6);
        assert_eq!(renderer.draw_frame(&mut []).unwrap(), FrameStatus::Presented);
    }
}
