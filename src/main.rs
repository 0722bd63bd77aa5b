//! dx12_engine 演示程序
//!
//! 默认使用 headless 设备渲染 `renderer.headless_frames` 帧演示场景并输出统计；
//! `--dx12` 在 Windows 上打开窗口，使用 DirectX 12 设备持续渲染直到窗口关闭。
//!
//! ```bash
//! cargo run                          # headless
//! cargo run -- --frames 10           # headless，10 帧
//! cargo run -- --dx12                # 窗口 + DirectX 12
//! cargo run -- --dx12 --model a.obj  # 加载 OBJ 模型
//! ```
//!
//! 左键拖拽绕目标旋转相机。

use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

use anyhow::Context;

use dx12_engine::assets::texture_loader::cube_from_faces;
use dx12_engine::assets::ImageData;
use dx12_engine::core::config::GraphicsBackend;
use dx12_engine::core::{log, Config, WindowStatus};
use dx12_engine::geometry::loaders::load_mesh;
use dx12_engine::geometry::MeshData;
use dx12_engine::gfx::HeadlessDevice;
use dx12_engine::math::Vector3;
use dx12_engine::renderer::light::{Color, Light};
use dx12_engine::renderer::material::{BasicMaterial, PbrMaterial, PbrParameters, SkyboxMaterial};
use dx12_engine::renderer::render_object::RenderObject;
use dx12_engine::renderer::{FrameStatus, Renderer};
use dx12_engine::{app_info, app_warn};

/// 天空盒六个面的颜色（+X, -X, +Y, -Y, +Z, -Z）
const SKY_FACES: [[u8; 4]; 6] = [
    [110, 150, 200, 255],
    [110, 150, 200, 255],
    [170, 200, 240, 255],
    [60, 60, 70, 255],
    [120, 160, 210, 255],
    [100, 140, 190, 255],
];

/// 演示物体每秒绕 Y 轴旋转的角度
const SPIN_DEGREES_PER_SECOND: f32 = 30.0;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut config = Config::from_file_or_default("config.toml");
    config.apply_args(&args);
    config.validate().context("Invalid configuration")?;

    let log_file = config.logging.file_output.then_some(config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file)?;

    app_info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = config.graphics.backend.name(),
        width = config.window.width,
        height = config.window.height,
        "dx12_engine starting"
    );

    let mut renderer = match config.graphics.backend {
        GraphicsBackend::Headless => Renderer::new(Box::new(HeadlessDevice::new()), &config, None)?,
        GraphicsBackend::Dx12 => create_dx12_renderer(&config)?,
    };

    let model = arg_value(&args, "--model");
    let mut objects = build_scene(&mut renderer, model.map(Path::new))?;
    app_info!(objects = objects.len(), "Demo scene created");

    if renderer.has_window() {
        run_windowed(&mut renderer, &mut objects)?;
    } else {
        run_headless(&mut renderer, &mut objects, config.renderer.headless_frames)?;
    }

    renderer.log_statistics();
    app_info!("Shutting down");
    Ok(())
}

#[cfg(target_os = "windows")]
fn create_dx12_renderer(config: &Config) -> anyhow::Result<Renderer> {
    use dx12_engine::core::RenderWindow;
    use dx12_engine::gfx::Dx12Device;

    let window = RenderWindow::new(&config.window)?;
    let device = Dx12Device::new(window.window(), config.graphics.debug_layer)?;
    Ok(Renderer::new(Box::new(device), config, Some(window))?)
}

#[cfg(not(target_os = "windows"))]
fn create_dx12_renderer(_config: &Config) -> anyhow::Result<Renderer> {
    anyhow::bail!("The DirectX 12 backend is only available on Windows; run with --headless")
}

fn arg_value<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// 演示场景：天空盒、棋盘格立方体与 PBR 球体（或指定的 OBJ 模型）
fn build_scene(renderer: &mut Renderer, model: Option<&Path>) -> anyhow::Result<Vec<RenderObject>> {
    let lights = renderer.light_buffer_mut();
    lights.push(Light::directional(Vector3::new(0.5, -1.0, 0.5), Color::white(), 1.0))?;
    lights.push(Light::point(Vector3::new(0.0, 2.0, -2.0), Color::new(1.0, 0.8, 0.6), 2.0, 10.0))?;

    let rm = renderer.resources_mut();
    let mut objects = Vec::new();

    // 天空盒不做深度测试，必须最先绘制，后面的物体覆盖它
    let faces = SKY_FACES
        .iter()
        .map(|&rgba| ImageData::solid_color(16, 16, rgba))
        .collect::<dx12_engine::Result<Vec<_>>>()?;
    let sky = rm.create_cube_map("Sky", &cube_from_faces(faces)?)?;
    let skybox_material = Rc::new(SkyboxMaterial::new(rm, "Sky", sky)?);
    objects.push(RenderObject::skybox(rm, skybox_material)?);

    let checker = ImageData::checkerboard(256, 8, [230, 230, 230, 255], [40, 40, 40, 255], true)?;
    let checker = rm.create_texture("Checker", &checker)?;
    let basic = Rc::new(BasicMaterial::new(rm, "Checker", [1.0; 4], Some(checker))?);
    let mut cube = RenderObject::new(rm, "Cube", &MeshData::unit_cube(), basic)?;
    cube.transform.set_position(Vector3::new(-1.0, 0.0, 0.0));
    objects.push(cube);

    let gold = PbrParameters {
        base_color: [1.0, 0.77, 0.34, 1.0],
        metallic: 1.0,
        roughness: 0.3,
        ao: 1.0,
    };
    let pbr = Rc::new(PbrMaterial::new(rm, "Gold", gold, None)?);
    let (name, mesh) = match model {
        Some(path) => {
            let mesh = load_mesh(path).with_context(|| format!("Failed to load model {}", path.display()))?;
            ("Model", mesh)
        }
        None => ("Sphere", MeshData::uv_sphere(0.6, 32, 16)),
    };
    let mut hero = RenderObject::new(rm, name, &mesh, pbr)?;
    hero.transform.set_position(Vector3::new(1.0, 0.0, 0.0));
    objects.push(hero);

    Ok(objects)
}

/// 旋转除天空盒外的物体
fn animate(objects: &mut [RenderObject], seconds: f32) {
    for object in objects.iter_mut().filter(|o| o.name() != "Skybox") {
        object.transform.rotate(0.0, SPIN_DEGREES_PER_SECOND * seconds, 0.0);
    }
}

fn run_headless(renderer: &mut Renderer, objects: &mut [RenderObject], frames: u32) -> anyhow::Result<()> {
    let start = Instant::now();
    for _ in 0..frames {
        animate(objects, 1.0 / 60.0);
        if renderer.draw_frame(objects)? == FrameStatus::Skipped {
            app_warn!(frame = renderer.frames_presented(), "Headless frame skipped");
        }
    }
    app_info!(frames, elapsed_ms = start.elapsed().as_millis() as u64, "Headless run finished");
    Ok(())
}

fn run_windowed(renderer: &mut Renderer, objects: &mut [RenderObject]) -> anyhow::Result<()> {
    let mut last = Instant::now();
    loop {
        if renderer.poll_window()? == WindowStatus::Quit {
            app_info!("Close requested");
            return Ok(());
        }

        let now = Instant::now();
        animate(objects, (now - last).as_secs_f32());
        last = now;

        renderer.draw_frame(objects)?;
    }
}
