//! 着色器库
//!
//! 内置着色器在构造时编译一次，按名称取出字节码。共享的常量声明
//! （`common.hlsli`）拼接在每个源码之前。

use std::collections::HashMap;
use std::rc::Rc;

use super::pipeline::ShaderBytecode;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::device::RenderDevice;

const COMMON_HLSL: &str = include_str!("../../shaders/common.hlsli");
const BASIC_HLSL: &str = include_str!("../../shaders/basic.hlsl");
const PBR_HLSL: &str = include_str!("../../shaders/pbr.hlsl");
const SKYBOX_HLSL: &str = include_str!("../../shaders/skybox.hlsl");

pub const VERTEX_TARGET: &str = "vs_5_0";
pub const PIXEL_TARGET: &str = "ps_5_0";

/// 内置着色器名称
pub mod names {
    pub const BASIC_VS: &str = "basic_vs";
    pub const BASIC_PS: &str = "basic_ps";
    pub const BASIC_PS_UNTEXTURED: &str = "basic_ps_untextured";
    pub const PBR_VS: &str = "pbr_vs";
    pub const PBR_PS: &str = "pbr_ps";
    pub const PBR_PS_UNTEXTURED: &str = "pbr_ps_untextured";
    pub const SKYBOX_VS: &str = "skybox_vs";
    pub const SKYBOX_PS: &str = "skybox_ps";
}

/// (名称, 源码, 入口, 目标)
const BUILTINS: &[(&str, &str, &str, &str)] = &[
    (names::BASIC_VS, BASIC_HLSL, "VSMain", VERTEX_TARGET),
    (names::BASIC_PS, BASIC_HLSL, "PSMain", PIXEL_TARGET),
    (names::BASIC_PS_UNTEXTURED, BASIC_HLSL, "PSMainColor", PIXEL_TARGET),
    (names::PBR_VS, PBR_HLSL, "VSMain", VERTEX_TARGET),
    (names::PBR_PS, PBR_HLSL, "PSMain", PIXEL_TARGET),
    (names::PBR_PS_UNTEXTURED, PBR_HLSL, "PSMainColor", PIXEL_TARGET),
    (names::SKYBOX_VS, SKYBOX_HLSL, "VSMain", VERTEX_TARGET),
    (names::SKYBOX_PS, SKYBOX_HLSL, "PSMain", PIXEL_TARGET),
];

/// 按名称索引的已编译着色器
#[derive(Debug, Default)]
pub struct ShaderLibrary {
    shaders: HashMap<String, ShaderBytecode>,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// 编译全部内置着色器
    pub fn with_builtins(device: &mut dyn RenderDevice) -> Result<Self> {
        let mut library = Self::new();
        for (name, source, entry, target) in BUILTINS {
            library.compile(device, name, source, entry, target)?;
        }
        tracing::info!(count = library.len(), device = device.name(), "Built-in shaders compiled");
        Ok(library)
    }

    /// 编译并以 `name` 注册
    pub fn compile(
        &mut self,
        device: &mut dyn RenderDevice,
        name: &str,
        source: &str,
        entry: &str,
        target: &str,
    ) -> Result<ShaderBytecode> {
        let full_source = format!("{}\n{}", COMMON_HLSL, source);
        let blob = device.compile_shader(&full_source, entry, target).map_err(|e| {
            tracing::error!(shader = name, entry, target, "Shader compilation failed: {}", e);
            e
        })?;
        let bytecode: ShaderBytecode = Rc::from(blob);
        self.shaders.insert(name.to_string(), bytecode.clone());
        Ok(bytecode)
    }

    /// 注册外部编译好的字节码
    pub fn register(&mut self, name: impl Into<String>, bytecode: Vec<u8>) {
        self.shaders.insert(name.into(), Rc::from(bytecode));
    }

    pub fn get(&self, name: &str) -> Result<ShaderBytecode> {
        self.shaders
            .get(name)
            .cloned()
            .ok_or_else(|| GraphicsError::ShaderCompilation(format!("Shader '{}' is not loaded", name)).into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.shaders.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}
