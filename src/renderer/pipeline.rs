//! 管线状态描述与构建器
//!
//! [`PipelineStateBuilder`] 是不可变构建器，`build()` 产出可比较、可哈希的
//! [`PipelineStateDesc`]。浮点字段按位比较，保证缓存键的相等性是精确的。

use std::hash::{Hash, Hasher};
use std::rc::Rc;

use super::cache::ObjectCache;
use crate::core::error::{GraphicsError, Result};
use crate::geometry::vertex::Vertex;
use crate::gfx::device::{Format, PipelineStateId, RootSignatureId};

/// 编译后的着色器字节码
pub type ShaderBytecode = Rc<[u8]>;

/// 输入布局元素
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputElement {
    pub semantic: &'static str,
    pub semantic_index: u32,
    pub format: Format,
    pub input_slot: u32,
    pub aligned_byte_offset: u32,
}

impl InputElement {
    const fn per_vertex(semantic: &'static str, format: Format, offset: u32) -> Self {
        Self {
            semantic,
            semantic_index: 0,
            format,
            input_slot: 0,
            aligned_byte_offset: offset,
        }
    }
}

/// 与 [`Vertex`] 对应的默认输入布局
pub fn default_input_layout() -> Vec<InputElement> {
    vec![
        InputElement::per_vertex("POSITION", Format::R32G32B32Float, Vertex::POSITION_OFFSET),
        InputElement::per_vertex("NORMAL", Format::R32G32B32Float, Vertex::NORMAL_OFFSET),
        InputElement::per_vertex("TEXCOORD", Format::R32G32Float, Vertex::TEXCOORD_OFFSET),
        InputElement::per_vertex("TANGENT", Format::R32G32B32Float, Vertex::TANGENT_OFFSET),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    InvSrcAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
}

/// 单个渲染目标的混合状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enabled: bool,
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
    pub write_mask: u8,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enabled: false,
            src: BlendFactor::One,
            dst: BlendFactor::Zero,
            op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
            write_mask: 0x0F,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMode {
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// 光栅化状态
#[derive(Debug, Clone, Copy)]
pub struct RasterizerState {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip_enable: bool,
}

impl RasterizerState {
    fn key(&self) -> (FillMode, CullMode, bool, i32, u32, u32, bool) {
        (
            self.fill_mode,
            self.cull_mode,
            self.front_counter_clockwise,
            self.depth_bias,
            self.depth_bias_clamp.to_bits(),
            self.slope_scaled_depth_bias.to_bits(),
            self.depth_clip_enable,
        )
    }
}

impl PartialEq for RasterizerState {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for RasterizerState {}

impl Hash for RasterizerState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Back,
            front_counter_clockwise: false,
            depth_bias: 0,
            depth_bias_clamp: 0.0,
            slope_scaled_depth_bias: 0.0,
            depth_clip_enable: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonFunc {
    Never,
    Less,
    LessEqual,
    Equal,
    Greater,
    Always,
}

/// 深度模板状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_enable: bool,
    pub depth_write: bool,
    pub depth_func: ComparisonFunc,
    pub stencil_enable: bool,
}

impl DepthStencilState {
    /// 关闭深度测试与写入
    pub fn disabled() -> Self {
        Self {
            depth_enable: false,
            depth_write: false,
            depth_func: ComparisonFunc::Always,
            stencil_enable: false,
        }
    }
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_enable: true,
            depth_write: true,
            depth_func: ComparisonFunc::Less,
            stencil_enable: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopologyType {
    Point,
    Line,
    Triangle,
}

/// 管线状态描述；作为缓存键使用
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineStateDesc {
    pub root_signature: RootSignatureId,
    pub vs: ShaderBytecode,
    pub ps: ShaderBytecode,
    pub input_layout: Vec<InputElement>,
    pub blend: BlendState,
    pub rasterizer: RasterizerState,
    pub depth_stencil: DepthStencilState,
    pub sample_mask: u32,
    pub topology: PrimitiveTopologyType,
    pub rtv_formats: Vec<Format>,
    pub dsv_format: Format,
    pub sample_count: u32,
    pub sample_quality: u32,
}

/// 不可变管线构建器
#[derive(Debug, Clone)]
pub struct PipelineStateBuilder {
    root_signature: Option<RootSignatureId>,
    vs: Option<ShaderBytecode>,
    ps: Option<ShaderBytecode>,
    input_layout: Vec<InputElement>,
    blend: BlendState,
    rasterizer: RasterizerState,
    depth_stencil: DepthStencilState,
    sample_mask: u32,
    topology: PrimitiveTopologyType,
    rtv_formats: Vec<Format>,
    dsv_format: Format,
    sample_count: u32,
    sample_quality: u32,
}

impl Default for PipelineStateBuilder {
    fn default() -> Self {
        Self {
            root_signature: None,
            vs: None,
            ps: None,
            input_layout: default_input_layout(),
            blend: BlendState::default(),
            rasterizer: RasterizerState::default(),
            depth_stencil: DepthStencilState::default(),
            sample_mask: u32::MAX,
            topology: PrimitiveTopologyType::Triangle,
            rtv_formats: vec![Format::R8G8B8A8Unorm],
            dsv_format: Format::D24UnormS8Uint,
            sample_count: 1,
            sample_quality: 0,
        }
    }
}

impl PipelineStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 默认管线配置加上着色器与根签名
    pub fn configure_from_default(vs: ShaderBytecode, ps: ShaderBytecode, root_signature: RootSignatureId) -> Self {
        Self::default()
            .with_vertex_shader(vs)
            .with_pixel_shader(ps)
            .with_root_signature(root_signature)
    }

    pub fn with_root_signature(&self, root_signature: RootSignatureId) -> Self {
        Self {
            root_signature: Some(root_signature),
            ..self.clone()
        }
    }

    pub fn with_vertex_shader(&self, vs: ShaderBytecode) -> Self {
        Self {
            vs: Some(vs),
            ..self.clone()
        }
    }

    pub fn with_pixel_shader(&self, ps: ShaderBytecode) -> Self {
        Self {
            ps: Some(ps),
            ..self.clone()
        }
    }

    pub fn with_input_layout(&self, input_layout: Vec<InputElement>) -> Self {
        Self {
            input_layout,
            ..self.clone()
        }
    }

    pub fn with_blend(&self, blend: BlendState) -> Self {
        Self { blend, ..self.clone() }
    }

    pub fn with_rasterizer(&self, rasterizer: RasterizerState) -> Self {
        Self {
            rasterizer,
            ..self.clone()
        }
    }

    pub fn with_cull_mode(&self, cull_mode: CullMode) -> Self {
        self.with_rasterizer(RasterizerState {
            cull_mode,
            ..self.rasterizer
        })
    }

    pub fn with_depth_stencil(&self, depth_stencil: DepthStencilState) -> Self {
        Self {
            depth_stencil,
            ..self.clone()
        }
    }

    pub fn with_topology(&self, topology: PrimitiveTopologyType) -> Self {
        Self {
            topology,
            ..self.clone()
        }
    }

    pub fn with_render_target_formats(&self, rtv_formats: Vec<Format>) -> Self {
        Self {
            rtv_formats,
            ..self.clone()
        }
    }

    pub fn with_depth_format(&self, dsv_format: Format) -> Self {
        Self {
            dsv_format,
            ..self.clone()
        }
    }

    pub fn with_sample_desc(&self, count: u32, quality: u32) -> Self {
        Self {
            sample_count: count,
            sample_quality: quality,
            ..self.clone()
        }
    }

    /// 生成描述；缺少根签名或着色器时失败
    pub fn build(&self) -> Result<PipelineStateDesc> {
        let missing = |what: &str| GraphicsError::ResourceCreationFailure(format!("Pipeline state has no {}", what));

        let root_signature = self.root_signature.ok_or_else(|| missing("root signature"))?;
        let vs = self.vs.clone().ok_or_else(|| missing("vertex shader"))?;
        let ps = self.ps.clone().ok_or_else(|| missing("pixel shader"))?;
        if self.rtv_formats.len() > 8 {
            return Err(GraphicsError::ResourceCreationFailure(format!(
                "{} render targets requested, at most 8 supported",
                self.rtv_formats.len()
            ))
            .into());
        }

        Ok(PipelineStateDesc {
            root_signature,
            vs,
            ps,
            input_layout: self.input_layout.clone(),
            blend: self.blend,
            rasterizer: self.rasterizer,
            depth_stencil: self.depth_stencil,
            sample_mask: self.sample_mask,
            topology: self.topology,
            rtv_formats: self.rtv_formats.clone(),
            dsv_format: self.dsv_format,
            sample_count: self.sample_count,
            sample_quality: self.sample_quality,
        })
    }
}

/// 管线状态缓存
pub type PipelineStateCache = ObjectCache<PipelineStateDesc, PipelineStateId>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::device::RenderDevice;
    use crate::gfx::headless::HeadlessDevice;

    fn bytecode(tag: &str) -> ShaderBytecode {
        Rc::from(tag.as_bytes())
    }

    fn default_builder() -> PipelineStateBuilder {
        PipelineStateBuilder::configure_from_default(bytecode("vs"), bytecode("ps"), RootSignatureId(1))
    }

    #[test]
    fn test_default_pipeline() {
        let desc = default_builder().build().unwrap();
        assert_eq!(desc.input_layout[3].semantic, "TANGENT");
        assert_eq!(desc.input_layout[3].aligned_byte_offset, 32);
        assert_eq!(desc.rtv_formats, vec![Format::R8G8B8A8Unorm]);
        assert_eq!(desc.dsv_format, Format::D24UnormS8Uint);
        assert_eq!(desc.sample_mask, 0xFFFF_FFFF);
        assert_eq!((desc.sample_count, desc.sample_quality), (1, 0));
        assert_eq!(desc.topology, PrimitiveTopologyType::Triangle);
    }

    #[test]
    fn test_missing_shader_fails() {
        let builder = PipelineStateBuilder::new().with_root_signature(RootSignatureId(1));
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_builder_does_not_mutate() {
        let base = default_builder();
        let no_cull = base.with_cull_mode(CullMode::None);
        assert_eq!(base.build().unwrap().rasterizer.cull_mode, CullMode::Back);
        assert_eq!(no_cull.build().unwrap().rasterizer.cull_mode, CullMode::None);
    }

    #[test]
    fn test_float_fields_compare_by_bits() {
        let a = default_builder().build().unwrap();
        let b = default_builder()
            .with_rasterizer(RasterizerState {
                depth_bias_clamp: -0.0,
                ..RasterizerState::default()
            })
            .build()
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_cache_hit_and_distinct_entries() {
        let mut device = HeadlessDevice::new();
        let mut cache = PipelineStateCache::new("PipelineState");

        let first = cache
            .get_or_create(&default_builder().build().unwrap(), |d| device.create_pipeline_state(d))
            .unwrap();
        let again = cache
            .get_or_create(&default_builder().build().unwrap(), |d| device.create_pipeline_state(d))
            .unwrap();
        let skybox = cache
            .get_or_create(
                &default_builder()
                    .with_depth_stencil(DepthStencilState::disabled())
                    .build()
                    .unwrap(),
                |d| device.create_pipeline_state(d),
            )
            .unwrap();

        assert_eq!(first, again);
        assert_ne!(first, skybox);
        assert_eq!(device.journal().borrow().pipeline_states_created, 2);
        assert_eq!(cache.stats().hits, 1);
    }
}
