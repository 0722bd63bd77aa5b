//! 根签名描述与构建器
//!
//! 默认布局：
//!
//! | 索引 | 参数              | 用途     |
//! |------|-------------------|----------|
//! | 0    | CBV b0            | 光源     |
//! | 1    | CBV b1            | 物体常量 |
//! | 2    | CBV b2            | 材质常量 |
//! | 3    | SRV 表 t0..tN-1   | 纹理     |
//!
//! 以及一个静态线性 wrap 采样器 s0。

use super::cache::ObjectCache;
use crate::gfx::device::RootSignatureId;

/// 光源常量的根参数索引
pub const LIGHT_ROOT_INDEX: u32 = 0;
/// 物体常量的根参数索引
pub const OBJECT_ROOT_INDEX: u32 = 1;
/// 材质常量的根参数索引
pub const MATERIAL_ROOT_INDEX: u32 = 2;
/// 纹理描述符表的根参数索引
pub const TEXTURE_TABLE_ROOT_INDEX: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderVisibility {
    All,
    Vertex,
    Pixel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorRangeType {
    Srv,
    Cbv,
    Uav,
}

/// 描述符表中的一段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRangeDesc {
    pub range_type: DescriptorRangeType,
    pub count: u32,
    pub base_register: u32,
    pub space: u32,
}

/// 根参数
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RootParameter {
    Cbv {
        register: u32,
        space: u32,
        visibility: ShaderVisibility,
    },
    DescriptorTable {
        ranges: Vec<DescriptorRangeDesc>,
        visibility: ShaderVisibility,
    },
    Constants {
        register: u32,
        space: u32,
        count: u32,
        visibility: ShaderVisibility,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Point,
    Linear,
    Anisotropic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Clamp,
    Mirror,
}

/// 静态采样器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StaticSampler {
    pub register: u32,
    pub filter: Filter,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub max_anisotropy: u32,
    pub visibility: ShaderVisibility,
}

impl StaticSampler {
    /// s0 线性 wrap
    pub fn linear_wrap(register: u32) -> Self {
        Self {
            register,
            filter: Filter::Linear,
            address_u: AddressMode::Wrap,
            address_v: AddressMode::Wrap,
            address_w: AddressMode::Wrap,
            max_anisotropy: 1,
            visibility: ShaderVisibility::Pixel,
        }
    }
}

/// 根签名标志位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RootSignatureFlags(u32);

impl RootSignatureFlags {
    pub const NONE: Self = Self(0);
    pub const ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT: Self = Self(0x1);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for RootSignatureFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// 根签名描述；可比较、可哈希，作为缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RootSignatureDesc {
    pub parameters: Vec<RootParameter>,
    pub static_samplers: Vec<StaticSampler>,
    pub flags: RootSignatureFlags,
}

impl RootSignatureDesc {
    /// 默认布局；`texture_count` 为 0 时不含描述符表
    pub fn default_layout(texture_count: u32) -> Self {
        let mut builder = RootSignatureBuilder::new()
            .with_cbv(0, ShaderVisibility::All)
            .with_cbv(1, ShaderVisibility::All)
            .with_cbv(2, ShaderVisibility::Pixel);
        if texture_count > 0 {
            builder = builder.with_srv_table(0, texture_count, ShaderVisibility::Pixel);
        }
        builder
            .with_static_sampler(StaticSampler::linear_wrap(0))
            .with_flags(RootSignatureFlags::ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT)
            .build()
    }

    /// 描述符表中的描述符总数
    pub fn table_descriptor_count(&self, root_index: u32) -> Option<u32> {
        match self.parameters.get(root_index as usize) {
            Some(RootParameter::DescriptorTable { ranges, .. }) => Some(ranges.iter().map(|r| r.count).sum()),
            _ => None,
        }
    }
}

/// 不可变根签名构建器
///
/// 每个配置方法返回新的构建器，原值不变。
#[derive(Debug, Clone, Default)]
pub struct RootSignatureBuilder {
    desc: RootSignatureDesc,
}

impl RootSignatureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_parameter(&self, parameter: RootParameter) -> Self {
        let mut next = self.clone();
        next.desc.parameters.push(parameter);
        next
    }

    pub fn with_cbv(&self, register: u32, visibility: ShaderVisibility) -> Self {
        self.with_parameter(RootParameter::Cbv {
            register,
            space: 0,
            visibility,
        })
    }

    pub fn with_constants(&self, register: u32, count: u32, visibility: ShaderVisibility) -> Self {
        self.with_parameter(RootParameter::Constants {
            register,
            space: 0,
            count,
            visibility,
        })
    }

    /// 一段连续 SRV 组成的描述符表
    pub fn with_srv_table(&self, base_register: u32, count: u32, visibility: ShaderVisibility) -> Self {
        self.with_descriptor_table(
            vec![DescriptorRangeDesc {
                range_type: DescriptorRangeType::Srv,
                count,
                base_register,
                space: 0,
            }],
            visibility,
        )
    }

    pub fn with_descriptor_table(&self, ranges: Vec<DescriptorRangeDesc>, visibility: ShaderVisibility) -> Self {
        self.with_parameter(RootParameter::DescriptorTable { ranges, visibility })
    }

    pub fn with_static_sampler(&self, sampler: StaticSampler) -> Self {
        let mut next = self.clone();
        next.desc.static_samplers.push(sampler);
        next
    }

    pub fn with_flags(&self, flags: RootSignatureFlags) -> Self {
        let mut next = self.clone();
        next.desc.flags = flags;
        next
    }

    pub fn build(&self) -> RootSignatureDesc {
        self.desc.clone()
    }
}

/// 根签名缓存
pub type RootSignatureCache = ObjectCache<RootSignatureDesc, RootSignatureId>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::device::RenderDevice;
    use crate::gfx::headless::HeadlessDevice;

    #[test]
    fn test_builder_is_immutable() {
        let base = RootSignatureBuilder::new().with_cbv(0, ShaderVisibility::All);
        let extended = base.with_cbv(1, ShaderVisibility::All);

        assert_eq!(base.build().parameters.len(), 1);
        assert_eq!(extended.build().parameters.len(), 2);
    }

    #[test]
    fn test_default_layout() {
        let untextured = RootSignatureDesc::default_layout(0);
        assert_eq!(untextured.parameters.len(), 3);
        assert!(untextured
            .flags
            .contains(RootSignatureFlags::ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT));
        assert_eq!(untextured.static_samplers, vec![StaticSampler::linear_wrap(0)]);

        let pbr = RootSignatureDesc::default_layout(5);
        assert_eq!(pbr.table_descriptor_count(TEXTURE_TABLE_ROOT_INDEX), Some(5));
        assert_eq!(pbr.table_descriptor_count(MATERIAL_ROOT_INDEX), None);
    }

    #[test]
    fn test_cache_deduplicates_equal_descriptors() {
        let mut device = HeadlessDevice::new();
        let mut cache = RootSignatureCache::new("RootSignature");

        let a = cache
            .get_or_create(&RootSignatureDesc::default_layout(1), |d| device.create_root_signature(d))
            .unwrap();
        let b = cache
            .get_or_create(&RootSignatureDesc::default_layout(1), |d| device.create_root_signature(d))
            .unwrap();
        let c = cache
            .get_or_create(&RootSignatureDesc::default_layout(2), |d| device.create_root_signature(d))
            .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(device.journal().borrow().root_signatures_created, 2);
    }
}
