//! PBR 材质
//!
//! 五张贴图占用渲染通道堆中一段连续的 5 个槽位，顺序固定为
//! albedo、normal、metallic、roughness、AO，整体绑定为一个描述符表。

use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use super::Material;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::device::{GpuDescriptor, PipelineStateId, RootSignatureId};
use crate::renderer::buffer::ConstantBuffer;
use crate::renderer::descriptor::DescriptorRange;
use crate::renderer::pipeline::PipelineStateBuilder;
use crate::renderer::resource::{Release, ReleaseQueue};
use crate::renderer::resource_manager::ResourceManager;
use crate::renderer::root_signature::RootSignatureDesc;
use crate::renderer::shader::names;
use crate::renderer::texture::Texture;

/// PBR 贴图数量
pub const PBR_TEXTURE_COUNT: u32 = 5;

/// 着色器中的 `PbrMaterialData`（32 字节）
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PbrMaterialData {
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub ao: f32,
    pub has_texture: u32,
}

/// 标量参数；有贴图时与贴图采样值相乘
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PbrParameters {
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub ao: f32,
}

impl Default for PbrParameters {
    fn default() -> Self {
        Self {
            base_color: [1.0; 4],
            metallic: 0.0,
            roughness: 0.5,
            ao: 1.0,
        }
    }
}

/// 一组 PBR 贴图
#[derive(Debug, Clone)]
pub struct PbrTextures {
    pub albedo: Rc<Texture>,
    pub normal: Rc<Texture>,
    pub metallic: Rc<Texture>,
    pub roughness: Rc<Texture>,
    pub ao: Rc<Texture>,
}

impl PbrTextures {
    /// 描述符表顺序
    fn into_ordered(self) -> Vec<Rc<Texture>> {
        vec![self.albedo, self.normal, self.metallic, self.roughness, self.ao]
    }
}

#[derive(Debug)]
pub struct PbrMaterial {
    name: String,
    data: PbrMaterialData,
    textures: Vec<Rc<Texture>>,
    table: Option<DescriptorRange>,
    constants: ConstantBuffer,
    root_signature: RootSignatureId,
    root_signature_desc: RootSignatureDesc,
    pipeline_state: PipelineStateId,
    releases: ReleaseQueue,
}

impl PbrMaterial {
    pub fn new(
        resources: &mut ResourceManager,
        name: &str,
        parameters: PbrParameters,
        textures: Option<PbrTextures>,
    ) -> Result<Self> {
        let textures = textures.map(PbrTextures::into_ordered).unwrap_or_default();
        let textured = !textures.is_empty();

        let root_signature_desc = RootSignatureDesc::default_layout(if textured { PBR_TEXTURE_COUNT } else { 0 });
        let root_signature = resources.create_root_signature(&root_signature_desc)?;
        let vs = resources.shader(names::PBR_VS)?;
        let ps = resources.shader(if textured {
            names::PBR_PS
        } else {
            names::PBR_PS_UNTEXTURED
        })?;
        let pipeline_state =
            resources.create_pipeline_state(&PipelineStateBuilder::configure_from_default(vs, ps, root_signature).build()?)?;

        let data = PbrMaterialData {
            base_color: parameters.base_color,
            metallic: parameters.metallic,
            roughness: parameters.roughness,
            ao: parameters.ao,
            has_texture: textured as u32,
        };
        let mut constants = resources.create_constant_buffer(name, std::mem::size_of::<PbrMaterialData>() as u64)?;
        constants.update(&data)?;

        let table = if textured {
            Some(Self::write_table(resources, &textures)?)
        } else {
            None
        };

        Ok(Self {
            name: name.to_string(),
            data,
            textures,
            table,
            constants,
            root_signature,
            root_signature_desc,
            pipeline_state,
            releases: resources.releases().clone(),
        })
    }

    /// 分配连续槽位并把每张贴图的 SRV 写入对应位置
    fn write_table(resources: &mut ResourceManager, textures: &[Rc<Texture>]) -> Result<DescriptorRange> {
        let range = resources.allocate_descriptor_range(PBR_TEXTURE_COUNT)?;
        for (index, texture) in textures.iter().enumerate() {
            let written = resources.device_mut().create_shader_resource_view(
                texture.resource().id(),
                texture.srv_desc(),
                range.cpu(index as u32),
            );
            if let Err(e) = written {
                resources.releases().push(Release::Range(range));
                return Err(e);
            }
        }
        if range.gpu_base().is_none() {
            resources.releases().push(Release::Range(range));
            return Err(GraphicsError::ResourceCreationFailure(
                "PBR descriptor table is not in a shader-visible heap".to_string(),
            )
            .into());
        }
        Ok(range)
    }

    pub fn parameters(&self) -> PbrParameters {
        PbrParameters {
            base_color: self.data.base_color,
            metallic: self.data.metallic,
            roughness: self.data.roughness,
            ao: self.data.ao,
        }
    }

    /// 修改标量参数；只能在上一帧的 GPU 工作完成后调用
    pub fn set_parameters(&mut self, parameters: PbrParameters) -> Result<()> {
        self.data.base_color = parameters.base_color;
        self.data.metallic = parameters.metallic;
        self.data.roughness = parameters.roughness;
        self.data.ao = parameters.ao;
        self.constants.update(&self.data)
    }

    pub fn descriptor_range(&self) -> Option<DescriptorRange> {
        self.table
    }
}

impl Material for PbrMaterial {
    fn name(&self) -> &str {
        &self.name
    }

    fn pipeline_state(&self) -> PipelineStateId {
        self.pipeline_state
    }

    fn root_signature(&self) -> RootSignatureId {
        self.root_signature
    }

    fn root_signature_desc(&self) -> &RootSignatureDesc {
        &self.root_signature_desc
    }

    fn constant_buffer(&self) -> &ConstantBuffer {
        &self.constants
    }

    fn textures(&self) -> &[Rc<Texture>] {
        &self.textures
    }

    fn descriptor_table(&self) -> Option<GpuDescriptor> {
        self.table.and_then(|range| range.gpu_base())
    }
}

impl Drop for PbrMaterial {
    fn drop(&mut self) {
        if let Some(range) = self.table.take() {
            self.releases.push(Release::Range(range));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::ImageData;
    use crate::core::config::RendererConfig;
    use crate::gfx::device::SrvDimension;
    use crate::gfx::headless::{HeadlessDevice, ViewKind};
    use crate::renderer::command::CommandList;
    use crate::renderer::root_signature::TEXTURE_TABLE_ROOT_INDEX;

    #[test]
    fn test_pbr_data_layout() {
        assert_eq!(std::mem::size_of::<PbrMaterialData>(), 32);
    }

    #[test]
    fn test_five_maps_in_one_contiguous_table() {
        let device = HeadlessDevice::new();
        let journal = device.journal();
        let mut rm = ResourceManager::new(Box::new(device), &RendererConfig::default()).unwrap();

        let mut map = |name: &str, value: u8| {
            rm.create_texture(name, &ImageData::solid_color(2, 2, [value; 4]).unwrap())
                .unwrap()
        };
        let textures = PbrTextures {
            albedo: map("Albedo", 1),
            normal: map("Normal", 2),
            metallic: map("Metallic", 3),
            roughness: map("Roughness", 4),
            ao: map("Ao", 5),
        };
        let expected: Vec<_> = textures
            .clone()
            .into_ordered()
            .iter()
            .map(|t| t.resource().id())
            .collect();

        let material = PbrMaterial::new(&mut rm, "Metal", PbrParameters::default(), Some(textures)).unwrap();
        let range = material.descriptor_range().unwrap();
        assert_eq!(range.len(), 5);

        // 表中第 i 个槽位指向第 i 张贴图
        let journal = journal.borrow();
        for (index, id) in expected.iter().enumerate() {
            let dest = range.cpu(index as u32);
            assert!(journal.views.iter().any(|v| v.dest == dest
                && v.resource == *id
                && v.kind == ViewKind::ShaderResource(SrvDimension::Texture2D)));
        }
        drop(journal);

        let mut list = CommandList::new();
        list.reset().unwrap();
        material.bind(&mut list).unwrap();
        assert_eq!(
            list.commands()[1],
            crate::renderer::command::Command::SetGraphicsRootDescriptorTable {
                root_index: TEXTURE_TABLE_ROOT_INDEX,
                base: range.gpu_base().unwrap(),
            }
        );
        assert_eq!(material.root_signature_desc().table_descriptor_count(3), Some(5));
    }

    #[test]
    fn test_drop_releases_table() {
        let mut rm = ResourceManager::new(Box::new(HeadlessDevice::new()), &RendererConfig::default()).unwrap();
        let image = ImageData::solid_color(1, 1, [0; 4]).unwrap();
        let texture = rm.create_texture("One", &image).unwrap();
        let textures = PbrTextures {
            albedo: texture.clone(),
            normal: texture.clone(),
            metallic: texture.clone(),
            roughness: texture.clone(),
            ao: texture,
        };
        let material = PbrMaterial::new(&mut rm, "Shared", PbrParameters::default(), Some(textures)).unwrap();
        let used = rm.heaps().render_pass.allocated_count();

        drop(material);
        rm.wait_idle().unwrap();
        assert_eq!(rm.heaps().render_pass.allocated_count(), used - 5);
    }

    #[test]
    fn test_set_parameters_updates_constants() {
        let mut rm = ResourceManager::new(Box::new(HeadlessDevice::new()), &RendererConfig::default()).unwrap();
        let mut material = PbrMaterial::new(&mut rm, "Plastic", PbrParameters::default(), None).unwrap();
        assert!(material.descriptor_table().is_none());

        material
            .set_parameters(PbrParameters {
                roughness: 0.9,
                ..PbrParameters::default()
            })
            .unwrap();
        let data: PbrMaterialData =
            bytemuck::pod_read_unaligned(&material.constant_buffer().read_bytes(0, 32).unwrap());
        assert_eq!(data.roughness, 0.9);
        assert_eq!(data.has_texture, 0);
    }
}
