//! 基础材质：可选的漫反射贴图，没有贴图时使用纯色

use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use super::Material;
use crate::core::error::Result;
use crate::gfx::device::{GpuDescriptor, PipelineStateId, RootSignatureId};
use crate::renderer::buffer::ConstantBuffer;
use crate::renderer::pipeline::PipelineStateBuilder;
use crate::renderer::resource_manager::ResourceManager;
use crate::renderer::root_signature::RootSignatureDesc;
use crate::renderer::shader::names;
use crate::renderer::texture::Texture;

/// 着色器中的 `MaterialData`（32 字节）
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct MaterialData {
    pub base_color: [f32; 4],
    pub has_texture: u32,
    pub _pad: [u32; 3],
}

#[derive(Debug)]
pub struct BasicMaterial {
    name: String,
    data: MaterialData,
    albedo: Option<Rc<Texture>>,
    constants: ConstantBuffer,
    root_signature: RootSignatureId,
    root_signature_desc: RootSignatureDesc,
    pipeline_state: PipelineStateId,
}

impl BasicMaterial {
    pub fn new(
        resources: &mut ResourceManager,
        name: &str,
        base_color: [f32; 4],
        albedo: Option<Rc<Texture>>,
    ) -> Result<Self> {
        let textured = albedo.is_some();
        let root_signature_desc = RootSignatureDesc::default_layout(if textured { 1 } else { 0 });
        let root_signature = resources.create_root_signature(&root_signature_desc)?;

        let vs = resources.shader(names::BASIC_VS)?;
        let ps = resources.shader(if textured {
            names::BASIC_PS
        } else {
            names::BASIC_PS_UNTEXTURED
        })?;
        let pipeline_state =
            resources.create_pipeline_state(&PipelineStateBuilder::configure_from_default(vs, ps, root_signature).build()?)?;

        let data = MaterialData {
            base_color,
            has_texture: textured as u32,
            _pad: [0; 3],
        };
        let mut constants = resources.create_constant_buffer(name, std::mem::size_of::<MaterialData>() as u64)?;
        constants.update(&data)?;

        Ok(Self {
            name: name.to_string(),
            data,
            albedo,
            constants,
            root_signature,
            root_signature_desc,
            pipeline_state,
        })
    }

    pub fn base_color(&self) -> [f32; 4] {
        self.data.base_color
    }

    /// 修改颜色；只能在上一帧的 GPU 工作完成后调用
    pub fn set_base_color(&mut self, base_color: [f32; 4]) -> Result<()> {
        self.data.base_color = base_color;
        self.constants.update(&self.data)
    }
}

impl Material for BasicMaterial {
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
        self.albedo.as_slice()
    }

    fn descriptor_table(&self) -> Option<GpuDescriptor> {
        self.albedo.as_ref().and_then(|t| t.srv().gpu())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::ImageData;
    use crate::core::config::RendererConfig;
    use crate::gfx::headless::HeadlessDevice;
    use crate::renderer::command::{Command, CommandList};
    use crate::renderer::material::verify_binding_order;

    fn manager() -> ResourceManager {
        ResourceManager::new(Box::new(HeadlessDevice::new()), &RendererConfig::default()).unwrap()
    }

    #[test]
    fn test_material_data_layout() {
        assert_eq!(std::mem::size_of::<MaterialData>(), 32);
    }

    #[test]
    fn test_untextured_binds_only_constants() {
        let mut rm = manager();
        let material = BasicMaterial::new(&mut rm, "Red", [1.0, 0.0, 0.0, 1.0], None).unwrap();
        assert!(material.is_ready());

        let mut list = CommandList::new();
        list.reset().unwrap();
        material.bind(&mut list).unwrap();

        assert_eq!(
            list.commands(),
            &[Command::SetGraphicsRootConstantBufferView {
                root_index: 2,
                address: material.constant_buffer().gpu_address(),
            }]
        );
        verify_binding_order(material.root_signature_desc(), list.commands()).unwrap();

        let bytes = material.constant_buffer().read_bytes(0, 32).unwrap();
        let data: MaterialData = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(data.has_texture, 0);
        assert_eq!(data.base_color, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_textured_material_binds_table_and_waits_for_upload() {
        let mut rm = manager();
        let texture = rm
            .create_texture("Albedo", &ImageData::solid_color(4, 4, [200; 4]).unwrap())
            .unwrap();
        let material = BasicMaterial::new(&mut rm, "Textured", [1.0; 4], Some(texture.clone())).unwrap();

        assert!(!material.is_ready());
        assert!(material.ensure_ready().is_err());
        rm.upload_all_pending().unwrap();
        assert!(material.is_ready());

        let mut list = CommandList::new();
        list.reset().unwrap();
        material.bind(&mut list).unwrap();
        assert_eq!(list.commands().len(), 2);
        assert_eq!(
            list.commands()[1],
            Command::SetGraphicsRootDescriptorTable {
                root_index: 3,
                base: texture.srv().gpu().unwrap(),
            }
        );
    }

    #[test]
    fn test_same_configuration_shares_pipeline() {
        let mut rm = manager();
        let a = BasicMaterial::new(&mut rm, "A", [1.0; 4], None).unwrap();
        let b = BasicMaterial::new(&mut rm, "B", [0.5; 4], None).unwrap();
        assert_eq!(a.pipeline_state(), b.pipeline_state());
        assert_eq!(a.root_signature(), b.root_signature());
    }
}
