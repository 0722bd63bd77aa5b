//! 天空盒材质：单张立方体贴图，关闭深度测试，不剔除

use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use super::Material;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::device::{GpuDescriptor, PipelineStateId, RootSignatureId};
use crate::renderer::buffer::ConstantBuffer;
use crate::renderer::pipeline::{CullMode, DepthStencilState, PipelineStateBuilder};
use crate::renderer::resource_manager::ResourceManager;
use crate::renderer::root_signature::RootSignatureDesc;
use crate::renderer::shader::names;
use crate::renderer::texture::Texture;

/// 着色器中的 `SkyboxData`（32 字节）
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SkyboxData {
    pub tint: [f32; 4],
    pub has_texture: u32,
    pub _pad: [u32; 3],
}

#[derive(Debug)]
pub struct SkyboxMaterial {
    name: String,
    cube_map: Rc<Texture>,
    constants: ConstantBuffer,
    root_signature: RootSignatureId,
    root_signature_desc: RootSignatureDesc,
    pipeline_state: PipelineStateId,
}

impl SkyboxMaterial {
    pub fn new(resources: &mut ResourceManager, name: &str, cube_map: Rc<Texture>) -> Result<Self> {
        if !cube_map.is_cube_map() {
            return Err(GraphicsError::ResourceCreationFailure(format!(
                "Skybox '{}' needs a cube map, '{}' is two-dimensional",
                name,
                cube_map.resource().name()
            ))
            .into());
        }

        let root_signature_desc = RootSignatureDesc::default_layout(1);
        let root_signature = resources.create_root_signature(&root_signature_desc)?;
        let vs = resources.shader(names::SKYBOX_VS)?;
        let ps = resources.shader(names::SKYBOX_PS)?;
        let desc = PipelineStateBuilder::configure_from_default(vs, ps, root_signature)
            .with_depth_stencil(DepthStencilState::disabled())
            .with_cull_mode(CullMode::None)
            .build()?;
        let pipeline_state = resources.create_pipeline_state(&desc)?;

        let mut constants = resources.create_constant_buffer(name, std::mem::size_of::<SkyboxData>() as u64)?;
        constants.update(&SkyboxData {
            tint: [1.0; 4],
            has_texture: 1,
            _pad: [0; 3],
        })?;

        Ok(Self {
            name: name.to_string(),
            cube_map,
            constants,
            root_signature,
            root_signature_desc,
            pipeline_state,
        })
    }

    pub fn cube_map(&self) -> &Rc<Texture> {
        &self.cube_map
    }
}

impl Material for SkyboxMaterial {
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
        std::slice::from_ref(&self.cube_map)
    }

    fn descriptor_table(&self) -> Option<GpuDescriptor> {
        self.cube_map.srv().gpu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::texture_loader::cube_from_faces;
    use crate::assets::ImageData;
    use crate::core::config::RendererConfig;
    use crate::gfx::headless::HeadlessDevice;
    use crate::renderer::material::BasicMaterial;

    #[test]
    fn test_rejects_flat_texture() {
        let mut rm = ResourceManager::new(Box::new(HeadlessDevice::new()), &RendererConfig::default()).unwrap();
        let flat = rm
            .create_texture("Flat", &ImageData::solid_color(2, 2, [0; 4]).unwrap())
            .unwrap();
        assert!(SkyboxMaterial::new(&mut rm, "Sky", flat).is_err());
    }

    #[test]
    fn test_skybox_uses_its_own_pipeline() {
        let mut rm = ResourceManager::new(Box::new(HeadlessDevice::new()), &RendererConfig::default()).unwrap();
        let faces = (0..6).map(|_| ImageData::solid_color(4, 4, [40; 4]).unwrap()).collect();
        let cube = rm.create_cube_map("Sky", &cube_from_faces(faces).unwrap()).unwrap();

        let sky = SkyboxMaterial::new(&mut rm, "Sky", cube.clone()).unwrap();
        let albedo = BasicMaterial::new(&mut rm, "Basic", [1.0; 4], Some(cube)).unwrap();

        // 同样的根签名布局，不同的管线
        assert_eq!(sky.root_signature(), albedo.root_signature());
        assert_ne!(sky.pipeline_state(), albedo.pipeline_state());
        assert_eq!(sky.textures().len(), 1);
    }
}
