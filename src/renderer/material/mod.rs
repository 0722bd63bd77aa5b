//! 材质
//!
//! 材质引用缓存中的管线状态与根签名（只持有 id），拥有自己的常量缓冲区，
//! 并共享 0..N 个纹理。多个渲染对象通过 `Rc<dyn Material>` 共享同一材质。
//!
//! 绑定顺序必须与根签名声明的参数顺序一致：材质常量在根参数 2，
//! 有纹理时描述符表在根参数 3。

mod basic;
mod pbr;
mod skybox;

pub use basic::{BasicMaterial, MaterialData};
pub use pbr::{PbrMaterial, PbrMaterialData, PbrParameters, PbrTextures};
pub use skybox::{SkyboxData, SkyboxMaterial};

use std::rc::Rc;

use super::buffer::ConstantBuffer;
use super::command::{Command, CommandList};
use super::root_signature::{RootParameter, RootSignatureDesc, MATERIAL_ROOT_INDEX, TEXTURE_TABLE_ROOT_INDEX};
use super::texture::Texture;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::device::{GpuDescriptor, PipelineStateId, RootSignatureId};

/// 材质接口
pub trait Material: std::fmt::Debug {
    fn name(&self) -> &str;

    fn pipeline_state(&self) -> PipelineStateId;

    fn root_signature(&self) -> RootSignatureId;

    /// 创建根签名时使用的描述
    fn root_signature_desc(&self) -> &RootSignatureDesc;

    fn constant_buffer(&self) -> &ConstantBuffer;

    /// 按描述符表顺序排列的纹理
    fn textures(&self) -> &[Rc<Texture>];

    /// 纹理描述符表的起始 GPU 地址；无纹理时为 `None`
    fn descriptor_table(&self) -> Option<GpuDescriptor>;

    /// 记录材质自身的绑定
    fn bind(&self, list: &mut CommandList) -> Result<()> {
        list.set_root_cbv(MATERIAL_ROOT_INDEX, self.constant_buffer().gpu_address())?;
        if let Some(table) = self.descriptor_table() {
            list.set_root_descriptor_table(TEXTURE_TABLE_ROOT_INDEX, table)?;
        }
        Ok(())
    }

    /// 所有纹理都已上传完成
    fn is_ready(&self) -> bool {
        self.textures().iter().all(|t| t.is_ready())
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.textures().iter().find(|t| !t.is_ready()) {
            Some(texture) => Err(GraphicsError::ResourceNotReady(format!(
                "Texture '{}' of material '{}' is not uploaded",
                texture.resource().name(),
                self.name()
            ))
            .into()),
            None => Ok(()),
        }
    }
}

/// 检查记录的根参数绑定
///
/// 每个绑定的索引必须存在于根签名中且类型一致，并按根参数顺序严格递增。
pub fn verify_binding_order(desc: &RootSignatureDesc, commands: &[Command]) -> Result<()> {
    let mut last: Option<u32> = None;

    for command in commands {
        let (index, is_table) = match command {
            Command::SetGraphicsRootConstantBufferView { root_index, .. } => (*root_index, false),
            Command::SetGraphicsRootDescriptorTable { root_index, .. } => (*root_index, true),
            Command::SetGraphicsRootSignature(_) => {
                last = None;
                continue;
            }
            _ => continue,
        };

        let matches = match desc.parameters.get(index as usize) {
            Some(RootParameter::Cbv { .. }) => !is_table,
            Some(RootParameter::DescriptorTable { .. }) => is_table,
            Some(RootParameter::Constants { .. }) | None => false,
        };
        if !matches {
            return Err(GraphicsError::CommandExecution(format!(
                "Root parameter {} bound with the wrong kind or not declared",
                index
            ))
            .into());
        }

        if let Some(previous) = last {
            if index <= previous {
                return Err(GraphicsError::CommandExecution(format!(
                    "Root parameter {} bound after {}",
                    index, previous
                ))
                .into());
            }
        }
        last = Some(index);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_binding_order() {
        let desc = RootSignatureDesc::default_layout(1);
        let cbv = |root_index| Command::SetGraphicsRootConstantBufferView { root_index, address: 0 };
        let table = Command::SetGraphicsRootDescriptorTable {
            root_index: 3,
            base: GpuDescriptor(0),
        };

        assert!(verify_binding_order(&desc, &[cbv(0), cbv(1), cbv(2), table.clone()]).is_ok());
        assert!(verify_binding_order(&desc, &[cbv(0), cbv(2), cbv(1)]).is_err());
        // 表绑定到 CBV 参数上
        assert!(verify_binding_order(
            &desc,
            &[Command::SetGraphicsRootDescriptorTable {
                root_index: 2,
                base: GpuDescriptor(0)
            }]
        )
        .is_err());
        // 无纹理的布局没有参数 3
        assert!(verify_binding_order(&RootSignatureDesc::default_layout(0), &[table]).is_err());
    }
}
