//! 渲染对象
//!
//! 一个网格的顶点/索引缓冲区、每个对象自己的常量缓冲区、共享的材质以及变换。
//! 常量在每次绘制前由 [`RenderObject::update_constants`] 刷新。

use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use super::buffer::{ConstantBuffer, IndexBuffer, VertexBuffer};
use super::material::Material;
use super::resource_manager::ResourceManager;
use crate::component::{Camera, Transform};
use crate::core::error::{EngineError, Result};
use crate::geometry::MeshData;
use crate::gfx::device::ResourceState;
use crate::math::{matrix, Matrix4};

/// 着色器中的 `ObjectConstants`（464 字节），矩阵按列主序
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectConstants {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub mvp: [[f32; 4]; 4],
    pub inv_view: [[f32; 4]; 4],
    pub inv_projection: [[f32; 4]; 4],
    pub camera_position: [f32; 3],
    pub _pad: f32,
}

impl ObjectConstants {
    pub fn new(model: &Matrix4, camera: &Camera) -> Self {
        let view = camera.view_matrix();
        let projection = camera.proj_matrix();
        let inverse = |m: &Matrix4| m.try_inverse().unwrap_or_else(Matrix4::identity);

        Self {
            model: matrix::to_gpu(model),
            normal: matrix::to_gpu(&matrix::normal(model)),
            view: matrix::to_gpu(&view),
            projection: matrix::to_gpu(&projection),
            mvp: matrix::to_gpu(&(projection * view * model)),
            inv_view: matrix::to_gpu(&inverse(&view)),
            inv_projection: matrix::to_gpu(&inverse(&projection)),
            camera_position: camera.position().into(),
            _pad: 0.0,
        }
    }
}

/// 渲染对象
#[derive(Debug)]
pub struct RenderObject {
    name: String,
    vertex_buffer: VertexBuffer,
    index_buffer: IndexBuffer,
    constants: ConstantBuffer,
    material: Rc<dyn Material>,
    pub transform: Transform,
}

impl RenderObject {
    /// 由网格创建；顶点数不超过 65536 时使用 16 位索引
    pub fn new(resources: &mut ResourceManager, name: &str, mesh: &MeshData, material: Rc<dyn Material>) -> Result<Self> {
        mesh.validate()
            .map_err(|e| EngineError::Runtime(format!("Mesh '{}' is invalid: {}", name, e)))?;

        let vertex_buffer = resources.create_vertex_buffer(&format!("{}.Vertices", name), &mesh.vertices)?;
        let index_name = format!("{}.Indices", name);
        let index_buffer = if mesh.fits_u16_indices() {
            let narrow: Vec<u16> = mesh.indices.iter().map(|&i| i as u16).collect();
            resources.create_index_buffer_u16(&index_name, &narrow)?
        } else {
            resources.create_index_buffer(&index_name, &mesh.indices)?
        };
        let constants = resources.create_constant_buffer(
            &format!("{}.Constants", name),
            std::mem::size_of::<ObjectConstants>() as u64,
        )?;

        tracing::debug!(
            object = name,
            vertices = mesh.vertex_count(),
            indices = mesh.index_count(),
            material = material.name(),
            "Render object created"
        );

        Ok(Self {
            name: name.to_string(),
            vertex_buffer,
            index_buffer,
            constants,
            material,
            transform: Transform::new(),
        })
    }

    /// 以单位立方体包围相机的天空盒
    pub fn skybox(resources: &mut ResourceManager, material: Rc<dyn Material>) -> Result<Self> {
        Self::new(resources, "Skybox", &MeshData::unit_cube(), material)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex_buffer(&self) -> &VertexBuffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &IndexBuffer {
        &self.index_buffer
    }

    pub fn constant_buffer(&self) -> &ConstantBuffer {
        &self.constants
    }

    pub fn material(&self) -> &Rc<dyn Material> {
        &self.material
    }

    pub fn set_material(&mut self, material: Rc<dyn Material>) {
        self.material = material;
    }

    /// 绘制前检查：缓冲区已上传并处于绘制所需状态，材质贴图已就绪
    pub fn ensure_ready(&self) -> Result<()> {
        self.vertex_buffer
            .resource()
            .ensure_usable(ResourceState::VertexAndConstantBuffer)?;
        self.index_buffer.resource().ensure_usable(ResourceState::IndexBuffer)?;
        self.material.ensure_ready()
    }

    /// 写入本帧的物体常量
    pub fn update_constants(&mut self, camera: &Camera) -> Result<()> {
        let constants = ObjectConstants::new(&self.transform.model_matrix(), camera);
        self.constants.update(&constants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RendererConfig;
    use crate::gfx::headless::HeadlessDevice;
    use crate::math::{Vector3, Vector4};
    use crate::renderer::buffer::IndexFormat;
    use crate::renderer::material::BasicMaterial;

    #[test]
    fn test_object_constants_layout() {
        assert_eq!(std::mem::size_of::<ObjectConstants>(), 464);
    }

    #[test]
    fn test_constants_contents() {
        let camera = Camera::default();
        let model = Matrix4::new_translation(&Vector3::new(0.0, 1.0, 0.0));
        let constants = ObjectConstants::new(&model, &camera);

        assert_eq!(constants.camera_position, [0.0, 0.0, -3.0]);
        let mvp: Matrix4 = constants.mvp.into();
        let expected = camera.proj_matrix() * camera.view_matrix() * model;
        assert!((mvp - expected).norm() < 1e-5);

        // view * inv_view = I
        let view: Matrix4 = constants.view.into();
        let inv_view: Matrix4 = constants.inv_view.into();
        assert!((view * inv_view - Matrix4::identity()).norm() < 1e-4);

        // 平移不影响法线矩阵
        let normal: Matrix4 = constants.normal.into();
        let n = normal * Vector4::new(0.0, 1.0, 0.0, 0.0);
        assert!((n.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cube_object_uses_narrow_indices() {
        let mut rm = ResourceManager::new(Box::new(HeadlessDevice::new()), &RendererConfig::default()).unwrap();
        let material = Rc::new(BasicMaterial::new(&mut rm, "Grey", [0.5; 4], None).unwrap());
        let cube = RenderObject::new(&mut rm, "Cube", &MeshData::unit_cube(), material).unwrap();

        assert_eq!(cube.index_buffer().index_format(), IndexFormat::U16);
        assert_eq!(cube.index_buffer().index_count(), 36);
        assert_eq!(cube.vertex_buffer().vertex_count(), 8);
        assert!(cube.ensure_ready().is_err());

        rm.upload_all_pending().unwrap();
        cube.ensure_ready().unwrap();
    }
}
