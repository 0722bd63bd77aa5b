//! CPU 侧网格数据
//!
//! `MeshData` 只是顶点与索引数组的持有者，不拥有任何 GPU 资源；
//! 由 `ResourceManager` 创建顶点/索引缓冲区后上传。

use super::vertex::Vertex;
use crate::math::geometry::{compute_tangent_space, reconstruct_normals};

/// 子网格：对应 OBJ 中的一个对象或一个材质批次
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subset {
    pub id: u32,
    pub vertex_start: u32,
    pub vertex_count: u32,
    /// 起始三角形
    pub face_start: u32,
    pub face_count: u32,
}

impl Subset {
    #[inline]
    pub fn new(id: u32, vertex_start: u32, vertex_count: u32, face_start: u32, face_count: u32) -> Self {
        Self {
            id,
            vertex_start,
            vertex_count,
            face_start,
            face_count,
        }
    }

    /// 起始索引（三角形 * 3）
    #[inline]
    pub fn index_start(&self) -> u32 {
        self.face_start * 3
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.face_count * 3
    }
}

/// 不可变的网格数据
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    /// 32 位三角形列表索引，左手坐标系下顺时针为正面
    pub indices: Vec<u32>,
    pub subsets: Vec<Subset>,
    pub name: Option<String>,
}

impl MeshData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// 索引能否用 16 位表示
    pub fn fits_u16_indices(&self) -> bool {
        self.vertices.len() <= u16::MAX as usize + 1
    }

    /// 验证网格数据的有效性
    ///
    /// 检查索引数量为 3 的倍数、索引不越界、子网格范围有效。
    pub fn validate(&self) -> Result<(), String> {
        if self.indices.len() % 3 != 0 {
            return Err(format!(
                "Index count must be a multiple of 3, got {}",
                self.indices.len()
            ));
        }

        let vertex_count = self.vertices.len() as u32;
        if let Some((i, &index)) = self.indices.iter().enumerate().find(|&(_, &idx)| idx >= vertex_count) {
            return Err(format!(
                "Index {} at position {} is out of range ({} vertices)",
                index, i, vertex_count
            ));
        }

        let triangle_count = self.triangle_count() as u32;
        for (i, subset) in self.subsets.iter().enumerate() {
            if subset.vertex_start + subset.vertex_count > vertex_count
                || subset.face_start + subset.face_count > triangle_count
            {
                return Err(format!("Subset {} exceeds mesh bounds", i));
            }
        }

        Ok(())
    }

    /// 以原点为中心、边长为 1 的立方体：8 个顶点，36 个索引
    ///
    /// 共享角点，因此法线取角点方向；主要用于天空盒与测试。
    pub fn unit_cube() -> Self {
        let corners: [[f32; 3]; 8] = [
            [-0.5, -0.5, -0.5],
            [-0.5, 0.5, -0.5],
            [0.5, 0.5, -0.5],
            [0.5, -0.5, -0.5],
            [-0.5, -0.5, 0.5],
            [-0.5, 0.5, 0.5],
            [0.5, 0.5, 0.5],
            [0.5, -0.5, 0.5],
        ];

        let vertices = corners
            .iter()
            .map(|&p| {
                let len = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
                let normal = [p[0] / len, p[1] / len, p[2] / len];
                let texcoord = [p[0] + 0.5, 0.5 - p[1]];
                Vertex::new(p, normal, texcoord, [1.0, 0.0, 0.0])
            })
            .collect();

        #[rustfmt::skip]
        let indices = vec![
            // -Z
            0, 1, 2,  0, 2, 3,
            // +Z
            4, 6, 5,  4, 7, 6,
            // -X
            4, 5, 1,  4, 1, 0,
            // +X
            3, 2, 6,  3, 6, 7,
            // +Y
            1, 5, 6,  1, 6, 2,
            // -Y
            4, 0, 3,  4, 3, 7,
        ];

        Self {
            vertices,
            indices,
            subsets: vec![Subset::new(0, 0, 8, 0, 12)],
            name: Some("UnitCube".to_string()),
        }
    }

    /// 经纬球，半径 `radius`
    pub fn uv_sphere(radius: f32, slices: u32, stacks: u32) -> Self {
        let slices = slices.max(3);
        let stacks = stacks.max(2);
        let mut mesh = Self::with_name("UvSphere");

        for stack in 0..=stacks {
            let v = stack as f32 / stacks as f32;
            let phi = v * std::f32::consts::PI;
            for slice in 0..=slices {
                let u = slice as f32 / slices as f32;
                let theta = u * std::f32::consts::TAU;
                let normal = [phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin()];
                let position = [normal[0] * radius, normal[1] * radius, normal[2] * radius];
                mesh.vertices.push(Vertex::new(position, normal, [u, v], [0.0; 3]));
            }
        }

        let ring = slices + 1;
        for stack in 0..stacks {
            for slice in 0..slices {
                let a = stack * ring + slice;
                let b = a + ring;
                mesh.indices.extend_from_slice(&[a, a + 1, b, a + 1, b + 1, b]);
            }
        }

        compute_tangent_space(&mut mesh.vertices, &mesh.indices);
        let faces = mesh.triangle_count() as u32;
        mesh.subsets.push(Subset::new(0, 0, mesh.vertices.len() as u32, 0, faces));
        mesh
    }

    /// 用面法线重建顶点法线与切线
    pub fn recompute_normals(&mut self) {
        reconstruct_normals(&mut self.vertices, &self.indices);
        compute_tangent_space(&mut self.vertices, &self.indices);
    }
}
