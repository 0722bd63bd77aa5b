//! 顶点定义
//!
//! 与默认管线输入布局逐字节对应：
//!
//! | 语义      | 格式              | 偏移 |
//! |-----------|-------------------|------|
//! | POSITION  | R32G32B32_FLOAT   | 0    |
//! | NORMAL    | R32G32B32_FLOAT   | 12   |
//! | TEXCOORD  | R32G32_FLOAT      | 24   |
//! | TANGENT   | R32G32B32_FLOAT   | 32   |
//!
//! 偏移量由 [`Vertex::TANGENT_OFFSET`] 等常量给出，默认输入布局直接引用它们。

use bytemuck::{Pod, Zeroable};

/// 完整的 3D 顶点（44 字节）
#[repr(C)]
#[derive(Default, Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub texcoord: [f32; 2],
    pub tangent: [f32; 3],
}

impl Vertex {
    /// 顶点步长（字节）
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;
    pub const POSITION_OFFSET: u32 = 0;
    pub const NORMAL_OFFSET: u32 = 12;
    pub const TEXCOORD_OFFSET: u32 = 24;
    pub const TANGENT_OFFSET: u32 = 32;

    #[inline]
    pub fn new(position: [f32; 3], normal: [f32; 3], texcoord: [f32; 2], tangent: [f32; 3]) -> Self {
        Self {
            position,
            normal,
            texcoord,
            tangent,
        }
    }

    /// 只有位置的顶点，其余属性由后处理生成
    #[inline]
    pub fn from_position(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    #[test]
    fn test_vertex_layout() {
        assert_eq!(size_of::<Vertex>(), 44);
        assert_eq!(align_of::<Vertex>(), 4);
        assert_eq!(Vertex::STRIDE, 44);
        assert_eq!(Vertex::TANGENT_OFFSET as usize, std::mem::offset_of!(Vertex, tangent));
        assert_eq!(Vertex::TEXCOORD_OFFSET as usize, std::mem::offset_of!(Vertex, texcoord));
    }

    #[test]
    fn test_vertex_bytes() {
        let vertex = Vertex::new([1.0, 2.0, 3.0], [0.0, 1.0, 0.0], [0.5, 0.5], [1.0, 0.0, 0.0]);
        let bytes = bytemuck::bytes_of(&vertex);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
        assert_eq!(&bytes[24..28], &0.5f32.to_ne_bytes());
    }
}
