//! OBJ 文件加载器
//!
//! 使用 tobj 解析 Wavefront OBJ。V 轴翻转为 DirectX 约定（`1 - v`），
//! 缺失的法线由面法线重建，有 UV 时计算切线。

use std::io::BufReader;
use std::path::Path;

use super::MeshLoader;
use crate::core::error::{MeshLoadError, Result};
use crate::geometry::mesh::{MeshData, Subset};
use crate::geometry::vertex::Vertex;
use crate::math::geometry::{compute_tangent_space, reconstruct_normals, smooth_normals_by_position};

/// OBJ 格式加载器
pub struct ObjLoader;

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    }
}

impl ObjLoader {
    fn build_mesh(models: Vec<tobj::Model>, name: &str) -> Result<MeshData> {
        if models.is_empty() {
            return Err(MeshLoadError::ValidationError("OBJ contains no models".to_string()).into());
        }

        let mut mesh_data = MeshData::with_name(name);
        let mut has_normals = true;
        let mut has_texcoords = true;

        for (mesh_idx, model) in models.iter().enumerate() {
            let mesh = &model.mesh;
            if mesh.positions.len() % 3 != 0 {
                return Err(MeshLoadError::InvalidGeometry(format!(
                    "Position data of '{}' is truncated ({} floats)",
                    model.name,
                    mesh.positions.len()
                ))
                .into());
            }

            let vertex_start = mesh_data.vertices.len() as u32;
            let face_start = mesh_data.triangle_count() as u32;
            let vertex_count = mesh.positions.len() / 3;
            has_normals &= mesh.normals.len() >= vertex_count * 3;
            has_texcoords &= mesh.texcoords.len() >= vertex_count * 2;

            for i in 0..vertex_count {
                let mut vertex = Vertex::from_position([
                    mesh.positions[i * 3],
                    mesh.positions[i * 3 + 1],
                    mesh.positions[i * 3 + 2],
                ]);
                if let Some(n) = mesh.normals.get(i * 3..i * 3 + 3) {
                    vertex.normal = [n[0], n[1], n[2]];
                }
                if let Some(uv) = mesh.texcoords.get(i * 2..i * 2 + 2) {
                    vertex.texcoord = [uv[0], 1.0 - uv[1]];
                }
                mesh_data.vertices.push(vertex);
            }

            mesh_data
                .indices
                .extend(mesh.indices.iter().map(|&index| vertex_start + index));

            mesh_data.subsets.push(Subset::new(
                mesh_idx as u32,
                vertex_start,
                vertex_count as u32,
                face_start,
                (mesh.indices.len() / 3) as u32,
            ));
        }

        if !has_normals {
            tracing::debug!(mesh = name, "OBJ has no normals, rebuilding from faces");
            reconstruct_normals(&mut mesh_data.vertices, &mesh_data.indices);
        }
        smooth_normals_by_position(&mut mesh_data.vertices, 1e-5);

        if has_texcoords {
            compute_tangent_space(&mut mesh_data.vertices, &mesh_data.indices);
        } else {
            tracing::warn!(mesh = name, "OBJ has no texture coordinates, tangents left unset");
        }

        mesh_data.validate().map_err(MeshLoadError::ValidationError)?;

        tracing::info!(
            mesh = name,
            vertices = mesh_data.vertex_count(),
            triangles = mesh_data.triangle_count(),
            subsets = mesh_data.subsets.len(),
            "OBJ mesh loaded"
        );

        Ok(mesh_data)
    }
}

impl MeshLoader for ObjLoader {
    fn load_from_file(path: &Path) -> Result<MeshData> {
        if !path.exists() {
            return Err(MeshLoadError::FileNotFound(path.to_path_buf()).into());
        }

        let (models, _materials) = tobj::load_obj(path, &load_options())
            .map_err(|e| MeshLoadError::ParseError(format!("{}: {}", path.display(), e)))?;

        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("Unnamed");
        Self::build_mesh(models, name)
    }

    fn load_from_memory(data: &[u8]) -> Result<MeshData> {
        let mut reader = BufReader::new(data);
        // 内存加载不解析 mtllib
        let (models, _materials) = tobj::load_obj_buf(&mut reader, &load_options(), |_| {
            Ok(Default::default())
        })
        .map_err(|e| MeshLoadError::ParseError(e.to_string()))?;

        Self::build_mesh(models, "Memory")
    }

    fn supported_extensions() -> &'static [&'static str] {
        &["obj"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE_OBJ: &str = "v 0 0 0\nv 0 1 0\nv 1 0 0\nvt 0 0\nvt 0 1\nvt 1 0\nf 1/1 2/2 3/3\n";

    #[test]
    fn test_load_nonexistent_file() {
        let result = ObjLoader::load_from_file(Path::new("nonexistent.obj"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_memory_rebuilds_normals_and_flips_v() {
        let mesh = ObjLoader::load_from_memory(TRIANGLE_OBJ.as_bytes()).unwrap();

        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        // 顶点 2 的 vt = (0, 1)，翻转后 v = 0
        assert_eq!(mesh.vertices[1].texcoord, [0.0, 0.0]);
        // 顺时针 (0,0,0) → (0,1,0) → (1,0,0) 朝向 -Z
        assert!((mesh.vertices[0].normal[2] + 1.0).abs() < 1e-5);
    }
}
