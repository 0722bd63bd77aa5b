//! 网格后处理
//!
//! 面法线累加重建顶点法线、按位置焊接法线、由 UV 导数计算切线。

use super::Vector3;
use crate::geometry::vertex::Vertex;

fn v3(a: [f32; 3]) -> Vector3 {
    Vector3::new(a[0], a[1], a[2])
}

fn normalized_or(v: Vector3, fallback: [f32; 3]) -> [f32; 3] {
    v.try_normalize(1e-12).map(|n| [n.x, n.y, n.z]).unwrap_or(fallback)
}

/// 用面积加权的面法线重建顶点法线
pub fn reconstruct_normals(vertices: &mut [Vertex], indices: &[u32]) {
    let mut accum = vec![Vector3::zeros(); vertices.len()];

    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let p0 = v3(vertices[a].position);
        // 左手坐标系下顺时针为正面
        let face = (v3(vertices[b].position) - p0).cross(&(v3(vertices[c].position) - p0));
        accum[a] += face;
        accum[b] += face;
        accum[c] += face;
    }

    for (vertex, n) in vertices.iter_mut().zip(accum) {
        vertex.normal = normalized_or(n, [0.0, 1.0, 0.0]);
    }
}

/// 对位置相同（误差 `epsilon` 内）的顶点取平均法线，消除 UV 接缝处的硬边
pub fn smooth_normals_by_position(vertices: &mut [Vertex], epsilon: f32) {
    use std::collections::HashMap;

    let quantize = |p: [f32; 3]| -> (i64, i64, i64) {
        let inv = 1.0 / epsilon.max(f32::EPSILON);
        (
            (p[0] * inv).round() as i64,
            (p[1] * inv).round() as i64,
            (p[2] * inv).round() as i64,
        )
    };

    let mut groups: HashMap<(i64, i64, i64), Vector3> = HashMap::new();
    for vertex in vertices.iter() {
        *groups.entry(quantize(vertex.position)).or_insert_with(Vector3::zeros) += v3(vertex.normal);
    }

    for vertex in vertices.iter_mut() {
        if let Some(sum) = groups.get(&quantize(vertex.position)) {
            vertex.normal = normalized_or(*sum, vertex.normal);
        }
    }
}

/// 计算切线，并对法线做 Gram-Schmidt 正交化
pub fn compute_tangent_space(vertices: &mut [Vertex], indices: &[u32]) {
    let mut accum = vec![Vector3::zeros(); vertices.len()];

    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let (v0, v1, v2) = (&vertices[a], &vertices[b], &vertices[c]);

        let e1 = v3(v1.position) - v3(v0.position);
        let e2 = v3(v2.position) - v3(v0.position);
        let (du1, dv1) = (v1.texcoord[0] - v0.texcoord[0], v1.texcoord[1] - v0.texcoord[1]);
        let (du2, dv2) = (v2.texcoord[0] - v0.texcoord[0], v2.texcoord[1] - v0.texcoord[1]);

        let det = du1 * dv2 - du2 * dv1;
        if det.abs() < 1e-8 {
            continue;
        }
        let tangent = (e1 * dv2 - e2 * dv1) / det;

        accum[a] += tangent;
        accum[b] += tangent;
        accum[c] += tangent;
    }

    for (vertex, t) in vertices.iter_mut().zip(accum) {
        let n = v3(vertex.normal);
        let ortho = t - n * n.dot(&t);
        vertex.tangent = normalized_or(ortho, [1.0, 0.0, 0.0]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> (Vec<Vertex>, Vec<u32>) {
        // XZ 平面上的四边形，从 +Y 看为顺时针
        let vertices = vec![
            Vertex::new([0.0, 0.0, 0.0], [0.0; 3], [0.0, 1.0], [0.0; 3]),
            Vertex::new([0.0, 0.0, 1.0], [0.0; 3], [0.0, 0.0], [0.0; 3]),
            Vertex::new([1.0, 0.0, 1.0], [0.0; 3], [1.0, 0.0], [0.0; 3]),
            Vertex::new([1.0, 0.0, 0.0], [0.0; 3], [1.0, 1.0], [0.0; 3]),
        ];
        (vertices, vec![0, 1, 2, 0, 2, 3])
    }

    #[test]
    fn test_reconstruct_normals_points_up() {
        let (mut vertices, indices) = quad();
        reconstruct_normals(&mut vertices, &indices);
        for v in &vertices {
            assert!((v.normal[1] - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_tangent_follows_u_axis() {
        let (mut vertices, indices) = quad();
        reconstruct_normals(&mut vertices, &indices);
        compute_tangent_space(&mut vertices, &indices);
        for v in &vertices {
            assert!((v.tangent[0] - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_smooth_normals_welds_duplicates() {
        let mut vertices = vec![
            Vertex::new([1.0, 1.0, 1.0], [1.0, 0.0, 0.0], [0.0; 2], [0.0; 3]),
            Vertex::new([1.0, 1.0, 1.0], [0.0, 1.0, 0.0], [0.0; 2], [0.0; 3]),
        ];
        smooth_normals_by_position(&mut vertices, 1e-5);
        assert_eq!(vertices[0].normal, vertices[1].normal);
        assert!((vertices[0].normal[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
    }
}
