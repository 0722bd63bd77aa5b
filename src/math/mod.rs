//! 统一的数学库模块
//!
//! 基于 `nalgebra`，提供左手坐标系（DirectX 约定）下的相机与模型矩阵工具。
//!
//! # 约定
//!
//! - 列向量：`clip = P * V * M * v`，HLSL 端使用 `mul(M, v)`
//! - 常量缓冲区中的矩阵按列主序存储（与 HLSL 默认的 `column_major` 打包一致）
//! - 投影矩阵的深度范围为 [0, 1]

pub use nalgebra::{Point3, UnitQuaternion};

pub type Vector2 = nalgebra::Vector2<f32>;
pub type Vector3 = nalgebra::Vector3<f32>;
pub type Vector4 = nalgebra::Vector4<f32>;
pub type Matrix4 = nalgebra::Matrix4<f32>;
pub type Quaternion = UnitQuaternion<f32>;

pub mod geometry;

/// 矩阵辅助函数
pub mod matrix {
    use super::*;

    /// 左手透视投影，深度映射到 [0, 1]
    ///
    /// # 参数
    ///
    /// * `fov_y` - 垂直视场角（弧度）
    /// * `aspect` - 宽高比
    /// * `near` / `far` - 裁剪面距离
    pub fn perspective_lh(fov_y: f32, aspect: f32, near: f32, far: f32) -> Matrix4 {
        let h = 1.0 / (0.5 * fov_y).tan();
        let w = h / aspect;
        let q = far / (far - near);

        #[rustfmt::skip]
        let proj = Matrix4::new(
            w,   0.0, 0.0, 0.0,
            0.0, h,   0.0, 0.0,
            0.0, 0.0, q,   -q * near,
            0.0, 0.0, 1.0, 0.0,
        );
        proj
    }

    /// 左手观察矩阵
    pub fn look_at_lh(eye: &Vector3, target: &Vector3, up: &Vector3) -> Matrix4 {
        Matrix4::look_at_lh(&Point3::from(*eye), &Point3::from(*target), up)
    }

    /// 模型矩阵：先缩放、再旋转、最后平移
    pub fn model(position: &Vector3, rotation: &Quaternion, scale: &Vector3) -> Matrix4 {
        Matrix4::new_translation(position)
            * rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(scale)
    }

    /// 法线矩阵：模型矩阵逆的转置；奇异矩阵退化为单位矩阵
    pub fn normal(model: &Matrix4) -> Matrix4 {
        model
            .try_inverse()
            .map(|inv| inv.transpose())
            .unwrap_or_else(Matrix4::identity)
    }

    /// 按列主序展开，用于写入常量缓冲区
    pub fn to_gpu(m: &Matrix4) -> [[f32; 4]; 4] {
        (*m).into()
    }
}

/// 四元数辅助函数
pub mod quaternion {
    use super::*;

    /// 与 DirectX `RollPitchYaw` 相同的旋转顺序：先绕 Z（roll），再绕 X（pitch），最后绕 Y（yaw）
    ///
    /// 参数为弧度。
    pub fn from_roll_pitch_yaw(pitch: f32, yaw: f32, roll: f32) -> Quaternion {
        UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw)
            * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), pitch)
            * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), roll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_perspective_depth_range() {
        let proj = matrix::perspective_lh(std::f32::consts::FRAC_PI_4, 16.0 / 9.0, 0.1, 100.0);

        let near = proj * Vector4::new(0.0, 0.0, 0.1, 1.0);
        let far = proj * Vector4::new(0.0, 0.0, 100.0, 1.0);

        assert!(approx(near.z / near.w, 0.0));
        assert!(approx(far.z / far.w, 1.0));
    }

    #[test]
    fn test_look_at_lh_maps_target_to_positive_z() {
        let view = matrix::look_at_lh(
            &Vector3::new(0.0, 0.0, -3.0),
            &Vector3::zeros(),
            &Vector3::y(),
        );
        let origin = view * Vector4::new(0.0, 0.0, 0.0, 1.0);

        assert!(approx(origin.z, 3.0));
        assert!(approx(origin.x, 0.0));
    }

    #[test]
    fn test_model_is_translate_rotate_scale() {
        let rotation = quaternion::from_roll_pitch_yaw(0.0, std::f32::consts::FRAC_PI_2, 0.0);
        let model = matrix::model(&Vector3::new(5.0, 0.0, 0.0), &rotation, &Vector3::new(2.0, 2.0, 2.0));

        // (1,0,0) 先缩放到 (2,0,0)，绕 Y 旋转 90° 到 (0,0,-2)，再平移
        let p = model * Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert!(approx(p.x, 5.0));
        assert!(approx(p.z, -2.0));
    }

    #[test]
    fn test_to_gpu_is_column_major() {
        let m = Matrix4::new_translation(&Vector3::new(1.0, 2.0, 3.0));
        let cols = matrix::to_gpu(&m);
        assert_eq!(cols[3], [1.0, 2.0, 3.0, 1.0]);
    }
}
