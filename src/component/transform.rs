//! Transform 组件
//!
//! 渲染对象的位置、旋转和缩放。模型矩阵按 T * R * S 组合。

use crate::math::{matrix, quaternion, Matrix4, Quaternion, Vector3};

/// 空间变换
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// 位置
    pub position: Vector3,

    /// 旋转
    pub rotation: Quaternion,

    /// 缩放
    pub scale: Vector3,

    /// 外部直接设置的模型矩阵；任何 TRS 修改都会清除它
    model_override: Option<Matrix4>,
}

impl Transform {
    pub fn new() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: Quaternion::identity(),
            scale: Vector3::new(1.0, 1.0, 1.0),
            model_override: None,
        }
    }

    /// 创建带位置的 Transform
    pub fn with_position(position: Vector3) -> Self {
        Self {
            position,
            ..Self::new()
        }
    }

    /// 设置位置
    pub fn set_position(&mut self, position: Vector3) {
        self.position = position;
        self.model_override = None;
    }

    /// 添加位置偏移
    pub fn translate(&mut self, offset: Vector3) {
        self.position += offset;
        self.model_override = None;
    }

    /// 设置缩放
    pub fn set_scale(&mut self, scale: Vector3) {
        self.scale = scale;
        self.model_override = None;
    }

    /// 在当前旋转之上叠加一次旋转（度数）
    ///
    /// 增量先于已有旋转作用在世界空间：`new = delta * current`。
    pub fn rotate(&mut self, pitch: f32, yaw: f32, roll: f32) {
        let delta = quaternion::from_roll_pitch_yaw(pitch.to_radians(), yaw.to_radians(), roll.to_radians());
        self.rotation = delta * self.rotation;
        self.model_override = None;
    }

    /// 直接指定模型矩阵
    pub fn set_model_matrix(&mut self, model: Matrix4) {
        self.model_override = Some(model);
    }

    /// 模型矩阵
    pub fn model_matrix(&self) -> Matrix4 {
        self.model_override
            .unwrap_or_else(|| matrix::model(&self.position, &self.rotation, &self.scale))
    }

    /// 前方向量（左手坐标系 +Z）
    pub fn forward(&self) -> Vector3 {
        self.rotation * Vector3::z()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_default_is_identity() {
        assert_eq!(Transform::new().model_matrix(), Matrix4::identity());
    }

    #[test]
    fn test_rotate_accumulates_in_degrees() {
        let mut transform = Transform::new();
        transform.rotate(0.0, 45.0, 0.0);
        transform.rotate(0.0, 45.0, 0.0);

        // 绕 Y 共 90°：+Z 转到 +X
        let forward = transform.forward();
        assert!(approx(forward.x, 1.0));
        assert!(approx(forward.z, 0.0));
    }

    #[test]
    fn test_model_override_cleared_by_translate() {
        let mut transform = Transform::new();
        let custom = Matrix4::new_scaling(3.0);
        transform.set_model_matrix(custom);
        assert_eq!(transform.model_matrix(), custom);

        transform.translate(Vector3::new(1.0, 0.0, 0.0));
        assert!(approx(transform.model_matrix()[(0, 3)], 1.0));
        assert!(approx(transform.model_matrix()[(0, 0)], 1.0));
    }
}
