//! Camera 组件
//!
//! 左手坐标系相机：观察点、目标点与上向量决定视图矩阵，
//! 镜头参数（FOV、宽高比、近远平面）决定投影矩阵。

use std::f32::consts::FRAC_PI_4;

use crate::math::{matrix, Matrix4, Vector3};

/// 鼠标每像素对应的环绕角度（度数）
const ORBIT_DEGREES_PER_PIXEL: f32 = 0.25;

/// 俯仰角限制，避免越过极点时视图翻转
const MAX_ORBIT_PITCH: f32 = 1.5;

/// 相机
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vector3,
    target: Vector3,
    up: Vector3,

    /// 垂直视场角（弧度）
    fov_y: f32,
    aspect: f32,
    near_z: f32,
    far_z: f32,
}

impl Camera {
    /// 默认相机：位于 (0, 0, -3) 看向原点
    pub fn new(aspect: f32) -> Self {
        Self {
            position: Vector3::new(0.0, 0.0, -3.0),
            target: Vector3::zeros(),
            up: Vector3::y(),
            fov_y: FRAC_PI_4,
            aspect,
            near_z: 0.1,
            far_z: 100.0,
        }
    }

    // ========== 位置相关 ==========

    pub fn position(&self) -> Vector3 {
        self.position
    }

    pub fn target(&self) -> Vector3 {
        self.target
    }

    pub fn up(&self) -> Vector3 {
        self.up
    }

    /// 设置相机朝向目标点
    pub fn look_at(&mut self, position: Vector3, target: Vector3, up: Vector3) {
        self.position = position;
        self.target = target;
        self.up = up;
    }

    /// 观察点与目标点一起平移
    pub fn translate(&mut self, offset: Vector3) {
        self.position += offset;
        self.target += offset;
    }

    /// 按鼠标位移绕目标点环绕
    ///
    /// `dx` 绕世界 Y 轴，`dy` 改变俯仰；距离保持不变。
    pub fn orbit(&mut self, dx: f32, dy: f32) {
        let offset = self.position - self.target;
        let radius = offset.norm();
        if radius <= f32::EPSILON {
            return;
        }

        let mut yaw = offset.x.atan2(offset.z);
        let mut pitch = (offset.y / radius).clamp(-1.0, 1.0).asin();

        yaw += (ORBIT_DEGREES_PER_PIXEL * dx).to_radians();
        pitch = (pitch + (ORBIT_DEGREES_PER_PIXEL * dy).to_radians()).clamp(-MAX_ORBIT_PITCH, MAX_ORBIT_PITCH);

        self.position = self.target
            + Vector3::new(
                radius * pitch.cos() * yaw.sin(),
                radius * pitch.sin(),
                radius * pitch.cos() * yaw.cos(),
            );
    }

    // ========== 视锥体属性 ==========

    pub fn fov_y(&self) -> f32 {
        self.fov_y
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn near_z(&self) -> f32 {
        self.near_z
    }

    pub fn far_z(&self) -> f32 {
        self.far_z
    }

    /// 设置透视投影参数
    ///
    /// # 参数
    /// - `fov_y`: 垂直视场角（弧度）
    /// - `aspect`: 宽高比
    /// - `near_z` / `far_z`: 裁剪面距离
    pub fn set_lens(&mut self, fov_y: f32, aspect: f32, near_z: f32, far_z: f32) {
        self.fov_y = fov_y;
        self.aspect = aspect;
        self.near_z = near_z;
        self.far_z = far_z;
    }

    /// 窗口尺寸变化后更新宽高比
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    // ========== 获取矩阵 ==========

    pub fn view_matrix(&self) -> Matrix4 {
        matrix::look_at_lh(&self.position, &self.target, &self.up)
    }

    pub fn proj_matrix(&self) -> Matrix4 {
        matrix::perspective_lh(self.fov_y, self.aspect, self.near_z, self.far_z)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(16.0 / 9.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vector4;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_default_camera() {
        let camera = Camera::default();
        assert_eq!(camera.position(), Vector3::new(0.0, 0.0, -3.0));
        assert!(approx(camera.fov_y(), FRAC_PI_4));
        assert!(approx(camera.near_z(), 0.1));
        assert!(approx(camera.far_z(), 100.0));
    }

    #[test]
    fn test_orbit_keeps_distance() {
        let mut camera = Camera::default();
        camera.orbit(120.0, -40.0);
        assert!(approx((camera.position() - camera.target()).norm(), 3.0));

        // 目标点仍位于视线正前方
        let origin = camera.view_matrix() * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert!(approx(origin.x, 0.0));
        assert!(approx(origin.z, 3.0));
    }

    #[test]
    fn test_translate_moves_target() {
        let mut camera = Camera::default();
        camera.translate(Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(camera.target(), Vector3::new(1.0, 0.0, 0.0));
    }
}
