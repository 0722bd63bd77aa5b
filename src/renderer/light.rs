//! 光源与光源缓冲区
//!
//! [`LightBuffer`] 是固定容量的有序光源列表，整体写入一个常量缓冲区，
//! 每次绘制绑定到根参数 0。

use bytemuck::{Pod, Zeroable};

use super::buffer::ConstantBuffer;
use super::resource::ReleaseQueue;
use crate::core::error::{EngineError, Result};
use crate::gfx::device::RenderDevice;
use crate::math::Vector3;

/// 光源缓冲区容量
pub const MAX_LIGHTS: usize = 16;

/// 光源颜色（RGB）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub const fn white() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }

    pub fn to_array(&self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::white()
    }
}

/// 光源类型；数值与着色器中的常量一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LightType {
    Directional = 0,
    Point = 1,
    Spot = 2,
}

/// 光源
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub light_type: LightType,
    pub position: Vector3,
    pub direction: Vector3,
    pub color: Color,
    pub intensity: f32,
    pub range: f32,
    /// 聚光灯半角（弧度）
    pub spot_angle: f32,
}

impl Light {
    pub fn directional(direction: Vector3, color: Color, intensity: f32) -> Self {
        Self {
            light_type: LightType::Directional,
            position: Vector3::zeros(),
            direction: direction.normalize(),
            color,
            intensity,
            range: 0.0,
            spot_angle: 0.0,
        }
    }

    pub fn point(position: Vector3, color: Color, intensity: f32, range: f32) -> Self {
        Self {
            light_type: LightType::Point,
            position,
            direction: Vector3::zeros(),
            color,
            intensity,
            range,
            spot_angle: 0.0,
        }
    }

    pub fn spot(position: Vector3, direction: Vector3, color: Color, intensity: f32, range: f32, spot_angle: f32) -> Self {
        Self {
            light_type: LightType::Spot,
            position,
            direction: direction.normalize(),
            color,
            intensity,
            range,
            spot_angle,
        }
    }

    pub fn to_gpu(&self) -> LightData {
        LightData {
            position: self.position.into(),
            light_type: self.light_type as u32,
            color: self.color.to_array(),
            intensity: self.intensity,
            direction: self.direction.into(),
            range: self.range,
            spot_angle: self.spot_angle,
            _pad: [0.0; 3],
        }
    }
}

/// 着色器中的 `Light`（64 字节）
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct LightData {
    pub position: [f32; 3],
    pub light_type: u32,
    pub color: [f32; 3],
    pub intensity: f32,
    pub direction: [f32; 3],
    pub range: f32,
    pub spot_angle: f32,
    pub _pad: [f32; 3],
}

/// 着色器中的 `LightBuffer`（1040 字节）
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightBufferData {
    pub lights: [LightData; MAX_LIGHTS],
    pub count: u32,
    pub _pad: [u32; 3],
}

/// 光源缓冲区
#[derive(Debug)]
pub struct LightBuffer {
    lights: Vec<Light>,
    buffer: ConstantBuffer,
    dirty: bool,
}

impl LightBuffer {
    pub fn new(device: &mut dyn RenderDevice, releases: &ReleaseQueue) -> Result<Self> {
        let buffer = ConstantBuffer::for_type::<LightBufferData>(device, releases, "LightBuffer")?;
        let mut light_buffer = Self {
            lights: Vec::with_capacity(MAX_LIGHTS),
            buffer,
            dirty: true,
        };
        light_buffer.flush()?;
        Ok(light_buffer)
    }

    /// 追加光源；已满时失败
    pub fn push(&mut self, light: Light) -> Result<usize> {
        if self.lights.len() >= MAX_LIGHTS {
            return Err(EngineError::Runtime(format!("Light buffer is full ({} lights)", MAX_LIGHTS)));
        }
        self.lights.push(light);
        self.dirty = true;
        Ok(self.lights.len() - 1)
    }

    /// 替换已有光源
    pub fn set(&mut self, index: usize, light: Light) -> Result<()> {
        let slot = self
            .lights
            .get_mut(index)
            .ok_or_else(|| EngineError::Runtime(format!("Light index {} out of range", index)))?;
        *slot = light;
        self.dirty = true;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.lights.clear();
        self.dirty = true;
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    /// 有改动时写入常量缓冲区
    ///
    /// 只能在上一帧的 GPU 工作完成后调用。
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let mut data = LightBufferData::zeroed();
        for (slot, light) in data.lights.iter_mut().zip(&self.lights) {
            *slot = light.to_gpu();
        }
        data.count = self.lights.len() as u32;
        self.buffer.update(&data)?;
        self.dirty = false;
        Ok(())
    }

    pub fn gpu_address(&self) -> u64 {
        self.buffer.gpu_address()
    }

    pub fn constant_buffer(&self) -> &ConstantBuffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessDevice;

    #[test]
    fn test_light_layout() {
        assert_eq!(std::mem::size_of::<LightData>(), 64);
        assert_eq!(std::mem::size_of::<LightBufferData>(), 1040);
    }

    #[test]
    fn test_flush_writes_count_and_lights() {
        let mut device = HeadlessDevice::new();
        let releases = ReleaseQueue::new();
        let mut lights = LightBuffer::new(&mut device, &releases).unwrap();

        lights
            .push(Light::point(Vector3::new(1.0, 2.0, 3.0), Color::white(), 2.0, 10.0))
            .unwrap();
        lights.flush().unwrap();

        let bytes = lights.constant_buffer().read_bytes(0, 1040).unwrap();
        let data: LightBufferData = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(data.count, 1);
        assert_eq!(data.lights[0].position, [1.0, 2.0, 3.0]);
        assert_eq!(data.lights[0].light_type, LightType::Point as u32);
    }

    #[test]
    fn test_capacity() {
        let mut device = HeadlessDevice::new();
        let releases = ReleaseQueue::new();
        let mut lights = LightBuffer::new(&mut device, &releases).unwrap();
        let sun = Light::directional(Vector3::new(0.0, -1.0, 0.0), Color::white(), 1.0);

        for _ in 0..MAX_LIGHTS {
            lights.push(sun).unwrap();
        }
        assert!(lights.push(sun).is_err());
        assert!(lights.set(MAX_LIGHTS, sun).is_err());

        lights.clear();
        assert!(lights.is_empty());
    }
}
