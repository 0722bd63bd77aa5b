//! 纹理加载器
//!
//! 使用 `image` 解码常见图片格式，统一转换为 RGBA8，可选生成 box-filter mip 链，
//! 并把六张面图组装为立方体贴图。
//!
//! 子资源顺序与 D3D12 一致：`index = mip + slice * mip_levels`。

use std::path::Path;

use crate::core::error::{EngineError, Result};
use crate::gfx::device::{Format, ResourceState, TextureDesc, TextureUsage};

/// 解码后的图像数据
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub mip_levels: u32,
    pub array_size: u32,
    /// 每个子资源紧密排列的像素
    pub subresources: Vec<Vec<u8>>,
}

impl ImageData {
    /// 从 RGBA8 像素构造单层图像
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>, generate_mips: bool) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(EngineError::TextureLoading(format!(
                "{}x{} RGBA8 image needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }

        let subresources = if generate_mips {
            generate_mip_chain(width, height, pixels)
        } else {
            vec![pixels]
        };

        Ok(Self {
            width,
            height,
            format: Format::R8G8B8A8Unorm,
            mip_levels: subresources.len() as u32,
            array_size: 1,
            subresources,
        })
    }

    /// 纯色图像
    pub fn solid_color(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self> {
        let pixels = rgba.repeat(width as usize * height as usize);
        Self::from_rgba8(width, height, pixels, false)
    }

    /// 棋盘格图像，`cells` 为每行的格子数
    pub fn checkerboard(size: u32, cells: u32, a: [u8; 4], b: [u8; 4], generate_mips: bool) -> Result<Self> {
        let cell = (size / cells.max(1)).max(1);
        let mut pixels = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let color = if ((x / cell) + (y / cell)) % 2 == 0 { a } else { b };
                pixels.extend_from_slice(&color);
            }
        }
        Self::from_rgba8(size, size, pixels, generate_mips)
    }

    pub fn is_cube(&self) -> bool {
        self.array_size == 6
    }

    /// 指定子资源的尺寸
    pub fn subresource_extent(&self, index: u32) -> (u32, u32) {
        let mip = index % self.mip_levels;
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }

    /// 对应的纹理描述，初始状态为拷贝目标
    pub fn texture_desc(&self, name: &str) -> TextureDesc {
        TextureDesc {
            name: name.to_string(),
            width: self.width,
            height: self.height,
            array_size: self.array_size,
            mip_levels: self.mip_levels,
            format: self.format,
            usage: TextureUsage::ShaderResource,
            initial_state: ResourceState::CopyDest,
        }
    }

    /// 检查子资源数量与每个子资源的字节数
    pub fn validate(&self) -> Result<()> {
        let count = (self.mip_levels * self.array_size) as usize;
        if self.subresources.len() != count {
            return Err(EngineError::TextureLoading(format!(
                "Expected {} subresources, found {}",
                count,
                self.subresources.len()
            )));
        }

        let bpp = self.format.bytes_per_pixel() as usize;
        for (index, data) in self.subresources.iter().enumerate() {
            let (w, h) = self.subresource_extent(index as u32);
            let expected = w as usize * h as usize * bpp;
            if data.len() != expected {
                return Err(EngineError::TextureLoading(format!(
                    "Subresource {} is {} bytes, expected {}",
                    index,
                    data.len(),
                    expected
                )));
            }
        }
        Ok(())
    }
}

/// 从文件加载二维纹理
pub fn load_texture<P: AsRef<Path>>(path: P, generate_mips: bool) -> Result<ImageData> {
    let path = path.as_ref();
    let image = image::open(path)
        .map_err(|e| EngineError::TextureLoading(format!("{}: {}", path.display(), e)))?
        .to_rgba8();
    let (width, height) = image.dimensions();

    tracing::debug!(path = %path.display(), width, height, "Texture decoded");
    ImageData::from_rgba8(width, height, image.into_raw(), generate_mips)
}

/// 从内存中的编码图片加载
pub fn load_texture_from_memory(bytes: &[u8], generate_mips: bool) -> Result<ImageData> {
    let image = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = image.dimensions();
    ImageData::from_rgba8(width, height, image.into_raw(), generate_mips)
}

/// 从六个文件加载立方体贴图，顺序为 +X, -X, +Y, -Y, +Z, -Z
pub fn load_cube_map<P: AsRef<Path>>(faces: &[P; 6]) -> Result<ImageData> {
    let mut images = Vec::with_capacity(6);
    for face in faces {
        images.push(load_texture(face, false)?);
    }
    cube_from_faces(images)
}

/// 把六张尺寸相同的单层图像组装成立方体贴图
pub fn cube_from_faces(faces: Vec<ImageData>) -> Result<ImageData> {
    if faces.len() != 6 {
        return Err(EngineError::TextureLoading(format!(
            "Cube map needs 6 faces, got {}",
            faces.len()
        )));
    }

    let first = &faces[0];
    let (width, height, format, mip_levels) = (first.width, first.height, first.format, first.mip_levels);
    if width != height {
        return Err(EngineError::TextureLoading(format!(
            "Cube map faces must be square, got {}x{}",
            width, height
        )));
    }

    let mut subresources = Vec::with_capacity(6 * mip_levels as usize);
    for (index, face) in faces.into_iter().enumerate() {
        if face.width != width || face.height != height || face.format != format || face.mip_levels != mip_levels {
            return Err(EngineError::TextureLoading(format!("Cube map face {} does not match face 0", index)));
        }
        if face.array_size != 1 {
            return Err(EngineError::TextureLoading(format!("Cube map face {} is an array", index)));
        }
        subresources.extend(face.subresources);
    }

    Ok(ImageData {
        width,
        height,
        format,
        mip_levels,
        array_size: 6,
        subresources,
    })
}

/// 2x2 box filter 逐级缩小，直到 1x1
fn generate_mip_chain(width: u32, height: u32, base: Vec<u8>) -> Vec<Vec<u8>> {
    let mut levels = vec![base];
    let (mut w, mut h) = (width as usize, height as usize);

    while w > 1 || h > 1 {
        let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
        let src = &levels[levels.len() - 1];
        let mut dst = vec![0u8; nw * nh * 4];

        for y in 0..nh {
            for x in 0..nw {
                for c in 0..4 {
                    let mut sum = 0u32;
                    for (sx, sy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                        // 奇数尺寸时边缘像素重复采样
                        let px = (x * 2 + sx).min(w - 1);
                        let py = (y * 2 + sy).min(h - 1);
                        sum += src[(py * w + px) * 4 + c] as u32;
                    }
                    dst[(y * nw + x) * 4 + c] = ((sum + 2) / 4) as u8;
                }
            }
        }

        levels.push(dst);
        w = nw;
        h = nh;
    }
    levels
}
