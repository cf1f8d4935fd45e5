use std::path::Path;

use crate::renderer::backend::{
    BackendError, BackendResult, GpuBackend, TextureDescriptor, TextureFormat, TextureHandle,
};

/// Decoded RGBA8 pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: rgba.to_vec(),
        }
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&f(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn checker(size: u32, cells: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = (size / cells.max(1)).max(1);
        Self::from_fn(size, size, |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 {
                a
            } else {
                b
            }
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, image::ImageError> {
        let path = path.as_ref();
        let rgba = image::open(path)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        log::info!("Loaded texture {:?} ({}x{})", path, width, height);
        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}

/// Texture resident on the GPU.
#[derive(Debug, Clone, Copy)]
pub struct Texture {
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
}

impl Texture {
    pub fn upload(gpu: &mut dyn GpuBackend, label: &str, data: &TextureData) -> BackendResult<Self> {
        if data.pixels.len() != (data.width * data.height * 4) as usize {
            return Err(BackendError::TextureCreationFailed(format!(
                "{label}: {} bytes for {}x{}",
                data.pixels.len(),
                data.width,
                data.height
            )));
        }
        let handle = gpu.create_texture(&TextureDescriptor::new(
            label,
            data.width,
            data.height,
            TextureFormat::Rgba8Unorm,
        ))?;
        gpu.write_texture(handle, &data.pixels);
        Ok(Self {
            handle,
            width: data.width,
            height: data.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::RecordingBackend;
    use std::io::Cursor;

    #[test]
    fn checker_alternates_cells() {
        let data = TextureData::checker(4, 2, [255; 4], [0, 0, 0, 255]);
        assert_eq!(&data.pixels[0..4], &[255; 4]);
        assert_eq!(&data.pixels[8..12], &[0, 0, 0, 255]);
    }

    #[test]
    fn decode_reads_png_bytes() {
        let img = image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let data = TextureData::decode(&bytes).unwrap();
        assert_eq!((data.width, data.height), (3, 2));
        assert_eq!(&data.pixels[4..8], &[10, 20, 30, 255]);
    }

    #[test]
    fn upload_rejects_short_pixel_buffers() {
        let mut gpu = RecordingBackend::new(4, 4);
        let data = TextureData {
            width: 2,
            height: 2,
            pixels: vec![0; 3],
        };
        assert!(Texture::upload(&mut gpu, "Broken", &data).is_err());
    }
}
