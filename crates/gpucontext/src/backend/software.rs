//! CPU device with the same draw semantics as the wgpu pipeline.
//!
//! Every draw covers the clip-space quad `[-1, 1]²` transformed by the mvp
//! matrix. Texture coordinates run top-left to bottom-right, are transformed by
//! the texture matrix, and are sampled with nearest filtering and edge clamp.
//! Pixels outside the transformed quad are cleared to transparent black.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use image::{Rgba, RgbaImage};

use crate::drawer::{DrawRequest, Program};
use crate::errors::ReadbackError;
use crate::matrix::{self, Mat4};
use crate::texture::TextureId;
use crate::types::{AdapterProfile, BackendKind, FeatureLevel};

/// Largest texture edge the CPU device accepts.
pub const SOFTWARE_MAX_TEXTURE_DIMENSION: u32 = 16_384;

const QUAD_EPSILON: f32 = 1e-6;

pub(crate) struct SoftwareDevice {
    profile: AdapterProfile,
    textures: Mutex<HashMap<TextureId, RgbaImage>>,
}

impl SoftwareDevice {
    pub(crate) fn new(requested: FeatureLevel) -> Self {
        Self {
            profile: AdapterProfile {
                name: "texflow software rasterizer".to_string(),
                backend: BackendKind::Software,
                driver: "cpu".to_string(),
                device_type: "Cpu".to_string(),
                max_texture_dimension: SOFTWARE_MAX_TEXTURE_DIMENSION,
                feature_level: requested,
                extensions: vec![
                    "external-texture".to_string(),
                    "color-matrix".to_string(),
                ],
            },
            textures: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn profile(&self) -> &AdapterProfile {
        &self.profile
    }

    fn textures(&self) -> Result<MutexGuard<'_, HashMap<TextureId, RgbaImage>>> {
        self.textures
            .lock()
            .map_err(|_| anyhow!("software texture table poisoned"))
    }

    pub(crate) fn create_texture(&self, id: TextureId, width: u32, height: u32) -> Result<()> {
        self.textures()?.insert(id, RgbaImage::new(width, height));
        Ok(())
    }

    pub(crate) fn write_texture(&self, id: TextureId, pixels: &RgbaImage) -> Result<()> {
        let mut textures = self.textures()?;
        let slot = textures
            .get_mut(&id)
            .ok_or_else(|| anyhow!("unknown texture {id}"))?;
        if slot.dimensions() != pixels.dimensions() {
            bail!(
                "upload of {:?} into {id} sized {:?}",
                pixels.dimensions(),
                slot.dimensions()
            );
        }
        slot.copy_from_slice(pixels.as_raw());
        Ok(())
    }

    pub(crate) fn texture_size(&self, id: TextureId) -> Option<(u32, u32)> {
        self.textures
            .lock()
            .ok()
            .and_then(|textures| textures.get(&id).map(RgbaImage::dimensions))
    }

    pub(crate) fn destroy_texture(&self, id: TextureId) -> bool {
        self.textures
            .lock()
            .map(|mut textures| textures.remove(&id).is_some())
            .unwrap_or(false)
    }

    pub(crate) fn texture_count(&self) -> usize {
        self.textures.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub(crate) fn draw(&self, request: &DrawRequest) -> Result<()> {
        let mut textures = self.textures()?;
        let (tw, th) = textures
            .get(&request.target)
            .map(RgbaImage::dimensions)
            .ok_or_else(|| anyhow!("unknown draw target {}", request.target))?;
        let source = textures
            .get(&request.source)
            .ok_or_else(|| anyhow!("unknown draw source {}", request.source))?;
        let rendered = rasterize(source, tw, th, request)?;
        textures.insert(request.target, rendered);
        Ok(())
    }

    pub(crate) fn read_texture(&self, id: TextureId) -> Result<RgbaImage, ReadbackError> {
        let textures = self
            .textures
            .lock()
            .map_err(|_| ReadbackError::Map("software texture table poisoned".to_string()))?;
        textures
            .get(&id)
            .cloned()
            .ok_or(ReadbackError::UnknownTexture(id.raw()))
    }
}

fn rasterize(source: &RgbaImage, width: u32, height: u32, request: &DrawRequest) -> Result<RgbaImage> {
    let inverse: Mat4 = matrix::invert_affine_2d(&request.mvp)
        .ok_or_else(|| anyhow!("mvp matrix is not invertible"))?;
    let (sw, sh) = source.dimensions();
    let mut out = RgbaImage::new(width, height);
    if sw == 0 || sh == 0 {
        return Ok(out);
    }

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let u = (x as f32 + 0.5) / width as f32;
        let v = (y as f32 + 0.5) / height as f32;
        let (px, py) = matrix::transform_point(&inverse, 2.0 * u - 1.0, 1.0 - 2.0 * v);
        if px.abs() > 1.0 + QUAD_EPSILON || py.abs() > 1.0 + QUAD_EPSILON {
            continue;
        }
        let (su, sv) = matrix::transform_point(
            &request.tex_matrix,
            px * 0.5 + 0.5,
            0.5 - py * 0.5,
        );
        let sx = nearest(su, sw);
        let sy = nearest(sv, sh);
        *pixel = shade(&request.program, *source.get_pixel(sx, sy));
    }
    Ok(out)
}

fn nearest(coord: f32, extent: u32) -> u32 {
    let scaled = (coord * extent as f32).floor();
    if scaled.is_nan() || scaled < 0.0 {
        0
    } else {
        (scaled as u32).min(extent - 1)
    }
}

fn shade(program: &Program, texel: Rgba<u8>) -> Rgba<u8> {
    if program.is_passthrough() {
        return texel;
    }
    let input = texel.0.map(|c| c as f32 / 255.0);
    let output = program.shade(input);
    Rgba(output.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drawer::Effect;
    use crate::mirror::{mirror_image, MirrorMode};

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 17) as u8, (y * 29) as u8, ((x + y) * 3) as u8, 255])
        })
    }

    fn device_with(image: &RgbaImage) -> (SoftwareDevice, TextureId, TextureId) {
        let device = SoftwareDevice::new(FeatureLevel::High);
        let (w, h) = image.dimensions();
        let src = TextureId(1);
        let dst = TextureId(2);
        device.create_texture(src, w, h).unwrap();
        device.create_texture(dst, w, h).unwrap();
        device.write_texture(src, image).unwrap();
        (device, src, dst)
    }

    #[test]
    fn identity_copy_is_pixel_exact() {
        let image = gradient(13, 9);
        let (device, src, dst) = device_with(&image);
        device.draw(&DrawRequest::copy(src, dst)).unwrap();
        assert_eq!(device.read_texture(dst).unwrap(), image);
    }

    #[test]
    fn mirror_mvp_matches_cpu_mirror() {
        let image = gradient(10, 6);
        let (device, src, dst) = device_with(&image);
        for mode in [MirrorMode::Horizontal, MirrorMode::Vertical, MirrorMode::Both] {
            let mut request = DrawRequest::copy(src, dst);
            request.mvp = mode.mvp();
            device.draw(&request).unwrap();
            assert_eq!(device.read_texture(dst).unwrap(), mirror_image(&image, mode));
        }
    }

    #[test]
    fn vertical_flip_texture_matrix_flips_rows() {
        let image = gradient(4, 5);
        let (device, src, dst) = device_with(&image);
        let mut request = DrawRequest::copy(src, dst);
        request.tex_matrix = matrix::flip_vertical();
        device.draw(&request).unwrap();
        assert_eq!(
            device.read_texture(dst).unwrap(),
            mirror_image(&image, MirrorMode::Vertical)
        );
    }

    #[test]
    fn shrunken_quad_leaves_transparent_border() {
        let image = RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255]));
        let (device, src, dst) = device_with(&image);
        let mut request = DrawRequest::copy(src, dst);
        request.mvp = matrix::scale(0.5, 0.5, 1.0);
        device.draw(&request).unwrap();
        let out = device.read_texture(dst).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgba([0, 0, 0, 0]));
        assert_eq!(out.get_pixel(4, 4), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn invert_effect_flips_channels() {
        let image = RgbaImage::from_pixel(2, 2, Rgba([10, 200, 0, 255]));
        let (device, src, dst) = device_with(&image);
        let mut request = DrawRequest::copy(src, dst);
        request.program = Program::new(Effect::Invert);
        device.draw(&request).unwrap();
        assert_eq!(
            device.read_texture(dst).unwrap().get_pixel(1, 1),
            &Rgba([245, 55, 255, 255])
        );
    }

    #[test]
    fn unknown_texture_reports_readback_error() {
        let device = SoftwareDevice::new(FeatureLevel::Baseline);
        assert!(matches!(
            device.read_texture(TextureId(99)),
            Err(ReadbackError::UnknownTexture(99))
        ));
        assert!(!device.destroy_texture(TextureId(99)));
    }
}
