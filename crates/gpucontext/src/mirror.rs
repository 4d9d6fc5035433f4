use std::str::FromStr;

use image::RgbaImage;

use crate::matrix::{self, Mat4};

/// Output mirroring applied by renderers and effect stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MirrorMode {
    #[default]
    Normal,
    Horizontal,
    Vertical,
    Both,
}

impl MirrorMode {
    pub fn flips_x(self) -> bool {
        matches!(self, MirrorMode::Horizontal | MirrorMode::Both)
    }

    pub fn flips_y(self) -> bool {
        matches!(self, MirrorMode::Vertical | MirrorMode::Both)
    }

    /// Model-view-projection matrix that mirrors clip-space output.
    pub fn mvp(self) -> Mat4 {
        let sx = if self.flips_x() { -1.0 } else { 1.0 };
        let sy = if self.flips_y() { -1.0 } else { 1.0 };
        matrix::scale(sx, sy, 1.0)
    }

    /// Combines two successive mirrors into one.
    pub fn then(self, other: MirrorMode) -> MirrorMode {
        match (self.flips_x() ^ other.flips_x(), self.flips_y() ^ other.flips_y()) {
            (false, false) => MirrorMode::Normal,
            (true, false) => MirrorMode::Horizontal,
            (false, true) => MirrorMode::Vertical,
            (true, true) => MirrorMode::Both,
        }
    }
}

impl FromStr for MirrorMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" | "none" | "off" => Ok(Self::Normal),
            "horizontal" | "h" => Ok(Self::Horizontal),
            "vertical" | "v" => Ok(Self::Vertical),
            "both" | "hv" => Ok(Self::Both),
            other => Err(format!("unknown mirror mode '{other}'")),
        }
    }
}

/// CPU mirror of an already captured frame.
pub fn mirror_image(image: &RgbaImage, mode: MirrorMode) -> RgbaImage {
    let mut out = image.clone();
    if mode.flips_x() {
        image::imageops::flip_horizontal_in_place(&mut out);
    }
    if mode.flips_y() {
        image::imageops::flip_vertical_in_place(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient() -> RgbaImage {
        RgbaImage::from_fn(7, 5, |x, y| image::Rgba([x as u8 * 30, y as u8 * 40, 7, 255]))
    }

    #[test]
    fn mirroring_twice_restores_pixels() {
        let original = gradient();
        for mode in [MirrorMode::Horizontal, MirrorMode::Vertical, MirrorMode::Both] {
            let once = mirror_image(&original, mode);
            assert_ne!(once, original, "{mode:?} should change an asymmetric image");
            assert_eq!(mirror_image(&once, mode), original);
        }
    }

    #[test]
    fn composition_cancels_matching_axes() {
        assert_eq!(MirrorMode::Both.then(MirrorMode::Horizontal), MirrorMode::Vertical);
        assert_eq!(MirrorMode::Vertical.then(MirrorMode::Vertical), MirrorMode::Normal);
        assert!(matrix::is_identity(&matrix::multiply(
            &MirrorMode::Both.mvp(),
            &MirrorMode::Both.mvp()
        )));
    }
}
