//! Draw requests and the built-in program table.
//!
//! The effect library is intentionally tiny: the engine only needs to "select
//! effect N", "set a parameter array" and "render program P with texture T and
//! matrices (texture, mvp) into a target". Both device backends implement the
//! same per-texel semantics defined by [`Program::shade`].

use crate::matrix::{Mat4, IDENTITY};
use crate::texture::TextureId;

/// Row-major 4×5 color matrix length (`[r g b a offset]` per output channel).
pub const COLOR_MATRIX_LEN: usize = 20;

const LUMA: [f32; 3] = [0.299, 0.587, 0.114];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Effect {
    #[default]
    Passthrough,
    Grayscale,
    Invert,
    ColorMatrix,
}

impl Effect {
    pub const ALL: [Effect; 4] = [
        Effect::Passthrough,
        Effect::Grayscale,
        Effect::Invert,
        Effect::ColorMatrix,
    ];

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u32 {
        match self {
            Effect::Passthrough => 0,
            Effect::Grayscale => 1,
            Effect::Invert => 2,
            Effect::ColorMatrix => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Effect::Passthrough => "passthrough",
            Effect::Grayscale => "grayscale",
            Effect::Invert => "invert",
            Effect::ColorMatrix => "color-matrix",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|effect| {
            effect.name() == normalized || (normalized == "none" && *effect == Effect::Passthrough)
        })
    }
}

/// A program selection plus its parameter slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Program {
    pub effect: Effect,
    params: [f32; COLOR_MATRIX_LEN],
}

impl Default for Program {
    fn default() -> Self {
        Self::new(Effect::Passthrough)
    }
}

impl Program {
    pub fn new(effect: Effect) -> Self {
        Self {
            effect,
            params: identity_color_matrix(),
        }
    }

    /// Copies up to [`COLOR_MATRIX_LEN`] values into the parameter slot.
    ///
    /// Missing trailing values keep their identity defaults.
    pub fn set_params(&mut self, values: &[f32]) {
        let mut params = identity_color_matrix();
        for (slot, value) in params.iter_mut().zip(values.iter()) {
            *slot = *value;
        }
        self.params = params;
    }

    pub fn params(&self) -> &[f32; COLOR_MATRIX_LEN] {
        &self.params
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.effect, Effect::Passthrough)
    }

    /// Column-major 4×4 matrix plus offset vector for GPU upload.
    pub(crate) fn color_matrix_columns(&self) -> (Mat4, [f32; 4]) {
        let mut matrix = [0.0; 16];
        let mut offset = [0.0; 4];
        for row in 0..4 {
            for col in 0..4 {
                matrix[col * 4 + row] = self.params[row * 5 + col];
            }
            offset[row] = self.params[row * 5 + 4];
        }
        (matrix, offset)
    }

    /// Reference per-texel shading in normalized RGBA.
    pub fn shade(&self, color: [f32; 4]) -> [f32; 4] {
        match self.effect {
            Effect::Passthrough => color,
            Effect::Grayscale => {
                let y = color[0] * LUMA[0] + color[1] * LUMA[1] + color[2] * LUMA[2];
                [y, y, y, color[3]]
            }
            Effect::Invert => [1.0 - color[0], 1.0 - color[1], 1.0 - color[2], color[3]],
            Effect::ColorMatrix => {
                let mut out = [0.0; 4];
                for (row, value) in out.iter_mut().enumerate() {
                    let base = row * 5;
                    *value = (self.params[base] * color[0]
                        + self.params[base + 1] * color[1]
                        + self.params[base + 2] * color[2]
                        + self.params[base + 3] * color[3]
                        + self.params[base + 4])
                        .clamp(0.0, 1.0);
                }
                out
            }
        }
    }
}

pub fn identity_color_matrix() -> [f32; COLOR_MATRIX_LEN] {
    let mut params = [0.0; COLOR_MATRIX_LEN];
    for channel in 0..4 {
        params[channel * 5 + channel] = 1.0;
    }
    params
}

/// Render `source` through `program` into `target`.
#[derive(Debug, Clone, Copy)]
pub struct DrawRequest {
    pub source: TextureId,
    pub target: TextureId,
    /// Applied to texture coordinates (origin top-left, v down).
    pub tex_matrix: Mat4,
    /// Applied to the unit quad in clip space.
    pub mvp: Mat4,
    pub program: Program,
}

impl DrawRequest {
    /// Straight copy with identity matrices.
    pub fn copy(source: TextureId, target: TextureId) -> Self {
        Self {
            source,
            target,
            tex_matrix: IDENTITY,
            mvp: IDENTITY,
            program: Program::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_indices_round_trip() {
        for effect in Effect::ALL {
            assert_eq!(Effect::from_index(effect.index()), Some(effect));
            assert_eq!(Effect::from_name(effect.name()), Some(effect));
        }
        assert_eq!(Effect::from_index(42), None);
        assert_eq!(Effect::from_name("color_matrix"), Some(Effect::ColorMatrix));
    }

    #[test]
    fn identity_color_matrix_is_passthrough() {
        let program = Program::new(Effect::ColorMatrix);
        let color = [0.2, 0.4, 0.6, 1.0];
        assert_eq!(program.shade(color), color);
    }

    #[test]
    fn color_matrix_columns_transpose_rows() {
        let mut program = Program::new(Effect::ColorMatrix);
        let mut params = identity_color_matrix();
        params[1] = 0.5; // red picks up half of green
        params[4] = 0.1; // red offset
        program.set_params(&params);
        let (matrix, offset) = program.color_matrix_columns();
        assert_eq!(matrix[4], 0.5);
        assert_eq!(offset[0], 0.1);
    }

    #[test]
    fn grayscale_keeps_alpha() {
        let out = Program::new(Effect::Grayscale).shade([1.0, 0.0, 0.0, 0.5]);
        assert!((out[0] - 0.299).abs() < 1e-6);
        assert_eq!(out[3], 0.5);
    }
}
