use gpucontext::matrix::{self, Mat4};
use gpucontext::TextureId;

/// One delivery through the chain.
///
/// The texture id is only valid for the duration of the
/// `on_frame_available` call that carries it; stages that need the pixels
/// later must copy them out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
    /// Texture-coordinate transform to apply when sampling.
    pub transform: Mat4,
    /// Produced by a context running at the high feature level.
    pub high_feature_level: bool,
    /// Texture comes from an external producer rather than a pipeline stage.
    pub external: bool,
}

impl Frame {
    pub fn new(texture: TextureId, width: u32, height: u32) -> Self {
        Self {
            texture,
            width,
            height,
            transform: matrix::IDENTITY,
            high_feature_level: true,
            external: false,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_feature_level(mut self, high: bool) -> Self {
        self.high_feature_level = high;
        self
    }

    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn has_identity_transform(&self) -> bool {
        matrix::is_identity(&self.transform)
    }
}
