use std::fmt;

/// Handle to a texture in a share group's object namespace.
///
/// Ids are only meaningful on an executor thread belonging to the group that
/// allocated them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u32);

impl TextureId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// A texture owned by one pipeline stage.
///
/// Must be handed back with [`crate::GraphicsContext::release_texture`];
/// dropping it unreleased leaks the GPU object and logs a warning.
pub struct OwnedTexture {
    id: TextureId,
    width: u32,
    height: u32,
    released: bool,
}

impl OwnedTexture {
    pub(crate) fn new(id: TextureId, width: u32, height: u32) -> Self {
        Self {
            id,
            width,
            height,
            released: false,
        }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    pub(crate) fn mark_released(&mut self) -> bool {
        !std::mem::replace(&mut self.released, true)
    }
}

impl fmt::Debug for OwnedTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedTexture")
            .field("id", &self.id)
            .field("size", &(self.width, self.height))
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for OwnedTexture {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                texture = self.id.0,
                width = self.width,
                height = self.height,
                "owned texture dropped without release"
            );
        }
    }
}
