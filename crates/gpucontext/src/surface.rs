//! External render targets a context can present into.

use std::sync::{Arc, Mutex};

use image::RgbaImage;

use crate::errors::SurfaceError;

/// Display-surface provider seen by the graphics context.
///
/// Implementations are called on the executor thread only, but handles are
/// shared across threads when the surface is swapped.
pub trait RenderSurface: Send + Sync {
    fn size(&self) -> (u32, u32);

    fn present(&self, frame: &RgbaImage) -> Result<(), SurfaceError>;

    fn label(&self) -> &str {
        "surface"
    }
}

pub type SurfaceHandle = Arc<dyn RenderSurface>;

#[derive(Default)]
struct ImageSurfaceState {
    last: Option<RgbaImage>,
    presented: u64,
    closed: bool,
}

/// In-memory surface that keeps the last presented frame.
pub struct ImageSurface {
    label: String,
    width: u32,
    height: u32,
    state: Mutex<ImageSurfaceState>,
}

impl ImageSurface {
    pub fn new(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            state: Mutex::new(ImageSurfaceState::default()),
        }
    }

    pub fn shared(label: impl Into<String>, width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self::new(label, width, height))
    }

    pub fn last_frame(&self) -> Option<RgbaImage> {
        self.state.lock().ok().and_then(|state| state.last.clone())
    }

    pub fn presented(&self) -> u64 {
        self.state.lock().map(|state| state.presented).unwrap_or(0)
    }

    /// Further presents fail with [`SurfaceError::Closed`].
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
    }
}

impl RenderSurface for ImageSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn present(&self, frame: &RgbaImage) -> Result<(), SurfaceError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(SurfaceError::SizeMismatch {
                expected: (self.width, self.height),
                actual: frame.dimensions(),
            });
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| SurfaceError::Other("surface state poisoned".to_string()))?;
        if state.closed {
            return Err(SurfaceError::Closed);
        }
        state.last = Some(frame.clone());
        state.presented += 1;
        Ok(())
    }

    fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_surface_keeps_last_frame() {
        let surface = ImageSurface::new("test", 2, 2);
        let frame = RgbaImage::from_pixel(2, 2, image::Rgba([9, 8, 7, 255]));
        surface.present(&frame).unwrap();
        assert_eq!(surface.presented(), 1);
        assert_eq!(surface.last_frame(), Some(frame));
    }

    #[test]
    fn image_surface_rejects_wrong_size_and_closed() {
        let surface = ImageSurface::new("test", 2, 2);
        let wrong = RgbaImage::new(3, 2);
        assert!(matches!(
            surface.present(&wrong),
            Err(SurfaceError::SizeMismatch { .. })
        ));
        surface.close();
        assert!(matches!(
            surface.present(&RgbaImage::new(2, 2)),
            Err(SurfaceError::Closed)
        ));
    }
}
