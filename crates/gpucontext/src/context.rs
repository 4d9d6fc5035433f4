use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use image::RgbaImage;

use crate::backend::{SharedContext, ShareGroup};
use crate::bringup;
use crate::drawer::DrawRequest;
use crate::errors::{ContextError, ContextResult, ReadbackError};
use crate::surface::SurfaceHandle;
use crate::texture::{OwnedTexture, TextureId};
use crate::types::{AdapterProfile, ContextFlags, ExecutorConfig, FeatureLevel};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_CONTEXT: Cell<Option<u64>> = const { Cell::new(None) };
}

struct Backing {
    width: u32,
    height: u32,
    surface: Option<SurfaceHandle>,
    target: Option<OwnedTexture>,
}

/// Device binding for exactly one worker thread.
///
/// Every GPU call checks that it runs on the thread that initialized the
/// context and that the context has not been released.
pub struct GraphicsContext {
    id: u64,
    label: String,
    group: Arc<ShareGroup>,
    requested_level: FeatureLevel,
    feature_level: FeatureLevel,
    flags: ContextFlags,
    owner: ThreadId,
    valid: AtomicBool,
    backing: Mutex<Backing>,
}

impl GraphicsContext {
    /// Binds a context to the calling thread.
    pub(crate) fn initialize(config: &ExecutorConfig, group: Arc<ShareGroup>) -> ContextResult<Self> {
        let profile = group.profile();
        let (width, height) = match config.surface.as_ref() {
            Some(surface) => surface.size(),
            None => (config.width, config.height),
        };
        bringup::check_dimensions(profile, width, height)?;
        let feature_level = bringup::negotiate_feature_level(config.feature_level, profile);
        if config.flags.needs_depth_stencil() {
            tracing::debug!(
                depth = config.flags.depth,
                stencil = config.flags.stencil,
                "depth/stencil attachments are not used by the built-in programs"
            );
        }

        let target = if config.surface.is_some() {
            let id = group
                .create_texture(width, height)
                .map_err(|err| ContextError::Initialization(format!("{err:#}")))?;
            Some(OwnedTexture::new(id, width, height))
        } else {
            None
        };

        let context = Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            label: config.name.clone(),
            group,
            requested_level: config.feature_level,
            feature_level,
            flags: config.flags,
            owner: thread::current().id(),
            valid: AtomicBool::new(true),
            backing: Mutex::new(Backing {
                width,
                height,
                surface: config.surface.clone(),
                target,
            }),
        };
        let members = context.group.attach();
        context.make_current()?;
        tracing::debug!(
            context = context.id,
            label = %context.label,
            width,
            height,
            ?feature_level,
            share_group_members = members,
            "graphics context initialized"
        );
        Ok(context)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub fn ensure_owner_thread(&self) -> ContextResult<()> {
        if self.is_owner_thread() {
            return Ok(());
        }
        Err(ContextError::invalid_state(format!(
            "context '{}' is owned by {:?}, called from {:?}",
            self.label,
            self.owner,
            thread::current().name().unwrap_or("<unnamed>")
        )))
    }

    fn ensure_usable(&self) -> ContextResult<()> {
        if !self.is_valid() {
            return Err(ContextError::invalid_state(format!(
                "context '{}' has been released",
                self.label
            )));
        }
        self.ensure_owner_thread()
    }

    fn backing(&self) -> ContextResult<MutexGuard<'_, Backing>> {
        self.backing
            .lock()
            .map_err(|_| ContextError::invalid_state("backing state poisoned"))
    }

    /// Marks this context current on the calling (owner) thread.
    pub fn make_current(&self) -> ContextResult<()> {
        self.ensure_usable()?;
        CURRENT_CONTEXT.with(|current| current.set(Some(self.id)));
        Ok(())
    }

    pub fn is_current(&self) -> bool {
        CURRENT_CONTEXT.with(|current| current.get() == Some(self.id))
    }

    pub fn size(&self) -> (u32, u32) {
        self.backing
            .lock()
            .map(|backing| (backing.width, backing.height))
            .unwrap_or((0, 0))
    }

    pub fn surface(&self) -> Option<SurfaceHandle> {
        self.backing
            .lock()
            .ok()
            .and_then(|backing| backing.surface.clone())
    }

    /// Backing render target, present only while a surface is bound.
    pub fn backing_texture(&self) -> Option<TextureId> {
        self.backing
            .lock()
            .ok()
            .and_then(|backing| backing.target.as_ref().map(OwnedTexture::id))
    }

    /// Rebinds the backing target in place.
    ///
    /// `size` overrides the surface size; with neither, the previous backing
    /// size is kept.
    pub fn reinitialize(
        &self,
        surface: Option<SurfaceHandle>,
        size: Option<(u32, u32)>,
    ) -> ContextResult<()> {
        self.ensure_usable()?;
        let mut backing = self.backing()?;
        let (width, height) = size
            .or_else(|| surface.as_ref().map(|surface| surface.size()))
            .unwrap_or((backing.width, backing.height));
        bringup::check_dimensions(self.group.profile(), width, height)?;

        let stale = backing.target.take();
        let resized = (backing.width, backing.height) != (width, height);
        backing.target = match (stale, surface.is_some()) {
            (Some(texture), true) if !resized => Some(texture),
            (stale, needs_target) => {
                if let Some(mut texture) = stale {
                    texture.mark_released();
                    self.group.destroy_texture(texture.id());
                }
                if needs_target {
                    let id = self.group.create_texture(width, height)?;
                    Some(OwnedTexture::new(id, width, height))
                } else {
                    None
                }
            }
        };
        backing.width = width;
        backing.height = height;
        backing.surface = surface;
        tracing::debug!(
            context = self.id,
            width,
            height,
            surface = backing.surface.is_some(),
            "graphics context reinitialized"
        );
        Ok(())
    }

    /// Hands the backing target to the bound surface.
    pub fn present(&self) -> ContextResult<()> {
        self.ensure_usable()?;
        let (surface, target) = {
            let backing = self.backing()?;
            let surface = backing
                .surface
                .clone()
                .ok_or_else(|| ContextError::invalid_state("no surface bound"))?;
            let target = backing
                .target
                .as_ref()
                .map(OwnedTexture::id)
                .ok_or_else(|| ContextError::invalid_state("no backing target"))?;
            (surface, target)
        };
        self.present_to(&surface, target)
    }

    /// Reads `texture` back and presents it on `surface`.
    pub fn present_to(&self, surface: &SurfaceHandle, texture: TextureId) -> ContextResult<()> {
        self.ensure_usable()?;
        let pixels = self
            .group
            .read_texture(texture)
            .map_err(|err| ContextError::Backend(err.into()))?;
        surface
            .present(&pixels)
            .map_err(|err| ContextError::Backend(err.into()))
    }

    /// Tears down the binding; only the first call has an effect.
    pub(crate) fn release(&self) -> bool {
        if !self.valid.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Ok(mut backing) = self.backing.lock() {
            if let Some(mut texture) = backing.target.take() {
                texture.mark_released();
                self.group.destroy_texture(texture.id());
            }
            backing.surface = None;
        }
        if self.is_current() {
            CURRENT_CONTEXT.with(|current| current.set(None));
        }
        let remaining = self.group.detach();
        tracing::debug!(
            context = self.id,
            label = %self.label,
            share_group_members = remaining,
            "graphics context released"
        );
        true
    }

    pub fn requested_feature_level(&self) -> FeatureLevel {
        self.requested_level
    }

    pub fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    pub fn supports(&self, level: FeatureLevel) -> bool {
        level <= self.feature_level
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.group.profile().has_extension(name)
    }

    pub fn adapter_profile(&self) -> &AdapterProfile {
        self.group.profile()
    }

    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    pub fn share_handle(&self) -> SharedContext {
        SharedContext::new(Arc::clone(&self.group))
    }

    /// Textures currently alive in the whole share group.
    pub fn texture_count(&self) -> usize {
        self.group.texture_count()
    }

    pub fn create_texture(&self, width: u32, height: u32) -> ContextResult<OwnedTexture> {
        self.ensure_usable()?;
        bringup::check_dimensions(self.group.profile(), width, height)
            .map_err(|err| ContextError::invalid_state(err.to_string()))?;
        let id = self.group.create_texture(width, height)?;
        Ok(OwnedTexture::new(id, width, height))
    }

    /// Allocates a texture sized to `pixels` and uploads them.
    pub fn upload_texture(&self, pixels: &RgbaImage) -> ContextResult<OwnedTexture> {
        let (width, height) = pixels.dimensions();
        let texture = self.create_texture(width, height)?;
        if let Err(err) = self.group.write_texture(texture.id(), pixels) {
            self.release_texture(texture)?;
            return Err(err.into());
        }
        Ok(texture)
    }

    pub fn write_texture(&self, texture: TextureId, pixels: &RgbaImage) -> ContextResult<()> {
        self.ensure_usable()?;
        Ok(self.group.write_texture(texture, pixels)?)
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.group.texture_size(texture)
    }

    /// Returns an owned texture to the share group.
    pub fn release_texture(&self, mut texture: OwnedTexture) -> ContextResult<()> {
        self.ensure_owner_thread()?;
        if texture.mark_released() && !self.group.destroy_texture(texture.id()) {
            tracing::debug!(texture = %texture.id(), "texture already gone from share group");
        }
        Ok(())
    }

    pub fn draw(&self, request: &DrawRequest) -> ContextResult<()> {
        self.ensure_usable()?;
        Ok(self.group.draw(request)?)
    }

    pub fn read_texture(&self, texture: TextureId) -> Result<RgbaImage, ReadbackError> {
        self.ensure_usable()?;
        self.group.read_texture(texture)
    }
}

impl fmt::Debug for GraphicsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsContext")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("feature_level", &self.feature_level)
            .field("valid", &self.is_valid())
            .field("size", &self.size())
            .finish()
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        if self.is_valid() {
            tracing::warn!(context = self.id, label = %self.label, "graphics context dropped without release");
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::ImageSurface;

    fn software_context(width: u32, height: u32) -> GraphicsContext {
        let config = ExecutorConfig::software("ctx-test").with_size(width, height);
        let group = bringup::open_share_group(&config).unwrap();
        GraphicsContext::initialize(&config, group).unwrap()
    }

    #[test]
    fn initialize_makes_context_current() {
        let ctx = software_context(4, 4);
        assert!(ctx.is_current());
        assert!(ctx.is_owner_thread());
        assert_eq!(ctx.size(), (4, 4));
        assert!(ctx.release());
        assert!(!ctx.release());
        assert!(!ctx.is_current());
    }

    #[test]
    fn reinitialize_keeps_previous_size_without_override() {
        let ctx = software_context(8, 6);
        ctx.reinitialize(None, None).unwrap();
        assert_eq!(ctx.size(), (8, 6));
        ctx.reinitialize(None, Some((3, 2))).unwrap();
        assert_eq!(ctx.size(), (3, 2));
        let surface: SurfaceHandle = ImageSurface::shared("s", 5, 5);
        ctx.reinitialize(Some(surface), None).unwrap();
        assert_eq!(ctx.size(), (5, 5));
        assert!(ctx.backing_texture().is_some());
        ctx.release();
    }

    #[test]
    fn foreign_thread_calls_are_rejected() {
        let ctx = Arc::new(software_context(2, 2));
        let remote = Arc::clone(&ctx);
        let result = thread::spawn(move || remote.create_texture(1, 1).map(|_| ()))
            .join()
            .unwrap();
        assert!(matches!(result, Err(ContextError::InvalidState(_))));
        ctx.release();
    }

    #[test]
    fn released_context_refuses_work() {
        let ctx = software_context(2, 2);
        ctx.release();
        assert!(matches!(ctx.make_current(), Err(ContextError::InvalidState(_))));
        assert!(matches!(
            ctx.read_texture(TextureId(1)),
            Err(ReadbackError::Context(_))
        ));
    }

    #[test]
    fn present_reaches_bound_surface() {
        let surface = ImageSurface::shared("s", 2, 2);
        let handle: SurfaceHandle = surface.clone();
        let config = ExecutorConfig::software("present").with_surface(handle);
        let group = bringup::open_share_group(&config).unwrap();
        let ctx = GraphicsContext::initialize(&config, group).unwrap();
        let pixels = RgbaImage::from_pixel(2, 2, image::Rgba([1, 2, 3, 4]));
        let texture = ctx.upload_texture(&pixels).unwrap();
        let target = ctx.backing_texture().unwrap();
        ctx.draw(&DrawRequest::copy(texture.id(), target)).unwrap();
        ctx.present().unwrap();
        assert_eq!(surface.last_frame(), Some(pixels));
        ctx.release_texture(texture).unwrap();
        ctx.release();
    }
}
