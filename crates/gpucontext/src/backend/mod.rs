//! Device backends and the shared GPU object namespace.

mod hardware;
mod software;

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use image::RgbaImage;

use crate::drawer::DrawRequest;
use crate::errors::ReadbackError;
use crate::texture::TextureId;
use crate::types::{AdapterProfile, BackendKind, FeatureLevel};

pub(crate) use hardware::WgpuDevice;
pub use software::SOFTWARE_MAX_TEXTURE_DIMENSION;
pub(crate) use software::SoftwareDevice;

pub(crate) enum DeviceBackend {
    Wgpu(WgpuDevice),
    Software(SoftwareDevice),
}

impl DeviceBackend {
    pub(crate) fn kind(&self) -> BackendKind {
        match self {
            DeviceBackend::Wgpu(_) => BackendKind::Wgpu,
            DeviceBackend::Software(_) => BackendKind::Software,
        }
    }

    pub(crate) fn profile(&self) -> &AdapterProfile {
        match self {
            DeviceBackend::Wgpu(device) => device.profile(),
            DeviceBackend::Software(device) => device.profile(),
        }
    }

    fn create_texture(&self, id: TextureId, width: u32, height: u32) -> Result<()> {
        match self {
            DeviceBackend::Wgpu(device) => device.create_texture(id, width, height),
            DeviceBackend::Software(device) => device.create_texture(id, width, height),
        }
    }

    fn write_texture(&self, id: TextureId, pixels: &RgbaImage) -> Result<()> {
        match self {
            DeviceBackend::Wgpu(device) => device.write_texture(id, pixels),
            DeviceBackend::Software(device) => device.write_texture(id, pixels),
        }
    }

    fn texture_size(&self, id: TextureId) -> Option<(u32, u32)> {
        match self {
            DeviceBackend::Wgpu(device) => device.texture_size(id),
            DeviceBackend::Software(device) => device.texture_size(id),
        }
    }

    fn destroy_texture(&self, id: TextureId) -> bool {
        match self {
            DeviceBackend::Wgpu(device) => device.destroy_texture(id),
            DeviceBackend::Software(device) => device.destroy_texture(id),
        }
    }

    fn texture_count(&self) -> usize {
        match self {
            DeviceBackend::Wgpu(device) => device.texture_count(),
            DeviceBackend::Software(device) => device.texture_count(),
        }
    }

    fn draw(&self, request: &DrawRequest) -> Result<()> {
        match self {
            DeviceBackend::Wgpu(device) => device.draw(request),
            DeviceBackend::Software(device) => device.draw(request),
        }
    }

    fn read_texture(&self, id: TextureId) -> Result<RgbaImage, ReadbackError> {
        match self {
            DeviceBackend::Wgpu(device) => device.read_texture(id),
            DeviceBackend::Software(device) => device.read_texture(id),
        }
    }
}

/// Device plus texture namespace shared by sibling contexts.
pub(crate) struct ShareGroup {
    backend: DeviceBackend,
    next_texture: AtomicU32,
    contexts: AtomicUsize,
}

impl ShareGroup {
    pub(crate) fn new(backend: DeviceBackend) -> Arc<Self> {
        Arc::new(Self {
            backend,
            next_texture: AtomicU32::new(1),
            contexts: AtomicUsize::new(0),
        })
    }

    pub(crate) fn software(level: FeatureLevel) -> Arc<Self> {
        Self::new(DeviceBackend::Software(SoftwareDevice::new(level)))
    }

    pub(crate) fn backend(&self) -> &DeviceBackend {
        &self.backend
    }

    pub(crate) fn profile(&self) -> &AdapterProfile {
        self.backend.profile()
    }

    pub(crate) fn attach(&self) -> usize {
        self.contexts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn detach(&self) -> usize {
        self.contexts
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1)
    }

    pub(crate) fn live_contexts(&self) -> usize {
        self.contexts.load(Ordering::Acquire)
    }

    pub(crate) fn create_texture(&self, width: u32, height: u32) -> Result<TextureId> {
        let id = TextureId(self.next_texture.fetch_add(1, Ordering::Relaxed));
        self.backend.create_texture(id, width, height)?;
        Ok(id)
    }

    pub(crate) fn write_texture(&self, id: TextureId, pixels: &RgbaImage) -> Result<()> {
        self.backend.write_texture(id, pixels)
    }

    pub(crate) fn texture_size(&self, id: TextureId) -> Option<(u32, u32)> {
        self.backend.texture_size(id)
    }

    pub(crate) fn destroy_texture(&self, id: TextureId) -> bool {
        self.backend.destroy_texture(id)
    }

    pub(crate) fn texture_count(&self) -> usize {
        self.backend.texture_count()
    }

    pub(crate) fn draw(&self, request: &DrawRequest) -> Result<()> {
        self.backend.draw(request)
    }

    pub(crate) fn read_texture(&self, id: TextureId) -> Result<RgbaImage, ReadbackError> {
        self.backend.read_texture(id)
    }
}

/// Opaque handle that lets a new context join an existing share group.
#[derive(Clone)]
pub struct SharedContext {
    pub(crate) group: Arc<ShareGroup>,
}

impl SharedContext {
    pub(crate) fn new(group: Arc<ShareGroup>) -> Self {
        Self { group }
    }

    pub fn profile(&self) -> &AdapterProfile {
        self.group.profile()
    }

    pub fn backend(&self) -> BackendKind {
        self.group.backend().kind()
    }

    /// True when both handles refer to the same object namespace.
    pub fn same_group(&self, other: &SharedContext) -> bool {
        Arc::ptr_eq(&self.group, &other.group)
    }
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedContext")
            .field("backend", &self.backend())
            .field("adapter", &self.profile().name)
            .field("contexts", &self.group.live_contexts())
            .finish()
    }
}
