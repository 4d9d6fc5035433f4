use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::surface::SurfaceHandle;

/// Default bring-up deadline for [`crate::ContextExecutor::create`].
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Backing size used when neither a surface nor an explicit size is supplied.
pub const DEFAULT_BACKING_SIZE: (u32, u32) = (1, 1);

/// Capability tier requested from the device.
///
/// `High` mirrors a fully WebGPU-compliant adapter; `Baseline` is what
/// downlevel (GL-class) adapters and the software device guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum FeatureLevel {
    Baseline,
    #[default]
    High,
}

impl FeatureLevel {
    pub fn is_high(self) -> bool {
        matches!(self, FeatureLevel::High)
    }
}

/// Creation flags for the backing render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextFlags {
    /// Allocate a depth attachment alongside the backing target.
    pub depth: bool,
    /// Allocate a stencil attachment alongside the backing target.
    pub stencil: bool,
    /// Backing target will be fed to an encoder and must be CPU-readable.
    pub recordable: bool,
}

impl ContextFlags {
    pub fn recordable() -> Self {
        Self {
            recordable: true,
            ..Self::default()
        }
    }

    pub fn needs_depth_stencil(&self) -> bool {
        self.depth || self.stencil
    }
}

/// Which device implementation the context should bring up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// Try a hardware adapter first and fall back to the CPU device.
    #[default]
    Auto,
    /// Require a hardware adapter through `wgpu`.
    Wgpu,
    /// CPU implementation with identical draw semantics.
    Software,
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "wgpu" | "gpu" | "hardware" => Ok(Self::Wgpu),
            "software" | "cpu" => Ok(Self::Software),
            other => Err(format!(
                "unknown backend '{other}'; expected auto, wgpu or software"
            )),
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendPreference::Auto => f.write_str("auto"),
            BackendPreference::Wgpu => f.write_str("wgpu"),
            BackendPreference::Software => f.write_str("software"),
        }
    }
}

/// Backend actually selected during bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Wgpu,
    Software,
}

/// Description of the device backing a share group.
#[derive(Debug, Clone)]
pub struct AdapterProfile {
    pub name: String,
    pub backend: BackendKind,
    pub driver: String,
    pub device_type: String,
    pub max_texture_dimension: u32,
    pub feature_level: FeatureLevel,
    pub extensions: Vec<String>,
}

impl AdapterProfile {
    pub(crate) fn from_wgpu(
        info: &wgpu::AdapterInfo,
        limits: &wgpu::Limits,
        feature_level: FeatureLevel,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            name: info.name.clone(),
            backend: BackendKind::Wgpu,
            driver: format!("{:?} {}", info.backend, info.driver),
            device_type: format!("{:?}", info.device_type),
            max_texture_dimension: limits.max_texture_dimension_2d,
            feature_level,
            extensions,
        }
    }

    pub fn is_software(&self) -> bool {
        matches!(self.backend, BackendKind::Software) || self.device_type == "Cpu"
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext.eq_ignore_ascii_case(name))
    }
}

/// Everything [`crate::ContextExecutor::create`] needs to bring a context up.
#[derive(Clone)]
pub struct ExecutorConfig {
    /// Thread name for the worker.
    pub name: String,
    pub feature_level: FeatureLevel,
    pub flags: ContextFlags,
    /// Share GPU objects with an existing context.
    pub shared: Option<crate::SharedContext>,
    /// External surface to bind as the backing target.
    pub surface: Option<SurfaceHandle>,
    /// Backing size; ignored when `surface` is bound.
    pub width: u32,
    pub height: u32,
    /// Worker niceness (-20..=19); `None` leaves the inherited priority.
    pub priority: Option<i32>,
    pub backend: BackendPreference,
    pub init_timeout: Duration,
}

impl ExecutorConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn software(name: impl Into<String>) -> Self {
        Self {
            backend: BackendPreference::Software,
            ..Self::new(name)
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_surface(mut self, surface: SurfaceHandle) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: "gpucontext".to_string(),
            feature_level: FeatureLevel::default(),
            flags: ContextFlags::default(),
            shared: None,
            surface: None,
            width: DEFAULT_BACKING_SIZE.0,
            height: DEFAULT_BACKING_SIZE.1,
            priority: None,
            backend: BackendPreference::default(),
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }
}

impl fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("name", &self.name)
            .field("feature_level", &self.feature_level)
            .field("flags", &self.flags)
            .field("shared", &self.shared.is_some())
            .field("surface", &self.surface.is_some())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("priority", &self.priority)
            .field("backend", &self.backend)
            .field("init_timeout", &self.init_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_preference_parses_aliases() {
        assert_eq!("CPU".parse::<BackendPreference>(), Ok(BackendPreference::Software));
        assert_eq!("gpu".parse::<BackendPreference>(), Ok(BackendPreference::Wgpu));
        assert!("metal".parse::<BackendPreference>().is_err());
    }

    #[test]
    fn feature_levels_are_ordered() {
        assert!(FeatureLevel::High > FeatureLevel::Baseline);
        assert!(FeatureLevel::default().is_high());
    }
}
