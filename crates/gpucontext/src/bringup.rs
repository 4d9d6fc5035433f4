//! Device selection and capability negotiation for a new context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backend::{DeviceBackend, ShareGroup, WgpuDevice};
use crate::errors::{ContextError, ContextResult};
use crate::types::{AdapterProfile, BackendPreference, ExecutorConfig, FeatureLevel};

static ADAPTER_LOGGED: AtomicBool = AtomicBool::new(false);

/// Re-enables the one-shot adapter summary at `info` level.
pub fn reset_adapter_log() {
    ADAPTER_LOGGED.store(false, Ordering::SeqCst);
}

/// Whether the adapter summary has been emitted in this process.
pub fn adapter_logged() -> bool {
    ADAPTER_LOGGED.load(Ordering::SeqCst)
}

fn log_adapter_once(profile: &AdapterProfile) {
    if ADAPTER_LOGGED.swap(true, Ordering::SeqCst) {
        tracing::debug!(name = %profile.name, "reusing graphics adapter");
        return;
    }
    tracing::info!(
        name = %profile.name,
        backend = ?profile.backend,
        driver = %profile.driver,
        device_type = %profile.device_type,
        max_texture_dimension = profile.max_texture_dimension,
        feature_level = ?profile.feature_level,
        extensions = ?profile.extensions,
        "graphics adapter"
    );
}

/// Resolves the share group a context joins, opening a device if needed.
pub(crate) fn open_share_group(config: &ExecutorConfig) -> ContextResult<Arc<ShareGroup>> {
    if let Some(shared) = config.shared.as_ref() {
        tracing::debug!(name = %config.name, "joining existing share group");
        return Ok(Arc::clone(&shared.group));
    }

    let group = match config.backend {
        BackendPreference::Software => ShareGroup::software(FeatureLevel::High),
        BackendPreference::Wgpu => {
            let device = WgpuDevice::open(&config.name)
                .map_err(|err| ContextError::Initialization(format!("{err:#}")))?;
            ShareGroup::new(DeviceBackend::Wgpu(device))
        }
        BackendPreference::Auto => match WgpuDevice::open(&config.name) {
            Ok(device) => ShareGroup::new(DeviceBackend::Wgpu(device)),
            Err(err) => {
                tracing::warn!(
                    error = %format!("{err:#}"),
                    "no usable GPU adapter; falling back to software device"
                );
                ShareGroup::software(FeatureLevel::High)
            }
        },
    };
    log_adapter_once(group.profile());
    Ok(group)
}

/// Picks the feature level a context will run at.
///
/// An unsupported request degrades to `Baseline` rather than failing.
pub(crate) fn negotiate_feature_level(
    requested: FeatureLevel,
    profile: &AdapterProfile,
) -> FeatureLevel {
    if requested <= profile.feature_level {
        return requested;
    }
    tracing::warn!(
        ?requested,
        supported = ?profile.feature_level,
        adapter = %profile.name,
        "requested feature level unavailable; falling back to baseline"
    );
    FeatureLevel::Baseline
}

pub(crate) fn check_dimensions(
    profile: &AdapterProfile,
    width: u32,
    height: u32,
) -> ContextResult<()> {
    let max_dimension = profile.max_texture_dimension;
    if width == 0 || height == 0 {
        return Err(ContextError::Initialization(format!(
            "backing size {width}x{height} is empty"
        )));
    }
    if width > max_dimension || height > max_dimension {
        return Err(ContextError::Initialization(format!(
            "max texture dimension is {max_dimension}, requested backing is {width}x{height}"
        )));
    }
    Ok(())
}

/// Opens a device for inspection only.
pub fn probe(backend: BackendPreference) -> ContextResult<AdapterProfile> {
    let config = ExecutorConfig {
        backend,
        ..ExecutorConfig::new("texflow-probe")
    };
    let group = open_share_group(&config)?;
    Ok(group.profile().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BackendKind;

    fn profile(level: FeatureLevel) -> AdapterProfile {
        AdapterProfile {
            name: "test".to_string(),
            backend: BackendKind::Software,
            driver: String::new(),
            device_type: "Cpu".to_string(),
            max_texture_dimension: 64,
            feature_level: level,
            extensions: Vec::new(),
        }
    }

    #[test]
    fn unsupported_level_falls_back_to_baseline() {
        let baseline_only = profile(FeatureLevel::Baseline);
        assert_eq!(
            negotiate_feature_level(FeatureLevel::High, &baseline_only),
            FeatureLevel::Baseline
        );
        assert_eq!(
            negotiate_feature_level(FeatureLevel::High, &profile(FeatureLevel::High)),
            FeatureLevel::High
        );
    }

    #[test]
    fn oversized_backing_is_rejected() {
        let profile = profile(FeatureLevel::High);
        assert!(check_dimensions(&profile, 64, 64).is_ok());
        let err = check_dimensions(&profile, 65, 1).unwrap_err();
        assert!(err.is_initialization());
        assert!(check_dimensions(&profile, 0, 4).is_err());
    }

    #[test]
    fn software_probe_reports_cpu_device() {
        let profile = probe(BackendPreference::Software).unwrap();
        assert!(profile.is_software());
        assert!(profile.has_extension("COLOR-MATRIX"));
    }
}
