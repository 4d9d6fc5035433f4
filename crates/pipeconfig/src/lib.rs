use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gpucontext::drawer::COLOR_MATRIX_LEN;
use gpucontext::{
    BackendPreference, Effect, ExecutorConfig, FeatureLevel, MirrorMode, DEFAULT_INIT_TIMEOUT,
};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub version: u32,
    #[serde(default)]
    pub executor: ExecutorSection,
    pub source: SourceSection,
    #[serde(default)]
    pub effects: Vec<EffectSection>,
    #[serde(default)]
    pub capture: Option<CaptureSection>,
    #[serde(default)]
    pub renderer: Option<RendererSection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureLevelSetting {
    Baseline,
    #[default]
    High,
}

impl From<FeatureLevelSetting> for FeatureLevel {
    fn from(setting: FeatureLevelSetting) -> Self {
        match setting {
            FeatureLevelSetting::Baseline => FeatureLevel::Baseline,
            FeatureLevelSetting::High => FeatureLevel::High,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorSection {
    #[serde(default = "default_executor_name")]
    pub name: String,
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub feature_level: FeatureLevelSetting,
    #[serde(default = "default_backing_dimension")]
    pub width: u32,
    #[serde(default = "default_backing_dimension")]
    pub height: u32,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub init_timeout: Option<Duration>,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            name: default_executor_name(),
            backend: default_backend(),
            feature_level: FeatureLevelSetting::default(),
            width: default_backing_dimension(),
            height: default_backing_dimension(),
            priority: None,
            init_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A PNG (or other decodable image) on disk.
    Image,
    /// Generated black and white checkerboard.
    Checkerboard,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceSection {
    pub kind: SourceKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_checkerboard_size")]
    pub size: u32,
    #[serde(default = "default_checkerboard_cell")]
    pub cell: u32,
    #[serde(default = "default_fps")]
    pub fps: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EffectSection {
    pub effect: String,
    #[serde(default)]
    pub params: Vec<f32>,
    #[serde(default)]
    pub mirror: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureSection {
    #[serde(default = "default_capture_count")]
    pub count: u32,
    #[serde(
        default = "default_capture_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub interval: Duration,
    /// Deliveries to let through before the first capture.
    #[serde(default)]
    pub after_frames: u64,
    #[serde(
        default = "default_capture_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RendererSection {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub max_fps: Option<f32>,
    #[serde(default)]
    pub slack: Option<f64>,
    #[serde(default)]
    pub mirror: Option<String>,
}

fn default_executor_name() -> String {
    "texflow".to_string()
}

fn default_backend() -> String {
    "auto".to_string()
}

fn default_backing_dimension() -> u32 {
    1
}

fn default_checkerboard_size() -> u32 {
    128
}

fn default_checkerboard_cell() -> u32 {
    16
}

fn default_fps() -> f32 {
    30.0
}

fn default_capture_count() -> u32 {
    1
}

fn default_capture_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_capture_timeout() -> Duration {
    Duration::from_secs(5)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_duration_opt(deserializer)?
        .ok_or_else(|| de::Error::custom("duration may not be empty"))
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn parse_mirror(raw: Option<&str>, field: &str) -> Result<MirrorMode, ConfigError> {
    match raw {
        None => Ok(MirrorMode::Normal),
        Some(raw) => raw
            .parse()
            .map_err(|err| ConfigError::Invalid(format!("{field}: {err}"))),
    }
}

impl PipelineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: PipelineConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads and validates a config file. Relative source paths are resolved
    /// against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let (Some(image), Some(base)) = (config.source.path.as_mut(), path.parent()) {
            if image.is_relative() {
                *image = base.join(&*image);
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        self.backend()?;
        if self.executor.name.trim().is_empty() {
            return Err(ConfigError::Invalid("executor.name may not be empty".into()));
        }
        if self.executor.width == 0 || self.executor.height == 0 {
            return Err(ConfigError::Invalid(
                "executor width and height must be greater than zero".into(),
            ));
        }
        if let Some(priority) = self.executor.priority {
            if !(-20..=19).contains(&priority) {
                return Err(ConfigError::Invalid(format!(
                    "executor.priority {priority} is outside -20..=19"
                )));
            }
        }
        if self.executor.init_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ConfigError::Invalid(
                "executor.init_timeout must be greater than zero".into(),
            ));
        }

        let source = &self.source;
        match source.kind {
            SourceKind::Image if source.path.is_none() => {
                return Err(ConfigError::Invalid(
                    "source.path is required for image sources".into(),
                ));
            }
            SourceKind::Checkerboard if source.size == 0 || source.cell == 0 => {
                return Err(ConfigError::Invalid(
                    "checkerboard size and cell must be greater than zero".into(),
                ));
            }
            _ => {}
        }
        if !(source.fps.is_finite() && source.fps > 0.0) {
            return Err(ConfigError::Invalid("source.fps must be > 0".into()));
        }

        for (index, effect) in self.effects.iter().enumerate() {
            if Effect::from_name(&effect.effect).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "effects[{index}]: unknown effect '{}'",
                    effect.effect
                )));
            }
            if effect.params.len() > COLOR_MATRIX_LEN {
                return Err(ConfigError::Invalid(format!(
                    "effects[{index}] has {} params; at most {COLOR_MATRIX_LEN} are allowed",
                    effect.params.len()
                )));
            }
            parse_mirror(effect.mirror.as_deref(), &format!("effects[{index}].mirror"))?;
        }

        if let Some(capture) = &self.capture {
            if capture.count == 0 {
                return Err(ConfigError::Invalid("capture.count must be >= 1".into()));
            }
            if capture.timeout.is_zero() {
                return Err(ConfigError::Invalid(
                    "capture.timeout must be greater than zero".into(),
                ));
            }
        }

        if let Some(renderer) = &self.renderer {
            if renderer.width == 0 || renderer.height == 0 {
                return Err(ConfigError::Invalid(
                    "renderer width and height must be greater than zero".into(),
                ));
            }
            if let Some(fps) = renderer.max_fps {
                if fps < 0.0 {
                    return Err(ConfigError::Invalid("renderer.max_fps must be >= 0".into()));
                }
            }
            if let Some(slack) = renderer.slack {
                if !(0.0..=0.5).contains(&slack) {
                    return Err(ConfigError::Invalid(
                        "renderer.slack must be within 0.0..=0.5".into(),
                    ));
                }
            }
            parse_mirror(renderer.mirror.as_deref(), "renderer.mirror")?;
        }

        if self.capture.is_none() && self.renderer.is_none() {
            return Err(ConfigError::Invalid(
                "config needs a [capture] or [renderer] section to produce output".into(),
            ));
        }

        Ok(())
    }

    pub fn backend(&self) -> Result<BackendPreference, ConfigError> {
        self.executor
            .backend
            .parse()
            .map_err(|err| ConfigError::Invalid(format!("executor.backend: {err}")))
    }

    /// Executor settings, with the backend overridden when `backend` is set.
    pub fn executor_config(
        &self,
        backend: Option<BackendPreference>,
    ) -> Result<ExecutorConfig, ConfigError> {
        let mut config = ExecutorConfig::new(self.executor.name.clone())
            .with_size(self.executor.width, self.executor.height);
        config.backend = match backend {
            Some(backend) => backend,
            None => self.backend()?,
        };
        config.feature_level = self.executor.feature_level.into();
        config.priority = self.executor.priority;
        config.init_timeout = self.executor.init_timeout.unwrap_or(DEFAULT_INIT_TIMEOUT);
        Ok(config)
    }
}

impl EffectSection {
    pub fn effect(&self) -> Result<Effect, ConfigError> {
        Effect::from_name(&self.effect)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown effect '{}'", self.effect)))
    }

    pub fn mirror(&self) -> Result<MirrorMode, ConfigError> {
        parse_mirror(self.mirror.as_deref(), "effect mirror")
    }
}

impl RendererSection {
    pub fn mirror(&self) -> Result<MirrorMode, ConfigError> {
        parse_mirror(self.mirror.as_deref(), "renderer.mirror")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[executor]
name = "bench"
backend = "software"
feature_level = "baseline"
priority = 5
init_timeout = "2s"

[source]
kind = "checkerboard"
size = 64
cell = 8
fps = 60

[[effects]]
effect = "grayscale"

[[effects]]
effect = "color_matrix"
params = [1, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 1, 0]
mirror = "horizontal"

[capture]
count = 3
interval = "50ms"
after_frames = 2

[renderer]
width = 32
height = 32
max_fps = 30
mirror = "vertical"
"#;

    #[test]
    fn parses_sample_config() {
        let config = PipelineConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.executor.name, "bench");
        assert_eq!(config.backend().unwrap(), BackendPreference::Software);
        assert_eq!(config.source.kind, SourceKind::Checkerboard);
        assert_eq!(config.source.size, 64);
        assert_eq!(config.effects.len(), 2);
        assert_eq!(config.effects[1].effect().unwrap(), Effect::ColorMatrix);
        assert_eq!(config.effects[1].mirror().unwrap(), MirrorMode::Horizontal);
        assert_eq!(config.effects[0].mirror().unwrap(), MirrorMode::Normal);

        let capture = config.capture.as_ref().unwrap();
        assert_eq!(capture.count, 3);
        assert_eq!(capture.interval, Duration::from_millis(50));
        assert_eq!(capture.after_frames, 2);
        assert_eq!(capture.timeout, Duration::from_secs(5));

        let renderer = config.renderer.as_ref().unwrap();
        assert_eq!(renderer.max_fps, Some(30.0));
        assert_eq!(renderer.mirror().unwrap(), MirrorMode::Vertical);
    }

    #[test]
    fn builds_executor_config() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        let executor = config.executor_config(None).unwrap();
        assert_eq!(executor.name, "bench");
        assert_eq!(executor.backend, BackendPreference::Software);
        assert_eq!(executor.feature_level, FeatureLevel::Baseline);
        assert_eq!(executor.priority, Some(5));
        assert_eq!(executor.init_timeout, Duration::from_secs(2));

        let forced = config
            .executor_config(Some(BackendPreference::Wgpu))
            .unwrap();
        assert_eq!(forced.backend, BackendPreference::Wgpu);
    }

    #[test]
    fn applies_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
version = 1

[source]
kind = "checkerboard"

[capture]
"#,
        )
        .unwrap();
        assert_eq!(config.executor.backend, "auto");
        assert_eq!(config.executor.feature_level, FeatureLevelSetting::High);
        assert_eq!(config.source.size, 128);
        assert_eq!(config.source.fps, 30.0);
        let capture = config.capture.unwrap();
        assert_eq!(capture.count, 1);
        assert_eq!(capture.interval, Duration::from_millis(100));
        assert!(config.effects.is_empty());
    }

    #[test]
    fn rejects_unknown_effect() {
        let err = PipelineConfig::from_toml_str(
            r#"
version = 1

[source]
kind = "checkerboard"

[[effects]]
effect = "sepia"

[capture]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("sepia")));
    }

    #[test]
    fn rejects_image_source_without_path() {
        let err = PipelineConfig::from_toml_str(
            r#"
version = 1

[source]
kind = "image"

[capture]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_config_without_outputs() {
        let err = PipelineConfig::from_toml_str(
            r#"
version = 1

[source]
kind = "checkerboard"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_version_and_backend() {
        let bad_version = "version = 2\n[source]\nkind = \"checkerboard\"\n[capture]\n";
        assert!(matches!(
            PipelineConfig::from_toml_str(bad_version),
            Err(ConfigError::Invalid(_))
        ));
        let bad_backend =
            "version = 1\n[executor]\nbackend = \"metal\"\n[source]\nkind = \"checkerboard\"\n[capture]\n";
        assert!(matches!(
            PipelineConfig::from_toml_str(bad_backend),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_malformed_duration() {
        let err = PipelineConfig::from_toml_str(
            "version = 1\n[source]\nkind = \"checkerboard\"\n[capture]\ninterval = \"soon\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_resolves_relative_image_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(
            &path,
            "version = 1\n[source]\nkind = \"image\"\npath = \"frames/in.png\"\n[capture]\n",
        )
        .unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.source.path, Some(dir.path().join("frames/in.png")));

        let missing = PipelineConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
