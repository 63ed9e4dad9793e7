//! Scheduler feature configuration.
//!
//! Schedulers read two process-wide knobs when they start:
//!
//! - `align_wake_ups`: snap flexible wake-ups onto a shared tick grid so
//!   that unrelated timers fire together.
//! - `task_leeway`: the tick interval of that grid. It only shapes
//!   wake-up alignment; each task carries its own leeway.
//!
//! The values can come from a TOML file, from the environment, or be set
//! programmatically. `ScopedFeatureOverride` changes them for the duration
//! of a scope, which is how tests flip features without leaking state.

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use parking_lot::{const_mutex, Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Environment variable toggling wake-up alignment.
pub const ENV_ALIGN_WAKE_UPS: &str = "TOCK_ALIGN_WAKE_UPS";

/// Environment variable holding the task leeway in milliseconds.
pub const ENV_TASK_LEEWAY_MS: &str = "TOCK_TASK_LEEWAY_MS";

/// Leeway applied when nothing else is configured.
pub const DEFAULT_TASK_LEEWAY: Duration = Duration::from_millis(8);

static CURRENT: Lazy<RwLock<SchedulerFeatures>> =
    Lazy::new(|| RwLock::new(SchedulerFeatures::default()));

static OVERRIDE_LOCK: Mutex<()> = const_mutex(());

/// Boolean scheduler features that can be toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Align flexible wake-ups to the leeway grid
    AlignWakeUps,
}

impl Feature {
    /// Stable name of the feature, as used in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AlignWakeUps => "align_wake_ups",
        }
    }
}

/// Scheduler configuration read once at scheduler start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerFeatures {
    /// Whether wake-ups are snapped to the leeway grid
    #[serde(default)]
    pub align_wake_ups: bool,

    /// Interval of the wake-up alignment grid
    #[serde(
        default = "default_task_leeway",
        rename = "task_leeway_ms",
        with = "millis"
    )]
    pub task_leeway: Duration,
}

fn default_task_leeway() -> Duration {
    DEFAULT_TASK_LEEWAY
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl Default for SchedulerFeatures {
    fn default() -> Self {
        Self {
            align_wake_ups: false,
            task_leeway: default_task_leeway(),
        }
    }
}

impl SchedulerFeatures {
    /// Whether `feature` is enabled.
    pub fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::AlignWakeUps => self.align_wake_ups,
        }
    }

    /// Enable or disable `feature`.
    pub fn set_enabled(&mut self, feature: Feature, enabled: bool) {
        match feature {
            Feature::AlignWakeUps => self.align_wake_ups = enabled,
        }
    }

    /// Parse features from a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let features: SchedulerFeatures =
            toml::from_str(source).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        features.validate()?;
        Ok(features)
    }

    /// Load features from a TOML file.
    ///
    /// A missing file is not an error: the defaults are returned.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(
                "Scheduler configuration not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        info!("Loading scheduler configuration from {}", path.display());
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Apply `TOCK_ALIGN_WAKE_UPS` and `TOCK_TASK_LEEWAY_MS` on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var(ENV_ALIGN_WAKE_UPS) {
            self.align_wake_ups = parse_bool(ENV_ALIGN_WAKE_UPS, &value)?;
        }
        if let Ok(value) = std::env::var(ENV_TASK_LEEWAY_MS) {
            let millis: u64 = value.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} must be an integer, got {:?}", ENV_TASK_LEEWAY_MS, value))
            })?;
            self.task_leeway = Duration::from_millis(millis);
        }
        self.validate()?;
        Ok(self)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Check that the combination of values is usable.
    pub fn validate(&self) -> Result<()> {
        if self.align_wake_ups && self.task_leeway.is_zero() {
            return Err(ConfigError::Invalid(
                "task_leeway_ms must be non-zero when align_wake_ups is enabled".into(),
            )
            .into());
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!("{} must be a boolean, got {:?}", name, value)).into()),
    }
}

/// Snapshot of the process-wide features.
pub fn current() -> SchedulerFeatures {
    *CURRENT.read()
}

/// Replace the process-wide features.
pub fn set(features: SchedulerFeatures) -> Result<()> {
    features.validate()?;
    debug!("Scheduler features set to {:?}", features);
    *CURRENT.write() = features;
    Ok(())
}

/// Temporarily overrides the process-wide features.
///
/// Overrides take effect immediately and the previous features are restored
/// when the guard is dropped. Only one override may be alive at a time;
/// creating a second one blocks until the first is dropped.
///
/// The first explicit enable or disable of a feature within a scope wins:
/// later `*_if_not_set` calls for the same feature are ignored.
pub struct ScopedFeatureOverride {
    previous: SchedulerFeatures,
    touched: Vec<Feature>,
    _serialized: MutexGuard<'static, ()>,
}

impl ScopedFeatureOverride {
    /// Begin an override scope starting from the current features.
    pub fn new() -> Self {
        let serialized = OVERRIDE_LOCK.lock();
        Self {
            previous: current(),
            touched: Vec::new(),
            _serialized: serialized,
        }
    }

    /// Enable `feature` unless this scope already decided it.
    pub fn enable_if_not_set(&mut self, feature: Feature) -> &mut Self {
        self.set_if_not_set(feature, true)
    }

    /// Disable `feature` unless this scope already decided it.
    pub fn disable_if_not_set(&mut self, feature: Feature) -> &mut Self {
        self.set_if_not_set(feature, false)
    }

    /// Set the task leeway for this scope.
    pub fn set_task_leeway(&mut self, leeway: Duration) -> &mut Self {
        CURRENT.write().task_leeway = leeway;
        self
    }

    /// Whether `feature` is currently enabled.
    pub fn is_enabled(&self, feature: Feature) -> bool {
        current().is_enabled(feature)
    }

    fn set_if_not_set(&mut self, feature: Feature, enabled: bool) -> &mut Self {
        if self.touched.contains(&feature) {
            return self;
        }
        self.touched.push(feature);
        CURRENT.write().set_enabled(feature, enabled);
        debug!(
            "Feature {} {} for scope",
            feature.name(),
            if enabled { "enabled" } else { "disabled" }
        );
        self
    }
}

impl Default for ScopedFeatureOverride {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopedFeatureOverride {
    fn drop(&mut self) {
        *CURRENT.write() = self.previous;
    }
}
