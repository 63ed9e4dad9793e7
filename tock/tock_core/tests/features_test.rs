//! Integration tests for loading scheduler features.
//!
//! These exercise the file and environment sources and the process-wide
//! feature store.

use std::io::Write;
use std::time::Duration;

use tock_core::error::{ConfigError, Error};
use tock_core::features::{self, ENV_ALIGN_WAKE_UPS, ENV_TASK_LEEWAY_MS};
use tock_core::{Feature, SchedulerFeatures, ScopedFeatureOverride};

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "align_wake_ups = true").unwrap();
    writeln!(file, "task_leeway_ms = 4").unwrap();

    let features = SchedulerFeatures::load(file.path()).unwrap();
    assert!(features.align_wake_ups);
    assert_eq!(features.task_leeway, Duration::from_millis(4));
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let features = SchedulerFeatures::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(features, SchedulerFeatures::default());
}

#[test]
fn test_load_malformed_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "align_wake_ups = [").unwrap();

    let err = SchedulerFeatures::load(file.path()).unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::ParseFailed(_))));
}

// The only test in this binary touching the environment, so it cannot race
// with another reader.
#[test]
fn test_env_overrides() {
    std::env::set_var(ENV_ALIGN_WAKE_UPS, "yes");
    std::env::set_var(ENV_TASK_LEEWAY_MS, "20");
    let features = SchedulerFeatures::from_env().unwrap();
    assert!(features.align_wake_ups);
    assert_eq!(features.task_leeway, Duration::from_millis(20));

    std::env::set_var(ENV_TASK_LEEWAY_MS, "soon");
    let err = SchedulerFeatures::from_env().unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::Invalid(_))));

    std::env::set_var(ENV_TASK_LEEWAY_MS, "0");
    assert!(SchedulerFeatures::from_env().is_err());

    std::env::remove_var(ENV_ALIGN_WAKE_UPS);
    std::env::remove_var(ENV_TASK_LEEWAY_MS);
    assert_eq!(
        SchedulerFeatures::from_env().unwrap(),
        SchedulerFeatures::default()
    );
}

#[test]
fn test_process_wide_set_inside_scope() {
    let _scope = ScopedFeatureOverride::new();
    let configured = SchedulerFeatures {
        align_wake_ups: true,
        task_leeway: Duration::from_millis(2),
    };
    features::set(configured).unwrap();
    assert_eq!(features::current(), configured);
    assert!(_scope.is_enabled(Feature::AlignWakeUps));

    let invalid = SchedulerFeatures {
        align_wake_ups: true,
        task_leeway: Duration::ZERO,
    };
    assert!(features::set(invalid).is_err());
    assert_eq!(features::current(), configured);
}
