//! Extension Registry Tests
//!
//! Tests loading through the registry:
//! - Repeated requires share one instance
//! - Concurrent first requires load exactly once
//! - Failed loads are not remembered
//! - Resolution and installation failures

mod common;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{placeholder_library, CountingLoader};
use nativebridge_core::sdk::{
    ArgKind, ArgSpec, CommandSpec, ExtensionMetadata, ExtensionSurface,
};
use nativebridge_core::{BridgeConfig, BridgeError, Channel, ExtensionRegistry, ModuleLoader, Result};

fn surface() -> ExtensionSurface {
    ExtensionSurface::new()
        .with_command(CommandSpec::blocking("getLevel").arg(ArgSpec::new("unit", ArgKind::Octet)))
        .with_command(CommandSpec::post("stop"))
        .with_event("levelChanged")
}

fn registry_in(dir: &Path, loader: Arc<dyn ModuleLoader>) -> ExtensionRegistry {
    let config = BridgeConfig::default().with_search_dirs([dir.to_path_buf()]);
    ExtensionRegistry::new(config, loader)
}

#[test]
fn test_require_returns_same_exports() {
    let dir = tempfile::tempdir().unwrap();
    let path = placeholder_library(dir.path(), "battery");
    let loader = CountingLoader::new(surface());
    let registry = registry_in(dir.path(), loader.clone());

    let first = registry.require("battery").unwrap();
    let second = registry.require("battery").unwrap();
    let by_path = registry.require(path.to_str().unwrap()).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &by_path));
    assert_eq!(loader.instantiated(), 1);
    assert_eq!(first.extension_id(), "org.test.counting");
}

#[test]
fn test_descriptor_and_loaded() {
    let dir = tempfile::tempdir().unwrap();
    placeholder_library(dir.path(), "battery");
    let registry = registry_in(dir.path(), CountingLoader::new(surface()));

    assert!(!registry.is_loaded("battery"));
    assert!(registry.descriptor("battery").is_none());

    let instance = registry.require_instance("battery").unwrap();
    assert!(registry.is_loaded("battery"));

    let descriptor = registry.descriptor("battery").unwrap();
    assert_eq!(descriptor.name, "battery");
    assert_eq!(descriptor.extension_id, "org.test.counting");
    assert_eq!(descriptor.loadable_path, instance.descriptor.loadable_path);
    assert_eq!(registry.loaded().len(), 1);
}

#[test]
fn test_concurrent_require_loads_once() {
    let dir = tempfile::tempdir().unwrap();
    placeholder_library(dir.path(), "slow");
    let mut loader = CountingLoader::with_metadata(
        ExtensionMetadata::new("org.test.slow", "Slow", semver::Version::new(1, 0, 0))
            .with_surface(surface()),
    );
    loader.delay = Duration::from_millis(50);
    let loader = Arc::new(loader);
    let registry = Arc::new(registry_in(dir.path(), loader.clone()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || registry.require("slow").unwrap())
        })
        .collect();
    let exports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(loader.instantiated(), 1);
    assert!(exports.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[test]
fn test_not_found_lists_searched_paths() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_in(dir.path(), CountingLoader::new(surface()));

    match registry.require("missing") {
        Err(BridgeError::NotFound { name, searched }) => {
            assert_eq!(name, "missing");
            assert!(!searched.is_empty());
            assert!(searched.iter().all(|p| p.starts_with(dir.path())));
        }
        other => panic!("unexpected {:?}", other),
    }
}

/// Fails the first instantiation, then behaves like the wrapped loader.
struct FlakyLoader {
    inner: Arc<CountingLoader>,
    fail_next: AtomicBool,
}

impl ModuleLoader for FlakyLoader {
    fn metadata(&self, path: &Path) -> Result<ExtensionMetadata> {
        self.inner.metadata(path)
    }

    fn instantiate(&self, path: &Path, extension_id: &str) -> Result<Arc<dyn Channel>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::LoadFailed {
                path: PathBuf::from(path),
                reason: "transient".to_string(),
            });
        }
        self.inner.instantiate(path, extension_id)
    }
}

#[test]
fn test_failed_load_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    placeholder_library(dir.path(), "flaky");
    let inner = CountingLoader::new(surface());
    let loader = Arc::new(FlakyLoader {
        inner: inner.clone(),
        fail_next: AtomicBool::new(true),
    });
    let registry = registry_in(dir.path(), loader);

    let err = registry.require("flaky").unwrap_err();
    assert!(err.is_load_error());
    assert!(!registry.is_loaded("flaky"));

    registry.require("flaky").unwrap();
    assert!(registry.is_loaded("flaky"));
    assert_eq!(inner.instantiated(), 1);
}

#[test]
fn test_metadata_failure() {
    let dir = tempfile::tempdir().unwrap();
    placeholder_library(dir.path(), "broken");
    let mut loader = CountingLoader::with_metadata(ExtensionMetadata::new(
        "org.test.broken",
        "Broken",
        semver::Version::new(1, 0, 0),
    ));
    loader.fail_metadata = true;
    let loader = Arc::new(loader);
    let registry = registry_in(dir.path(), loader.clone());

    assert!(matches!(
        registry.require("broken"),
        Err(BridgeError::LoadFailed { .. })
    ));
    assert_eq!(loader.instantiated(), 0);
}

#[test]
fn test_empty_extension_id_rejected() {
    let dir = tempfile::tempdir().unwrap();
    placeholder_library(dir.path(), "anon");
    let loader = Arc::new(CountingLoader::with_metadata(ExtensionMetadata::new(
        "",
        "Anonymous",
        semver::Version::new(1, 0, 0),
    )));
    let registry = registry_in(dir.path(), loader);

    assert!(matches!(
        registry.require("anon"),
        Err(BridgeError::LoadFailed { .. })
    ));
}

#[test]
fn test_install_failure_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    placeholder_library(dir.path(), "dup");
    let loader = CountingLoader::new(
        ExtensionSurface::new()
            .with_command(CommandSpec::post("stop"))
            .with_command(CommandSpec::blocking("stop")),
    );
    let registry = registry_in(dir.path(), loader.clone());

    for _ in 0..2 {
        assert!(matches!(
            registry.require("dup"),
            Err(BridgeError::InstallFailed { .. })
        ));
    }
    assert_eq!(loader.instantiated(), 2);
    assert!(registry.loaded().is_empty());
}

#[test]
fn test_failed_requires_leave_no_slots() {
    let dir = tempfile::tempdir().unwrap();
    let names = ["bad-a", "bad-b", "bad-c"];
    for name in names {
        placeholder_library(dir.path(), name);
    }
    let mut loader = CountingLoader::with_metadata(ExtensionMetadata::new(
        "org.test.bad",
        "Bad",
        semver::Version::new(1, 0, 0),
    ));
    loader.fail_metadata = true;
    let registry = registry_in(dir.path(), Arc::new(loader));

    for _ in 0..3 {
        for name in names {
            assert!(registry.require(name).is_err());
        }
        assert!(registry.require("missing").is_err());
    }
    assert!(registry.loaded().is_empty());
    assert_eq!(registry.slot_count(), 0);
}

#[test]
fn test_retry_after_failure_keeps_one_slot() {
    let dir = tempfile::tempdir().unwrap();
    placeholder_library(dir.path(), "flaky");
    let inner = CountingLoader::new(surface());
    let registry = registry_in(
        dir.path(),
        Arc::new(FlakyLoader {
            inner,
            fail_next: AtomicBool::new(true),
        }),
    );

    assert!(registry.require("flaky").is_err());
    assert_eq!(registry.slot_count(), 0);
    registry.require("flaky").unwrap();
    registry.require("flaky").unwrap();
    assert_eq!(registry.slot_count(), 1);
    assert_eq!(registry.loaded().len(), 1);
}

#[test]
fn test_discover_lists_libraries() {
    let dir = tempfile::tempdir().unwrap();
    placeholder_library(dir.path(), "one");
    placeholder_library(dir.path(), "two");
    std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

    let registry = registry_in(dir.path(), CountingLoader::new(surface()));
    let found = registry.discover();
    assert_eq!(found.len(), 2);
}
