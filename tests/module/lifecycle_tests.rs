//! Module lifecycle tests
//!
//! Discovery, registry defaults, bootstrap loading and crash recovery.

use serial_test::serial;
use std::sync::Arc;
use tokio::time::Duration;

use module_gate::module::registry::ModuleDiscovery;
use module_gate::module::sandbox::ProcessSandbox;
use module_gate::module::{ModuleManager, ModuleRegistry, ModuleState, RuntimeStatus};

use super::test_utils::*;

#[tokio::test]
async fn test_missing_modules_dir_lists_nothing() {
    let fixture = ModuleTestFixture::new();
    let missing = fixture.temp_dir.path().join("not-there");

    let manager = ModuleManager::new(
        ModuleDiscovery::new(&missing, "gate"),
        ModuleRegistry::in_memory().unwrap(),
        Arc::new(ProcessSandbox::new(fixture.sandbox_config())),
    );

    let listing = manager.list_modules().await.unwrap();
    assert!(listing.modules.is_empty());
    assert!(listing.collisions.is_empty());
    assert!(!missing.exists());
}

#[tokio::test]
async fn test_discovered_modules_default_off() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("alpha.sh", "Alpha Tools", CLEAN);
    fixture.write_module("nested/beta.sh", "Beta", CLEAN);
    std::fs::write(fixture.modules_dir.join("README.sh"), "echo no header\n").unwrap();

    let manager = fixture.manager();
    let listing = manager.list_modules().await.unwrap();

    let ids: Vec<&str> = listing
        .modules
        .iter()
        .map(|m| m.descriptor.identifier.as_str())
        .collect();
    assert_eq!(ids, vec!["gate_alpha_tools", "gate_beta"]);
    assert!(listing
        .modules
        .iter()
        .all(|m| m.state == ModuleState::Off && m.runtime.is_none()));

    assert_eq!(
        fixture.registry.stored_state("gate_alpha_tools").unwrap(),
        Some(ModuleState::Off)
    );
    let alpha = &listing.modules[0].descriptor;
    assert_eq!(alpha.display_name, "Alpha Tools");
    assert_eq!(alpha.description.as_deref(), Some("Alpha Tools test module"));
    assert_eq!(alpha.version.as_deref(), Some("1.0"));
}

#[tokio::test]
async fn test_rescan_keeps_existing_state() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("alpha.sh", "Alpha", CLEAN);

    let manager = fixture.manager();
    manager.rescan().unwrap();
    fixture
        .registry
        .set_state("gate_alpha", ModuleState::On)
        .unwrap();

    manager.rescan().unwrap();
    manager.rescan().unwrap();
    assert_eq!(
        fixture.registry.get_state("gate_alpha").unwrap(),
        ModuleState::On
    );
    assert_eq!(fixture.registry.entries().unwrap().len(), 1);
}

#[tokio::test]
async fn test_identifier_collision_keeps_first() {
    let fixture = ModuleTestFixture::new();
    let first = fixture.write_module("a.sh", "Dark Mode", CLEAN);
    let second = fixture.write_module("b.sh", "dark-mode", CLEAN);

    let listing = fixture.manager().list_modules().await.unwrap();
    assert_eq!(listing.modules.len(), 1);
    assert_eq!(listing.modules[0].descriptor.entry_point, first);

    assert_eq!(listing.collisions.len(), 1);
    let collision = &listing.collisions[0];
    assert_eq!(collision.identifier, "gate_dark_mode");
    assert_eq!(collision.entry_point, second);
    assert_eq!(collision.kept_entry_point, first);
    assert_eq!(fixture.registry.entries().unwrap().len(), 1);
}

#[tokio::test]
async fn test_bootstrap_loads_only_enabled_modules() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("alpha.sh", "Alpha", RECORDS_RUNS);
    fixture.write_module("beta.sh", "Beta", RECORDS_RUNS);
    fixture
        .registry
        .set_state("gate_beta", ModuleState::On)
        .unwrap();

    let mut manager = fixture.manager();
    let report = manager.bootstrap().await.unwrap();

    assert_eq!(report.loaded, vec!["gate_beta".to_string()]);
    assert!(report.failures.is_empty());
    assert_eq!(fixture.recorded_runs("gate_beta"), vec!["run"]);
    assert!(fixture.recorded_runs("gate_alpha").is_empty());
    assert_eq!(
        manager.runtime_status("gate_beta").await,
        Some(RuntimeStatus::Completed)
    );

    // Loading again is a no-op
    let again = manager.bootstrap().await.unwrap();
    assert_eq!(again.loaded, vec!["gate_beta".to_string()]);
    assert_eq!(fixture.recorded_runs("gate_beta"), vec!["run"]);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_contains_failures() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();
    let fixture = ModuleTestFixture::new();
    fixture.write_module("a.sh", "Alpha", CLEAN);
    fixture.write_module("b.sh", "Broken", FAILS_ON_LOAD);
    fixture.write_module("c.sh", "Gamma", CLEAN);
    fixture.write_module("d.sh", "Delta", CLEAN);
    for id in ["gate_alpha", "gate_broken", "gate_gamma", "gate_delta"] {
        fixture.registry.set_state(id, ModuleState::On).unwrap();
    }

    let mut manager = fixture.manager();
    let report = manager.bootstrap().await.unwrap();

    assert_eq!(
        report.loaded,
        vec!["gate_alpha", "gate_gamma", "gate_delta"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
    );
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.identifier, "gate_broken");
    assert_eq!(failure.display_name, "Broken");
    assert!(failure.error.contains("Fatal: database table missing"));

    assert_eq!(
        fixture.registry.get_state("gate_broken").unwrap(),
        ModuleState::Off
    );
    for id in ["gate_alpha", "gate_gamma", "gate_delta"] {
        assert_eq!(fixture.registry.get_state(id).unwrap(), ModuleState::On);
    }

    // The next bootstrap does not retry the disabled module
    let next = manager.bootstrap().await.unwrap();
    assert!(next.failures.is_empty());

    let entries = logs.lines_containing("Fatal: database table missing");
    assert_eq!(entries.len(), 1, "{:#?}", entries);
    assert!(entries[0].contains("ERROR"), "{}", entries[0]);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_long_running_module_is_stopped_on_shutdown() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("daemon.sh", "Daemon", LONG_RUNNING);
    fixture
        .registry
        .set_state("gate_daemon", ModuleState::On)
        .unwrap();

    let mut manager = fixture.manager();
    let report = manager.bootstrap().await.unwrap();
    assert_eq!(report.loaded, vec!["gate_daemon".to_string()]);
    assert_eq!(
        manager.runtime_status("gate_daemon").await,
        Some(RuntimeStatus::Running)
    );

    manager.shutdown().await.unwrap();
    assert!(manager.loaded_modules().await.is_empty());
    // Shutdown is not a failure
    assert_eq!(
        fixture.registry.get_state("gate_daemon").unwrap(),
        ModuleState::On
    );
}

#[tokio::test]
#[serial]
async fn test_crash_after_load_deactivates_module() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();
    let fixture = ModuleTestFixture::new();
    fixture.write_module("flaky.sh", "Flaky", CRASHES_LATER);
    fixture
        .registry
        .set_state("gate_flaky", ModuleState::On)
        .unwrap();

    let mut manager = fixture.manager();
    let report = manager.bootstrap().await.unwrap();
    assert_eq!(report.loaded, vec!["gate_flaky".to_string()]);

    let registry = fixture.registry.clone();
    let deactivated = wait_until(Duration::from_secs(10), || {
        registry.get_state("gate_flaky").ok() == Some(ModuleState::Off)
    })
    .await;
    assert!(deactivated, "crashed module was not switched off");

    let mut unloaded = false;
    for _ in 0..100 {
        if manager.loaded_modules().await.is_empty() {
            unloaded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(unloaded, "crashed module is still listed as loaded");

    let entries = logs.lines_containing("Fatal: lost connection");
    assert_eq!(entries.len(), 1, "{:#?}", entries);
    assert!(entries[0].contains("gate_flaky"), "{}", entries[0]);

    manager.shutdown().await.unwrap();
}
