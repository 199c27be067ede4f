//! Activation tests
//!
//! Toggling modules through the manager: test-load gating on enable,
//! unconditional disable, and load failures after a passing test-load.

use serial_test::serial;

use module_gate::module::{ModuleError, ModuleState, ToggleOutcome, ValidationResult};

use super::test_utils::*;

#[tokio::test]
async fn test_enable_clean_module() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("alpha.sh", "Alpha", RECORDS_RUNS);

    let mut manager = fixture.manager();
    manager.rescan().unwrap();

    let outcome = manager.enable_module("gate_alpha").await.unwrap();
    assert_eq!(outcome, ToggleOutcome::Enabled);
    assert_eq!(
        fixture.registry.get_state("gate_alpha").unwrap(),
        ModuleState::On
    );
    // Test-load first, then the real load
    assert_eq!(fixture.recorded_runs("gate_alpha"), vec!["validate", "run"]);
    assert_eq!(manager.loaded_modules().await, vec!["gate_alpha".to_string()]);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_enable_broken_module_is_rejected() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("broken.sh", "Broken", BROKEN);

    let mut manager = fixture.manager();
    manager.rescan().unwrap();

    let outcome = manager.enable_module("gate_broken").await.unwrap();
    assert_eq!(
        outcome,
        ToggleOutcome::Rejected("Fatal: call to undefined function boot()".to_string())
    );
    assert_eq!(
        fixture.registry.get_state("gate_broken").unwrap(),
        ModuleState::Off
    );
    assert!(manager.loaded_modules().await.is_empty());
}

#[tokio::test]
async fn test_rejected_enable_leaves_unregistered_module_unregistered() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("broken.sh", "Broken", BROKEN);

    let mut manager = fixture.manager();
    let outcome = manager.enable_module("gate_broken").await.unwrap();

    assert!(matches!(outcome, ToggleOutcome::Rejected(_)));
    assert_eq!(fixture.registry.stored_state("gate_broken").unwrap(), None);
}

#[tokio::test]
async fn test_disable_never_runs_module() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("alpha.sh", "Alpha", RECORDS_RUNS);
    fixture
        .registry
        .set_state("gate_alpha", ModuleState::On)
        .unwrap();

    let mut manager = fixture.manager();
    let outcome = manager.disable_module("gate_alpha").await.unwrap();

    assert_eq!(outcome, ToggleOutcome::Disabled);
    assert_eq!(
        fixture.registry.get_state("gate_alpha").unwrap(),
        ModuleState::Off
    );
    assert!(fixture.recorded_runs("gate_alpha").is_empty());
}

#[tokio::test]
async fn test_disable_broken_module() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("broken.sh", "Broken", BROKEN);
    fixture
        .registry
        .set_state("gate_broken", ModuleState::On)
        .unwrap();

    let mut manager = fixture.manager();
    assert_eq!(
        manager.disable_module("gate_broken").await.unwrap(),
        ToggleOutcome::Disabled
    );
    assert_eq!(
        fixture.registry.get_state("gate_broken").unwrap(),
        ModuleState::Off
    );
}

#[tokio::test]
async fn test_round_trip_toggle() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("alpha.sh", "Alpha", CLEAN);

    let mut manager = fixture.manager();
    assert_eq!(
        manager.enable_module("gate_alpha").await.unwrap(),
        ToggleOutcome::Enabled
    );
    assert_eq!(
        manager.disable_module("gate_alpha").await.unwrap(),
        ToggleOutcome::Disabled
    );
    assert!(manager.loaded_modules().await.is_empty());
    assert_eq!(
        manager.enable_module("gate_alpha").await.unwrap(),
        ToggleOutcome::Enabled
    );
    assert_eq!(
        fixture.registry.get_state("gate_alpha").unwrap(),
        ModuleState::On
    );

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_load_failure_after_passing_validation() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();
    let fixture = ModuleTestFixture::new();
    fixture.write_module("db.sh", "Needs Database", FAILS_ON_LOAD);

    let mut manager = fixture.manager();
    let outcome = manager.enable_module("gate_needs_database").await.unwrap();

    match outcome {
        ToggleOutcome::Rejected(message) => {
            assert!(message.contains("Fatal: database table missing"), "{}", message)
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(
        fixture.registry.get_state("gate_needs_database").unwrap(),
        ModuleState::Off
    );
    assert!(manager.loaded_modules().await.is_empty());

    let entries = logs.lines_containing("Fatal: database table missing");
    assert_eq!(entries.len(), 1, "{:#?}", entries);
    assert!(entries[0].contains("ERROR"), "{}", entries[0]);
    assert!(entries[0].contains("gate_needs_database"), "{}", entries[0]);
}

#[tokio::test]
#[serial]
async fn test_modules_dir_created_after_startup() {
    let fixture = ModuleTestFixture::with_relative_modules_dir();
    assert!(!fixture.modules_dir.exists());
    let mut manager = fixture.manager();

    fixture.write_module("late.sh", "Late", RECORDS_RUNS);
    assert_eq!(
        manager.enable_module("gate_late").await.unwrap(),
        ToggleOutcome::Enabled
    );
    assert_eq!(
        fixture.registry.get_state("gate_late").unwrap(),
        ModuleState::On
    );
    assert_eq!(fixture.recorded_runs("gate_late"), vec!["validate", "run"]);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_disable_stops_running_module() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("daemon.sh", "Daemon", LONG_RUNNING);

    let mut manager = fixture.manager();
    assert_eq!(
        manager.enable_module("gate_daemon").await.unwrap(),
        ToggleOutcome::Enabled
    );
    assert_eq!(manager.loaded_modules().await, vec!["gate_daemon".to_string()]);

    assert_eq!(
        manager.disable_module("gate_daemon").await.unwrap(),
        ToggleOutcome::Disabled
    );
    assert!(manager.loaded_modules().await.is_empty());
    assert_eq!(
        fixture.registry.get_state("gate_daemon").unwrap(),
        ModuleState::Off
    );

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_module() {
    let fixture = ModuleTestFixture::new();
    let mut manager = fixture.manager();

    assert_eq!(
        manager.enable_module("gate_missing").await,
        Err(ModuleError::ModuleNotFound("gate_missing".to_string()))
    );
    assert_eq!(
        manager.disable_module("gate_missing").await,
        Err(ModuleError::ModuleNotFound("gate_missing".to_string()))
    );
    assert!(fixture.registry.entries().unwrap().is_empty());
}

#[tokio::test]
async fn test_validate_does_not_change_state() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module("alpha.sh", "Alpha", RECORDS_RUNS);
    fixture.write_module("broken.sh", "Broken", BROKEN);

    let manager = fixture.manager();
    manager.rescan().unwrap();

    assert_eq!(
        manager.validate_module("gate_alpha").await.unwrap(),
        ValidationResult::Passed
    );
    assert!(!manager
        .validate_module("gate_broken")
        .await
        .unwrap()
        .success());

    assert_eq!(fixture.recorded_runs("gate_alpha"), vec!["validate"]);
    assert_eq!(
        fixture.registry.get_state("gate_alpha").unwrap(),
        ModuleState::Off
    );
    assert!(manager.loaded_modules().await.is_empty());
}

#[tokio::test]
async fn test_module_config_reaches_entry_point() {
    let fixture = ModuleTestFixture::new();
    fixture.write_module(
        "themed.sh",
        "Themed",
        "[ \"$MODULE_CONFIG_THEME\" = dark ] || { echo \"theme is '$MODULE_CONFIG_THEME'\" >&2; exit 1; }\n",
    );
    std::fs::write(fixture.modules_dir.join("themed.toml"), "theme = \"dark\"\n").unwrap();

    let mut manager = fixture.manager();
    assert_eq!(
        manager.enable_module("gate_themed").await.unwrap(),
        ToggleOutcome::Enabled
    );
    manager.shutdown().await.unwrap();
}
