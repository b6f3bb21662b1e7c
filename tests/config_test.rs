//! Wiring a session from resolved configuration.

mod common;

use canvas_history::AiScheduler;
use canvas_history::action_log::{ActionLogger, read_entries};
use canvas_history::config::{
    CONFIG_DIR_ENV, CONFIG_FILE, ConfigOverrides, ValueSource, resolve_config,
};
use canvas_history::gesture::GestureEngine;
use canvas_history::logging::LogFormat;
use canvas_history::navigation::NavigationController;
use canvas_history::storage::{self, BackendType, DATA_DIR_ENV, open_store};
use common::{TestEnv, snapshot_at};
use serial_test::serial;
use tracing::Level;

#[test]
#[serial]
fn test_session_built_from_config_files() {
    let system = TestEnv::new();
    let data = TestEnv::new();
    let log_path = data.data_path().join("logs").join("action.log");
    // SAFETY: serialized with other env-mutating tests
    unsafe {
        std::env::set_var(CONFIG_DIR_ENV, system.data_path());
        std::env::set_var(DATA_DIR_ENV, data.data_path());
    }

    std::fs::write(
        system.data_path().join(CONFIG_FILE),
        r#"
storage "sqlite"
gesture { threshold 25.0; momentum #false }
ai { max-retries 1; fallback "retry-later" }
"#,
    )
    .unwrap();

    let session_dir = storage::get_storage_dir("poster").unwrap();
    std::fs::create_dir_all(&session_dir).unwrap();
    std::fs::write(
        session_dir.join(CONFIG_FILE),
        format!(
            "max-history-size 2\naction-log \"{}\"\n",
            log_path.display()
        ),
    )
    .unwrap();

    let resolved = resolve_config(&session_dir, &ConfigOverrides::default()).unwrap();
    unsafe {
        std::env::remove_var(CONFIG_DIR_ENV);
        std::env::remove_var(DATA_DIR_ENV);
    }

    assert_eq!(resolved.storage(), BackendType::Sqlite);
    assert_eq!(resolved.storage.source, ValueSource::System);
    assert_eq!(resolved.max_history_size(), 2);
    assert_eq!(resolved.max_history_size.source, ValueSource::Session);

    let store = open_store(resolved.storage(), &session_dir).unwrap();
    let logger = ActionLogger::new(resolved.action_log_path().unwrap(), "poster");
    let mut nav = NavigationController::new(store, resolved.navigation_config("poster").unwrap())
        .unwrap()
        .with_action_log(logger);
    for i in 0..3 {
        nav.create_snapshot(snapshot_at(&format!("p{i}"), i), None)
            .unwrap();
    }
    assert_eq!(nav.graph().len(), 2);
    nav.undo().unwrap();
    assert!(nav.undo().is_err());

    let entries = read_entries(&log_path).unwrap();
    assert_eq!(entries.len(), 5);
    assert!(entries.iter().all(|e| e.session == "poster"));
    assert!(!entries.last().unwrap().success);

    let gestures = GestureEngine::new(resolved.gesture_config().unwrap()).unwrap();
    assert_eq!(gestures.config().threshold, 25.0);
    assert!(!gestures.config().momentum_enabled);

    let scheduler = AiScheduler::new(resolved.scheduler_config().unwrap()).unwrap();
    assert_eq!(scheduler.config().retry.max_retries, 1);
    assert!(session_dir.join(storage::SQLITE_FILE).exists());
}

#[test]
#[serial]
fn test_overrides_win_over_files() {
    let system = TestEnv::new();
    let session = TestEnv::new();
    unsafe { std::env::set_var(CONFIG_DIR_ENV, system.data_path()) };
    std::fs::write(
        session.data_path().join(CONFIG_FILE),
        "storage \"jsonl\"\nmax-history-size 7\n",
    )
    .unwrap();

    let overrides = ConfigOverrides::new()
        .with_storage(BackendType::Memory)
        .with_max_history_size(3);
    let resolved = resolve_config(session.data_path(), &overrides).unwrap();
    unsafe { std::env::remove_var(CONFIG_DIR_ENV) };

    assert_eq!(resolved.storage(), BackendType::Memory);
    assert_eq!(resolved.storage.source, ValueSource::Override);
    assert_eq!(resolved.max_history_size(), 3);
    assert_eq!(resolved.max_history_size.source, ValueSource::Override);
}

#[test]
#[serial]
fn test_log_block_layers_into_log_config() {
    let system = TestEnv::new();
    let session = TestEnv::new();
    let log_file = session.data_path().join("engine.log");
    unsafe { std::env::set_var(CONFIG_DIR_ENV, system.data_path()) };
    std::fs::write(
        system.data_path().join(CONFIG_FILE),
        "log { level \"trace\"; format \"json\" }\n",
    )
    .unwrap();
    std::fs::write(
        session.data_path().join(CONFIG_FILE),
        format!("log {{ level \"warn\"; file \"{}\" }}\n", log_file.display()),
    )
    .unwrap();

    let resolved = resolve_config(session.data_path(), &ConfigOverrides::default()).unwrap();
    unsafe { std::env::remove_var(CONFIG_DIR_ENV) };

    let log = resolved.log_config();
    assert_eq!(log.level, Level::WARN);
    assert_eq!(log.format, LogFormat::Json);
    assert_eq!(log.file, Some(log_file));
}
