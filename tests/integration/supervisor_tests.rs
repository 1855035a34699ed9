//! Integration tests for registry startup against real child processes.

use std::time::Duration;

use local_registry::registry::npm_config::{
    auth_token_key, RegistryConfigWriter, NPM_REGISTRY_ENV, YARN_REGISTRY_ENV,
};
use local_registry::registry::supervisor::start_registry;
use local_registry::{AppError, StartOptions};

use super::test_helpers::{
    eventually, file_registry, pid_alive, ready_script, script_config, IDLE, READY_LINE,
};

#[tokio::test]
#[serial_test::serial]
async fn setup_resolves_with_announced_port_and_wires_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (registry, store) = file_registry(script_config(&ready_script()), temp.path());

    let info = registry
        .setup(StartOptions::new("demo:local-registry"))
        .await
        .expect("setup");

    assert_eq!(info.port, 4873);
    assert_eq!(info.registry_url, "http://localhost:4873");
    assert_eq!(
        std::env::var(NPM_REGISTRY_ENV).as_deref(),
        Ok("http://localhost:4873")
    );
    assert_eq!(
        std::env::var(YARN_REGISTRY_ENV).as_deref(),
        Ok("http://localhost:4873")
    );
    assert_eq!(
        store.get(&auth_token_key(4873)).expect("get").as_deref(),
        Some("secretVerdaccioToken")
    );
    assert_eq!(registry.session(), Some(info));

    assert!(registry.teardown().is_clean());
}

#[tokio::test]
#[serial_test::serial]
async fn registry_receives_target_and_storage_arguments() {
    let temp = tempfile::tempdir().expect("tempdir");
    let args_file = temp.path().join("args.txt");
    let script = format!(
        "printf '%s\\n' \"$0\" \"$@\" > '{}'; echo 'http://localhost:4990/'; {IDLE}",
        args_file.display()
    );
    let (registry, _store) = file_registry(script_config(&script), temp.path());
    let storage = temp.path().join("storage");

    registry
        .setup(
            StartOptions::new("demo:local-registry")
                .with_storage(&storage)
                .with_verbose(true),
        )
        .await
        .expect("setup");
    registry.teardown();

    let args = std::fs::read_to_string(&args_file).expect("args written");
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(
        args,
        vec![
            "run",
            "demo:local-registry",
            "--location",
            "none",
            "--clear",
            "true",
            "--storage",
            storage.to_str().expect("utf8 path"),
        ]
    );
}

#[tokio::test]
async fn exit_before_ready_is_premature_exit_with_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (registry, store) = file_registry(script_config("echo booting; exit 3"), temp.path());

    let err = registry
        .setup(StartOptions::new("demo:local-registry"))
        .await
        .expect_err("must fail");

    assert!(matches!(err, AppError::PrematureExit(Some(3))), "got {err:?}");
    assert!(registry.session().is_none());
    assert!(!store.path().exists(), "no configuration written");
}

#[tokio::test]
async fn missing_launcher_is_spawn_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = script_config("true");
    config.launcher = "/nonexistent/local-registry-launcher".into();
    let (registry, _store) = file_registry(config, temp.path());

    let err = registry
        .setup(StartOptions::new("demo:local-registry"))
        .await
        .expect_err("must fail");

    assert!(matches!(err, AppError::Spawn(_)), "got {err:?}");
    assert!(err.to_string().starts_with("spawn:"));
}

#[tokio::test]
async fn empty_target_fails_before_spawning() {
    let temp = tempfile::tempdir().expect("tempdir");
    let marker = temp.path().join("spawned");
    let script = format!("touch '{}'; echo http://localhost:4873/", marker.display());
    let (registry, _store) = file_registry(script_config(&script), temp.path());

    let err = registry
        .setup(StartOptions::new(""))
        .await
        .expect_err("must fail");

    assert!(matches!(err, AppError::Usage(_)), "got {err:?}");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!marker.exists(), "no process may be spawned");
}

#[tokio::test]
async fn silent_registry_times_out_and_is_killed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let pid_file = temp.path().join("pid");
    let script = format!("echo $$ > '{}'; echo starting; {IDLE}", pid_file.display());
    let mut config = script_config(&script);
    config.startup_timeout_seconds = 1;
    let (registry, _store) = file_registry(config, temp.path());

    let err = registry
        .setup(StartOptions::new("demo:local-registry"))
        .await
        .expect_err("must time out");
    assert!(matches!(err, AppError::StartupTimeout(_)), "got {err:?}");

    let pid: u32 = std::fs::read_to_string(&pid_file)
        .expect("pid written")
        .trim()
        .parse()
        .expect("pid");
    assert!(
        eventually(Duration::from_secs(8), || !pid_alive(pid)).await,
        "timed-out registry must be terminated"
    );
}

#[tokio::test]
#[serial_test::serial]
async fn second_setup_while_active_is_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (registry, _store) = file_registry(script_config(&ready_script()), temp.path());

    let first = registry
        .setup(StartOptions::new("demo:local-registry"))
        .await
        .expect("setup");
    let err = registry
        .setup(StartOptions::new("demo:local-registry"))
        .await
        .expect_err("second setup must fail");

    assert!(matches!(err, AppError::Usage(_)), "got {err:?}");
    assert_eq!(registry.session(), Some(first));
    registry.teardown();
}

#[tokio::test]
#[serial_test::serial]
async fn start_registry_returns_live_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = script_config(&ready_script());
    let writer = RegistryConfigWriter::new(
        local_registry::registry::npm_config::NpmrcFileStore::new(temp.path().join(".npmrc")),
    );

    let session = start_registry(&config, &StartOptions::new("demo:local-registry"), &writer)
        .await
        .expect("start");

    assert_eq!(session.port(), 4873);
    assert_eq!(session.auth_token(), "secretVerdaccioToken");
    let pid = session.process().pid().expect("pid");
    assert!(pid_alive(pid));
    assert!(!session.process().has_exited());

    session.process().kill().expect("kill");
    assert!(eventually(Duration::from_secs(8), || !pid_alive(pid)).await);
    writer.revert(4873).expect("revert");
}

#[tokio::test]
#[serial_test::serial]
async fn port_printed_without_trailing_output_is_ready() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = format!("printf 'http://localhost:4873'; {IDLE}");
    let mut config = script_config(&script);
    config.startup_timeout_seconds = 5;
    let (registry, store) = file_registry(config, temp.path());

    let info = registry
        .setup(StartOptions::new("demo:local-registry"))
        .await
        .expect("setup");

    assert_eq!(info.port, 4873);
    assert!(store.get(&auth_token_key(4873)).expect("get").is_some());
    assert!(registry.teardown().is_clean());
}

#[tokio::test]
#[serial_test::serial]
async fn abandoned_setup_stops_child_and_allows_retry() {
    let temp = tempfile::tempdir().expect("tempdir");
    let pid_file = temp.path().join("pids");
    // First launch stays silent; later launches announce readiness.
    let script = format!(
        "echo $$ >> '{pids}'; \
         if [ $(wc -l < '{pids}') -gt 1 ]; then echo '{READY_LINE}'; fi; {IDLE}",
        pids = pid_file.display()
    );
    let (registry, _store) = file_registry(script_config(&script), temp.path());

    let abandoned = tokio::time::timeout(
        Duration::from_millis(500),
        registry.setup(StartOptions::new("demo:local-registry")),
    )
    .await;
    assert!(abandoned.is_err(), "setup must still be waiting");

    let first_pid: u32 = std::fs::read_to_string(&pid_file)
        .expect("pid written")
        .lines()
        .next()
        .expect("first pid")
        .trim()
        .parse()
        .expect("pid");
    assert!(
        eventually(Duration::from_secs(8), || !pid_alive(first_pid)).await,
        "abandoned registry must be terminated"
    );

    let info = registry
        .setup(StartOptions::new("demo:local-registry"))
        .await
        .expect("retry after abandoned setup");
    assert_eq!(info.port, 4873);
    assert!(registry.teardown().is_clean());
}
