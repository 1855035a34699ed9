//! Integration tests for the session slot, using real registry processes.

use std::time::Duration;

use local_registry::registry::lifecycle::LifecycleState;
use local_registry::registry::process::spawn_registry;
use local_registry::registry::session::{RegistrySession, SessionSlot};
use local_registry::StartOptions;

use super::test_helpers::{eventually, pid_alive, script_config, IDLE};

fn sleeper(port: u16) -> RegistrySession {
    let config = script_config(IDLE);
    let (process, _events) =
        spawn_registry(&config, &StartOptions::new("demo:local-registry")).expect("spawn");
    RegistrySession::new(process, port, "t".into())
}

#[tokio::test]
async fn empty_slot_has_no_session() {
    let slot = SessionSlot::new();
    assert!(!slot.is_active());
    assert!(slot.get().is_none());
    assert!(slot.take().is_none());
    slot.clear();
}

#[tokio::test]
async fn set_then_get_returns_snapshot() {
    let slot = SessionSlot::new();
    let session = sleeper(4873);
    let pid = session.process().pid();
    let id = session.id().to_owned();

    assert!(slot.set(session).is_none());

    let info = slot.get().expect("session stored");
    assert_eq!(info.id, id);
    assert_eq!(info.port, 4873);
    assert_eq!(info.registry_url, "http://localhost:4873");
    assert_eq!(info.pid, pid);
    assert!(slot.is_active());

    slot.take().expect("session").process().kill().expect("kill");
}

#[tokio::test]
async fn overwrite_returns_previous_session() {
    let slot = SessionSlot::new();
    slot.set(sleeper(4873));

    let previous = slot.set(sleeper(4874)).expect("previous session returned");

    assert_eq!(previous.port(), 4873);
    assert_eq!(slot.get().expect("session").port, 4874);

    previous.process().kill().expect("kill");
    slot.take().expect("session").process().kill().expect("kill");
}

#[tokio::test]
async fn take_and_clear_do_not_stop_the_process() {
    let slot = SessionSlot::new();
    slot.set(sleeper(4873));

    let session = slot.take().expect("session");
    assert!(!slot.is_active());
    let pid = session.process().pid().expect("pid");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pid_alive(pid), "take must not terminate the registry");
    assert!(!session.process().has_exited());

    slot.set(session);
    slot.clear();
    assert!(slot.get().is_none());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pid_alive(pid), "clear must not terminate the registry");

    // Cleanup: the handle is gone, so signal by pid.
    let raw = i32::try_from(pid).expect("pid fits i32");
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(raw),
        nix::sys::signal::Signal::SIGKILL,
    )
    .expect("kill");
    assert!(eventually(Duration::from_secs(5), || !pid_alive(pid)).await);
}

#[tokio::test]
async fn session_info_serializes_for_status_output() {
    let session = sleeper(4873);
    let json = serde_json::to_value(session.info()).expect("serialize");

    assert_eq!(json["port"], 4873);
    assert_eq!(json["registry_url"], "http://localhost:4873");
    assert!(json["started_at"].is_string());

    session.process().kill().expect("kill");
}

#[tokio::test]
async fn session_moves_from_ready_to_stopped() {
    let mut session = sleeper(4873);
    assert_eq!(session.state(), LifecycleState::Ready);
    assert_eq!(session.info().state, LifecycleState::Ready);

    session.stop();
    session.stop();

    assert_eq!(session.state(), LifecycleState::Stopped);
    let json = serde_json::to_value(session.info()).expect("serialize");
    assert_eq!(json["state"], "stopped");

    session.process().kill().expect("kill");
}

#[tokio::test]
async fn dropping_unowned_process_stops_it() {
    let config = script_config(IDLE);
    let (process, _events) =
        spawn_registry(&config, &StartOptions::new("demo:local-registry")).expect("spawn");
    let pid = process.pid().expect("pid");
    assert!(pid_alive(pid));

    drop(process);

    assert!(
        eventually(Duration::from_secs(8), || !pid_alive(pid)).await,
        "a process no session owns must not outlive its handle"
    );
}
