//! End-to-end lifecycle against a real subprocess (the fake kernel).

use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::timeout;
use tokio_test::assert_ok;

use kernel_interop::config::{KernelConfig, SnapshotConfig};
use kernel_interop::protocol::AsyncEvent;
use kernel_interop::session::{Session, SessionRegistry};

use crate::support::WAIT;

fn fake_kernel_config() -> KernelConfig {
    KernelConfig {
        interpreter: PathBuf::from(env!("CARGO_BIN_EXE_fake-kernel")),
        ..KernelConfig::default()
    }
}

#[tokio::test]
async fn launch_execute_and_terminate() {
    let session = Session::launch(&fake_kernel_config()).await.unwrap();
    assert!(session.is_alive());

    let mut events = session.events();
    let pending = session.execute_code("1+1", true, false).unwrap();
    tokio_test::assert_ok!(timeout(WAIT, pending.recv()).await.unwrap());

    // The output event precedes the response, so it is already queued.
    let mut saw_output = false;
    while let Ok(Some(event)) = timeout(Duration::from_secs(2), events.next()).await {
        if let AsyncEvent::Text { text, .. } = event {
            if text.contains("1+1") {
                saw_output = true;
                break;
            }
        }
    }
    assert!(saw_output);

    session.terminate().await;
    assert!(!session.is_alive());
}

// Recoverable crash: the process dies mid-session, the registry brings
// up a fresh kernel and restores the saved snapshot.
#[tokio::test]
async fn registry_relaunches_after_a_crash_and_restores_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("session.snapshot");
    let config = KernelConfig {
        snapshot: SnapshotConfig {
            file: Some(snapshot.clone()),
            load_on_start: false,
            save_on_exit: false,
        },
        ..fake_kernel_config()
    };

    let registry = SessionRegistry::new();
    let session = registry.open("project-a", &config).await.unwrap();
    tokio_test::assert_ok!(timeout(WAIT, session.save_environment(&snapshot)).await.unwrap());
    assert!(snapshot.exists());

    // A native fault: the subprocess exits without any handshake.
    let mut events = session.events();
    let pending = session.execute_code("crash", true, false).unwrap();
    assert!(timeout(WAIT, pending.recv()).await.unwrap().is_err());
    assert_eq!(
        timeout(WAIT, events.next()).await.unwrap(),
        Some(AsyncEvent::Termination)
    );
    assert!(!session.is_alive());

    // Open returns a fresh session for the dead key; relaunch restores.
    let restored = registry.relaunch("project-a", &config).await.unwrap();
    assert!(restored.is_alive());
    assert_ne!(restored.id(), session.id());

    let pending = restored.execute_code("x", true, false).unwrap();
    timeout(WAIT, pending.recv()).await.unwrap().unwrap();
    registry.close_all().await;
}

#[tokio::test]
async fn open_reuses_a_live_session() {
    let registry = SessionRegistry::new();
    let config = fake_kernel_config();

    let first = registry.open("proj", &config).await.unwrap();
    let second = registry.open("proj", &config).await.unwrap();
    assert_eq!(first.id(), second.id());

    registry.close("proj").await;
    assert!(!first.is_alive());
}
