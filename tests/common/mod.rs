// Shared across test binaries; not every binary uses every helper.
#![allow(dead_code)]

pub mod fake_server;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use liku_client::config::Settings;
use liku_client::controller::{ClientOptions, ControllerHandle, ControllerState, LifecycleController};
use liku_client::notify::{LogSink, NotificationEvent, NotificationPolicy, UserNotifier};
use liku_client::resolver::{InterpreterResolver, NoEnvironment};

use fake_server::FakeServer;

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Poll until the controller reaches `target` or the deadline expires.
pub async fn wait_for_state(handle: &ControllerHandle, target: ControllerState) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if handle.state() == target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "controller did not reach {target:?}, stuck in {:?}",
        handle.state()
    );
}

/// Poll until `predicate` holds or the deadline expires.
pub async fn wait_until(what: &str, predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Test double capturing everything surfaced to the user or logged.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }
}

impl UserNotifier for RecordingNotifier {
    fn notify(&self, event: &NotificationEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

impl LogSink for RecordingNotifier {
    fn append(&self, event: &NotificationEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Short timeouts so failure paths resolve quickly under test.
pub fn test_options(stderr_log: std::path::PathBuf) -> ClientOptions {
    ClientOptions {
        handshake_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_millis(500),
        kill_grace: Duration::from_millis(500),
        restart_quiesce: Duration::from_secs(2),
        stderr_log,
        ..ClientOptions::default()
    }
}

pub fn recorders() -> (Arc<RecordingNotifier>, Arc<RecordingNotifier>) {
    (
        Arc::new(RecordingNotifier::default()),
        Arc::new(RecordingNotifier::default()),
    )
}

/// Settings pointing the resolver at the fake server script.
pub fn settings_for(server: &FakeServer) -> Settings {
    Settings {
        interpreter: vec![server.script_path().to_string_lossy().into_owned()],
        ..Settings::default()
    }
}

/// Controller wired to the fake server, with recording notifier and log sink.
pub fn spawn_controller(
    server: &FakeServer,
    settings: Settings,
) -> (ControllerHandle, Arc<RecordingNotifier>, Arc<RecordingNotifier>) {
    init_tracing();
    let (notifier, log) = recorders();
    let policy = NotificationPolicy::new(settings.show_notifications, notifier.clone(), log.clone());
    let handle = LifecycleController::spawn(
        &tokio::runtime::Handle::current(),
        server.workspace(),
        settings,
        InterpreterResolver::new(Arc::new(NoEnvironment), None),
        policy,
        test_options(server.stderr_log()),
    );
    (handle, notifier, log)
}
