#![cfg(unix)]

use crate::common::{write_script, RecordingNotifier};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use prusti_assistant::errors::LaunchError;
use prusti_assistant::notify::{NotificationLevel, UserAction};
use prusti_assistant::server::{ServerLaunch, ServerStatus, ServerSupervisor};
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

fn is_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Records `(target, message)` of every tracing event.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<(String, String)>>>);

impl CapturedLogs {
    fn messages(&self, target: &str) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.0
            .lock()
            .unwrap()
            .push((event.metadata().target().to_string(), visitor.0));
    }
}

async fn settled(supervisor: &ServerSupervisor) -> ServerStatus {
    tokio::time::timeout(Duration::from_secs(10), supervisor.wait_until_settled())
        .await
        .expect("server did not settle")
}

#[tokio::test]
#[serial]
async fn test_first_port_line_is_published() {
    let dir = TempDir::new().unwrap();
    let server = write_script(
        dir.path(),
        "prusti-server",
        "echo \"noise\"\necho \"port: 54321\"\necho \"port: 11111\"\nexec sleep 30",
    );
    let notifier = RecordingNotifier::new();
    let supervisor = ServerSupervisor::new(notifier.clone());

    supervisor
        .start(ServerLaunch::local(&server, dir.path().join("logs")))
        .await
        .unwrap();

    assert_eq!(
        settled(&supervisor).await,
        ServerStatus::Running {
            address: "localhost:54321".to_string()
        }
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(supervisor.address().as_deref(), Some("localhost:54321"));

    supervisor.stop().await;
    assert_eq!(supervisor.status(), ServerStatus::Stopped);
    assert!(notifier.notifications().is_empty());
}

#[tokio::test]
#[serial]
async fn test_server_receives_port_zero_and_environment() {
    let dir = TempDir::new().unwrap();
    let seen = dir.path().join("seen");
    let server = write_script(
        dir.path(),
        "prusti-server",
        &format!(
            "echo \"$1 $2 $PRUSTI_LOG_DIR $RUST_BACKTRACE $JAVA_HOME\" > {}\necho \"port: 4000\"\nexec sleep 30",
            seen.display()
        ),
    );
    let supervisor = ServerSupervisor::new(RecordingNotifier::new());

    let launch = ServerLaunch::local(&server, "/tmp/prusti-logs")
        .with_java_home(Some("/opt/java".into()));
    supervisor.start(launch).await.unwrap();
    settled(&supervisor).await;

    let line = std::fs::read_to_string(&seen).unwrap();
    assert_eq!(line.trim(), "--port 0 /tmp/prusti-logs 1 /opt/java");

    supervisor.stop().await;
}

#[tokio::test]
#[serial]
async fn test_fixed_address_spawns_nothing() {
    let supervisor = ServerSupervisor::new(RecordingNotifier::new());

    supervisor
        .start(ServerLaunch::fixed("localhost:9999"))
        .await
        .unwrap();

    assert_eq!(supervisor.address().as_deref(), Some("localhost:9999"));
    assert_eq!(supervisor.pid().await, None);
}

#[tokio::test]
#[serial]
async fn test_restart_leaves_one_live_process() {
    let dir = TempDir::new().unwrap();
    let server = write_script(
        dir.path(),
        "prusti-server",
        "echo \"port: 4242\"\nexec sleep 30",
    );
    let supervisor = ServerSupervisor::new(RecordingNotifier::new());
    let launch = ServerLaunch::local(&server, dir.path());

    supervisor.start(launch.clone()).await.unwrap();
    let first = supervisor.pid().await.unwrap();
    supervisor.restart(launch.clone()).await.unwrap();
    let second = supervisor.pid().await.unwrap();
    supervisor.restart(launch).await.unwrap();
    let third = supervisor.pid().await.unwrap();

    assert!(!is_alive(first));
    assert!(!is_alive(second));
    assert!(is_alive(third));
    assert_eq!(
        settled(&supervisor).await.address(),
        Some("localhost:4242")
    );

    supervisor.stop().await;
    assert!(!is_alive(third));
    assert_eq!(supervisor.pid().await, None);
}

#[tokio::test]
#[serial]
async fn test_crash_clears_address_and_offers_restart() {
    let dir = TempDir::new().unwrap();
    let server = write_script(
        dir.path(),
        "prusti-server",
        "echo \"port: 4242\"\nsleep 0.3\nexit 3",
    );
    let notifier = RecordingNotifier::new();
    let supervisor = ServerSupervisor::new(notifier.clone());

    supervisor
        .start(ServerLaunch::local(&server, dir.path()))
        .await
        .unwrap();

    let crash = notifier.wait_for("Prusti server crashed!").await;
    assert_eq!(crash.level, NotificationLevel::Error);
    assert_eq!(crash.action, Some(UserAction::RestartServer));
    assert_eq!(supervisor.status(), ServerStatus::Stopped);
    assert_eq!(supervisor.address(), None);
}

#[tokio::test]
#[serial]
async fn test_restart_action_relaunches_server() {
    let dir = TempDir::new().unwrap();
    let launches = dir.path().join("launches");
    let server = write_script(
        dir.path(),
        "prusti-server",
        &format!("echo x >> {}\nexit 1", launches.display()),
    );
    let notifier = RecordingNotifier::new();
    notifier.answer_next(UserAction::RestartServer);
    let supervisor = ServerSupervisor::new(notifier.clone());

    supervisor
        .start(ServerLaunch::local(&server, dir.path()))
        .await
        .unwrap();

    // The second crash is not answered, so the server stays down.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while notifier.messages(NotificationLevel::Error).len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "no second crash");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let count = std::fs::read_to_string(&launches).unwrap().lines().count();
    assert_eq!(count, 2);
    assert_eq!(supervisor.status(), ServerStatus::Stopped);
}

#[tokio::test]
#[serial]
async fn test_stop_does_not_report_crash() {
    let dir = TempDir::new().unwrap();
    let server = write_script(dir.path(), "prusti-server", "exec sleep 30");
    let notifier = RecordingNotifier::new();
    let supervisor = ServerSupervisor::new(notifier.clone());

    supervisor
        .start(ServerLaunch::local(&server, dir.path()))
        .await
        .unwrap();
    assert!(supervisor.status().is_starting());

    supervisor.stop().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(supervisor.status(), ServerStatus::Stopped);
    assert!(notifier.notifications().is_empty());
}

#[tokio::test]
#[serial]
async fn test_missing_executable_is_launch_error() {
    let dir = TempDir::new().unwrap();
    let notifier = RecordingNotifier::new();
    let supervisor = ServerSupervisor::new(notifier.clone());

    let err = supervisor
        .start(ServerLaunch::local(dir.path().join("nope"), dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, LaunchError::Spawn { .. }));
    assert_eq!(supervisor.status(), ServerStatus::Stopped);

    let failure = notifier
        .wait_until(|n| n.message.starts_with("Failed to start Prusti server"))
        .await;
    assert_eq!(failure.level, NotificationLevel::Error);
    assert_eq!(failure.action, Some(UserAction::RestartServer));
}

#[tokio::test]
#[serial]
async fn test_all_output_is_mirrored_before_crash_handling() {
    let logs = CapturedLogs::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(logs.clone()));

    let dir = TempDir::new().unwrap();
    let server = write_script(
        dir.path(),
        "prusti-server",
        "i=1\nwhile [ $i -le 300 ]; do\n  echo \"out $i\"\n  echo \"err $i\" >&2\n  i=$((i+1))\ndone\nexit 1",
    );
    let notifier = RecordingNotifier::new();
    let supervisor = ServerSupervisor::new(notifier.clone());

    supervisor
        .start(ServerLaunch::local(&server, dir.path()))
        .await
        .unwrap();
    notifier.wait_for("Prusti server crashed!").await;

    let lines = logs.messages("prusti_server");
    let stdout: Vec<&String> = lines.iter().filter(|l| l.starts_with("[stdout] ")).collect();
    let stderr: Vec<&String> = lines.iter().filter(|l| l.starts_with("[stderr] ")).collect();
    assert_eq!(stdout.len(), 300);
    assert_eq!(stderr.len(), 300);
    assert_eq!(stdout[0], "[stdout] out 1");
    assert_eq!(stdout[299], "[stdout] out 300");
    assert_eq!(stderr[299], "[stderr] err 300");
}

#[tokio::test]
#[serial]
async fn test_port_printed_right_before_exit_is_seen() {
    let logs = CapturedLogs::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(logs.clone()));

    let dir = TempDir::new().unwrap();
    let server = write_script(dir.path(), "prusti-server", "echo \"port: 4242\"\nexit 3");
    let notifier = RecordingNotifier::new();
    let supervisor = ServerSupervisor::new(notifier.clone());

    supervisor
        .start(ServerLaunch::local(&server, dir.path()))
        .await
        .unwrap();
    notifier.wait_for("Prusti server crashed!").await;

    assert_eq!(logs.messages("prusti_server"), vec!["[stdout] port: 4242".to_string()]);
    assert!(logs
        .messages("prusti_assistant::server::supervisor")
        .contains(&"Server running on port 4242.".to_string()));
    assert_eq!(supervisor.address(), None);
}

#[tokio::test]
#[serial]
async fn test_concurrent_restarts_leave_one_live_process() {
    let dir = TempDir::new().unwrap();
    let pids = dir.path().join("pids");
    let server = write_script(
        dir.path(),
        "prusti-server",
        &format!("echo $$ >> {}\necho \"port: 4242\"\nexec sleep 30", pids.display()),
    );
    let supervisor = ServerSupervisor::new(RecordingNotifier::new());
    let launch = ServerLaunch::local(&server, dir.path());

    supervisor.start(launch.clone()).await.unwrap();
    let first = supervisor.pid().await.unwrap();

    let (a, b) = tokio::join!(
        supervisor.restart(launch.clone()),
        supervisor.restart(launch.clone())
    );
    a.unwrap();
    b.unwrap();

    let current = supervisor.pid().await.unwrap();
    assert_eq!(settled(&supervisor).await.address(), Some("localhost:4242"));

    // A process killed before it ran never recorded its pid.
    let recorded: Vec<u32> = std::fs::read_to_string(&pids)
        .unwrap()
        .lines()
        .map(|l| l.trim().parse().unwrap())
        .collect();
    assert!(recorded.contains(&current));
    for pid in recorded.iter().filter(|pid| **pid != current) {
        assert!(!is_alive(*pid), "pid {} still running", pid);
    }
    assert!(!is_alive(first));
    assert!(is_alive(current));

    supervisor.stop().await;
    assert!(!is_alive(current));
}

#[tokio::test]
#[serial]
async fn test_dropping_supervisor_kills_server() {
    let dir = TempDir::new().unwrap();
    let server = write_script(
        dir.path(),
        "prusti-server",
        "echo \"port: 4242\"\nexec sleep 30",
    );
    let notifier = RecordingNotifier::new();
    let supervisor = ServerSupervisor::new(notifier.clone());

    supervisor
        .start(ServerLaunch::local(&server, dir.path()))
        .await
        .unwrap();
    settled(&supervisor).await;
    let pid = supervisor.pid().await.unwrap();

    drop(supervisor);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while is_alive(pid) {
        assert!(tokio::time::Instant::now() < deadline, "server outlived its supervisor");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(notifier.notifications().is_empty());
}
