//! Lifecycle management for the single supervised Prusti server.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use super::parse_port;
use super::state::ServerStatus;
use crate::errors::{KillError, LaunchError};
use crate::notify::{Notification, Notifier, UserAction};

/// Everything needed to (re)start the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLaunch {
    pub executable: PathBuf,
    /// Passed to the server as `PRUSTI_LOG_DIR`; may not exist yet.
    pub log_dir: PathBuf,
    pub java_home: Option<PathBuf>,
    /// Externally managed server; when set nothing is spawned.
    pub fixed_address: Option<String>,
}

impl ServerLaunch {
    pub fn local(executable: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            log_dir: log_dir.into(),
            java_home: None,
            fixed_address: None,
        }
    }

    pub fn fixed(address: impl Into<String>) -> Self {
        Self {
            executable: PathBuf::new(),
            log_dir: PathBuf::new(),
            java_home: None,
            fixed_address: Some(address.into()),
        }
    }

    pub fn with_java_home(mut self, java_home: Option<PathBuf>) -> Self {
        self.java_home = java_home;
        self
    }
}

/// Produces the launch description for restarts that do not supply one,
/// such as the user answering a crash notification.
#[async_trait]
pub trait LaunchSource: Send + Sync {
    async fn launch(&self) -> Option<ServerLaunch>;
}

/// The live process: its pid, how to stop it and the task watching it.
struct ServerHandle {
    pid: Option<u32>,
    kill_tx: oneshot::Sender<()>,
    monitor: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    /// Kill the process and wait until it has been reaped.
    async fn terminate(self) -> Result<(), KillError> {
        // Fails only if the monitor already finished because the process exited.
        let _ = self.kill_tx.send(());
        self.monitor.await??;
        Ok(())
    }
}

#[derive(Default)]
struct Slot {
    handle: Option<ServerHandle>,
    last_launch: Option<ServerLaunch>,
}

struct Shared {
    status: watch::Sender<ServerStatus>,
    /// Bumped on every restart/stop; monitors of older processes may not publish.
    generation: AtomicU64,
    notifier: Arc<dyn Notifier>,
    source: Option<Arc<dyn LaunchSource>>,
}

impl Shared {
    fn set_if_current(&self, generation: u64, status: ServerStatus) -> bool {
        self.status.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            *current = status;
            true
        })
    }
}

/// Supervises at most one Prusti server process.
///
/// Cloning yields another handle to the same supervisor.
#[derive(Clone)]
pub struct ServerSupervisor {
    shared: Arc<Shared>,
    slot: Arc<Mutex<Slot>>,
}

impl ServerSupervisor {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self::build(notifier, None)
    }

    /// A supervisor whose argument-less restarts ask `source` for a fresh
    /// launch description instead of replaying the last one.
    pub fn with_launch_source(notifier: Arc<dyn Notifier>, source: Arc<dyn LaunchSource>) -> Self {
        Self::build(notifier, Some(source))
    }

    fn build(notifier: Arc<dyn Notifier>, source: Option<Arc<dyn LaunchSource>>) -> Self {
        let (status, _) = watch::channel(ServerStatus::Stopped);
        Self {
            shared: Arc::new(Shared {
                status,
                generation: AtomicU64::new(0),
                notifier,
                source,
            }),
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    fn downgrade(&self) -> WeakSupervisor {
        WeakSupervisor {
            shared: Arc::downgrade(&self.shared),
            slot: Arc::downgrade(&self.slot),
        }
    }

    pub fn status(&self) -> ServerStatus {
        self.shared.status.borrow().clone()
    }

    /// Address of the running server, `None` while it is not ready.
    pub fn address(&self) -> Option<String> {
        self.shared.status.borrow().address().map(str::to_string)
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.shared.status.subscribe()
    }

    /// Wait until the server is no longer starting: it either announced its
    /// port or stopped.
    pub async fn wait_until_settled(&self) -> ServerStatus {
        let mut rx = self.subscribe();
        let settled = match rx.wait_for(|status| !status.is_starting()).await {
            Ok(status) => status.clone(),
            Err(_) => ServerStatus::Stopped,
        };
        settled
    }

    /// Process id of the live server, if one was spawned.
    pub async fn pid(&self) -> Option<u32> {
        self.slot.lock().await.handle.as_ref().and_then(|h| h.pid)
    }

    pub async fn start(&self, launch: ServerLaunch) -> Result<(), LaunchError> {
        self.restart(launch).await
    }

    /// Stop any running server, then start a new one as described by `launch`.
    pub async fn restart(&self, launch: ServerLaunch) -> Result<(), LaunchError> {
        let mut slot = self.slot.lock().await;
        self.restart_locked(&mut slot, launch).await
    }

    /// Restart with a launch description from the launch source, falling
    /// back to the most recent one.
    pub async fn restart_last(&self) -> Result<(), LaunchError> {
        let fresh = match &self.shared.source {
            Some(source) => source.launch().await,
            None => None,
        };
        let mut slot = self.slot.lock().await;
        match fresh.or_else(|| slot.last_launch.clone()) {
            Some(launch) => self.restart_locked(&mut slot, launch).await,
            None => {
                tracing::warn!("Prusti server was never started; nothing to restart");
                Ok(())
            }
        }
    }

    pub async fn stop(&self) {
        let mut slot = self.slot.lock().await;
        self.retire(&mut slot).await;
    }

    /// Unpublish the address and kill the current process. Returns the new generation.
    async fn retire(&self, slot: &mut Slot) -> u64 {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.status.send_replace(ServerStatus::Stopped);

        if let Some(handle) = slot.handle.take() {
            let pid = handle.pid;
            if let Err(e) = handle.terminate().await {
                tracing::warn!("ignoring error killing old Prusti server (pid {:?}): {}", pid, e);
            }
        }
        generation
    }

    async fn restart_locked(&self, slot: &mut Slot, launch: ServerLaunch) -> Result<(), LaunchError> {
        let generation = self.retire(slot).await;
        slot.last_launch = Some(launch.clone());

        if let Some(address) = launch.fixed_address.as_deref().filter(|a| !a.is_empty()) {
            tracing::info!("Using Prusti server at {}", address);
            self.shared.set_if_current(
                generation,
                ServerStatus::Running {
                    address: address.to_string(),
                },
            );
            return Ok(());
        }

        match self.spawn(&launch, generation) {
            Ok(handle) => {
                slot.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.offer_restart(format!("Failed to start Prusti server: {}", e));
                Err(e)
            }
        }
    }

    fn spawn(&self, launch: &ServerLaunch, generation: u64) -> Result<ServerHandle, LaunchError> {
        let mut cmd = Command::new(&launch.executable);
        cmd.args(["--port", "0"])
            .env("PRUSTI_LOG_DIR", &launch.log_dir)
            .env("RUST_BACKTRACE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(java_home) = &launch.java_home {
            cmd.env("JAVA_HOME", java_home);
        }

        tracing::info!("Starting Prusti server: {} --port 0", launch.executable.display());
        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: launch.executable.display().to_string(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or(LaunchError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(LaunchError::MissingPipe("stderr"))?;
        let pid = child.id();

        self.shared.set_if_current(generation, ServerStatus::Starting);

        let (kill_tx, kill_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor(
            child,
            stdout,
            stderr,
            kill_rx,
            generation,
            self.downgrade(),
        ));

        Ok(ServerHandle {
            pid,
            kill_tx,
            monitor,
        })
    }

    /// Tell the user about a failure and restart if they ask for it.
    fn offer_restart(&self, message: String) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let notification = Notification::error(message).with_action(UserAction::RestartServer);
            let choice = supervisor.shared.notifier.prompt(notification).await;
            if choice == Some(UserAction::RestartServer) {
                if let Err(e) = supervisor.restart_last().await {
                    tracing::error!("failed to restart Prusti server: {}", e);
                }
            }
        });
    }
}

/// Monitor-side handle; the supervisor's owner alone keeps it alive.
///
/// Dropping the last [`ServerSupervisor`] drops the kill sender, which makes
/// the monitor kill the child.
struct WeakSupervisor {
    shared: Weak<Shared>,
    slot: Weak<Mutex<Slot>>,
}

impl WeakSupervisor {
    fn upgrade(&self) -> Option<ServerSupervisor> {
        Some(ServerSupervisor {
            shared: self.shared.upgrade()?,
            slot: self.slot.upgrade()?,
        })
    }
}

/// Own the child: mirror its output, publish its port, detect exit or kill it.
///
/// Both pipes are read to EOF before the exit status is collected.
async fn monitor(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    mut kill_rx: oneshot::Receiver<()>,
    generation: u64,
    supervisor: WeakSupervisor,
) -> std::io::Result<()> {
    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut announced = false;

    let status = loop {
        tokio::select! {
            _ = &mut kill_rx => {
                tracing::debug!("Killing Prusti server (pid {:?})", child.id());
                return child.kill().await;
            }
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => {
                    tracing::info!(target: "prusti_server", "[stdout] {}", line);
                    if let Some(port) = parse_port(&line).filter(|_| !announced) {
                        announced = true;
                        publish_port(&supervisor, generation, port);
                    }
                }
                Ok(None) => stdout_open = false,
                Err(e) => {
                    tracing::warn!("failed to read Prusti server stdout: {}", e);
                    stdout_open = false;
                }
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => tracing::info!(target: "prusti_server", "[stderr] {}", line),
                Ok(None) => stderr_open = false,
                Err(e) => {
                    tracing::warn!("failed to read Prusti server stderr: {}", e);
                    stderr_open = false;
                }
            },
            status = child.wait(), if !stdout_open && !stderr_open => break status,
        }
    };

    match status {
        Ok(status) => tracing::warn!("Prusti server exited: {}", status),
        Err(e) => tracing::error!("failed to wait for Prusti server: {}", e),
    }

    if let Some(supervisor) = supervisor.upgrade() {
        if supervisor
            .shared
            .set_if_current(generation, ServerStatus::Stopped)
        {
            supervisor.offer_restart("Prusti server crashed!".to_string());
        }
    }
    Ok(())
}

fn publish_port(supervisor: &WeakSupervisor, generation: u64, port: u16) {
    let Some(shared) = supervisor.shared.upgrade() else {
        return;
    };
    let address = format!("localhost:{}", port);
    if shared.set_if_current(generation, ServerStatus::Running { address }) {
        tracing::info!("Server running on port {}.", port);
    }
}
