//! The application session: one owner for configuration, the installed
//! toolchain and the supervised server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::errors::{InstallError, SessionError};
use crate::notify::{LifecycleEvent, Notification, Notifier, UserAction};
use crate::platform::Platform;
use crate::server::{LaunchSource, ServerLaunch, ServerStatus, ServerSupervisor};
use crate::toolchain::{ChannelRegistry, InstallOutcome, Installer, ProgressReporter, PrustiLocation};

/// Directories a session writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    /// Persistent storage; the toolchain lives in `prustiTools` below it.
    pub storage_dir: PathBuf,
    /// Handed to the server as its log directory.
    pub log_dir: PathBuf,
}

impl SessionPaths {
    pub fn new(storage_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            log_dir: log_dir.into(),
        }
    }

    /// Per-user locations under the platform data directory.
    pub fn default_for_user() -> Result<Self> {
        let data_dir = dirs::data_local_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
            .context("Could not determine data directory")?;
        let storage_dir = data_dir.join("prusti-assistant");
        let log_dir = storage_dir.join("logs");
        Ok(Self {
            storage_dir,
            log_dir,
        })
    }

    pub fn toolchain_dir(&self) -> PathBuf {
        self.storage_dir.join("prustiTools")
    }
}

/// Session state the supervisor reads back when it relaunches the server.
struct LaunchState {
    config: RwLock<Config>,
    prusti: RwLock<Option<PrustiLocation>>,
    log_dir: PathBuf,
}

impl LaunchState {
    /// Server launch for the current configuration. A configured address is
    /// re-read on every call and bypasses the local process entirely.
    async fn server_launch(&self) -> Result<ServerLaunch, SessionError> {
        let config = self.config.read().await.clone();
        if let Some(address) = config.server_address() {
            return Ok(ServerLaunch::fixed(address));
        }
        let prusti = self
            .prusti
            .read()
            .await
            .clone()
            .ok_or(SessionError::NotInstalled)?;
        let java_home = config.java_home().map(|j| j.path().to_path_buf());
        Ok(ServerLaunch::local(prusti.prusti_server(), &self.log_dir).with_java_home(java_home))
    }
}

#[async_trait]
impl LaunchSource for LaunchState {
    async fn launch(&self) -> Option<ServerLaunch> {
        match self.server_launch().await {
            Ok(launch) => Some(launch),
            Err(e) => {
                tracing::warn!("cannot relaunch Prusti server from configuration: {}", e);
                None
            }
        }
    }
}

pub struct Session {
    state: Arc<LaunchState>,
    paths: SessionPaths,
    platform: Option<Platform>,
    notifier: Arc<dyn Notifier>,
    installer: Installer,
    supervisor: ServerSupervisor,
}

impl Session {
    pub fn new(config: Config, paths: SessionPaths, notifier: Arc<dyn Notifier>) -> Self {
        let state = Arc::new(LaunchState {
            config: RwLock::new(config),
            prusti: RwLock::new(None),
            log_dir: paths.log_dir.clone(),
        });
        Self {
            installer: Installer::new(paths.toolchain_dir()),
            supervisor: ServerSupervisor::with_launch_source(
                Arc::clone(&notifier),
                Arc::clone(&state) as Arc<dyn LaunchSource>,
            ),
            state,
            paths,
            platform: Platform::current(),
            notifier,
        }
    }

    /// Override the detected host platform.
    pub fn with_platform(mut self, platform: Option<Platform>) -> Self {
        self.platform = platform;
        self
    }

    pub async fn config(&self) -> Config {
        self.state.config.read().await.clone()
    }

    /// Replace the configuration; takes effect on the next install or restart.
    pub async fn set_config(&self, config: Config) {
        *self.state.config.write().await = config;
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn supervisor(&self) -> &ServerSupervisor {
        &self.supervisor
    }

    /// The toolchain from the last successful install.
    pub async fn prusti(&self) -> Option<PrustiLocation> {
        self.state.prusti.read().await.clone()
    }

    pub fn server_address(&self) -> Option<String> {
        self.supervisor.address()
    }

    /// Install or update the toolchain for the configured channel.
    ///
    /// The user is only told about success when something was actually
    /// downloaded. A forced update stops the server first and restarts it
    /// afterwards if it had been running.
    pub async fn install_dependencies(
        &self,
        should_update: bool,
        progress: ProgressReporter,
    ) -> Result<PrustiLocation, InstallError> {
        self.notifier.event(LifecycleEvent::UpdateStarted);

        let was_running = should_update && self.supervisor.status() != ServerStatus::Stopped;
        if should_update {
            self.supervisor.stop().await;
        }

        let result = self.install(should_update, &progress).await;
        match &result {
            Ok(outcome) => {
                *self.state.prusti.write().await = Some(outcome.location.clone());
                if outcome.did_work {
                    let notification = if should_update {
                        Notification::info("Prusti updated successfully. Please reload the IDE.")
                            .with_action(UserAction::ReloadIde)
                    } else {
                        Notification::info("Prusti installed successfully.")
                    };
                    self.notifier.notify(notification);
                }
            }
            Err(e) => {
                self.notifier
                    .notify(Notification::error(format!("Error installing Prusti: {}", e)));
            }
        }

        if was_running {
            if let Err(e) = self.restart_server().await {
                tracing::error!("failed to restart Prusti server after update: {}", e);
            }
        }

        self.notifier.event(LifecycleEvent::UpdateFinished);
        result.map(|outcome| outcome.location)
    }

    async fn install(
        &self,
        should_update: bool,
        progress: &ProgressReporter,
    ) -> Result<InstallOutcome, InstallError> {
        let config = self.config().await;
        let channel = config.build_channel(self.notifier.as_ref());
        let registry = ChannelRegistry::new(
            self.platform,
            config.download_url.as_str(),
            config.local_prusti_path.as_str(),
        );

        let strategy = registry.strategy(channel)?;
        tracing::info!(
            "{} Prusti ({} channel)",
            if should_update { "Updating" } else { "Installing" },
            channel
        );
        self.installer.install(&strategy, should_update, progress).await
    }

    /// (Re)start the server from the current configuration.
    ///
    /// Restarts offered after a crash read the configuration again as well.
    pub async fn restart_server(&self) -> Result<(), SessionError> {
        let launch = self.state.server_launch().await?;
        self.supervisor.restart(launch).await?;
        Ok(())
    }

    pub async fn stop_server(&self) {
        self.supervisor.stop().await;
    }
}
