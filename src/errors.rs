//! Error types shared by the installer, the process layer and the session.

use std::path::PathBuf;

use thiserror::Error;

use crate::toolchain::BuildChannel;

/// A configured enum value that names no known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown name `{0}`")]
pub struct UnknownName(pub String);

/// Failures while acquiring or validating a toolchain.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Prusti has no acquisition strategy for build channel `{0}`")]
    UnknownChannel(BuildChannel),

    #[error("Prusti does not support the platform `{0}`")]
    UnsupportedPlatform(String),

    #[error("the local build channel is selected but no local Prusti path is configured")]
    MissingLocalPath,

    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("corrupt toolchain archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive entry `{0}` escapes the install directory")]
    UnsafeEntry(String),

    #[error("{context} ({}): {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("installation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl InstallError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| InstallError::Io {
            context,
            path,
            source,
        }
    }
}

/// A process could not be started at all. A non-zero exit is not a launch error.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to capture {0} of the launched process")]
    MissingPipe(&'static str),
}

/// Terminating a supervised process failed.
#[derive(Debug, Error)]
pub enum KillError {
    #[error("failed to kill process: {0}")]
    Io(#[from] std::io::Error),

    #[error("server monitor task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors surfaced by [`crate::session::Session`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Prusti is not installed; run the installation first")]
    NotInstalled,

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}
