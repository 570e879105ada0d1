//! Toolchain installation.
//!
//! Remote archives are downloaded into a temporary file, extracted into a
//! staging directory next to the install target and only then moved into
//! place, so a launched server never sees a half-written toolchain.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use zip::ZipArchive;

use super::channel::AcquisitionStrategy;
use super::location::PrustiLocation;
use super::progress::{InstallStep, ProgressReporter};
use crate::errors::InstallError;

/// Minimum advance between two download progress reports.
const DOWNLOAD_REPORT_STEP: f64 = 0.01;

/// Result of an install request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub location: PrustiLocation,
    /// `false` when an existing install was reused and nothing changed.
    pub did_work: bool,
}

/// Installs toolchains into a single target directory.
///
/// Only one toolchain is resident at a time: every remote channel installs
/// into the same directory. Concurrent calls to [`Installer::install`] are
/// serialized.
pub struct Installer {
    target_dir: PathBuf,
    lock: Mutex<()>,
}

impl Installer {
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Obtain a toolchain using `strategy`.
    ///
    /// With `should_update == false` an already complete install is reused
    /// without any network access or progress events.
    pub async fn install(
        &self,
        strategy: &AcquisitionStrategy,
        should_update: bool,
        progress: &ProgressReporter,
    ) -> Result<InstallOutcome, InstallError> {
        let _guard = self.lock.lock().await;

        let result = match strategy {
            AcquisitionStrategy::LocalDirectory { path } => use_local(path),
            AcquisitionStrategy::RemoteArchive { url } => {
                self.install_remote(url, should_update, progress).await
            }
        };

        if let Err(e) = &result {
            progress.fail();
            tracing::error!("Prusti installation failed: {}", e);
        }
        result
    }

    async fn install_remote(
        &self,
        url: &str,
        should_update: bool,
        progress: &ProgressReporter,
    ) -> Result<InstallOutcome, InstallError> {
        let location = PrustiLocation::new(&self.target_dir);

        if !should_update && location.is_complete() {
            tracing::debug!("Reusing Prusti install at {}", self.target_dir.display());
            location
                .mark_executables()
                .map_err(InstallError::io("failed to mark Prusti executables", &self.target_dir))?;
            return Ok(InstallOutcome {
                location,
                did_work: false,
            });
        }

        let parent = self
            .target_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(InstallError::io("failed to create storage directory", &parent))?;

        let archive = download(url, &parent, progress).await?;

        let staging = tempfile::Builder::new()
            .prefix(".prusti-staging-")
            .tempdir_in(&parent)
            .map_err(InstallError::io("failed to create staging directory", &parent))?;

        let target = self.target_dir.clone();
        let reporter = progress.clone();
        tokio::task::spawn_blocking(move || {
            extract(archive.as_file(), staging.path(), &reporter)?;
            validate(&PrustiLocation::new(staging.path()))?;
            publish(staging.path(), &target)
        })
        .await??;

        location
            .mark_executables()
            .map_err(InstallError::io("failed to mark Prusti executables", &self.target_dir))?;
        progress.report(1.0, InstallStep::Extracting);
        tracing::info!("Prusti installed to {}", self.target_dir.display());

        Ok(InstallOutcome {
            location,
            did_work: true,
        })
    }
}

fn use_local(path: &Path) -> Result<InstallOutcome, InstallError> {
    tracing::info!("Using local Prusti build at {}", path.display());
    let location = PrustiLocation::new(path);
    location
        .mark_executables()
        .map_err(InstallError::io("failed to mark Prusti executables", path))?;
    Ok(InstallOutcome {
        location,
        did_work: false,
    })
}

fn create_download_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
}

/// Stream `url` into a temporary file inside `dir`.
async fn download(
    url: &str,
    dir: &Path,
    progress: &ProgressReporter,
) -> Result<tempfile::NamedTempFile, InstallError> {
    let download_error = |source: reqwest::Error| InstallError::Download {
        url: url.to_string(),
        source,
    };

    tracing::info!("Downloading Prusti from {}", url);
    progress.report(0.0, InstallStep::Downloading);

    let client = create_download_client().map_err(download_error)?;
    let response = client
        .get(url)
        .header("User-Agent", "prusti-assistant")
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(download_error)?;

    let total = response.content_length().filter(|t| *t > 0);

    let temp = tempfile::Builder::new()
        .prefix(".prusti-download-")
        .suffix(".zip")
        .tempfile_in(dir)
        .map_err(InstallError::io("failed to create download file", dir))?;
    let mut file = tokio::fs::File::from_std(
        temp.reopen()
            .map_err(InstallError::io("failed to open download file", temp.path()))?,
    );

    let mut received: u64 = 0;
    let mut last_reported = 0.0;
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(download_error)?;
        file.write_all(&chunk)
            .await
            .map_err(InstallError::io("failed to write download", temp.path()))?;
        received += chunk.len() as u64;

        if let Some(total) = total {
            let fraction = 0.5 * received as f64 / total as f64;
            if received < total && fraction - last_reported >= DOWNLOAD_REPORT_STEP {
                progress.report(fraction, InstallStep::Downloading);
                last_reported = fraction;
            }
        }
    }
    file.flush()
        .await
        .map_err(InstallError::io("failed to write download", temp.path()))?;

    tracing::debug!("Downloaded {} bytes from {}", received, url);
    Ok(temp)
}

/// Unpack `archive` into `dest`, reporting progress in `[0.5, 1.0)`.
fn extract(archive: &File, dest: &Path, progress: &ProgressReporter) -> Result<(), InstallError> {
    let mut archive = ZipArchive::new(archive)?;
    let total = archive.len();

    for index in 0..total {
        progress.report(
            0.5 + 0.5 * index as f64 / total as f64,
            InstallStep::Extracting,
        );

        let mut entry = archive.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| InstallError::UnsafeEntry(entry.name().to_string()))?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(InstallError::io("failed to create directory", &out_path))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(InstallError::io("failed to create directory", parent))?;
        }
        let mut out = File::create(&out_path)
            .map_err(InstallError::io("failed to create file", &out_path))?;
        io::copy(&mut entry, &mut out)
            .map_err(InstallError::io("failed to extract file", &out_path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))
                    .map_err(InstallError::io("failed to set permissions", &out_path))?;
            }
        }
    }

    Ok(())
}

/// Reject archives that lack a required executable.
fn validate(staged: &PrustiLocation) -> Result<(), InstallError> {
    for path in staged.required_executables() {
        if !path.is_file() {
            let name = path
                .strip_prefix(staged.base())
                .unwrap_or(&path)
                .display()
                .to_string();
            return Err(InstallError::Io {
                context: "toolchain archive is missing an executable",
                path: PathBuf::from(name),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
    }
    Ok(())
}

/// Move the staged toolchain into `target`, replacing any previous install.
fn publish(staging: &Path, target: &Path) -> Result<(), InstallError> {
    if !target.exists() {
        return fs::rename(staging, target)
            .map_err(InstallError::io("failed to publish toolchain", target));
    }

    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "prusti".to_string());
    let retired = target.with_file_name(format!(".{}-old-{}", name, uuid::Uuid::new_v4()));

    fs::rename(target, &retired)
        .map_err(InstallError::io("failed to move previous toolchain aside", target))?;

    if let Err(e) = fs::rename(staging, target) {
        if let Err(restore) = fs::rename(&retired, target) {
            tracing::error!(
                "failed to restore previous toolchain from {}: {}",
                retired.display(),
                restore
            );
        }
        return Err(InstallError::Io {
            context: "failed to publish toolchain",
            path: target.to_path_buf(),
            source: e,
        });
    }

    if let Err(e) = fs::remove_dir_all(&retired) {
        tracing::warn!(
            "failed to remove previous toolchain at {}: {}",
            retired.display(),
            e
        );
    }
    Ok(())
}
