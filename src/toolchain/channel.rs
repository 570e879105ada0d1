//! Build channels and how each one obtains its toolchain.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::{InstallError, UnknownName};
use crate::platform::Platform;

/// Where release archives are downloaded from unless configured otherwise.
pub const DEFAULT_DOWNLOAD_URL: &str = "http://viper.ethz.ch/downloads";

/// Release track of the Prusti toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BuildChannel {
    /// Reserved until stable releases are published; has no strategy yet.
    Stable,
    #[default]
    Nightly,
    /// A user-provided build on the local file system.
    Local,
}

impl BuildChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildChannel::Stable => "stable",
            BuildChannel::Nightly => "nightly",
            BuildChannel::Local => "local",
        }
    }
}

impl fmt::Display for BuildChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildChannel {
    type Err = UnknownName;

    /// Parses the channels a user may configure. `stable` is not accepted yet.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("nightly") {
            Ok(BuildChannel::Nightly)
        } else if s.eq_ignore_ascii_case("local") {
            Ok(BuildChannel::Local)
        } else {
            Err(UnknownName(s.to_string()))
        }
    }
}

/// How a channel's toolchain is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionStrategy {
    /// Download a zip archive and extract it into the install directory.
    RemoteArchive { url: String },
    /// Use an existing directory as-is.
    LocalDirectory { path: PathBuf },
}

/// Archive URL for a platform: `<base>/PrustiTools<Id>.zip`.
pub fn archive_url(base_url: &str, platform: Platform) -> String {
    format!(
        "{}/PrustiTools{}.zip",
        base_url.trim_end_matches('/'),
        platform.identifier()
    )
}

/// Maps build channels to acquisition strategies for one platform.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    platform: Option<Platform>,
    download_url: String,
    local_path: String,
}

impl ChannelRegistry {
    pub fn new(
        platform: Option<Platform>,
        download_url: impl Into<String>,
        local_path: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            download_url: download_url.into(),
            local_path: local_path.into(),
        }
    }

    /// Look up the strategy for `channel`. Never falls back to another channel.
    pub fn strategy(&self, channel: BuildChannel) -> Result<AcquisitionStrategy, InstallError> {
        match channel {
            BuildChannel::Nightly => {
                let platform = self.platform.ok_or_else(|| {
                    InstallError::UnsupportedPlatform(std::env::consts::OS.to_string())
                })?;
                Ok(AcquisitionStrategy::RemoteArchive {
                    url: archive_url(&self.download_url, platform),
                })
            }
            BuildChannel::Local => {
                let trimmed = self.local_path.trim();
                if trimmed.is_empty() {
                    return Err(InstallError::MissingLocalPath);
                }
                Ok(AcquisitionStrategy::LocalDirectory {
                    path: expand_home(trimmed),
                })
            }
            BuildChannel::Stable => Err(InstallError::UnknownChannel(channel)),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    Path::new(path).to_path_buf()
}
