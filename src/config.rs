use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::UnknownName;
use crate::notify::{Notification, Notifier};
use crate::toolchain::{BuildChannel, DEFAULT_DOWNLOAD_URL};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Release channel to install from (`nightly` or `local`)
    #[serde(default = "default_build_channel")]
    pub build_channel: String,

    /// Prusti build used by the `local` channel
    #[serde(default)]
    pub local_prusti_path: String,

    /// Address of an externally managed server; empty means supervise locally
    #[serde(default)]
    pub server_address: String,

    /// Java installation for the server; empty means auto-detect
    #[serde(default)]
    pub java_home: String,

    /// Base URL of the release archives
    #[serde(default = "default_download_url")]
    pub download_url: String,

    #[serde(default = "default_verification_mode")]
    pub verification_mode: String,

    #[serde(default = "default_true")]
    pub verify_on_save: bool,

    #[serde(default = "default_true")]
    pub verify_on_open: bool,

    #[serde(default = "default_true")]
    pub report_errors_only: bool,
}

fn default_build_channel() -> String {
    BuildChannel::Nightly.to_string()
}

fn default_download_url() -> String {
    DEFAULT_DOWNLOAD_URL.to_string()
}

fn default_verification_mode() -> String {
    VerificationMode::CurrentProgram.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            build_channel: default_build_channel(),
            local_prusti_path: String::new(),
            server_address: String::new(),
            java_home: String::new(),
            download_url: default_download_url(),
            verification_mode: default_verification_mode(),
            verify_on_save: true,
            verify_on_open: true,
            report_errors_only: true,
        }
    }
}

/// Which crates a verification run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationMode {
    #[default]
    CurrentProgram,
    AllCratesInWorkspace,
}

impl fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationMode::CurrentProgram => f.write_str("CurrentProgram"),
            VerificationMode::AllCratesInWorkspace => f.write_str("AllCratesInWorkspace"),
        }
    }
}

impl FromStr for VerificationMode {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("CurrentProgram") {
            Ok(VerificationMode::CurrentProgram)
        } else if s.eq_ignore_ascii_case("AllCratesInWorkspace") {
            Ok(VerificationMode::AllCratesInWorkspace)
        } else {
            Err(UnknownName(s.to_string()))
        }
    }
}

/// Parse a configured enum value, falling back to `default` with a warning.
fn parse_or_default<T>(value: &str, what: &str, default: T, notifier: &dyn Notifier) -> T
where
    T: FromStr<Err = UnknownName> + fmt::Display,
{
    match value.parse() {
        Ok(parsed) => parsed,
        Err(UnknownName(name)) => {
            notifier.notify(Notification::warning(format!(
                "Prusti has no {} named {}; defaulting to {}",
                what, name, default
            )));
            default
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from `path`, or defaults when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        toml::from_str(&content).context("Failed to parse config file")
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(config_dir.join("prusti-assistant").join("config.toml"))
    }

    /// The configured build channel; unknown names fall back to nightly.
    pub fn build_channel(&self, notifier: &dyn Notifier) -> BuildChannel {
        parse_or_default(
            &self.build_channel,
            "build channel",
            BuildChannel::Nightly,
            notifier,
        )
    }

    pub fn verification_mode(&self, notifier: &dyn Notifier) -> VerificationMode {
        parse_or_default(
            &self.verification_mode,
            "verification mode",
            VerificationMode::CurrentProgram,
            notifier,
        )
    }

    /// Fixed server address, if one is configured.
    pub fn server_address(&self) -> Option<&str> {
        Some(self.server_address.trim()).filter(|a| !a.is_empty())
    }

    /// The configured Java home, or one detected on this machine.
    pub fn java_home(&self) -> Option<JavaHome> {
        let configured = self.java_home.trim();
        if !configured.is_empty() {
            return Some(JavaHome::new(configured));
        }
        JavaHome::detect()
    }
}

/// A Java installation directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JavaHome {
    path: PathBuf,
}

impl JavaHome {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn java_executable(&self) -> PathBuf {
        let name = if cfg!(target_os = "windows") {
            "java.exe"
        } else {
            "java"
        };
        self.path.join("bin").join(name)
    }

    /// Look for Java via `JAVA_HOME`, then via `java` on `PATH`.
    pub fn detect() -> Option<Self> {
        tracing::debug!("Searching for Java home...");

        if let Some(home) = std::env::var_os("JAVA_HOME").filter(|h| !h.is_empty()) {
            let home = PathBuf::from(home);
            if home.is_dir() {
                tracing::debug!("Using Java home {} from JAVA_HOME", home.display());
                return Some(Self::new(home));
            }
        }

        let java = which::which("java").ok()?;
        let java = java.canonicalize().unwrap_or(java);
        match java.parent().and_then(Path::parent) {
            Some(home) => {
                tracing::debug!("Using Java home {}", home.display());
                Some(Self::new(home))
            }
            None => {
                tracing::debug!("Could not find Java home");
                None
            }
        }
    }
}
