//! Paths inside an installed Prusti toolchain.

use std::path::{Path, PathBuf};

/// Handle to an installed toolchain directory.
///
/// Only path composition happens here; nothing is checked for existence
/// except by [`PrustiLocation::is_complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrustiLocation {
    base: PathBuf,
}

impl PrustiLocation {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn prusti_driver(&self) -> PathBuf {
        self.base.join(executable("prusti-driver"))
    }

    pub fn prusti_rustc(&self) -> PathBuf {
        self.base.join(executable("prusti-rustc"))
    }

    pub fn cargo_prusti(&self) -> PathBuf {
        self.base.join(executable("cargo-prusti"))
    }

    pub fn prusti_server(&self) -> PathBuf {
        self.base.join(executable("prusti-server"))
    }

    pub fn z3(&self) -> PathBuf {
        self.base.join("z3").join(executable("z3"))
    }

    pub fn boogie(&self) -> PathBuf {
        self.base.join("boogie").join(executable("boogie"))
    }

    pub fn viper_home(&self) -> PathBuf {
        self.base.join("viper")
    }

    /// Executables that must be present (and executable) for a usable install.
    pub fn required_executables(&self) -> Vec<PathBuf> {
        vec![
            self.prusti_driver(),
            self.prusti_rustc(),
            self.cargo_prusti(),
            self.prusti_server(),
            self.z3(),
        ]
    }

    pub fn is_complete(&self) -> bool {
        self.required_executables().iter().all(|p| p.is_file())
    }

    /// Set execute permissions on all required executables.
    pub(crate) fn mark_executables(&self) -> std::io::Result<()> {
        for path in self.required_executables() {
            mark_executable(&path)?;
        }
        Ok(())
    }
}

fn executable(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o775);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn mark_executable(path: &Path) -> std::io::Result<()> {
    std::fs::metadata(path).map(|_| ())
}
