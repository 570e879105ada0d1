//! Host platform detection for toolchain downloads.

use std::fmt;

/// Platforms Prusti ships prebuilt toolchains for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    Windows,
    Mac,
}

impl Platform {
    /// Map an operating system name to a platform.
    ///
    /// Accepts Rust's `std::env::consts::OS` names as well as the Node-style
    /// `win32` and `darwin`. Returns `None` for anything unsupported.
    pub fn from_os(os: &str) -> Option<Self> {
        match os {
            "linux" => Some(Platform::Linux),
            "windows" | "win32" => Some(Platform::Windows),
            "macos" | "darwin" => Some(Platform::Mac),
            _ => None,
        }
    }

    /// The platform of the running host, if supported.
    pub fn current() -> Option<Self> {
        let platform = Self::from_os(std::env::consts::OS);
        if platform.is_none() {
            tracing::warn!("Unsupported platform: {}", std::env::consts::OS);
        }
        platform
    }

    /// Token used in release archive names.
    pub fn identifier(&self) -> &'static str {
        match self {
            Platform::Mac => "Mac",
            Platform::Windows => "Win",
            Platform::Linux => "Linux",
        }
    }

    pub const ALL: [Platform; 3] = [Platform::Linux, Platform::Windows, Platform::Mac];
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
            Platform::Mac => "macos",
        };
        f.write_str(name)
    }
}
