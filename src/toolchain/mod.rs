//! Prusti toolchain acquisition
//!
//! Resolves a build channel to an acquisition strategy, installs the
//! toolchain and exposes the paths of its executables.

mod channel;
mod install;
mod location;
mod progress;

pub use channel::{archive_url, AcquisitionStrategy, BuildChannel, ChannelRegistry, DEFAULT_DOWNLOAD_URL};
pub use install::{InstallOutcome, Installer};
pub use location::PrustiLocation;
pub use progress::{progress_channel, InstallProgress, InstallStep, ProgressReporter, ProgressStream};
