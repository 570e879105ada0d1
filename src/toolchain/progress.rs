//! Install progress, delivered as a stream the caller consumes.
//!
//! The installer pushes [`InstallProgress`] items into a [`ProgressReporter`];
//! the caller reads them from the matching [`ProgressStream`]. Dropping the
//! stream cancels delivery without affecting the install itself.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// The stage an install is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    Downloading,
    Extracting,
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallStep::Downloading => f.write_str("downloading"),
            InstallStep::Extracting => f.write_str("extracting"),
        }
    }
}

/// Overall completion in `[0, 1]` plus the current step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstallProgress {
    pub fraction: f64,
    pub step: InstallStep,
}

pub type ProgressStream = UnboundedReceiverStream<InstallProgress>;

/// Create a connected reporter/stream pair.
pub fn progress_channel() -> (ProgressReporter, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ProgressReporter::with_sender(Some(tx)),
        UnboundedReceiverStream::new(rx),
    )
}

#[derive(Debug, Default)]
struct ReporterState {
    last: Option<f64>,
    failed: bool,
}

/// Sending half of a progress stream.
///
/// Fractions are clamped so the emitted sequence never decreases and stays
/// within `[0, 1]`. After [`ProgressReporter::fail`] nothing more is sent.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<InstallProgress>>,
    state: Arc<Mutex<ReporterState>>,
}

impl ProgressReporter {
    fn with_sender(tx: Option<mpsc::UnboundedSender<InstallProgress>>) -> Self {
        Self {
            tx,
            state: Arc::new(Mutex::new(ReporterState::default())),
        }
    }

    /// A reporter nobody listens to.
    pub fn silent() -> Self {
        Self::with_sender(None)
    }

    pub fn report(&self, fraction: f64, step: InstallStep) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.failed {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0).max(state.last.unwrap_or(0.0));
        state.last = Some(fraction);

        tracing::debug!("{:.0}% completed ({})", fraction * 100.0, step);
        if let Some(tx) = &self.tx {
            // The receiver may be gone; progress is advisory.
            let _ = tx.send(InstallProgress { fraction, step });
        }
    }

    /// Stop reporting: the install has failed.
    pub(crate) fn fail(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failed = true;
        }
    }

    /// Whether anything has been reported so far.
    pub fn did_report(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.last.is_some())
            .unwrap_or(false)
    }
}
