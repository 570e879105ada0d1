//! Published state of the supervised server.

/// Lifecycle of the supervised Prusti server as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServerStatus {
    #[default]
    Stopped,
    /// Spawned, but no port has been announced yet.
    Starting,
    Running {
        address: String,
    },
}

impl ServerStatus {
    /// The server address once it is known. `None` means "not ready yet".
    pub fn address(&self) -> Option<&str> {
        match self {
            ServerStatus::Running { address } => Some(address),
            _ => None,
        }
    }

    pub fn is_starting(&self) -> bool {
        matches!(self, ServerStatus::Starting)
    }
}
