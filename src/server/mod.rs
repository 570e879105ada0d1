//! Prusti server supervision
//!
//! Spawns the long-lived `prusti-server`, learns its port from the
//! `port: <n>` line it prints on stdout and restarts it on request.

mod state;
mod supervisor;

pub use state::ServerStatus;
pub use supervisor::{LaunchSource, ServerLaunch, ServerSupervisor};

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PORT_LINE: Regex = Regex::new(r"port: (\d+)").expect("valid port regex");
}

/// Extract the announced port from a line of server output.
pub fn parse_port(line: &str) -> Option<u16> {
    PORT_LINE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
