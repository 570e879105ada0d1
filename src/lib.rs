// Library exports for prusti-assistant
// This allows the modules to be imported in tests and external code

pub mod config;
pub mod errors;
pub mod notify;
pub mod platform;
pub mod process;
pub mod server;
pub mod session;
pub mod toolchain;
