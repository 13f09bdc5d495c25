//! Accept loop and lifecycle.

pub mod listener;
pub mod shutdown;

pub use listener::Server;
pub use shutdown::{Shutdown, ShutdownSignal};
