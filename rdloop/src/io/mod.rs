//! I/O helpers: the file-based IPC store, config, and subprocess handling.

pub mod atomic;
pub mod config;
pub mod ipc;
pub mod process;
pub mod stop;
pub mod watch;
