//! Side-effecting helpers: config file, backlog storage and child processes.

pub mod backlog_store;
pub mod config;
pub mod layout;
pub mod process;
