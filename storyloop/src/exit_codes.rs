//! Stable exit codes for `storyloop` commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid backlog, bad configuration, provider failure or any other error.
pub const INVALID: i32 = 1;
/// `storyloop run` was interrupted before the iteration finished.
pub const CANCELLED: i32 = 130;
