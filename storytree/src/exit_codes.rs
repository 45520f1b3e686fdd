//! Stable exit codes for storytree CLI commands.

/// Command succeeded or a frontier node was found.
pub const OK: i32 = 0;
/// Command failed due to invalid layout/config/state or other errors.
pub const INVALID: i32 = 1;
/// `storytree resolve` found no frontier (all story lines resolved).
pub const COMPLETE: i32 = 2;
