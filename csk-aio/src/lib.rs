// csk-aio/src/lib.rs
//! Asynchronous IO operations for csk (filesystem, process, host cleanup)

pub mod fs;
pub mod process;
pub mod uninstall;

pub use fs::{path_present_async, remove_path_async, write_artifact_async, Removal};
pub use process::{is_root, run_command_async, CommandSpec};
pub use uninstall::*;
