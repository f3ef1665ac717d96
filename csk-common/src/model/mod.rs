// csk-common/src/model/mod.rs
pub mod action;
pub mod checksum;
pub mod manifest;
pub mod template;
pub mod version;

// Re-export
pub use action::{Action, ActionStep};
pub use checksum::{Checksum, ChecksumAlgorithm};
pub use manifest::{Manifest, ManifestFormat};
pub use version::Version;
