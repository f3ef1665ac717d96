// csk-common/src/lib.rs
pub mod cache;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod receipt;

// Re-export key types
pub use cache::Cache;
pub use config::Config;
pub use error::{CskError, Result};
pub use lifecycle::{LifecycleEvent, Phase, PhaseState};
pub use model::{Action, ActionStep, Checksum, Manifest, ManifestFormat, Version};
pub use receipt::{InstallReceipt, ReceiptStore};
