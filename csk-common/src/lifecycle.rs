// csk-common/src/lifecycle.rs
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Install,
    Uninstall,
    Zap,
}

impl Phase {
    /// Cleanup phases run every action regardless of earlier failures.
    pub fn is_cleanup(self) -> bool {
        matches!(self, Phase::Uninstall | Phase::Zap)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Install => "install",
            Phase::Uninstall => "uninstall",
            Phase::Zap => "zap",
        })
    }
}

/// States a phase moves through.
///
/// Install: `Idle -> Downloading -> Verifying -> Installing -> Installed | Failed`.
/// Uninstall / zap: `Idle -> Uninstalling -> Uninstalled | PartiallyUninstalled`.
/// Any phase may end in `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseState {
    Idle,
    Downloading,
    Verifying,
    Installing,
    Installed,
    Uninstalling,
    Uninstalled,
    PartiallyUninstalled,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LifecycleEvent {
    PhaseStarted {
        identifier: String,
        phase: Phase,
        action_count: usize,
    },
    StateChanged {
        identifier: String,
        phase: Phase,
        state: PhaseState,
    },
    ArtifactCacheHit {
        identifier: String,
    },
    ActionStarted {
        identifier: String,
        index: usize,
        description: String,
    },
    ActionFinished {
        identifier: String,
        index: usize,
        description: String,
        error: Option<String>, // Keep as String for simplicity in events
    },
    PhaseFinished {
        identifier: String,
        phase: Phase,
        state: PhaseState,
        duration_secs: f64,
    },
}

impl LifecycleEvent {
    pub fn action_finished(
        identifier: String,
        index: usize,
        description: String,
        error: Option<&CskError>,
    ) -> Self {
        LifecycleEvent::ActionFinished {
            identifier,
            index,
            description,
            error: error.map(|e| e.to_string()),
        }
    }
}
