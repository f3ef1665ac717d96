// csk-common/src/model/action.rs
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Helper for list fields: a single string or an array of strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrVec {
    String(String),
    Vec(Vec<String>),
}

impl StringOrVec {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StringOrVec::String(s) => vec![s],
            StringOrVec::Vec(v) => v,
        }
    }
}

fn string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrVec::deserialize(deserializer).map(StringOrVec::into_vec)
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One lifecycle step. The set is closed; the executor matches it exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Runs an executable. Relative paths resolve against the staged artifact.
    RunScript {
        executable: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        /// Requires elevated privilege.
        #[serde(default, skip_serializing_if = "is_false")]
        sudo: bool,
    },
    /// Stops and removes launchd services by label.
    UnregisterService {
        #[serde(deserialize_with = "string_or_vec")]
        services: Vec<String>,
    },
    /// Unloads a kernel extension and removes its bundle.
    RemoveKernelExtension { kext_id: String },
    /// Removes a file, symlink or directory tree.
    DeletePath { path: String },
    /// Forgets installer package receipts.
    ForgetReceipt {
        #[serde(deserialize_with = "string_or_vec")]
        package_ids: Vec<String>,
    },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::RunScript {
                executable, sudo, ..
            } => {
                write!(f, "run_script {executable}")?;
                if *sudo {
                    f.write_str(" (sudo)")?;
                }
                Ok(())
            }
            Action::UnregisterService { services } => {
                write!(f, "unregister_service {}", services.join(", "))
            }
            Action::RemoveKernelExtension { kext_id } => {
                write!(f, "remove_kernel_extension {kext_id}")
            }
            Action::DeletePath { path } => write!(f, "delete_path {path}"),
            Action::ForgetReceipt { package_ids } => {
                write!(f, "forget_receipt {}", package_ids.join(", "))
            }
        }
    }
}

/// An action as it appears in a phase list, plus its failure policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStep {
    #[serde(flatten)]
    pub action: Action,
    /// A failing critical step aborts the rest of the install phase.
    #[serde(default, skip_serializing_if = "is_false")]
    pub critical: bool,
}

impl ActionStep {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            critical: false,
        }
    }

    pub fn critical(action: Action) -> Self {
        Self {
            action,
            critical: true,
        }
    }
}

impl From<Action> for ActionStep {
    fn from(action: Action) -> Self {
        ActionStep::new(action)
    }
}

impl fmt::Display for ActionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.action, f)?;
        if self.critical {
            f.write_str(" [critical]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_services_accept_single_string() {
        let step: ActionStep = serde_json::from_str(
            r#"{"type": "unregister_service", "services": "com.nvidia.cudad"}"#,
        )
        .unwrap();
        assert_eq!(
            step.action,
            Action::UnregisterService {
                services: vec!["com.nvidia.cudad".to_string()]
            }
        );
        assert!(!step.critical);
    }

    #[test]
    fn test_run_script_defaults() {
        let step: ActionStep = serde_json::from_str(
            r#"{"type": "run_script", "executable": "bin/setup", "critical": true}"#,
        )
        .unwrap();
        assert!(step.critical);
        match step.action {
            Action::RunScript { args, sudo, .. } => {
                assert!(args.is_empty());
                assert!(!sudo);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action_type_is_rejected() {
        let res = serde_json::from_str::<ActionStep>(r#"{"type": "format_disk", "path": "/"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_display() {
        let step = ActionStep::critical(Action::RunScript {
            executable: "/usr/bin/true".into(),
            args: vec![],
            sudo: true,
        });
        assert_eq!(step.to_string(), "run_script /usr/bin/true (sudo) [critical]");
    }
}
