// csk-common/src/model/manifest.rs
use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::action::{Action, ActionStep};
use super::checksum::Checksum;
use super::template;
use super::version::Version;
use crate::error::{CskError, Result};

lazy_static! {
    static ref VALID_IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._@+-]*$").unwrap();
    static ref VALID_LABEL_RE: Regex = Regex::new(r"^[a-zA-Z0-9._-]+$").unwrap();
}

/// Roots that a `delete_path` action may never name directly.
const PROTECTED_PATHS: &[&str] = &[
    "/",
    "/Applications",
    "/Library",
    "/System",
    "/Users",
    "/usr",
    "/bin",
    "/sbin",
    "/etc",
    "/var",
    "/private",
    "~",
    "~/Library",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Toml,
}

impl ManifestFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(ManifestFormat::Json),
            Some("toml") => Ok(ManifestFormat::Toml),
            _ => Err(CskError::parse(
                path.display().to_string(),
                "unsupported manifest extension (expected .json or .toml)",
            )),
        }
    }
}

/// The manifest exactly as written on disk, templates unresolved.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestSource {
    identifier: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    version: Option<Version>,
    #[serde(default, alias = "sha256")]
    checksum: Option<Checksum>,
    #[serde(default, alias = "url")]
    source_url: Option<String>,
    #[serde(default)]
    install: Vec<ActionStep>,
    #[serde(default)]
    uninstall: Vec<ActionStep>,
    #[serde(default)]
    zap: Vec<ActionStep>,
}

/// A fully resolved package definition.
///
/// Only obtainable through [`Manifest::parse`], so every instance has passed
/// validation and carries no unresolved placeholders. Field order matters for
/// TOML output: plain values first, action tables last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    homepage: Option<String>,
    version: Version,
    #[serde(skip_serializing_if = "Option::is_none")]
    checksum: Option<Checksum>,
    source_url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    install: Vec<ActionStep>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    uninstall: Vec<ActionStep>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    zap: Vec<ActionStep>,
}

impl Manifest {
    /// Parses and validates a manifest, resolving all templates.
    pub fn parse(raw: &str, format: ManifestFormat) -> Result<Self> {
        let source: ManifestSource = match format {
            ManifestFormat::Json => serde_json::from_str(raw)
                .map_err(|e| CskError::parse("manifest", e.to_string()))?,
            ManifestFormat::Toml => {
                toml::from_str(raw).map_err(|e| CskError::parse("manifest", e.to_string()))?
            }
        };
        Self::from_source(source)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let format = ManifestFormat::from_path(path)?;
        debug!("Loading manifest from {}", path.display());
        let raw = fs::read_to_string(path)?;
        Self::parse(&raw, format).map_err(|e| match e {
            CskError::ParseError(field, msg) => {
                CskError::ParseError(format!("{} ({field})", path.display()), msg)
            }
            other => other,
        })
    }

    fn from_source(source: ManifestSource) -> Result<Self> {
        let identifier = source
            .identifier
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| CskError::parse("identifier", "missing required field"))?;
        if !VALID_IDENTIFIER_RE.is_match(&identifier) {
            return Err(CskError::parse(
                "identifier",
                format!("'{identifier}' contains disallowed characters"),
            ));
        }

        let version = source.version.unwrap_or_default();

        let raw_url = source
            .source_url
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| CskError::parse("source_url", "missing required field"))?;
        let source_url = resolve_field(&raw_url, &version, "source_url")?;
        validate_source_url(&source_url)?;

        if !source.install.is_empty() && source.checksum.is_none() {
            return Err(CskError::parse(
                "checksum",
                "required when install actions are present",
            ));
        }

        let install = resolve_steps(source.install, &version, "install")?;
        let uninstall = resolve_steps(source.uninstall, &version, "uninstall")?;
        let zap = resolve_steps(source.zap, &version, "zap")?;

        debug!(
            "Parsed manifest '{}' {} ({} install, {} uninstall, {} zap actions)",
            identifier,
            version,
            install.len(),
            uninstall.len(),
            zap.len()
        );

        Ok(Self {
            identifier,
            name: source.name,
            homepage: source.homepage,
            version,
            checksum: source.checksum,
            source_url,
            install,
            uninstall,
            zap,
        })
    }

    /// Serialises the resolved manifest back into a source document.
    pub fn to_source(&self, format: ManifestFormat) -> Result<String> {
        match format {
            ManifestFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            ManifestFormat::Toml => Ok(toml::to_string_pretty(self)?),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Friendly name for display purposes.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.identifier)
    }

    pub fn homepage(&self) -> Option<&str> {
        self.homepage.as_deref()
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn install_actions(&self) -> &[ActionStep] {
        &self.install
    }

    pub fn uninstall_actions(&self) -> &[ActionStep] {
        &self.uninstall
    }

    pub fn zap_actions(&self) -> &[ActionStep] {
        &self.zap
    }

    /// File name the artifact is staged under: the last URL path segment.
    pub fn artifact_file_name(&self) -> String {
        Url::parse(&self.source_url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut segs| segs.next_back().map(str::to_string))
            })
            .filter(|s| !s.is_empty() && s != "." && s != "..")
            .unwrap_or_else(|| format!("{}-{}.download", self.identifier, self.version))
    }
}

fn resolve_field(raw: &str, version: &Version, context: &str) -> Result<String> {
    let resolved = template::resolve(raw, version, context)?;
    if template::has_placeholder(&resolved) {
        return Err(CskError::parse(
            context,
            format!("template '{raw}' resolves to another placeholder"),
        ));
    }
    Ok(resolved)
}

fn resolve_steps(steps: Vec<ActionStep>, version: &Version, phase: &str) -> Result<Vec<ActionStep>> {
    steps
        .into_iter()
        .enumerate()
        .map(|(idx, step)| {
            let context = format!("{phase}[{idx}]");
            let action = resolve_action(step.action, version, &context)?;
            Ok(ActionStep {
                action,
                critical: step.critical,
            })
        })
        .collect()
}

fn resolve_action(action: Action, version: &Version, context: &str) -> Result<Action> {
    match action {
        Action::RunScript {
            executable,
            args,
            sudo,
        } => {
            let executable = resolve_field(&executable, version, context)?;
            if executable.trim().is_empty() {
                return Err(CskError::parse(context, "run_script executable is empty"));
            }
            let args = args
                .iter()
                .map(|a| resolve_field(a, version, context))
                .collect::<Result<Vec<_>>>()?;
            Ok(Action::RunScript {
                executable,
                args,
                sudo,
            })
        }
        Action::UnregisterService { services } => {
            validate_labels(&services, "service label", context)?;
            Ok(Action::UnregisterService { services })
        }
        Action::RemoveKernelExtension { kext_id } => {
            validate_labels(std::slice::from_ref(&kext_id), "kext id", context)?;
            Ok(Action::RemoveKernelExtension { kext_id })
        }
        Action::DeletePath { path } => {
            let path = resolve_field(&path, version, context)?;
            validate_delete_path(&path, context)?;
            Ok(Action::DeletePath { path })
        }
        Action::ForgetReceipt { package_ids } => {
            validate_labels(&package_ids, "package id", context)?;
            Ok(Action::ForgetReceipt { package_ids })
        }
    }
}

fn validate_labels(labels: &[String], what: &str, context: &str) -> Result<()> {
    if labels.is_empty() {
        return Err(CskError::parse(context, format!("no {what} given")));
    }
    for label in labels {
        if !VALID_LABEL_RE.is_match(label) {
            return Err(CskError::parse(
                context,
                format!("invalid {what} '{label}'"),
            ));
        }
    }
    Ok(())
}

fn validate_source_url(url_str: &str) -> Result<()> {
    let url = Url::parse(url_str)
        .map_err(|e| CskError::parse("source_url", format!("'{url_str}' is not a URL: {e}")))?;
    if url.scheme() != "https" {
        return Err(CskError::parse(
            "source_url",
            format!("'{url_str}' must use https, got '{}'", url.scheme()),
        ));
    }
    Ok(())
}

/// Delete targets must be absolute or `~/`-relative, free of `.` and `..`
/// segments, and not a protected root.
fn validate_delete_path(path: &str, context: &str) -> Result<()> {
    let is_home_relative = path == "~" || path.starts_with("~/");
    if !path.starts_with('/') && !is_home_relative {
        return Err(CskError::parse(
            context,
            format!("delete path '{path}' must be absolute or start with '~/'"),
        ));
    }
    // `Path::components` drops interior `.` segments, so look at the raw text.
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(bad) = segments.iter().find(|s| **s == "." || **s == "..") {
        return Err(CskError::parse(
            context,
            format!("delete path '{path}' contains a '{bad}' segment"),
        ));
    }
    let normalized = if is_home_relative {
        segments.join("/")
    } else {
        format!("/{}", segments.join("/"))
    };
    if PROTECTED_PATHS.contains(&normalized.as_str()) {
        return Err(CskError::parse(
            context,
            format!("refusing to delete protected path '{path}'"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUDA_JSON: &str = r#"{
        "identifier": "cuda_toolkit",
        "name": "Nvidia CUDA",
        "homepage": "https://developer.nvidia.com/cuda-zone",
        "version": "8.0.61",
        "checksum": "sha256:b70a193cbe0a798d7363abab88ab5190409d237d7e13bf8682682fbbeac01847",
        "source_url": "https://developer.nvidia.com/compute/cuda/{version.major_minor}/Prod2/network_installers/cuda_{version}_mac_network-dmg",
        "install": [
            {
                "type": "run_script",
                "executable": "CUDAMacOSXInstaller.app/Contents/MacOS/CUDAMacOSXInstaller",
                "args": ["--accept-eula", "--silent", "--no-window", "--install-package=cuda-toolkit"],
                "critical": true
            }
        ],
        "uninstall": [
            {
                "type": "run_script",
                "executable": "/Developer/NVIDIA/CUDA-{version.major_minor}/bin/uninstall_cuda_{version.major_minor}.pl",
                "sudo": true
            },
            {
                "type": "unregister_service",
                "services": ["com.nvidia.CUDASoftwareUpdate", "com.nvidia.cuda.launcher", "com.nvidia.cudad"]
            },
            { "type": "remove_kernel_extension", "kext_id": "com.nvidia.CUDA" },
            { "type": "delete_path", "path": "/Library/PreferencePanes/CUDA Preferences.prefPane" }
        ],
        "zap": [
            { "type": "delete_path", "path": "/Library/Frameworks/CUDA.framework" }
        ]
    }"#;

    const CUDA_TOML: &str = r#"
identifier = "cuda_toolkit"
name = "Nvidia CUDA"
version = "8.0.61"
sha256 = "b70a193cbe0a798d7363abab88ab5190409d237d7e13bf8682682fbbeac01847"
url = "https://developer.nvidia.com/compute/cuda/{version.major_minor}/Prod2/network_installers/cuda_{version}_mac_network-dmg"

[[install]]
type = "run_script"
executable = "CUDAMacOSXInstaller.app/Contents/MacOS/CUDAMacOSXInstaller"
args = ["--accept-eula", "--silent"]

[[uninstall]]
type = "unregister_service"
services = "com.nvidia.cudad"

[[zap]]
type = "delete_path"
path = "~/Library/Caches/com.nvidia.cuda"
"#;

    fn json_with(fields: &str) -> String {
        format!(
            r#"{{ "identifier": "demo", "version": "1.2.3", "source_url": "https://example.com/demo-{{version}}.pkg" {fields} }}"#
        )
    }

    #[test]
    fn test_parse_cuda_manifest_resolves_templates() {
        let m = Manifest::parse(CUDA_JSON, ManifestFormat::Json).unwrap();
        assert_eq!(m.identifier(), "cuda_toolkit");
        assert_eq!(m.display_name(), "Nvidia CUDA");
        assert_eq!(
            m.source_url(),
            "https://developer.nvidia.com/compute/cuda/8.0/Prod2/network_installers/cuda_8.0.61_mac_network-dmg"
        );
        assert_eq!(m.artifact_file_name(), "cuda_8.0.61_mac_network-dmg");
        assert_eq!(m.install_actions().len(), 1);
        assert!(m.install_actions()[0].critical);
        assert_eq!(m.uninstall_actions().len(), 4);
        match &m.uninstall_actions()[0].action {
            Action::RunScript {
                executable, sudo, ..
            } => {
                assert_eq!(executable, "/Developer/NVIDIA/CUDA-8.0/bin/uninstall_cuda_8.0.pl");
                assert!(*sudo);
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(m.zap_actions().len(), 1);
    }

    #[test]
    fn test_json_round_trip() {
        let m = Manifest::parse(CUDA_JSON, ManifestFormat::Json).unwrap();
        let source = m.to_source(ManifestFormat::Json).unwrap();
        let again = Manifest::parse(&source, ManifestFormat::Json).unwrap();
        assert_eq!(m, again);
    }

    #[test]
    fn test_toml_round_trip_and_aliases() {
        let m = Manifest::parse(CUDA_TOML, ManifestFormat::Toml).unwrap();
        assert!(m.checksum().is_some());
        assert_eq!(
            m.uninstall_actions()[0].action,
            Action::UnregisterService {
                services: vec!["com.nvidia.cudad".to_string()]
            }
        );
        let source = m.to_source(ManifestFormat::Toml).unwrap();
        let again = Manifest::parse(&source, ManifestFormat::Toml).unwrap();
        assert_eq!(m, again);

        // Cross-format: TOML in, JSON out, same manifest.
        let as_json = m.to_source(ManifestFormat::Json).unwrap();
        assert_eq!(Manifest::parse(&as_json, ManifestFormat::Json).unwrap(), m);
    }

    #[test]
    fn test_missing_required_fields() {
        let err = Manifest::parse(r#"{"source_url": "https://example.com/x"}"#, ManifestFormat::Json)
            .unwrap_err();
        assert!(matches!(err, CskError::ParseError(ref f, _) if f == "identifier"));

        let err = Manifest::parse(r#"{"identifier": "x"}"#, ManifestFormat::Json).unwrap_err();
        assert!(matches!(err, CskError::ParseError(ref f, _) if f == "source_url"));
    }

    #[test]
    fn test_install_actions_require_checksum() {
        let raw = json_with(r#", "install": [{"type": "run_script", "executable": "/usr/bin/true"}]"#);
        let err = Manifest::parse(&raw, ManifestFormat::Json).unwrap_err();
        assert!(matches!(err, CskError::ParseError(ref f, _) if f == "checksum"));

        // Uninstall-only manifests need no checksum.
        let raw = json_with(r#", "uninstall": [{"type": "delete_path", "path": "/opt/demo"}]"#);
        assert!(Manifest::parse(&raw, ManifestFormat::Json).is_ok());
    }

    #[test]
    fn test_rejects_unsafe_delete_paths() {
        for path in [
            "/",
            "/Library/",
            "~",
            "relative/dir",
            "/opt/../etc",
            "//",
            "/Library/.",
            "~/Library/.",
            "/./System",
            "~//Library",
            "/opt/./vendor",
        ] {
            let raw = json_with(&format!(
                r#", "zap": [{{"type": "delete_path", "path": "{path}"}}]"#
            ));
            assert!(
                Manifest::parse(&raw, ManifestFormat::Json).is_err(),
                "path {path} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_bad_labels_and_http_urls() {
        let raw = json_with(r#", "uninstall": [{"type": "unregister_service", "services": ["bad label;rm"]}]"#);
        assert!(Manifest::parse(&raw, ManifestFormat::Json).is_err());

        let raw = json_with(r#", "uninstall": [{"type": "forget_receipt", "package_ids": []}]"#);
        assert!(Manifest::parse(&raw, ManifestFormat::Json).is_err());

        let raw = r#"{"identifier": "x", "source_url": "http://example.com/x"}"#;
        assert!(Manifest::parse(raw, ManifestFormat::Json).is_err());
    }

    #[test]
    fn test_unknown_top_level_field_is_rejected() {
        let raw = json_with(r#", "uninstal": []"#);
        assert!(Manifest::parse(&raw, ManifestFormat::Json).is_err());
    }

    #[test]
    fn test_missing_version_defaults_to_latest() {
        let raw = r#"{"identifier": "x", "source_url": "https://example.com/x.zip"}"#;
        let m = Manifest::parse(raw, ManifestFormat::Json).unwrap();
        assert_eq!(m.version().as_str(), "latest");

        let raw = r#"{"identifier": "x", "source_url": "https://example.com/{version.major_minor}/x.zip"}"#;
        assert!(Manifest::parse(raw, ManifestFormat::Json).is_err());
    }

    #[test]
    fn test_from_path_picks_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cuda_toolkit.toml");
        fs::write(&path, CUDA_TOML).unwrap();
        let m = Manifest::from_path(&path).unwrap();
        assert_eq!(m.identifier(), "cuda_toolkit");

        let bad = dir.path().join("cuda_toolkit.rb");
        fs::write(&bad, "cask 'cuda_toolkit' do end").unwrap();
        assert!(matches!(
            Manifest::from_path(&bad),
            Err(CskError::ParseError(_, _))
        ));
    }
}
