// csk-common/src/model/template.rs
//! Parse-time substitution of `{version}` / `{version.<field>}` placeholders.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use super::version::Version;
use crate::error::{CskError, Result};

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{version(?:\.([a-z_]+))?\}").unwrap();
}

/// Replaces every version placeholder in `template`.
///
/// `context` names the manifest field being resolved and ends up in the
/// error message.
pub fn resolve(template: &str, version: &Version, context: &str) -> Result<String> {
    let mut failure: Option<CskError> = None;
    let resolved = PLACEHOLDER_RE.replace_all(template, |caps: &Captures<'_>| {
        let Some(field) = caps.get(1).map(|m| m.as_str()) else {
            return version.as_str().to_string();
        };
        match version.field(field) {
            Some(Some(value)) => value,
            Some(None) => {
                failure.get_or_insert_with(|| {
                    CskError::parse(
                        context,
                        format!("version '{version}' has no '{field}' component"),
                    )
                });
                String::new()
            }
            None => {
                failure.get_or_insert_with(|| {
                    CskError::parse(context, format!("unknown placeholder '{}'", &caps[0]))
                });
                String::new()
            }
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(resolved.into_owned()),
    }
}

/// True if `s` still contains a version placeholder.
pub fn has_placeholder(s: &str) -> bool {
    PLACEHOLDER_RE.is_match(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_cuda_url() {
        let v = Version::parse("8.0.61").unwrap();
        let url = resolve(
            "https://developer.nvidia.com/compute/cuda/{version.major_minor}/Prod2/network_installers/cuda_{version}_mac_network-dmg",
            &v,
            "source_url",
        )
        .unwrap();
        assert_eq!(
            url,
            "https://developer.nvidia.com/compute/cuda/8.0/Prod2/network_installers/cuda_8.0.61_mac_network-dmg"
        );
    }

    #[test]
    fn test_resolve_leaves_other_braces_alone() {
        let v = Version::parse("1.0").unwrap();
        assert_eq!(resolve("/tmp/{other}", &v, "path").unwrap(), "/tmp/{other}");
    }

    #[test]
    fn test_unknown_field_is_an_error() {
        let v = Version::parse("1.0").unwrap();
        let err = resolve("x-{version.codename}", &v, "source_url").unwrap_err();
        assert!(err.to_string().contains("unknown placeholder"));
    }

    #[test]
    fn test_missing_component_is_an_error() {
        let err = resolve("{version.major_minor}", &Version::latest(), "path").unwrap_err();
        assert!(err.to_string().contains("no 'major_minor' component"));
    }
}
