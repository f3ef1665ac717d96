// csk-common/src/model/version.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CskError, Result};

/// Version used when a manifest does not declare one.
pub const LATEST: &str = "latest";

/// A package version as written in the manifest.
///
/// Vendor versions are not semver (`8.0.61`, `2024.1,build42`, `latest`), so the
/// original string is kept verbatim and the derived fields used by URL and
/// path templates are computed on demand.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(String);

impl Version {
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(CskError::parse("version", "version must not be empty"));
        }
        if let Some(bad) = s
            .chars()
            .find(|c| c.is_whitespace() || matches!(c, '/' | '\\' | '{' | '}'))
        {
            return Err(CskError::parse(
                "version",
                format!("version '{s}' contains disallowed character {bad:?}"),
            ));
        }
        // The version names cache and staging directories.
        if s.chars().all(|c| c == '.') {
            return Err(CskError::parse(
                "version",
                format!("version '{s}' is not a usable directory name"),
            ));
        }
        Ok(Version(s.to_string()))
    }

    pub fn latest() -> Self {
        Version(LATEST.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part before the first comma (`1.2.3,456` -> `1.2.3`).
    pub fn before_comma(&self) -> &str {
        self.0.split(',').next().unwrap_or(&self.0)
    }

    /// Part after the first comma, if any.
    pub fn after_comma(&self) -> Option<&str> {
        self.0.split_once(',').map(|(_, rest)| rest)
    }

    /// Leading run of purely numeric dot-separated components.
    fn numeric_components(&self) -> Vec<&str> {
        self.before_comma()
            .split('.')
            .take_while(|c| !c.is_empty() && c.chars().all(|ch| ch.is_ascii_digit()))
            .collect()
    }

    fn join_first(&self, n: usize) -> Option<String> {
        let parts = self.numeric_components();
        (parts.len() >= n).then(|| parts[..n].join("."))
    }

    pub fn major(&self) -> Option<String> {
        self.join_first(1)
    }

    pub fn minor(&self) -> Option<String> {
        self.numeric_components().get(1).map(|s| s.to_string())
    }

    pub fn patch(&self) -> Option<String> {
        self.numeric_components().get(2).map(|s| s.to_string())
    }

    /// First two numeric components, e.g. `8.0` for `8.0.61`.
    pub fn major_minor(&self) -> Option<String> {
        self.join_first(2)
    }

    pub fn major_minor_patch(&self) -> Option<String> {
        self.join_first(3)
    }

    pub fn no_dots(&self) -> String {
        self.0.replace('.', "")
    }

    pub fn dots_to_underscores(&self) -> String {
        self.0.replace('.', "_")
    }

    /// Looks up a derived field by its template name (`major_minor`, ...).
    ///
    /// The outer `None` means the field name is unknown; the inner `None`
    /// means this version cannot provide it.
    pub fn field(&self, name: &str) -> Option<Option<String>> {
        let value = match name {
            "major" => self.major(),
            "minor" => self.minor(),
            "patch" => self.patch(),
            "major_minor" => self.major_minor(),
            "major_minor_patch" => self.major_minor_patch(),
            "before_comma" => Some(self.before_comma().to_string()),
            "after_comma" => self.after_comma().map(str::to_string),
            "no_dots" => Some(self.no_dots()),
            "dots_to_underscores" => Some(self.dots_to_underscores()),
            _ => return None,
        };
        Some(value)
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::latest()
    }
}

impl FromStr for Version {
    type Err = CskError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_major_minor() {
        let v = Version::parse("8.0.61").unwrap();
        assert_eq!(v.major_minor().as_deref(), Some("8.0"));
        assert_eq!(v.major().as_deref(), Some("8"));
        assert_eq!(v.minor().as_deref(), Some("0"));
        assert_eq!(v.patch().as_deref(), Some("61"));
        assert_eq!(v.major_minor_patch().as_deref(), Some("8.0.61"));
    }

    #[test]
    fn test_major_minor_stops_at_non_numeric() {
        let v = Version::parse("10.beta.2").unwrap();
        assert_eq!(v.major().as_deref(), Some("10"));
        assert_eq!(v.major_minor(), None);

        assert_eq!(Version::latest().major_minor(), None);
        assert_eq!(Version::latest().major(), None);
    }

    #[test]
    fn test_comma_fields() {
        let v = Version::parse("2024.1.3,build42").unwrap();
        assert_eq!(v.before_comma(), "2024.1.3");
        assert_eq!(v.after_comma(), Some("build42"));
        assert_eq!(v.major_minor().as_deref(), Some("2024.1"));
        assert_eq!(v.no_dots(), "202413,build42");
        assert_eq!(v.dots_to_underscores(), "2024_1_3,build42");
    }

    #[test]
    fn test_field_lookup() {
        let v = Version::parse("1.2").unwrap();
        assert_eq!(v.field("major_minor"), Some(Some("1.2".to_string())));
        assert_eq!(v.field("patch"), Some(None));
        assert_eq!(v.field("bogus"), None);
    }

    #[test]
    fn test_parse_rejects_bad_versions() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1.0 beta").is_err());
        assert!(Version::parse("../1.0").is_err());
        assert!(Version::parse("{version}").is_err());
        assert!(Version::parse(".").is_err());
        assert!(Version::parse("..").is_err());
        assert!(Version::parse("...").is_err());
        assert!(Version::parse("1..2").is_ok());
    }
}
