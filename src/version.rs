//! MongoDB distribution variants and version-specifier grammar.
//!
//! The two variants carry different grammars: official accepts `X.Y` or
//! `X.Y.Z`; percona requires the full `X.Y.Z-R` form with its build suffix.
//! Specifier validation happens in the planner before any network traffic.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::CatalogError;

static OFFICIAL_SPEC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.(\d+)(?:\.(\d+))?$").unwrap());
static PERCONA_SPEC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)-(\d+)$").unwrap());

/// A MongoDB distribution family. Determines version grammar, URL scheme,
/// and archive format choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    #[default]
    Official,
    Percona,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Official => "official",
            Variant::Percona => "percona",
        }
    }

    /// Validate a version specifier against this variant's grammar.
    ///
    /// The error message identifies the malformed part so the external CLI
    /// can surface it verbatim.
    pub fn validate_spec(&self, spec: &str) -> Result<(), CatalogError> {
        match self {
            Variant::Official => {
                let caps = OFFICIAL_SPEC.captures(spec).ok_or_else(|| {
                    CatalogError::InvalidVersionSpec {
                        spec: spec.to_string(),
                        message: "expected X.Y or X.Y.Z".to_string(),
                    }
                })?;
                let major: u64 = caps[1].parse().map_err(|_| invalid(spec, "major"))?;
                if major < 3 {
                    return Err(CatalogError::InvalidVersionSpec {
                        spec: spec.to_string(),
                        message: format!("major version {major} is below the supported minimum 3"),
                    });
                }
                Ok(())
            }
            Variant::Percona => {
                let caps = PERCONA_SPEC.captures(spec).ok_or_else(|| {
                    CatalogError::InvalidVersionSpec {
                        spec: spec.to_string(),
                        message: "expected X.Y.Z-R".to_string(),
                    }
                })?;
                let major: u64 = caps[1].parse().map_err(|_| invalid(spec, "major"))?;
                if !(3..=8).contains(&major) {
                    return Err(CatalogError::InvalidVersionSpec {
                        spec: spec.to_string(),
                        message: format!("major version {major} outside the supported range 3-8"),
                    });
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn invalid(spec: &str, part: &str) -> CatalogError {
    CatalogError::InvalidVersionSpec {
        spec: spec.to_string(),
        message: format!("{part} is not a valid integer"),
    }
}

/// A parsed three-component version, used for ordering resolved versions.
///
/// The percona build suffix (`-R`) and any pre-release tag are kept verbatim
/// in `suffix` and excluded from ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub suffix: String,
}

impl Version {
    /// Parse `X.Y.Z` with an optional `-suffix` tail. Returns `None` for
    /// anything that does not start with three numeric components.
    pub fn parse(text: &str) -> Option<Self> {
        let (core, suffix) = match text.split_once('-') {
            Some((core, rest)) => (core, rest.to_string()),
            None => (text, String::new()),
        };
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
            suffix,
        })
    }

    /// Pre-release versions (`rc`, `alpha`, `beta` tags, case-insensitive)
    /// are never selected when resolving a two-component specifier.
    pub fn is_prerelease(&self) -> bool {
        let lower = self.suffix.to_ascii_lowercase();
        lower.contains("rc") || lower.contains("alpha") || lower.contains("beta")
    }

    /// Whether this version satisfies a `major.minor` prefix.
    pub fn matches_minor(&self, major: u64, minor: u64) -> bool {
        self.major == major && self.minor == minor
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.suffix.is_empty() {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        } else {
            write!(f, "{}.{}.{}-{}", self.major, self.minor, self.patch, self.suffix)
        }
    }
}

/// Split a two-component specifier into `(major, minor)`; `None` when the
/// spec has three components.
pub fn parse_minor_spec(spec: &str) -> Option<(u64, u64)> {
    let mut parts = spec.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    match parts.next() {
        Some(_) => None,
        None => Some((major, minor)),
    }
}

/// True when a resolved server version is at least 4.0, the cutover point
/// after which the legacy `mongo` shell is no longer bundled.
pub fn wants_modern_shell(version: &str) -> bool {
    match Version::parse(version) {
        Some(v) => (v.major, v.minor) >= (4, 0),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn official_accepts_two_and_three_component_specs() {
        Variant::Official.validate_spec("7.0").unwrap();
        Variant::Official.validate_spec("6.0.14").unwrap();
    }

    #[test]
    fn official_rejects_major_below_three() {
        let err = Variant::Official.validate_spec("2.6").unwrap_err();
        assert!(err.to_string().contains("below the supported minimum"));
    }

    #[test]
    fn official_rejects_percona_suffix() {
        assert!(Variant::Official.validate_spec("7.0.24-13").is_err());
    }

    #[test]
    fn percona_requires_build_suffix() {
        Variant::Percona.validate_spec("7.0.24-13").unwrap();
        let err = Variant::Percona.validate_spec("7.0.24").unwrap_err();
        assert!(err.to_string().contains("X.Y.Z-R"));
    }

    #[test]
    fn percona_rejects_major_outside_range() {
        assert!(Variant::Percona.validate_spec("9.0.1-2").is_err());
        assert!(Variant::Percona.validate_spec("2.4.0-1").is_err());
    }

    #[test]
    fn version_ordering_is_semantic() {
        let a = Version::parse("7.0.9").unwrap();
        let b = Version::parse("7.0.10").unwrap();
        assert!(a < b);
    }

    #[test]
    fn version_parse_keeps_suffix_verbatim() {
        let v = Version::parse("7.0.24-13").unwrap();
        assert_eq!(v.suffix, "13");
        assert_eq!(v.to_string(), "7.0.24-13");
    }

    #[test]
    fn prerelease_detection_is_case_insensitive() {
        assert!(Version::parse("7.0.0-rc1").unwrap().is_prerelease());
        assert!(Version::parse("7.0.0-RC2").unwrap().is_prerelease());
        assert!(Version::parse("7.0.0-alpha").unwrap().is_prerelease());
        assert!(Version::parse("7.0.0-beta1").unwrap().is_prerelease());
        assert!(!Version::parse("7.0.24-13").unwrap().is_prerelease());
    }

    #[test]
    fn minor_spec_parsing() {
        assert_eq!(parse_minor_spec("7.0"), Some((7, 0)));
        assert_eq!(parse_minor_spec("7.0.3"), None);
    }

    #[test]
    fn modern_shell_cutover_at_four_zero() {
        assert!(wants_modern_shell("4.0.28"));
        assert!(wants_modern_shell("7.0.2"));
        assert!(!wants_modern_shell("3.6.23"));
    }
}
