//! Version parsing and trimming helpers.
//!
//! Namespace and class registrations use semantic versions, but documents
//! and registration calls routinely write partial versions like `"1.2"` or
//! even `"2"`. Parsing pads the missing components with zeros so the usual
//! `semver` ordering applies.

use semver::Version;

use crate::errors::{ModelError, Result};

/// Parse a possibly-partial version string, padding to `major.minor.patch`.
pub fn parse_version(value: &str) -> Result<Version> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ModelError::InvalidVersion {
            value: value.to_string(),
        });
    }
    let dots = value.bytes().filter(|&b| b == b'.').count();
    let padded = match dots {
        0 => format!("{value}.0.0"),
        1 => format!("{value}.0"),
        _ => value.to_string(),
    };
    Version::parse(&padded).map_err(|_| ModelError::InvalidVersion {
        value: value.to_string(),
    })
}

/// Zero out all components after the first `precision` ones.
///
/// With precision 1, `1.2.3` becomes `1.0.0`; with precision 2 it becomes
/// `1.2.0`. Precision 3 or higher leaves the version untouched.
pub fn trim_version(version: &Version, precision: usize) -> Version {
    debug_assert!(precision > 0);
    let mut out = version.clone();
    out.pre = semver::Prerelease::EMPTY;
    out.build = semver::BuildMetadata::EMPTY;
    if precision < 2 {
        out.minor = 0;
    }
    if precision < 3 {
        out.patch = 0;
    }
    out
}

/// Render a version the way it is embedded in namespace URIs.
///
/// URIs always carry the full `major.minor.patch` triple, with pre-release
/// and build metadata stripped.
pub fn format_version(version: &Version) -> String {
    format!("{}.{}.{}", version.major, version.minor, version.patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_versions() {
        assert_eq!(parse_version("1").unwrap(), Version::new(1, 0, 0));
        assert_eq!(parse_version("1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(parse_version("1.2.3").unwrap(), Version::new(1, 2, 3));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_version("").is_err());
        assert!(parse_version("one.two").is_err());
        assert!(parse_version("1.2.3.4").is_err());
    }

    #[test]
    fn test_trim_version() {
        let v = Version::new(1, 2, 3);
        assert_eq!(trim_version(&v, 1), Version::new(1, 0, 0));
        assert_eq!(trim_version(&v, 2), Version::new(1, 2, 0));
        assert_eq!(trim_version(&v, 3), Version::new(1, 2, 3));
    }

    #[test]
    fn test_ordering_after_padding() {
        assert!(parse_version("1.2").unwrap() < parse_version("1.10").unwrap());
        assert!(parse_version("2").unwrap() > parse_version("1.9.9").unwrap());
    }
}
