//! Application version identifying the build that produced a record

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VersionParseError;

/// Four-component application version (`major.minor.build.revision`)
///
/// Ordering is lexicographic over the components, so `1.10.0.0 > 1.9.9.9`.
/// Serialized as its dotted string form, both in storage and in JSON exports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct AppVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub revision: u32,
}

impl AppVersion {
    /// Create a new version from its four components
    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl Display for AppVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for AppVersion {
    type Err = VersionParseError;

    /// Missing trailing components default to zero: `"2.1"` is `2.1.0.0`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let parts: Vec<&str> = input.split('.').collect();
        if parts.len() > 4 {
            return Err(VersionParseError::TooManyComponents(parts.len()));
        }

        let mut components = [0u32; 4];
        for (slot, part) in components.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| VersionParseError::InvalidComponent {
                    input: input.to_string(),
                    component: part.to_string(),
                })?;
        }

        let [major, minor, build, revision] = components;
        Ok(Self::new(major, minor, build, revision))
    }
}

impl From<AppVersion> for String {
    fn from(version: AppVersion) -> Self {
        version.to_string()
    }
}

impl TryFrom<String> for AppVersion {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
