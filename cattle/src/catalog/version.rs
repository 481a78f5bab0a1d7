//! Server version compatibility checks for template versions
//!
//! Versions are compared leniently: an optional `v` prefix is ignored, missing minor
//! and patch components count as zero, and a pre-release (`2.3.0-rc1`) sorts before
//! its release. Build metadata (`+...`) is ignored.

use std::{cmp::Ordering, fmt, str::FromStr};

/// The version of the running server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerVersion(String);

/// A parsed, comparable version
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Version {
    core: [u64; 3],
    pre: Vec<Identifier>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Identifier {
    Numeric(u64),
    Alpha(String),
}

/// Indicates that a version string could not be parsed
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid version {0:?}")]
pub struct InvalidVersion(String);

/// Indicates that the server version is outside a template version's bounds
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Incompatible {
    #[error("server version {server} is lower than the minimum {min}")]
    BelowMin { server: String, min: String },

    #[error("server version {server} is higher than the maximum {max}")]
    AboveMax { server: String, max: String },
}

// === impl ServerVersion ===

impl ServerVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for versions of released builds.
    ///
    /// Development builds report an empty version, `dev`, `master`, or a `-head`
    /// suffix; templates are never filtered for them.
    pub fn is_release(&self) -> bool {
        !matches!(self.0.as_str(), "" | "dev" | "master") && !self.0.ends_with("-head")
    }

    /// Checks the server version against a template version's bounds.
    ///
    /// Non-release servers satisfy any bounds. Bounds that cannot be parsed are
    /// ignored, as is a server version that cannot be parsed.
    pub fn satisfies(&self, min: Option<&str>, max: Option<&str>) -> Result<(), Incompatible> {
        if !self.is_release() {
            return Ok(());
        }
        let server = match self.0.parse::<Version>() {
            Ok(v) => v,
            Err(error) => {
                tracing::debug!(%error, "Ignoring version bounds");
                return Ok(());
            }
        };

        fn bound(b: Option<&str>) -> Option<(&str, Version)> {
            b.filter(|s| !s.is_empty())
                .and_then(|s| s.parse::<Version>().ok().map(|v| (s, v)))
        }

        if let Some((min, v)) = bound(min) {
            if server < v {
                return Err(Incompatible::BelowMin {
                    server: self.0.clone(),
                    min: min.to_string(),
                });
            }
        }
        if let Some((max, v)) = bound(max) {
            if server > v {
                return Err(Incompatible::AboveMax {
                    server: self.0.clone(),
                    max: max.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for ServerVersion {
    fn default() -> Self {
        Self::new("dev")
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// === impl Version ===

impl FromStr for Version {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidVersion(s.to_string());

        let v = s.trim();
        let v = v.strip_prefix(['v', 'V']).unwrap_or(v);
        let v = v.split_once('+').map_or(v, |(v, _)| v);
        let (core, pre) = match v.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (v, None),
        };

        let mut parts = [0u64; 3];
        let mut n = 0;
        for part in core.split('.') {
            if n == parts.len() {
                return Err(invalid());
            }
            parts[n] = part.parse().map_err(|_| invalid())?;
            n += 1;
        }

        let pre = match pre {
            None => Vec::new(),
            Some("") => return Err(invalid()),
            Some(pre) => pre
                .split('.')
                .map(|id| match id.parse() {
                    Ok(n) => Identifier::Numeric(n),
                    Err(_) => Identifier::Alpha(id.to_string()),
                })
                .collect(),
        };

        Ok(Self { core: parts, pre })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.core.cmp(&other.core).then_with(|| {
            match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            }
        })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Numeric(a), Self::Numeric(b)) => a.cmp(b),
            (Self::Numeric(_), Self::Alpha(_)) => Ordering::Less,
            (Self::Alpha(_), Self::Numeric(_)) => Ordering::Greater,
            (Self::Alpha(a), Self::Alpha(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn release_versions() {
        assert!(ServerVersion::new("v2.3.1").is_release());
        assert!(ServerVersion::new("v2.4.0-rc2").is_release());
        for dev in ["", "dev", "master", "v2.4-head"] {
            assert!(!ServerVersion::new(dev).is_release(), "{dev:?}");
        }
        assert!(!ServerVersion::default().is_release());
    }

    #[test]
    fn ordering() {
        assert!(v("v2.3.0") < v("2.3.1"));
        assert!(v("2.3") == v("2.3.0"));
        assert!(v("2.10.0") > v("2.9.9"));
        assert!(v("2.3.0-rc1") < v("2.3.0"));
        assert!(v("2.3.0-rc1") < v("2.3.0-rc2"));
        assert!(v("2.3.0-alpha.2") < v("2.3.0-alpha.10"));
        assert!(v("2.3.0+build.5") == v("2.3.0"));
    }

    #[test]
    fn invalid_versions() {
        for s in ["", "latest", "2.x", "1.2.3.4", "2.3.0-"] {
            assert!(s.parse::<Version>().is_err(), "{s:?}");
        }
    }

    #[test]
    fn bounds() {
        let server = ServerVersion::new("v2.3.2");
        assert_eq!(server.satisfies(None, None), Ok(()));
        assert_eq!(server.satisfies(Some("2.3.0"), Some("2.3.99")), Ok(()));
        assert_eq!(server.satisfies(Some("v2.3.2"), Some("v2.3.2")), Ok(()));
        assert_eq!(server.satisfies(Some(""), Some("")), Ok(()));
        assert_eq!(server.satisfies(Some("bogus"), None), Ok(()));
        assert_eq!(
            server.satisfies(Some("2.4.0"), None),
            Err(Incompatible::BelowMin {
                server: "v2.3.2".to_string(),
                min: "2.4.0".to_string(),
            })
        );
        assert!(matches!(
            server.satisfies(None, Some("2.2.99")),
            Err(Incompatible::AboveMax { .. })
        ));

        let head = ServerVersion::new("v2.4-head");
        assert_eq!(head.satisfies(Some("9.9.9"), Some("0.0.1")), Ok(()));
    }
}
