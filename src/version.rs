//! Version Gate - installed template package version and update decisions

use std::fmt;
use std::fs;

use tracing::debug;

use crate::sandbox::PathSandbox;

/// Name of the single-line version marker in the template root.
pub const VERSION_MARKER: &str = "Standard_Forms_Version.dat";

/// Reported when no version marker is installed.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Four-component dotted version. Missing or non-numeric components are 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct PackageVersion([u32; 4]);

impl PackageVersion {
    pub fn parse(s: &str) -> Self {
        let cleaned = strip_whitespace(s);
        let mut parts = [0u32; 4];
        for (slot, part) in parts.iter_mut().zip(cleaned.split('.')) {
            *slot = part.parse().unwrap_or(0);
        }
        Self(parts)
    }

    pub fn components(&self) -> [u32; 4] {
        self.0
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

/// True when `candidate` is strictly newer than `current`.
pub fn is_newer(current: &str, candidate: &str) -> bool {
    PackageVersion::parse(candidate) > PackageVersion::parse(current)
}

/// Read the installed version marker from the sandbox root.
///
/// Whitespace is dropped entirely (1.1.6.0 shipped as `1.1.6\t.0`).
pub fn installed_version(sandbox: &PathSandbox) -> String {
    let content = sandbox
        .resolve(VERSION_MARKER)
        .and_then(|path| fs::read_to_string(path).map_err(Into::into));
    match content {
        Ok(content) => strip_whitespace(&content),
        Err(e) => {
            debug!("failed to open version file: {}", e);
            UNKNOWN_VERSION.to_string()
        }
    }
}

fn strip_whitespace(s: &str) -> String {
    s.trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}
