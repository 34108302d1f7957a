//! Path Sandbox - every template and asset path goes through here
//!
//! CRITICAL: nothing under the forms subsystem opens a file that has not been
//! returned by [`PathSandbox::resolve`].

use std::path::{Component, Path, PathBuf};

use crate::error::{FormsError, FormsResult};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static SANDBOX_CHECK_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_sandbox_check_count() -> u32 {
    SANDBOX_CHECK_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_sandbox_check_count() {
    SANDBOX_CHECK_COUNT.store(0, Ordering::SeqCst);
}

/// The template root plus containment checks against it.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            normalize(root)
        } else {
            match std::env::current_dir() {
                Ok(cwd) => normalize(cwd.join(root)),
                Err(_) => normalize(root),
            }
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `reference` against the root.
    ///
    /// Absolute references are taken as-is, relative ones are joined with the
    /// root. Either way the normalized result must stay inside the root.
    pub fn resolve(&self, reference: impl AsRef<Path>) -> FormsResult<PathBuf> {
        #[cfg(feature = "test-hooks")]
        SANDBOX_CHECK_COUNT.fetch_add(1, Ordering::SeqCst);

        let reference = reference.as_ref();
        let joined = if reference.is_absolute() {
            reference.to_path_buf()
        } else {
            self.root.join(reference)
        };
        let normalized = normalize(&joined);
        if !normalized.starts_with(&self.root) {
            return Err(FormsError::PathEscape(reference.to_path_buf()));
        }
        Ok(normalized)
    }

    /// Root-relative form of `path`, with forward slashes. Paths outside the
    /// root come back unchanged.
    pub fn relative(&self, path: impl AsRef<Path>) -> String {
        let path = normalize(path.as_ref());
        let rel = path.strip_prefix(&self.root).unwrap_or(&path);
        to_unix_string(rel)
    }
}

/// Resolve `.` and `..` without touching the filesystem. `..` never climbs
/// above the root directory.
pub fn normalize(path: impl AsRef<Path>) -> PathBuf {
    let mut components = Vec::new();

    for component in path.as_ref().components() {
        match component {
            Component::Prefix(p) => components.push(Component::Prefix(p)),
            Component::RootDir => {
                components.clear();
                components.push(Component::RootDir);
            }
            Component::CurDir => {}
            Component::ParentDir => match components.last() {
                Some(Component::Normal(_)) => {
                    components.pop();
                }
                Some(Component::ParentDir) | None => components.push(Component::ParentDir),
                _ => {}
            },
            Component::Normal(c) => components.push(Component::Normal(c)),
        }
    }

    if components.is_empty() {
        PathBuf::from(".")
    } else {
        components.iter().collect()
    }
}

fn to_unix_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
