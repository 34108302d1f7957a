//! Template Catalog - folder tree of the installed templates
//!
//! Always rebuilt from the filesystem. Nothing here is cached between calls.

use serde::{Deserialize, Serialize};
use std::path::Path;
use walkdir::WalkDir;

use tracing::debug;

use crate::error::FormsResult;
use crate::sandbox::PathSandbox;
use crate::templates::{has_extension, FileIndex, Template, TXT_FILE_EXT};
use crate::version::installed_version;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormFolder {
    pub name: String,
    pub path: String,
    pub version: String,
    pub form_count: usize,
    pub forms: Vec<Template>,
    pub folders: Vec<FormFolder>,
}

impl FormFolder {
    fn empty(name: String, path: String) -> Self {
        Self {
            name,
            path,
            version: String::new(),
            form_count: 0,
            forms: vec![],
            folders: vec![],
        }
    }

    /// Depth-first iterator over every template in the tree.
    pub fn templates(&self) -> Box<dyn Iterator<Item = &Template> + '_> {
        Box::new(
            self.forms
                .iter()
                .chain(self.folders.iter().flat_map(|f| f.templates())),
        )
    }
}

/// Build the catalog rooted at the sandbox root. A missing root is an
/// empty catalog.
pub fn build(sandbox: &PathSandbox) -> FormsResult<FormFolder> {
    if !sandbox.root().is_dir() {
        let mut root = FormFolder::empty(folder_name(sandbox.root()), String::new());
        root.version = installed_version(sandbox);
        return Ok(root);
    }
    let files = FileIndex::scan(sandbox.root())?;
    let mut root = build_folder(sandbox, sandbox.root(), &files)?;
    root.version = installed_version(sandbox);
    Ok(root)
}

fn build_folder(sandbox: &PathSandbox, dir: &Path, files: &FileIndex) -> FormsResult<FormFolder> {
    let dir = sandbox.resolve(dir)?;
    let mut folder = FormFolder::empty(folder_name(&dir), sandbox.relative(&dir));

    let listing = WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name();
    for entry in listing {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        // Symlinks are skipped; a link back up the tree would loop.
        if entry.file_type().is_dir() {
            let sub = build_folder(sandbox, path, files)?;
            folder.form_count += sub.form_count;
            folder.folders.push(sub);
            continue;
        }
        if !entry.file_type().is_file() || !has_extension(path, TXT_FILE_EXT) {
            continue;
        }
        match Template::load(path, sandbox, files) {
            Ok(mut template) => {
                relativize(&mut template, sandbox);
                folder.forms.push(template);
                folder.form_count += 1;
            }
            Err(e) => debug!("failed to load form file {:?}: {}", sandbox.relative(path), e),
        }
    }

    folder.folders.sort_by(|a, b| a.name.cmp(&b.name));
    folder.forms.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(folder)
}

fn folder_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Rewrite a template's paths relative to the root, for client output.
pub fn relativize(template: &mut Template, sandbox: &PathSandbox) {
    template.path = sandbox.relative(&template.path);
    for p in [&mut template.form_path, &mut template.viewer_path].into_iter().flatten() {
        *p = sandbox.relative(&*p);
    }
}
