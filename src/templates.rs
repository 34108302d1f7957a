//! Template System - text templates and their companion forms
//!
//! A template file is plain text, optionally starting with `Key: value`
//! headers. `Form:` links the interactive HTML forms, `Msg:` ends the header
//! section and starts the body.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use tracing::warn;

use crate::error::{FormsError, FormsResult};
use crate::sandbox::PathSandbox;

pub const TXT_FILE_EXT: &str = "txt";
pub const HTML_FILE_EXT: &str = "html";
pub const REPLY_FILE_EXT: &str = "0";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    TextOnly,
    Interactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    /// Root-relative in catalog output, absolute everywhere else.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_template: Option<String>,
    pub kind: TemplateKind,
    #[serde(skip)]
    pub headers: TemplateHeaders,
    #[serde(skip)]
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateHeaders {
    pub to: Option<String>,
    pub cc: Option<String>,
    pub subject: Option<String>,
}

impl Template {
    pub fn is_interactive(&self) -> bool {
        self.kind == TemplateKind::Interactive
    }

    /// Read and parse the template at `path`, resolving companion forms
    /// through `files`.
    pub fn load(path: &Path, sandbox: &PathSandbox, files: &FileIndex) -> FormsResult<Self> {
        let path = sandbox.resolve(path)?;
        let content = read_text(&path)?;
        Self::parse(&path, &content, sandbox, files)
    }

    /// A bare HTML form used directly as the thing to fill.
    pub fn from_form_file(path: &Path, sandbox: &PathSandbox) -> FormsResult<Self> {
        let path = sandbox.resolve(path)?;
        let path_str = path.to_string_lossy().into_owned();
        Ok(Self {
            name: file_stem(&path),
            path: path_str.clone(),
            form_path: Some(path_str),
            viewer_path: None,
            reply_template: None,
            kind: TemplateKind::Interactive,
            headers: TemplateHeaders::default(),
            body: String::new(),
        })
    }

    fn parse(path: &Path, content: &str, sandbox: &PathSandbox, files: &FileIndex) -> FormsResult<Self> {
        let parsed = parse_sections(content);
        let path_str = path.to_string_lossy().into_owned();

        let mut forms = parsed.form.iter().flat_map(|v| v.split(',')).map(str::trim).filter(|s| !s.is_empty());
        let locate = |name: &str| -> FormsResult<String> {
            let found = files
                .get(name)
                .ok_or_else(|| FormsError::invalid_template(&path_str, format!("form file not found: {name}")))?;
            Ok(sandbox.resolve(found)?.to_string_lossy().into_owned())
        };
        let form_path = forms.next().map(&locate).transpose()?;
        let viewer_path = forms.next().map(&locate).transpose()?;

        Ok(Self {
            name: file_stem(path),
            path: path_str,
            kind: if form_path.is_some() { TemplateKind::Interactive } else { TemplateKind::TextOnly },
            form_path,
            viewer_path,
            reply_template: parsed.reply_template,
            headers: parsed.headers,
            body: parsed.body,
        })
    }
}

#[derive(Debug, Default)]
struct Sections {
    form: Option<String>,
    reply_template: Option<String>,
    headers: TemplateHeaders,
    body: String,
}

fn parse_sections(content: &str) -> Sections {
    let mut sections = Sections::default();
    let mut consumed = 0;
    let mut saw_header = false;

    for line in content.split_inclusive('\n') {
        let Some((key, value)) = line.split_once(':') else { break };
        let value = value.trim().to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "form" => sections.form = Some(value),
            "replytemplate" => sections.reply_template = Some(value),
            "to" => sections.headers.to = Some(value),
            "cc" => sections.headers.cc = Some(value),
            "subject" => sections.headers.subject = Some(value),
            "msg" => {
                let rest = &line[line.find(':').map_or(line.len(), |i| i + 1)..];
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                let remainder = &content[consumed + line.len()..];
                sections.body = if rest.trim().is_empty() {
                    remainder.to_string()
                } else {
                    format!("{rest}{remainder}")
                };
                return sections;
            }
            _ => break,
        }
        saw_header = true;
        consumed += line.len();
    }

    sections.body = if saw_header { content[consumed..].to_string() } else { content.to_string() };
    sections
}

/// Read a text file, dropping a UTF-8 BOM. Non-UTF-8 input is decoded lossily.
pub fn read_text(path: &Path) -> FormsResult<String> {
    let data = fs::read(path)?;
    let data = trim_bom(&data);
    match std::str::from_utf8(data) {
        Ok(s) => Ok(s.to_string()),
        Err(_) => {
            warn!("unsupported string encoding in {}, expected UTF-8", path.display());
            Ok(String::from_utf8_lossy(data).into_owned())
        }
    }
}

pub fn trim_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data)
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map_or(false, |e| e.to_string_lossy().eq_ignore_ascii_case(ext))
}

/// File name -> path for every file under the template root.
///
/// Lookups ignore case. When two files share a name the first one in sorted
/// walk order wins.
#[derive(Debug, Clone, Default)]
pub struct FileIndex {
    files: HashMap<String, PathBuf>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self { files: HashMap::new() }
    }

    /// Walks without following symlinks, in file name order.
    pub fn scan(root: &Path) -> Result<Self, std::io::Error> {
        let mut index = Self::new();
        if !root.exists() {
            return Ok(index);
        }
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_lowercase();
            index.files.entry(name).or_insert_with(|| entry.into_path());
        }
        Ok(index)
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.files.get(&name.to_lowercase()).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, PathSandbox, FileIndex) {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("ICS USA Forms");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("ICS213_Initial.html"), "<html></html>").unwrap();
        fs::write(sub.join("ICS213_Viewer.html"), "<html></html>").unwrap();
        let sandbox = PathSandbox::new(dir.path());
        let files = FileIndex::scan(dir.path()).unwrap();
        (dir, sandbox, files)
    }

    #[test]
    fn test_parse_headers_and_body() {
        let s = parse_sections("Form: a.html, b.html\nSubject: Hello <Callsign>\nMsg: first line\nsecond line\n");
        assert_eq!(s.form.as_deref(), Some("a.html, b.html"));
        assert_eq!(s.headers.subject.as_deref(), Some("Hello <Callsign>"));
        assert_eq!(s.body, "first line\nsecond line\n");
    }

    #[test]
    fn test_msg_on_its_own_line() {
        let s = parse_sections("Subject: x\nMsg:\nbody: with colon\n");
        assert_eq!(s.body, "body: with colon\n");
    }

    #[test]
    fn test_plain_file_is_all_body() {
        let s = parse_sections("Hello {name}, seq {SeqNum}");
        assert_eq!(s.body, "Hello {name}, seq {SeqNum}");
        assert_eq!(s.headers, TemplateHeaders::default());
    }

    #[test]
    fn test_unknown_first_line_is_body() {
        let s = parse_sections("Dear team: hi\nSubject: not a header\n");
        assert_eq!(s.body, "Dear team: hi\nSubject: not a header\n");
        assert!(s.headers.subject.is_none());
    }

    #[test]
    fn test_interactive_template_links_forms() {
        let (dir, sandbox, files) = fixture();
        let path = dir.path().join("ICS USA Forms/ICS213.txt");
        fs::write(&path, "\u{feff}Form: ICS213_Initial.html,ICS213_Viewer.html\nReplyTemplate: ICS213_SendReply.0\nMsg:\n{Body}").unwrap();

        let template = Template::load(&path, &sandbox, &files).unwrap();
        assert_eq!(template.name, "ICS213");
        assert!(template.is_interactive());
        assert!(template.form_path.unwrap().ends_with("ICS213_Initial.html"));
        assert!(template.viewer_path.unwrap().ends_with("ICS213_Viewer.html"));
        assert_eq!(template.reply_template.as_deref(), Some("ICS213_SendReply.0"));
        assert_eq!(template.body, "{Body}");
    }

    #[test]
    fn test_missing_companion_form_is_invalid() {
        let (dir, sandbox, files) = fixture();
        let path = dir.path().join("broken.txt");
        fs::write(&path, "Form: nowhere.html\nMsg: x").unwrap();
        let err = Template::load(&path, &sandbox, &files).unwrap_err();
        assert!(matches!(err, FormsError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_file_index_ignores_case() {
        let (_dir, _sandbox, files) = fixture();
        assert!(files.get("ics213_initial.HTML").is_some());
        assert!(files.get("missing.html").is_none());
        assert_eq!(files.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_index_skips_symlinks() {
        let (dir, _sandbox, _files) = fixture();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("ICS USA Forms/loop")).unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("ICS USA Forms/ICS213_Initial.html"),
            dir.path().join("alias.html"),
        )
        .unwrap();

        let files = FileIndex::scan(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.get("alias.html").is_none());
    }
}
