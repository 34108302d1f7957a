//! Form Metadata - the XML document attached to form-based messages
//!
//! Only the `form_parameters` and `variables` containers under the fixed
//! root element are read. Everything else in the document is ignored.

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{FormsError, FormsResult};
use crate::templates::trim_bom;

pub const ROOT_TAG: &str = "RMS_Express_Form";
pub const FORM_PARAMETERS_TAG: &str = "form_parameters";
pub const VARIABLES_TAG: &str = "variables";

/// Attachment names carrying form metadata start with this prefix.
pub const ATTACHMENT_PREFIX: &str = "RMS_Express_Form_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormMetadata {
    pub form_parameters: BTreeMap<String, String>,
    pub variables: BTreeMap<String, String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Parameters,
    Variables,
    Ignored,
}

impl FormMetadata {
    pub fn parse(data: &[u8]) -> FormsResult<Self> {
        let data = trim_bom(data);
        let text = match std::str::from_utf8(data) {
            Ok(s) => Cow::Borrowed(s),
            Err(_) => {
                warn!("unsupported string encoding in form XML, expected UTF-8");
                String::from_utf8_lossy(data)
            }
        };

        // Text is not trimmed: values keep their whitespace, and text between
        // container elements is never read.
        let mut reader = Reader::from_str(&text);

        let mut meta = FormMetadata::default();
        let mut depth = 0usize;
        let mut root_closed = false;
        let mut section = Section::Ignored;
        let mut entry: Option<(String, String)> = None;

        loop {
            let event = reader.read_event().map_err(|e| {
                FormsError::Schema(format!("at byte {}: {}", reader.buffer_position(), e))
            })?;
            match event {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    match depth {
                        0 => check_root(&name, root_closed)?,
                        1 => section = section_for(&name),
                        2 if section != Section::Ignored => entry = Some((name, String::new())),
                        _ => {}
                    }
                    depth += 1;
                }
                Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    match depth {
                        0 => {
                            check_root(&name, root_closed)?;
                            root_closed = true;
                        }
                        2 => meta.insert(section, name, String::new()),
                        _ => {}
                    }
                }
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    match depth {
                        0 => root_closed = true,
                        1 => section = Section::Ignored,
                        2 => {
                            if let Some((key, value)) = entry.take() {
                                meta.insert(section, key, value);
                            }
                        }
                        _ => {}
                    }
                }
                Event::Text(t) => {
                    if let Some((_, value)) = entry.as_mut() {
                        let unescaped = t
                            .unescape()
                            .map_err(|e| FormsError::Schema(e.to_string()))?;
                        value.push_str(&unescaped);
                    }
                }
                Event::CData(c) => {
                    if let Some((_, value)) = entry.as_mut() {
                        value.push_str(&String::from_utf8_lossy(&c));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !root_closed {
            return Err(FormsError::Schema(format!("missing {ROOT_TAG} tag in form XML")));
        }
        Ok(meta)
    }

    fn insert(&mut self, section: Section, key: String, value: String) {
        match section {
            Section::Parameters => {
                self.form_parameters.insert(key, value);
            }
            Section::Variables => {
                self.variables.insert(key, value);
            }
            Section::Ignored => {}
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.form_parameters
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Serialize to the same fixed schema [`FormMetadata::parse`] reads.
    /// Keys that are not usable as XML element names are dropped.
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str(&format!("<{ROOT_TAG}>\n"));
        for (tag, entries) in [
            (FORM_PARAMETERS_TAG, &self.form_parameters),
            (VARIABLES_TAG, &self.variables),
        ] {
            out.push_str(&format!("  <{tag}>\n"));
            for (key, value) in entries {
                if !is_xml_name(key) {
                    warn!("dropping form field {:?}: not a valid XML element name", key);
                    continue;
                }
                out.push_str(&format!("    <{key}>{}</{key}>\n", escape(value.as_str())));
            }
            out.push_str(&format!("  </{tag}>\n"));
        }
        out.push_str(&format!("</{ROOT_TAG}>\n"));
        out
    }
}

fn check_root(name: &str, root_closed: bool) -> FormsResult<()> {
    if name != ROOT_TAG || root_closed {
        return Err(FormsError::Schema(format!("missing {ROOT_TAG} tag in form XML")));
    }
    Ok(())
}

fn section_for(name: &str) -> Section {
    match name {
        FORM_PARAMETERS_TAG => Section::Parameters,
        VARIABLES_TAG => Section::Variables,
        _ => Section::Ignored,
    }
}

fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else { return false };
    (first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
