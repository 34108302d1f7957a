//! Template Resolver - from a reference or a form attachment to a template
//!
//! Reply chain: prior message -> form XML attachment -> `reply_template`
//! parameter -> file index -> template -> companion form.

use std::path::{Path, PathBuf};
use url::form_urlencoded::byte_serialize;

use crate::error::{FormsError, FormsResult};
use crate::metadata::FormMetadata;
use crate::sandbox::PathSandbox;
use crate::templates::{FileIndex, Template, HTML_FILE_EXT, REPLY_FILE_EXT};

/// A template ready to be filled, with the URL its form submits to.
#[derive(Debug, Clone)]
pub struct ResolvedForm {
    pub template: Template,
    /// The markup to fill: the companion form for replies, the display form itself otherwise.
    pub form_path: PathBuf,
    pub submit_url: String,
    pub metadata: FormMetadata,
}

pub struct TemplateResolver<'a> {
    sandbox: &'a PathSandbox,
    submit_path: &'a str,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(sandbox: &'a PathSandbox, submit_path: &'a str) -> Self {
        Self { sandbox, submit_path }
    }

    /// Load a template named directly by the caller.
    pub fn resolve_ref(&self, template_ref: &str) -> FormsResult<Template> {
        if template_ref.trim().is_empty() {
            return Err(FormsError::MissingTemplateRef);
        }
        let path = self.sandbox.resolve(template_ref)?;
        let files = FileIndex::scan(self.sandbox.root())?;
        Template::load(&path, self.sandbox, &files)
    }

    /// The reply template named in a prior message's form attachment.
    pub fn resolve_for_reply(&self, attachment: &[u8], in_reply_to: &str) -> FormsResult<ResolvedForm> {
        let metadata = FormMetadata::parse(attachment)?;
        let name = metadata
            .parameter("reply_template")
            .ok_or(FormsError::MissingReplyTemplate)?;
        let name = with_default_extension(name, REPLY_FILE_EXT);

        let files = FileIndex::scan(self.sandbox.root())?;
        let path = files
            .get(&name)
            .ok_or_else(|| FormsError::TemplateNotFound(name.clone()))?;
        let template = Template::load(path, self.sandbox, &files)?;
        let form_path = match &template.form_path {
            Some(p) => self.sandbox.resolve(p)?,
            None => {
                return Err(FormsError::invalid_template(
                    &template.path,
                    "reply template has no interactive form",
                ))
            }
        };
        let submit_url = self.submit_url(Path::new(&template.path), Some(in_reply_to));
        Ok(ResolvedForm {
            template,
            form_path,
            submit_url,
            metadata,
        })
    }

    /// The display form named in a form attachment, for viewing a received form.
    pub fn resolve_for_display(&self, attachment: &[u8]) -> FormsResult<ResolvedForm> {
        let metadata = FormMetadata::parse(attachment)?;
        let name = metadata
            .parameter("display_form")
            .ok_or(FormsError::MissingDisplayTemplate)?;
        let name = with_default_extension(name, HTML_FILE_EXT);

        let files = FileIndex::scan(self.sandbox.root())?;
        let path = files
            .get(&name)
            .ok_or_else(|| FormsError::TemplateNotFound(name.clone()))?;
        let template = Template::from_form_file(path, self.sandbox)?;
        let form_path = PathBuf::from(&template.path);
        let submit_url = self.submit_url(&form_path, None);
        Ok(ResolvedForm {
            template,
            form_path,
            submit_url,
            metadata,
        })
    }

    /// Callback URL for a form, carrying the template (root-relative) and the
    /// optional prior message.
    pub fn submit_url(&self, template_path: &Path, in_reply_to: Option<&str>) -> String {
        let template = escape(&self.sandbox.relative(template_path));
        match in_reply_to {
            Some(id) => format!("{}?in-reply-to={}&template={}", self.submit_path, escape(id), template),
            None => format!("{}?template={}", self.submit_path, template),
        }
    }
}

fn with_default_extension(name: &str, ext: &str) -> String {
    if Path::new(name).extension().is_none() {
        format!("{name}.{ext}")
    } else {
        name.to_string()
    }
}

fn escape(s: &str) -> String {
    byte_serialize(s.as_bytes()).collect()
}
