//! Message Builder - a filled template becomes a composed message

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::FormsResult;
use crate::message::{Attachment, ComposedMessage};
use crate::metadata::{FormMetadata, ATTACHMENT_PREFIX};
use crate::tags::{fill, Delimiters, TagContext};
use crate::templates::{file_stem, Template};

pub const XML_FILE_VERSION: &str = "1.0";

pub struct MessageBuilder<'a> {
    pub template: &'a Template,
    /// Values posted by an interactive form. Keys are trimmed and lower-cased.
    pub form_values: HashMap<String, String>,
    /// Answers from the text-only template editor.
    pub prompt_responses: HashMap<String, String>,
    pub context: TagContext<'a>,
}

impl<'a> MessageBuilder<'a> {
    pub fn new(template: &'a Template, context: TagContext<'a>) -> Self {
        Self {
            template,
            form_values: HashMap::new(),
            prompt_responses: HashMap::new(),
            context,
        }
    }

    /// Repeated fields keep their first value.
    pub fn form_values(mut self, values: impl IntoIterator<Item = (String, String)>) -> Self {
        for (key, value) in values {
            self.form_values.entry(key.trim().to_lowercase()).or_insert(value);
        }
        self
    }

    pub fn prompt_responses(mut self, responses: HashMap<String, String>) -> Self {
        self.prompt_responses = responses;
        self
    }

    pub fn build(self) -> FormsResult<ComposedMessage> {
        let vars: HashMap<&str, &str> = self
            .form_values
            .iter()
            .chain(self.prompt_responses.iter())
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let render = |text: &str| fill(text, &self.context, vars.iter().map(|(k, v)| (*k, *v)), &Delimiters::FINAL);
        let headers = &self.template.headers;

        let mut subject = render(headers.subject.as_deref().unwrap_or_default()).trim().to_string();
        if subject.is_empty() {
            subject = self.template.name.clone();
        }

        let mut attachments = vec![];
        if self.template.is_interactive() {
            attachments.push(self.form_attachment());
        }

        Ok(ComposedMessage {
            to: render(headers.to.as_deref().unwrap_or_default()).trim().to_string(),
            cc: render(headers.cc.as_deref().unwrap_or_default()).trim().to_string(),
            subject,
            body: render(&self.template.body),
            attachments,
            submitted_at: self.context.now,
        })
    }

    /// The XML attachment a receiving station uses to display the form and
    /// pick the reply template.
    fn form_attachment(&self) -> Attachment {
        let ctx = &self.context;
        let display_form = self
            .template
            .viewer_path
            .as_deref()
            .and_then(|p| Path::new(p).file_name())
            .map(|n| n.to_string_lossy().into_owned());

        let mut params = BTreeMap::new();
        params.insert("xml_file_version".to_string(), XML_FILE_VERSION.to_string());
        params.insert("rms_express_version".to_string(), ctx.program_version.to_string());
        params.insert("submission_datetime".to_string(), ctx.now.format("%Y%m%d%H%M%S").to_string());
        params.insert("senders_callsign".to_string(), ctx.my_call.to_string());
        params.insert("grid_square".to_string(), ctx.locator.to_string());
        if let Some(display) = &display_form {
            params.insert("display_form".to_string(), display.clone());
        }
        if let Some(reply) = &self.template.reply_template {
            params.insert("reply_template".to_string(), reply.clone());
        }

        let metadata = FormMetadata {
            form_parameters: params,
            variables: self.form_values.clone().into_iter().collect(),
        };
        let name = display_form
            .as_deref()
            .map(|d| file_stem(Path::new(d)))
            .unwrap_or_else(|| self.template.name.clone());
        Attachment::new(format!("{ATTACHMENT_PREFIX}{name}.xml"), metadata.to_xml())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{TemplateHeaders, TemplateKind};
    use chrono::{TimeZone, Utc};

    fn text_template(body: &str) -> Template {
        Template {
            name: "Greeting".into(),
            path: "/forms/Greeting.txt".into(),
            form_path: None,
            viewer_path: None,
            reply_template: None,
            kind: TemplateKind::TextOnly,
            headers: TemplateHeaders {
                to: Some("{to}".into()),
                cc: None,
                subject: Some("Hi from {Callsign}".into()),
            },
            body: body.into(),
        }
    }

    fn context() -> TagContext<'static> {
        TagContext {
            my_call: "N0CALL",
            locator: "JO29pj",
            program_version: "radioforms v1.0.0",
            sequence: Some("0007".into()),
            ..TagContext::new(Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap())
        }
    }

    #[test]
    fn test_text_only_message() {
        let template = text_template("Hello {name}, seq {SeqNum}");
        let responses = HashMap::from([("name".to_string(), "Alice".to_string()), ("to".into(), "W1AW".into())]);
        let msg = MessageBuilder::new(&template, context())
            .prompt_responses(responses)
            .build()
            .unwrap();
        assert_eq!(msg.body, "Hello Alice, seq 0007");
        assert_eq!(msg.subject, "Hi from N0CALL");
        assert_eq!(msg.to, "W1AW");
        assert_eq!(msg.cc, "");
        assert!(msg.attachments.is_empty());
        assert_eq!(msg.submitted_at, Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap());
    }

    #[test]
    fn test_empty_subject_falls_back_to_template_name() {
        let mut template = text_template("x");
        template.headers.subject = None;
        let msg = MessageBuilder::new(&template, context()).build().unwrap();
        assert_eq!(msg.subject, "Greeting");
    }

    #[test]
    fn test_interactive_message_carries_form_xml() {
        let mut template = text_template("Message: {Message}");
        template.kind = TemplateKind::Interactive;
        template.form_path = Some("/forms/ICS213_Initial.html".into());
        template.viewer_path = Some("/forms/ICS213_Viewer.html".into());
        template.reply_template = Some("ICS213_SendReply.0".into());

        let msg = MessageBuilder::new(&template, context())
            .form_values([(" Message ".to_string(), "Water needed".to_string())])
            .build()
            .unwrap();
        assert_eq!(msg.body, "Message: Water needed");
        assert_eq!(msg.attachments.len(), 1);
        let attachment = &msg.attachments[0];
        assert_eq!(attachment.name, "RMS_Express_Form_ICS213_Viewer.xml");

        let meta = FormMetadata::parse(&attachment.data).unwrap();
        assert_eq!(meta.parameter("display_form"), Some("ICS213_Viewer.html"));
        assert_eq!(meta.parameter("reply_template"), Some("ICS213_SendReply.0"));
        assert_eq!(meta.parameter("senders_callsign"), Some("N0CALL"));
        assert_eq!(meta.parameter("submission_datetime"), Some("20240305140709"));
        assert_eq!(meta.variables["message"], "Water needed");
    }
}
