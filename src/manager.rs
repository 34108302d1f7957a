//! Forms Manager - single entry point for every forms request
//!
//! CRITICAL: every template, form and asset path goes through the sandbox.
//! The session store is the only state shared between requests; the catalog
//! and all template lookups are recomputed from the filesystem on each call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use quick_xml::escape::escape;
use tokio_util::sync::CancellationToken;
use url::form_urlencoded;

use tracing::{debug, info, warn};

use crate::builder::MessageBuilder;
use crate::catalog::{self, FormFolder};
use crate::config::FormsConfig;
use crate::error::{FormsError, FormsResult};
use crate::location::{fetch_position, LocationProvider, Position, StaticLocation};
use crate::message::{ComposedMessage, MessageStore, StoredMessage};
use crate::resolver::TemplateResolver;
use crate::sandbox::PathSandbox;
use crate::sequence::{FileSequence, SequenceCounter, SequenceFormat};
use crate::session::SessionStore;
use crate::tags::{fill, fill_system_tags, mentions_location, Delimiters, TagContext};
use crate::templates::{read_text, Template};
use crate::update::{UpdateAction, UpdateResponse, UpdateService};
use crate::version::{installed_version, is_newer};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Values returned by an authoring session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Fields posted by an interactive HTML form.
    FormFields(Vec<(String, String)>),
    /// `{"responses": {...}}` from the text-only template editor.
    PromptResponses(HashMap<String, String>),
}

#[derive(Deserialize)]
struct PromptPayload {
    #[serde(default)]
    responses: HashMap<String, String>,
}

impl Submission {
    /// Decode a request body by its content type.
    ///
    /// Multipart bodies are decoded by the HTTP layer and handed over as
    /// [`Submission::FormFields`].
    pub fn decode(content_type: &str, body: &[u8]) -> FormsResult<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "application/json" => {
                let payload: PromptPayload = serde_json::from_slice(body)?;
                Ok(Submission::PromptResponses(payload.responses))
            }
            "application/x-www-form-urlencoded" => Ok(Submission::FormFields(
                form_urlencoded::parse(body).into_owned().collect(),
            )),
            _ => Err(FormsError::UnsupportedContent(content_type.to_string())),
        }
    }
}

/// Result of asking for a template's interactive form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "markup", rename_all = "snake_case")]
pub enum InteractiveForm {
    /// The filled form markup.
    Filled(String),
    /// No companion form; the caller should open the text editor instead.
    TextOnly,
}

/// System tag values gathered for one fill.
struct TagValues {
    template_version: String,
    form_folder: String,
    sequence: String,
    position: Option<Position>,
    now: DateTime<Utc>,
}

impl TagValues {
    fn context<'a>(
        &'a self,
        config: &'a FormsConfig,
        reply: Option<&'a StoredMessage>,
        submit_url: Option<&'a str>,
    ) -> TagContext<'a> {
        TagContext {
            submit_url,
            reply,
            position: self.position,
            sequence: Some(self.sequence.clone()),
            my_call: &config.my_call,
            locator: &config.locator,
            program_version: &config.app_version,
            template_version: &self.template_version,
            form_folder: Some(&self.form_folder),
            now: self.now,
        }
    }
}

pub struct FormsManager {
    config: FormsConfig,
    sandbox: PathSandbox,
    sessions: SessionStore,
    sequence: Arc<dyn SequenceCounter>,
    sequence_format: SequenceFormat,
    location: Option<Arc<dyn LocationProvider>>,
    messages: Option<Arc<dyn MessageStore>>,
    updates: Option<Arc<dyn UpdateService>>,
    clock: Clock,
}

impl FormsManager {
    /// Creates the template root if it does not exist yet.
    pub fn new(config: FormsConfig) -> Self {
        if let Err(e) = std::fs::create_dir_all(&config.forms_path) {
            warn!("can't create forms directory {}: {}", config.forms_path.display(), e);
        }
        let sandbox = PathSandbox::new(&config.forms_path);
        let sequence: Arc<dyn SequenceCounter> = Arc::new(FileSequence::open(config.sequence_file()));
        let sequence_format = SequenceFormat::parse_or_default(&config.sequence_format);
        let location: Option<Arc<dyn LocationProvider>> =
            match (config.location.latitude, config.location.longitude) {
                (Some(lat), Some(lon)) => Some(Arc::new(StaticLocation(Position::new(lat, lon)))),
                _ => None,
            };
        Self {
            config,
            sandbox,
            sessions: SessionStore::new(),
            sequence,
            sequence_format,
            location,
            messages: None,
            updates: None,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_sequence(mut self, sequence: Arc<dyn SequenceCounter>) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_location(mut self, provider: Arc<dyn LocationProvider>) -> Self {
        self.location = Some(provider);
        self
    }

    pub fn with_messages(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.messages = Some(store);
        self
    }

    pub fn with_updates(mut self, service: Arc<dyn UpdateService>) -> Self {
        self.updates = Some(service);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &FormsConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    /// The full template tree, freshly read.
    pub fn catalog(&self) -> FormsResult<FormFolder> {
        catalog::build(&self.sandbox)
    }

    /// Build a message from a completed authoring session and keep it under
    /// `token` until the client picks it up.
    pub async fn submit(
        &self,
        token: &str,
        template_ref: &str,
        in_reply_to: Option<&str>,
        submission: Submission,
    ) -> FormsResult<()> {
        if template_ref.trim().is_empty() {
            return Err(FormsError::MissingTemplateRef);
        }
        if token.trim().is_empty() {
            return Err(FormsError::MissingSessionToken);
        }
        let template = self.resolver().resolve_ref(template_ref)?;
        let reply = self.load_reply(in_reply_to)?;

        let (form_values, prompt_responses) = match submission {
            Submission::FormFields(fields) => (fields, HashMap::new()),
            Submission::PromptResponses(responses) => (
                vec![("templateversion".to_string(), installed_version(&self.sandbox))],
                responses,
            ),
        };
        let message = self
            .build_message(&template, reply.as_ref(), form_values, prompt_responses)
            .await?;
        debug!("form data stored for {:?}", self.sandbox.relative(&template.path));
        self.sessions.put_at(token, message, (self.clock)());
        Ok(())
    }

    /// The message last submitted under `token`.
    pub fn composed(&self, token: &str) -> FormsResult<ComposedMessage> {
        if token.trim().is_empty() {
            return Err(FormsError::MissingSessionToken);
        }
        self.sessions
            .get(token)
            .ok_or_else(|| FormsError::MessageNotFound(token.to_string()))
    }

    /// A file referenced by a form (stylesheet, image). `asset_ref` may carry
    /// the configured asset URL prefix.
    pub fn asset_path(&self, asset_ref: &str) -> FormsResult<PathBuf> {
        let asset_ref = asset_ref
            .strip_prefix(self.config.asset_path.as_str())
            .map(|r| r.trim_start_matches('/'))
            .unwrap_or(asset_ref);
        let path = self.sandbox.resolve(asset_ref)?;
        if !path.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such asset: {asset_ref}"),
            )
            .into());
        }
        Ok(path)
    }

    /// Raw template text with system tags filled, for the text editor.
    /// Variables stay untouched.
    pub async fn template_preview(&self, template_ref: &str, in_reply_to: Option<&str>) -> FormsResult<String> {
        let template = self.resolver().resolve_ref(template_ref)?;
        let reply = self.load_reply(in_reply_to)?;
        let path = Path::new(&template.path);
        let content = read_text(path)?;

        let delims = Delimiters::PREVIEW;
        let values = self.tag_values(path, mentions_location(&content, &delims)).await?;
        let ctx = values.context(&self.config, reply.as_ref(), None);
        Ok(fill_system_tags(&content, &ctx, &delims))
    }

    /// The template's interactive form, filled and pointing back at the submit URL.
    pub async fn interactive_form(&self, template_ref: &str, in_reply_to: Option<&str>) -> FormsResult<InteractiveForm> {
        let resolver = self.resolver();
        let template = resolver.resolve_ref(template_ref)?;
        let Some(form_path) = &template.form_path else {
            return Ok(InteractiveForm::TextOnly);
        };
        let in_reply_to = in_reply_to.filter(|id| !id.is_empty());
        let submit_url = resolver.submit_url(Path::new(&template.path), in_reply_to);
        let markup = self
            .fill_form(Path::new(form_path), None, &submit_url, &BTreeMap::new())
            .await?;
        Ok(InteractiveForm::Filled(markup))
    }

    /// Render a received form attachment: its reply form when `in_reply_to`
    /// is given, its display form otherwise.
    pub async fn render_form(&self, attachment: &[u8], in_reply_to: Option<&str>) -> FormsResult<String> {
        let in_reply_to = in_reply_to.filter(|id| !id.is_empty());
        let reply = self.load_reply(in_reply_to)?;
        self.render(attachment, in_reply_to, reply.as_ref()).await
    }

    /// Open the reply form for a message in the mailbox.
    pub async fn render_reply(&self, prior_id: &str) -> FormsResult<String> {
        let prior = self.open_message(prior_id)?;
        let attachment = prior
            .form_attachment()
            .ok_or(FormsError::MissingReplyTemplate)?;
        self.render(&attachment.data, Some(prior_id), Some(&prior)).await
    }

    /// Compose a message directly, with `responses` answering the template's
    /// variables. Nothing is stored in the session store.
    pub async fn compose_template(
        &self,
        template_ref: &str,
        subject: &str,
        in_reply_to: Option<&str>,
        responses: HashMap<String, String>,
    ) -> FormsResult<ComposedMessage> {
        let template = self.resolver().resolve_ref(template_ref)?;
        let reply = self.load_reply(in_reply_to)?;
        let version = installed_version(&self.sandbox);
        info!("Form '{}', version: {}", self.sandbox.relative(&template.path), version);

        let form_values = vec![
            ("subjectline".to_string(), subject.to_string()),
            ("templateversion".to_string(), version),
        ];
        self.build_message(&template, reply.as_ref(), form_values, responses)
            .await
    }

    /// Check for a newer template package and install it over the root.
    ///
    /// Not safe to run while forms are being composed.
    pub async fn update_templates(&self, cancel: &CancellationToken) -> FormsResult<UpdateResponse> {
        let service = self
            .updates
            .as_ref()
            .ok_or_else(|| FormsError::Config("no update service configured".into()))?;
        std::fs::create_dir_all(self.sandbox.root())?;

        let current = installed_version(&self.sandbox);
        info!("Updating form templates; current version is {}", current);
        let latest = service.fetch_latest(cancel).await?;
        if !is_newer(&current, &latest.version) {
            info!("Latest forms version is {}; nothing to do", latest.version);
            return Ok(UpdateResponse {
                newest_version: latest.version,
                action: UpdateAction::None,
            });
        }

        service
            .install(&latest.archive_url, self.sandbox.root(), cancel)
            .await?;
        info!("Finished forms update to {}", latest.version);
        Ok(UpdateResponse {
            newest_version: latest.version,
            action: UpdateAction::Update,
        })
    }

    pub fn set_sequence(&self, value: i64) -> FormsResult<i64> {
        self.sequence.set(value)
    }

    fn resolver(&self) -> TemplateResolver<'_> {
        TemplateResolver::new(&self.sandbox, &self.config.submit_path)
    }

    fn open_message(&self, id: &str) -> FormsResult<StoredMessage> {
        match &self.messages {
            Some(store) => store.open(id),
            None => Err(FormsError::MessageNotFound(id.to_string())),
        }
    }

    /// The prior message, if one is named. Without a message store the reply
    /// tags just come out empty.
    fn load_reply(&self, in_reply_to: Option<&str>) -> FormsResult<Option<StoredMessage>> {
        let Some(id) = in_reply_to.filter(|id| !id.is_empty()) else {
            return Ok(None);
        };
        if self.messages.is_none() {
            warn!("no message store, {} will not be quoted", id);
            return Ok(None);
        }
        self.open_message(id).map(Some)
    }

    async fn render(
        &self,
        attachment: &[u8],
        in_reply_to: Option<&str>,
        reply: Option<&StoredMessage>,
    ) -> FormsResult<String> {
        let resolver = self.resolver();
        let resolved = match in_reply_to {
            Some(id) => resolver.resolve_for_reply(attachment, id)?,
            None => resolver.resolve_for_display(attachment)?,
        };
        // Received values are text; they must not become markup in the form.
        let vars: BTreeMap<String, String> = resolved
            .metadata
            .variables
            .iter()
            .map(|(key, value)| (key.clone(), escape(value.as_str()).into_owned()))
            .collect();
        self.fill_form(&resolved.form_path, reply, &resolved.submit_url, &vars)
            .await
    }

    async fn fill_form(
        &self,
        form_path: &Path,
        reply: Option<&StoredMessage>,
        submit_url: &str,
        vars: &BTreeMap<String, String>,
    ) -> FormsResult<String> {
        let form_path = self.sandbox.resolve(form_path)?;
        let content = read_text(&form_path)?;
        let delims = Delimiters::FINAL;
        let values = self
            .tag_values(&form_path, mentions_location(&content, &delims))
            .await?;
        let ctx = values.context(&self.config, reply, Some(submit_url));
        Ok(fill(&content, &ctx, vars, &delims))
    }

    async fn build_message(
        &self,
        template: &Template,
        reply: Option<&StoredMessage>,
        form_values: Vec<(String, String)>,
        prompt_responses: HashMap<String, String>,
    ) -> FormsResult<ComposedMessage> {
        let delims = Delimiters::FINAL;
        let headers = &template.headers;
        let wants_location = [&headers.to, &headers.cc, &headers.subject]
            .into_iter()
            .flatten()
            .chain(std::iter::once(&template.body))
            .any(|text| mentions_location(text, &delims));

        let values = self.tag_values(Path::new(&template.path), wants_location).await?;
        let message = MessageBuilder::new(template, values.context(&self.config, reply, None))
            .form_values(form_values)
            .prompt_responses(prompt_responses)
            .build()?;
        self.sequence.next()?;
        Ok(message)
    }

    async fn tag_values(&self, file: &Path, wants_location: bool) -> FormsResult<TagValues> {
        let position = if wants_location {
            fetch_position(self.location.as_deref(), &self.config.location).await
        } else {
            None
        };
        let folder = file
            .parent()
            .map(|dir| self.sandbox.relative(dir))
            .unwrap_or_default();
        let prefix = self.config.asset_path.trim_end_matches('/');
        let form_folder = if folder.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}/{folder}")
        };
        Ok(TagValues {
            template_version: installed_version(&self.sandbox),
            form_folder,
            sequence: self.sequence_format.format(self.sequence.current()?),
            position,
            now: (self.clock)(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Attachment, JsonMessageStore};
    use crate::metadata::FormMetadata;
    use crate::sequence::MemorySequence;
    use crate::update::ReleaseInfo;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    fn fixture() -> (tempfile::TempDir, FormsManager, Arc<MemorySequence>) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("forms");
        write(&root, "Standard_Forms_Version.dat", "1.1.6\t.0\n");
        write(&root, "General/Greeting.txt", "Subject: Hi {name}\nMsg: Hello {name}, seq {SeqNum}");
        write(
            &root,
            "ICS/ICS213.txt",
            "Form: ICS213_Initial.html, ICS213_Viewer.html\nReplyTemplate: ICS213_reply\nSubject: {subjectline}\nMsg:\n{message}",
        );
        write(
            &root,
            "ICS/ICS213_Initial.html",
            "<form action=\"http://{FormServer}:{FormPort}\"><link href=\"{FormFolder}/style.css\">{MsgSender}</form>",
        );
        write(&root, "ICS/ICS213_Viewer.html", "<p>{subjectline}: {message}</p>");
        write(&root, "ICS/ICS213_reply.0", "Form: ICS213_Reply_Initial.html\nSubject: Re: {MsgOriginalSubject}\nMsg:\n{reply}");
        write(&root, "ICS/ICS213_Reply_Initial.html", "<form action=\"http://localhost:8001\">{MsgOriginalSender} {subjectline}</form>");
        write(&root, "ICS/style.css", "body {}");

        let mut config = FormsConfig::new(&root);
        config.my_call = "N0CALL".into();
        config.sequence_format = "%04d".into();
        let sequence = Arc::new(MemorySequence::starting_at(7));
        let manager = FormsManager::new(config)
            .with_sequence(sequence.clone())
            .with_clock(Arc::new(fixed_now));
        (dir, manager, sequence)
    }

    #[tokio::test]
    async fn test_submit_prompt_responses_then_pick_up() {
        let (_dir, manager, sequence) = fixture();
        let responses = HashMap::from([("name".to_string(), "Alice".to_string())]);
        manager
            .submit("tab-1", "General/Greeting.txt", None, Submission::PromptResponses(responses))
            .await
            .unwrap();

        let msg = manager.composed("tab-1").unwrap();
        assert_eq!(msg.body, "Hello Alice, seq 0007");
        assert_eq!(msg.subject, "Hi Alice");
        assert_eq!(msg.submitted_at, fixed_now());
        assert_eq!(sequence.current().unwrap(), 8);
    }

    #[tokio::test]
    async fn test_submit_requires_template_and_token() {
        let (_dir, manager, _) = fixture();
        let fields = Submission::FormFields(vec![]);
        let err = manager.submit("tab", "", None, fields.clone()).await.unwrap_err();
        assert!(matches!(err, FormsError::MissingTemplateRef));
        let err = manager.submit("", "General/Greeting.txt", None, fields.clone()).await.unwrap_err();
        assert!(matches!(err, FormsError::MissingSessionToken));
        let err = manager.submit(" ", "General/Nope.txt", None, fields.clone()).await.unwrap_err();
        assert!(matches!(err, FormsError::MissingSessionToken));
        assert_eq!(err.status().code(), 400);
        let err = manager.submit("tab", "../../etc/passwd", None, fields.clone()).await.unwrap_err();
        assert_eq!(err.status().code(), 403);
        let err = manager.submit("tab", "General/Nope.txt", None, fields).await.unwrap_err();
        assert_eq!(err.status().code(), 404);
        assert!(manager.composed("tab").is_err());
    }

    #[tokio::test]
    async fn test_submit_form_fields_attaches_xml() {
        let (_dir, manager, _) = fixture();
        let fields = Submission::FormFields(vec![
            ("SubjectLine".into(), "Need water".into()),
            ("message".into(), "Two pallets".into()),
        ]);
        manager.submit("tab", "ICS/ICS213.txt", None, fields).await.unwrap();
        let msg = manager.composed("tab").unwrap();
        assert_eq!(msg.subject, "Need water");
        assert_eq!(msg.body, "Two pallets");

        let meta = FormMetadata::parse(&msg.attachments[0].data).unwrap();
        assert_eq!(meta.parameter("reply_template"), Some("ICS213_reply"));
        assert_eq!(meta.parameter("display_form"), Some("ICS213_Viewer.html"));
    }

    #[test]
    fn test_decode_submission() {
        let json = Submission::decode("application/json; charset=utf-8", br#"{"responses":{"a":"1"}}"#).unwrap();
        assert_eq!(json, Submission::PromptResponses(HashMap::from([("a".into(), "1".into())])));

        let form = Submission::decode("application/x-www-form-urlencoded", b"a=1&b=two+words").unwrap();
        assert_eq!(
            form,
            Submission::FormFields(vec![("a".into(), "1".into()), ("b".into(), "two words".into())])
        );

        let err = Submission::decode("text/plain", b"").unwrap_err();
        assert_eq!(err.status().code(), 400);
    }

    #[tokio::test]
    async fn test_preview_uses_preview_delimiters() {
        let (dir, manager, _) = fixture();
        write(&dir.path().join("forms"), "General/Preview.txt", "From <MsgSender> {MsgSender} <name>");
        let text = manager.template_preview("General/Preview.txt", None).await.unwrap();
        assert_eq!(text, "From N0CALL {MsgSender} <name>");
    }

    #[tokio::test]
    async fn test_interactive_form() {
        let (_dir, manager, _) = fixture();
        let form = manager.interactive_form("ICS/ICS213.txt", None).await.unwrap();
        let InteractiveForm::Filled(markup) = form else { panic!("expected markup") };
        assert!(markup.contains("action=\"/api/form?template=ICS%2FICS213.txt\""));
        assert!(markup.contains("href=\"/api/forms/ICS/style.css\""));
        assert!(markup.contains("N0CALL"));

        let text_only = manager.interactive_form("General/Greeting.txt", None).await.unwrap();
        assert_eq!(text_only, InteractiveForm::TextOnly);
    }

    #[tokio::test]
    async fn test_render_reply_from_mailbox() {
        let (dir, manager, _) = fixture();
        let mut meta = FormMetadata::default();
        meta.form_parameters.insert("reply_template".into(), "ICS213_reply".into());
        meta.variables.insert("subjectline".into(), "Need water".into());
        let prior = StoredMessage {
            id: "ABC123".into(),
            from: "W1AW".into(),
            to: vec!["N0CALL".into()],
            cc: vec![],
            subject: "Need water".into(),
            date: fixed_now(),
            body: String::new(),
            attachments: vec![Attachment::new("RMS_Express_Form_ICS213_Viewer.xml", meta.to_xml())],
        };
        let mailbox = dir.path().join("mailbox");
        fs::create_dir_all(&mailbox).unwrap();
        fs::write(mailbox.join("ABC123.json"), serde_json::to_string(&prior).unwrap()).unwrap();
        let manager = manager.with_messages(Arc::new(JsonMessageStore::new(&mailbox)));

        let markup = manager.render_reply("ABC123").await.unwrap();
        assert_eq!(
            markup,
            "<form action=\"/api/form?in-reply-to=ABC123&template=ICS%2FICS213_reply.0\">W1AW Need water</form>"
        );

        let err = manager.render_reply("missing").await.unwrap_err();
        assert!(matches!(err, FormsError::MessageNotFound(_)));
    }

    #[tokio::test]
    async fn test_render_form_for_display() {
        let (_dir, manager, _) = fixture();
        let mut meta = FormMetadata::default();
        meta.form_parameters.insert("display_form".into(), "ICS213_Viewer".into());
        meta.variables.insert("subjectline".into(), "Need water".into());
        meta.variables.insert("message".into(), "Two pallets".into());
        let html = manager.render_form(meta.to_xml().as_bytes(), None).await.unwrap();
        assert_eq!(html, "<p>Need water: Two pallets</p>");
    }

    #[tokio::test]
    async fn test_render_form_keeps_received_markup_as_text() {
        let (_dir, manager, _) = fixture();
        let xml = "<RMS_Express_Form><form_parameters><display_form>ICS213_Viewer</display_form></form_parameters>\
            <variables><subjectline>a &amp; b</subjectline><message>&lt;script&gt;alert(1)&lt;/script&gt;</message></variables>\
            </RMS_Express_Form>";
        let html = manager.render_form(xml.as_bytes(), None).await.unwrap();
        assert_eq!(html, "<p>a &amp; b: &lt;script&gt;alert(1)&lt;/script&gt;</p>");
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_new_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("fresh/forms");
        let manager = FormsManager::new(FormsConfig::new(&root)).with_sequence(Arc::new(MemorySequence::default()));
        assert!(root.is_dir());
        let catalog = manager.catalog().unwrap();
        assert_eq!(catalog.form_count, 0);
        assert_eq!(catalog.version, "unknown");
    }

    #[tokio::test]
    async fn test_compose_template() {
        let (_dir, manager, sequence) = fixture();
        let msg = manager
            .compose_template("ICS/ICS213.txt", "Status", None, HashMap::from([("message".into(), "All good".into())]))
            .await
            .unwrap();
        assert_eq!(msg.subject, "Status");
        assert_eq!(msg.body, "All good");
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(sequence.current().unwrap(), 8);
        assert!(manager.composed("anything").is_err());
    }

    #[test]
    fn test_asset_path_is_sandboxed() {
        let (_dir, manager, _) = fixture();
        assert!(manager.asset_path("/api/forms/ICS/style.css").unwrap().ends_with("ICS/style.css"));
        assert!(manager.asset_path("ICS/style.css").is_ok());
        let err = manager.asset_path("/api/forms/../../secret").unwrap_err();
        assert!(matches!(err, FormsError::PathEscape(_)));
        assert_eq!(manager.asset_path("ICS/missing.css").unwrap_err().status().code(), 404);
    }

    #[test]
    fn test_set_sequence() {
        let (_dir, manager, sequence) = fixture();
        assert_eq!(manager.set_sequence(42).unwrap(), 42);
        assert_eq!(sequence.current().unwrap(), 42);
    }

    struct FakeUpdates {
        latest: &'static str,
        installed: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl UpdateService for FakeUpdates {
        async fn fetch_latest(&self, _cancel: &CancellationToken) -> FormsResult<ReleaseInfo> {
            Ok(ReleaseInfo {
                version: self.latest.to_string(),
                archive_url: "http://example.invalid/forms.zip".into(),
            })
        }

        async fn install(&self, _archive_url: &str, root: &Path, _cancel: &CancellationToken) -> FormsResult<()> {
            self.installed.lock().push(root.to_path_buf());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_update_templates() {
        let (_dir, manager, _) = fixture();
        let fake = Arc::new(FakeUpdates {
            latest: "1.1.6.0",
            installed: Mutex::new(vec![]),
        });
        let manager = manager.with_updates(fake.clone());
        let response = manager.update_templates(&CancellationToken::new()).await.unwrap();
        assert_eq!(response.action, UpdateAction::None);
        assert!(fake.installed.lock().is_empty());

        let (_dir, manager, _) = fixture();
        let fake = Arc::new(FakeUpdates {
            latest: "1.1.7.0",
            installed: Mutex::new(vec![]),
        });
        let manager = manager.with_updates(fake.clone());
        let response = manager.update_templates(&CancellationToken::new()).await.unwrap();
        assert_eq!(response.action, UpdateAction::Update);
        assert_eq!(response.newest_version, "1.1.7.0");
        assert_eq!(fake.installed.lock().as_slice(), [manager.sandbox().root().to_path_buf()]);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({"newestVersion": "1.1.7.0", "action": "update"})
        );
    }
}
