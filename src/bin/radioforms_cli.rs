//! Radioforms CLI - Bridge interface for the mail client
//!
//! Commands: catalog, preview, form, compose, submit, render, update, seq-set
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when a request fails

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use radioforms_core::{
    logging::{self, LogConfig, LogFormat, LogLevel},
    FormsConfig, FormsError, FormsManager, FormsResult, HttpUpdateService, JsonMessageStore, Submission,
};

#[derive(Parser)]
#[command(name = "radioforms-cli")]
#[command(about = "Radioforms CLI - Form Composition Engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Template root, when no configuration file is given
    #[arg(short, long, default_value = "forms")]
    forms_dir: PathBuf,

    /// Directory of prior messages as <id>.json
    #[arg(short, long)]
    mailbox: Option<PathBuf>,

    #[arg(long, default_value = "warn")]
    log_level: String,

    /// pretty, compact or json
    #[arg(long, default_value = "compact")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List the template tree
    Catalog,

    /// Template text with system tags filled, for the text editor
    Preview {
        #[arg(short, long)]
        template: String,
        #[arg(long)]
        in_reply_to: Option<String>,
    },

    /// A template's interactive form, filled
    Form {
        #[arg(short, long)]
        template: String,
        #[arg(long)]
        in_reply_to: Option<String>,
    },

    /// Compose a message directly from a template
    Compose {
        #[arg(short, long)]
        template: String,
        #[arg(short, long, default_value = "")]
        subject: String,
        #[arg(long)]
        in_reply_to: Option<String>,
        /// JSON object of variable answers
        #[arg(short, long, default_value = "{}")]
        responses: String,
    },

    /// Submit editor answers under a session token and read the result back
    Submit {
        #[arg(short, long)]
        template: String,
        /// Session token; a fresh one is generated when omitted
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        in_reply_to: Option<String>,
        /// JSON body as posted by the text editor: {"responses": {...}}
        #[arg(short, long, default_value = r#"{"responses":{}}"#)]
        payload: String,
    },

    /// Render a received form: its reply form with --in-reply-to, its viewer otherwise
    Render {
        /// Form XML attachment; read from the prior message when omitted
        #[arg(short, long)]
        attachment: Option<PathBuf>,
        #[arg(long)]
        in_reply_to: Option<String>,
    },

    /// Install the latest template package if it is newer
    Update,

    /// Set the message sequence counter
    SeqSet { value: i64 },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log = LogConfig {
        level: LogLevel::parse(&cli.log_level).unwrap_or_default(),
        format: LogFormat::parse(&cli.log_format).unwrap_or_default(),
        source_location: false,
    };
    if let Err(e) = logging::init(log) {
        eprintln!("{e}");
    }

    let manager = match build_manager(&cli) {
        Ok(m) => m,
        Err(e) => return fail(&e),
    };

    match run(&manager, cli.command).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => fail(&e.into()),
        },
        Err(e) => fail(&e),
    }
}

fn build_manager(cli: &Cli) -> FormsResult<FormsManager> {
    let config = match &cli.config {
        Some(path) => FormsConfig::load(path)?,
        None => FormsConfig::new(&cli.forms_dir),
    };
    let updates = HttpUpdateService::new(&config)?;
    let mut manager = FormsManager::new(config).with_updates(Arc::new(updates));
    if let Some(mailbox) = &cli.mailbox {
        manager = manager.with_messages(Arc::new(JsonMessageStore::new(mailbox)));
    }
    Ok(manager)
}

async fn run(manager: &FormsManager, command: Commands) -> FormsResult<serde_json::Value> {
    let value = match command {
        Commands::Catalog => serde_json::to_value(manager.catalog()?)?,

        Commands::Preview { template, in_reply_to } => {
            serde_json::Value::String(manager.template_preview(&template, in_reply_to.as_deref()).await?)
        }

        Commands::Form { template, in_reply_to } => {
            serde_json::to_value(manager.interactive_form(&template, in_reply_to.as_deref()).await?)?
        }

        Commands::Compose {
            template,
            subject,
            in_reply_to,
            responses,
        } => {
            let responses: HashMap<String, String> = serde_json::from_str(&responses)?;
            let message = manager
                .compose_template(&template, &subject, in_reply_to.as_deref(), responses)
                .await?;
            serde_json::to_value(message)?
        }

        Commands::Submit {
            template,
            token,
            in_reply_to,
            payload,
        } => {
            let token = token.unwrap_or_else(|| Uuid::new_v4().to_string());
            let submission = Submission::decode("application/json", payload.as_bytes())?;
            manager
                .submit(&token, &template, in_reply_to.as_deref(), submission)
                .await?;
            serde_json::json!({
                "token": token,
                "message": manager.composed(&token)?,
            })
        }

        Commands::Render { attachment, in_reply_to } => {
            let markup = match (attachment, in_reply_to) {
                (Some(path), in_reply_to) => {
                    let data = std::fs::read(path)?;
                    manager.render_form(&data, in_reply_to.as_deref()).await?
                }
                (None, Some(id)) => manager.render_reply(&id).await?,
                (None, None) => return Err(FormsError::MissingTemplateRef),
            };
            serde_json::Value::String(markup)
        }

        Commands::Update => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, cancelling update");
                    on_interrupt.cancel();
                }
            });
            serde_json::to_value(manager.update_templates(&cancel).await?)?
        }

        Commands::SeqSet { value } => serde_json::json!({ "sequence": manager.set_sequence(value)? }),
    };
    Ok(value)
}

fn fail(e: &FormsError) -> ExitCode {
    let output = serde_json::json!({
        "success": false,
        "status": e.status().code(),
        "error": e.to_string(),
    });
    println!("{output}");
    ExitCode::from(2)
}
