//! Tag Substitution - system insertion tags, then user variables
//!
//! Both passes are plain substring scans for `open NAME close` spans. The
//! surrounding markup is never parsed: templates may be free text or HTML.
//! Unknown names are left exactly as written.

use chrono::{DateTime, Local, Utc};
use std::collections::HashMap;

use crate::location::Position;
use crate::message::StoredMessage;

/// Some Canada BC forms hardcode this as their submit target.
pub const LEGACY_FORM_SERVER: &str = "http://localhost:8001";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters<'a> {
    pub open: &'a str,
    pub close: &'a str,
}

impl<'a> Delimiters<'a> {
    /// Used for the text editor preview.
    pub const PREVIEW: Delimiters<'static> = Delimiters { open: "<", close: ">" };
    /// Used for composed messages and interactive forms.
    pub const FINAL: Delimiters<'static> = Delimiters { open: "{", close: "}" };

    pub fn new(open: &'a str, close: &'a str) -> Self {
        Self { open, close }
    }

    fn wrap(&self, name: &str) -> String {
        format!("{}{}{}", self.open, name, self.close)
    }
}

/// Everything the system pass may draw values from.
#[derive(Debug, Clone)]
pub struct TagContext<'a> {
    pub submit_url: Option<&'a str>,
    pub reply: Option<&'a StoredMessage>,
    pub position: Option<Position>,
    /// Already formatted sequence number.
    pub sequence: Option<String>,
    pub my_call: &'a str,
    pub locator: &'a str,
    pub program_version: &'a str,
    pub template_version: &'a str,
    pub form_folder: Option<&'a str>,
    pub now: DateTime<Utc>,
}

impl<'a> TagContext<'a> {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            submit_url: None,
            reply: None,
            position: None,
            sequence: None,
            my_call: "",
            locator: "",
            program_version: "",
            template_version: "",
            form_folder: None,
            now,
        }
    }

    fn resolve(&self, name: &str) -> Option<String> {
        let local = self.now.with_timezone(&Local);
        let reply = self.reply;
        let pos = self.position;
        let value = match name.to_ascii_lowercase().as_str() {
            "msgsender" | "callsign" => self.my_call.to_string(),
            "gridsquare" => self.locator.to_string(),
            "programversion" => self.program_version.to_string(),
            "templateversion" => self.template_version.to_string(),
            "formfolder" => self.form_folder.unwrap_or_default().to_string(),

            "date" => local.format("%Y-%m-%d").to_string(),
            "udate" => self.now.format("%Y-%m-%dZ").to_string(),
            "time" => local.format("%H:%M:%S").to_string(),
            "utime" => self.now.format("%H:%M:%SZ").to_string(),
            "datetime" => local.format("%Y-%m-%d %H:%M:%S").to_string(),
            "udatetime" => self.now.format("%Y-%m-%d %H:%M:%SZ").to_string(),
            "udtg" | "dtg" => self.now.format("%d%H%MZ %b %Y").to_string().to_uppercase(),

            "msgisreply" => (if reply.is_some() { "True" } else { "False" }).to_string(),
            "msgoriginalsubject" => reply.map(|m| m.subject.clone()).unwrap_or_default(),
            "msgoriginalsender" => reply.map(|m| m.from.clone()).unwrap_or_default(),
            "msgoriginalbody" => reply.map(|m| m.body.clone()).unwrap_or_default(),
            "msgoriginalid" => reply.map(|m| m.id.clone()).unwrap_or_default(),
            "msgoriginalto" => reply.map(|m| m.to.join("; ")).unwrap_or_default(),
            "msgoriginalcc" => reply.map(|m| m.cc.join("; ")).unwrap_or_default(),
            "msgoriginaldate" => reply
                .map(|m| m.date.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            "msgoriginalutcdate" => reply
                .map(|m| m.date.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            "msgoriginalutctime" => reply
                .map(|m| m.date.format("%H:%M:%S").to_string())
                .unwrap_or_default(),

            "gps" => pos.map(|p| p.degrees_minutes()).unwrap_or_default(),
            "gps_decimal" => pos.map(|p| p.decimal()).unwrap_or_default(),
            "gps_signed_decimal" => pos.map(|p| p.signed_decimal()).unwrap_or_default(),
            "latitude" => pos.map(|p| format!("{:.4}", p.lat)).unwrap_or_default(),
            "longitude" => pos.map(|p| format!("{:.4}", p.lon)).unwrap_or_default(),

            "seqnum" => self.sequence.clone().unwrap_or_default(),
            _ => return None,
        };
        Some(value)
    }
}

const LOCATION_TAGS: [&str; 5] = ["gps", "gps_decimal", "gps_signed_decimal", "latitude", "longitude"];

/// True if `content` contains a location tag, so the caller knows whether a
/// (slow) position lookup is worth doing.
pub fn mentions_location(content: &str, delims: &Delimiters<'_>) -> bool {
    let mut found = false;
    replace_tags(content, delims, |name| {
        found |= LOCATION_TAGS.contains(&name.to_ascii_lowercase().as_str());
        None
    });
    found
}

/// First pass: system insertion tags.
pub fn fill_system_tags(content: &str, ctx: &TagContext<'_>, delims: &Delimiters<'_>) -> String {
    let mut content = content.to_string();
    if let Some(url) = ctx.submit_url {
        let placeholder = format!("http://{}:{}", delims.wrap("FormServer"), delims.wrap("FormPort"));
        content = content.replace(&placeholder, url);
        content = content.replace(LEGACY_FORM_SERVER, url);
    }
    replace_tags(&content, delims, |name| ctx.resolve(name))
}

/// Second pass: user variables, matched case-insensitively.
pub fn fill_variables<K, V>(content: &str, vars: impl IntoIterator<Item = (K, V)>, delims: &Delimiters<'_>) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let vars: HashMap<String, V> = vars
        .into_iter()
        .map(|(k, v)| (k.as_ref().trim().to_lowercase(), v))
        .collect();
    if vars.is_empty() {
        return content.to_string();
    }
    replace_tags(content, delims, |name| {
        vars.get(&name.to_lowercase()).map(|v| v.as_ref().to_string())
    })
}

/// Both passes, in order.
pub fn fill<K, V>(
    content: &str,
    ctx: &TagContext<'_>,
    vars: impl IntoIterator<Item = (K, V)>,
    delims: &Delimiters<'_>,
) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let content = fill_system_tags(content, ctx, delims);
    fill_variables(&content, vars, delims)
}

/// Replace every delimited name for which `resolve` returns a value.
///
/// Substituted values are never rescanned within the same pass.
pub fn replace_tags(
    content: &str,
    delims: &Delimiters<'_>,
    mut resolve: impl FnMut(&str) -> Option<String>,
) -> String {
    if delims.open.is_empty() || delims.close.is_empty() {
        return content.to_string();
    }
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find(delims.open) {
        let inner_start = start + delims.open.len();
        let Some(len) = rest[inner_start..].find(delims.close) else { break };
        let name = &rest[inner_start..inner_start + len];

        // A later opener before the closer: the first one was literal text.
        if let Some(nested) = name.rfind(delims.open) {
            let literal = inner_start + nested;
            out.push_str(&rest[..literal]);
            rest = &rest[literal..];
            continue;
        }

        let span_end = inner_start + len + delims.close.len();
        out.push_str(&rest[..start]);
        match is_tag_name(name).then(|| resolve(name)).flatten() {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..span_end]),
        }
        rest = &rest[span_end..];
    }

    out.push_str(rest);
    out
}

fn is_tag_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}
