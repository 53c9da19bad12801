//! Invite email templates.
//!
//! Three templates make up an invite: a one-line subject, a plain-text body
//! and an HTML body. They are read from a directory when one is configured
//! and fall back to the built-in text otherwise. Placeholders are written
//! `{{ name }}`; unknown names render as the empty string.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::MailError;

pub const SUBJECT_TEMPLATE: &str = "invite_email_subject.txt";
pub const TEXT_TEMPLATE: &str = "invite_email.txt";
pub const HTML_TEMPLATE: &str = "invite_email.html";

const DEFAULT_SUBJECT: &str = "You're invited to the private beta";

const DEFAULT_TEXT: &str = "\
Hello,

You have been invited to join the private beta.

Follow this link to get started:
{{ invite_url }}
";

const DEFAULT_HTML: &str = "\
<html>
  <body>
    <p>Hello,</p>
    <p>You have been invited to join the private beta.</p>
    <p><a href=\"{{ invite_url }}\">Accept your invitation</a></p>
  </body>
</html>
";

/// Values substituted into a template.
pub type Context = BTreeMap<String, String>;

/// A rendered invite email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// The subject, text and HTML templates of an invite email.
#[derive(Debug, Clone)]
pub struct EmailTemplates {
    subject: String,
    text: String,
    html: String,
}

impl Default for EmailTemplates {
    fn default() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_owned(),
            text: DEFAULT_TEXT.to_owned(),
            html: DEFAULT_HTML.to_owned(),
        }
    }
}

impl EmailTemplates {
    /// Load the three templates from `dir`.
    ///
    /// A missing file falls back to the built-in template of the same role.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Template`] if a file exists but cannot be read.
    pub fn load(dir: &Path) -> Result<Self, MailError> {
        let defaults = Self::default();
        Ok(Self {
            subject: read_or(dir, SUBJECT_TEMPLATE, defaults.subject)?,
            text: read_or(dir, TEXT_TEMPLATE, defaults.text)?,
            html: read_or(dir, HTML_TEMPLATE, defaults.html)?,
        })
    }

    /// Render all three templates. Only the HTML body is escaped.
    #[must_use]
    pub fn render(&self, ctx: &Context) -> RenderedEmail {
        // Subjects are a single header line.
        let subject = render(&self.subject, ctx, false)
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_owned();

        RenderedEmail {
            subject,
            text: render(&self.text, ctx, false),
            html: render(&self.html, ctx, true),
        }
    }
}

fn read_or(dir: &Path, name: &str, fallback: String) -> Result<String, MailError> {
    let path = dir.join(name);
    if !path.exists() {
        tracing::debug!(path = %path.display(), "template missing, using built-in");
        return Ok(fallback);
    }
    std::fs::read_to_string(&path).map_err(|e| MailError::Template {
        name: name.to_owned(),
        reason: e.to_string(),
    })
}

/// Substitute `{{ name }}` placeholders from `ctx`.
#[must_use]
pub fn render(template: &str, ctx: &Context, escape: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = after[..end].trim();
        let value = ctx.get(name).map_or("", String::as_str);
        if escape {
            out.push_str(&html_escape(value));
        } else {
            out.push_str(value);
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Escape HTML special characters.
#[must_use]
pub fn html_escape(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => output.push_str("&amp;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '"' => output.push_str("&quot;"),
            '\'' => output.push_str("&#x27;"),
            _ => output.push(c),
        }
    }
    output
}
