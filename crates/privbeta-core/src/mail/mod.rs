//! Invite email.
//!
//! [`InviteMailer`] decides who an invite goes to and which link it
//! carries, renders the templates and hands the result to an
//! [`EmailSender`]. There is no retry and no delivery guarantee: a failed
//! send is returned to the caller.

mod sender;
mod template;

use std::sync::Arc;

pub use sender::{EmailSender, LogEmailSender, SentEmail, SmtpEmailSender, SmtpSettings};
pub use template::{
    Context, EmailTemplates, HTML_TEMPLATE, RenderedEmail, SUBJECT_TEMPLATE, TEXT_TEMPLATE,
    html_escape, render,
};

use crate::error::MailError;
use crate::models::{Invitation, InvitationCode, User};

/// Path prefix of the link that redeems a code.
pub const VERIFY_PATH: &str = "/beta/verify/";

/// What happened to an invite email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Sent,
    /// No recipient address could be determined.
    SkippedNoEmail,
    /// Neither a code nor a user: an address alone is never let in.
    SkippedNoCode,
}

/// Renders and sends invite emails.
#[derive(Clone)]
pub struct InviteMailer {
    sender: Arc<dyn EmailSender>,
    templates: EmailTemplates,
    public_url: String,
}

impl std::fmt::Debug for InviteMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InviteMailer")
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

impl InviteMailer {
    /// Create a mailer. `public_url` is the absolute base URL of the site.
    #[must_use]
    pub fn new(sender: Arc<dyn EmailSender>, templates: EmailTemplates, public_url: &str) -> Self {
        Self {
            sender,
            templates,
            public_url: public_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Absolute link for an invite: the verify link when there is a code,
    /// the site root otherwise.
    #[must_use]
    pub fn invite_url(&self, code: Option<&str>) -> String {
        match code {
            Some(code) => format!(
                "{}{VERIFY_PATH}{}",
                self.public_url,
                urlencoding::encode(code)
            ),
            None => format!("{}/", self.public_url),
        }
    }

    /// Send the invite for an invitation.
    ///
    /// The recipient is the invitation's email, falling back to its user's.
    ///
    /// # Errors
    ///
    /// Returns [`MailError`] if delivery fails.
    pub async fn send_invitation(
        &self,
        invitation: &Invitation,
        code: Option<&InvitationCode>,
        user: Option<&User>,
    ) -> Result<Delivery, MailError> {
        tracing::info!(invitation = %invitation, "sending invitation");

        let email = if invitation.email.is_empty() {
            user.map(|u| u.email.as_str()).unwrap_or_default()
        } else {
            invitation.email.as_str()
        };

        if email.is_empty() {
            tracing::warn!(invitation_id = %invitation.id, "invitation has no email, not sending");
            return Ok(Delivery::SkippedNoEmail);
        }

        if code.is_none() && invitation.user_id.is_none() {
            tracing::warn!(
                invitation_id = %invitation.id,
                "invitation needs a code or a user, not sending"
            );
            return Ok(Delivery::SkippedNoCode);
        }

        self.deliver(email, code.map(|c| c.code.as_str())).await
    }

    /// Email a bare code to an address.
    ///
    /// # Errors
    ///
    /// Returns [`MailError`] if delivery fails.
    pub async fn send_code(&self, code: &InvitationCode, email: &str) -> Result<Delivery, MailError> {
        tracing::info!(code = %code, "sending invitation code");

        if email.is_empty() {
            tracing::warn!(code = %code, "code send requested without email");
            return Ok(Delivery::SkippedNoEmail);
        }

        self.deliver(email, Some(&code.code)).await
    }

    async fn deliver(&self, email: &str, code: Option<&str>) -> Result<Delivery, MailError> {
        let invite_url = self.invite_url(code);
        tracing::debug!(code = ?code, invite_url = %invite_url, "rendering invite");

        let mut ctx = Context::new();
        ctx.insert("invite_url".to_owned(), invite_url);
        ctx.insert("email".to_owned(), email.to_owned());
        ctx.insert("code".to_owned(), code.unwrap_or_default().to_owned());

        let rendered = self.templates.render(&ctx);
        self.sender.send(email, &rendered).await?;
        Ok(Delivery::Sent)
    }
}
