//! Invitation lifecycle.
//!
//! [`InvitationService`] owns the bookkeeping around invitations: saving
//! them (and sending the invite email when one becomes pending), redeeming
//! a code carried in a cookie, user-to-user invites from an owned code, and
//! the staff actions that grant access.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{InvitationError, RepositoryError};
use crate::mail::{Delivery, InviteMailer};
use crate::models::{Invitation, InvitationCode, MAX_CODE_LEN, User};
use crate::repository::BetaRepository;

/// Result of resolving the invitation code cookie against a user's email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieInvite {
    /// No cookie was sent.
    NoCookie,
    /// The cookie names an unknown or exhausted code, or the code has no
    /// invitation for this email. The cookie should be dropped.
    Stale,
    /// An invitation on the cookie's code addressed to this email.
    Found(Invitation),
}

/// Whether a user already holds access, for the waitlist page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    Denied,
    /// Denied, and the code cookie no longer resolves. The cookie should be
    /// dropped.
    DeniedStaleCookie,
}

impl Access {
    #[must_use]
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// An invitation after saving, with the outcome of the invite email if one
/// was attempted.
#[derive(Debug, Clone)]
pub struct SavedInvitation {
    pub invitation: Invitation,
    pub delivery: Option<Delivery>,
}

/// Parameters for a new invitation code.
#[derive(Debug, Clone, Default)]
pub struct NewCode {
    /// Empty to generate one.
    pub code: String,
    pub private: bool,
    pub max_invites: u16,
    pub owner_id: Option<Uuid>,
}

/// An invitation code with its claimed count resolved.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CodeSummary {
    #[serde(flatten)]
    pub code: InvitationCode,
    pub remaining_invites: i64,
}

/// Invitation bookkeeping over a repository and a mailer.
#[derive(Clone)]
pub struct InvitationService {
    repo: Arc<dyn BetaRepository>,
    mailer: InviteMailer,
}

impl std::fmt::Debug for InvitationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvitationService")
            .field("mailer", &self.mailer)
            .finish_non_exhaustive()
    }
}

impl InvitationService {
    #[must_use]
    pub fn new(repo: Arc<dyn BetaRepository>, mailer: InviteMailer) -> Self {
        Self { repo, mailer }
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<dyn BetaRepository> {
        &self.repo
    }

    #[must_use]
    pub fn mailer(&self) -> &InviteMailer {
        &self.mailer
    }

    /// Create or update an invitation.
    ///
    /// When `notify` is set and the invitation is invited but not used, the
    /// invite email goes out before the row is written; a failed send leaves
    /// the row untouched.
    ///
    /// # Errors
    ///
    /// Returns [`InvitationError::Mail`] if the email fails, or
    /// [`InvitationError::Repository`] if persisting fails.
    pub async fn save_invitation(
        &self,
        invitation: Invitation,
        notify: bool,
    ) -> Result<SavedInvitation, InvitationError> {
        let delivery = if notify && invitation.is_pending() {
            Some(self.notify(&invitation).await?)
        } else {
            None
        };

        let invitation = match self.repo.get_invitation(invitation.id).await {
            Ok(_) => self.repo.update_invitation(&invitation).await?,
            Err(RepositoryError::NotFound { .. }) => {
                self.repo.create_invitation(&invitation).await?
            }
            Err(e) => return Err(e.into()),
        };

        Ok(SavedInvitation {
            invitation,
            delivery,
        })
    }

    async fn notify(&self, invitation: &Invitation) -> Result<Delivery, InvitationError> {
        let code = match invitation.code_id {
            Some(id) => Some(self.repo.get_code(id).await?),
            None => None,
        };
        let user = match invitation.user_id {
            Some(id) => Some(self.repo.get_user(id).await?),
            None => None,
        };

        Ok(self
            .mailer
            .send_invitation(invitation, code.as_ref(), user.as_ref())
            .await?)
    }

    /// Resolve the cookie code against `email`.
    ///
    /// Only codes with invites remaining are considered.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if a lookup fails.
    pub async fn invite_from_cookie_and_email(
        &self,
        cookie_code: Option<&str>,
        email: &str,
    ) -> Result<CookieInvite, RepositoryError> {
        let Some(cookie_code) = cookie_code.filter(|c| !c.is_empty()) else {
            return Ok(CookieInvite::NoCookie);
        };

        let Some(code) = self
            .repo
            .find_code(cookie_code)
            .await?
            .filter(InvitationCode::has_invites)
        else {
            tracing::debug!(code = %cookie_code, "cookie code unknown or exhausted");
            return Ok(CookieInvite::Stale);
        };

        match self.repo.find_invitation(code.id, email).await? {
            Some(invitation) => Ok(CookieInvite::Found(invitation)),
            None => {
                tracing::debug!(code = %cookie_code, "cookie code has no invitation for this email");
                Ok(CookieInvite::Stale)
            }
        }
    }

    /// Attach `user` to an email-only invitation and mark it used.
    ///
    /// Also takes one invite off the invitation's code.
    ///
    /// # Errors
    ///
    /// Returns [`InvitationError::EmailMismatch`] if the invitation is for a
    /// different address, [`InvitationError::MissingCode`] if it has no code,
    /// or [`InvitationError::Repository`] if the update fails.
    pub async fn accept_invite(
        &self,
        invitation: &Invitation,
        user: &User,
    ) -> Result<Invitation, InvitationError> {
        if user.email != invitation.email {
            return Err(InvitationError::EmailMismatch {
                invitation: invitation.email.clone(),
                user: user.email.clone(),
            });
        }
        if invitation.code_id.is_none() {
            return Err(InvitationError::MissingCode { id: invitation.id });
        }

        let accepted = self
            .repo
            .accept_invitation(invitation.id, user.id, Utc::now())
            .await?;

        tracing::info!(
            invitation_id = %accepted.id,
            user_id = %user.id,
            code_id = ?accepted.code_id,
            "invitation code redeemed"
        );
        Ok(accepted)
    }

    /// Invite `email` with the first code `owner` holds that has invites left.
    ///
    /// # Errors
    ///
    /// Returns [`InvitationError::Invalid`] for a malformed email,
    /// [`InvitationError::NoCodeAvailable`] if the owner has no usable code,
    /// or a mail/repository error.
    pub async fn invite_by_owner(
        &self,
        owner: &User,
        email: &str,
    ) -> Result<SavedInvitation, InvitationError> {
        validate_email(email)?;

        let code = self
            .repo
            .find_owned_code_with_invites(owner.id)
            .await?
            .ok_or(InvitationError::NoCodeAvailable { user_id: owner.id })?;

        let invitation = Invitation::for_email(&code, email).invited_at(Utc::now());
        let saved = self.save_invitation(invitation, true).await?;

        tracing::info!(owner_id = %owner.id, code = %code, "user sent an invitation");
        Ok(saved)
    }

    /// Grant access on an existing invitation and send the invite email.
    ///
    /// # Errors
    ///
    /// Returns [`InvitationError::Invalid`] if the invitation was already
    /// used, or a mail/repository error.
    pub async fn send_invitation(&self, id: Uuid) -> Result<SavedInvitation, InvitationError> {
        let mut invitation = self.repo.get_invitation(id).await?;
        if invitation.is_used() {
            return Err(InvitationError::Invalid {
                reason: format!("invitation {id} has already been used"),
            });
        }
        if invitation.invited.is_none() {
            invitation.invited = Some(Utc::now());
        }
        self.save_invitation(invitation, true).await
    }

    /// Email a code to an address without creating an invitation.
    ///
    /// # Errors
    ///
    /// Returns [`InvitationError::Repository`] with `NotFound` if the code
    /// does not exist, or a mail error.
    pub async fn send_code(&self, code: &str, email: &str) -> Result<Delivery, InvitationError> {
        validate_email(email)?;
        let code = self
            .repo
            .find_code(code)
            .await?
            .ok_or_else(|| RepositoryError::not_found("invitation code", code))?;

        Ok(self.mailer.send_code(&code, email).await?)
    }

    /// Whether the user already holds access: an invitation used or
    /// invited, or a cookie code that resolves to their email.
    ///
    /// # Errors
    ///
    /// Returns [`InvitationError::Repository`] if a lookup fails.
    pub async fn has_access(
        &self,
        user: &User,
        cookie_code: Option<&str>,
    ) -> Result<Access, InvitationError> {
        let invitations = self.repo.invitations_for_user(user.id).await?;
        if invitations
            .iter()
            .any(|i| i.used.is_some() || i.invited.is_some())
        {
            return Ok(Access::Granted);
        }

        let cookie = self
            .invite_from_cookie_and_email(cookie_code, &user.email)
            .await?;
        Ok(match cookie {
            CookieInvite::Found(_) => Access::Granted,
            CookieInvite::NoCookie => Access::Denied,
            CookieInvite::Stale => Access::DeniedStaleCookie,
        })
    }

    /// Create an invitation code.
    ///
    /// # Errors
    ///
    /// Returns [`InvitationError::Invalid`] if the code is too long, or
    /// [`InvitationError::Repository`] with `Conflict` if it is taken.
    pub async fn create_code(&self, new: NewCode) -> Result<InvitationCode, InvitationError> {
        if new.code.len() > MAX_CODE_LEN {
            return Err(InvitationError::Invalid {
                reason: format!("code must be at most {MAX_CODE_LEN} characters"),
            });
        }

        let mut code = InvitationCode::new(&new.code).with_invites(new.max_invites);
        code.private = new.private;
        code.owner_id = new.owner_id;

        let code = self.repo.create_code(&code).await?;
        tracing::info!(code = %code, max_invites = code.max_invites, "invitation code created");
        Ok(code)
    }

    /// All codes with their remaining invites.
    ///
    /// # Errors
    ///
    /// Returns [`InvitationError::Repository`] if a lookup fails.
    pub async fn code_summaries(&self) -> Result<Vec<CodeSummary>, InvitationError> {
        let codes = self.repo.list_codes().await?;
        let mut out = Vec::with_capacity(codes.len());
        for code in codes {
            let claimed = self.repo.count_claimed(code.id).await?;
            out.push(CodeSummary {
                remaining_invites: code.remaining_invites(claimed),
                code,
            });
        }
        Ok(out)
    }
}

fn validate_email(email: &str) -> Result<(), InvitationError> {
    if email.is_empty() || !email.contains('@') {
        return Err(InvitationError::Invalid {
            reason: "invalid email".to_owned(),
        });
    }
    Ok(())
}
