//! Repository abstraction for users, invitation codes, invitations and
//! sessions.
//!
//! The [`BetaRepository`] trait is the only persistence seam in the crate.
//! Two implementations are provided:
//!
//! - [`MemoryRepository`]: in-memory, for tests and development
//! - [`PostgresRepository`]: `PostgreSQL` via `sqlx` (feature `postgres`)

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryRepository;
#[cfg(feature = "postgres")]
pub use postgres::PostgresRepository;

use crate::error::RepositoryError;
use crate::models::{Invitation, InvitationCode, Session, User};

/// Persistence operations needed by the gate, the invitation lifecycle and
/// the server.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait BetaRepository: Send + Sync + 'static {
    // ── Users ────────────────────────────────────────────────────────

    /// Insert a user.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Conflict`] if the username or email is taken.
    async fn create_user(&self, user: &User) -> Result<User, RepositoryError>;

    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if no such user exists.
    async fn get_user(&self, id: Uuid) -> Result<User, RepositoryError>;

    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on backend failure.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on backend failure.
    async fn find_user_by_username(&self, username: &str)
    -> Result<Option<User>, RepositoryError>;

    // ── Invitation codes ─────────────────────────────────────────────

    /// Insert an invitation code.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Conflict`] if the code string is taken.
    async fn create_code(&self, code: &InvitationCode) -> Result<InvitationCode, RepositoryError>;

    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if no such code exists.
    async fn get_code(&self, id: Uuid) -> Result<InvitationCode, RepositoryError>;

    /// Look up a code by its string.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on backend failure.
    async fn find_code(&self, code: &str) -> Result<Option<InvitationCode>, RepositoryError>;

    /// The oldest code owned by `owner_id` that still has invites left.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on backend failure.
    async fn find_owned_code_with_invites(
        &self,
        owner_id: Uuid,
    ) -> Result<Option<InvitationCode>, RepositoryError>;

    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on backend failure.
    async fn list_codes(&self) -> Result<Vec<InvitationCode>, RepositoryError>;

    /// Number of invitations on the code that have been claimed by a user.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on backend failure.
    async fn count_claimed(&self, code_id: Uuid) -> Result<i64, RepositoryError>;

    // ── Invitations ──────────────────────────────────────────────────

    /// Insert an invitation.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Conflict`] if the user already holds an
    /// invitation on the same code.
    async fn create_invitation(&self, invitation: &Invitation)
    -> Result<Invitation, RepositoryError>;

    /// Overwrite an existing invitation.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the invitation does not exist.
    async fn update_invitation(&self, invitation: &Invitation)
    -> Result<Invitation, RepositoryError>;

    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if no such invitation exists.
    async fn get_invitation(&self, id: Uuid) -> Result<Invitation, RepositoryError>;

    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on backend failure.
    async fn list_invitations(&self) -> Result<Vec<Invitation>, RepositoryError>;

    /// All invitations attached to a user, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on backend failure.
    async fn invitations_for_user(&self, user_id: Uuid)
    -> Result<Vec<Invitation>, RepositoryError>;

    /// The invitation on `code_id` addressed to `email`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on backend failure.
    async fn find_invitation(
        &self,
        code_id: Uuid,
        email: &str,
    ) -> Result<Option<Invitation>, RepositoryError>;

    /// Attach `user_id` to the invitation, stamp `used` and `invited` with
    /// `at`, and take one invite off its code, in a single unit.
    ///
    /// The remaining count is checked in the same unit, so concurrent
    /// redemptions cannot overdraw a code.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the invitation or its code is
    /// gone, [`RepositoryError::Exhausted`] if the code has no invites left,
    /// or [`RepositoryError::Conflict`] if the user already holds an
    /// invitation on the same code.
    async fn accept_invitation(
        &self,
        invitation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Invitation, RepositoryError>;

    // ── Sessions ─────────────────────────────────────────────────────

    /// Load a session that has not expired.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on backend failure.
    async fn load_session(&self, id: &str) -> Result<Option<Session>, RepositoryError>;

    /// Insert or overwrite a session.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on backend failure.
    async fn save_session(&self, session: &Session) -> Result<(), RepositoryError>;

    /// Delete a session. Deleting a missing session is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on backend failure.
    async fn delete_session(&self, id: &str) -> Result<(), RepositoryError>;

    /// Delete every session that expired before `now`, returning how many.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] on backend failure.
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}
