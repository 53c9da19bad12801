//! Error types for `privbeta-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Mail errors never include SMTP credentials, only the host or
//! the failing step.

/// Errors from a repository backend.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// The requested record does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A uniqueness constraint was violated.
    #[error("{entity} already exists: {reason}")]
    Conflict { entity: &'static str, reason: String },

    /// The invitation code has no invites left.
    #[error("invitation code {code} has no invites left")]
    Exhausted { code: String },

    /// The backend itself failed (connection, query, migration).
    #[error("repository backend error: {reason}")]
    Backend { reason: String },
}

impl RepositoryError {
    pub(crate) fn not_found(entity: &'static str, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

/// Errors from sending an invite email.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// An email template could not be read from disk.
    #[error("failed to load template '{name}': {reason}")]
    Template { name: String, reason: String },

    /// A sender or recipient address did not parse.
    #[error("invalid address '{address}': {reason}")]
    Address { address: String, reason: String },

    /// The message could not be assembled.
    #[error("failed to build message: {reason}")]
    Build { reason: String },

    /// The transport rejected or failed to deliver the message.
    #[error("transport error: {reason}")]
    Transport { reason: String },
}

/// Errors from the invitation lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum InvitationError {
    /// Accepting an invitation whose email does not belong to the user.
    #[error("invitation email '{invitation}' does not match user email '{user}'")]
    EmailMismatch { invitation: String, user: String },

    /// Accepting an invitation that carries no code.
    #[error("invitation {id} has no invitation code")]
    MissingCode { id: uuid::Uuid },

    /// The user owns no invitation code with invites remaining.
    #[error("no invitation code with remaining invites for user {user_id}")]
    NoCodeAvailable { user_id: uuid::Uuid },

    /// Client supplied an invalid value.
    #[error("invalid invitation request: {reason}")]
    Invalid { reason: String },

    /// The repository failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The invite email could not be sent.
    #[error("failed to send invite email: {0}")]
    Mail(#[from] MailError),
}

/// Errors from the per-request gate.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The repository failed while evaluating the request.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Accepting a cookie invitation failed.
    #[error(transparent)]
    Invitation(#[from] InvitationError),
}

/// Errors from password hashing and verification.
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    /// Hashing failed.
    #[error("password hashing failed: {reason}")]
    Hash { reason: String },

    /// The stored hash is not a valid PHC string.
    #[error("stored password hash is malformed: {reason}")]
    MalformedHash { reason: String },
}
