//! Domain models.
//!
//! Users, invitation codes, invitations and server-side sessions. All IDs
//! are UUIDs except session IDs, which are opaque random strings carried in
//! a cookie. Invite counts are `i32` to map directly onto `INTEGER` columns;
//! constructors keep them non-negative.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of a generated invitation code.
pub const GENERATED_CODE_LEN: usize = 16;

/// Maximum length of an invitation code.
pub const MAX_CODE_LEN: usize = 30;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

// ── Users ────────────────────────────────────────────────────────────

/// A site user.
///
/// The host application owns user accounts; the gate only needs identity,
/// email and the staff flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Build a new user record with a fresh ID.
    #[must_use]
    pub fn new(username: &str, email: &str, password_hash: String, is_staff: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            email: email.to_owned(),
            password_hash,
            is_staff,
            created_at: Utc::now(),
        }
    }
}

// ── Invitation codes ─────────────────────────────────────────────────

/// A shareable invitation code with a bounded number of uses.
///
/// Counts are `i32` to match the `INTEGER` columns; they are only ever set
/// from a `u16`, so they stay non-negative and in range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct InvitationCode {
    pub id: Uuid,
    pub code: String,
    pub private: bool,
    /// Maximum number of invitations this code may admit.
    pub max_invites: i32,
    /// Invitations remaining; decremented each time the code is redeemed.
    pub num_invites: i32,
    /// User allowed to hand this code out to others.
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl InvitationCode {
    /// Build a private single-use code.
    ///
    /// An empty `code` is replaced with a generated one.
    #[must_use]
    pub fn new(code: &str) -> Self {
        let code = if code.is_empty() {
            generate_invite_code()
        } else {
            code.to_owned()
        };

        Self {
            id: Uuid::new_v4(),
            code,
            private: true,
            max_invites: 1,
            num_invites: 1,
            owner_id: None,
            created_at: Utc::now(),
        }
    }

    /// Set both the maximum and the remaining number of invites.
    #[must_use]
    pub fn with_invites(mut self, invites: u16) -> Self {
        self.max_invites = i32::from(invites);
        self.num_invites = i32::from(invites);
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner_id: Uuid) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    #[must_use]
    pub fn public(mut self) -> Self {
        self.private = false;
        self
    }

    /// Whether the code can still be redeemed.
    #[must_use]
    pub fn has_invites(&self) -> bool {
        self.num_invites > 0
    }

    /// Number of invites left given how many users have claimed the code.
    #[must_use]
    pub fn remaining_invites(&self, claimed: i64) -> i64 {
        (i64::from(self.max_invites) - claimed).max(0)
    }
}

impl fmt::Display for InvitationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

/// Generate a random code of ASCII letters.
#[must_use]
pub fn generate_invite_code() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_CODE_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
        .collect()
}

// ── Invitations ──────────────────────────────────────────────────────

/// An invitation linking a user or an email address to a code.
///
/// `invited` is stamped when access is granted, `used` when the invitee
/// first passes the gate with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Invitation {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub email: String,
    pub code_id: Option<Uuid>,
    pub used: Option<DateTime<Utc>>,
    pub invited: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    /// A waitlist entry: the user asked for access, nobody granted it yet.
    #[must_use]
    pub fn request_for(user: &User) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: Some(user.id),
            email: user.email.clone(),
            code_id: None,
            used: None,
            invited: None,
            created_at: Utc::now(),
        }
    }

    /// An invitation for a bare email address, with no code or user yet.
    #[must_use]
    pub fn for_address(email: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            email: email.to_owned(),
            code_id: None,
            used: None,
            invited: None,
            created_at: Utc::now(),
        }
    }

    /// An invitation for an email address on a code, not yet granted.
    #[must_use]
    pub fn for_email(code: &InvitationCode, email: &str) -> Self {
        Self {
            code_id: Some(code.id),
            ..Self::for_address(email)
        }
    }

    /// Stamp `invited` with the given time.
    #[must_use]
    pub fn invited_at(mut self, at: DateTime<Utc>) -> Self {
        self.invited = Some(at);
        self
    }

    /// Invited but not yet used.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.invited.is_some() && self.used.is_none()
    }

    #[must_use]
    pub fn is_used(&self) -> bool {
        self.used.is_some()
    }
}

impl fmt::Display for Invitation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: Option<String>| v.unwrap_or_else(|| "-".to_owned());
        write!(
            f,
            "user:{} email:{} code:{} used:{} invited:{}",
            opt(self.user_id.map(|u| u.to_string())),
            self.email,
            opt(self.code_id.map(|c| c.to_string())),
            opt(self.used.map(|t| t.to_rfc3339())),
            opt(self.invited.map(|t| t.to_rfc3339())),
        )
    }
}

// ── Sessions ─────────────────────────────────────────────────────────

/// A server-side session.
///
/// `in_beta` caches a positive gate decision so later requests skip the
/// invitation queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Session {
    pub id: String,
    pub user_id: Option<Uuid>,
    pub in_beta: bool,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Create an anonymous session with a random ID.
    ///
    /// A `ttl` too large to represent never expires.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        Self {
            id: format!("{}{}", a.as_simple(), b.as_simple()),
            user_id: None,
            in_beta: false,
            expires_at: Utc::now()
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
