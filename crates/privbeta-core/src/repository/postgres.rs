//! `PostgreSQL` repository.
//!
//! Every query uses bound parameters. The schema is created on connect if
//! it does not exist; uniqueness rules live in the schema so concurrent
//! servers cannot violate them.
//!
//! Feature-gated behind `postgres`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::BetaRepository;
use crate::error::RepositoryError;
use crate::models::{Invitation, InvitationCode, Session, User};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS beta_users (
    id            UUID PRIMARY KEY,
    username      TEXT NOT NULL UNIQUE,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    is_staff      BOOLEAN NOT NULL DEFAULT FALSE,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS beta_invitation_codes (
    id          UUID PRIMARY KEY,
    code        VARCHAR(30) NOT NULL UNIQUE,
    private     BOOLEAN NOT NULL DEFAULT TRUE,
    max_invites INTEGER NOT NULL DEFAULT 1 CHECK (max_invites >= 0),
    num_invites INTEGER NOT NULL DEFAULT 1 CHECK (num_invites >= 0),
    owner_id    UUID REFERENCES beta_users (id) ON DELETE SET NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS beta_invitations (
    id         UUID PRIMARY KEY,
    user_id    UUID REFERENCES beta_users (id) ON DELETE CASCADE,
    email      TEXT NOT NULL DEFAULT '',
    code_id    UUID REFERENCES beta_invitation_codes (id) ON DELETE CASCADE,
    used       TIMESTAMPTZ,
    invited    TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (user_id, code_id)
);

CREATE INDEX IF NOT EXISTS idx_beta_invitations_user ON beta_invitations (user_id);
CREATE INDEX IF NOT EXISTS idx_beta_invitations_code_email ON beta_invitations (code_id, email);

CREATE TABLE IF NOT EXISTS beta_sessions (
    id         TEXT PRIMARY KEY,
    user_id    UUID REFERENCES beta_users (id) ON DELETE CASCADE,
    in_beta    BOOLEAN NOT NULL DEFAULT FALSE,
    expires_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_beta_sessions_expires ON beta_sessions (expires_at);
";

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row",
                key: "<query>".to_owned(),
            },
            sqlx::Error::Database(db_err) => {
                // PostgreSQL unique violation
                if db_err.code().as_deref() == Some("23505") {
                    Self::Conflict {
                        entity: "row",
                        reason: db_err.constraint().unwrap_or("unique").to_owned(),
                    }
                } else {
                    Self::Backend {
                        reason: format!("database error: {db_err}"),
                    }
                }
            }
            _ => Self::Backend {
                reason: format!("database error: {err}"),
            },
        }
    }
}

/// A [`BetaRepository`] backed by `PostgreSQL`.
///
/// Thread-safe via `PgPool`; cloning shares the pool.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRepository")
            .field("pool", &"[PgPool]")
            .finish_non_exhaustive()
    }
}

impl PostgresRepository {
    /// Connect to `PostgreSQL` and create the schema.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] if the connection or migration fails.
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| RepositoryError::Backend {
                reason: format!("connect failed: {e}"),
            })?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and create the schema.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] if the migration fails.
    pub async fn from_pool(pool: PgPool) -> Result<Self, RepositoryError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| RepositoryError::Backend {
                reason: format!("migration failed: {e}"),
            })?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl BetaRepository for PostgresRepository {
    async fn create_user(&self, user: &User) -> Result<User, RepositoryError> {
        let row = sqlx::query_as::<_, User>(
            r"INSERT INTO beta_users (id, username, email, password_hash, is_staff, created_at)
              VALUES ($1, $2, $3, $4, $5, $6)
              RETURNING *",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_staff)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn get_user(&self, id: Uuid) -> Result<User, RepositoryError> {
        sqlx::query_as::<_, User>("SELECT * FROM beta_users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::not_found("user", id))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM beta_users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM beta_users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn create_code(&self, code: &InvitationCode) -> Result<InvitationCode, RepositoryError> {
        let row = sqlx::query_as::<_, InvitationCode>(
            r"INSERT INTO beta_invitation_codes
                (id, code, private, max_invites, num_invites, owner_id, created_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7)
              RETURNING *",
        )
        .bind(code.id)
        .bind(&code.code)
        .bind(code.private)
        .bind(code.max_invites)
        .bind(code.num_invites)
        .bind(code.owner_id)
        .bind(code.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn get_code(&self, id: Uuid) -> Result<InvitationCode, RepositoryError> {
        sqlx::query_as::<_, InvitationCode>("SELECT * FROM beta_invitation_codes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::not_found("invitation code", id))
    }

    async fn find_code(&self, code: &str) -> Result<Option<InvitationCode>, RepositoryError> {
        let row = sqlx::query_as::<_, InvitationCode>(
            "SELECT * FROM beta_invitation_codes WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_owned_code_with_invites(
        &self,
        owner_id: Uuid,
    ) -> Result<Option<InvitationCode>, RepositoryError> {
        let row = sqlx::query_as::<_, InvitationCode>(
            r"SELECT * FROM beta_invitation_codes
              WHERE owner_id = $1 AND num_invites > 0
              ORDER BY created_at
              LIMIT 1",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_codes(&self) -> Result<Vec<InvitationCode>, RepositoryError> {
        let rows = sqlx::query_as::<_, InvitationCode>(
            "SELECT * FROM beta_invitation_codes ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn count_claimed(&self, code_id: Uuid) -> Result<i64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM beta_invitations WHERE code_id = $1 AND user_id IS NOT NULL",
        )
        .bind(code_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn create_invitation(
        &self,
        invitation: &Invitation,
    ) -> Result<Invitation, RepositoryError> {
        let row = sqlx::query_as::<_, Invitation>(
            r"INSERT INTO beta_invitations
                (id, user_id, email, code_id, used, invited, created_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7)
              RETURNING *",
        )
        .bind(invitation.id)
        .bind(invitation.user_id)
        .bind(&invitation.email)
        .bind(invitation.code_id)
        .bind(invitation.used)
        .bind(invitation.invited)
        .bind(invitation.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn update_invitation(
        &self,
        invitation: &Invitation,
    ) -> Result<Invitation, RepositoryError> {
        sqlx::query_as::<_, Invitation>(
            r"UPDATE beta_invitations
              SET user_id = $2, email = $3, code_id = $4, used = $5, invited = $6
              WHERE id = $1
              RETURNING *",
        )
        .bind(invitation.id)
        .bind(invitation.user_id)
        .bind(&invitation.email)
        .bind(invitation.code_id)
        .bind(invitation.used)
        .bind(invitation.invited)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::not_found("invitation", invitation.id))
    }

    async fn get_invitation(&self, id: Uuid) -> Result<Invitation, RepositoryError> {
        sqlx::query_as::<_, Invitation>("SELECT * FROM beta_invitations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::not_found("invitation", id))
    }

    async fn list_invitations(&self) -> Result<Vec<Invitation>, RepositoryError> {
        let rows =
            sqlx::query_as::<_, Invitation>("SELECT * FROM beta_invitations ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows)
    }

    async fn invitations_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Invitation>, RepositoryError> {
        let rows = sqlx::query_as::<_, Invitation>(
            "SELECT * FROM beta_invitations WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_invitation(
        &self,
        code_id: Uuid,
        email: &str,
    ) -> Result<Option<Invitation>, RepositoryError> {
        let row = sqlx::query_as::<_, Invitation>(
            r"SELECT * FROM beta_invitations
              WHERE code_id = $1 AND email = $2
              ORDER BY created_at
              LIMIT 1",
        )
        .bind(code_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn accept_invitation(
        &self,
        invitation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Invitation, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let invitation = sqlx::query_as::<_, Invitation>(
            r"UPDATE beta_invitations
              SET user_id = $2, used = $3, invited = $3
              WHERE id = $1
              RETURNING *",
        )
        .bind(invitation_id)
        .bind(user_id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::not_found("invitation", invitation_id))?;

        let code_id = invitation
            .code_id
            .ok_or_else(|| RepositoryError::not_found("invitation code", "<none>"))?;

        let updated = sqlx::query(
            r"UPDATE beta_invitation_codes
              SET num_invites = num_invites - 1
              WHERE id = $1 AND num_invites > 0",
        )
        .bind(code_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let code: Option<String> =
                sqlx::query_scalar("SELECT code FROM beta_invitation_codes WHERE id = $1")
                    .bind(code_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match code {
                Some(code) => RepositoryError::Exhausted { code },
                None => RepositoryError::not_found("invitation code", code_id),
            });
        }

        tx.commit().await?;

        Ok(invitation)
    }

    async fn load_session(&self, id: &str) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query_as::<_, Session>(
            "SELECT * FROM beta_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn save_session(&self, session: &Session) -> Result<(), RepositoryError> {
        sqlx::query(
            r"INSERT INTO beta_sessions (id, user_id, in_beta, expires_at)
              VALUES ($1, $2, $3, $4)
              ON CONFLICT (id) DO UPDATE
              SET user_id = EXCLUDED.user_id,
                  in_beta = EXCLUDED.in_beta,
                  expires_at = EXCLUDED.expires_at",
        )
        .bind(&session.id)
        .bind(session.user_id)
        .bind(session.in_beta)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM beta_sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM beta_sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
