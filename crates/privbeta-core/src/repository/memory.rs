//! In-memory repository for testing and development.
//!
//! All tables live in one struct behind a single `RwLock`, so multi-row
//! operations such as [`accept_invitation`](BetaRepository::accept_invitation)
//! are atomic. Data is lost when the process exits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::BetaRepository;
use crate::error::RepositoryError;
use crate::models::{Invitation, InvitationCode, Session, User};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    codes: HashMap<Uuid, InvitationCode>,
    invitations: HashMap<Uuid, Invitation>,
    sessions: BTreeMap<String, Session>,
}

impl Tables {
    fn user_holds_code(&self, except: Uuid, user_id: Uuid, code_id: Uuid) -> bool {
        self.invitations.values().any(|i| {
            i.id != except && i.user_id == Some(user_id) && i.code_id == Some(code_id)
        })
    }
}

/// An in-memory [`BetaRepository`].
///
/// Cloning shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_created<T, F>(mut rows: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    rows.sort_by_key(key);
    rows
}

#[async_trait::async_trait]
impl BetaRepository for MemoryRepository {
    async fn create_user(&self, user: &User) -> Result<User, RepositoryError> {
        let mut t = self.tables.write().await;
        if t
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(RepositoryError::Conflict {
                entity: "user",
                reason: format!("username '{}' or email '{}' taken", user.username, user.email),
            });
        }
        t.users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn get_user(&self, id: Uuid) -> Result<User, RepositoryError> {
        let t = self.tables.read().await;
        t.users
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("user", id))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.username == username).cloned())
    }

    async fn create_code(&self, code: &InvitationCode) -> Result<InvitationCode, RepositoryError> {
        let mut t = self.tables.write().await;
        if t.codes.values().any(|c| c.code == code.code) {
            return Err(RepositoryError::Conflict {
                entity: "invitation code",
                reason: format!("code '{}' taken", code.code),
            });
        }
        t.codes.insert(code.id, code.clone());
        Ok(code.clone())
    }

    async fn get_code(&self, id: Uuid) -> Result<InvitationCode, RepositoryError> {
        let t = self.tables.read().await;
        t.codes
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("invitation code", id))
    }

    async fn find_code(&self, code: &str) -> Result<Option<InvitationCode>, RepositoryError> {
        let t = self.tables.read().await;
        Ok(t.codes.values().find(|c| c.code == code).cloned())
    }

    async fn find_owned_code_with_invites(
        &self,
        owner_id: Uuid,
    ) -> Result<Option<InvitationCode>, RepositoryError> {
        let t = self.tables.read().await;
        Ok(t
            .codes
            .values()
            .filter(|c| c.owner_id == Some(owner_id) && c.has_invites())
            .min_by_key(|c| c.created_at)
            .cloned())
    }

    async fn list_codes(&self) -> Result<Vec<InvitationCode>, RepositoryError> {
        let t = self.tables.read().await;
        Ok(sorted_by_created(t.codes.values().cloned().collect(), |c| {
            c.created_at
        }))
    }

    async fn count_claimed(&self, code_id: Uuid) -> Result<i64, RepositoryError> {
        let t = self.tables.read().await;
        let n = t
            .invitations
            .values()
            .filter(|i| i.code_id == Some(code_id) && i.user_id.is_some())
            .count();
        Ok(i64::try_from(n).unwrap_or(i64::MAX))
    }

    async fn create_invitation(
        &self,
        invitation: &Invitation,
    ) -> Result<Invitation, RepositoryError> {
        let mut t = self.tables.write().await;
        if let (Some(user_id), Some(code_id)) = (invitation.user_id, invitation.code_id) {
            if t.user_holds_code(invitation.id, user_id, code_id) {
                return Err(RepositoryError::Conflict {
                    entity: "invitation",
                    reason: format!("user {user_id} already holds code {code_id}"),
                });
            }
        }
        t.invitations.insert(invitation.id, invitation.clone());
        Ok(invitation.clone())
    }

    async fn update_invitation(
        &self,
        invitation: &Invitation,
    ) -> Result<Invitation, RepositoryError> {
        let mut t = self.tables.write().await;
        if !t.invitations.contains_key(&invitation.id) {
            return Err(RepositoryError::not_found("invitation", invitation.id));
        }
        if let (Some(user_id), Some(code_id)) = (invitation.user_id, invitation.code_id) {
            if t.user_holds_code(invitation.id, user_id, code_id) {
                return Err(RepositoryError::Conflict {
                    entity: "invitation",
                    reason: format!("user {user_id} already holds code {code_id}"),
                });
            }
        }
        t.invitations.insert(invitation.id, invitation.clone());
        Ok(invitation.clone())
    }

    async fn get_invitation(&self, id: Uuid) -> Result<Invitation, RepositoryError> {
        let t = self.tables.read().await;
        t.invitations
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("invitation", id))
    }

    async fn list_invitations(&self) -> Result<Vec<Invitation>, RepositoryError> {
        let t = self.tables.read().await;
        Ok(sorted_by_created(t.invitations.values().cloned().collect(), |i| {
            i.created_at
        }))
    }

    async fn invitations_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Invitation>, RepositoryError> {
        let t = self.tables.read().await;
        let rows = t
            .invitations
            .values()
            .filter(|i| i.user_id == Some(user_id))
            .cloned()
            .collect();
        Ok(sorted_by_created(rows, |i| i.created_at))
    }

    async fn find_invitation(
        &self,
        code_id: Uuid,
        email: &str,
    ) -> Result<Option<Invitation>, RepositoryError> {
        let t = self.tables.read().await;
        Ok(t
            .invitations
            .values()
            .filter(|i| i.code_id == Some(code_id) && i.email == email)
            .min_by_key(|i| i.created_at)
            .cloned())
    }

    async fn accept_invitation(
        &self,
        invitation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Invitation, RepositoryError> {
        let mut t = self.tables.write().await;

        let code_id = t
            .invitations
            .get(&invitation_id)
            .ok_or_else(|| RepositoryError::not_found("invitation", invitation_id))?
            .code_id
            .ok_or_else(|| RepositoryError::not_found("invitation code", "<none>"))?;

        if t.user_holds_code(invitation_id, user_id, code_id) {
            return Err(RepositoryError::Conflict {
                entity: "invitation",
                reason: format!("user {user_id} already holds code {code_id}"),
            });
        }

        let code = t
            .codes
            .get_mut(&code_id)
            .ok_or_else(|| RepositoryError::not_found("invitation code", code_id))?;
        if code.num_invites <= 0 {
            return Err(RepositoryError::Exhausted {
                code: code.code.clone(),
            });
        }
        code.num_invites -= 1;

        let invitation = t
            .invitations
            .get_mut(&invitation_id)
            .ok_or_else(|| RepositoryError::not_found("invitation", invitation_id))?;
        invitation.user_id = Some(user_id);
        invitation.used = Some(at);
        invitation.invited = Some(at);

        Ok(invitation.clone())
    }

    async fn load_session(&self, id: &str) -> Result<Option<Session>, RepositoryError> {
        let t = self.tables.read().await;
        Ok(t
            .sessions
            .get(id)
            .filter(|s| !s.is_expired(Utc::now()))
            .cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut t = self.tables.write().await;
        t.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<(), RepositoryError> {
        let mut t = self.tables.write().await;
        t.sessions.remove(id);
        Ok(())
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut t = self.tables.write().await;
        let before = t.sessions.len();
        t.sessions.retain(|_, s| !s.is_expired(now));
        Ok(u64::try_from(before - t.sessions.len()).unwrap_or(0))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn user(name: &str) -> User {
        User::new(name, &format!("{name}@example.com"), String::new(), false)
    }

    #[tokio::test]
    async fn duplicate_code_conflicts() {
        let repo = MemoryRepository::new();
        repo.create_code(&InvitationCode::new("foobar")).await.unwrap();
        let err = repo
            .create_code(&InvitationCode::new("foobar"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { .. }));
    }

    #[tokio::test]
    async fn duplicate_user_conflicts() {
        let repo = MemoryRepository::new();
        repo.create_user(&user("alice")).await.unwrap();
        let err = repo.create_user(&user("alice")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { .. }));
    }

    #[tokio::test]
    async fn one_invitation_per_user_and_code() {
        let repo = MemoryRepository::new();
        let alice = repo.create_user(&user("alice")).await.unwrap();
        let code = repo
            .create_code(&InvitationCode::new("foobar").with_invites(5))
            .await
            .unwrap();

        let mut first = Invitation::for_email(&code, &alice.email);
        first.user_id = Some(alice.id);
        repo.create_invitation(&first).await.unwrap();

        let mut second = Invitation::for_email(&code, &alice.email);
        second.user_id = Some(alice.id);
        let err = repo.create_invitation(&second).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { .. }));
    }

    #[tokio::test]
    async fn codeless_requests_do_not_conflict() {
        let repo = MemoryRepository::new();
        let alice = repo.create_user(&user("alice")).await.unwrap();
        repo.create_invitation(&Invitation::request_for(&alice))
            .await
            .unwrap();
        repo.create_invitation(&Invitation::request_for(&alice))
            .await
            .unwrap();
        assert_eq!(repo.invitations_for_user(alice.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn accept_stamps_and_decrements() {
        let repo = MemoryRepository::new();
        let dany = repo.create_user(&user("dany")).await.unwrap();
        let code = repo
            .create_code(&InvitationCode::new("foobar").with_invites(2))
            .await
            .unwrap();
        let inv = repo
            .create_invitation(&Invitation::for_email(&code, &dany.email))
            .await
            .unwrap();

        let now = Utc::now();
        let accepted = repo.accept_invitation(inv.id, dany.id, now).await.unwrap();
        assert_eq!(accepted.user_id, Some(dany.id));
        assert_eq!(accepted.used, Some(now));
        assert_eq!(accepted.invited, Some(now));

        let code = repo.get_code(code.id).await.unwrap();
        assert_eq!(code.num_invites, 1);
        assert_eq!(repo.count_claimed(code.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn accept_rejects_exhausted_code() {
        let repo = MemoryRepository::new();
        let dany = repo.create_user(&user("dany")).await.unwrap();
        let mut code = InvitationCode::new("spent");
        code.num_invites = 0;
        let code = repo.create_code(&code).await.unwrap();
        let inv = repo
            .create_invitation(&Invitation::for_email(&code, &dany.email))
            .await
            .unwrap();

        let err = repo
            .accept_invitation(inv.id, dany.id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Exhausted { .. }));
        assert_eq!(repo.get_code(code.id).await.unwrap().num_invites, 0);
        assert!(repo.get_invitation(inv.id).await.unwrap().used.is_none());
    }

    #[tokio::test]
    async fn owned_code_lookup_skips_exhausted() {
        let repo = MemoryRepository::new();
        let charlie = repo.create_user(&user("charlie")).await.unwrap();
        let mut spent = InvitationCode::new("spent").with_owner(charlie.id);
        spent.num_invites = 0;
        repo.create_code(&spent).await.unwrap();
        assert!(
            repo.find_owned_code_with_invites(charlie.id)
                .await
                .unwrap()
                .is_none()
        );

        repo.create_code(&InvitationCode::new("fresh").with_owner(charlie.id))
            .await
            .unwrap();
        let found = repo
            .find_owned_code_with_invites(charlie.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.code, "fresh");
    }

    #[tokio::test]
    async fn expired_sessions_are_hidden_and_purged() {
        let repo = MemoryRepository::new();
        let live = Session::new(Duration::hours(1));
        let mut dead = Session::new(Duration::hours(1));
        dead.expires_at = Utc::now() - Duration::seconds(1);

        repo.save_session(&live).await.unwrap();
        repo.save_session(&dead).await.unwrap();

        assert!(repo.load_session(&live.id).await.unwrap().is_some());
        assert!(repo.load_session(&dead.id).await.unwrap().is_none());
        assert_eq!(repo.purge_expired_sessions(Utc::now()).await.unwrap(), 1);
    }
}
