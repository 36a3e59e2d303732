use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::types::{Role, User};

/// Column protected by a uniqueness constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    /// `users.username`
    Username,
    /// `users.email`, compared case-insensitively
    Email,
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniqueField::Username => f.write_str("username"),
            UniqueField::Email => f.write_str("email"),
        }
    }
}

/// Errors raised by a [`CredentialStore`]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A write collided with an existing username and/or email
    #[error("Duplicate value for {}", .0.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(", "))]
    Conflict(Vec<UniqueField>),

    /// The addressed record does not exist
    #[error("Record not found")]
    NotFound,

    /// The backing store failed
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// A user about to be inserted
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Freshly generated identifier
    pub id: String,
    /// Requested login name
    pub username: String,
    /// Email address
    pub email: String,
    /// bcrypt hash of the password
    pub password_hash: String,
}

impl NewUser {
    /// Builds a new user record with a random UUID v4 identifier.
    pub fn new(username: &str, email: &str, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
        }
    }
}

/// Persistent storage of user credentials.
///
/// Implementations enforce username and email uniqueness inside the write
/// itself, so two concurrent writes can never both claim the same value.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Inserts a user, failing with [`StoreError::Conflict`] on duplicates.
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;

    /// Looks a user up by identifier.
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Looks a user up by exact username.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Replaces the password hash of an existing user.
    async fn update_password_hash(&self, id: &str, password_hash: &str)
    -> Result<(), StoreError>;

    /// Replaces the email of an existing user, failing on collisions.
    async fn update_email(&self, id: &str, email: &str) -> Result<(), StoreError>;

    /// Removes a user. Returns `false` when no such user existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Creates the given roles if missing; returns how many were created.
    async fn ensure_roles(&self, roles: &[Role]) -> Result<usize, StoreError>;

    /// Grants roles to a user. The roles must already exist.
    async fn add_roles(&self, id: &str, roles: &[Role]) -> Result<(), StoreError>;

    /// Number of stored users.
    async fn user_count(&self) -> Result<u64, StoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<String, User>,
    roles: BTreeSet<Role>,
}

impl Inner {
    fn conflicts(
        &self,
        username: Option<&str>,
        email: &str,
        except_id: Option<&str>,
    ) -> Vec<UniqueField> {
        let email = email.to_lowercase();
        let others = || {
            self.users
                .values()
                .filter(move |u| Some(u.id.as_str()) != except_id)
        };

        let mut fields = Vec::new();
        if let Some(username) = username {
            if others().any(|u| u.username == username) {
                fields.push(UniqueField::Username);
            }
        }
        if others().any(|u| u.email.to_lowercase() == email) {
            fields.push(UniqueField::Email);
        }
        fields
    }
}

/// Credential store kept in process memory.
///
/// Every write takes the single write lock, so the uniqueness check and the
/// write happen in one critical section.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentialStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;

        let conflicts = inner.conflicts(Some(user.username.as_str()), &user.email, None);
        if !conflicts.is_empty() {
            return Err(StoreError::Conflict(conflicts));
        }

        let user = User {
            id: user.id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            roles: BTreeSet::new(),
        };
        inner.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.username == username).cloned())
    }

    async fn update_password_hash(
        &self,
        id: &str,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner.users.get_mut(id).ok_or(StoreError::NotFound)?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn update_email(&self, id: &str, email: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(id) {
            return Err(StoreError::NotFound);
        }

        let conflicts = inner.conflicts(None, email, Some(id));
        if !conflicts.is_empty() {
            return Err(StoreError::Conflict(conflicts));
        }

        if let Some(user) = inner.users.get_mut(id) {
            user.email = email.to_string();
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.users.remove(id).is_some())
    }

    async fn ensure_roles(&self, roles: &[Role]) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(roles.iter().filter(|r| inner.roles.insert(**r)).count())
    }

    async fn add_roles(&self, id: &str, roles: &[Role]) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        if let Some(missing) = roles.iter().find(|r| !inner.roles.contains(*r)) {
            return Err(StoreError::Backend(format!("Role '{}' does not exist", missing)));
        }

        let user = inner.users.get_mut(id).ok_or(StoreError::NotFound)?;
        user.roles.extend(roles.iter().copied());
        Ok(())
    }

    async fn user_count(&self) -> Result<u64, StoreError> {
        Ok(self.inner.read().await.users.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser::new(username, email, "hash".to_string())
    }

    #[tokio::test]
    async fn duplicate_username_and_email_are_both_reported() {
        let store = InMemoryCredentialStore::new();
        store.insert(new_user("bob", "bob@x.com")).await.unwrap();

        let err = store.insert(new_user("bob", "BOB@x.com")).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict(ref fields)
                if fields == &vec![UniqueField::Username, UniqueField::Email]
        ));
        assert_eq!(err.to_string(), "Duplicate value for username, email");
        assert_eq!(store.user_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn usernames_are_case_sensitive() {
        let store = InMemoryCredentialStore::new();
        store.insert(new_user("bob", "bob@x.com")).await.unwrap();
        store.insert(new_user("Bob", "bob2@x.com")).await.unwrap();

        assert_eq!(store.user_count().await.unwrap(), 2);
        assert!(store.find_by_username("BOB").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_inserts_admit_exactly_one() {
        let store = InMemoryCredentialStore::new();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .insert(new_user("racer", &format!("racer{}@x.com", i)))
                        .await
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(store.user_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_email_rejects_collision_but_allows_own_address() {
        let store = InMemoryCredentialStore::new();
        let alice = store.insert(new_user("alice", "alice@x.com")).await.unwrap();
        store.insert(new_user("bob", "bob@x.com")).await.unwrap();

        assert!(matches!(
            store.update_email(&alice.id, "bob@x.com").await,
            Err(StoreError::Conflict(_))
        ));
        store.update_email(&alice.id, "ALICE@x.com").await.unwrap();
        assert!(matches!(
            store.update_email("missing", "new@x.com").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn delete_reports_missing_users() {
        let store = InMemoryCredentialStore::new();
        let alice = store.insert(new_user("alice", "alice@x.com")).await.unwrap();

        assert!(store.delete(&alice.id).await.unwrap());
        assert!(!store.delete(&alice.id).await.unwrap());
        assert!(store.find_by_id(&alice.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn roles_must_exist_before_assignment() {
        let store = InMemoryCredentialStore::new();
        let alice = store.insert(new_user("alice", "alice@x.com")).await.unwrap();

        assert!(store.add_roles(&alice.id, &[Role::Reader]).await.is_err());

        assert_eq!(store.ensure_roles(&Role::ALL).await.unwrap(), 4);
        assert_eq!(store.ensure_roles(&Role::ALL).await.unwrap(), 0);

        store
            .add_roles(&alice.id, &[Role::Reader, Role::Owner])
            .await
            .unwrap();
        let stored = store.find_by_id(&alice.id).await.unwrap().unwrap();
        assert!(stored.has_role(Role::Owner));
        assert!(!stored.has_role(Role::Administrator));
    }
}
