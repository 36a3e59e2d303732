use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::OnceCell;
use validator::ValidateEmail;

use crate::jwt::TokenIssuer;
use crate::password::{PasswordHasher, PasswordPolicy};
use crate::store::{CredentialStore, NewUser, StoreError, UniqueField};
use crate::types::{
    AuthError, CreateAccountRequest, LoginResponse, UpdateAccountRequest, User, UserView,
};

/// Plaintext behind the hash verified for unknown usernames.
const DUMMY_PASSWORD: &str = "unknown-user-dummy-password";

static USERNAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-._@+]+$").expect("valid username pattern"));

/// A service for account operations: registration, lookup, self-service
/// updates, administrative deletion and login.
///
/// Holds no user state of its own; every operation reads the store afresh.
#[derive(Clone)]
pub struct AccountManager {
    store: Arc<dyn CredentialStore>,
    hasher: PasswordHasher,
    policy: PasswordPolicy,
    tokens: TokenIssuer,
    // Verified for unknown usernames, at the same bcrypt cost as real hashes
    dummy_hash: Arc<OnceCell<String>>,
}

impl AccountManager {
    /// Creates a new instance of `AccountManager` over the given store and token issuer.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: PasswordHasher,
        tokens: TokenIssuer,
    ) -> Self {
        Self {
            store,
            hasher,
            policy: PasswordPolicy,
            tokens,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Token issuer used for login and request authentication.
    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Returns the account of the authenticated user identified by `username`.
    pub async fn get_current(&self, username: &str) -> Result<UserView, AuthError> {
        self.store
            .find_by_username(username)
            .await?
            .map(|user| user.view())
            .ok_or(AuthError::NotFound)
    }

    /// Registers a new account. Every validation failure is reported at once.
    pub async fn create(&self, request: &CreateAccountRequest) -> Result<UserView, AuthError> {
        let password = request
            .password
            .as_deref()
            .ok_or_else(|| AuthError::validation("Password is required."))?;
        let username = request.username.as_deref().unwrap_or_default();
        let email = request.email.as_deref().unwrap_or_default();

        let mut causes = Vec::new();
        if !USERNAME_PATTERN.is_match(username) {
            causes.push(format!(
                "Username '{}' is invalid, can only contain letters, digits or -._@+.",
                username
            ));
        }
        if !email.validate_email() {
            causes.push(format!("Email '{}' is invalid.", email));
        }
        causes.extend(self.policy.violations(password));
        if !causes.is_empty() {
            return Err(AuthError::Validation(causes));
        }

        let password_hash = self.hash_password(password).await?;

        let user = self
            .store
            .insert(NewUser::new(username, email, password_hash))
            .await
            .map_err(|e| conflict_causes(e, username, email))?;

        log::info!("User created.");
        Ok(user.view())
    }

    /// Dispatches an account update: a password change when `new_password` is
    /// set, otherwise an email change when `email` is set.
    pub async fn apply_update(
        &self,
        username: &str,
        request: &UpdateAccountRequest,
    ) -> Result<(), AuthError> {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());

        if let Some(new_password) = non_empty(&request.new_password) {
            let old_password = request.password.as_deref().unwrap_or_default();
            self.change_password(username, old_password, &new_password)
                .await
        } else if let Some(email) = non_empty(&request.email) {
            self.change_email(username, &email).await
        } else {
            Err(AuthError::validation(
                "Either newPassword or email is required.",
            ))
        }
    }

    /// Replaces the password after verifying the current one. Nothing is
    /// written unless both the verification and the policy check pass.
    pub async fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let user = self.load_identity(username).await?;

        if !self
            .verify_password(old_password, &user.password_hash)
            .await?
        {
            return Err(AuthError::validation("Incorrect password."));
        }

        let violations = self.policy.violations(new_password);
        if !violations.is_empty() {
            return Err(AuthError::Validation(violations));
        }

        let password_hash = self.hash_password(new_password).await?;
        self.store
            .update_password_hash(&user.id, &password_hash)
            .await
            .map_err(|e| missing_identity(e, username))?;

        log::info!("Password changed for user {}", user.id);
        Ok(())
    }

    /// Replaces the email address. Succeeds without writing when unchanged.
    pub async fn change_email(&self, username: &str, new_email: &str) -> Result<(), AuthError> {
        let user = self.load_identity(username).await?;

        if user.email == new_email {
            return Ok(());
        }

        if !new_email.validate_email() {
            return Err(AuthError::validation(format!(
                "Email '{}' is invalid.",
                new_email
            )));
        }

        self.store
            .update_email(&user.id, new_email)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => {
                    AuthError::validation(format!("Email '{}' is already taken.", new_email))
                }
                other => missing_identity(other, username),
            })?;

        log::info!("Email changed for user {}", user.id);
        Ok(())
    }

    /// Permanently removes an account. The caller's Administrator role is
    /// checked by the transport layer before this is reached.
    pub async fn delete(&self, target_user_id: &str) -> Result<(), AuthError> {
        if !self.store.delete(target_user_id).await? {
            return Err(AuthError::NotFound);
        }

        log::info!("User deleted. id={}", target_user_id);
        Ok(())
    }

    /// Verifies credentials and issues a token. Unknown users and wrong
    /// passwords fail identically.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let user = self.store.find_by_username(username).await?;
        let verified = match &user {
            Some(user) => self.verify_password(password, &user.password_hash).await?,
            None => {
                let dummy_hash = self
                    .dummy_hash
                    .get_or_try_init(|| self.hash_password(DUMMY_PASSWORD))
                    .await?;
                self.verify_password(password, dummy_hash).await?;
                false
            }
        };

        let user = match user {
            Some(user) if verified => user,
            _ => {
                log::info!("Failed login.");
                return Err(AuthError::Unauthorized);
            }
        };

        let token = self.tokens.issue(&user)?;

        log::info!("Successful login.");
        Ok(LoginResponse {
            id: user.id,
            username: user.username,
            email: user.email,
            token,
        })
    }

    async fn load_identity(&self, username: &str) -> Result<User, AuthError> {
        self.store
            .find_by_username(username)
            .await?
            .ok_or_else(|| AuthError::Internal(format!("Unable to load user '{}'", username)))
    }

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher;
        let password = password.to_string();

        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("Password hashing task failed: {}", e)))?
    }

    async fn verify_password(
        &self,
        password: &str,
        password_hash: &str,
    ) -> Result<bool, AuthError> {
        let hasher = self.hasher;
        let password = password.to_string();
        let password_hash = password_hash.to_string();

        tokio::task::spawn_blocking(move || hasher.verify(&password, &password_hash))
            .await
            .map_err(|e| AuthError::Internal(format!("Password verification task failed: {}", e)))
    }
}

fn conflict_causes(error: StoreError, username: &str, email: &str) -> AuthError {
    match error {
        StoreError::Conflict(fields) => AuthError::Validation(
            fields
                .into_iter()
                .map(|field| match field {
                    UniqueField::Username => format!("Username '{}' is already taken.", username),
                    UniqueField::Email => format!("Email '{}' is already taken.", email),
                })
                .collect(),
        ),
        other => other.into(),
    }
}

fn missing_identity(error: StoreError, username: &str) -> AuthError {
    match error {
        StoreError::NotFound => AuthError::Internal(format!("Unable to load user '{}'", username)),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::{KeyMode, SigningKey, TokenSettings};
    use crate::store::InMemoryCredentialStore;

    fn manager() -> (AccountManager, Arc<InMemoryCredentialStore>) {
        let store = Arc::new(InMemoryCredentialStore::new());
        let tokens = TokenIssuer::new(
            &SigningKey::new("service-test-key", KeyMode::Configured),
            TokenSettings::default(),
        );
        let manager = AccountManager::new(store.clone(), PasswordHasher::new(4), tokens);
        (manager, store)
    }

    fn request(username: &str, email: &str, password: &str) -> CreateAccountRequest {
        CreateAccountRequest {
            username: Some(username.to_string()),
            email: Some(email.to_string()),
            password: Some(password.to_string()),
        }
    }

    async fn alice(manager: &AccountManager) -> UserView {
        manager
            .create(&request("alice", "alice@x.com", "Passw0rd"))
            .await
            .unwrap()
    }

    fn causes(err: AuthError) -> Vec<String> {
        match err {
            AuthError::Validation(causes) => causes,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn create_stores_hashed_password() {
        let (manager, store) = manager();
        let view = alice(&manager).await;

        assert_eq!(view.username, "alice");
        assert_eq!(view.email, "alice@x.com");
        assert!(!view.id.is_empty());

        let stored = store.find_by_id(&view.id).await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "Passw0rd");
        assert!(PasswordHasher::new(4).verify("Passw0rd", &stored.password_hash));
    }

    #[tokio::test]
    async fn create_requires_password() {
        let (manager, _) = manager();
        let err = manager
            .create(&CreateAccountRequest {
                password: None,
                ..request("alice", "alice@x.com", "")
            })
            .await
            .unwrap_err();

        assert_eq!(causes(err), vec!["Password is required.".to_string()]);
    }

    #[tokio::test]
    async fn create_lists_every_cause() {
        let (manager, store) = manager();
        let err = manager
            .create(&request("alice", "invalidEmail", "short"))
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("Email 'invalidEmail' is invalid."));
        assert!(message.contains("Passwords must be at least 8 characters."));
        assert!(message.contains("uppercase"));
        assert_eq!(store.user_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn create_rejects_illegal_username() {
        let (manager, _) = manager();
        let err = manager
            .create(&request("bad name", "bad@x.com", "Passw0rd"))
            .await
            .unwrap_err();

        assert!(causes(err)[0].starts_with("Username 'bad name' is invalid"));
    }

    #[tokio::test]
    async fn duplicate_username_or_email_fails() {
        let (manager, _) = manager();
        alice(&manager).await;

        let same_name = manager
            .create(&request("alice", "other@x.com", "Passw0rd"))
            .await
            .unwrap_err();
        assert_eq!(
            causes(same_name),
            vec!["Username 'alice' is already taken.".to_string()]
        );

        let same_email = manager
            .create(&request("alice2", "alice@x.com", "Passw0rd"))
            .await
            .unwrap_err();
        assert_eq!(
            causes(same_email),
            vec!["Email 'alice@x.com' is already taken.".to_string()]
        );
    }

    #[tokio::test]
    async fn exactly_one_concurrent_create_succeeds() {
        let (manager, store) = manager();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .create(&request("racer", &format!("racer{}@x.com", i), "Passw0rd"))
                        .await
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert!(err.to_string().contains("already taken")),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(store.user_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn login_issues_valid_token() {
        let (manager, _) = manager();
        let view = alice(&manager).await;

        let response = manager.login("alice", "Passw0rd").await.unwrap();
        assert_eq!(response.id, view.id);
        assert!(!response.token.is_empty());

        let claims = manager.tokens().validate(&response.token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.user_id, view.id);
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let (manager, _) = manager();
        alice(&manager).await;

        let unknown = manager.login("mallory", "Passw0rd").await.unwrap_err();
        let wrong = manager.login("alice", "WrongPass1").await.unwrap_err();

        assert!(matches!(unknown, AuthError::Unauthorized));
        assert!(matches!(wrong, AuthError::Unauthorized));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn change_password_requires_current_password() {
        let (manager, store) = manager();
        let view = alice(&manager).await;
        let before = store.find_by_id(&view.id).await.unwrap().unwrap();

        let err = manager
            .change_password("alice", "WrongPass1", "NewPass123")
            .await
            .unwrap_err();
        assert_eq!(causes(err), vec!["Incorrect password.".to_string()]);

        let after = store.find_by_id(&view.id).await.unwrap().unwrap();
        assert_eq!(before.password_hash, after.password_hash);
    }

    #[tokio::test]
    async fn weak_new_password_leaves_hash_untouched() {
        let (manager, store) = manager();
        let view = alice(&manager).await;
        let before = store.find_by_id(&view.id).await.unwrap().unwrap();

        for weak in ["short", "Short1", "nouppercase123"] {
            let err = manager
                .change_password("alice", "Passw0rd", weak)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::Validation(_)));
        }

        let after = store.find_by_id(&view.id).await.unwrap().unwrap();
        assert_eq!(before.password_hash, after.password_hash);
        assert!(manager.login("alice", "Passw0rd").await.is_ok());
    }

    #[tokio::test]
    async fn change_password_keeps_email() {
        let (manager, store) = manager();
        let view = alice(&manager).await;

        manager
            .change_password("alice", "Passw0rd", "NewPass123)(*")
            .await
            .unwrap();

        let stored = store.find_by_id(&view.id).await.unwrap().unwrap();
        assert_eq!(stored.email, "alice@x.com");
        assert!(PasswordHasher::new(4).verify("NewPass123)(*", &stored.password_hash));
        assert!(manager.login("alice", "Passw0rd").await.is_err());
        assert!(manager.login("alice", "NewPass123)(*").await.is_ok());
    }

    #[tokio::test]
    async fn change_email_keeps_password() {
        let (manager, store) = manager();
        let view = alice(&manager).await;
        let before = store.find_by_id(&view.id).await.unwrap().unwrap();

        manager.change_email("alice", "alice@new.com").await.unwrap();

        let after = store.find_by_id(&view.id).await.unwrap().unwrap();
        assert_eq!(after.email, "alice@new.com");
        assert_eq!(after.password_hash, before.password_hash);
    }

    #[tokio::test]
    async fn change_email_to_same_address_is_a_no_op() {
        let (manager, _) = manager();
        alice(&manager).await;

        manager.change_email("alice", "alice@x.com").await.unwrap();
        assert_eq!(manager.get_current("alice").await.unwrap().email, "alice@x.com");
    }

    #[tokio::test]
    async fn change_email_rejects_collisions_and_bad_shapes() {
        let (manager, _) = manager();
        alice(&manager).await;
        manager
            .create(&request("bob", "bob@x.com", "Passw0rd"))
            .await
            .unwrap();

        let taken = manager.change_email("alice", "bob@x.com").await.unwrap_err();
        assert_eq!(
            causes(taken),
            vec!["Email 'bob@x.com' is already taken.".to_string()]
        );

        let invalid = manager.change_email("alice", "nope").await.unwrap_err();
        assert!(matches!(invalid, AuthError::Validation(_)));

        assert_eq!(manager.get_current("alice").await.unwrap().email, "alice@x.com");
    }

    #[tokio::test]
    async fn apply_update_needs_a_field() {
        let (manager, _) = manager();
        alice(&manager).await;

        let err = manager
            .apply_update("alice", &UpdateAccountRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        manager
            .apply_update(
                "alice",
                &UpdateAccountRequest {
                    email: Some("alice@y.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(manager.get_current("alice").await.unwrap().email, "alice@y.com");
    }

    #[tokio::test]
    async fn mutation_of_vanished_identity_is_internal() {
        let (manager, _) = manager();

        let err = manager.change_email("ghost", "ghost@x.com").await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
    }

    #[tokio::test]
    async fn delete_then_lookup_is_not_found() {
        let (manager, _) = manager();
        let view = alice(&manager).await;

        manager.delete(&view.id).await.unwrap();

        assert!(matches!(manager.delete(&view.id).await, Err(AuthError::NotFound)));
        assert!(matches!(
            manager.get_current("alice").await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn unknown_user_login_still_runs_bcrypt() {
        let (manager, _) = manager();
        assert!(manager.dummy_hash.get().is_none());

        let err = manager.login("mallory", "Passw0rd").await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));

        let dummy_hash = manager.dummy_hash.get().unwrap();
        assert!(dummy_hash.starts_with("$2"));
        assert!(PasswordHasher::new(4).verify(DUMMY_PASSWORD, dummy_hash));

        // The dummy password itself never logs anyone in
        let err = manager.login("mallory", DUMMY_PASSWORD).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));
    }
}
