use crate::password::PasswordHasher;
use crate::store::{CredentialStore, NewUser, StoreError};
use crate::types::{AuthError, Role};

/// Email domain of the demo accounts.
pub const DEMO_DOMAIN: &str = "contoso.com";

/// Role subsets of the demo accounts `user0`..`user3`, one entry per account.
pub const DEMO_ROLE_SETS: [&[Role]; 4] = [
    &[Role::Administrator],
    &[Role::Reader],
    &[Role::Reader, Role::Contributor],
    &[Role::Reader, Role::Contributor, Role::Owner],
];

/// Outcome of a seeding run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    /// Roles that did not exist before this run
    pub roles_created: usize,
    /// Demo users created by this run
    pub users_created: usize,
}

impl SeedReport {
    /// Warning to surface when this run created demo accounts with
    /// well-known passwords.
    pub fn demo_credentials_warning(&self) -> Option<String> {
        (self.users_created > 0).then(|| {
            format!(
                "Created {} demo accounts with well-known passwords, including administrator \
                 user0; set SEED_DEMO_USERS=false in production",
                self.users_created
            )
        })
    }
}

/// Ensures every role exists and, when `seed_users` is set and the store holds
/// no users, creates the demo accounts. Safe to run on every start.
pub async fn seed_demo_data(
    store: &dyn CredentialStore,
    hasher: &PasswordHasher,
    seed_users: bool,
) -> Result<SeedReport, AuthError> {
    let mut report = SeedReport {
        roles_created: store.ensure_roles(&Role::ALL).await?,
        ..SeedReport::default()
    };

    if !seed_users || store.user_count().await? > 0 {
        return Ok(report);
    }

    for (i, roles) in DEMO_ROLE_SETS.iter().enumerate() {
        let username = format!("user{}", i);
        let email = format!("{}@{}", username, DEMO_DOMAIN);
        let password_hash = hasher.hash(&format!("Password{}", i))?;

        let user = match store
            .insert(NewUser::new(&username, &email, password_hash))
            .await
        {
            Ok(user) => user,
            Err(StoreError::Conflict(_)) => {
                // Another replica seeded concurrently
                log::warn!("Demo user {} already exists, skipping", username);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        store.add_roles(&user.id, roles).await?;
        report.users_created += 1;
    }

    log::info!(
        "🌱 Seeded {} demo users and {} roles",
        report.users_created,
        report.roles_created
    );
    if let Some(warning) = report.demo_credentials_warning() {
        log::warn!("⚠️ {}", warning);
    }
    Ok(report)
}
