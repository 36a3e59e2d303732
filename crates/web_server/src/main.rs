//! Entry point for the login service.
//! Wires configuration, secrets, storage and the HTTP API together.

mod config;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Logger, web};
use anyhow::Context;

use auth_services::jwt::{TokenIssuer, resolve_signing_key};
use auth_services::secrets::{SecretError, SecretSource};
use auth_services::seed::seed_demo_data;
use auth_services::service::AccountManager;
use auth_services::store::{CredentialStore, InMemoryCredentialStore};
use postgres::PgCredentialStore;
use postgres::database::{create_connection_pool, run_migrations, test_connection};
use secret_vault::VaultClient;
use web_handlers::configure_routes;

use crate::config::{ServiceConfig, resolve_database_url};

fn vault_client() -> Option<VaultClient> {
    match VaultClient::from_env() {
        Ok(client) => {
            log::info!("🔐 Secret vault configured");
            Some(client)
        }
        Err(SecretError::NotConfigured(reason)) => {
            log::info!("No secret vault: {}", reason);
            None
        }
        Err(e) => {
            log::warn!("Secret vault unavailable: {}", e);
            None
        }
    }
}

async fn credential_store(
    config: &ServiceConfig,
    secrets: Option<&dyn SecretSource>,
) -> anyhow::Result<Arc<dyn CredentialStore>> {
    let Some(url) = &config.database_url else {
        log::warn!("⚠️ DATABASE_URL not set, accounts are kept in memory and lost on restart");
        return Ok(Arc::new(InMemoryCredentialStore::new()));
    };

    let url = resolve_database_url(url, secrets).await?;
    let pool = create_connection_pool(&url)
        .await
        .context("Failed to create database pool")?;
    log::info!("🗃️ Database pool created successfully");

    if let Err(e) = test_connection(&pool).await {
        log::error!("❌ Database connection test failed: {}", e);
    }
    run_migrations(&pool)
        .await
        .context("Failed to apply database migrations")?;

    Ok(Arc::new(PgCredentialStore::new(pool)))
}

fn cors(origins: &[String]) -> Cors {
    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    log::info!("🚀 Starting login service...");

    let config = ServiceConfig::from_env();
    let vault = vault_client();
    let secrets = vault.as_ref().map(|v| v as &dyn SecretSource);

    let store = credential_store(&config, secrets).await?;
    let report = seed_demo_data(store.as_ref(), &config.hasher, config.seed_demo_users)
        .await
        .context("Failed to seed roles")?;
    log::info!(
        "🌱 Seeding done: {} roles created, {} demo users created",
        report.roles_created,
        report.users_created
    );

    let signing_key = resolve_signing_key(config.jwt_key.as_deref(), secrets).await;
    let tokens = TokenIssuer::new(&signing_key, config.tokens.clone());
    if tokens.key_mode().is_secure() {
        log::info!("🔑 Token signing key mode: {}", tokens.key_mode().as_str());
    } else {
        log::warn!("⚠️ Token signing key mode: {}", tokens.key_mode().as_str());
    }

    if config.telemetry_key.is_some() {
        log::info!("📈 Telemetry key present");
    } else {
        log::info!("Telemetry key absent, telemetry disabled");
    }

    let manager = AccountManager::new(store, config.hasher, tokens.clone());
    let cors_origins = config.cors_origins.clone();

    log::info!("🌐 Server will be available at: http://{}", config.bind_address);

    HttpServer::new(move || {
        let tokens = tokens.clone();
        App::new()
            .app_data(web::Data::new(manager.clone()))
            .wrap(cors(&cors_origins))
            .wrap(Logger::default())
            .configure(|cfg| configure_routes(cfg, tokens))
    })
    .bind(&config.bind_address)?
    .run()
    .await?;

    Ok(())
}
