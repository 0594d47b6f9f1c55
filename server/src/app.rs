//! Core application

use std::sync::Arc;

use anyhow::Result;

use crate::api::ApiServer;
use crate::api::auth::{AuthResolver, BearerStrategy, CredentialStrategy, LegacyKeyStrategy};
use crate::core::cli::{self, Commands, KeysCommands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::data::cache::{CacheService, RateLimiter};
use crate::domain::api_keys::GeneratedKey;
use crate::domain::{ApiKeyManager, TokenIssuer};
use crate::utils::api_key::ApiKeyHasher;

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub cache: Arc<CacheService>,
    pub api_keys: Arc<ApiKeyManager>,
    pub tokens: Arc<TokenIssuer>,
    pub resolver: Arc<AuthResolver>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::Keys {
                command: KeysCommands::Generate,
            }) => {
                Self::print_generated_key();
                return Ok(());
            }
            Some(Commands::Start) | None => {}
        }

        let config = AppConfig::load(&cli_config)?;
        let app = Self::init(config, ShutdownService::new()).await?;
        Self::start_server(app).await
    }

    /// Build the store, managers and resolver from a loaded configuration
    pub async fn init(config: AppConfig, shutdown: ShutdownService) -> Result<Self> {
        let cache = Arc::new(
            CacheService::new(&config.cache)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize key store: {}", e))?,
        );

        tracing::debug!(backend = cache.backend_name(), "Key store initialized");

        let rate_limiter = if config.rate_limit.enabled {
            Some(Arc::new(RateLimiter::new(
                cache.clone(),
                config.rate_limit.limiter_cache_capacity,
                config.rate_limit.fail_open,
            )))
        } else {
            tracing::warn!("Rate limiting disabled by config");
            None
        };

        let key_secret = config.secrets.api_key_secret_or_generate();
        let api_keys = Arc::new(ApiKeyManager::new(
            cache.clone(),
            ApiKeyHasher::new(key_secret.as_bytes())?,
            config.rate_limit.default_limit.clone(),
        ));

        let jwt_secret = config.secrets.jwt_secret_or_generate();
        let tokens = Arc::new(TokenIssuer::new(
            cache.clone(),
            api_keys.clone(),
            jwt_secret.as_bytes(),
            &config.auth,
        ));

        // Bearer tokens take precedence over legacy keys
        let strategies: Vec<Arc<dyn CredentialStrategy>> = vec![
            Arc::new(BearerStrategy::new(tokens.clone())),
            Arc::new(LegacyKeyStrategy::new(api_keys.clone(), &config.auth)?),
        ];
        let resolver = Arc::new(AuthResolver::new(
            strategies,
            rate_limiter,
            config.rate_limit.guest_limit.clone(),
            &config.auth,
        ));

        if config.secrets.admin_token.is_none() {
            tracing::warn!("No admin token configured, admin endpoints will answer 503");
        }

        Ok(Self {
            shutdown,
            config,
            cache,
            api_keys,
            tokens,
            resolver,
        })
    }

    fn print_generated_key() {
        let key = GeneratedKey::new();
        println!("API key: {}", key.plaintext);
        println!("Key id:  {}", key.key_id);
        println!("Prefix:  {}", key.prefix);
        println!();
        println!("The key is shown once and is not stored anywhere.");
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{
        AuthConfig, CacheConfig, RateLimitConfig, SecretsConfig, ServerConfig,
    };

    fn config(rate_limit_enabled: bool) -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5390,
                cors_origin: "*".to_string(),
            },
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig {
                enabled: rate_limit_enabled,
                ..RateLimitConfig::default()
            },
            cache: CacheConfig::default(),
            secrets: SecretsConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_init_with_generated_secrets() {
        let app = CoreApp::init(config(true), ShutdownService::new())
            .await
            .unwrap();
        assert_eq!(app.cache.backend_name(), "memory");

        let created = app
            .api_keys
            .create(crate::domain::CreateApiKey {
                created_by: "owner-1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let found = app
            .api_keys
            .find_by_api_key(&created.api_key)
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_init_without_rate_limiting() {
        let app = CoreApp::init(config(false), ShutdownService::new())
            .await
            .unwrap();
        let parts = axum::http::Request::builder()
            .uri("/")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let ctx = app
            .resolver
            .authenticate(&parts, &crate::api::auth::AuthRequirements::optional())
            .await
            .unwrap();
        assert!(ctx.rate_limit.is_none());
        assert!(ctx.is_guest());
    }
}
