use crate::{
    authgate,
    cli::telemetry,
    engine::{AuthEngine, LoginResponseMode, StorageStrategy},
    hasher::CredentialHasher,
    pool::PoolConfig,
    provider::HttpIdentityProvider,
    store::{AccountStore, PgAccountStore},
    token::TokenIssuer,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgConnectOptions;
use std::{str::FromStr, sync::Arc};
use tracing::info;
use url::Url;

/// Where account credentials are verified.
#[derive(Debug)]
pub enum Storage {
    Direct,
    Delegated {
        provider_url: Url,
        provider_key: SecretString,
    },
}

impl Storage {
    fn name(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Delegated { .. } => "delegated",
        }
    }
}

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub pool: PoolConfig,
    pub storage: Storage,
    pub login_response: LoginResponseMode,
    pub token_secret: SecretString,
    pub bcrypt_cost: u32,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is rejected or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let options =
        PgConnectOptions::from_str(&args.dsn).context("Invalid database connection string")?;
    let store: Arc<dyn AccountStore> = Arc::new(
        PgAccountStore::new(options, args.pool).context("Invalid connection pool settings")?,
    );

    let strategy = match args.storage {
        Storage::Direct => StorageStrategy::DirectPool(store),
        Storage::Delegated {
            provider_url,
            provider_key,
        } => StorageStrategy::DelegatedProvider {
            provider: Arc::new(
                HttpIdentityProvider::new(provider_url, provider_key)
                    .context("Failed to build identity provider client")?,
            ),
            profiles: store,
        },
    };

    let hasher = CredentialHasher::new(args.bcrypt_cost).context("Invalid bcrypt cost")?;
    let tokens = TokenIssuer::new(&args.token_secret).context("Invalid token secret")?;
    let engine = Arc::new(
        AuthEngine::new(strategy, hasher, tokens, args.login_response)
            .context("Failed to initialize the authentication engine")?,
    );

    let result = authgate::new(args.port, engine).await;
    telemetry::shutdown_tracer();
    result
}

fn log_startup_args(args: &Args) {
    let provider = match &args.storage {
        Storage::Direct => "n/a".to_string(),
        Storage::Delegated { provider_url, .. } => provider_url.to_string(),
    };
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("storage", args.storage.name().to_string()),
        ("provider_url", provider),
        ("login_response", args.login_response.as_str().to_string()),
        ("bcrypt_cost", args.bcrypt_cost.to_string()),
        ("pool_max_size", args.pool.max_size().to_string()),
        (
            "pool_queue_limit",
            args.pool
                .queue_limit()
                .map_or_else(|| "unbounded".to_string(), |limit| limit.to_string()),
        ),
        (
            "pool_wait",
            args.pool.wait_for_connections().to_string(),
        ),
        (
            "pool_acquire_timeout",
            args.pool
                .acquire_timeout()
                .map_or_else(|| "none".to_string(), |timeout| format!("{timeout:?}")),
        ),
        (
            "pool_idle_timeout",
            args.pool
                .idle_timeout()
                .map_or_else(|| "none".to_string(), |timeout| format!("{timeout:?}")),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

pub(crate) fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", authgate_banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn authgate_banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    AUTHGATE_BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}

const AUTHGATE_BANNER: &str = r"
   _____
  |  _  |
  | | | |
  |_|_|_|  A U T H G A T E {VERSION}
  |_____|";
