use crate::cli::{
    actions::{
        Action,
        server::{Args, Storage},
        setup,
    },
    commands::{
        ARG_BCRYPT_COST, ARG_DSN, ARG_LOGIN_RESPONSE, ARG_PORT, ARG_TOKEN_SECRET,
        CMD_SETUP_DATABASE,
        pool::{
            ARG_POOL_ACQUIRE_TIMEOUT, ARG_POOL_IDLE_TIMEOUT, ARG_POOL_MAX_SIZE, ARG_POOL_NO_WAIT,
            ARG_POOL_QUEUE_LIMIT,
        },
        storage::{ARG_PROVIDER_KEY, ARG_PROVIDER_URL, ARG_STORAGE},
    },
};
use crate::engine::LoginResponseMode;
use crate::hasher::DEFAULT_COST;
use crate::pool::{DEFAULT_MAX_SIZE, PoolConfig};
use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use std::time::Duration;
use url::Url;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((CMD_SETUP_DATABASE, sub_matches)) => setup_database(sub_matches),
        _ => server(matches),
    }
}

fn setup_database(matches: &clap::ArgMatches) -> Result<Action> {
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    Ok(Action::SetupDatabase(setup::Args {
        dsn,
        pool: pool_config(matches)?,
    }))
}

fn server(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let login_response = matches
        .get_one::<String>(ARG_LOGIN_RESPONSE)
        .context("missing required argument: --login-response")?
        .parse::<LoginResponseMode>()
        .map_err(|e| anyhow!(e))?;

    let token_secret = matches
        .get_one::<String>(ARG_TOKEN_SECRET)
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --token-secret")?;

    let bcrypt_cost = matches
        .get_one::<u32>(ARG_BCRYPT_COST)
        .copied()
        .unwrap_or(DEFAULT_COST);

    Ok(Action::Server(Args {
        port,
        dsn,
        pool: pool_config(matches)?,
        storage: storage(matches)?,
        login_response,
        token_secret,
        bcrypt_cost,
    }))
}

fn pool_config(matches: &clap::ArgMatches) -> Result<PoolConfig> {
    let max_size = match matches.get_one::<u64>(ARG_POOL_MAX_SIZE) {
        Some(size) => usize::try_from(*size).context("invalid --pool-max-size")?,
        None => DEFAULT_MAX_SIZE,
    };

    let config = PoolConfig::new()
        .with_max_size(max_size)
        .with_queue_limit(matches.get_one::<usize>(ARG_POOL_QUEUE_LIMIT).copied())
        .with_wait_for_connections(!matches.get_flag(ARG_POOL_NO_WAIT))
        .with_acquire_timeout(
            matches
                .get_one::<u64>(ARG_POOL_ACQUIRE_TIMEOUT)
                .map(|secs| Duration::from_secs(*secs)),
        )
        .with_idle_timeout(
            matches
                .get_one::<u64>(ARG_POOL_IDLE_TIMEOUT)
                .map(|secs| Duration::from_secs(*secs)),
        );

    config.validate()?;
    Ok(config)
}

fn storage(matches: &clap::ArgMatches) -> Result<Storage> {
    match matches.get_one::<String>(ARG_STORAGE).map(String::as_str) {
        None | Some("direct") => Ok(Storage::Direct),
        Some("delegated") => {
            let provider_url = matches
                .get_one::<String>(ARG_PROVIDER_URL)
                .context("missing required argument: --provider-url")?;
            let provider_url = Url::parse(provider_url).context("invalid AUTHGATE_PROVIDER_URL")?;
            let provider_key = matches
                .get_one::<String>(ARG_PROVIDER_KEY)
                .cloned()
                .map(SecretString::from)
                .context("missing required argument: --provider-key")?;
            Ok(Storage::Delegated {
                provider_url,
                provider_key,
            })
        }
        Some(other) => Err(anyhow!("unknown storage mode: {other}")),
    }
}
