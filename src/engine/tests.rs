//! Engine behaviour in both storage modes.

use super::*;
use crate::pool::PoolConfig;
use crate::provider::{ExternalAccount, ExternalSession, ProviderError};
use crate::store::{MemoryAccountStore, UniqueField};
use crate::token::now_unix_seconds;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::{body::to_bytes, response::IntoResponse};
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;

const SECRET: &str = "test-signing-secret-with-enough-bytes";

fn hasher() -> Result<CredentialHasher> {
    Ok(CredentialHasher::new(crate::hasher::MIN_COST)?)
}

fn issuer() -> Result<TokenIssuer> {
    Ok(TokenIssuer::new(&SecretString::from(SECRET.to_string()))?)
}

fn store(config: PoolConfig) -> Result<Arc<MemoryAccountStore>> {
    Ok(Arc::new(MemoryAccountStore::new(config)?))
}

fn direct(store: &Arc<MemoryAccountStore>, mode: LoginResponseMode) -> Result<AuthEngine> {
    let strategy = StorageStrategy::DirectPool(Arc::clone(store) as Arc<dyn AccountStore>);
    Ok(AuthEngine::new(strategy, hasher()?, issuer()?, mode)?)
}

fn delegated(
    provider: &Arc<FakeProvider>,
    profiles: &Arc<MemoryAccountStore>,
    mode: LoginResponseMode,
) -> Result<AuthEngine> {
    let strategy = StorageStrategy::DelegatedProvider {
        provider: Arc::clone(provider) as Arc<dyn IdentityProvider>,
        profiles: Arc::clone(profiles) as Arc<dyn AccountStore>,
    };
    Ok(AuthEngine::new(strategy, hasher()?, issuer()?, mode)?)
}

fn signup(handle: &str, email: &str) -> SignupRequest {
    SignupRequest {
        name: Some("Alice Liddell".to_string()),
        handle: Some(handle.to_string()),
        email: Some(email.to_string()),
        password: Some("hunter22".to_string()),
    }
}

fn login_handle(handle: &str, password: &str) -> LoginRequest {
    LoginRequest {
        handle: Some(handle.to_string()),
        email: None,
        password: Some(password.to_string()),
    }
}

#[derive(Default)]
struct FakeProvider {
    accounts: Mutex<HashMap<String, (String, String)>>,
    rate_limited: AtomicBool,
    sign_ups: AtomicUsize,
}

impl FakeProvider {
    fn sign_ups(&self) -> usize {
        self.sign_ups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn delegate_sign_up(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<ExternalAccount, ProviderError> {
        self.sign_ups.fetch_add(1, Ordering::SeqCst);
        if self.rate_limited.load(Ordering::SeqCst) {
            return Err(ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(60)),
            });
        }
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|_| ProviderError::Unavailable("poisoned".to_string()))?;
        if accounts.contains_key(email) {
            return Err(ProviderError::AlreadyRegistered);
        }
        let id = format!("ext-{}", accounts.len() + 1);
        accounts.insert(
            email.to_string(),
            (id.clone(), password.expose_secret().to_string()),
        );
        Ok(ExternalAccount {
            id,
            email: email.to_string(),
        })
    }

    async fn delegate_sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<ExternalSession, ProviderError> {
        let accounts = self
            .accounts
            .lock()
            .map_err(|_| ProviderError::Unavailable("poisoned".to_string()))?;
        match accounts.get(email) {
            Some((id, stored)) if stored == password.expose_secret() => Ok(ExternalSession {
                account_id: id.clone(),
                access_token: SecretString::from("provider-token".to_string()),
                expires_in: Some(3600),
            }),
            _ => Err(ProviderError::Unauthorized),
        }
    }
}

#[tokio::test]
async fn register_direct_stores_a_hash_and_returns_summary() -> Result<()> {
    let store = store(PoolConfig::new())?;
    let engine = direct(&store, LoginResponseMode::Token)?;

    let summary = engine
        .register(signup(" alice ", "Alice@Example.com"))
        .await?;
    assert_eq!(summary.name, "Alice Liddell");
    assert_eq!(summary.handle, "alice");

    let stored = store
        .find_by_email("alice@example.com")
        .await?
        .ok_or_else(|| anyhow!("account not stored"))?;
    assert_eq!(stored.id.as_str(), summary.id);
    let hash = stored
        .password_hash
        .ok_or_else(|| anyhow!("hash missing"))?;
    assert_ne!(hash.as_str(), "hunter22");
    assert!(hasher()?.verify(&SecretString::from("hunter22".to_string()), &hash));
    Ok(())
}

#[tokio::test]
async fn short_handle_is_rejected_without_any_write() -> Result<()> {
    let store = store(PoolConfig::new())?;
    let engine = direct(&store, LoginResponseMode::Token)?;

    let result = engine.register(signup("ab", "ab@example.com")).await;
    match result {
        Err(AuthError::Validation(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].field, "handle");
        }
        other => return Err(anyhow!("expected validation error, got {other:?}")),
    }
    assert_eq!(store.writes(), 0);
    assert_eq!(store.pool_status().live, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_handles_yield_one_conflict() -> Result<()> {
    let store = store(PoolConfig::new().with_max_size(4))?;
    let engine = Arc::new(direct(&store, LoginResponseMode::Token)?);

    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.register(signup("alice", "one@example.com")).await }
    });
    let second = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.register(signup("alice", "two@example.com")).await }
    });

    let results = [first.await?, second.await?];
    let created = results.iter().filter(|result| result.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|result| matches!(result, Err(AuthError::Conflict(UniqueField::Handle))))
        .count();
    assert_eq!((created, conflicts), (1, 1));
    assert_eq!(store.account_count(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_of_two_serves_five_concurrent_signups() -> Result<()> {
    let store = Arc::new(
        MemoryAccountStore::new(PoolConfig::new().with_max_size(2))?
            .with_latency(Duration::from_millis(20)),
    );
    let engine = Arc::new(direct(&store, LoginResponseMode::Token)?);

    let mut tasks = Vec::new();
    for index in 0..5 {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            engine
                .register(signup(
                    &format!("user{index}"),
                    &format!("user{index}@example.com"),
                ))
                .await
        }));
    }
    for task in tasks {
        task.await??;
    }

    let status = store.pool_status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.waiting, 0);
    assert!(status.live <= 2);
    assert_eq!(store.account_count(), 5);
    Ok(())
}

#[tokio::test]
async fn unknown_handle_and_wrong_password_are_indistinguishable() -> Result<()> {
    let store = store(PoolConfig::new())?;
    let engine = direct(&store, LoginResponseMode::Token)?;
    engine.register(signup("alice", "alice@example.com")).await?;

    let unknown = engine
        .login(login_handle("nobody", "hunter22"))
        .await
        .err()
        .ok_or_else(|| anyhow!("unknown handle logged in"))?;
    let wrong = engine
        .login(login_handle("alice", "hunter23"))
        .await
        .err()
        .ok_or_else(|| anyhow!("wrong password logged in"))?;

    let unknown = unknown.into_response();
    let wrong = wrong.into_response();
    assert_eq!(unknown.status(), wrong.status());
    assert_eq!(unknown.status(), axum::http::StatusCode::UNAUTHORIZED);

    let unknown = to_bytes(unknown.into_body(), usize::MAX).await?;
    let wrong = to_bytes(wrong.into_body(), usize::MAX).await?;
    assert_eq!(unknown, wrong);
    Ok(())
}

#[tokio::test]
async fn token_login_yields_a_session_for_the_account() -> Result<()> {
    let store = store(PoolConfig::new())?;
    let engine = direct(&store, LoginResponseMode::Token)?;
    let created = engine.register(signup("alice", "alice@example.com")).await?;

    let LoginResponse::Token(token) = engine.login(login_handle("alice", "hunter22")).await?
    else {
        return Err(anyhow!("expected a token response"));
    };
    assert_eq!(token.token_type, "Bearer");
    assert_eq!(token.expires_in, 3600);

    assert_eq!(issuer()?.validate(&token.token)?.as_str(), created.id);
    assert_eq!(engine.session(&token.token).await?, created);
    Ok(())
}

#[tokio::test]
async fn summary_login_by_email() -> Result<()> {
    let store = store(PoolConfig::new())?;
    let engine = direct(&store, LoginResponseMode::Summary)?;
    let created = engine.register(signup("alice", "alice@example.com")).await?;

    let response = engine
        .login(LoginRequest {
            handle: None,
            email: Some("ALICE@example.com".to_string()),
            password: Some("hunter22".to_string()),
        })
        .await?;
    assert_eq!(response, LoginResponse::Summary(created));
    Ok(())
}

#[tokio::test]
async fn session_rejects_expired_and_forged_tokens() -> Result<()> {
    let store = store(PoolConfig::new())?;
    let engine = direct(&store, LoginResponseMode::Token)?;
    let created = engine.register(signup("alice", "alice@example.com")).await?;
    let account_id = AccountId::new(created.id);

    let stale = issuer()?.issue_at(&account_id, now_unix_seconds() - 7200)?;
    assert!(matches!(
        engine.session(&stale.token).await,
        Err(AuthError::TokenExpired)
    ));

    let forged = TokenIssuer::new(&SecretString::from(
        "another-signing-secret-of-decent-size".to_string(),
    ))?
    .issue(&account_id)?;
    assert!(matches!(
        engine.session(&forged.token).await,
        Err(AuthError::InvalidToken)
    ));
    Ok(())
}

#[tokio::test]
async fn profile_lookup() -> Result<()> {
    let store = store(PoolConfig::new())?;
    let engine = direct(&store, LoginResponseMode::Token)?;
    let created = engine.register(signup("alice", "alice@example.com")).await?;

    assert_eq!(engine.profile(&created.id).await?, created);
    assert!(matches!(
        engine.profile("00000000-0000-0000-0000-000000000000").await,
        Err(AuthError::NotFound)
    ));
    assert!(matches!(
        engine.profile("  ").await,
        Err(AuthError::Validation(_))
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_pool_surfaces_resource_timeout() -> Result<()> {
    let store = Arc::new(
        MemoryAccountStore::new(
            PoolConfig::new()
                .with_max_size(1)
                .with_acquire_timeout(Some(Duration::from_millis(20))),
        )?
        .with_latency(Duration::from_millis(200)),
    );
    let engine = Arc::new(direct(&store, LoginResponseMode::Summary)?);

    let slow = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.profile("first").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(
        engine.profile("second").await,
        Err(AuthError::ResourceTimeout)
    ));
    assert!(matches!(slow.await?, Err(AuthError::NotFound)));
    assert_eq!(store.pool_status().in_use, 0);
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_the_pool() -> Result<()> {
    let store = store(PoolConfig::new())?;
    let engine = direct(&store, LoginResponseMode::Token)?;
    engine.ping().await?;

    engine.shutdown().await;
    assert!(engine.pool_status().closed);
    assert!(matches!(engine.ping().await, Err(AuthError::Connectivity(_))));
    Ok(())
}

#[tokio::test]
async fn delegated_register_mirrors_profile_under_external_id() -> Result<()> {
    let provider = Arc::new(FakeProvider::default());
    let profiles = store(PoolConfig::new())?;
    let engine = delegated(&provider, &profiles, LoginResponseMode::Token)?;

    let summary = engine.register(signup("alice", "alice@example.com")).await?;
    assert_eq!(summary.id, "ext-1");

    let profile = profiles
        .find_by_id(&AccountId::new("ext-1".to_string()))
        .await?
        .ok_or_else(|| anyhow!("profile missing"))?;
    assert_eq!(profile.handle, "alice");
    assert!(profile.password_hash.is_none());
    Ok(())
}

#[tokio::test]
async fn delegated_login_by_handle_issues_token_for_external_id() -> Result<()> {
    let provider = Arc::new(FakeProvider::default());
    let profiles = store(PoolConfig::new())?;
    let engine = delegated(&provider, &profiles, LoginResponseMode::Token)?;
    engine.register(signup("alice", "alice@example.com")).await?;

    let LoginResponse::Token(token) = engine.login(login_handle("alice", "hunter22")).await?
    else {
        return Err(anyhow!("expected a token response"));
    };
    assert_eq!(issuer()?.validate(&token.token)?.as_str(), "ext-1");

    assert!(matches!(
        engine.login(login_handle("alice", "wrong-one")).await,
        Err(AuthError::InvalidCredentials)
    ));
    assert!(matches!(
        engine.login(login_handle("nobody", "hunter22")).await,
        Err(AuthError::InvalidCredentials)
    ));
    Ok(())
}

#[tokio::test]
async fn delegated_summary_login_reads_the_profile() -> Result<()> {
    let provider = Arc::new(FakeProvider::default());
    let profiles = store(PoolConfig::new())?;
    let engine = delegated(&provider, &profiles, LoginResponseMode::Summary)?;
    let created = engine.register(signup("alice", "alice@example.com")).await?;

    let response = engine
        .login(LoginRequest {
            handle: None,
            email: Some("alice@example.com".to_string()),
            password: Some("hunter22".to_string()),
        })
        .await?;
    assert_eq!(response, LoginResponse::Summary(created));
    Ok(())
}

#[tokio::test]
async fn failed_profile_write_reports_the_external_account() -> Result<()> {
    let provider = Arc::new(FakeProvider::default());
    let profiles = store(PoolConfig::new().with_max_size(1))?;
    profiles.fail_profile_writes(true);
    let engine = delegated(&provider, &profiles, LoginResponseMode::Token)?;

    let result = engine.register(signup("alice", "alice@example.com")).await;
    match result {
        Err(AuthError::ProfileWriteFailed { account_id }) => {
            assert_eq!(account_id.as_str(), "ext-1");
        }
        other => return Err(anyhow!("expected a profile write failure, got {other:?}")),
    }
    assert_eq!(provider.sign_ups(), 1);
    assert_eq!(profiles.pool_status().in_use, 0);
    Ok(())
}

#[tokio::test]
async fn delegated_conflict_is_caught_before_the_provider() -> Result<()> {
    let provider = Arc::new(FakeProvider::default());
    let profiles = store(PoolConfig::new())?;
    let engine = delegated(&provider, &profiles, LoginResponseMode::Token)?;
    engine.register(signup("alice", "alice@example.com")).await?;

    assert!(matches!(
        engine.register(signup("alice", "other@example.com")).await,
        Err(AuthError::Conflict(UniqueField::Handle))
    ));
    assert!(matches!(
        engine.register(signup("other", "alice@example.com")).await,
        Err(AuthError::Conflict(UniqueField::Email))
    ));
    assert_eq!(provider.sign_ups(), 1);
    Ok(())
}

#[tokio::test]
async fn provider_side_duplicate_is_an_email_conflict() -> Result<()> {
    let provider = Arc::new(FakeProvider::default());
    provider
        .accounts
        .lock()
        .map_err(|_| anyhow!("poisoned"))?
        .insert(
            "alice@example.com".to_string(),
            ("ext-9".to_string(), "hunter22".to_string()),
        );
    let profiles = store(PoolConfig::new())?;
    let engine = delegated(&provider, &profiles, LoginResponseMode::Token)?;

    assert!(matches!(
        engine.register(signup("alice", "alice@example.com")).await,
        Err(AuthError::Conflict(UniqueField::Email))
    ));
    assert_eq!(provider.sign_ups(), 1);
    assert_eq!(profiles.writes(), 0);
    assert_eq!(profiles.account_count(), 0);
    Ok(())
}

#[tokio::test]
async fn delegated_rate_limit_passes_retry_after_through() -> Result<()> {
    let provider = Arc::new(FakeProvider::default());
    provider.rate_limited.store(true, Ordering::SeqCst);
    let profiles = store(PoolConfig::new())?;
    let engine = delegated(&provider, &profiles, LoginResponseMode::Token)?;

    let result = engine.register(signup("alice", "alice@example.com")).await;
    assert!(matches!(
        result,
        Err(AuthError::RateLimited { retry_after: Some(after) }) if after == Duration::from_secs(60)
    ));
    assert_eq!(profiles.writes(), 0);
    Ok(())
}

#[test]
fn login_response_mode_parses() {
    assert_eq!("token".parse::<LoginResponseMode>(), Ok(LoginResponseMode::Token));
    assert_eq!(
        " Summary ".parse::<LoginResponseMode>(),
        Ok(LoginResponseMode::Summary)
    );
    assert!("cookie".parse::<LoginResponseMode>().is_err());
}
