//! Integration tests for the OAuth connect flow

use libfanpost::accounts::AccountService;
use libfanpost::config::Config;
use libfanpost::db::Database;
use libfanpost::oauth::mock::MockTokenProvider;
use libfanpost::oauth::{
    code_challenge, CallbackErrorCode, CallbackParams, CompositeState, ConnectFlow, StateManager,
    TokenSet,
};
use libfanpost::platforms::mock::MockPlatformClient;
use libfanpost::platforms::PlatformClients;
use libfanpost::registry::Registry;
use libfanpost::types::{AccountStatus, Platform, PlatformProfile};
use std::sync::Arc;
use tempfile::TempDir;

const CONFIG: &str = r#"
[database]
path = "unused"

[oauth]
callback_url = "https://app.example/oauth/callback"
default_return_path = "/settings/accounts"

[platforms.instagram]
client_id = "ig-client"
client_secret = "ig-secret"

[platforms.twitter]
client_id = "tw-client"
client_secret = "tw-secret"
"#;

struct TestEnv {
    flow: ConnectFlow,
    states: StateManager,
    accounts: AccountService,
    provider: MockTokenProvider,
    _temp_dir: TempDir,
}

async fn setup_with_clients(clients: PlatformClients) -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("oauth.db");
    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
    let config = Config::from_toml(CONFIG).unwrap();

    let provider = MockTokenProvider::new();
    let states = StateManager::new(db.clone(), config.oauth.state_ttl_secs);
    let accounts = AccountService::new(db, Arc::new(provider.clone()), clients, 5);
    let flow = ConnectFlow::new(
        states.clone(),
        Arc::new(provider.clone()),
        accounts.clone(),
        Arc::new(Registry::from_config(&config)),
        config.oauth.clone(),
    );

    TestEnv {
        flow,
        states,
        accounts,
        provider,
        _temp_dir: temp_dir,
    }
}

async fn setup() -> TestEnv {
    let instagram_profile = PlatformProfile {
        platform_user_id: "17841400000".to_string(),
        username: Some("studio".to_string()),
        follower_count: Some(1200),
        ..Default::default()
    };
    let clients = PlatformClients::new()
        .with(Arc::new(MockPlatformClient::with_profile(
            Platform::Instagram,
            instagram_profile,
        )))
        .with(Arc::new(MockPlatformClient::success(Platform::Twitter)));
    setup_with_clients(clients).await
}

fn tokens(access: &str, refresh: Option<&str>) -> TokenSet {
    TokenSet {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        expires_at: Some(chrono::Utc::now().timestamp() + 3600),
        scope: None,
    }
}

fn callback(code: &str, state: &str) -> CallbackParams {
    CallbackParams {
        code: Some(code.to_string()),
        state: Some(state.to_string()),
        ..Default::default()
    }
}

fn query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
    let query = url.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then_some(value)
    })
}

#[tokio::test]
async fn test_instagram_connect_then_replay_creates_no_second_account() {
    let env = setup().await;

    let request = env
        .flow
        .start("user1", Platform::Instagram, Some("/dashboard"))
        .await
        .unwrap();
    assert!(request.url.starts_with("https://api.instagram.com/oauth/authorize?"));
    assert_eq!(query_param(&request.url, "client_id"), Some("ig-client"));
    assert!(
        query_param(&request.url, "code_challenge").is_none(),
        "Instagram does not take PKCE"
    );

    env.provider
        .issue_code(Platform::Instagram, "abc", tokens("ig-access", None));

    let redirect = env.flow.handle_callback(callback("abc", &request.state)).await;
    assert!(redirect.is_success(), "unexpected redirect: {}", redirect.location);
    assert!(redirect
        .location
        .starts_with("/dashboard?connected=instagram&message="));

    let account = redirect.account.unwrap();
    assert_eq!(account.platform_user_id, "17841400000");
    assert_eq!(account.username.as_deref(), Some("studio"));
    assert_eq!(account.follower_count, Some(1200));
    assert_eq!(account.status, AccountStatus::Connected);
    assert_eq!(account.access_token, "ig-access");

    // Replaying the same callback is rejected at the state check
    let replay = env.flow.handle_callback(callback("abc", &request.state)).await;
    assert_eq!(replay.error, Some(CallbackErrorCode::InvalidState));
    assert!(replay
        .location
        .starts_with("/dashboard?error=invalid_state&message="));
    assert_eq!(env.provider.exchange_calls(), 1, "code must not be redeemed twice");
    assert_eq!(env.accounts.list_accounts("user1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_used_code_with_fresh_state_fails_exchange() {
    let env = setup().await;
    let first = env
        .flow
        .start("user1", Platform::Instagram, None)
        .await
        .unwrap();
    let second = env
        .flow
        .start("user1", Platform::Instagram, None)
        .await
        .unwrap();

    env.provider
        .issue_code(Platform::Instagram, "abc", tokens("ig-access", None));
    let redirect = env.flow.handle_callback(callback("abc", &first.state)).await;
    assert!(redirect.is_success(), "unexpected redirect: {}", redirect.location);

    // A valid state does not make an already redeemed code usable again
    let reused = env.flow.handle_callback(callback("abc", &second.state)).await;
    assert_eq!(reused.error, Some(CallbackErrorCode::TokenExchangeFailed));
    assert!(reused
        .location
        .starts_with("/settings/accounts?error=token_exchange_failed"));
    assert_eq!(env.provider.exchange_calls(), 2);

    let accounts = env.accounts.list_accounts("user1").await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].access_token, "ig-access");
}

#[tokio::test]
async fn test_pkce_verifier_reaches_token_exchange() {
    let env = setup().await;

    let request = env
        .flow
        .start("user1", Platform::Twitter, None)
        .await
        .unwrap();
    let challenge = query_param(&request.url, "code_challenge").unwrap().to_string();
    assert_eq!(query_param(&request.url, "code_challenge_method"), Some("S256"));

    env.provider
        .issue_code(Platform::Twitter, "tw-code", tokens("tw-access", Some("tw-refresh")));
    let redirect = env.flow.handle_callback(callback("tw-code", &request.state)).await;
    assert!(redirect.is_success());
    assert!(redirect.location.starts_with("/settings/accounts?connected=twitter"));

    let verifiers = env.provider.received_verifiers();
    assert_eq!(verifiers.len(), 1);
    let verifier = verifiers[0].clone().expect("PKCE verifier must be sent");
    assert_eq!(code_challenge(&verifier), challenge);
}

#[tokio::test]
async fn test_state_validates_once_under_concurrency() {
    let env = setup().await;
    let issued = env
        .states
        .generate_state("user1", Platform::Twitter, "https://app/cb", &[], true)
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let states = env.states.clone();
            let token = issued.state_token.clone();
            tokio::spawn(async move { states.validate_state(&token, Platform::Twitter).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_expired_state_is_rejected_at_callback() {
    let env = setup().await;
    let long_ago = chrono::Utc::now().timestamp() - 3_600;
    let issued = env
        .states
        .generate_state_at(
            "user1",
            Platform::Instagram,
            "https://app.example/oauth/callback",
            &[],
            false,
            long_ago,
        )
        .await
        .unwrap();
    let state = CompositeState {
        state_token: issued.state_token,
        platform: Platform::Instagram,
        return_path: "/dashboard".to_string(),
    }
    .encode();

    env.provider
        .issue_code(Platform::Instagram, "abc", tokens("ig-access", None));
    let redirect = env.flow.handle_callback(callback("abc", &state)).await;

    assert_eq!(redirect.error, Some(CallbackErrorCode::InvalidState));
    assert_eq!(env.provider.exchange_calls(), 0);
}

#[tokio::test]
async fn test_state_for_other_platform_is_rejected() {
    let env = setup().await;
    let request = env
        .flow
        .start("user1", Platform::Instagram, None)
        .await
        .unwrap();

    let parsed = CompositeState::parse(&request.state).unwrap();
    let forged = CompositeState {
        platform: Platform::Twitter,
        ..parsed
    }
    .encode();

    let redirect = env.flow.handle_callback(callback("abc", &forged)).await;
    assert_eq!(redirect.error, Some(CallbackErrorCode::InvalidState));
}

#[tokio::test]
async fn test_provider_denial_redirects_without_exchange() {
    let env = setup().await;
    let request = env
        .flow
        .start("user1", Platform::Instagram, Some("/dashboard"))
        .await
        .unwrap();

    let redirect = env
        .flow
        .handle_callback(CallbackParams {
            state: Some(request.state),
            error: Some("access_denied".to_string()),
            error_description: Some("The user denied <script>".to_string()),
            ..Default::default()
        })
        .await;

    assert_eq!(redirect.error, Some(CallbackErrorCode::AccessDenied));
    assert!(redirect.location.starts_with("/dashboard?error=access_denied"));
    assert!(!redirect.location.contains("script"), "provider text must not be echoed");
    assert_eq!(env.provider.exchange_calls(), 0);
}

#[tokio::test]
async fn test_missing_parameters_and_garbage_state() {
    let env = setup().await;

    let missing = env
        .flow
        .handle_callback(CallbackParams {
            code: Some("abc".to_string()),
            ..Default::default()
        })
        .await;
    assert_eq!(missing.error, Some(CallbackErrorCode::MissingParameters));
    assert!(missing.location.starts_with("/settings/accounts?error=missing_parameters"));

    let garbage = env.flow.handle_callback(callback("abc", "not-a-state")).await;
    assert_eq!(garbage.error, Some(CallbackErrorCode::InvalidState));
}

#[tokio::test]
async fn test_absolute_return_path_falls_back_to_default() {
    let env = setup().await;
    let request = env
        .flow
        .start("user1", Platform::Instagram, Some("https://evil.example/steal"))
        .await
        .unwrap();
    assert_eq!(
        CompositeState::parse(&request.state).unwrap().return_path,
        "/settings/accounts"
    );

    env.provider
        .issue_code(Platform::Instagram, "abc", tokens("ig-access", None));
    let redirect = env.flow.handle_callback(callback("abc", &request.state)).await;
    assert!(redirect.location.starts_with("/settings/accounts?connected=instagram"));
}

#[tokio::test]
async fn test_failed_exchange_stores_nothing() {
    let env = setup().await;
    let request = env
        .flow
        .start("user1", Platform::Instagram, None)
        .await
        .unwrap();

    // No code issued: the provider rejects the grant
    let redirect = env.flow.handle_callback(callback("abc", &request.state)).await;
    assert_eq!(redirect.error, Some(CallbackErrorCode::TokenExchangeFailed));
    assert_eq!(env.provider.exchange_calls(), 1);
    assert!(env.accounts.list_accounts("user1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_profile_failure_stores_nothing() {
    let clients = PlatformClients::new()
        .with(Arc::new(MockPlatformClient::profile_failure(Platform::Instagram)));
    let env = setup_with_clients(clients).await;
    let request = env
        .flow
        .start("user1", Platform::Instagram, None)
        .await
        .unwrap();

    env.provider
        .issue_code(Platform::Instagram, "abc", tokens("ig-access", None));
    let redirect = env.flow.handle_callback(callback("abc", &request.state)).await;
    assert_eq!(redirect.error, Some(CallbackErrorCode::ProfileFetchFailed));
    assert!(env.accounts.list_accounts("user1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_start_without_credentials_issues_nothing() {
    let env = setup().await;
    let result = env.flow.start("user1", Platform::LinkedIn, None).await;
    assert!(result.is_err());
    assert_eq!(env.states.purge_expired(i64::MAX).await.unwrap(), 0);
}
