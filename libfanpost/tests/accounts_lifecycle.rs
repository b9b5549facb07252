//! Integration tests for connected account refresh, sync and disconnect

use libfanpost::accounts::{AccountService, AccountUpsert};
use libfanpost::db::Database;
use libfanpost::error::FanpostError;
use libfanpost::oauth::mock::MockTokenProvider;
use libfanpost::oauth::TokenSet;
use libfanpost::platforms::mock::MockPlatformClient;
use libfanpost::platforms::PlatformClients;
use libfanpost::types::{AccountStatus, ConnectedAccount, Platform, PlatformProfile};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn setup_with(
    provider: MockTokenProvider,
    clients: PlatformClients,
) -> (AccountService, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("accounts.db");
    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
    (
        AccountService::new(db, Arc::new(provider), clients, 3),
        temp_dir,
    )
}

async fn setup(provider: MockTokenProvider) -> (AccountService, TempDir) {
    let clients = PlatformClients::new()
        .with(Arc::new(MockPlatformClient::success(Platform::Twitter)));
    setup_with(provider, clients).await
}

async fn connect(
    service: &AccountService,
    access: &str,
    refresh: Option<&str>,
    expires_at: Option<i64>,
) -> ConnectedAccount {
    service
        .upsert(&AccountUpsert {
            user_id: "user1".to_string(),
            platform: Platform::Twitter,
            tokens: TokenSet {
                access_token: access.to_string(),
                refresh_token: refresh.map(str::to_string),
                expires_at,
                scope: None,
            },
            scopes: vec!["tweet.write".to_string()],
            profile: PlatformProfile {
                platform_user_id: "42".to_string(),
                username: Some("alice".to_string()),
                ..Default::default()
            },
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_revoked_refresh_token_flips_account_to_error() {
    let provider = MockTokenProvider::new();
    let (service, _dir) = setup(provider.clone()).await;
    let account = connect(&service, "a0", Some("r0"), Some(1)).await;

    // r0 was never allowed, so the provider treats it as revoked
    let result = service.refresh_token(&account.id).await;
    assert!(matches!(result, Err(FanpostError::TokenExchange(_))));

    let stored = service.get(&account.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Error);
    assert_eq!(stored.error_count, 1);
    assert!(stored.last_error.unwrap().contains("invalid_grant"));
    assert_eq!(stored.access_token, "a0");
    assert_eq!(stored.refresh_token.as_deref(), Some("r0"));
    assert_eq!(stored.token_expires_at, Some(1));
}

#[tokio::test]
async fn test_refresh_keeps_previous_refresh_token_when_not_rotated() {
    let provider = MockTokenProvider::new();
    provider.allow_refresh("r0");
    let (service, _dir) = setup(provider.clone()).await;
    let account = connect(&service, "a0", Some("r0"), Some(1)).await;

    let refreshed = service.refresh_token(&account.id).await.unwrap();
    assert_eq!(refreshed.access_token, "access-1");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("r0"));
    assert!(refreshed.token_expires_at.unwrap() > chrono::Utc::now().timestamp());
}

#[tokio::test]
async fn test_concurrent_refreshes_are_serialized_for_rotating_providers() {
    let provider = MockTokenProvider::rotating().with_delay(Duration::from_millis(50));
    provider.allow_refresh("r0");
    let (service, _dir) = setup(provider.clone()).await;
    let account = connect(&service, "a0", Some("r0"), Some(1)).await;

    let (first, second) = tokio::join!(
        service.refresh_token(&account.id),
        service.refresh_token(&account.id)
    );

    // Without serialization the second call would present the rotated-out r0
    assert!(first.is_ok(), "first refresh failed: {:?}", first.err());
    assert!(second.is_ok(), "second refresh failed: {:?}", second.err());
    assert_eq!(provider.refresh_calls(), 2);

    let stored = service.get(&account.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Connected);
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn test_concurrent_ensure_fresh_token_refreshes_once() {
    let provider = MockTokenProvider::new().with_delay(Duration::from_millis(50));
    provider.allow_refresh("r0");
    let (service, _dir) = setup(provider.clone()).await;
    let account = connect(&service, "a0", Some("r0"), Some(1)).await;

    let (first, second) = tokio::join!(
        service.ensure_fresh_token(&account, 60),
        service.ensure_fresh_token(&account, 60)
    );
    assert_eq!(first.unwrap().access_token, "access-1");
    assert_eq!(second.unwrap().access_token, "access-1");
    assert_eq!(provider.refresh_calls(), 1);
}

#[tokio::test]
async fn test_reconnect_resets_error_bookkeeping() {
    let (service, _dir) = setup(MockTokenProvider::new()).await;
    let account = connect(&service, "a0", Some("dead"), Some(1)).await;

    for _ in 0..3 {
        assert!(service.refresh_token(&account.id).await.is_err());
    }
    let broken = service.get(&account.id).await.unwrap().unwrap();
    assert!(service.requires_reconnect(&broken));

    // Connecting the same platform user again updates the existing row
    let reconnected = connect(&service, "a1", None, None).await;
    assert_eq!(reconnected.id, account.id);
    assert_eq!(reconnected.status, AccountStatus::Connected);
    assert_eq!(reconnected.error_count, 0);
    assert!(reconnected.last_error.is_none());
    assert_eq!(reconnected.refresh_token.as_deref(), Some("dead"));
}

#[tokio::test]
async fn test_sync_profile_updates_snapshot() {
    let profile = PlatformProfile {
        platform_user_id: "42".to_string(),
        username: Some("alice_renamed".to_string()),
        display_name: Some("Alice".to_string()),
        follower_count: Some(99),
        following_count: Some(7),
        ..Default::default()
    };
    let clients = PlatformClients::new()
        .with(Arc::new(MockPlatformClient::with_profile(Platform::Twitter, profile)));
    let (service, _dir) = setup_with(MockTokenProvider::new(), clients).await;
    let account = connect(&service, "a0", None, None).await;

    let synced = service.sync_profile(&account.id).await.unwrap();
    assert_eq!(synced.username.as_deref(), Some("alice_renamed"));
    assert_eq!(synced.follower_count, Some(99));
    assert_eq!(synced.following_count, Some(7));
    assert!(synced.last_synced_at.is_some());
}

#[tokio::test]
async fn test_sync_profile_failure_keeps_account() {
    let clients = PlatformClients::new()
        .with(Arc::new(MockPlatformClient::profile_failure(Platform::Twitter)));
    let (service, _dir) = setup_with(MockTokenProvider::new(), clients).await;
    let account = connect(&service, "a0", None, None).await;

    assert!(matches!(
        service.sync_profile(&account.id).await,
        Err(FanpostError::ProfileFetch(_))
    ));
    let stored = service.get(&account.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Error);
    assert_eq!(stored.error_count, 1);
    assert_eq!(stored.username.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_disconnect_removes_account_from_dispatch_lookup() {
    let (service, _dir) = setup(MockTokenProvider::new()).await;
    let account = connect(&service, "a0", None, None).await;
    assert!(service
        .find_for_dispatch("user1", Platform::Twitter)
        .await
        .unwrap()
        .is_some());

    assert!(service.disconnect(&account.id).await.unwrap());
    assert!(service
        .find_for_dispatch("user1", Platform::Twitter)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_refresh_race_between_processes_keeps_winning_tokens() {
    let provider = MockTokenProvider::rotating().with_delay(Duration::from_millis(50));
    provider.allow_refresh("r0");
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("shared.db");

    // Two services with their own pools stand in for two processes
    let mut services = Vec::new();
    for _ in 0..2 {
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        let clients = PlatformClients::new()
            .with(Arc::new(MockPlatformClient::success(Platform::Twitter)));
        services.push(AccountService::new(db, Arc::new(provider.clone()), clients, 3));
    }
    let account = connect(&services[0], "a0", Some("r0"), Some(1)).await;

    let (first, second) = tokio::join!(
        services[0].refresh_token(&account.id),
        services[1].refresh_token(&account.id)
    );
    assert_eq!(provider.refresh_calls(), 2);
    assert!(first.is_ok() || second.is_ok());

    let stored = services[1].get(&account.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Connected);
    assert_eq!(stored.error_count, 0);
    assert!(stored.last_error.is_none());
    assert_ne!(stored.access_token, "a0");
    assert!(stored.refresh_token.unwrap().starts_with("refresh-"));
    assert!(services[0]
        .find_for_dispatch("user1", Platform::Twitter)
        .await
        .unwrap()
        .is_some());
}
