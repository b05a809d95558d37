mod support;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use common_audit::AuditQuery;
use identity_service::oauth::ProviderConfigUpdate;
use identity_service::oauth_handlers::{callback, CallbackQuery};
use support::{build_state, TestDatabase};

fn full_update(client_id: &str, client_secret: &str) -> ProviderConfigUpdate {
    ProviderConfigUpdate {
        enabled: Some(true),
        client_id: Some(client_id.to_string()),
        client_secret: Some(client_secret.to_string()),
        redirect_uri: Some("https://app.example/callback".to_string()),
        use_shared_keys: Some(false),
    }
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres: embedded or external)"
)]
async fn provider_disabled_until_credentials_resolve() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let state = build_state(db.pool_clone());
    let broker = state.broker.clone();

    broker.reload().await.expect("initial reload");

    // No credentials stored: effectively disabled.
    let err = broker
        .begin_authorization("google", None)
        .expect_err("unconfigured provider rejected");
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

    // A config with an empty client id stays disabled.
    broker
        .update_provider("google", full_update("", "secret-1"))
        .await
        .expect("update succeeds");
    let err = broker
        .begin_authorization("google", None)
        .expect_err("empty client id stays disabled");
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

    // Full credentials flip it on after reload (update_provider reloads).
    broker
        .update_provider("google", full_update("client-123", "secret-1"))
        .await
        .expect("update succeeds");
    let auth_url = broker
        .begin_authorization("google", None)
        .expect("enabled provider authorizes");
    assert!(auth_url.starts_with("https://accounts.google.com/"));
    assert!(auth_url.contains("client_id=client-123"));

    // Unknown providers are a 404, not a 500.
    let err = broker
        .update_provider("gitlab", full_update("x", "y"))
        .await
        .expect_err("unknown provider rejected");
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

    db.teardown().await
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres: embedded or external)"
)]
async fn masked_secret_means_no_change() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let state = build_state(db.pool_clone());
    let broker = state.broker.clone();

    broker
        .update_provider("github", full_update("gh-client", "gh-secret"))
        .await
        .expect("initial config");
    assert!(broker.begin_authorization("github", None).is_ok());

    // An admin echoing the masked secret back must not clobber the real one.
    broker
        .update_provider(
            "github",
            ProviderConfigUpdate {
                client_secret: Some("********".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("masked update succeeds");
    assert!(
        broker.begin_authorization("github", None).is_ok(),
        "provider stayed enabled, so the stored secret survived"
    );

    // An explicitly empty secret does clear it.
    broker
        .update_provider(
            "github",
            ProviderConfigUpdate {
                client_secret: Some(String::new()),
                ..Default::default()
            },
        )
        .await
        .expect("clearing update succeeds");
    let err = broker
        .begin_authorization("github", None)
        .expect_err("cleared secret disables the provider");
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

    db.teardown().await
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres: embedded or external)"
)]
async fn concurrent_reloads_share_one_fetch() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let state = build_state(db.pool_clone());
    let broker = state.broker.clone();

    broker.reload().await.expect("initial reload");
    let before = broker.snapshot().generation;

    const CALLERS: usize = 8;
    let mut handles = Vec::new();
    for _ in 0..CALLERS {
        let broker = broker.clone();
        handles.push(tokio::spawn(async move { broker.reload().await }));
    }
    for handle in handles {
        handle.await?.expect("shared reload succeeds");
    }

    // Sharing means strictly fewer snapshot publications than callers.
    let delta = broker.snapshot().generation - before;
    assert!(delta >= 1);
    assert!((delta as usize) < CALLERS);

    // Sequential reloads are not coalesced.
    let before = broker.snapshot().generation;
    broker.reload().await.unwrap();
    broker.reload().await.unwrap();
    assert_eq!(broker.snapshot().generation - before, 2);

    db.teardown().await
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres: embedded or external)"
)]
async fn callback_with_invalid_state_fails_and_audits() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let state = build_state(db.pool_clone());
    state.broker.reload().await.expect("initial reload");

    let err = callback(
        State(state.clone()),
        Path("google".to_string()),
        HeaderMap::new(),
        Query(CallbackQuery {
            code: "code-from-provider".to_string(),
            state: "never-issued".to_string(),
        }),
    )
    .await
    .expect_err("bogus state rejected");
    assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

    // The failed exchange is a terminal state and leaves an audit record.
    let records = state
        .audit
        .query(&AuditQuery {
            actor: Some("system".to_string()),
            action: Some("OAUTH_LOGIN_FAILED".to_string()),
            limit: 10,
            ..Default::default()
        })
        .await?;
    assert!(!records.is_empty());

    db.teardown().await
}
