mod support;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Duration, Utc};
use common_audit::AuditQuery;
use common_auth::{AdminContext, AuthContext, Role, SubjectType};
use identity_service::user_handlers::{
    admin_sign_in, bulk_delete_users, create_session, list_users, me, register_admin,
    register_user, BulkDeleteRequest, CreateSessionRequest, ListUsersQuery, RegisterUserRequest,
};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use support::{build_state, unique_email, TestDatabase};
use uuid::Uuid;

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    headers
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres: embedded or external)"
)]
async fn register_then_login() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let state = build_state(db.pool_clone());
    let email = unique_email("register");

    let (status, Json(registered)) = register_user(
        State(state.clone()),
        HeaderMap::new(),
        Json(RegisterUserRequest {
            email: email.clone(),
            password: "hunter2x".to_string(),
            name: Some("Test User".to_string()),
        }),
    )
    .await
    .expect("registration succeeds");
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(registered.user.email, email);

    // The registration itself is audited.
    let records = state
        .audit
        .query(&AuditQuery {
            actor: Some(email.clone()),
            action: Some("REGISTER_USER".to_string()),
            limit: 10,
            ..Default::default()
        })
        .await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].module, "AUTH");

    let Json(session) = create_session(
        State(state.clone()),
        Json(CreateSessionRequest {
            email: email.clone(),
            password: "hunter2x".to_string(),
        }),
    )
    .await
    .expect("login succeeds");

    let claims = state.tokens.verify(&session.access_token)?;
    assert_eq!(claims.subject, registered.user.id);
    assert_eq!(claims.role, Role::Authenticated);
    assert_eq!(claims.subject_type, SubjectType::User);

    db.teardown().await
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres: embedded or external)"
)]
async fn duplicate_email_conflicts() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let state = build_state(db.pool_clone());
    let email = unique_email("dup");

    let request = || RegisterUserRequest {
        email: email.clone(),
        password: "hunter2x".to_string(),
        name: None,
    };
    register_user(State(state.clone()), HeaderMap::new(), Json(request()))
        .await
        .expect("first registration succeeds");

    let err = register_user(State(state.clone()), HeaderMap::new(), Json(request()))
        .await
        .expect_err("second registration conflicts");
    assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

    // Email uniqueness is case-insensitive.
    let err = register_user(
        State(state.clone()),
        HeaderMap::new(),
        Json(RegisterUserRequest {
            email: email.to_uppercase(),
            password: "hunter2x".to_string(),
            name: None,
        }),
    )
    .await
    .expect_err("case-folded email conflicts");
    assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

    db.teardown().await
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres: embedded or external)"
)]
async fn wrong_password_is_unauthorized_and_unaudited() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let state = build_state(db.pool_clone());
    let email = unique_email("wrongpw");

    register_user(
        State(state.clone()),
        HeaderMap::new(),
        Json(RegisterUserRequest {
            email: email.clone(),
            password: "hunter2x".to_string(),
            name: None,
        }),
    )
    .await
    .expect("registration succeeds");

    for candidate in ["nope-nope", "hunter2y"] {
        let err = create_session(
            State(state.clone()),
            Json(CreateSessionRequest {
                email: email.clone(),
                password: candidate.to_string(),
            }),
        )
        .await
        .expect_err("login rejected");
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    // An unknown email looks exactly the same from the outside.
    let err = create_session(
        State(state.clone()),
        Json(CreateSessionRequest {
            email: unique_email("ghost"),
            password: "whatever1".to_string(),
        }),
    )
    .await
    .expect_err("unknown email rejected");
    assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);

    // Failed logins leave no audit trail.
    let records = state
        .audit
        .query(&AuditQuery {
            actor: Some(email),
            limit: 50,
            ..Default::default()
        })
        .await?;
    assert!(records.iter().all(|r| r.action == "REGISTER_USER"));

    db.teardown().await
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres: embedded or external)"
)]
async fn me_resolves_jwt_and_opaque_session_tokens() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let state = build_state(db.pool_clone());
    let email = unique_email("me");

    let (_, Json(registered)) = register_user(
        State(state.clone()),
        HeaderMap::new(),
        Json(RegisterUserRequest {
            email: email.clone(),
            password: "hunter2x".to_string(),
            name: None,
        }),
    )
    .await
    .expect("registration succeeds");

    // JWT path.
    let Json(identity) = me(State(state.clone()), bearer(&registered.access_token))
        .await
        .expect("jwt identity resolves");
    assert_eq!(identity.id, registered.user.id);
    assert_eq!(identity.subject_type, "user");
    assert_eq!(identity.role, "authenticated");

    // Opaque session token path: stored as a SHA-256 digest by the session
    // collaborator.
    let opaque = format!("sess-{}", Uuid::new_v4().simple());
    seed_session(&db.pool_clone(), registered.user.id, &opaque).await?;
    let Json(identity) = me(State(state.clone()), bearer(&opaque))
        .await
        .expect("opaque identity resolves");
    assert_eq!(identity.id, registered.user.id);
    assert_eq!(identity.email, email);

    // Garbage fails closed.
    let err = me(State(state.clone()), bearer("not-a-real-token"))
        .await
        .expect_err("unknown bearer rejected");
    assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);

    db.teardown().await
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres: embedded or external)"
)]
async fn admin_registration_is_gated_once_bootstrapped() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let state = build_state(db.pool_clone());
    let first_admin = unique_email("admin");

    // Guarantee at least one admin so the gate is active.
    state
        .authenticator
        .register_admin(&first_admin, "admin-pass-1", Some("Root"))
        .await
        .expect("seed admin");

    let err = register_admin(
        State(state.clone()),
        HeaderMap::new(),
        Json(RegisterUserRequest {
            email: unique_email("admin2"),
            password: "admin-pass-2".to_string(),
            name: None,
        }),
    )
    .await
    .expect_err("unauthenticated admin registration rejected");
    assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);

    let Json(signed_in) = admin_sign_in(
        State(state.clone()),
        Json(CreateSessionRequest {
            email: first_admin.clone(),
            password: "admin-pass-1".to_string(),
        }),
    )
    .await
    .expect("admin sign-in succeeds");

    let claims = state.tokens.verify(&signed_in.access_token)?;
    assert_eq!(claims.role, Role::ProjectAdmin);
    assert_eq!(claims.subject_type, SubjectType::Admin);

    let (status, _) = register_admin(
        State(state.clone()),
        bearer(&signed_in.access_token),
        Json(RegisterUserRequest {
            email: unique_email("admin3"),
            password: "admin-pass-3".to_string(),
            name: None,
        }),
    )
    .await
    .expect("admin-authenticated registration succeeds");
    assert_eq!(status, StatusCode::CREATED);

    db.teardown().await
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres: embedded or external)"
)]
async fn bulk_delete_cascades_and_audits_per_user() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let state = build_state(db.pool_clone());
    let admin_email = unique_email("deleter");

    let admin = state
        .authenticator
        .register_admin(&admin_email, "admin-pass-1", None)
        .await
        .expect("seed admin");
    let token = state
        .tokens
        .issue(&common_auth::TokenSubject::admin(admin.id, admin.email.clone()))
        .unwrap();
    let admin_ctx = AdminContext(AuthContext {
        claims: state.tokens.verify(&token)?,
        token: token.clone(),
    });

    let mut ids = Vec::new();
    for tag in ["victim-a", "victim-b"] {
        let (_, Json(resp)) = register_user(
            State(state.clone()),
            HeaderMap::new(),
            Json(RegisterUserRequest {
                email: unique_email(tag),
                password: "hunter2x".to_string(),
                name: None,
            }),
        )
        .await
        .expect("registration succeeds");
        ids.push(resp.user.id);
    }

    // The payload also names a ghost id and repeats a real one; neither
    // matches a row at delete time, so neither may be audited as a deletion.
    let mut requested = ids.clone();
    requested.push(Uuid::new_v4());
    requested.push(ids[0]);

    let Json(result) = bulk_delete_users(
        State(state.clone()),
        admin_ctx.clone(),
        HeaderMap::new(),
        Json(BulkDeleteRequest {
            user_ids: requested,
        }),
    )
    .await
    .expect("bulk delete succeeds");
    assert_eq!(result["deleted"], 2);

    // Deleted users are gone from the listing.
    let Json(page) = list_users(
        State(state.clone()),
        admin_ctx,
        Query(ListUsersQuery {
            limit: Some(200),
            offset: Some(0),
        }),
    )
    .await
    .expect("listing succeeds");
    assert!(page.users.iter().all(|user| !ids.contains(&user.id)));

    // One DELETE_USER record per deleted user, newest first, actor = caller.
    let records = state
        .audit
        .query(&AuditQuery {
            actor: Some(admin_email.clone()),
            action: Some("DELETE_USER".to_string()),
            module: Some("AUTH".to_string()),
            limit: 10,
            ..Default::default()
        })
        .await?;
    assert_eq!(records.len(), 2);
    assert!(records[0].created_at >= records[1].created_at);
    assert!(records.iter().all(|r| r.actor == admin_email));

    db.teardown().await
}

async fn seed_session(pool: &PgPool, user_id: Uuid, token: &str) -> Result<()> {
    let token_hash = hex::encode(Sha256::digest(token.as_bytes()));
    sqlx::query(
        "INSERT INTO sessions (id, user_id, token_hash, created_at, expires_at)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(token_hash)
    .bind(Utc::now())
    .bind(Utc::now() + Duration::days(1))
    .execute(pool)
    .await?;
    Ok(())
}
