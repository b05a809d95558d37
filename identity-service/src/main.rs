use anyhow::{anyhow, Context};
use axum::{
    extract::State,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, StatusCode,
    },
    response::Response,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use common_audit::AuditWriter;
use common_auth::{AdminContext, TokenIssuer};
use common_crypto::SecretCipher;
use reqwest::Client;
use sqlx::PgPool;
use std::{env, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    time::{interval, MissedTickBehavior},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use identity_service::audit_handlers::{audit_stats, query_audit};
use identity_service::config::{load_service_config, ServiceConfig};
use identity_service::metrics::IdentityMetrics;
use identity_service::oauth::OAuthBroker;
use identity_service::oauth_handlers::{
    authorize, callback, list_providers, reload_providers, update_provider,
};
use identity_service::secret_handlers::{
    create_secret, delete_function_secret, delete_secret, function_runtime_env,
    list_function_secrets, list_secrets, rotate_secret, set_function_secret, update_secret,
};
use identity_service::secrets::{FunctionSecretStore, SecretStore};
use identity_service::sessions::PgSessionStore;
use identity_service::user_handlers::{
    admin_sign_in, bulk_delete_users, create_session, list_users, me, register_admin,
    register_user,
};
use identity_service::users::Authenticator;
use identity_service::AppState;

async fn health() -> &'static str {
    "ok"
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(resp) => resp,
        Err(err) => {
            warn!(?err, "Failed to render metrics");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
                .body(axum::body::Body::from("metrics unavailable"))
                .expect("failed to build metrics response")
        }
    }
}

async fn list_log_sources(_admin: AdminContext) -> Json<Vec<serde_json::Value>> {
    let sources = identity_service::log_sources::sources()
        .iter()
        .map(|source| {
            serde_json::json!({
                "name": source.display_name,
                "token": source.token,
            })
        })
        .collect();
    Json(sources)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        )
        .init();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db_pool = PgPool::connect(&database_url).await?;

    let config = Arc::new(load_service_config()?);
    info!(
        origins = config.cors_origins.len(),
        shared_providers = config.shared_oauth.len(),
        "Loaded identity-service configuration"
    );

    let cipher = Arc::new(SecretCipher::from_passphrase(&config.master_passphrase));
    let tokens = Arc::new(TokenIssuer::new(&config.jwt_secret));

    let http_client = Client::builder()
        .connect_timeout(Duration::from_secs(2))
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let secrets = SecretStore::new(db_pool.clone(), cipher.clone());
    let function_secrets = FunctionSecretStore::new(db_pool.clone(), cipher.clone());
    let authenticator = Authenticator::new(db_pool.clone());
    let audit = AuditWriter::new(db_pool.clone());
    let sessions = Arc::new(PgSessionStore::new(db_pool.clone()));

    secrets
        .initialize_api_key(config.api_key_seed.as_deref())
        .await
        .map_err(|err| anyhow!("Failed to initialize API key: {err:?}"))?;
    info!("API key secret initialised");

    let broker = Arc::new(OAuthBroker::new(
        db_pool.clone(),
        cipher.clone(),
        http_client,
        config.shared_oauth.clone(),
    ));
    broker
        .seed_overrides(&config.provider_overrides)
        .await
        .map_err(|err| anyhow!("Failed to seed OAuth providers: {err:?}"))?;
    broker
        .reload()
        .await
        .map_err(|err| anyhow!("Failed to load OAuth provider snapshot: {err:?}"))?;

    let state = AppState {
        db: db_pool,
        config: config.clone(),
        cipher,
        secrets,
        function_secrets,
        authenticator,
        broker,
        tokens,
        sessions,
        audit,
        metrics: Arc::new(IdentityMetrics::new()?),
    };

    spawn_sweeper(state.clone(), config.clone());

    let cors = build_cors(&config);

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/auth/users", post(register_user))
        .route("/auth/sessions", post(create_session))
        .route("/admin/register", post(register_admin))
        .route("/admin/sign-in", post(admin_sign_in))
        .route("/me", get(me))
        .route("/admin/users", get(list_users))
        .route("/admin/users/bulk-delete", delete(bulk_delete_users))
        .route("/auth/oauth/reload", post(reload_providers))
        .route("/auth/oauth/:provider", get(authorize))
        .route("/auth/oauth/:provider/callback", get(callback))
        .route("/admin/oauth/providers", get(list_providers))
        .route("/admin/oauth/providers/:provider", put(update_provider))
        .route("/admin/secrets", get(list_secrets).post(create_secret))
        .route(
            "/admin/secrets/:id",
            patch(update_secret).delete(delete_secret),
        )
        .route("/admin/secrets/:id/rotate", post(rotate_secret))
        .route(
            "/admin/function-secrets",
            get(list_function_secrets).post(set_function_secret),
        )
        .route(
            "/admin/function-secrets/:key",
            delete(delete_function_secret),
        )
        .route("/functions/env", get(function_runtime_env))
        .route("/admin/audit", get(query_audit))
        .route("/admin/audit/stats", get(audit_stats))
        .route("/admin/logs/sources", get(list_log_sources))
        .with_state(state)
        .layer(cors);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(7130);
    let ip: std::net::IpAddr = host.parse()?;
    let addr = SocketAddr::from((ip, port));

    info!(%addr, "starting identity-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_cors(config: &ServiceConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-api-key"),
        ])
        .allow_credentials(true)
}

/// Periodic sweep: expired secret rows and audit records past retention.
fn spawn_sweeper(state: AppState, config: Arc<ServiceConfig>) {
    let period = Duration::from_secs(config.sweep_interval_seconds);
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            match state.secrets.cleanup_expired().await {
                Ok(0) => {}
                Ok(count) => info!(count, "removed expired secret rows"),
                Err(err) => warn!(error = ?err, "secret expiry sweep failed"),
            }

            match state.audit.cleanup(config.audit_retention_days).await {
                Ok(0) => {}
                Ok(count) => info!(count, "removed audit records past retention"),
                Err(err) => warn!(error = %err, "audit retention sweep failed"),
            }
        }
    });
}
