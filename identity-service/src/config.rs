use anyhow::{anyhow, Context, Result};
use std::env;
use std::fs;

/// OAuth providers this deployment knows how to talk to.
pub const KNOWN_PROVIDERS: &[&str] = &["google", "github"];

/// Built-in fallback client credentials for a provider, used when a project
/// opts into shared-credentials mode instead of registering its own app.
#[derive(Debug, Clone)]
pub struct SharedClientKeys {
    pub client_id: String,
    pub client_secret: String,
}

/// Per-provider environment override, seeded into the stored provider config
/// at startup when present.
#[derive(Debug, Clone)]
pub struct ProviderOverride {
    pub provider: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Master passphrase for the secret cipher: `ENCRYPTION_KEY`, falling
    /// back to `JWT_SECRET`. One of the two must be set.
    pub master_passphrase: String,
    /// HS256 signing secret: `JWT_SECRET`, falling back to `ENCRYPTION_KEY`.
    pub jwt_secret: String,
    /// Optional seed for the reserved `API_KEY` secret (`ACCESS_API_KEY`).
    pub api_key_seed: Option<String>,
    /// Shared OAuth credentials keyed by provider name.
    pub shared_oauth: Vec<(String, SharedClientKeys)>,
    /// Direct per-provider overrides (`GOOGLE_CLIENT_ID`, ...).
    pub provider_overrides: Vec<ProviderOverride>,
    pub cors_origins: Vec<String>,
    /// Interval of the background expiry/retention sweeper.
    pub sweep_interval_seconds: u64,
    pub audit_retention_days: i64,
}

impl ServiceConfig {
    pub fn shared_keys_for(&self, provider: &str) -> Option<&SharedClientKeys> {
        self.shared_oauth
            .iter()
            .find(|(name, _)| name == provider)
            .map(|(_, keys)| keys)
    }
}

pub fn load_service_config() -> Result<ServiceConfig> {
    let encryption_key = read_secret_env("ENCRYPTION_KEY")?.and_then(normalize_optional);
    let jwt_secret_env = read_secret_env("JWT_SECRET")?.and_then(normalize_optional);

    let master_passphrase = encryption_key
        .clone()
        .or_else(|| jwt_secret_env.clone())
        .ok_or_else(|| anyhow!("Either ENCRYPTION_KEY or JWT_SECRET must be set"))?;
    let jwt_secret = jwt_secret_env
        .or(encryption_key)
        .expect("at least one secret slot resolved above");

    let api_key_seed = read_secret_env("ACCESS_API_KEY")?.and_then(normalize_optional);

    let mut shared_oauth = Vec::new();
    for provider in KNOWN_PROVIDERS {
        let prefix = provider.to_ascii_uppercase();
        let id = env::var(format!("INSFORGE_{prefix}_CLIENT_ID")).ok();
        let secret = read_secret_env(&format!("INSFORGE_{prefix}_CLIENT_SECRET"))?;
        if let (Some(client_id), Some(client_secret)) = (
            id.and_then(normalize_optional),
            secret.and_then(normalize_optional),
        ) {
            shared_oauth.push((
                provider.to_string(),
                SharedClientKeys {
                    client_id,
                    client_secret,
                },
            ));
        }
    }

    let mut provider_overrides = Vec::new();
    for provider in KNOWN_PROVIDERS {
        let prefix = provider.to_ascii_uppercase();
        let id = env::var(format!("{prefix}_CLIENT_ID")).ok();
        let secret = read_secret_env(&format!("{prefix}_CLIENT_SECRET"))?;
        let redirect_uri = env::var(format!("{prefix}_REDIRECT_URI"))
            .ok()
            .and_then(normalize_optional);
        if let (Some(client_id), Some(client_secret)) = (
            id.and_then(normalize_optional),
            secret.and_then(normalize_optional),
        ) {
            provider_overrides.push(ProviderOverride {
                provider: provider.to_string(),
                client_id,
                client_secret,
                redirect_uri,
            });
        }
    }

    let cors_origins = env::var("ALLOWED_ORIGINS")
        .ok()
        .map(|value| parse_origins(&value))
        .unwrap_or_else(default_origins);

    let sweep_interval_seconds = env::var("SWEEP_INTERVAL_SECONDS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(3600)
        .max(60);

    let audit_retention_days = env::var("AUDIT_RETENTION_DAYS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(common_audit::DEFAULT_RETENTION_DAYS)
        .max(1);

    Ok(ServiceConfig {
        master_passphrase,
        jwt_secret,
        api_key_seed,
        shared_oauth,
        provider_overrides,
        cors_origins,
        sweep_interval_seconds,
        audit_retention_days,
    })
}

/// Read a secret-bearing env slot, honoring the `<KEY>_FILE` indirection used
/// in container deployments.
pub fn read_secret_env(key: &str) -> Result<Option<String>> {
    let file_var = format!("{}_FILE", key);
    if let Ok(path) = env::var(&file_var) {
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {} from {}", file_var, path))?;
        return Ok(Some(contents.trim().to_string()));
    }
    Ok(env::var(key).ok())
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|item| normalize_optional(item.to_string()))
        .collect()
}

fn default_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
    ]
}

fn normalize_optional(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
