use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub ttl_minutes: i64,
    pub session_ttl_hours: i64,
    pub cookie_secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockoutConfig {
    pub max_attempts: u32,
    pub lockout_minutes: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    S3,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub upload_dir: String,
    pub public_base_url: String,
    pub minio_endpoint: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
}

/// Outbound mail relay for chat escalation emails.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl SmtpConfig {
    /// `None` when `SMTP_HOST` is unset; `SMTP_FROM` falls back to `SMTP_USER`.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Option<Self>> {
        let Some(host) = get("SMTP_HOST").map(|h| h.trim().to_string()).filter(|h| !h.is_empty())
        else {
            return Ok(None);
        };
        let port = match get("SMTP_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid SMTP_PORT {raw:?}"))?,
            None => 587,
        };
        let username = get("SMTP_USER").unwrap_or_default();
        let from = get("SMTP_FROM")
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| username.clone());
        if from.trim().is_empty() {
            anyhow::bail!("SMTP_FROM or SMTP_USER is required when SMTP_HOST is set");
        }
        Ok(Some(Self {
            host,
            port,
            username,
            password: get("SMTP_PASSWORD").unwrap_or_default(),
            from,
        }))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub lockout: LockoutConfig,
    pub storage: StorageConfig,
    pub chat_operator_email: String,
    pub smtp: Option<SmtpConfig>,
    pub cors_allowed_origins: Vec<String>,
    pub cors_allowed_origin_prefixes: Vec<String>,
    pub admin_seed_password: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "AuthService".into()),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 180),
            session_ttl_hours: env_parse("SESSION_TTL_HOURS", 24),
            cookie_secure: env_parse("COOKIE_SECURE", false),
        };
        let lockout = LockoutConfig {
            max_attempts: env_parse("LOGIN_MAX_ATTEMPTS", 5),
            lockout_minutes: env_parse("LOGIN_LOCKOUT_MINUTES", 15),
        };
        let backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".into())
            .to_lowercase()
            .as_str()
        {
            "s3" | "minio" => StorageBackend::S3,
            "local" => StorageBackend::Local,
            other => anyhow::bail!("unknown STORAGE_BACKEND {other:?}"),
        };
        let storage = StorageConfig {
            backend,
            upload_dir: std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".into()),
            public_base_url: std::env::var("PUBLIC_BASE_URL").unwrap_or_default(),
            minio_endpoint: std::env::var("MINIO_ENDPOINT").unwrap_or_default(),
            minio_bucket: std::env::var("MINIO_BUCKET").unwrap_or_default(),
            minio_access_key: std::env::var("MINIO_ACCESS_KEY").unwrap_or_default(),
            minio_secret_key: std::env::var("MINIO_SECRET_KEY").unwrap_or_default(),
        };
        Ok(Self {
            database_url,
            jwt,
            lockout,
            storage,
            chat_operator_email: std::env::var("CHAT_OPERATOR_EMAIL")
                .unwrap_or_else(|_| "operator@localhost".into()),
            smtp: SmtpConfig::from_lookup(|k| std::env::var(k).ok())?,
            cors_allowed_origins: env_list("CORS_ALLOWED_ORIGINS"),
            cors_allowed_origin_prefixes: env_list("CORS_ALLOWED_ORIGIN_PREFIXES"),
            admin_seed_password: std::env::var("ADMIN_SEED_PASSWORD")
                .ok()
                .filter(|v| !v.is_empty()),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|v| split_list(&v))
        .unwrap_or_default()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
