use anyhow::Context;
use std::env;

pub const DEFAULT_JWT_SECRET: &str = "SECRET_FOR_JWT_IS_SECRET";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub jwt_expiration_secs: i64,
    /// MySQL connection string. Without it the in-memory store is used.
    pub database_url: Option<String>,
    /// JSON snapshot file for the in-memory store.
    pub local_state_path: Option<String>,
    pub revocation_sweep_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            jwt_expiration_secs: 7 * 24 * 60 * 60,
            database_url: None,
            local_state_path: None,
            revocation_sweep_secs: 60,
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty(name) {
        Some(raw) => raw.trim().parse().with_context(|| format!("{name} is not valid: {raw}")),
        None => Ok(default),
    }
}

impl Config {
    /// Reads the environment; call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Config::default();
        Ok(Self {
            host: non_empty("BACKEND_HOST").unwrap_or(defaults.host),
            port: parsed("BACKEND_PORT", defaults.port)?,
            jwt_secret: non_empty("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            jwt_expiration_secs: parsed("JWT_EXPIRATION_SECS", defaults.jwt_expiration_secs)?,
            database_url: non_empty("DATABASE_URL"),
            local_state_path: non_empty("LOCAL_STATE_PATH"),
            revocation_sweep_secs: parsed("REVOCATION_SWEEP_SECS", defaults.revocation_sweep_secs)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
