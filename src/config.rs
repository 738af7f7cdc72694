use base64::{engine::general_purpose, Engine as _};
use std::path::PathBuf;

pub const MIN_SESSION_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} missing")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Runtime settings, read once at startup.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_addr: String,
    pub session_key: Vec<u8>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub export_dir: PathBuf,
    pub public_base_url: String,
    pub secure_cookies: bool,
    pub allow_signup: bool,
    /// Honour `X-Forwarded-For` for rate limiting; only behind a proxy that overwrites it.
    pub trust_proxy: bool,
    pub expose_reset_tokens: bool,
    pub reset_token_ttl_minutes: i64,
    pub seed_admin: Option<(String, String)>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("database_max_connections", &self.database_max_connections)
            .field("openai", &self.openai_api_key.is_some())
            .field("openai_model", &self.openai_model)
            .field("export_dir", &self.export_dir)
            .field("public_base_url", &self.public_base_url)
            .field("secure_cookies", &self.secure_cookies)
            .field("allow_signup", &self.allow_signup)
            .field("trust_proxy", &self.trust_proxy)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let session_key_b64 = get("SESSION_KEY").ok_or(ConfigError::Missing("SESSION_KEY"))?;
        let session_key = general_purpose::STANDARD
            .decode(session_key_b64)
            .map_err(|e| ConfigError::Invalid {
                name: "SESSION_KEY",
                reason: format!("must be base64: {e}"),
            })?;
        if session_key.len() < MIN_SESSION_KEY_LEN {
            return Err(ConfigError::Invalid {
                name: "SESSION_KEY",
                reason: format!("must decode to at least {MIN_SESSION_KEY_LEN} bytes"),
            });
        }

        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| {
            let port = get("PORT").unwrap_or_else(|| "3000".to_string());
            format!("0.0.0.0:{}", port)
        });

        let database_max_connections = parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10u32)?;
        let reset_token_ttl_minutes = parse_or(&get, "RESET_TOKEN_TTL_MINUTES", 60i64)?;
        if reset_token_ttl_minutes <= 0 {
            return Err(ConfigError::Invalid {
                name: "RESET_TOKEN_TTL_MINUTES",
                reason: "must be positive".into(),
            });
        }

        let production = flag(&get, "PRODUCTION", false)?;
        let secure_cookies = flag(&get, "SECURE_COOKIES", production)?;

        let seed_admin = match (get("SEED_ADMIN_EMAIL"), get("SEED_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some((email, password)),
            _ => None,
        };

        Ok(Self {
            database_url,
            database_max_connections,
            bind_addr,
            session_key,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            export_dir: PathBuf::from(get("EXPORT_DIR").unwrap_or_else(|| "./exports".to_string())),
            public_base_url: get("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            secure_cookies,
            allow_signup: flag(&get, "ALLOW_SIGNUP", true)?,
            trust_proxy: flag(&get, "TRUST_PROXY", false)?,
            expose_reset_tokens: flag(&get, "EXPOSE_RESET_TOKENS", false)?,
            reset_token_ttl_minutes,
            seed_admin,
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

fn flag<G>(get: &G, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                reason: format!("expected a boolean, got {v:?}"),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn key() -> String {
        general_purpose::STANDARD.encode([7u8; 32])
    }

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&[("DATABASE_URL", "postgres://x"), ("SESSION_KEY", &key())]).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:3000");
        assert_eq!(cfg.database_max_connections, 10);
        assert_eq!(cfg.openai_model, "gpt-4o-mini");
        assert_eq!(cfg.public_base_url, "http://localhost:3000");
        assert!(cfg.allow_signup);
        assert!(!cfg.secure_cookies);
        assert!(!cfg.expose_reset_tokens);
        assert_eq!(cfg.reset_token_ttl_minutes, 60);
        assert!(cfg.seed_admin.is_none());
        assert!(cfg.openai_api_key.is_none());
    }

    #[test]
    fn port_and_production_flags() {
        let cfg = load(&[
            ("DATABASE_URL", "postgres://x"),
            ("SESSION_KEY", &key()),
            ("PORT", "8080"),
            ("PRODUCTION", "true"),
            ("PUBLIC_BASE_URL", "https://crm.example.com/"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert!(cfg.secure_cookies);
        assert_eq!(cfg.public_base_url, "https://crm.example.com");
        assert!(!cfg.trust_proxy);
    }

    #[test]
    fn rejects_short_or_missing_key() {
        assert!(matches!(
            load(&[("DATABASE_URL", "postgres://x")]),
            Err(ConfigError::Missing("SESSION_KEY"))
        ));
        let short = general_purpose::STANDARD.encode([1u8; 8]);
        assert!(matches!(
            load(&[("DATABASE_URL", "postgres://x"), ("SESSION_KEY", &short)]),
            Err(ConfigError::Invalid { name: "SESSION_KEY", .. })
        ));
    }

    #[test]
    fn rejects_garbage_numbers_and_flags() {
        let k = key();
        assert!(load(&[
            ("DATABASE_URL", "postgres://x"),
            ("SESSION_KEY", &k),
            ("DATABASE_MAX_CONNECTIONS", "many"),
        ])
        .is_err());
        assert!(load(&[
            ("DATABASE_URL", "postgres://x"),
            ("SESSION_KEY", &k),
            ("ALLOW_SIGNUP", "maybe"),
        ])
        .is_err());
    }
}
