use std::path::PathBuf;

use anyhow::{Context, bail};
use tracing::warn;

const DEV_ACCESS_SECRET: &str = "dev-access-secret-change-me";
const DEV_REFRESH_SECRET: &str = "dev-refresh-secret-change-me";

/// Process configuration, read from `KUMAS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Path every API route is nested under; empty for the root.
    pub api_prefix: String,
    pub jwt_access_secret: String,
    pub jwt_refresh_secret: String,
    pub upload_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let allow_dev_secrets = matches!(
            get("KUMAS_ALLOW_DEV_SECRETS").as_deref(),
            Some("1") | Some("true")
        );

        let port = match get("KUMAS_PORT") {
            Some(raw) => raw.parse().with_context(|| format!("invalid KUMAS_PORT '{raw}'"))?,
            None => 3000,
        };

        Ok(Self {
            host: get("KUMAS_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("KUMAS_DB_PATH").unwrap_or_else(|| "kumas.db".into()).into(),
            api_prefix: normalize_prefix(&get("KUMAS_API_PREFIX").unwrap_or_else(|| "/api".into())),
            jwt_access_secret: secret(&get, "KUMAS_JWT_ACCESS_SECRET", DEV_ACCESS_SECRET, allow_dev_secrets)?,
            jwt_refresh_secret: secret(&get, "KUMAS_JWT_REFRESH_SECRET", DEV_REFRESH_SECRET, allow_dev_secrets)?,
            upload_dir: get("KUMAS_UPLOAD_DIR").unwrap_or_else(|| "uploads".into()).into(),
        })
    }
}

fn secret(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    placeholder: &str,
    allow_dev: bool,
) -> anyhow::Result<String> {
    match get(key) {
        Some(value) if !value.is_empty() && value != placeholder => Ok(value),
        _ if allow_dev => {
            warn!("{} not set, using the development placeholder", key);
            Ok(placeholder.to_string())
        }
        _ => bail!("{key} must be set (or KUMAS_ALLOW_DEV_SECRETS=1 for local development)"),
    }
}

/// `api/` -> `/api`, `/` -> ``.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_secrets_are_refused() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(
            Config::from_lookup(lookup(&[
                ("KUMAS_JWT_ACCESS_SECRET", DEV_ACCESS_SECRET),
                ("KUMAS_JWT_REFRESH_SECRET", "real"),
            ]))
            .is_err()
        );
    }

    #[test]
    fn test_dev_secrets_and_defaults() {
        let config = Config::from_lookup(lookup(&[("KUMAS_ALLOW_DEV_SECRETS", "1")])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.api_prefix, "/api");
        assert_eq!(config.jwt_access_secret, DEV_ACCESS_SECRET);
        assert_ne!(config.jwt_access_secret, config.jwt_refresh_secret);
    }

    #[test]
    fn test_explicit_values() {
        let config = Config::from_lookup(lookup(&[
            ("KUMAS_PORT", "8080"),
            ("KUMAS_API_PREFIX", "v1/"),
            ("KUMAS_JWT_ACCESS_SECRET", "a"),
            ("KUMAS_JWT_REFRESH_SECRET", "r"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.api_prefix, "/v1");
        assert_eq!(config.jwt_refresh_secret, "r");

        assert!(Config::from_lookup(lookup(&[("KUMAS_PORT", "nope"), ("KUMAS_ALLOW_DEV_SECRETS", "1")])).is_err());
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("/api"), "/api");
    }
}
