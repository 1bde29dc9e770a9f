//! Environment driven configuration
//!
//! Values come from the process environment (optionally seeded from a `.env`
//! file by the binary). Parsing goes through [`Config::from_lookup`] so it can
//! be exercised without touching the real environment.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;
use crate::identity::GoogleSettings;
use crate::storage::S3Settings;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_UPLOAD_TTL_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Path to the redb database file
    pub database_url: String,
    pub storage: StorageConfig,
    pub upload_url_ttl: Duration,
    pub google: GoogleSettings,
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Objects kept in process memory, nothing is persisted
    Memory { public_base_url: String },
    /// AWS S3 or any S3 compatible service such as Cloudflare R2
    S3 {
        settings: S3Settings,
        public_base_url: String,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let port = match get("PORT") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "PORT", value })?,
            None => DEFAULT_PORT,
        };

        let upload_url_ttl = match get("UPLOAD_URL_TTL_SECS") {
            Some(value) => Duration::from_secs(value.parse().map_err(|_| ConfigError::Invalid {
                key: "UPLOAD_URL_TTL_SECS",
                value,
            })?),
            None => Duration::from_secs(DEFAULT_UPLOAD_TTL_SECS),
        };

        let backend = get("STORAGE_BACKEND").unwrap_or_else(|| "memory".to_string());
        let storage = match backend.as_str() {
            "memory" => StorageConfig::Memory {
                public_base_url: get("STORAGE_PUBLIC_URL")
                    .unwrap_or_else(|| format!("http://localhost:{}/objects", port)),
            },
            "s3" => {
                let bucket = require("STORAGE_BUCKET")?;
                let public_base_url = get("STORAGE_PUBLIC_URL")
                    .unwrap_or_else(|| format!("https://{}.s3.amazonaws.com", bucket));
                StorageConfig::S3 {
                    settings: S3Settings {
                        bucket,
                        region: get("STORAGE_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                        endpoint: get("STORAGE_ENDPOINT"),
                        access_key_id: require("STORAGE_ACCESS_KEY_ID")?,
                        secret_access_key: require("STORAGE_SECRET_ACCESS_KEY")?,
                    },
                    public_base_url,
                }
            }
            "r2" => {
                let endpoint = match get("STORAGE_ENDPOINT") {
                    Some(endpoint) => endpoint,
                    None => format!(
                        "https://{}.r2.cloudflarestorage.com",
                        require("CLOUDFLARE_ACCOUNT_ID")?
                    ),
                };
                StorageConfig::S3 {
                    settings: S3Settings {
                        bucket: require("STORAGE_BUCKET")?,
                        region: get("STORAGE_REGION").unwrap_or_else(|| "auto".to_string()),
                        endpoint: Some(endpoint),
                        access_key_id: require("STORAGE_ACCESS_KEY_ID")?,
                        secret_access_key: require("STORAGE_SECRET_ACCESS_KEY")?,
                    },
                    public_base_url: require("STORAGE_PUBLIC_URL")?,
                }
            }
            _ => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE_BACKEND",
                    value: backend,
                })
            }
        };

        Ok(Config {
            port,
            database_url: get("DATABASE_URL").unwrap_or_else(|| "data.db".to_string()),
            storage,
            upload_url_ttl,
            google: GoogleSettings {
                client_id: require("GOOGLE_CLIENT_ID")?,
                client_secret: require("GOOGLE_CLIENT_SECRET")?,
                redirect_uri: get("GOOGLE_REDIRECT_URI").unwrap_or_else(|| "postmessage".to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const GOOGLE: [(&str, &str); 2] = [
        ("GOOGLE_CLIENT_ID", "client"),
        ("GOOGLE_CLIENT_SECRET", "secret"),
    ];

    #[test]
    fn test_defaults() {
        let config = parse(&GOOGLE).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.database_url, "data.db");
        assert_eq!(config.upload_url_ttl, Duration::from_secs(600));
        assert_eq!(config.google.redirect_uri, "postmessage");
        assert!(matches!(
            config.storage,
            StorageConfig::Memory { ref public_base_url } if public_base_url == "http://localhost:8080/objects"
        ));
    }

    #[test]
    fn test_google_credentials_are_required() {
        let err = parse(&[("GOOGLE_CLIENT_ID", "client")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("GOOGLE_CLIENT_SECRET")));
    }

    #[test]
    fn test_invalid_port() {
        let mut vars = GOOGLE.to_vec();
        vars.push(("PORT", "eighty"));
        assert!(matches!(
            parse(&vars).unwrap_err(),
            ConfigError::Invalid { key: "PORT", .. }
        ));
    }

    #[test]
    fn test_s3_backend_derives_public_url() {
        let mut vars = GOOGLE.to_vec();
        vars.extend([
            ("STORAGE_BACKEND", "s3"),
            ("STORAGE_BUCKET", "pathtrami-images"),
            ("STORAGE_ACCESS_KEY_ID", "key"),
            ("STORAGE_SECRET_ACCESS_KEY", "secret"),
        ]);

        match parse(&vars).unwrap().storage {
            StorageConfig::S3 {
                settings,
                public_base_url,
            } => {
                assert_eq!(public_base_url, "https://pathtrami-images.s3.amazonaws.com");
                assert_eq!(settings.region, "us-east-1");
                assert!(settings.endpoint.is_none());
            }
            other => panic!("unexpected storage config {:?}", other),
        }
    }

    #[test]
    fn test_r2_backend_uses_account_endpoint() {
        let mut vars = GOOGLE.to_vec();
        vars.extend([
            ("STORAGE_BACKEND", "r2"),
            ("STORAGE_BUCKET", "images"),
            ("STORAGE_ACCESS_KEY_ID", "key"),
            ("STORAGE_SECRET_ACCESS_KEY", "secret"),
            ("STORAGE_PUBLIC_URL", "https://images.pathtrami.app"),
            ("CLOUDFLARE_ACCOUNT_ID", "acc123"),
        ]);

        match parse(&vars).unwrap().storage {
            StorageConfig::S3 { settings, .. } => {
                assert_eq!(
                    settings.endpoint.as_deref(),
                    Some("https://acc123.r2.cloudflarestorage.com")
                );
                assert_eq!(settings.region, "auto");
            }
            other => panic!("unexpected storage config {:?}", other),
        }
    }

    #[test]
    fn test_r2_requires_public_url() {
        let mut vars = GOOGLE.to_vec();
        vars.extend([
            ("STORAGE_BACKEND", "r2"),
            ("STORAGE_BUCKET", "images"),
            ("STORAGE_ACCESS_KEY_ID", "key"),
            ("STORAGE_SECRET_ACCESS_KEY", "secret"),
            ("STORAGE_ENDPOINT", "https://r2.test"),
        ]);
        assert!(matches!(
            parse(&vars).unwrap_err(),
            ConfigError::Missing("STORAGE_PUBLIC_URL")
        ));
    }
}
