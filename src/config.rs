use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::AnnotateError;

pub const DEFAULT_CONFIG_FILE: &str = "annotator.json";
pub const DEFAULT_DATABASE: &str = "annotations.sqlite";
pub const DEFAULT_CREDENTIALS: &str = "credentials.json";
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;
pub const DEFAULT_LAUNCH_INTERVAL_MS: u64 = 600;
pub const DEFAULT_BLAST_URL: &str = "https://blast.ncbi.nlm.nih.gov/Blast.cgi";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TaxonomySourceKind {
    Entrez,
    Taxdump,
}

impl fmt::Display for TaxonomySourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaxonomySourceKind::Entrez => write!(f, "entrez"),
            TaxonomySourceKind::Taxdump => write!(f, "taxdump"),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: Option<Utf8PathBuf>,
    #[serde(default)]
    pub credentials: Option<Utf8PathBuf>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub launch_interval_ms: Option<u64>,
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TaxonomyConfig {
    #[serde(default)]
    pub source: Option<TaxonomySourceKind>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub taxdump_dir: Option<Utf8PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedTaxonomy {
    pub source: TaxonomySourceKind,
    pub email: Option<String>,
    pub api_key: Option<String>,
    pub taxdump_dir: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct ResolvedSearch {
    pub base_url: String,
    pub poll_interval: Duration,
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub database: Utf8PathBuf,
    pub credentials: Utf8PathBuf,
    pub concurrency: usize,
    pub queue_capacity: usize,
    pub launch_interval: Duration,
    pub taxonomy: ResolvedTaxonomy,
    pub search: ResolvedSearch,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist; the default file is optional.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, AnnotateError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| AnnotateError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| AnnotateError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, AnnotateError> {
        let concurrency = config.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(AnnotateError::InvalidConfig(
                "concurrency must be >= 1".to_string(),
            ));
        }
        let queue_capacity = config.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            return Err(AnnotateError::InvalidConfig(
                "queue_capacity must be >= 1".to_string(),
            ));
        }

        let taxdump_dir = match config.taxonomy.taxdump_dir {
            Some(dir) => dir,
            None => default_taxdump_dir()?,
        };

        Ok(ResolvedConfig {
            database: config
                .database
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DATABASE)),
            credentials: config
                .credentials
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_CREDENTIALS)),
            concurrency,
            queue_capacity,
            launch_interval: Duration::from_millis(
                config
                    .launch_interval_ms
                    .unwrap_or(DEFAULT_LAUNCH_INTERVAL_MS),
            ),
            taxonomy: ResolvedTaxonomy {
                source: config.taxonomy.source.unwrap_or(TaxonomySourceKind::Entrez),
                email: non_empty(config.taxonomy.email),
                api_key: non_empty(config.taxonomy.api_key),
                taxdump_dir,
            },
            search: ResolvedSearch {
                base_url: config
                    .search
                    .base_url
                    .unwrap_or_else(|| DEFAULT_BLAST_URL.to_string()),
                poll_interval: Duration::from_secs(
                    config
                        .search
                        .poll_interval_secs
                        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
                ),
                email: non_empty(config.search.email),
            },
        })
    }
}

pub fn default_taxdump_dir() -> Result<Utf8PathBuf, AnnotateError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(
                dirs.home_dir()
                    .join(".cache")
                    .join("fragment-annotator")
                    .join("taxdump"),
            )
            .ok()
        })
        .ok_or_else(|| AnnotateError::Filesystem("unable to resolve cache directory".to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Deserialize)]
struct CredentialsFile {
    #[serde(default, alias = "han_user")]
    db_user: Option<String>,
    #[serde(default, alias = "han_pass")]
    db_pass: Option<String>,
}

/// Database login read from the credentials file.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn load(path: &Utf8Path) -> Result<Self, AnnotateError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| AnnotateError::ConfigRead(path.as_std_path().to_path_buf()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, AnnotateError> {
        let raw: CredentialsFile = serde_json::from_str(content)
            .map_err(|err| AnnotateError::ConfigParse(err.to_string()))?;
        let user = raw
            .db_user
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| AnnotateError::MissingCredentials("db_user".to_string()))?;
        let password = raw
            .db_pass
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AnnotateError::MissingCredentials("db_pass".to_string()))?;
        Ok(Self { user, password })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn resolve_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.database, Utf8PathBuf::from(DEFAULT_DATABASE));
        assert_eq!(resolved.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(resolved.launch_interval, Duration::from_millis(600));
        assert_eq!(resolved.taxonomy.source, TaxonomySourceKind::Entrez);
        assert!(resolved.taxonomy.taxdump_dir.ends_with("fragment-annotator/taxdump"));
    }

    #[test]
    fn reject_zero_concurrency() {
        let config = Config {
            concurrency: Some(0),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(AnnotateError::InvalidConfig(_))
        );
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::from_json(r#"{"db_user": "annotator", "db_pass": "s3cret"}"#)
            .unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("annotator"));
        assert!(!debug.contains("s3cret"));
    }
}
