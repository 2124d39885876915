//! Data-source settings file
//!
//! Settings live in a TOML file with a `[datasource]` table (connection
//! parameters) and a `[pool]` table (pool bounds). Missing keys fall back to
//! their defaults. A handful of environment variables override the file.

use std::path::{Path, PathBuf};

use dsm_core::{ConnectionParams, DsmError, Result};
use serde::{Deserialize, Serialize};

use crate::pool::PoolConfig;

pub const ENV_DRIVER: &str = "DSM_DATASOURCE_DRIVER";
pub const ENV_URL: &str = "DSM_DATASOURCE_URL";
pub const ENV_USERNAME: &str = "DSM_DATASOURCE_USERNAME";
pub const ENV_PASSWORD: &str = "DSM_DATASOURCE_PASSWORD";
pub const ENV_MIN_IDLE: &str = "DSM_POOL_MIN_IDLE";
pub const ENV_MAX_IDLE: &str = "DSM_POOL_MAX_IDLE";
pub const ENV_MAX_ACTIVE: &str = "DSM_POOL_MAX_ACTIVE";

/// Everything needed to build a [`crate::ConnectionManager`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceSettings {
    pub datasource: ConnectionParams,
    pub pool: PoolConfig,
}

impl DataSourceSettings {
    /// `<config dir>/dsm/datasource.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dsm").join("datasource.toml"))
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from a file
    #[tracing::instrument]
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!("reading datasource settings");
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_toml(&content)?;
        tracing::info!(driver = %settings.datasource.driver, "datasource settings loaded");
        Ok(settings)
    }

    /// Load settings from a file, or use defaults when it doesn't exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            Ok(Self::default())
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup
    ///
    /// Pool overrides that don't parse as numbers are logged and ignored,
    /// leaving the previous value in place.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(driver) = lookup(ENV_DRIVER) {
            self.datasource.driver = driver;
        }
        if let Some(url) = lookup(ENV_URL) {
            self.datasource.url = url;
        }
        if let Some(username) = lookup(ENV_USERNAME) {
            self.datasource.username = Some(username);
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.datasource.password = Some(password);
        }

        if let Some(n) = parse_count(&lookup, ENV_MIN_IDLE) {
            self.pool = self.pool.clone().with_min_idle(n);
        }
        if let Some(n) = parse_count(&lookup, ENV_MAX_IDLE) {
            self.pool = self.pool.clone().with_max_idle(n);
        }
        if let Some(n) = parse_count(&lookup, ENV_MAX_ACTIVE) {
            self.pool = self.pool.clone().with_max_active(n);
        }
    }

    /// Check the settings can build a manager
    pub fn validate(&self) -> Result<()> {
        if self.datasource.driver.trim().is_empty() {
            return Err(DsmError::Configuration("datasource.driver is not set".into()));
        }
        if self.datasource.url.trim().is_empty() {
            return Err(DsmError::Configuration("datasource.url is not set".into()));
        }
        self.pool.validate()
    }
}

fn parse_count<F>(lookup: &F, key: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<usize>() {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid pool override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_full_file() {
        let settings = DataSourceSettings::from_toml(
            r#"
            [datasource]
            driver = "sqlite"
            url = "/var/lib/app/data.db"
            username = "app"
            password = "secret"

            [datasource.options]
            busy_timeout_ms = "250"

            [pool]
            min_idle = 2
            max_idle = 4
            max_active = 8
            acquire_timeout_ms = 500
            "#,
        )
        .expect("parse");

        assert_eq!(settings.datasource.driver, "sqlite");
        assert_eq!(settings.datasource.username.as_deref(), Some("app"));
        assert_eq!(settings.datasource.option("busy_timeout_ms"), Some("250"));
        assert_eq!(settings.pool.min_idle(), 2);
        assert_eq!(settings.pool.max_idle(), 4);
        assert_eq!(settings.pool.max_active(), 8);
        assert_eq!(
            settings.pool.acquire_timeout(),
            Some(std::time::Duration::from_millis(500))
        );
        settings.validate().expect("valid");
    }

    #[test]
    fn test_missing_pool_section_uses_defaults() {
        let settings = DataSourceSettings::from_toml(
            r#"
            [datasource]
            driver = "sqlite"
            url = ":memory:"
            "#,
        )
        .expect("parse");

        assert_eq!(settings.pool, PoolConfig::default());
        assert_eq!(settings.pool.min_idle(), 10);
        assert_eq!(settings.pool.max_active(), 20);
        assert_eq!(settings.pool.max_idle(), 20);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let err = DataSourceSettings::from_toml("[pool]\nmax_active = \"lots\"").unwrap_err();
        assert!(matches!(err, DsmError::Toml(_)));
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut settings = DataSourceSettings::default();
        settings.apply_overrides(lookup_from(&[
            (ENV_DRIVER, "sqlite"),
            (ENV_URL, ":memory:"),
            (ENV_MIN_IDLE, "1"),
            (ENV_MAX_ACTIVE, "3"),
        ]));

        assert_eq!(settings.datasource.url, ":memory:");
        assert_eq!(settings.pool.min_idle(), 1);
        assert_eq!(settings.pool.max_active(), 3);
        assert_eq!(settings.pool.max_idle(), 3);
    }

    #[test]
    fn test_invalid_numeric_override_is_ignored() {
        let mut settings = DataSourceSettings::default();
        settings.apply_overrides(lookup_from(&[(ENV_MAX_ACTIVE, "twenty")]));
        assert_eq!(settings.pool.max_active(), 20);
    }

    #[test]
    fn test_validate_requires_url() {
        let mut settings = DataSourceSettings::default();
        settings.datasource.driver = "sqlite".into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("datasource.url"));
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.toml");
        assert_eq!(
            DataSourceSettings::load_or_default(&missing).expect("defaults"),
            DataSourceSettings::default()
        );

        let path = dir.path().join("datasource.toml");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(file, "[datasource]\ndriver = \"sqlite\"\nurl = \":memory:\"").expect("write");
        let loaded = DataSourceSettings::load_or_default(&path).expect("load");
        assert_eq!(loaded.datasource.url, ":memory:");
    }
}
