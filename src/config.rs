use crate::core::db::{PostgresConfig, SqliteConfig};
use crate::core::{LazydbError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub sqlite: Option<SqliteConfig>,
    pub postgres: Option<PostgresConfig>,
}

impl Config {
    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Config> {
        toml::from_str(content).map_err(|e| LazydbError::Config(e.to_string()))
    }

    /// The `[sqlite]` section, or a configuration error when it is missing
    pub fn sqlite(&self) -> Result<SqliteConfig> {
        self.sqlite
            .clone()
            .ok_or_else(|| LazydbError::Config("missing [sqlite] section".to_string()))
    }

    /// The `[postgres]` section, or a configuration error when it is missing
    pub fn postgres(&self) -> Result<PostgresConfig> {
        self.postgres
            .clone()
            .ok_or_else(|| LazydbError::Config("missing [postgres] section".to_string()))
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = lazydb::config::load_config("lazydb.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    Config::from_toml(&content)
}

/// `<config dir>/lazydb/config.toml`, if the platform has a config directory
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lazydb").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::FetchStyle;
    use std::io::Write;

    const SAMPLE_CONFIG: &str = r#"
[sqlite]
path = "/var/lib/app/app.db"

[sqlite.options]
fetch_style = "num"
busy_timeout_ms = 2500

[postgres]
host = "db.internal"
port = 6432
database = "app"
user = "svc"
password = "secret"

[postgres.options]
empty_as_null = false
connect_timeout_secs = 3
fetch_style = { column = 1 }
"#;

    #[test]
    fn test_load_config_from_str() {
        let config = Config::from_toml(SAMPLE_CONFIG).expect("Failed to parse sample config");

        let sqlite = config.sqlite().unwrap();
        assert_eq!(sqlite.path, "/var/lib/app/app.db");
        assert_eq!(sqlite.options.fetch_style, FetchStyle::Num);
        assert_eq!(sqlite.options.busy_timeout_ms, Some(2500));
        assert!(sqlite.options.empty_as_null);

        let postgres = config.postgres().unwrap();
        assert_eq!(postgres.port(), 6432);
        assert_eq!(postgres.user, "svc");
        assert!(!postgres.options.empty_as_null);
        assert_eq!(postgres.options.connect_timeout_secs, Some(3));
        assert_eq!(postgres.options.fetch_style, FetchStyle::Column(1));
    }

    #[test]
    fn test_missing_section() {
        let config = Config::from_toml("[sqlite]\npath = \":memory:\"\n").unwrap();
        assert!(config.sqlite().unwrap().options.empty_as_null);
        assert!(matches!(config.postgres(), Err(LazydbError::Config(_))));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::from_toml("[sqlite\npath = 1"),
            Err(LazydbError::Config(_))
        ));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert!(config.postgres.is_some());

        assert!(matches!(
            load_config("/nonexistent/lazydb.toml"),
            Err(LazydbError::Io(_))
        ));
    }
}
