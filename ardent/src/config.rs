//! Connection configuration.
//!
//! Connections are described in a JSON file, `config.json` by default:
//!
//! ```json
//! {
//!   "environment": "dev",
//!   "dev": {
//!     "postgresql": {
//!       "default": {
//!         "server": "localhost",
//!         "port": 5432,
//!         "dbname": "garage",
//!         "username": "ENV[PG_USER]",
//!         "password": "ENV[PG_PASSWORD]",
//!         "maxidleconnections": 2,
//!         "maxopenconnections": 8
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! `environment` names the active environment.  Beneath each environment,
//! profiles are grouped by backend and then by connection name.  A string
//! of the form `ENV[NAME]` anywhere in a profile is replaced by the value
//! of the environment variable `NAME`; a blank variable is an error.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::registry::ConnectionKey;

/// Problems loading or reading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("configuration environment must not be blank")]
    BlankEnvironment,

    #[error("environment variable {var} referenced by {path} is blank")]
    MissingEnv { var: String, path: String },

    #[error("no {file} found in {} or any parent directory", start.display())]
    NotFound { file: String, start: PathBuf },

    #[error("no {backend} connection named {name} in environment {environment}")]
    ConnectionNotFound {
        backend: String,
        name: String,
        environment: String,
    },

    #[error("invalid {path}: {reason}")]
    Invalid { path: String, reason: String },
}

/// A loaded configuration file.
#[derive(Debug, Clone)]
pub struct Config {
    source: Option<PathBuf>,
    environment: String,
    root: serde_json::Value,
}

impl Config {
    pub const FILE_NAME: &'static str = "config.json";

    /// Load the configuration from a file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Config::from_json_str(&text)?;
        config.source = Some(path.to_path_buf());
        tracing::debug!(path = %path.display(), environment = %config.environment, "loaded configuration");
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Config, ConfigError> {
        Config::from_value(serde_json::from_str(text)?)
    }

    pub fn from_value(root: serde_json::Value) -> Result<Config, ConfigError> {
        let environment = match root.get("environment") {
            Some(value) => resolve(value.clone(), "environment")?,
            None => serde_json::Value::Null,
        };
        let environment = environment.as_str().map(str::trim).unwrap_or_default();
        if environment.is_empty() {
            return Err(ConfigError::BlankEnvironment);
        }

        Ok(Config {
            source: None,
            environment: environment.to_string(),
            root,
        })
    }

    /// Find `config.json` in the working directory or one of its parents.
    pub fn discover() -> Result<Config, ConfigError> {
        let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        Config::discover_from(cwd)
    }

    /// Find `config.json` in `start` or one of its parents.
    pub fn discover_from<P: AsRef<Path>>(start: P) -> Result<Config, ConfigError> {
        Config::search(start.as_ref(), None)
    }

    /// Find `config.json` in `start` or one of its parents, going no higher
    /// than `stop`.  A `stop` that is not an ancestor of `start` does not
    /// bound the search.
    pub fn discover_within<P: AsRef<Path>, S: AsRef<Path>>(start: P, stop: S) -> Result<Config, ConfigError> {
        Config::search(start.as_ref(), Some(stop.as_ref()))
    }

    fn search(start: &Path, stop: Option<&Path>) -> Result<Config, ConfigError> {
        let mut dirs = start.ancestors();
        let found = loop {
            let Some(dir) = dirs.next() else { break None };
            let candidate = dir.join(Config::FILE_NAME);
            if candidate.is_file() {
                break Some(candidate);
            }
            if Some(dir) == stop {
                break None;
            }
        };
        found
            .ok_or_else(|| ConfigError::NotFound {
                file: Config::FILE_NAME.to_string(),
                start: start.to_path_buf(),
            })
            .and_then(Config::from_path)
    }

    /// The active environment.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// The file this configuration was read from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// The connection names configured for a backend in the active
    /// environment.
    pub fn connection_names(&self, backend: &str) -> Vec<String> {
        self.root
            .get(&self.environment)
            .and_then(|env| env.get(backend))
            .and_then(serde_json::Value::as_object)
            .map(|profiles| profiles.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Read the profile for a connection, with `ENV[...]` references
    /// replaced.
    pub fn profile<P: Profile>(&self, backend: &str, key: &ConnectionKey) -> Result<P, ConfigError> {
        let environment = key.environment.as_deref().unwrap_or(&self.environment);
        let path = format!("{environment}.{backend}.{}", key.name);

        let raw = self
            .root
            .get(environment)
            .and_then(|env| env.get(backend))
            .and_then(|profiles| profiles.get(&key.name))
            .ok_or_else(|| ConfigError::ConnectionNotFound {
                backend: backend.to_string(),
                name: key.name.clone(),
                environment: environment.to_string(),
            })?;

        let resolved = resolve(raw.clone(), &path)?;
        let profile: P = serde_json::from_value(resolved).map_err(|err| ConfigError::Invalid {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        profile
            .check()
            .map_err(|reason| ConfigError::Invalid { path, reason })?;
        Ok(profile)
    }
}

fn env_reference(text: &str) -> Option<&str> {
    static ENV_REF_REGEX: OnceLock<Regex> = OnceLock::new();

    let regex = ENV_REF_REGEX.get_or_init(|| {
        Regex::new(r"^ENV\[([^\]]+)\]$").expect("failed to compile env reference regex")
    });

    regex
        .captures(text.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Replace every `ENV[NAME]` string beneath `value`.
///
/// A replacement that reads as a JSON number or boolean takes that type,
/// so `"port": "ENV[PG_PORT]"` still deserializes into an integer.
fn resolve(value: serde_json::Value, path: &str) -> Result<serde_json::Value, ConfigError> {
    use serde_json::Value;

    match value {
        Value::String(text) => {
            let Some(var) = env_reference(&text) else {
                return Ok(Value::String(text));
            };
            let found = std::env::var(var).unwrap_or_default();
            if found.trim().is_empty() {
                return Err(ConfigError::MissingEnv {
                    var: var.to_string(),
                    path: path.to_string(),
                });
            }
            Ok(match serde_json::from_str::<Value>(&found) {
                Ok(scalar @ (Value::Number(_) | Value::Bool(_))) => scalar,
                _ => Value::String(found),
            })
        }
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| {
                let child = format!("{path}.{k}");
                resolve(v, &child).map(|v| (k, v))
            })
            .collect::<Result<_, _>>()
            .map(Value::Object),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| resolve(v, &format!("{path}[{i}]")))
            .collect::<Result<_, _>>()
            .map(Value::Array),
        other => Ok(other),
    }
}

/// A connection profile for one backend.
pub trait Profile: DeserializeOwned {
    /// Reject blank required settings.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

fn require(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} must not be blank"))
    } else {
        Ok(())
    }
}

/// A SQLite database file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SqliteProfile {
    /// A file path, or `:memory:`.
    pub path: String,
    #[serde(default, rename = "maxopenconnections")]
    pub max_open_connections: Option<u32>,
    #[serde(default)]
    pub debug: bool,
}

impl Profile for SqliteProfile {
    fn check(&self) -> Result<(), String> {
        require("path", &self.path)
    }
}

/// A networked SQL server: PostgreSQL or MySQL.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerProfile {
    pub server: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub dbname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, rename = "maxidleconnections")]
    pub max_idle_connections: Option<u32>,
    #[serde(default, rename = "maxopenconnections")]
    pub max_open_connections: Option<u32>,
    #[serde(default)]
    pub debug: bool,
}

impl Profile for ServerProfile {
    fn check(&self) -> Result<(), String> {
        require("server", &self.server)?;
        require("dbname", &self.dbname)
    }
}

/// A hosted search service, reached with an API key.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SearchProfile {
    #[serde(rename = "apikey")]
    pub api_key: String,
}

impl Profile for SearchProfile {
    fn check(&self) -> Result<(), String> {
        require("apikey", &self.api_key)
    }
}

/// A key-value bucket in a cluster.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct KvProfile {
    pub cluster_address: String,
    pub bucket_name: String,
    #[serde(default)]
    pub bucket_password: String,
}

impl Profile for KvProfile {
    fn check(&self) -> Result<(), String> {
        require("cluster_address", &self.cluster_address)?;
        require("bucket_name", &self.bucket_name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const GARAGE: &str = r#"{
        "environment": "dev",
        "dev": {
            "sqlite": {
                "default": { "path": "garage.db", "maxopenconnections": 4 },
                "archive": { "path": "archive.db" }
            },
            "postgresql": {
                "default": {
                    "server": "localhost",
                    "port": "ENV[ARDENT_TEST_PG_PORT]",
                    "dbname": "garage",
                    "username": "ENV[ARDENT_TEST_PG_USER]",
                    "password": "ENV[ARDENT_TEST_UNSET_VARIABLE]"
                }
            },
            "search": { "default": { "apikey": "" } }
        },
        "test": {
            "sqlite": { "default": { "path": ":memory:" } }
        }
    }"#;

    #[test]
    fn active_environment_profiles() {
        let config = Config::from_json_str(GARAGE).unwrap();
        assert_eq!("dev", config.environment());

        let mut names = config.connection_names("sqlite");
        names.sort();
        assert_eq!(vec!["archive", "default"], names);

        let profile: SqliteProfile = config.profile("sqlite", &ConnectionKey::default()).unwrap();
        assert_eq!("garage.db", profile.path);
        assert_eq!(Some(4), profile.max_open_connections);
    }

    #[test]
    fn pinned_environment() {
        let config = Config::from_json_str(GARAGE).unwrap();
        let key = ConnectionKey::new("default", Some("test"));
        let profile: SqliteProfile = config.profile("sqlite", &key).unwrap();
        assert_eq!(":memory:", profile.path);
    }

    #[test]
    fn missing_connection() {
        let config = Config::from_json_str(GARAGE).unwrap();
        let key = ConnectionKey::new("reports", None);
        let err = config.profile::<SqliteProfile>("sqlite", &key).unwrap_err();
        assert!(matches!(err, ConfigError::ConnectionNotFound { .. }));
        assert_eq!(
            "no sqlite connection named reports in environment dev",
            err.to_string()
        );
    }

    #[test]
    fn env_references() {
        std::env::set_var("ARDENT_TEST_PG_PORT", "5433");
        std::env::set_var("ARDENT_TEST_PG_USER", "mechanic");
        let config = Config::from_json_str(GARAGE).unwrap();

        let err = config
            .profile::<ServerProfile>("postgresql", &ConnectionKey::default())
            .unwrap_err();
        match err {
            ConfigError::MissingEnv { var, path } => {
                assert_eq!("ARDENT_TEST_UNSET_VARIABLE", var);
                assert_eq!("dev.postgresql.default.password", path);
            }
            other => panic!("unexpected error: {other}"),
        }

        let resolved = resolve(
            serde_json::json!({ "port": "ENV[ARDENT_TEST_PG_PORT]", "username": "ENV[ARDENT_TEST_PG_USER]" }),
            "dev.postgresql.default",
        )
        .unwrap();
        assert_eq!(serde_json::json!({ "port": 5433, "username": "mechanic" }), resolved);
    }

    #[test]
    fn blank_required_setting() {
        let config = Config::from_json_str(GARAGE).unwrap();
        let err = config
            .profile::<SearchProfile>("search", &ConnectionKey::default())
            .unwrap_err();
        assert_eq!("invalid dev.search.default: apikey must not be blank", err.to_string());
    }

    #[test]
    fn blank_environment() {
        let err = Config::from_json_str(r#"{ "environment": " " }"#).unwrap_err();
        assert!(matches!(err, ConfigError::BlankEnvironment));
        let err = Config::from_json_str("{}").unwrap_err();
        assert!(matches!(err, ConfigError::BlankEnvironment));
    }

    #[test]
    fn discovery_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(Config::FILE_NAME), GARAGE).unwrap();
        let nested = dir.path().join("src").join("bin");
        std::fs::create_dir_all(&nested).unwrap();

        let config = Config::discover_from(&nested).unwrap();
        assert_eq!("dev", config.environment());
        assert_eq!(Some(dir.path().join(Config::FILE_NAME).as_path()), config.source());

        let config = Config::discover_within(&nested, dir.path()).unwrap();
        assert_eq!(Some(dir.path().join(Config::FILE_NAME).as_path()), config.source());
    }

    #[test]
    fn discovery_stops_at_the_boundary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(Config::FILE_NAME), GARAGE).unwrap();
        let project = dir.path().join("project");
        let nested = project.join("src");
        std::fs::create_dir_all(&nested).unwrap();

        let err = Config::discover_within(&nested, &project).unwrap_err();
        match err {
            ConfigError::NotFound { file, start } => {
                assert_eq!(Config::FILE_NAME, file);
                assert_eq!(nested, start);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            format!("no config.json found in {} or any parent directory", nested.display()),
            Config::discover_within(&nested, &project).unwrap_err().to_string()
        );
    }
}
