//! Application configuration.
//!
//! One TOML file, every key optional:
//!
//! ```toml
//! [app]
//! name = "shop"
//! env = "local"
//! debug = true
//!
//! [view]
//! paths = ["resources/views"]
//!
//! [exceptions]
//! login_path = "/login"
//! dont_flash = ["password", "password_confirmation", "card_number"]
//!
//! [server]
//! addr = "0.0.0.0:8080"
//! ```
//!
//! `APP_NAME`, `APP_ENV` and `APP_DEBUG` override the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;

/// Configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,

    #[serde(default)]
    pub view: ViewConfig,

    #[serde(default)]
    pub exceptions: ExceptionsConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub env: String,
    /// Exposes error details in responses. Never enable in production.
    pub debug: bool,
    /// Disables every middleware, global and route, in both phases.
    pub skip_middleware: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "slice".to_owned(),
            env: "production".to_owned(),
            debug: false,
            skip_middleware: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Template directories, searched in order.
    pub paths: Vec<PathBuf>,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self { paths: vec![PathBuf::from("resources/views")] }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionsConfig {
    /// Input fields never flashed back after a failed validation.
    pub dont_flash: Vec<String>,
    pub login_path: Option<String>,
}

impl Default for ExceptionsConfig {
    fn default() -> Self {
        Self {
            dont_flash: vec!["password".to_owned(), "password_confirmation".to_owned()],
            login_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { addr: "127.0.0.1:3000".to_owned() }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        Ok(toml::from_str(content)?)
    }

    /// Reads `path`, then applies the process environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_toml_str(&content)?.apply_env(|key| std::env::var(key).ok()))
    }

    /// Overrides `app` settings from `APP_NAME`, `APP_ENV` and `APP_DEBUG`
    /// as returned by `var`.
    pub fn apply_env<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = var("APP_NAME") {
            self.app.name = name;
        }
        if let Some(env) = var("APP_ENV") {
            self.app.env = env;
        }
        if let Some(raw) = var("APP_DEBUG") {
            match parse_bool(&raw) {
                Some(enabled) => self.app.debug = enabled,
                None => warn!(value = %raw, "ignoring APP_DEBUG, expected a boolean"),
            }
        }
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.app.name, "slice");
        assert!(!config.app.debug);
        assert_eq!(config.view.paths, vec![PathBuf::from("resources/views")]);
        assert_eq!(config.exceptions.dont_flash, vec!["password", "password_confirmation"]);
        assert_eq!(config.server.addr, "127.0.0.1:3000");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str("[app]\ndebug = true\n[exceptions]\nlogin_path = \"/login\"\n").unwrap();
        assert!(config.app.debug);
        assert_eq!(config.app.env, "production");
        assert_eq!(config.exceptions.login_path.as_deref(), Some("/login"));
        assert_eq!(config.exceptions.dont_flash.len(), 2);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(Config::from_toml_str("[app\n").is_err());
        assert!(Config::from_toml_str("[app]\ndebug = \"maybe\"\n").is_err());
    }

    #[test]
    fn environment_overrides_the_file() {
        let config = Config::from_toml_str("[app]\ndebug = false\nname = \"shop\"\n")
            .unwrap()
            .apply_env(env(&[("APP_DEBUG", "true"), ("APP_ENV", "local")]));
        assert!(config.app.debug);
        assert_eq!(config.app.env, "local");
        assert_eq!(config.app.name, "shop");
    }

    #[test]
    fn unparsable_app_debug_is_ignored() {
        let config = Config::from_toml_str("[app]\ndebug = true\n")
            .unwrap()
            .apply_env(env(&[("APP_DEBUG", "sometimes")]));
        assert!(config.app.debug);
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\naddr = \"0.0.0.0:8080\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.addr, "0.0.0.0:8080");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load("/no/such/slice.toml").is_err());
    }
}
