use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub scopes: ScopesConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    pub cookie_domain: Option<String>,
    #[serde(default = "default_cookie_prefix")]
    pub cookie_prefix: String,
    /// Set the `Secure` attribute on cookies. Only disable for local HTTP
    /// development.
    #[serde(default = "default_true")]
    pub secure_cookies: bool,
}

fn default_cookie_prefix() -> String {
    "oauth_dispatch".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: ConfigValue,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Optional PostgreSQL schema. When set, each connection runs
    /// `SET search_path TO <schema>` on connect.
    pub schema: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokensConfig {
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_authz_code_ttl")]
    pub authorization_code_ttl_secs: u64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            access_token_ttl_secs: default_access_ttl(),
            authorization_code_ttl_secs: default_authz_code_ttl(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopesConfig {
    /// Every scope the provider knows about, with the text shown on the
    /// approval page.
    #[serde(default)]
    pub definitions: Vec<ScopeDefinition>,
    /// Scopes granted when a token request names none. Order is preserved.
    #[serde(default)]
    pub default: Vec<String>,
}

impl ScopesConfig {
    pub fn describe(&self, name: &str) -> Option<&str> {
        self.definitions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.description.as_str())
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.definitions.iter().any(|d| d.name == name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopeDefinition {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeaturesConfig {
    /// Append the `user_id` scope to default scopes for applications whose
    /// access record allows it.
    #[serde(default)]
    pub enable_user_id_scope: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

/// Validate that a scope name uses only safe characters.
/// Allowed: lowercase ASCII letters, digits, colons, dots, underscores, hyphens.
/// Must start with a letter and be non-empty.
pub fn validate_scope_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("scope name cannot be empty".to_string()));
    }
    // ^[a-z][a-z0-9:._-]*$
    let first = name.as_bytes()[0];
    if !first.is_ascii_lowercase() {
        return Err(Error::Config(format!(
            "scope name must start with a lowercase letter: {name}"
        )));
    }
    for ch in name.bytes() {
        if !matches!(ch, b'a'..=b'z' | b'0'..=b'9' | b':' | b'.' | b'_' | b'-') {
            return Err(Error::Config(format!(
                "scope name contains invalid character '{}': {name}",
                ch as char
            )));
        }
    }
    Ok(())
}

// --- ConfigValue: supports "env:VAR_NAME" syntax ---

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Literal(String),
}

impl ConfigValue {
    pub fn resolve(&self) -> Result<String> {
        let ConfigValue::Literal(s) = self;
        if let Some(var_name) = s.strip_prefix("env:") {
            std::env::var(var_name).map_err(|_| {
                Error::Config(format!("environment variable {var_name} not set"))
            })
        } else {
            Ok(s.clone())
        }
    }
}

// --- Config resolution ---

const CONFIG_FILENAME: &str = "oauth_dispatch.toml";
const CONFIG_ENV_VAR: &str = "OAUTH_DISPATCH_CONFIG";

impl Config {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validated()
    }

    /// Check cross-field rules and normalize the default scope list.
    pub fn validated(mut self) -> Result<Self> {
        for def in &self.scopes.definitions {
            validate_scope_name(&def.name)?;
        }

        let mut defaults: Vec<String> = Vec::with_capacity(self.scopes.default.len());
        for name in &self.scopes.default {
            if !self.scopes.is_known(name) {
                return Err(Error::Config(format!(
                    "default scope \"{name}\" has no entry in scopes.definitions"
                )));
            }
            if !defaults.contains(name) {
                defaults.push(name.clone());
            }
        }
        self.scopes.default = defaults;

        for (name, value) in [
            ("tokens.access_token_ttl_secs", self.tokens.access_token_ttl_secs),
            ("tokens.authorization_code_ttl_secs", self.tokens.authorization_code_ttl_secs),
            ("tokens.session_ttl_secs", self.tokens.session_ttl_secs),
            ("maintenance.cleanup_interval_secs", self.maintenance.cleanup_interval_secs),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be at least 1")));
            }
        }
        Ok(self)
    }
}

/// Resolve config file location using the standard search order:
/// 1. Explicit path (CLI flag)
/// 2. OAUTH_DISPATCH_CONFIG env var
/// 3. Current directory
/// 4. Walk up parent directories
/// 5. ~/.config/oauth_dispatch/config.toml
/// 6. /etc/oauth_dispatch/config.toml
pub fn resolve_config(explicit_path: Option<&Path>) -> Result<Config> {
    let mut searched = Vec::new();

    // 1. Explicit path, fail immediately if specified but missing
    if let Some(path) = explicit_path {
        if path.exists() {
            return Config::from_path(path);
        }
        return Err(Error::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    // 2. Environment variable
    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Config::from_path(&path);
        }
        searched.push(path);
    }

    // 3 & 4. Current directory and walk up
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = Some(cwd.as_path());
        while let Some(d) = dir {
            let config_path = d.join(CONFIG_FILENAME);
            if config_path.exists() {
                return Config::from_path(&config_path);
            }
            searched.push(config_path);
            dir = d.parent();
        }
    }

    // 5. User config
    if let Some(config_dir) = dirs::config_dir() {
        let user_config = config_dir.join("oauth_dispatch").join("config.toml");
        if user_config.exists() {
            return Config::from_path(&user_config);
        }
        searched.push(user_config);
    }

    // 6. System config
    let system_config = PathBuf::from("/etc/oauth_dispatch/config.toml");
    if system_config.exists() {
        return Config::from_path(&system_config);
    }
    searched.push(system_config);

    Err(Error::ConfigNotFound { searched })
}

// --- Defaults ---

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_true() -> bool { true }
fn default_max_connections() -> u32 { 10 }
fn default_access_ttl() -> u64 { 36_000 }      // 10 hours
fn default_authz_code_ttl() -> u64 { 60 }      // 1 minute
fn default_session_ttl() -> u64 { 1_209_600 }  // 2 weeks
fn default_cleanup_interval() -> u64 { 3600 }  // 1 hour
