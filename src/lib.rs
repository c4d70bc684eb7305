pub mod api;
pub mod buildkite;
pub mod comments;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod github;
pub mod github_auth;
pub mod logging;
pub mod pipelines;
pub mod trigger;
pub mod utils;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_support;

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use error::{BotError, Result};
use events::Bot;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_GITHUB_WEB_URL: &str = "https://github.com";
pub const DEFAULT_BUILDKITE_API_URL: &str = "https://api.buildkite.com/v2";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BotConfig {
    pub github: GithubConfig,
    pub buildkite: BuildkiteConfig,
    pub log_directory: Option<PathBuf>,
    pub debug: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GithubConfig {
    pub token: String,
    /// GitHub App installation credentials; used instead of `token` when present.
    pub app: Option<GithubAppConfig>,
    pub api_url: String,
    pub graphql_url: Option<String>,
    pub web_url: String,
    pub webhook_secret: Option<String>,
    pub retry_failed_requests: bool,
    pub collapse_old_comments: bool,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            app: None,
            api_url: DEFAULT_GITHUB_API_URL.to_string(),
            graphql_url: None,
            web_url: DEFAULT_GITHUB_WEB_URL.to_string(),
            webhook_secret: None,
            retry_failed_requests: false,
            collapse_old_comments: false,
        }
    }
}

impl GithubConfig {
    /// GraphQL endpoint, derived from the REST base unless set explicitly.
    pub fn graphql_endpoint(&self) -> String {
        match &self.graphql_url {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => format!("{}/graphql", self.api_url.trim_end_matches('/')),
        }
    }

    /// Returns the webhook secret if a non-empty one is configured.
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref().filter(|s| !s.is_empty())
    }
}

/// The `[github.app]` table.
#[derive(Deserialize, Clone, Default)]
#[serde(default)]
pub struct GithubAppConfig {
    pub app_id: String,
    /// PEM encoded RSA key of the app.
    pub private_key: String,
    pub installation_id: String,
}

impl std::fmt::Debug for GithubAppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubAppConfig")
            .field("app_id", &self.app_id)
            .field("private_key", &"<redacted>")
            .field("installation_id", &self.installation_id)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BuildkiteConfig {
    pub token: String,
    pub org_name: String,
    pub api_url: String,
}

impl Default for BuildkiteConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            org_name: String::new(),
            api_url: DEFAULT_BUILDKITE_API_URL.to_string(),
        }
    }
}

impl BotConfig {
    /// Applies environment overrides read through `lookup`.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let flag = |key: &str| non_empty(key).map(|value| parse_flag(&value));

        if let Some(token) = non_empty("GITHUB_TOKEN") {
            self.github.token = token;
        }
        let app_id = non_empty("GITHUB_APP_APP_ID");
        let private_key = non_empty("GITHUB_APP_PRIVATE_KEY");
        let installation_id = non_empty("GITHUB_APP_INSTALLATION_ID");
        if app_id.is_some() || private_key.is_some() || installation_id.is_some() {
            let app = self.github.app.get_or_insert_with(GithubAppConfig::default);
            if let Some(app_id) = app_id {
                app.app_id = app_id;
            }
            if let Some(private_key) = private_key {
                // Single-line env values carry the PEM newlines escaped.
                app.private_key = private_key.replace("\\n", "\n");
            }
            if let Some(installation_id) = installation_id {
                app.installation_id = installation_id;
            }
        }
        if let Some(url) = non_empty("GITHUB_API_URL") {
            self.github.api_url = url;
        }
        if let Some(url) = non_empty("GITHUB_GRAPHQL_URL") {
            self.github.graphql_url = Some(url);
        }
        if let Some(secret) = non_empty("GITHUB_WEBHOOK_SECRET") {
            self.github.webhook_secret = Some(secret);
        }
        if let Some(retry) = flag("GITHUB_RETRY_FAILED_REQUESTS") {
            self.github.retry_failed_requests = retry;
        }
        if let Some(collapse) = flag("COLLAPSE_OLD_COMMENTS") {
            self.github.collapse_old_comments = collapse;
        }
        if let Some(token) = non_empty("BUILDKITE_TOKEN") {
            self.buildkite.token = token;
        }
        if let Some(org_name) = non_empty("BUILDKITE_ORG_NAME") {
            self.buildkite.org_name = org_name;
        }
        if let Some(url) = non_empty("BUILDKITE_API_URL") {
            self.buildkite.api_url = url;
        }
        if let Some(directory) = non_empty("LOG_DIRECTORY") {
            self.log_directory = Some(PathBuf::from(directory));
        }
        if let Some(debug) = flag("ENABLE_DEBUG") {
            self.debug = debug;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut required = match &self.github.app {
            Some(app) => vec![
                ("github.app.app_id / GITHUB_APP_APP_ID", &app.app_id),
                ("github.app.private_key / GITHUB_APP_PRIVATE_KEY", &app.private_key),
                (
                    "github.app.installation_id / GITHUB_APP_INSTALLATION_ID",
                    &app.installation_id,
                ),
            ],
            None => vec![("github.token / GITHUB_TOKEN (or a github.app table)", &self.github.token)],
        };
        required.push(("buildkite.token / BUILDKITE_TOKEN", &self.buildkite.token));
        required.push(("buildkite.org_name / BUILDKITE_ORG_NAME", &self.buildkite.org_name));
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(BotError::ConfigError(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

/// Reads the TOML file at `path`; a missing file yields the defaults.
pub fn read_config_file(path: &Path) -> Result<BotConfig> {
    if !path.exists() {
        return Ok(BotConfig::default());
    }
    let config_str = fs::read_to_string(path).map_err(|e| {
        BotError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;
    let config: BotConfig = toml::from_str(&config_str).map_err(|e| {
        BotError::ConfigError(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })?;
    Ok(config)
}

/// Loads the configuration file, layers the process environment over it and validates.
pub fn load_config(path: &Path) -> Result<BotConfig> {
    let mut config = read_config_file(path)?;
    config.apply_env_overrides_from(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

pub struct AppState {
    pub bot: Bot,
    pub webhook_secret: Option<String>,
}

pub type SharedState = Arc<AppState>;
