use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use checkgate_core::DEFAULT_API_URL;

#[derive(Clone)]
pub struct Config {
    pub github_token: String,
    /// Path to the SQLite database holding application records.
    pub db_file: PathBuf,
    /// Cache GitHub GET responses by ETag.
    pub enable_github_caching: bool,
    pub github_api_url: String,
    pub port: u16,
    /// Optional bearer token for the generator endpoint.
    /// If set, requests must include `Authorization: Bearer <token>`.
    pub plugin_auth_token: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("github_token", &"<redacted>")
            .field("db_file", &self.db_file)
            .field("enable_github_caching", &self.enable_github_caching)
            .field("github_api_url", &self.github_api_url)
            .field("port", &self.port)
            .field(
                "plugin_auth_token",
                &self.plugin_auth_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let github_token = lookup("GITHUB_TOKEN")
            .filter(|s| !s.trim().is_empty())
            .context("GITHUB_TOKEN environment variable is required")?;

        let db_file = lookup("DB_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("checkgate.db"));

        let enable_github_caching =
            parse_caching_flag(lookup("ENABLE_GITHUB_CACHING").as_deref());

        let github_api_url =
            lookup("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let plugin_auth_token = parse_plugin_auth_token(lookup("PLUGIN_AUTH_TOKEN"));

        Ok(Config {
            github_token,
            db_file,
            enable_github_caching,
            github_api_url,
            port,
            plugin_auth_token,
        })
    }
}

/// Caching is on unless the flag is set to something other than `true`
/// (compared case-insensitively).
pub fn parse_caching_flag(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.eq_ignore_ascii_case("true"))
}

/// Parse PLUGIN_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace.
/// An empty token must not be accepted as a credential.
pub fn parse_plugin_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
