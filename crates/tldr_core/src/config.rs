use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/4.0 (compatible; MSIE 6.0; Windows NT 5.2; .NET CLR 1.0.3705;)";
pub const DEFAULT_PAGE_URL: &str = "https://raw.githubusercontent.com/tldr-pages/tldr/main";
pub const DEFAULT_ARCHIVE_URL: &str = "https://tldr.sh/assets/tldr.zip";
pub const DEFAULT_ARCHIVE_MIRROR: &str =
    "https://github.com/tldr-pages/tldr-pages.github.io/raw/main/assets/tldr.zip";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SEARCH_WORKERS: usize = 8;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TldrConfig {
    #[serde(default)]
    pub remote: RemoteSection,
    #[serde(default)]
    pub display: DisplaySection,
    #[serde(default)]
    pub language: LanguageSection,
    #[serde(default)]
    pub search: SearchSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RemoteSection {
    pub page_url: Option<String>,
    pub archive_url: Option<String>,
    pub archive_mirror: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DisplaySection {
    pub color: Option<ColorChoice>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct LanguageSection {
    pub preferred: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SearchSection {
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

impl FromStr for ColorChoice {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => bail!("invalid color choice `{other}` (expected auto, always or never)"),
        }
    }
}

impl ColorChoice {
    /// `Auto` colors only a terminal, and never when `NO_COLOR` is set.
    pub fn enabled(self, is_terminal: bool, no_color: bool) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => is_terminal && !no_color,
        }
    }
}

/// Remote endpoints and HTTP identity, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub page_url: String,
    pub archive_url: String,
    pub archive_mirror: Option<String>,
    pub user_agent: String,
    pub cookie: Option<String>,
    pub timeout_ms: u64,
}

impl TldrConfig {
    pub fn remote_settings(&self) -> RemoteSettings {
        self.remote_settings_with_lookup(|key| env::var(key).ok())
    }

    fn remote_settings_with_lookup<F>(&self, lookup_env: F) -> RemoteSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        let user_agent = trimmed(lookup_env("TLDR_USER_AGENT"))
            .or_else(|| self.remote.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        RemoteSettings {
            page_url: self
                .remote
                .page_url
                .clone()
                .unwrap_or_else(|| DEFAULT_PAGE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            archive_url: self
                .remote
                .archive_url
                .clone()
                .unwrap_or_else(|| DEFAULT_ARCHIVE_URL.to_string()),
            archive_mirror: match &self.remote.archive_mirror {
                Some(mirror) if mirror.trim().is_empty() => None,
                Some(mirror) => Some(mirror.clone()),
                None => Some(DEFAULT_ARCHIVE_MIRROR.to_string()),
            },
            user_agent,
            cookie: trimmed(lookup_env("TLDR_COOKIE")),
            timeout_ms: self.remote.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Resolve the color choice: flag > config > `Auto`.
    pub fn color_choice(&self, flag: Option<ColorChoice>) -> ColorChoice {
        flag.or(self.display.color).unwrap_or_default()
    }

    pub fn preferred_language(&self) -> Option<String> {
        self.language
            .preferred
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    pub fn search_workers(&self) -> usize {
        self.search
            .workers
            .filter(|workers| *workers > 0)
            .unwrap_or(DEFAULT_SEARCH_WORKERS)
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Load and parse a TldrConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<TldrConfig> {
    if !config_path.exists() {
        return Ok(TldrConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: TldrConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
