use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const TLDR_DIR_NAME: &str = ".tldr";
pub const CACHE_DIR_NAME: &str = "cache";
pub const DB_FILENAME: &str = "index.sqlite";
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub cache_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub home_dir: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let home_dir = dirs::home_dir().context("failed to locate the home directory")?;
        Ok(Self { cwd, home_dir })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub tldr_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub cache_source: ValueSource,
    pub config_source: ValueSource,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub cache_dir_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
}

impl ResolvedPaths {
    /// Lays out every path under a single cache root; used by tests and `--cache-dir`.
    pub fn under(tldr_dir: &Path) -> Self {
        let cache_dir = tldr_dir.join(CACHE_DIR_NAME);
        Self {
            tldr_dir: tldr_dir.to_path_buf(),
            db_path: cache_dir.join(DB_FILENAME),
            cache_dir,
            config_path: tldr_dir.join(CONFIG_FILENAME),
            cache_source: ValueSource::Default,
            config_source: ValueSource::Default,
        }
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "tldr_dir={}\ncache_dir={} ({})\ndb_path={}\nconfig_path={} ({})",
            normalize_for_display(&self.tldr_dir),
            normalize_for_display(&self.cache_dir),
            self.cache_source.as_str(),
            normalize_for_display(&self.db_path),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let db_exists = paths.db_path.exists();
    let db_size_bytes = if db_exists {
        let metadata = fs::metadata(&paths.db_path)
            .with_context(|| format!("failed to inspect {}", paths.db_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    Ok(RuntimeStatus {
        cache_dir_exists: paths.cache_dir.is_dir(),
        db_exists,
        db_size_bytes,
        config_exists: paths.config_path.exists(),
    })
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let tldr_dir = context.home_dir.join(TLDR_DIR_NAME);

    let (cache_dir, cache_source) = if let Some(path) = overrides.cache_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("TLDR_CACHE_DIR")) {
        (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        )
    } else {
        (tldr_dir.join(CACHE_DIR_NAME), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("TLDR_CONFIG")) {
        (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        )
    } else {
        (tldr_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        db_path: cache_dir.join(DB_FILENAME),
        tldr_dir,
        cache_dir,
        config_path,
        cache_source,
        config_source,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
