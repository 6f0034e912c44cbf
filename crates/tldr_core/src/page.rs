use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_LANGUAGE: &str = "en";
pub const COMMON_PLATFORM: &str = "common";
pub const PAGES_DIR: &str = "pages";

/// One platform and language specific page for a command name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Page {
    pub name: String,
    pub platform: String,
    pub language: String,
    pub local: bool,
}

impl Page {
    pub fn new(name: &str, platform: &str, language: &str, local: bool) -> Self {
        Self {
            name: name.to_string(),
            platform: platform.to_string(),
            language: language.to_string(),
            local,
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Lowercases, drops leading whitespace and joins words with hyphens.
pub fn normalize_page_name(raw: &str) -> String {
    raw.to_lowercase().trim_start().replace(' ', "-")
}

/// `pages` for the default language, `pages.{language}` otherwise.
pub fn language_dir(language: &str) -> String {
    if language == DEFAULT_LANGUAGE {
        PAGES_DIR.to_string()
    } else {
        format!("{PAGES_DIR}.{language}")
    }
}

/// Inverse of [`language_dir`]; `None` for directories that are not page trees.
pub fn language_from_dir(dir_name: &str) -> Option<String> {
    if dir_name == PAGES_DIR {
        return Some(DEFAULT_LANGUAGE.to_string());
    }
    dir_name
        .strip_prefix(PAGES_DIR)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|language| !language.is_empty())
        .map(str::to_string)
}

pub fn compute_path(page: &Page, cache_root: &Path) -> PathBuf {
    cache_root
        .join(language_dir(&page.language))
        .join(&page.platform)
        .join(format!("{}.md", page.name))
}

pub fn current_platform() -> &'static str {
    if cfg!(target_os = "macos") {
        "osx"
    } else if cfg!(windows) {
        "windows"
    } else if cfg!(unix) {
        "linux"
    } else {
        COMMON_PLATFORM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_multi_word_names() {
        assert_eq!(normalize_page_name("  Git Commit"), "git-commit");
        assert_eq!(normalize_page_name("TAR"), "tar");
    }

    #[test]
    fn default_language_uses_unqualified_pages_dir() {
        let root = Path::new("/home/u/.tldr/cache");
        let english = Page::new("tar", "common", "en", true);
        let french = Page::new("tar", "linux", "fr", false);
        assert_eq!(
            compute_path(&english, root),
            root.join("pages").join("common").join("tar.md")
        );
        assert_eq!(
            compute_path(&french, root),
            root.join("pages.fr").join("linux").join("tar.md")
        );
    }

    #[test]
    fn language_dir_roundtrips_for_regional_codes() {
        assert_eq!(language_from_dir(&language_dir("pt_BR")).as_deref(), Some("pt_BR"));
        assert_eq!(language_from_dir("pages").as_deref(), Some("en"));
        assert_eq!(language_from_dir("pages."), None);
        assert_eq!(language_from_dir("index.sqlite"), None);
    }
}
