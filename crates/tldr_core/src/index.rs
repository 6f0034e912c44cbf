use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{Connection, params};
use tracing::debug;
use walkdir::WalkDir;

use crate::locale::trim_posix_lang;
use crate::page::{COMMON_PLATFORM, DEFAULT_LANGUAGE, PAGES_DIR, Page, language_from_dir};

const INDEX_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS pages (
    name TEXT NOT NULL,
    platform TEXT NOT NULL,
    lang TEXT NOT NULL,
    local INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS names_index ON pages(name, platform, lang, local);
CREATE INDEX IF NOT EXISTS lang_platform_index ON pages(lang, platform, name, local);
CREATE INDEX IF NOT EXISTS platform_index ON pages(platform);
CREATE INDEX IF NOT EXISTS lang_index ON pages(lang);

CREATE TABLE IF NOT EXISTS config (
    parameter TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const DROP_SCHEMA_SQL: &str = "DROP TABLE IF EXISTS pages; DROP TABLE IF EXISTS config;";

pub const LAST_UPDATE_KEY: &str = "last-update";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub inserted_rows: usize,
    pub languages: usize,
}

/// A page file discovered while scanning an extracted archive tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScannedPage {
    pub language: String,
    pub platform: String,
    pub name: String,
}

/// The persistent page catalog.
pub struct PageIndex {
    connection: Connection,
}

impl PageIndex {
    pub fn open(db_path: &Path) -> Result<Self> {
        ensure_parent_dir(db_path)?;
        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        debug!(path = %db_path.display(), "opened page index");
        Ok(Self { connection })
    }

    pub fn create_schema(&self) -> Result<()> {
        self.connection
            .execute_batch(INDEX_SCHEMA_SQL)
            .context("failed to initialize page index schema")
    }

    /// Replaces the whole catalog with the pages found under `cache_dir`.
    pub fn rebuild(
        &mut self,
        cache_dir: &Path,
        env_languages: &[String],
        today: NaiveDate,
    ) -> Result<RebuildReport> {
        let scanned = scan_page_files(cache_dir)?;
        let pages = scanned
            .into_iter()
            .map(|file| {
                let local = is_local_language(&file.language, env_languages);
                Page {
                    name: file.name,
                    platform: file.platform,
                    language: file.language,
                    local,
                }
            })
            .collect::<Vec<_>>();
        let languages = pages
            .iter()
            .map(|page| page.language.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        let transaction = self
            .connection
            .transaction()
            .context("failed to start index rebuild transaction")?;
        transaction
            .execute_batch(DROP_SCHEMA_SQL)
            .context("failed to drop previous page index")?;
        transaction
            .execute_batch(INDEX_SCHEMA_SQL)
            .context("failed to initialize page index schema")?;
        transaction
            .execute(
                "INSERT INTO config (parameter, value) VALUES (?1, ?2)",
                params![LAST_UPDATE_KEY, today.format(DATE_FORMAT).to_string()],
            )
            .context("failed to record last update")?;
        let inserted_rows = insert_rows(&transaction, &pages)?;
        transaction
            .commit()
            .context("failed to commit index rebuild transaction")?;

        debug!(inserted_rows, languages, "rebuilt page index");
        Ok(RebuildReport {
            inserted_rows,
            languages,
        })
    }

    pub fn insert_pages(&mut self, pages: &[Page]) -> Result<usize> {
        self.create_schema()?;
        let transaction = self
            .connection
            .transaction()
            .context("failed to start page insert transaction")?;
        let inserted = insert_rows(&transaction, pages)?;
        transaction
            .commit()
            .context("failed to commit page insert transaction")?;
        Ok(inserted)
    }

    pub fn find_by_name(&self, name: &str) -> Result<Vec<Page>> {
        self.query_pages(
            "SELECT name, platform, lang, local FROM pages
             WHERE name = ?1
             ORDER BY platform DESC, rowid ASC",
            params![name],
        )
        .with_context(|| format!("failed to look up page {name}"))
    }

    pub fn find_by_language_and_platform(&self, language: &str, platform: &str) -> Result<Vec<Page>> {
        self.query_pages(
            "SELECT name, platform, lang, local FROM pages
             WHERE lang = ?1 AND (platform = ?2 OR platform = ?3)
             ORDER BY name ASC, platform ASC",
            params![language, platform, COMMON_PLATFORM],
        )
        .with_context(|| format!("failed to list {language} pages for {platform}"))
    }

    pub fn find_by_language(&self, language: &str) -> Result<Vec<Page>> {
        self.query_pages(
            "SELECT name, platform, lang, local FROM pages
             WHERE lang = ?1
             ORDER BY name ASC, platform ASC",
            params![language],
        )
        .with_context(|| format!("failed to list {language} pages"))
    }

    pub fn list_platforms(&self) -> Result<BTreeSet<String>> {
        let mut statement = self
            .connection
            .prepare("SELECT DISTINCT platform FROM pages")
            .context("failed to prepare platform listing")?;
        let rows = statement
            .query_map([], |row| row.get::<_, String>(0))
            .context("failed to list platforms")?;
        let mut out = BTreeSet::new();
        for row in rows {
            out.insert(row.context("failed to decode platform row")?);
        }
        Ok(out)
    }

    pub fn list_languages(&self) -> Result<Vec<String>> {
        let mut statement = self
            .connection
            .prepare("SELECT DISTINCT lang FROM pages ORDER BY lang ASC")
            .context("failed to prepare language listing")?;
        let rows = statement
            .query_map([], |row| row.get::<_, String>(0))
            .context("failed to list languages")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode language row")?);
        }
        Ok(out)
    }

    pub fn language_exists(&self, language: &str) -> Result<bool> {
        let exists: i64 = self
            .connection
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM pages WHERE lang = ?1)",
                [language],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to check language {language}"))?;
        Ok(exists == 1)
    }

    pub fn mark_downloaded(&self, page: &Page) -> Result<()> {
        self.connection
            .execute(
                "UPDATE pages SET local = 1 WHERE name = ?1 AND platform = ?2 AND lang = ?3",
                params![page.name, page.platform, page.language],
            )
            .with_context(|| {
                format!(
                    "failed to mark {}/{}/{} as downloaded",
                    page.language, page.platform, page.name
                )
            })?;
        Ok(())
    }

    pub fn last_update(&self) -> Result<Option<NaiveDate>> {
        if !table_exists(&self.connection, "config")? {
            return Ok(None);
        }
        let mut statement = self
            .connection
            .prepare("SELECT value FROM config WHERE parameter = ?1 LIMIT 1")
            .context("failed to prepare last update query")?;
        let mut rows = statement
            .query([LAST_UPDATE_KEY])
            .context("failed to read last update")?;
        let row = match rows.next().context("failed to decode last update row")? {
            Some(row) => row,
            None => return Ok(None),
        };
        let value: String = row.get(0).context("failed to decode last update value")?;
        let date = NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
            .with_context(|| format!("invalid last update date `{value}`"))?;
        Ok(Some(date))
    }

    pub fn set_last_update(&self, date: NaiveDate) -> Result<()> {
        self.create_schema()?;
        self.connection
            .execute(
                "INSERT INTO config (parameter, value) VALUES (?1, ?2)
                ON CONFLICT(parameter) DO UPDATE SET value = excluded.value",
                params![LAST_UPDATE_KEY, date.format(DATE_FORMAT).to_string()],
            )
            .context("failed to set last update")?;
        Ok(())
    }

    pub fn count_pages(&self) -> Result<usize> {
        if !table_exists(&self.connection, "pages")? {
            return Ok(0);
        }
        let count: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))
            .context("failed to count pages")?;
        usize::try_from(count).context("page count does not fit into usize")
    }

    fn query_pages<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Page>> {
        if !table_exists(&self.connection, "pages")? {
            return Ok(Vec::new());
        }
        let mut statement = self
            .connection
            .prepare(sql)
            .context("failed to prepare page query")?;
        let rows = statement
            .query_map(params, |row| {
                let local: i64 = row.get(3)?;
                Ok(Page {
                    name: row.get(0)?,
                    platform: row.get(1)?,
                    language: row.get(2)?,
                    local: local == 1,
                })
            })
            .context("failed to run page query")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode page row")?);
        }
        Ok(out)
    }
}

/// Walks every `pages*` tree and returns one entry per markdown file, sorted.
pub fn scan_page_files(cache_dir: &Path) -> Result<Vec<ScannedPage>> {
    let mut out = Vec::new();
    for language_dir in page_tree_dirs(cache_dir)? {
        let Some(language) = language_dir
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(language_from_dir)
        else {
            continue;
        };

        let platform_dirs = fs::read_dir(&language_dir)
            .with_context(|| format!("failed to read {}", language_dir.display()))?;
        for platform_dir in platform_dirs {
            let platform_dir = platform_dir
                .with_context(|| format!("failed to read {}", language_dir.display()))?;
            if !platform_dir.file_type().map(|kind| kind.is_dir()).unwrap_or(false) {
                continue;
            }
            let platform = platform_dir.file_name().to_string_lossy().to_string();
            let base = platform_dir.path();
            for entry in WalkDir::new(&base).follow_links(false) {
                let entry = entry.with_context(|| format!("failed to walk {}", base.display()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
                    continue;
                }
                let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                    continue;
                };
                out.push(ScannedPage {
                    language: language.clone(),
                    platform: platform.clone(),
                    name: name.to_string(),
                });
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Top-level `pages` / `pages.{lang}` directories of a cache root.
pub fn page_tree_dirs(cache_dir: &Path) -> Result<Vec<PathBuf>> {
    if !cache_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    let entries =
        fs::read_dir(cache_dir).with_context(|| format!("failed to read {}", cache_dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read {}", cache_dir.display()))?;
        let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
        if is_dir && entry.file_name().to_string_lossy().starts_with(PAGES_DIR) {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

/// Pages are kept locally for the default language and for every language
/// sharing a base language (the part before `_`) with one of the user's languages.
pub fn is_local_language(language: &str, env_languages: &[String]) -> bool {
    language == DEFAULT_LANGUAGE
        || env_languages
            .iter()
            .any(|candidate| trim_posix_lang(candidate) == trim_posix_lang(language))
}

fn insert_rows(connection: &Connection, pages: &[Page]) -> Result<usize> {
    let mut statement = connection
        .prepare("INSERT INTO pages (name, platform, lang, local) VALUES (?1, ?2, ?3, ?4)")
        .context("failed to prepare page insert")?;
    let mut inserted = 0usize;
    for page in pages {
        statement
            .execute(params![
                page.name,
                page.platform,
                page.language,
                if page.local { 1i64 } else { 0i64 },
            ])
            .with_context(|| {
                format!("failed to insert {}/{}/{}", page.language, page.platform, page.name)
            })?;
        inserted += 1;
    }
    Ok(inserted)
}

fn table_exists(connection: &Connection, table_name: &str) -> Result<bool> {
    let exists: i64 = connection
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table_name],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to inspect sqlite_master for table {table_name}"))?;
    Ok(exists == 1)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))
}
