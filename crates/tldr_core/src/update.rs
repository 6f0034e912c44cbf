use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::config::RemoteSettings;
use crate::error::TldrError;
use crate::fetch::PageFetchApi;
use crate::index::{PageIndex, page_tree_dirs};
use crate::page::language_from_dir;
use crate::runtime::ResolvedPaths;
use crate::status::StatusLine;

/// Archive trees are extracted here before replacing the live ones.
const STAGING_DIR: &str = ".refresh";

/// A full refresh is due once the last one is more than this many days old.
pub const STALE_AFTER_DAYS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub pages: usize,
    pub languages: usize,
    pub removed_dirs: Vec<PathBuf>,
    pub source_url: String,
}

/// Everything a full refresh needs besides the catalog itself.
pub struct Refresher<'a, A: PageFetchApi + ?Sized> {
    pub api: &'a A,
    pub remote: &'a RemoteSettings,
    pub env_languages: &'a [String],
    pub today: NaiveDate,
    pub show_status: bool,
    pub colored: bool,
    /// Receives one-line outcome notices, whether or not status output is shown.
    pub notices: &'a dyn Fn(&str),
}

/// Default notice sink.
pub fn print_notice(message: &str) {
    eprintln!("{message}");
}

impl<A: PageFetchApi + ?Sized> Refresher<'_, A> {
    pub fn notify(&self, message: &str) {
        (self.notices)(message);
    }

    pub fn refresh(&self, index: &mut PageIndex, cache_dir: &Path) -> Result<RefreshReport> {
        let status = StatusLine::start("Updating page cache", self.show_status, self.colored);
        let report = refresh_cache(
            index,
            cache_dir,
            self.api,
            self.remote,
            self.env_languages,
            self.today,
        )?;
        status.finish();
        Ok(report)
    }
}

/// Removes everything under the cache root, including the catalog.
pub fn clear_cache(cache_dir: &Path) -> Result<()> {
    let result = (|| -> Result<()> {
        if cache_dir.is_file() {
            fs::remove_file(cache_dir)
                .with_context(|| format!("failed to remove {}", cache_dir.display()))?;
        }
        if cache_dir.is_dir() {
            fs::remove_dir_all(cache_dir)
                .with_context(|| format!("failed to remove {}", cache_dir.display()))?;
        }
        fs::create_dir_all(cache_dir)
            .with_context(|| format!("failed to create {}", cache_dir.display()))
    })();
    result.map_err(|error| TldrError::CacheClear(format!("{error:#}")).into())
}

/// Replaces the page trees with a fresh archive and rebuilds the catalog.
pub fn refresh_cache<A: PageFetchApi + ?Sized>(
    index: &mut PageIndex,
    cache_dir: &Path,
    api: &A,
    remote: &RemoteSettings,
    env_languages: &[String],
    today: NaiveDate,
) -> Result<RefreshReport> {
    let (bytes, source_url) = download_archive(api, remote)?;

    let staging = cache_dir.join(STAGING_DIR);
    remove_dir_if_present(&staging)?;
    if let Err(error) = extract_archive(&bytes, &staging) {
        remove_dir_if_present(&staging)?;
        return Err(TldrError::archive(&error).into());
    }
    swap_in_page_trees(&staging, cache_dir)?;

    let rebuilt = index.rebuild(cache_dir, env_languages, today)?;
    let removed_dirs = remove_remote_only_trees(index, cache_dir)?;
    info!(
        pages = rebuilt.inserted_rows,
        languages = rebuilt.languages,
        removed = removed_dirs.len(),
        "page cache updated"
    );

    Ok(RefreshReport {
        pages: rebuilt.inserted_rows,
        languages: rebuilt.languages,
        removed_dirs,
        source_url,
    })
}

/// Opens the catalog, running a first refresh when it does not exist yet.
pub fn ensure_index<A: PageFetchApi + ?Sized>(
    paths: &ResolvedPaths,
    refresher: &Refresher<'_, A>,
) -> Result<(PageIndex, Option<RefreshReport>)> {
    let missing = !paths.db_path.exists();
    let mut index = PageIndex::open(&paths.db_path)?;
    if !missing {
        return Ok((index, None));
    }
    debug!(path = %paths.db_path.display(), "page index not found");
    refresher.notify("Database not found.");
    let report = refresher.refresh(&mut index, &paths.cache_dir)?;
    Ok((index, Some(report)))
}

/// Current UTC date, as recorded for `last-update`.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn is_stale(last_update: Option<NaiveDate>, today: NaiveDate) -> bool {
    match last_update {
        Some(last_update) => (today - last_update).num_days() > STALE_AFTER_DAYS,
        None => true,
    }
}

fn download_archive<A: PageFetchApi + ?Sized>(
    api: &A,
    remote: &RemoteSettings,
) -> Result<(Vec<u8>, String)> {
    match api.fetch_archive(&remote.archive_url) {
        Ok(bytes) => Ok((bytes, remote.archive_url.clone())),
        Err(primary) => {
            let Some(mirror) = &remote.archive_mirror else {
                return Err(TldrError::archive(&primary).into());
            };
            warn!(url = %remote.archive_url, error = %primary, "archive download failed, trying mirror");
            let bytes = api
                .fetch_archive(mirror)
                .map_err(|error| TldrError::archive(&error))?;
            Ok((bytes, mirror.clone()))
        }
    }
}

fn extract_archive(bytes: &[u8], cache_dir: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("failed to open page archive")?;
    for position in 0..archive.len() {
        let mut entry = archive
            .by_index(position)
            .with_context(|| format!("failed to read archive entry {position}"))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            bail!(
                "archive entry `{}` tries to extract outside the cache",
                entry.name()
            );
        };
        let destination = cache_dir.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&destination)
                .with_context(|| format!("failed to create {}", destination.display()))?;
            continue;
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut output = File::create(&destination)
            .with_context(|| format!("failed to create {}", destination.display()))?;
        io::copy(&mut entry, &mut output)
            .with_context(|| format!("failed to extract {}", destination.display()))?;
    }
    Ok(())
}

/// Replaces the live `pages*` trees with the staged ones, then drops the staging root.
fn swap_in_page_trees(staging: &Path, cache_dir: &Path) -> Result<()> {
    for dir in page_tree_dirs(cache_dir)? {
        fs::remove_dir_all(&dir)
            .map_err(|error| TldrError::CacheClear(format!("{}: {error}", dir.display())))?;
    }
    for staged in page_tree_dirs(staging)? {
        let Some(name) = staged.file_name() else {
            continue;
        };
        let destination = cache_dir.join(name);
        fs::rename(&staged, &destination).with_context(|| {
            format!(
                "failed to move {} to {}",
                staged.display(),
                destination.display()
            )
        })?;
    }
    remove_dir_if_present(staging)
}

fn remove_dir_if_present(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        fs::remove_dir_all(dir).with_context(|| format!("failed to remove {}", dir.display()))?;
    }
    Ok(())
}

/// Drops language trees whose pages are not kept locally; they are fetched on demand.
fn remove_remote_only_trees(index: &PageIndex, cache_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for dir in page_tree_dirs(cache_dir)? {
        let Some(language) = dir
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(language_from_dir)
        else {
            continue;
        };
        let pages = index.find_by_language(&language)?;
        if pages.first().is_some_and(|page| page.local) {
            continue;
        }
        debug!(language = %language, dir = %dir.display(), "removing remote-only language tree");
        fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
        removed.push(dir);
    }
    Ok(removed)
}
