use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::debug;

use crate::error::TldrError;
use crate::fetch::{PageFetchApi, fetch_page_body};
use crate::page::{Page, compute_path};
use crate::render::Renderer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub page: Page,
    pub line: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOutcome {
    /// Sorted by page name, then platform; lines keep their page order.
    pub hits: Vec<SearchHit>,
    /// Pages fetched during the search, still to be marked in the catalog.
    pub downloaded: Vec<Page>,
}

impl SearchOutcome {
    /// Process exit status for a search: 1 when nothing matched.
    pub fn exit_status(&self) -> u8 {
        if self.hits.is_empty() { 1 } else { 0 }
    }
}

/// Greps every page for `needle` on a pool of at most `workers` threads,
/// downloading pages that are not cached yet.
pub fn search_pages<A: PageFetchApi + ?Sized>(
    api: &A,
    cache_dir: &Path,
    pages: &[Page],
    needle: &str,
    workers: usize,
) -> Result<SearchOutcome> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|index| format!("tldr-search-{index}"))
        .build()
        .context("failed to build search worker pool")?;

    let scanned = pool.install(|| {
        pages
            .par_iter()
            .map(|page| scan_page(api, cache_dir, page, needle))
            .collect::<Result<Vec<_>>>()
    })?;

    let mut outcome = SearchOutcome::default();
    for (hits, downloaded) in scanned {
        outcome.hits.extend(hits);
        outcome.downloaded.extend(downloaded);
    }
    outcome.hits.sort_by(|left, right| {
        left.page
            .name
            .cmp(&right.page.name)
            .then_with(|| left.page.platform.cmp(&right.page.platform))
    });
    debug!(
        pages = pages.len(),
        hits = outcome.hits.len(),
        downloaded = outcome.downloaded.len(),
        "search finished"
    );
    Ok(outcome)
}

fn scan_page<A: PageFetchApi + ?Sized>(
    api: &A,
    cache_dir: &Path,
    page: &Page,
    needle: &str,
) -> Result<(Vec<SearchHit>, Option<Page>)> {
    let (path, downloaded) = if page.local {
        (compute_path(page, cache_dir), None)
    } else {
        let path = fetch_page_body(api, cache_dir, page).map_err(|error| TldrError::download(&error))?;
        let mut local = page.clone();
        local.local = true;
        (path, Some(local))
    };
    if !path.is_file() {
        return Err(TldrError::FileMissing(path).into());
    }
    let content =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let hits = content
        .lines()
        .filter(|line| line.contains(needle))
        .map(|line| SearchHit {
            page: page.clone(),
            line: line.to_string(),
        })
        .collect();
    Ok((hits, downloaded))
}

/// One output line per hit: the page name padded to a common width, a tab,
/// then the matching line with `needle` highlighted.
pub fn format_search_results(hits: &[SearchHit], needle: &str, renderer: &Renderer) -> Vec<String> {
    let width = hits
        .iter()
        .map(|hit| hit.page.name.chars().count())
        .max()
        .unwrap_or(0)
        + 1;
    hits.iter()
        .map(|hit| {
            let label = format!("{:<width$}", format!("{}:", hit.page.name));
            format!(
                "{}\t{}",
                renderer.search_name(&label),
                renderer.render_search_line(&hit.line, needle)
            )
        })
        .collect()
}
