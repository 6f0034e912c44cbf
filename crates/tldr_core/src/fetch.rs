use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info};

use crate::config::RemoteSettings;
use crate::error::TldrError;
use crate::index::PageIndex;
use crate::page::{Page, compute_path, language_dir};

/// Remote side of the cache: single raw pages and the full archive.
pub trait PageFetchApi: Sync {
    /// Fetch one page; `remote_path` is relative to the page base URL.
    fn fetch_page(&self, remote_path: &str) -> Result<String>;
    fn fetch_archive(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpPageClient {
    client: Client,
    page_url: String,
}

impl HttpPageClient {
    pub fn new(settings: &RemoteSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent)
                .with_context(|| format!("invalid user agent `{}`", settings.user_agent))?,
        );
        if let Some(cookie) = &settings.cookie {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(cookie).context("invalid TLDR_COOKIE value")?,
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .default_headers(headers)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            page_url: settings.page_url.clone(),
        })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("failed to fetch {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {status} for {url}");
        }
        Ok(response)
    }
}

impl PageFetchApi for HttpPageClient {
    fn fetch_page(&self, remote_path: &str) -> Result<String> {
        let url = format!("{}/{}", self.page_url, remote_path.trim_start_matches('/'));
        self.get(&url)?
            .text()
            .with_context(|| format!("failed to read body of {url}"))
    }

    fn fetch_archive(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .get(url)?
            .bytes()
            .with_context(|| format!("failed to read body of {url}"))?;
        Ok(bytes.to_vec())
    }
}

/// `pages{.lang}/{platform}/{name}.md`
pub fn remote_page_path(page: &Page) -> String {
    format!(
        "{}/{}/{}.md",
        language_dir(&page.language),
        page.platform,
        page.name
    )
}

/// Downloads a page into the cache without touching the catalog.
pub fn fetch_page_body<A: PageFetchApi + ?Sized>(
    api: &A,
    cache_dir: &Path,
    page: &Page,
) -> Result<PathBuf> {
    let path = compute_path(page, cache_dir);
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("page path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create page directory {}", parent.display()))?;

    let body = api.fetch_page(&remote_page_path(page))?;
    fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
    info!(page = %page.name, platform = %page.platform, language = %page.language, "downloaded page");
    Ok(path)
}

/// Downloads a page and flips its `local` flag.
pub fn download_page<A: PageFetchApi + ?Sized>(
    index: &PageIndex,
    api: &A,
    cache_dir: &Path,
    page: &Page,
) -> Result<PathBuf> {
    let path = fetch_page_body(api, cache_dir, page).map_err(|error| TldrError::download(&error))?;
    index.mark_downloaded(page)?;
    Ok(path)
}
