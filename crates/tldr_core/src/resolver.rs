use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info};

use crate::error::TldrError;
use crate::fetch::{PageFetchApi, download_page};
use crate::index::PageIndex;
use crate::locale::LanguagePreference;
use crate::page::{
    COMMON_PLATFORM, DEFAULT_LANGUAGE, Page, compute_path, current_platform, normalize_page_name,
};
use crate::status::StatusLine;
use crate::update::{RefreshReport, Refresher, STALE_AFTER_DAYS, is_stale};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveRequest {
    pub name: String,
    /// Explicit language; disables preference derivation and the alternative fallback.
    pub language: Option<String>,
    pub platform: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPage {
    pub page: Page,
    pub path: PathBuf,
    /// Set when the page was authored for another, non-common platform.
    pub alt_platform: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(ResolvedPage),
    NotFound { name: String },
    NeedsTranslation { name: String, language: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOutcome {
    pub resolution: Resolution,
    /// No preferred language was available and the default one was used.
    pub used_default_language: bool,
    pub refresh: Option<RefreshReport>,
}

pub struct PageResolver<'a, A: PageFetchApi + ?Sized> {
    index: &'a mut PageIndex,
    cache_dir: &'a Path,
    remote: &'a Refresher<'a, A>,
    preference: &'a LanguagePreference,
}

impl<'a, A: PageFetchApi + ?Sized> PageResolver<'a, A> {
    pub fn new(
        index: &'a mut PageIndex,
        cache_dir: &'a Path,
        remote: &'a Refresher<'a, A>,
        preference: &'a LanguagePreference,
    ) -> Self {
        Self {
            index,
            cache_dir,
            remote,
            preference,
        }
    }

    pub fn resolve(&mut self, request: &ResolveRequest) -> Result<ResolveOutcome> {
        let name = normalize_page_name(&request.name);
        let (languages, used_default_language) = match &request.language {
            Some(language) => {
                ensure_known_language(self.index, language)?;
                (vec![language.clone()], false)
            }
            None => self.preferred_languages()?,
        };
        let platform = request
            .platform
            .clone()
            .unwrap_or_else(|| current_platform().to_string());

        let mut refresh = None;
        let mut candidates = self.index.find_by_name(&name)?;
        if candidates.is_empty() && is_stale(self.index.last_update()?, self.remote.today) {
            self.remote
                .notify(&format!("Page not found. Cache older than {STALE_AFTER_DAYS} days."));
            refresh = Some(self.remote.refresh(self.index, self.cache_dir)?);
            candidates = self.index.find_by_name(&name)?;
        }
        debug!(name = %name, platform = %platform, ?languages, candidates = candidates.len(), "resolving page");

        let resolution = if candidates.is_empty() {
            Resolution::NotFound { name }
        } else {
            rank_pages(&mut candidates, &languages, &platform);
            match select_page(&candidates, &languages, &platform, request.language.is_some()) {
                Selection::Found { page, alt_platform } => {
                    Resolution::Found(self.materialize(page, alt_platform)?)
                }
                Selection::NeedsTranslation => Resolution::NeedsTranslation {
                    name,
                    language: languages.first().cloned().unwrap_or_default(),
                },
                Selection::NotFound => Resolution::NotFound { name },
            }
        };

        Ok(ResolveOutcome {
            resolution,
            used_default_language,
            refresh,
        })
    }

    fn preferred_languages(&self) -> Result<(Vec<String>, bool)> {
        let available = self.index.list_languages()?;
        let languages = self.preference.preferred_languages(&available);
        if languages.is_empty() {
            info!("no preferred language available, using {DEFAULT_LANGUAGE}");
            return Ok((vec![DEFAULT_LANGUAGE.to_string()], true));
        }
        Ok((languages, false))
    }

    fn materialize(&mut self, mut page: Page, alt_platform: Option<String>) -> Result<ResolvedPage> {
        if !page.local {
            let status = StatusLine::start(
                &format!("Downloading {}", page.name),
                self.remote.show_status,
                self.remote.colored,
            );
            download_page(self.index, self.remote.api, self.cache_dir, &page)?;
            status.finish();
            page.local = true;
        }
        let path = compute_path(&page, self.cache_dir);
        Ok(ResolvedPage {
            page,
            path,
            alt_platform,
        })
    }
}

/// Fails with [`TldrError::UnknownLanguage`] unless the catalog has pages in `language`.
pub fn ensure_known_language(index: &PageIndex, language: &str) -> Result<()> {
    if index.language_exists(language)? {
        Ok(())
    } else {
        Err(TldrError::UnknownLanguage(language.to_string()).into())
    }
}

/// Stable sort by language preference, then by `[platform, common]`;
/// entries missing from either list sort last.
pub fn rank_pages(pages: &mut [Page], languages: &[String], platform: &str) {
    pages.sort_by_key(|page| rank_key(page, languages, platform));
}

fn rank_key(page: &Page, languages: &[String], platform: &str) -> (usize, usize) {
    let language_rank = languages
        .iter()
        .position(|language| *language == page.language)
        .unwrap_or(usize::MAX);
    let platform_rank = [platform, COMMON_PLATFORM]
        .iter()
        .position(|candidate| *candidate == page.platform)
        .unwrap_or(usize::MAX);
    (language_rank, platform_rank)
}

#[derive(Debug, PartialEq, Eq)]
enum Selection {
    Found {
        page: Page,
        alt_platform: Option<String>,
    },
    NeedsTranslation,
    NotFound,
}

fn select_page(
    ranked: &[Page],
    languages: &[String],
    platform: &str,
    explicit_language: bool,
) -> Selection {
    let on_platform = |wanted: &str| {
        languages.iter().find_map(|language| {
            ranked
                .iter()
                .find(|page| page.platform == wanted && page.language == *language)
        })
    };
    if let Some(page) = on_platform(platform).or_else(|| on_platform(COMMON_PLATFORM)) {
        return Selection::Found {
            page: page.clone(),
            alt_platform: None,
        };
    }
    if explicit_language {
        return Selection::NeedsTranslation;
    }

    let default_missing = !languages.iter().any(|language| language == DEFAULT_LANGUAGE);
    let alternative = ranked
        .iter()
        .find(|page| default_missing && page.language == DEFAULT_LANGUAGE)
        .or_else(|| ranked.iter().find(|page| languages.contains(&page.language)));
    match alternative {
        Some(page) => {
            let alt_platform = (page.platform != platform && page.platform != COMMON_PLATFORM)
                .then(|| page.platform.clone());
            Selection::Found {
                page: page.clone(),
                alt_platform,
            }
        }
        None => Selection::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;

    use chrono::NaiveDate;
    use tempfile::{TempDir, tempdir};

    use super::{
        PageResolver, Resolution, ResolveOutcome, ResolveRequest, Selection, rank_pages,
        select_page,
    };
    use crate::config::{RemoteSettings, TldrConfig};
    use crate::error::TldrError;
    use crate::fetch::tests::MockApi;
    use crate::index::PageIndex;
    use crate::locale::LanguagePreference;
    use crate::page::{Page, compute_path};
    use crate::render::Renderer;
    use crate::runtime::ResolvedPaths;
    use crate::update::Refresher;
    use crate::update::tests::build_archive;

    struct Fixture {
        _temp: TempDir,
        paths: ResolvedPaths,
        index: PageIndex,
        remote: RemoteSettings,
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).expect("date")
    }

    fn fixture(pages: &[Page], last_update: NaiveDate) -> Fixture {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::under(temp.path());
        let mut index = PageIndex::open(&paths.db_path).expect("open");
        index.insert_pages(pages).expect("insert");
        index.set_last_update(last_update).expect("last update");
        Fixture {
            _temp: temp,
            paths,
            index,
            remote: TldrConfig::default().remote_settings(),
        }
    }

    fn english() -> LanguagePreference {
        LanguagePreference {
            configured: Some("en".to_string()),
            ..LanguagePreference::default()
        }
    }

    fn request(name: &str, platform: &str, language: Option<&str>) -> ResolveRequest {
        ResolveRequest {
            name: name.to_string(),
            language: language.map(str::to_string),
            platform: Some(platform.to_string()),
        }
    }

    fn resolve(
        fixture: &mut Fixture,
        api: &MockApi,
        preference: &LanguagePreference,
        request: &ResolveRequest,
    ) -> anyhow::Result<ResolveOutcome> {
        let refresher = Refresher {
            api,
            remote: &fixture.remote,
            env_languages: &[],
            today: today(),
            show_status: false,
            colored: false,
            notices: &|_: &str| {},
        };
        PageResolver::new(
            &mut fixture.index,
            &fixture.paths.cache_dir,
            &refresher,
            preference,
        )
        .resolve(request)
    }

    fn found(outcome: ResolveOutcome) -> (Page, Option<String>) {
        match outcome.resolution {
            Resolution::Found(resolved) => (resolved.page, resolved.alt_platform),
            other => panic!("expected a page, got {other:?}"),
        }
    }

    fn languages(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|code| code.to_string()).collect()
    }

    #[test]
    fn common_page_serves_any_platform_without_warning() {
        let mut fixture = fixture(&[Page::new("tar", "common", "en", true)], today());
        let outcome = resolve(
            &mut fixture,
            &MockApi::default(),
            &english(),
            &request("tar", "linux", None),
        )
        .expect("resolve");
        let (page, alt_platform) = found(outcome);
        assert_eq!(page, Page::new("tar", "common", "en", true));
        assert_eq!(alt_platform, None);
    }

    #[test]
    fn other_platform_page_carries_warning() {
        let mut fixture = fixture(&[Page::new("foo", "windows", "en", true)], today());
        let outcome = resolve(
            &mut fixture,
            &MockApi::default(),
            &english(),
            &request("foo", "linux", None),
        )
        .expect("resolve");
        let (page, alt_platform) = found(outcome);
        assert_eq!(page.platform, "windows");
        assert_eq!(alt_platform.as_deref(), Some("windows"));
    }

    #[test]
    fn explicit_language_without_page_needs_translation() {
        let mut fixture = fixture(
            &[
                Page::new("bar", "linux", "fr", true),
                Page::new("ls", "common", "en", true),
            ],
            today(),
        );
        let outcome = resolve(
            &mut fixture,
            &MockApi::default(),
            &english(),
            &request("bar", "linux", Some("en")),
        )
        .expect("resolve");
        assert_eq!(
            outcome.resolution,
            Resolution::NeedsTranslation {
                name: "bar".to_string(),
                language: "en".to_string()
            }
        );
    }

    #[test]
    fn unknown_explicit_language_is_rejected() {
        let mut fixture = fixture(&[Page::new("ls", "common", "en", true)], today());
        let error = resolve(
            &mut fixture,
            &MockApi::default(),
            &english(),
            &request("ls", "linux", Some("xx")),
        )
        .expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<TldrError>(),
            Some(TldrError::UnknownLanguage(language)) if language == "xx"
        ));
    }

    #[test]
    fn stale_cache_refreshes_then_reports_not_found() {
        let stale = NaiveDate::from_ymd_opt(2026, 10, 10).expect("date");
        let mut fixture = fixture(&[Page::new("ls", "common", "en", true)], stale);
        let mut api = MockApi::default();
        api.archives.insert(
            fixture.remote.archive_url.clone(),
            build_archive(&[("pages/common/ls.md", "# ls\n")]),
        );

        let outcome = resolve(&mut fixture, &api, &english(), &request("baz", "linux", None))
            .expect("resolve");
        assert_eq!(
            outcome.resolution,
            Resolution::NotFound {
                name: "baz".to_string()
            }
        );
        assert_eq!(outcome.refresh.map(|report| report.pages), Some(1));
        assert_eq!(fixture.index.last_update().expect("last update"), Some(today()));
    }

    #[test]
    fn stale_refresh_notice_is_sent_without_status_output() {
        let stale = NaiveDate::from_ymd_opt(2026, 10, 10).expect("date");
        let mut fixture = fixture(&[], stale);
        let mut api = MockApi::default();
        api.archives.insert(
            fixture.remote.archive_url.clone(),
            build_archive(&[("pages/common/ls.md", "# ls\n")]),
        );
        let notices = RefCell::new(Vec::new());
        let record = |message: &str| notices.borrow_mut().push(message.to_string());
        let refresher = Refresher {
            api: &api,
            remote: &fixture.remote,
            env_languages: &[],
            today: today(),
            show_status: false,
            colored: false,
            notices: &record,
        };

        PageResolver::new(
            &mut fixture.index,
            &fixture.paths.cache_dir,
            &refresher,
            &english(),
        )
        .resolve(&request("baz", "linux", None))
        .expect("resolve");

        assert_eq!(
            *notices.borrow(),
            vec!["Page not found. Cache older than 5 days.".to_string()]
        );
    }

    #[test]
    fn stale_cache_refresh_can_find_new_page() {
        let stale = NaiveDate::from_ymd_opt(2026, 9, 1).expect("date");
        let mut fixture = fixture(&[], stale);
        let mut api = MockApi::default();
        api.archives.insert(
            fixture.remote.archive_url.clone(),
            build_archive(&[("pages/common/baz.md", "# baz\n")]),
        );

        let outcome = resolve(&mut fixture, &api, &english(), &request("Baz", "linux", None))
            .expect("resolve");
        let (page, _) = found(outcome);
        assert_eq!(page, Page::new("baz", "common", "en", true));
    }

    #[test]
    fn failed_stale_refresh_leaves_cached_pages_readable() {
        let stale = NaiveDate::from_ymd_opt(2026, 10, 10).expect("date");
        let tar = Page::new("tar", "common", "en", true);
        let mut fixture = fixture(std::slice::from_ref(&tar), stale);
        let page_path = compute_path(&tar, &fixture.paths.cache_dir);
        fs::create_dir_all(page_path.parent().expect("parent")).expect("page dir");
        fs::write(&page_path, "# tar\n\n- Extract:\n\n`tar -x {{archive}}`\n").expect("page");
        let api = MockApi::default();

        resolve(&mut fixture, &api, &english(), &request("baz", "linux", None))
            .expect_err("refresh must fail");

        let outcome = resolve(&mut fixture, &api, &english(), &request("tar", "linux", None))
            .expect("resolve");
        let Resolution::Found(resolved) = outcome.resolution else {
            panic!("expected a page");
        };
        let mut rendered = Vec::new();
        Renderer::plain()
            .render_page(&resolved.path, None, &mut rendered)
            .expect("render");
        assert_eq!(
            String::from_utf8(rendered).expect("utf8"),
            "tar\n\n\n- Extract:\n   tar -x archive\n"
        );
    }

    #[test]
    fn fresh_cache_does_not_refresh() {
        let mut fixture = fixture(&[Page::new("ls", "common", "en", true)], today());
        let api = MockApi::default();
        let outcome = resolve(&mut fixture, &api, &english(), &request("baz", "linux", None))
            .expect("resolve");
        assert!(matches!(outcome.resolution, Resolution::NotFound { .. }));
        assert!(outcome.refresh.is_none());
        assert_eq!(api.request_count(), 0);
    }

    #[test]
    fn remote_page_is_downloaded_once() {
        let mut fixture = fixture(&[Page::new("tar", "linux", "fr", false)], today());
        let api = MockApi::default().with_page("pages.fr/linux/tar.md", "# tar\n");
        let french = LanguagePreference {
            configured: Some("fr".to_string()),
            ..LanguagePreference::default()
        };

        let outcome = resolve(&mut fixture, &api, &french, &request("tar", "linux", None))
            .expect("first resolve");
        let Resolution::Found(resolved) = outcome.resolution else {
            panic!("expected a page");
        };
        assert!(resolved.page.local);
        assert_eq!(fs::read_to_string(&resolved.path).expect("read"), "# tar\n");

        resolve(&mut fixture, &api, &french, &request("tar", "linux", None))
            .expect("second resolve");
        assert_eq!(api.request_count(), 1);
    }

    #[test]
    fn failed_download_surfaces_download_error() {
        let mut fixture = fixture(&[Page::new("tar", "linux", "en", false)], today());
        let error = resolve(
            &mut fixture,
            &MockApi::default(),
            &english(),
            &request("tar", "linux", None),
        )
        .expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<TldrError>(),
            Some(TldrError::Download(_))
        ));
    }

    #[test]
    fn empty_preference_falls_back_to_default_language() {
        let mut fixture = fixture(
            &[
                Page::new("tar", "common", "de", true),
                Page::new("tar", "common", "en", true),
            ],
            today(),
        );
        let outcome = resolve(
            &mut fixture,
            &MockApi::default(),
            &LanguagePreference::default(),
            &request("tar", "linux", None),
        )
        .expect("resolve");
        assert!(outcome.used_default_language);
        assert_eq!(found(outcome).0.language, "en");
    }

    #[test]
    fn platform_match_beats_common_within_a_language() {
        let ranked = {
            let mut pages = vec![
                Page::new("tar", "common", "fr", true),
                Page::new("tar", "linux", "en", true),
                Page::new("tar", "linux", "fr", true),
            ];
            rank_pages(&mut pages, &languages(&["fr", "en"]), "linux");
            pages
        };
        assert_eq!(
            select_page(&ranked, &languages(&["fr", "en"]), "linux", false),
            Selection::Found {
                page: Page::new("tar", "linux", "fr", true),
                alt_platform: None
            }
        );
        // An exact platform in a less preferred language still wins over common.
        let mixed = [
            Page::new("tar", "common", "fr", true),
            Page::new("tar", "linux", "en", true),
        ];
        assert_eq!(
            select_page(&mixed, &languages(&["fr", "en"]), "linux", false),
            Selection::Found {
                page: Page::new("tar", "linux", "en", true),
                alt_platform: None
            }
        );
    }

    #[test]
    fn alternative_prefers_default_language_when_not_preferred() {
        let pages = vec![
            Page::new("tar", "osx", "fr", true),
            Page::new("tar", "osx", "en", true),
        ];
        assert_eq!(
            select_page(&pages, &languages(&["fr"]), "linux", false),
            Selection::Found {
                page: Page::new("tar", "osx", "en", true),
                alt_platform: Some("osx".to_string())
            }
        );
        assert_eq!(
            select_page(&pages[..1], &languages(&["fr"]), "linux", false),
            Selection::Found {
                page: Page::new("tar", "osx", "fr", true),
                alt_platform: Some("osx".to_string())
            }
        );
        assert_eq!(
            select_page(&[Page::new("tar", "osx", "de", true)], &languages(&["fr"]), "linux", false),
            Selection::NotFound
        );
    }

    #[test]
    fn ranking_is_deterministic_and_stable() {
        let original = vec![
            Page::new("tar", "windows", "en", true),
            Page::new("tar", "osx", "de", true),
            Page::new("tar", "linux", "en", true),
            Page::new("tar", "common", "fr", true),
            Page::new("tar", "common", "en", true),
            Page::new("tar", "android", "en", true),
        ];
        let preferred = languages(&["fr", "en"]);

        let mut first = original.clone();
        rank_pages(&mut first, &preferred, "linux");
        let mut second = original.clone();
        rank_pages(&mut second, &preferred, "linux");
        assert_eq!(first, second);

        let order = first
            .iter()
            .map(|page| format!("{}/{}", page.language, page.platform))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec!["fr/common", "en/linux", "en/common", "en/windows", "en/android", "de/osx"]
        );
    }
}
