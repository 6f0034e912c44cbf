use std::collections::BTreeSet;
use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use tldr_core::config::{ColorChoice, TldrConfig, load_config};
use tldr_core::error::TldrError;
use tldr_core::fetch::HttpPageClient;
use tldr_core::index::PageIndex;
use tldr_core::locale::{LanguagePreference, language_name};
use tldr_core::page::current_platform;
use tldr_core::render::{Renderer, render_markdown};
use tldr_core::resolver::{PageResolver, Resolution, ResolveRequest, ensure_known_language};
use tldr_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, inspect_runtime, resolve_paths,
};
use tldr_core::search::{format_search_results, search_pages};
use tldr_core::status::StatusLine;
use tldr_core::update::{
    RefreshReport, Refresher, clear_cache, ensure_index, print_notice, today,
};
use tldr_core::{CLIENT_SPEC_VERSION, NEW_PAGE_URL, NEW_TRANSLATION_URL};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const NOT_FOUND_EXIT: u8 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "tldr",
    about = "Simplified and community-driven man pages",
    disable_version_flag = true
)]
struct Cli {
    /// Command to show the page for; several words are joined with spaces
    #[arg(value_name = "COMMAND")]
    command: Vec<String>,
    #[arg(short = 'a', long, help = "List all pages of the current language")]
    list_all: bool,
    #[arg(short = 'c', long, help = "Clear the local page cache")]
    clear_cache: bool,
    #[arg(short = 'f', long = "render", value_name = "FILE", help = "Render a local page file")]
    render: Option<PathBuf>,
    #[arg(short = 'l', long, help = "List pages for the current platform and language")]
    list: bool,
    #[arg(long, help = "List all platforms")]
    list_platforms: bool,
    #[arg(long, help = "List all languages")]
    list_languages: bool,
    #[arg(
        short = 'L',
        long,
        visible_alias = "lang",
        value_name = "CODE",
        help = "Override the preferred language"
    )]
    language: Option<String>,
    #[arg(short = 'm', long, help = "Print the raw markdown of the page")]
    markdown: bool,
    #[arg(short = 'p', long, value_name = "PLATFORM", help = "Override the platform")]
    platform: Option<String>,
    #[arg(short = 's', long, value_name = "TEXT", help = "Search pages for a string")]
    search: Option<String>,
    #[arg(short = 'u', long, help = "Update the local page cache")]
    update: bool,
    #[arg(long, value_name = "WHEN", help = "Colorize output: auto, always or never")]
    color: Option<ColorChoice>,
    #[arg(long, value_name = "PATH")]
    cache_dir: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, help = "Log debug output to stderr")]
    verbose: bool,
    #[arg(short = 'v', long, help = "Print version information")]
    version: bool,
}

impl Cli {
    fn has_query(&self) -> bool {
        !self.command.is_empty()
            || self.list
            || self.list_all
            || self.list_platforms
            || self.list_languages
            || self.search.is_some()
    }
}

struct Session {
    paths: ResolvedPaths,
    config: TldrConfig,
    renderer: Renderer,
    show_status: bool,
}

fn main() -> ExitCode {
    if env::args_os().len() <= 1 {
        let mut command = Cli::command();
        let _ = command.print_help();
        println!();
        return ExitCode::from(1);
    }

    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let stderr_colored = cli
        .color
        .unwrap_or_default()
        .enabled(io::stderr().is_terminal(), no_color());
    match run(&cli) {
        Ok(code) => code,
        Err(error) => report_error(&error, stderr_colored),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        env::var("TLDR_LOG")
            .or_else(|_| env::var("RUST_LOG"))
            .ok()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .init();
}

fn no_color() -> bool {
    env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty())
}

fn report_error(error: &anyhow::Error, colored: bool) -> ExitCode {
    let (message, code) = match error.downcast_ref::<TldrError>() {
        Some(typed) => (typed.to_string(), typed.exit_code()),
        None => (format!("{error:#}"), 1),
    };
    let line = format!("[ERROR] {message}");
    if colored {
        eprintln!("{}", line.red());
    } else {
        eprintln!("{line}");
    }
    ExitCode::from(code)
}

fn run(cli: &Cli) -> Result<ExitCode> {
    if cli.version {
        println!("tldr {}", env!("CARGO_PKG_VERSION"));
        println!("tldr-pages client specification {CLIENT_SPEC_VERSION}");
        return Ok(ExitCode::SUCCESS);
    }

    let session = open_session(cli)?;
    if cli.diagnostics {
        print_diagnostics(&session.paths)?;
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(file) = &cli.render {
        write_page(&session, file, None, cli.markdown)?;
        return Ok(ExitCode::SUCCESS);
    }

    if cli.clear_cache {
        let status = StatusLine::start(
            "Clearing cache",
            session.show_status,
            session.renderer.is_colored(),
        );
        clear_cache(&session.paths.cache_dir)?;
        status.finish();
        if !cli.update && !cli.has_query() {
            return Ok(ExitCode::SUCCESS);
        }
    }

    let remote = session.config.remote_settings();
    let api = HttpPageClient::new(&remote)?;
    let preference = LanguagePreference::from_env(session.config.preferred_language().as_deref());
    let env_languages = preference.env_languages();
    let refresher = Refresher {
        api: &api,
        remote: &remote,
        env_languages: &env_languages,
        today: today(),
        show_status: session.show_status,
        colored: session.renderer.is_colored(),
        notices: &print_notice,
    };

    let (mut index, initial_refresh) = ensure_index(&session.paths, &refresher)?;
    if cli.update {
        let report = match initial_refresh {
            Some(report) => report,
            None => refresher.refresh(&mut index, &session.paths.cache_dir)?,
        };
        print_refresh_report(&report);
        if !cli.has_query() {
            return Ok(ExitCode::SUCCESS);
        }
    }

    if cli.list_languages {
        for code in index.list_languages()? {
            println!("{code}:\t{}", language_name(&code));
        }
        return Ok(ExitCode::SUCCESS);
    }
    if cli.list_platforms {
        for platform in index.list_platforms()? {
            println!("{platform}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(language) = &cli.language {
        ensure_known_language(&index, language)?;
    }
    let platform = cli
        .platform
        .clone()
        .unwrap_or_else(|| current_platform().to_string());

    if cli.list || cli.list_all {
        let language = listing_language(cli, &index, &preference)?;
        let pages = if cli.list_all {
            index.find_by_language(&language)?
        } else {
            index.find_by_language_and_platform(&language, &platform)?
        };
        let names = pages
            .into_iter()
            .map(|page| page.name)
            .collect::<BTreeSet<_>>();
        let mut stdout = io::stdout().lock();
        for name in names {
            writeln!(stdout, "{name}").context("failed to write page list")?;
        }
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(needle) = &cli.search {
        let language = listing_language(cli, &index, &preference)?;
        let pages = index.find_by_language_and_platform(&language, &platform)?;
        let outcome = search_pages(
            &api,
            &session.paths.cache_dir,
            &pages,
            needle,
            session.config.search_workers(),
        )?;
        for page in &outcome.downloaded {
            index.mark_downloaded(page)?;
        }
        let mut stdout = io::stdout().lock();
        for line in format_search_results(&outcome.hits, needle, &session.renderer) {
            writeln!(stdout, "{line}").context("failed to write search results")?;
        }
        return Ok(ExitCode::from(outcome.exit_status()));
    }

    let request = ResolveRequest {
        name: cli.command.join(" "),
        language: cli.language.clone(),
        platform: Some(platform),
    };
    let outcome = PageResolver::new(
        &mut index,
        &session.paths.cache_dir,
        &refresher,
        &preference,
    )
    .resolve(&request)?;
    if outcome.used_default_language {
        print_language_notice(&session.renderer);
    }

    match outcome.resolution {
        Resolution::Found(resolved) => {
            debug!(path = %resolved.path.display(), "rendering page");
            write_page(
                &session,
                &resolved.path,
                resolved.alt_platform.as_deref(),
                cli.markdown,
            )?;
            Ok(ExitCode::SUCCESS)
        }
        Resolution::NotFound { name } => {
            println!("Page not found.");
            println!("Feel free to create an issue at: {NEW_PAGE_URL}{name}");
            Ok(ExitCode::from(NOT_FOUND_EXIT))
        }
        Resolution::NeedsTranslation { name, language } => {
            println!(
                "The `{name}` page could not be found in {}.",
                language_name(&language)
            );
            println!("Feel free to translate it: {NEW_TRANSLATION_URL}");
            Ok(ExitCode::from(NOT_FOUND_EXIT))
        }
    }
}

fn open_session(cli: &Cli) -> Result<Session> {
    let context = ResolutionContext::from_process()?;
    let paths = resolve_paths(
        &context,
        &PathOverrides {
            cache_dir: cli.cache_dir.clone(),
            config: cli.config.clone(),
        },
    )?;
    let config = load_config(&paths.config_path)?;
    let renderer = Renderer::for_choice(
        config.color_choice(cli.color),
        io::stdout().is_terminal(),
        no_color(),
    );
    Ok(Session {
        paths,
        config,
        renderer,
        show_status: io::stderr().is_terminal(),
    })
}

fn listing_language(
    cli: &Cli,
    index: &PageIndex,
    preference: &LanguagePreference,
) -> Result<String> {
    match &cli.language {
        Some(language) => Ok(language.clone()),
        None => Ok(preference.preferred_or_default(&index.list_languages()?)),
    }
}

fn write_page(
    session: &Session,
    path: &Path,
    alt_platform: Option<&str>,
    markdown: bool,
) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if markdown {
        render_markdown(path, &mut stdout)
    } else {
        session.renderer.render_page(path, alt_platform, &mut stdout)
    }
}

fn print_language_notice(renderer: &Renderer) {
    let notice = "[INFO] None of the preferred languages found, using English instead. \
                  See `tldr --list-languages` for a list of all available languages.";
    if renderer.is_colored() {
        eprintln!("{}", notice.green());
    } else {
        eprintln!("{notice}");
    }
}

fn print_refresh_report(report: &RefreshReport) {
    println!(
        "Updated {} pages in {} languages from {}",
        report.pages, report.languages, report.source_url
    );
    if !report.removed_dirs.is_empty() {
        println!(
            "Removed {} language trees not kept locally",
            report.removed_dirs.len()
        );
    }
}

fn print_diagnostics(paths: &ResolvedPaths) -> Result<()> {
    let status = inspect_runtime(paths)?;
    println!("[diagnostics]\n{}", paths.diagnostics());
    println!("cache_dir_exists: {}", format_flag(status.cache_dir_exists));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );
    println!("config_exists: {}", format_flag(status.config_exists));
    if status.db_exists {
        let index = PageIndex::open(&paths.db_path)?;
        println!("pages: {}", index.count_pages()?);
        println!(
            "last_update: {}",
            index
                .last_update()?
                .map(|date| date.to_string())
                .unwrap_or_else(|| "<never>".to_string())
        );
    }
    println!("platform: {}", current_platform());
    Ok(())
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
