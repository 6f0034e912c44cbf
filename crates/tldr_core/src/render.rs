//! Line-oriented rendering of page markup for the terminal.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Style};

use crate::config::ColorChoice;
use crate::error::TldrError;

const COMMAND_INDENT: &str = "   ";

/// Styles used by the color renderer.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub title: Style,
    pub description: Style,
    pub command: Style,
    pub placeholder: Style,
    pub warning: Style,
    pub search_name: Style,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            title: Style::new().bold().underline(),
            description: Style::new().bold(),
            command: Style::new().red(),
            placeholder: Style::new().green(),
            warning: Style::new().red().bold(),
            search_name: Style::new().magenta(),
        }
    }
}

/// Renders markup either as plain text or with a [`Palette`].
///
/// The color decision is made once when the renderer is built; rendering
/// itself never looks at the terminal or the environment.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    palette: Option<Palette>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Title,
    Description,
    Example,
    Command,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Placeholder(&'a str),
    Link(&'a str),
}

impl Renderer {
    pub fn plain() -> Self {
        Self { palette: None }
    }

    pub fn ansi(palette: Palette) -> Self {
        Self {
            palette: Some(palette),
        }
    }

    pub fn for_choice(choice: ColorChoice, is_terminal: bool, no_color: bool) -> Self {
        if choice.enabled(is_terminal, no_color) {
            Self::ansi(Palette::default())
        } else {
            Self::plain()
        }
    }

    pub fn is_colored(&self) -> bool {
        self.palette.is_some()
    }

    /// Renders one markup line. `formatted` adds the full-page layout:
    /// a blank line after the title, a blank line before each example
    /// description and an indent for commands.
    pub fn render_inline(&self, line: &str, formatted: bool) -> String {
        self.render_line(line, formatted, None)
    }

    /// Unformatted rendering with every occurrence of `needle` underlined.
    pub fn render_search_line(&self, line: &str, needle: &str) -> String {
        let needle = Some(needle).filter(|needle| !needle.is_empty());
        self.render_line(line, false, needle)
    }

    pub fn warning_banner(&self, platform: &str) -> String {
        let text = format!("[WARN] This page is for the {platform} platform!");
        match &self.palette {
            Some(palette) => text.style(palette.warning).to_string(),
            None => text,
        }
    }

    pub fn search_name(&self, padded_name: &str) -> String {
        match &self.palette {
            Some(palette) => padded_name.style(palette.search_name).to_string(),
            None => padded_name.to_string(),
        }
    }

    /// Writes a cached page, preceded by a platform warning when the page
    /// belongs to another platform than the one requested.
    pub fn render_page<W: Write>(
        &self,
        path: &Path,
        alt_platform: Option<&str>,
        out: &mut W,
    ) -> Result<()> {
        let content = read_page(path)?;
        if let Some(platform) = alt_platform {
            writeln!(out, "{}\n", self.warning_banner(platform))
                .context("failed to write page")?;
        }
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            writeln!(out, "{}", self.render_inline(line, true)).context("failed to write page")?;
        }
        out.flush().context("failed to write page")
    }

    fn render_line(&self, line: &str, formatted: bool, needle: Option<&str>) -> String {
        let (kind, body) = classify(line);
        let mut out = String::with_capacity(line.len() + 16);

        match kind {
            LineKind::Example if formatted => out.push('\n'),
            LineKind::Command if formatted => out.push_str(COMMAND_INDENT),
            _ => {}
        }

        let line_style = self.line_style(kind);
        for segment in segments(body) {
            self.paint_segment(&mut out, segment, line_style, needle);
        }

        if kind == LineKind::Title && formatted {
            out.push('\n');
        }
        out
    }

    fn line_style(&self, kind: LineKind) -> Option<Style> {
        let palette = self.palette.as_ref()?;
        match kind {
            LineKind::Title => Some(palette.title),
            LineKind::Description => Some(palette.description),
            LineKind::Command => Some(palette.command),
            LineKind::Example | LineKind::Text => None,
        }
    }

    fn paint_segment(
        &self,
        out: &mut String,
        segment: Segment<'_>,
        line_style: Option<Style>,
        needle: Option<&str>,
    ) {
        let Some(palette) = &self.palette else {
            match segment {
                Segment::Text(text) => out.push_str(&text.replace("{{", "").replace("}}", "")),
                Segment::Placeholder(text) => out.push_str(text),
                Segment::Link(target) => {
                    out.push('<');
                    out.push_str(target);
                    out.push('>');
                }
            }
            return;
        };

        let (text, style) = match segment {
            Segment::Text(text) => (text, line_style),
            Segment::Placeholder(text) => (text, Some(palette.placeholder)),
            Segment::Link(target) => (
                target,
                Some(line_style.unwrap_or_else(Style::new).underline()),
            ),
        };
        match needle {
            Some(needle) => paint_highlighted(out, text, style, needle),
            None => paint(out, text, style),
        }
    }
}

/// Raw passthrough of a page file.
pub fn render_markdown<W: Write>(path: &Path, out: &mut W) -> Result<()> {
    let content = read_page(path)?;
    out.write_all(content.as_bytes())
        .and_then(|()| out.flush())
        .context("failed to write page")
}

fn read_page(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(TldrError::FileMissing(path.to_path_buf()).into());
    }
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn paint(out: &mut String, text: &str, style: Option<Style>) {
    if text.is_empty() {
        return;
    }
    match style {
        Some(style) => out.push_str(&text.style(style).to_string()),
        None => out.push_str(text),
    }
}

fn paint_highlighted(out: &mut String, text: &str, style: Option<Style>, needle: &str) {
    let highlight = style.unwrap_or_else(Style::new).underline();
    let mut cursor = 0;
    for (start, matched) in text.match_indices(needle) {
        paint(out, &text[cursor..start], style);
        paint(out, matched, Some(highlight));
        cursor = start + matched.len();
    }
    paint(out, &text[cursor..], style);
}

fn classify(line: &str) -> (LineKind, &str) {
    match line.chars().next() {
        Some('#') => (LineKind::Title, skip_chars(line, 2)),
        Some('>') => (LineKind::Description, skip_chars(line, 2)),
        Some('-') => (LineKind::Example, line),
        Some('`') => {
            let inner = &line[1..];
            (LineKind::Command, inner.strip_suffix('`').unwrap_or(inner))
        }
        _ => (LineKind::Text, line),
    }
}

fn skip_chars(line: &str, count: usize) -> &str {
    match line.char_indices().nth(count) {
        Some((index, _)) => &line[index..],
        None => "",
    }
}

/// Splits a line body into text, `{{placeholder}}` and first `<link>` segments.
fn segments(body: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut cursor = 0;
    let mut search_from = 0;
    while let Some(offset) = body[search_from..].find("{{") {
        let open = search_from + offset;
        let inner_start = open + 2;
        match placeholder_len(&body[inner_start..]) {
            Some((inner_len, consumed)) => {
                if open > cursor {
                    out.push(Segment::Text(&body[cursor..open]));
                }
                out.push(Segment::Placeholder(
                    &body[inner_start..inner_start + inner_len],
                ));
                cursor = inner_start + consumed;
                search_from = cursor;
            }
            None => search_from = open + 1,
        }
    }
    if cursor < body.len() {
        out.push(Segment::Text(&body[cursor..]));
    }
    mark_first_link(out)
}

/// Length of the placeholder content and of content plus closing braces.
/// The content may not contain `}` except for one directly before `}}`.
fn placeholder_len(rest: &str) -> Option<(usize, usize)> {
    let close = rest.find('}')?;
    let tail = &rest[close..];
    if tail.starts_with("}}}") {
        Some((close + 1, close + 3))
    } else if tail.starts_with("}}") {
        Some((close, close + 2))
    } else {
        None
    }
}

fn mark_first_link(segments: Vec<Segment<'_>>) -> Vec<Segment<'_>> {
    let mut out = Vec::with_capacity(segments.len() + 2);
    let mut found = false;
    for segment in segments {
        let Segment::Text(text) = segment else {
            out.push(segment);
            continue;
        };
        match split_link(text).filter(|_| !found) {
            Some((before, target, after)) => {
                found = true;
                if !before.is_empty() {
                    out.push(Segment::Text(before));
                }
                out.push(Segment::Link(target));
                if !after.is_empty() {
                    out.push(Segment::Text(after));
                }
            }
            None => out.push(segment),
        }
    }
    out
}

fn split_link(text: &str) -> Option<(&str, &str, &str)> {
    let open = text.find('<')?;
    let close = open + 1 + text[open + 1..].find('>')?;
    Some((&text[..open], &text[open + 1..close], &text[close + 1..]))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use owo_colors::{OwoColorize, Style};
    use tempfile::tempdir;

    use super::{Palette, Renderer, Segment, render_markdown, segments};
    use crate::config::ColorChoice;
    use crate::error::TldrError;

    fn ansi() -> (Renderer, Palette) {
        let palette = Palette::default();
        (Renderer::ansi(palette), palette)
    }

    #[test]
    fn plain_text_lines_pass_through() {
        let renderer = Renderer::plain();
        assert_eq!(
            renderer.render_inline("Just some text.", true),
            "Just some text."
        );
        assert_eq!(
            renderer.render_inline("Delete a {{file}} permanently.", false),
            "Delete a file permanently."
        );
    }

    #[test]
    fn plain_layout_of_each_line_kind() {
        let renderer = Renderer::plain();
        assert_eq!(renderer.render_inline("# tar", true), "tar\n");
        assert_eq!(renderer.render_inline("# tar", false), "tar");
        assert_eq!(
            renderer.render_inline("> Archiving utility.", true),
            "Archiving utility."
        );
        assert_eq!(
            renderer.render_inline("- Extract an archive:", true),
            "\n- Extract an archive:"
        );
        assert_eq!(renderer.render_inline("- Extract:", false), "- Extract:");
        assert_eq!(
            renderer.render_inline("`tar xf {{source.tar}}`", true),
            "   tar xf source.tar"
        );
        assert_eq!(renderer.render_inline("`ls -la`", false), "ls -la");
    }

    #[test]
    fn command_line_is_indented_and_red() {
        let (renderer, palette) = ansi();
        assert_eq!(
            renderer.render_inline("`ls -la`", true),
            format!("   {}", "ls -la".style(palette.command))
        );
    }

    #[test]
    fn placeholder_is_recolored_and_rest_left_bare() {
        let (renderer, palette) = ansi();
        assert_eq!(
            renderer.render_inline("Delete a {{file}} permanently.", true),
            format!("Delete a {} permanently.", "file".style(palette.placeholder))
        );
        assert_eq!(
            renderer.render_inline("`rm {{file}}`", true),
            format!(
                "   {}{}",
                "rm ".style(palette.command),
                "file".style(palette.placeholder)
            )
        );
    }

    #[test]
    fn placeholder_grammar_allows_one_trailing_brace() {
        assert_eq!(
            segments("echo {{${HOME}}}"),
            vec![Segment::Text("echo "), Segment::Placeholder("${HOME}")]
        );
        assert_eq!(
            segments("a {{b}c}} d"),
            vec![Segment::Text("a {{b}c}} d")]
        );
        assert_eq!(segments("open {{"), vec![Segment::Text("open {{")]);
    }

    #[test]
    fn plain_mode_drops_unmatched_placeholder_delimiters() {
        let renderer = Renderer::plain();
        assert_eq!(renderer.render_inline("a {{b}c}} d", true), "a b}c d");
        assert_eq!(renderer.render_inline("`echo {{", false), "echo ");
        assert_eq!(renderer.render_inline("`echo {{${HOME}}}`", false), "echo ${HOME}");
    }

    #[test]
    fn first_link_is_underlined_in_color_and_kept_in_plain() {
        let line = "> More information: <https://example.org>.";
        assert_eq!(
            Renderer::plain().render_inline(line, true),
            "More information: <https://example.org>."
        );

        let (renderer, palette) = ansi();
        assert_eq!(
            renderer.render_inline(line, true),
            format!(
                "{}{}{}",
                "More information: ".style(palette.description),
                "https://example.org".style(palette.description.underline()),
                ".".style(palette.description)
            )
        );
        assert_eq!(
            segments("<a> and <b>"),
            vec![Segment::Link("a"), Segment::Text(" and <b>")]
        );
    }

    #[test]
    fn search_line_underlines_every_match() {
        let (renderer, palette) = ansi();
        assert_eq!(
            renderer.render_search_line("`ls -la`", "la"),
            format!(
                "{}{}",
                "ls -".style(palette.command),
                "la".style(palette.command.underline())
            )
        );
        assert_eq!(
            renderer.render_search_line("a tar or tar", "tar"),
            format!(
                "a {} or {}",
                "tar".style(Style::new().underline()),
                "tar".style(Style::new().underline())
            )
        );
        assert_eq!(
            Renderer::plain().render_search_line("`tar xf`", "tar"),
            "tar xf"
        );
    }

    #[test]
    fn color_choice_builds_matching_renderer() {
        assert!(Renderer::for_choice(ColorChoice::Always, false, true).is_colored());
        assert!(!Renderer::for_choice(ColorChoice::Never, true, false).is_colored());
        assert!(Renderer::for_choice(ColorChoice::Auto, true, false).is_colored());
        assert!(!Renderer::for_choice(ColorChoice::Auto, true, true).is_colored());
    }

    #[test]
    fn page_render_skips_blank_lines_and_prints_banner() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("foo.md");
        fs::write(
            &path,
            "# foo\n\n> Does foo.\n\n- Run it:\n\n`foo {{arg}}`\n",
        )
        .expect("write page");

        let mut out = Vec::new();
        Renderer::plain()
            .render_page(&path, Some("windows"), &mut out)
            .expect("render");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "[WARN] This page is for the windows platform!\n\nfoo\n\nDoes foo.\n\n- Run it:\n   foo arg\n"
        );
    }

    #[test]
    fn missing_page_file_is_reported() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("gone.md");
        let mut out = Vec::new();

        let error = Renderer::plain()
            .render_page(&path, None, &mut out)
            .expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<TldrError>(),
            Some(TldrError::FileMissing(missing)) if *missing == path
        ));
        assert!(render_markdown(&path, &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn markdown_is_passed_through_verbatim() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("tar.md");
        fs::write(&path, "# tar\n\n`tar {{x}}`\n").expect("write page");
        let mut out = Vec::new();
        render_markdown(&path, &mut out).expect("render");
        assert_eq!(out, b"# tar\n\n`tar {{x}}`\n");
    }
}
