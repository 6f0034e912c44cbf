//! Language preference derived from configuration, the OS locale and `LANGUAGE`.

use std::env;

use tracing::debug;

use crate::page::DEFAULT_LANGUAGE;

const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("ar", "Arabic"),
    ("bn", "Bangla"),
    ("bs", "Bosnian"),
    ("ca", "Catalan"),
    ("cs", "Czech"),
    ("da", "Danish"),
    ("de", "German"),
    ("el", "Greek"),
    ("en", "English"),
    ("es", "Spanish"),
    ("fa", "Persian"),
    ("fi", "Finnish"),
    ("fr", "French"),
    ("hi", "Hindi"),
    ("hu", "Hungarian"),
    ("id", "Indonesian"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("lo", "Lao"),
    ("ml", "Malayalam"),
    ("ne", "Nepali"),
    ("nl", "Dutch"),
    ("no", "Norwegian"),
    ("pl", "Polish"),
    ("pt", "Portuguese"),
    ("pt_BR", "Portuguese (Brazil)"),
    ("pt_PT", "Portuguese (Portugal)"),
    ("ro", "Romanian"),
    ("ru", "Russian"),
    ("sh", "Serbo-Croatian"),
    ("sr", "Serbian"),
    ("sv", "Swedish"),
    ("ta", "Tamil"),
    ("th", "Thai"),
    ("tr", "Turkish"),
    ("uk", "Ukrainian"),
    ("uz", "Uzbek"),
    ("zh", "Chinese"),
    ("zh_TW", "Chinese (Taiwan)"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LanguagePreference {
    /// `TLDR_LANGUAGE`, or the config file's preferred language.
    pub configured: Option<String>,
    /// OS locale language, e.g. `fr_FR`.
    pub locale: Option<String>,
    /// Entries of the colon-separated `LANGUAGE` list.
    pub fallbacks: Vec<String>,
}

impl LanguagePreference {
    pub fn from_env(config_language: Option<&str>) -> Self {
        Self::from_lookup(config_language, |key| env::var(key).ok())
    }

    pub fn from_lookup<F>(config_language: Option<&str>, lookup_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let configured = lookup_env("TLDR_LANGUAGE")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| config_language.map(str::to_string))
            .map(|value| value.replace('-', "_"))
            .filter(|value| is_valid_language_code(value));

        let locale = ["LC_ALL", "LC_MESSAGES", "LANG"]
            .into_iter()
            .filter_map(|key| lookup_env(key))
            .find(|value| !value.trim().is_empty())
            .and_then(|value| parse_posix_locale(&value));

        let fallbacks = lookup_env("LANGUAGE")
            .map(|value| {
                value
                    .split(':')
                    .filter(|entry| !entry.is_empty())
                    .filter_map(parse_posix_locale)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Self {
            configured,
            locale,
            fallbacks,
        }
    }

    /// Raw candidates in priority order: configured, locale, locale prefix, `LANGUAGE`.
    pub fn env_languages(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(configured) = &self.configured {
            push_unique(&mut out, configured);
        }
        if let Some(locale) = &self.locale {
            push_unique(&mut out, locale);
            push_unique(&mut out, trim_posix_lang(locale));
        }
        for fallback in &self.fallbacks {
            push_unique(&mut out, fallback);
        }
        out
    }

    /// Ordered list of `available` languages acceptable to the user, most preferred first.
    /// Empty when nothing matches; callers fall back to the default language.
    pub fn preferred_languages(&self, available: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(configured) = &self.configured
            && available.contains(configured)
        {
            push_unique(&mut out, configured);
        }

        let mut candidates = Vec::new();
        if let Some(locale) = &self.locale {
            candidates.push(locale.as_str());
            candidates.push(trim_posix_lang(locale));
        }
        candidates.extend(self.fallbacks.iter().map(String::as_str));

        for candidate in candidates {
            for language in match_available(candidate, available) {
                push_unique(&mut out, language);
            }
        }
        debug!(?out, "derived preferred languages");
        out
    }

    pub fn preferred_or_default(&self, available: &[String]) -> String {
        self.preferred_languages(available)
            .into_iter()
            .next()
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
    }
}

/// Exact match first; otherwise every available language sharing the candidate's
/// language prefix (`pt` and `pt_BR` both match `pt_BR`, `pt_PT`).
fn match_available<'a>(candidate: &str, available: &'a [String]) -> Vec<&'a str> {
    if let Some(exact) = available.iter().find(|language| *language == candidate) {
        return vec![exact.as_str()];
    }
    let prefix = trim_posix_lang(candidate);
    available
        .iter()
        .filter(|language| trim_posix_lang(language) == prefix)
        .map(String::as_str)
        .collect()
}

fn push_unique(out: &mut Vec<String>, value: &str) {
    if !out.iter().any(|existing| existing == value) {
        out.push(value.to_string());
    }
}

/// `fr_FR.UTF-8@euro` becomes `fr_FR`; `C` and `POSIX` carry no language.
fn parse_posix_locale(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let without_modifier = trimmed.split('@').next().unwrap_or(trimmed);
    let without_encoding = without_modifier
        .split('.')
        .next()
        .unwrap_or(without_modifier)
        .replace('-', "_");
    if without_encoding.is_empty()
        || without_encoding.eq_ignore_ascii_case("C")
        || without_encoding.eq_ignore_ascii_case("POSIX")
        || !is_valid_language_code(&without_encoding)
    {
        return None;
    }
    Some(without_encoding)
}

pub fn trim_posix_lang(code: &str) -> &str {
    code.split('_').next().unwrap_or(code)
}

/// Accepts `xx`, `xxx`, and either followed by `_YY`/`_Yyyy`.
pub fn is_valid_language_code(code: &str) -> bool {
    let mut parts = code.split('_');
    let language = parts.next().unwrap_or("");
    let region = parts.next();
    if parts.next().is_some() {
        return false;
    }
    let language_ok =
        (2..=3).contains(&language.len()) && language.chars().all(|c| c.is_ascii_lowercase());
    let region_ok = match region {
        None => true,
        Some(region) => {
            (2..=4).contains(&region.len()) && region.chars().all(|c| c.is_ascii_alphanumeric())
        }
    };
    language_ok && region_ok
}

/// English display name for a language code, falling back to the code itself.
pub fn language_name(code: &str) -> String {
    let lookup = |key: &str| {
        LANGUAGE_NAMES
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, name)| (*name).to_string())
    };
    lookup(code)
        .or_else(|| lookup(trim_posix_lang(code)))
        .unwrap_or_else(|| code.to_string())
}
