pub mod config;
pub mod error;
pub mod fetch;
pub mod index;
pub mod locale;
pub mod page;
pub mod render;
pub mod resolver;
pub mod runtime;
pub mod search;
pub mod status;
pub mod update;

pub const CLIENT_SPEC_VERSION: &str = "1.5";
pub const NEW_PAGE_URL: &str = "https://github.com/tldr-pages/tldr/issues/new?title=page%20request:%20";
pub const NEW_TRANSLATION_URL: &str =
    "https://github.com/tldr-pages/tldr/blob/main/CONTRIBUTING.md#translations";
