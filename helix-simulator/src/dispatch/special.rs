//! Reserved asset paths served by the inner CDN

use once_cell::sync::Lazy;
use regex::Regex;

use crate::git::GitReference;

static HELIX_BLOB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/hlx_([0-9a-f]{40})\.(jpg|jpeg|png|webp|gif)$").expect("valid blob regex")
});
static HELIX_FONTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/hlx_fonts/(.+)$").expect("valid fonts regex"));
static HELIX_QUERY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/_query/(.+)/(.+)$").expect("valid query regex"));

/// Whether `path` is a media blob, font or query endpoint
#[must_use]
pub fn is_special_asset(path: &str) -> bool {
    HELIX_BLOB.is_match(path) || HELIX_FONTS.is_match(path) || HELIX_QUERY.is_match(path)
}

/// URL of `url` on the inner CDN host of `content`
#[must_use]
pub fn inner_cdn_url(content: &GitReference, domain: &str, url: &str) -> String {
    format!(
        "https://{}--{}--{}.{domain}{url}",
        content.git_ref(),
        content.repo(),
        content.owner()
    )
}
