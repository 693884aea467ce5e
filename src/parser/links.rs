use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

/// Scheme, subdomain (www / m / locale), host alias, `#!/`, `pages/<category>/`,
/// `profile.php?id=`, then the page id or username. Anything after the id
/// (query, extra path) is left out of the match.
static FACEBOOK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:https?:)?(?://)?(?:(?:www|m|mobile|web|[a-z]{2}-[a-z]{2})\.)?(?:facebook\.com|fb\.com|fb\.me)/(?:\w*#!/)?(?:pages/(?:[\w\-]+/)?)?(?:profile\.php\?id=)?([\w.\-]+)",
    )
    .unwrap()
});

/// Path heads on facebook.com that are widgets or tracking, not pages.
const NOT_PAGES: &[&str] = &[
    "sharer", "share", "dialog", "plugins", "tr", "login", "groups", "watch", "events",
    "hashtag", "help", "policies",
];

/// First anchor in document order whose href looks like a Facebook page.
pub fn first_facebook_link(html: &str) -> Option<String> {
    let anchor = Selector::parse("a[href]").ok()?;
    let document = Html::parse_document(html);
    let found = document
        .select(&anchor)
        .filter_map(|a| a.value().attr("href"))
        .find_map(match_facebook);
    found
}

/// The matched portion of `href`, trimmed, if it points at a page.
pub fn match_facebook(href: &str) -> Option<String> {
    let href = href.trim();
    let caps = FACEBOOK_RE.captures(href)?;
    let id = caps.get(1)?.as_str().to_lowercase();
    if id.ends_with(".php") || NOT_PAGES.contains(&id.as_str()) {
        return None;
    }
    Some(caps.get(0)?.as_str().trim().to_string())
}

/// Absolute URL for a stored Facebook value: scheme added when missing, one
/// trailing slash dropped.
pub fn page_url(facebook: &str) -> String {
    let fb = facebook.trim();
    let fb = fb.strip_suffix('/').unwrap_or(fb);
    if fb.starts_with("http://") || fb.starts_with("https://") {
        fb.to_string()
    } else if let Some(rest) = fb.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        format!("https://{}", fb)
    }
}
