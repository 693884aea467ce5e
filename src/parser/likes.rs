use std::sync::LazyLock;

use regex::Regex;

use super::links::page_url;

const WIDGET_URL: &str = "https://www.facebook.com/plugins/page.php";

static LIKES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,]*)\s+(?:people\s+like\s+this|likes)\b").unwrap()
});

/// Page-plugin widget URL for a stored Facebook value. The widget renders the
/// like count without a login wall.
pub fn widget_url(facebook: &str) -> String {
    let href: String = url::form_urlencoded::byte_serialize(page_url(facebook).as_bytes()).collect();
    format!(
        "{}?href={}&tabs&width=340&height=130&small_header=true&hide_cover=true",
        WIDGET_URL, href
    )
}

/// First like count in the page text, thousands separators stripped.
pub fn extract_likes(content: &str) -> Option<u64> {
    let caps = LIKES_RE.captures(content)?;
    let digits: String = caps[1].chars().filter(|c| *c != ',').collect();
    digits.parse().ok()
}
