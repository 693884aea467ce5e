/// Turn a raw spreadsheet cell into a fetchable URL, or `None` when the cell
/// can't be used (empty, looks like an email address).
///
/// Multiple URLs in one cell keep only the first. A missing scheme becomes
/// `http://`. Trailing `;` is dropped. The output is a fixed point:
/// normalizing it again returns it unchanged.
pub fn normalize(raw: &str) -> Option<String> {
    let mut url = raw.trim();
    if url.is_empty() || url.contains('@') {
        return None;
    }
    if let Some((first, _)) = url.split_once(',') {
        url = first.trim();
    }
    if url.is_empty() {
        return None;
    }

    let out = if url.starts_with("http") {
        url.to_string()
    } else {
        format!("http://{}", url)
    };
    // a cell like "a.com; ;" would otherwise leave a `;` for the next pass
    let out = out
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string();
    // "http://" on its own (e.g. a cell of ";") is not a URL
    if out == "http://" {
        return None;
    }
    Some(out)
}
