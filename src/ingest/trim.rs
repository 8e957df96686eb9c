// src/ingest/trim.rs
//! Platform-aware content trimming.

use once_cell::sync::OnceCell;
use regex::Regex;

use super::url::{is_host, normalize_url};

/// Markers after which a quoted/reposted tweet body starts.
const TWITTER_MARKERS: [&str; 2] = ["qt", "repost"];

/// Collapse whitespace runs and, for Twitter-like networks, cut the text right
/// after the first `QT` / `Repost` marker (case-insensitive, lowest index wins).
pub fn trim_content(content: &str, network: Option<&str>) -> String {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    let text = re_ws.replace_all(content, " ").trim().to_string();

    if !network.is_some_and(is_twitter_network) {
        return text;
    }

    // ASCII lowering keeps byte offsets aligned with `text`.
    let lowered = text.to_ascii_lowercase();
    let cut = TWITTER_MARKERS
        .iter()
        .filter_map(|m| lowered.find(m).map(|start| (start, start + m.len())))
        .min_by_key(|(start, _)| *start)
        .map(|(_, end)| end);

    match cut {
        Some(end) => text[..end].trim_end().to_string(),
        None => text,
    }
}

/// `twitter`, `x`, or a twitter.com / x.com URL.
pub fn is_twitter_network(network: &str) -> bool {
    let n = network.trim().to_ascii_lowercase();
    if n == "twitter" || n == "x" {
        return true;
    }
    if n.contains('.') {
        if let Some(url) = normalize_url(&n) {
            let host = url
                .trim_start_matches("http://")
                .split(['/', ':', '?', '#'])
                .next()
                .unwrap_or_default()
                .to_string();
            return is_host(&host, "twitter.com") || is_host(&host, "x.com");
        }
    }
    false
}
