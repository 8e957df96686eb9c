// src/ingest/url.rs
//! URL canonicalization used as the dedup key.
//!
//! Rules, in order:
//! 1. strip tags/entities and surrounding whitespace
//! 2. parse, defaulting the scheme to `http`
//! 3. force `http` (dedup is scheme-insensitive)
//! 4. drop a leading `www.` from the host, trailing slashes from the path
//! 5. Instagram: `/reel/` and `/reels/` become `/p/`, query + fragment dropped
//! 6. LinkedIn: query + fragment dropped (tracking params)
//! 7. everything else keeps query + fragment

use ::url::Url;

use super::clean_text;

/// Canonicalize a raw URL. `None` only for blank input; never panics.
pub fn normalize_url(raw: &str) -> Option<String> {
    let cleaned = clean_text(raw).replace(' ', "");
    if cleaned.is_empty() {
        return None;
    }

    let with_scheme = if cleaned.contains("://") {
        cleaned.clone()
    } else {
        format!("http://{cleaned}")
    };

    let Ok(parsed) = Url::parse(&with_scheme) else {
        return Some(cleaned);
    };
    let Some(host) = parsed.host_str() else {
        return Some(cleaned);
    };

    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    let mut path = parsed.path().trim_end_matches('/').to_string();
    let mut query = parsed.query().map(str::to_string);
    let mut fragment = parsed.fragment().map(str::to_string);

    if is_host(&host, "instagram.com") {
        path = path
            .split('/')
            .map(|seg| match seg {
                "reel" | "reels" => "p",
                other => other,
            })
            .collect::<Vec<_>>()
            .join("/");
        query = None;
        fragment = None;
    } else if is_host(&host, "linkedin.com") {
        query = None;
        fragment = None;
    }

    let mut out = format!("http://{host}");
    if let Some(port) = parsed.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(&path);
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(&q);
    }
    if let Some(f) = fragment.filter(|f| !f.is_empty()) {
        out.push('#');
        out.push_str(&f);
    }
    Some(out)
}

/// `host` is `domain` or one of its subdomains.
pub(crate) fn is_host(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}
