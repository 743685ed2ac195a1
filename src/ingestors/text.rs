//! Plain-text extraction from HTML pages and EDGAR documents.

use regex::Regex;
use std::sync::OnceLock;

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("static regex"))
        }
    };
}

static_regex!(script_style_re, r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)\s*>");
static_regex!(comment_re, r"(?s)<!--.*?-->");
static_regex!(tag_re, r"(?s)<[^>]+>");
static_regex!(whitespace_re, r"\s+");
static_regex!(numeric_entity_re, r"&#(x[0-9a-fA-F]+|[0-9]+);");
static_regex!(article_re, r"(?is)<article\b[^>]*>(.*)</article\s*>");
static_regex!(role_main_re, r#"(?is)<[a-z]+\b[^>]*role\s*=\s*["']main["'][^>]*>(.*)"#);
static_regex!(main_re, r"(?is)<main\b[^>]*>(.*)</main\s*>");
static_regex!(
    content_class_re,
    r#"(?is)<div\b[^>]*class\s*=\s*["'][^"']*\b(article-content|post-content|entry-content|main-content|content)\b[^"']*["'][^>]*>(.*)"#
);
static_regex!(body_re, r"(?is)<body\b[^>]*>(.*)</body\s*>");

/// Decodes the handful of entities common in feeds and filings.
pub fn decode_entities(text: &str) -> String {
    let named = text
        .replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&rsquo;", "'")
        .replace("&lsquo;", "'")
        .replace("&rdquo;", "\"")
        .replace("&ldquo;", "\"")
        .replace("&mdash;", "-")
        .replace("&ndash;", "-");

    let numeric = numeric_entity_re().replace_all(&named, |caps: &regex::Captures| {
        let code = &caps[1];
        let parsed = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        parsed
            .and_then(char::from_u32)
            .map(|c| c.to_string())
            .unwrap_or_default()
    });

    // last, so "&amp;lt;" stays "&lt;"
    numeric.replace("&amp;", "&")
}

pub fn collapse_whitespace(text: &str) -> String {
    whitespace_re().replace_all(text, " ").trim().to_string()
}

/// Removes scripts, styles, comments and tags, then decodes entities and
/// collapses whitespace.
pub fn strip_html(html: &str) -> String {
    let without_scripts = script_style_re().replace_all(html, " ");
    let without_comments = comment_re().replace_all(&without_scripts, " ");
    let without_tags = tag_re().replace_all(&without_comments, " ");
    collapse_whitespace(&decode_entities(&without_tags))
}

/// Best-effort article body: the first of `<article>`, `role="main"`,
/// `<main>` or a content-classed `<div>`, falling back to `<body>` and then
/// the whole page.
pub fn extract_article_text(html: &str) -> String {
    let cleaned = script_style_re().replace_all(html, " ");

    let candidates = [
        article_re().captures(&cleaned).and_then(|c| c.get(1)),
        role_main_re().captures(&cleaned).and_then(|c| c.get(1)),
        main_re().captures(&cleaned).and_then(|c| c.get(1)),
        content_class_re().captures(&cleaned).and_then(|c| c.get(2)),
    ];

    for fragment in candidates.into_iter().flatten() {
        let text = strip_html(fragment.as_str());
        if !text.is_empty() {
            return text;
        }
    }

    match body_re().captures(&cleaned).and_then(|c| c.get(1)) {
        Some(body) => strip_html(body.as_str()),
        None => strip_html(&cleaned),
    }
}

/// Truncates to at most `max_bytes`, backing off to a char boundary.
pub fn truncate_to_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html() {
        let html = r#"<p>Apple &amp; partners</p><script>var x = "<b>";</script>
            <style>.a{}</style><!-- note --><div>grew&nbsp;revenue &#8212; again</div>"#;
        assert_eq!(strip_html(html), "Apple & partners grew revenue \u{2014} again");
    }

    #[test]
    fn test_decode_entities_keeps_escaped_entities() {
        assert_eq!(decode_entities("&amp;lt;b&amp;gt;"), "&lt;b&gt;");
        assert_eq!(decode_entities("&#x41;&#66;"), "AB");
    }

    #[test]
    fn test_extract_prefers_article() {
        let html = r#"<html><body><nav>Menu Home</nav>
            <article><h1>Tesla deliveries</h1><p>Deliveries rose 20%.</p></article>
            <footer>Copyright</footer></body></html>"#;
        assert_eq!(extract_article_text(html), "Tesla deliveries Deliveries rose 20%.");
    }

    #[test]
    fn test_extract_falls_back_to_body() {
        let html = "<html><head><title>T</title></head><body><p>Just   the body</p></body></html>";
        assert_eq!(extract_article_text(html), "Just the body");
    }

    #[test]
    fn test_extract_main_element() {
        let html = "<body><header>Site</header><main><p>Main story</p></main></body>";
        assert_eq!(extract_article_text(html), "Main story");
    }

    #[test]
    fn test_truncate_to_boundary() {
        assert_eq!(truncate_to_boundary("héllo", 2), "h");
        assert_eq!(truncate_to_boundary("hello", 10), "hello");
        assert_eq!(truncate_to_boundary("hello", 3), "hel");
    }
}
