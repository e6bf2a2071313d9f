//! Conversion between note text and the HTML carried in `content`.

use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::unwrap_used)]
static BR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());

#[allow(clippy::unwrap_used)]
static PARAGRAPH_END_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</p\s*>").unwrap());

#[allow(clippy::unwrap_used)]
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

#[allow(clippy::unwrap_used)]
static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]+)|([0-9]+));").unwrap());

/// Plain text from remote HTML content.
///
/// `<br>` and `</p>` become newlines, remaining tags are dropped and basic
/// entities are decoded.
#[must_use]
pub fn strip_html(html: &str) -> String {
    let text = BR_RE.replace_all(html, "\n");
    let text = PARAGRAPH_END_RE.replace_all(&text, "\n");
    let text = TAG_RE.replace_all(&text, "");
    decode_entities(&text).trim().to_string()
}

fn decode_entities(s: &str) -> String {
    let decoded = NUMERIC_ENTITY_RE.replace_all(s, |caps: &regex::Captures<'_>| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (None, Some(dec)) => dec.as_str().parse().ok(),
            (None, None) => None,
        };
        code.and_then(char::from_u32)
            .map_or_else(|| caps[0].to_string(), String::from)
    });

    // `&amp;` last so that `&amp;lt;` stays `&lt;`
    decoded
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Escape HTML special characters.
#[must_use]
pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// HTML `content` for outbound notes: one paragraph, line breaks as `<br>`.
#[must_use]
pub fn to_html(text: &str) -> String {
    let body = text.lines().map(escape).collect::<Vec<_>>().join("<br>");
    format!("<p>{body}</p>")
}
