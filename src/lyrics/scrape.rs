// Lyric extraction from a Genius song page

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static LYRICS_CONTAINER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<div\b[^>]*\bdata-lyrics-container\s*=\s*"true"[^>]*>"#).unwrap());
/// Older page layout, matched by class name
static LYRICS_CONTAINER_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<div\b[^>]*\bclass\s*=\s*"[^"]*Lyrics__Container[^"]*"[^>]*>"#).unwrap()
});
static EXCLUDED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<div\b[^>]*\bdata-exclude-from-selection\s*=\s*"true"[^>]*>"#).unwrap()
});
static DIV_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<div\b[^>]*>|</div\s*>").unwrap());
static LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").unwrap());

/// Given the offset just past an opening `<div>`, find where its matching
/// `</div>` starts and ends. Unclosed divs run to the end of the document.
fn matching_close(html: &str, content_start: usize) -> (usize, usize) {
    let mut depth = 1usize;
    for tag in DIV_TAG.find_iter(&html[content_start..]) {
        if tag.as_str().starts_with("</") {
            depth -= 1;
            if depth == 0 {
                return (content_start + tag.start(), content_start + tag.end());
            }
        } else if !tag.as_str().ends_with("/>") {
            depth += 1;
        }
    }
    (html.len(), html.len())
}

/// Inner HTML of every div whose opening tag matches `opening`
fn container_bodies<'a>(html: &'a str, opening: &Regex) -> Vec<&'a str> {
    let mut bodies = Vec::new();
    let mut search_from = 0;
    while let Some(open) = opening.find_at(html, search_from) {
        let (inner_end, after_close) = matching_close(html, open.end());
        bodies.push(&html[open.end()..inner_end]);
        search_from = after_close.max(open.end());
        if search_from >= html.len() {
            break;
        }
    }
    bodies
}

/// Drop nested blocks marked as excluded from selection (headers, ads)
fn remove_excluded(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut rest = fragment;
    while let Some(open) = EXCLUDED_BLOCK.find(rest) {
        out.push_str(&rest[..open.start()]);
        let (_, after_close) = matching_close(rest, open.end());
        rest = &rest[after_close..];
    }
    out.push_str(rest);
    out
}

pub(crate) fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match name {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    _ => None,
                }
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn fragment_to_text(fragment: &str) -> String {
    let without_excluded = remove_excluded(fragment);
    let with_breaks = LINE_BREAK.replace_all(&without_excluded, "\n");
    let stripped = ANY_TAG.replace_all(&with_breaks, "");
    decode_entities(&stripped)
}

/// Text of the lyric containers on a song page, or None if the page has none
pub fn extract_lyrics_html(html: &str) -> Option<String> {
    let mut bodies = container_bodies(html, &LYRICS_CONTAINER);
    if bodies.is_empty() {
        bodies = container_bodies(html, &LYRICS_CONTAINER_CLASS);
    }
    if bodies.is_empty() {
        return None;
    }

    let text = bodies
        .into_iter()
        .map(fragment_to_text)
        .collect::<Vec<_>>()
        .join("\n");
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_containers_with_breaks() {
        let html = r#"<html><body>
            <div class="header">Not lyrics</div>
            <div data-lyrics-container="true" class="Lyrics__Container-sc-1">[Verse 1]<br/>Hello <i>darkness</i><br>my old friend</div>
            <div>Ad slot</div>
            <div data-lyrics-container="true">[Chorus]<br/>Rock &amp; roll</div>
        </body></html>"#;
        let text = extract_lyrics_html(html).unwrap();
        assert_eq!(
            text,
            "[Verse 1]\nHello darkness\nmy old friend\n[Chorus]\nRock & roll"
        );
    }

    #[test]
    fn test_nested_divs_and_excluded_blocks() {
        let html = r#"<div data-lyrics-container="true"><div data-exclude-from-selection="true"><div>3 Contributors</div>Song Lyrics</div>Line one<br><div class="inner">Line two</div><br>Line three</div><div>after</div>"#;
        let text = extract_lyrics_html(html).unwrap();
        assert_eq!(text, "Line one\nLine two\nLine three");
    }

    #[test]
    fn test_class_fallback() {
        let html = r#"<div class="Lyrics__Container-sc-1ynbvzw-6 abc">Only<br>here</div>"#;
        assert_eq!(extract_lyrics_html(html).unwrap(), "Only\nhere");
    }

    #[test]
    fn test_no_container() {
        assert_eq!(extract_lyrics_html("<html><body><p>Nothing</p></body></html>"), None);
    }

    #[test]
    fn test_unclosed_container_runs_to_end() {
        let html = r#"<div data-lyrics-container="true">Cut off<br>mid page"#;
        assert_eq!(extract_lyrics_html(html).unwrap(), "Cut off\nmid page");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("It&#x27;s &quot;fine&quot; &#39;ok&#39; &bogus;"), "It's \"fine\" 'ok' &bogus;");
    }
}
