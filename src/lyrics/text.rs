// Lyric text cleanup and line numbering

use once_cell::sync::Lazy;
use regex::Regex;

/// Prefix written by `number_lyrics`: right-aligned number, two spaces
static NUMBER_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ *\d+  ").unwrap());
static SECTION_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[.*\]").unwrap());
static INLINE_SECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]\n]*\]").unwrap());
static PAGE_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\n]*?Lyrics").unwrap());
static EMBED_FOOTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d*Embed\s*$").unwrap());

fn is_section_header(line: &str) -> bool {
    SECTION_HEADER.is_match(line.trim())
}

/// Number every non-blank lyric line, leaving `[Section]` headers unnumbered
/// and preceded by a blank line. Existing numbers are replaced, so numbering
/// already-numbered text gives the same result.
pub fn number_lyrics(lyrics: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut line_num = 1;

    for raw in lyrics.lines() {
        let line = NUMBER_PREFIX.replace(raw, "");
        let trimmed = line.trim();

        if is_section_header(trimmed) {
            if out.last().is_some_and(|l| !l.is_empty()) {
                out.push(String::new());
            }
            out.push(trimmed.to_string());
        } else if !trimmed.is_empty() {
            out.push(format!("{:3}  {}", line_num, line));
            line_num += 1;
        } else {
            out.push(String::new());
        }
    }

    out.join("\n")
}

/// Strip page boilerplate from scraped text and normalize spacing. Section
/// headers go on their own line after a blank line, with no blank line right
/// after them, and blank lines never repeat.
pub fn clean_lyrics(scraped: &str) -> String {
    let mut text = scraped.trim_start().to_string();

    // "123 ContributorsSong Title Lyrics" header on the first line
    let first_line = text.lines().next().unwrap_or("");
    if first_line.contains("Lyrics") {
        text = PAGE_HEADER.replace(&text, "").into_owned();
    }
    text = EMBED_FOOTER.replace(text.trim_end(), "").into_owned();
    text = text.replace("You might also like", "");
    text = INLINE_SECTION.replace_all(&text, "\n$0\n").into_owned();

    let mut out: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            let skip = match out.last() {
                None => true,
                Some(prev) => prev.is_empty() || is_section_header(prev),
            };
            if !skip {
                out.push("");
            }
        } else {
            if is_section_header(line) && out.last().is_some_and(|prev| !prev.is_empty()) {
                out.push("");
            }
            out.push(line);
        }
    }
    while out.last() == Some(&"") {
        out.pop();
    }

    out.join("\n")
}
