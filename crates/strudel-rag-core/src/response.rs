//! Interpreting generator output.
//!
//! Generators answer code requests either with raw code or with code wrapped
//! in a markdown fence, and questions with prose. [`classify_output`] turns
//! any of those into a tagged [`OutputShape`]. [`parse_need_docs`] recognizes
//! the `[NEED_DOCS: <topic>]` escape a generator uses to ask for fresh
//! retrieval, and [`scan_need_docs_prefix`] does the same incrementally over
//! a streamed buffer.

use std::sync::LazyLock;

use regex::Regex;

/// Literal prefix of the cache-invalidation escape.
pub const NEED_DOCS_PREFIX: &str = "[NEED_DOCS:";

static NEED_DOCS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[NEED_DOCS:\s*([^\]]*?)\s*\]").expect("valid regex"));

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+\-]*[ \t]*\r?\n?(.*?)```").expect("valid regex")
});

/// Above this many words of prose outside a fence, the answer is an
/// explanation that happens to contain code.
const MAX_PROSE_WORDS_AROUND_FENCE: usize = 12;

/// Generator output after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputShape {
    /// Pattern code with any fence removed.
    Code(String),
    /// Explanatory text, trimmed.
    Prose(String),
}

impl OutputShape {
    pub fn is_code(&self) -> bool {
        matches!(self, OutputShape::Code(_))
    }

    pub fn content(&self) -> &str {
        match self {
            OutputShape::Code(c) | OutputShape::Prose(c) => c,
        }
    }

    pub fn into_content(self) -> String {
        match self {
            OutputShape::Code(c) | OutputShape::Prose(c) => c,
        }
    }
}

/// Classify a complete generator response.
pub fn classify_output(text: &str) -> OutputShape {
    let trimmed = text.trim();

    if let Some(caps) = FENCE_RE.captures(trimmed) {
        let inner = caps.get(1).map(|m| m.as_str()).unwrap_or("").trim();
        let outside = FENCE_RE.replace_all(trimmed, " ");
        let prose_words = outside.split_whitespace().count();
        if prose_words <= MAX_PROSE_WORDS_AROUND_FENCE && !inner.is_empty() {
            return OutputShape::Code(inner.to_string());
        }
        return OutputShape::Prose(trimmed.to_string());
    }

    if looks_like_code(trimmed) {
        OutputShape::Code(trimmed.to_string())
    } else {
        OutputShape::Prose(trimmed.to_string())
    }
}

/// Short code-shaped payload with no natural-language prose markers.
pub fn looks_like_code(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let mut code_lines = 0usize;
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("//") {
            continue;
        }
        if is_prose_line(line) {
            return false;
        }
        if line.contains('(') || line.contains('=') || line.starts_with('.') || line.starts_with("$:") {
            code_lines += 1;
        }
    }
    code_lines > 0
}

fn is_prose_line(line: &str) -> bool {
    if line.starts_with("# ")
        || line.starts_with("## ")
        || line.starts_with("- ")
        || line.starts_with("* ")
        || line.contains("**")
    {
        return true;
    }
    // Words outside string literals; code keeps its words inside quotes.
    let mut outside = String::new();
    let mut quote: Option<char> = None;
    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' || c == '`' => quote = Some(c),
            None => outside.push(c),
        }
    }
    let has_code_punctuation = outside.chars().any(|c| "(){}[]=;$".contains(c));
    let words = outside
        .split_whitespace()
        .filter(|w| w.chars().all(|c| c.is_alphabetic() || ",.?!:'".contains(c)))
        .filter(|w| w.chars().any(char::is_alphabetic))
        .count();
    let sentence_end = outside.trim_end().ends_with(['.', '?', '!']);
    (!has_code_punctuation && words >= 4) || (words >= 6 && sentence_end)
}

/// Extract the topic from a `[NEED_DOCS: <topic>]` marker at the start of a
/// response. Empty topics are not a marker.
pub fn parse_need_docs(text: &str) -> Option<String> {
    NEED_DOCS_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|topic| !topic.is_empty())
}

/// Incremental state of a streamed buffer with respect to the marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeedDocsScan {
    /// Too little text to tell; keep buffering.
    Pending,
    /// A complete marker with this topic.
    Marker(String),
    /// The response is not a marker; buffered text may be released.
    NotMarker,
}

/// Decide whether a partially streamed response is (or may still become)
/// a `[NEED_DOCS: …]` marker.
pub fn scan_need_docs_prefix(buffer: &str) -> NeedDocsScan {
    let t = buffer.trim_start();
    if t.is_empty() {
        return NeedDocsScan::Pending;
    }
    if t.len() < NEED_DOCS_PREFIX.len() {
        return if NEED_DOCS_PREFIX.starts_with(t) {
            NeedDocsScan::Pending
        } else {
            NeedDocsScan::NotMarker
        };
    }
    if !t.starts_with(NEED_DOCS_PREFIX) {
        return NeedDocsScan::NotMarker;
    }
    match parse_need_docs(t) {
        Some(topic) => NeedDocsScan::Marker(topic),
        None if t.contains(']') => NeedDocsScan::NotMarker,
        None => NeedDocsScan::Pending,
    }
}

const CONVERSATIONAL_PHRASES: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hey there",
    "hi there",
    "hello there",
    "yo",
    "good morning",
    "good afternoon",
    "good evening",
    "thanks",
    "thank you",
    "thanks a lot",
    "thank you so much",
    "thanks so much",
    "many thanks",
    "thx",
    "ty",
    "cheers",
    "ok",
    "okay",
    "ok thanks",
    "okay thanks",
    "ok thank you",
    "cool",
    "cool thanks",
    "nice",
    "great",
    "awesome",
    "perfect",
    "got it",
    "sounds good",
    "that works",
    "bye",
    "goodbye",
    "see you",
];

/// Conservative whitelist of greetings, thanks and acknowledgements that
/// need no retrieval. Anything not on the list goes through the full turn.
pub fn is_conversational(query: &str) -> bool {
    let normalized: String = query
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '!' | '.' | '?' | ',' | '~'))
        .collect();
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    !normalized.is_empty() && CONVERSATIONAL_PHRASES.contains(&normalized.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_code_is_extracted() {
        let out = classify_output("```javascript\nsetcpm(60)\ns(\"bd*4\")\n```");
        assert_eq!(out, OutputShape::Code("setcpm(60)\ns(\"bd*4\")".to_string()));
    }

    #[test]
    fn test_fence_without_language() {
        let out = classify_output("```\nnote(\"c e g\")\n```\n");
        assert_eq!(out, OutputShape::Code("note(\"c e g\")".to_string()));
    }

    #[test]
    fn test_fence_with_short_lead_in_is_code() {
        let out = classify_output("Here you go:\n```js\ns(\"bd sd\")\n```");
        assert_eq!(out, OutputShape::Code("s(\"bd sd\")".to_string()));
    }

    #[test]
    fn test_explanation_with_fence_is_prose() {
        let text = "The lpf function applies a low-pass filter that removes frequencies above the cutoff. \
                    You pass it a frequency in hertz, and you can pattern it too:\n```js\ns(\"bd\").lpf(800)\n```";
        let out = classify_output(text);
        assert!(!out.is_code());
        assert_eq!(out.content(), text.trim());
    }

    #[test]
    fn test_raw_code_is_code() {
        let out = classify_output("  setcpm(60)\n$: s(\"bd*4\").gain(0.8)\n");
        assert_eq!(out, OutputShape::Code("setcpm(60)\n$: s(\"bd*4\").gain(0.8)".to_string()));
    }

    #[test]
    fn test_code_with_comment_is_code() {
        assert!(classify_output("// kick on every beat\ns(\"bd*4\")").is_code());
    }

    #[test]
    fn test_prose_is_prose() {
        let out = classify_output("Use the room function to add reverb to any pattern.");
        assert_eq!(
            out,
            OutputShape::Prose("Use the room function to add reverb to any pattern.".to_string())
        );
    }

    #[test]
    fn test_markdown_list_is_prose() {
        assert!(!classify_output("- lpf(freq) filters highs\n- hpf(freq) filters lows").is_code());
    }

    #[test]
    fn test_empty_output_is_prose() {
        assert_eq!(classify_output("  \n"), OutputShape::Prose(String::new()));
    }

    #[test]
    fn test_need_docs_marker() {
        assert_eq!(
            parse_need_docs("[NEED_DOCS: reverb and delay effects]"),
            Some("reverb and delay effects".to_string())
        );
        assert_eq!(parse_need_docs("  \n[NEED_DOCS:arp]"), Some("arp".to_string()));
        assert_eq!(parse_need_docs("[NEED_DOCS:   ]"), None);
        assert_eq!(parse_need_docs("I think [NEED_DOCS: x]"), None);
        assert_eq!(parse_need_docs("s(\"bd\")"), None);
    }

    #[test]
    fn test_scan_prefix_states() {
        assert_eq!(scan_need_docs_prefix(""), NeedDocsScan::Pending);
        assert_eq!(scan_need_docs_prefix(" [NEE"), NeedDocsScan::Pending);
        assert_eq!(scan_need_docs_prefix("[NEED_DOCS: rev"), NeedDocsScan::Pending);
        assert_eq!(
            scan_need_docs_prefix("[NEED_DOCS: reverb]"),
            NeedDocsScan::Marker("reverb".to_string())
        );
        assert_eq!(scan_need_docs_prefix("s("), NeedDocsScan::NotMarker);
        assert_eq!(scan_need_docs_prefix("[note"), NeedDocsScan::NotMarker);
        assert_eq!(scan_need_docs_prefix("[NEED_DOCS: ]"), NeedDocsScan::NotMarker);
    }

    #[test]
    fn test_conversational_whitelist() {
        assert!(is_conversational("Thanks!"));
        assert!(is_conversational("  hey   there "));
        assert!(is_conversational("OK, thanks"));
        assert!(!is_conversational("thanks, now add a snare"));
        assert!(!is_conversational("hi, make a beat"));
        assert!(!is_conversational(""));
    }
}
