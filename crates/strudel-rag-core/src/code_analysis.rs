//! Regex-driven analysis of pattern-language source code.
//!
//! The analyzer never fails: anything its expressions do not recognize is
//! silently skipped, so malformed or half-typed editor buffers still yield
//! whatever structure is visible.
//!
//! # Recognized Surface Syntax
//!
//! | Construct | Example | Collected into |
//! |-----------|---------|----------------|
//! | Sound literal | `s("bd*4")`, `sound('hh:2')` | [`ParsedCode::sounds`] |
//! | Note literal | `note("c3 e3")`, `` `c3 e3`.note() `` | [`ParsedCode::notes`] |
//! | Method call | `.lpf(800)` | [`ParsedCode::functions`] |
//! | Declaration | `let drums = ...` | [`ParsedCode::variables`] |
//! | Scale / mode | `scale("C:minor")` | [`ParsedCode::scales`] |
//! | Combinator | `stack(`, `.slow(` | [`ParsedCode::patterns`] |
//!
//! Pattern strings are tokenized by replacing the mini-notation syntax
//! characters `[ ] < > ( ) { } * @ ! / | ? ,` with spaces and splitting on
//! whitespace. Sample-number suffixes (`bd:3`) are cut at the first `:`.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static SOUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:sound|s)\s*\(\s*(?:"([^"]*)"|'([^']*)'|`([^`]*)`)"#).expect("valid regex")
});

static NOTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bnote\s*\(\s*(?:"([^"]*)"|'([^']*)'|`([^`]*)`)"#).expect("valid regex")
});

static TEMPLATE_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]*)`\s*\.\s*([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("valid regex"));

static METHOD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.\s*([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("valid regex"));

static STRING_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*"|'[^']*'|`[^`]*`"#).expect("valid regex"));

static CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_$][A-Za-z0-9_$]*)\s*\(").expect("valid regex"));

static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:let|const|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=").expect("valid regex")
});

static SCALE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:scale|mode)\s*\(\s*(?:"([^"]*)"|'([^']*)'|`([^`]*)`)"#).expect("valid regex")
});

static SCALE_CALL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bscale\s*\(").expect("valid regex"));

static CHORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bnote\s*\(\s*["'`][^"'`]*,"#).expect("valid regex"));

static PITCH_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:-?\d+(?:\.\d+)?|[a-gA-G](?:#|b|s)?-?\d*)$").expect("valid regex"));

static COMBINATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    let names = COMBINATORS.join("|");
    Regex::new(&format!(r"\b({})\s*\(", names)).expect("valid regex")
});

/// Combinators whose occurrences are counted in [`ParsedCode::patterns`].
pub const COMBINATORS: &[&str] = &[
    "stack", "layer", "slow", "fast", "early", "late", "euclid", "rev", "iter", "ply", "segment",
    "every", "sometimes", "often", "rarely", "never", "always", "arrange", "slider", "chop",
    "striate", "slice",
];

/// Bare calls left out of editor keywords: literal constructors whose
/// contents are already tokenized, and control-flow words.
const SKIPPED_CALLS: &[&str] = &[
    "s", "sound", "note", "n", "if", "for", "while", "switch", "function", "return", "catch",
];

const PATTERN_SYNTAX: &[char] = &[
    '[', ']', '<', '>', '(', ')', '{', '}', '*', '@', '!', '/', '|', '?', ',',
];

/// Sound name → category. Names starting with `wt_` are always `wavetable`;
/// anything unlisted is `custom`.
const SOUND_CATEGORIES: &[(&str, &[&str])] = &[
    (
        "drums",
        &[
            "bd", "sd", "hh", "oh", "cp", "rim", "lt", "mt", "ht", "cr", "rd", "cb", "sn", "kick",
            "snare", "hihat", "clap", "tom", "crash", "ride", "cowbell",
        ],
    ),
    (
        "percussion",
        &[
            "perc", "tabla", "conga", "bongo", "shaker", "tambourine", "tamb", "clave",
            "woodblock", "agogo", "cabasa", "sh",
        ],
    ),
    (
        "synth",
        &[
            "sine", "sin", "sawtooth", "saw", "square", "sqr", "triangle", "tri", "supersaw",
            "pulse",
        ],
    ),
    ("noise", &["white", "pink", "brown", "crackle", "noise"]),
    (
        "zzfx",
        &[
            "zzfx", "z_sine", "z_sawtooth", "z_triangle", "z_square", "z_tan", "z_noise",
        ],
    ),
    (
        "misc",
        &[
            "casio", "jazz", "metal", "east", "space", "wind", "insect", "crow", "numbers",
            "alphabet", "mouth", "gm_piano", "piano",
        ],
    ),
];

/// Method name → effect category.
const EFFECT_CATEGORIES: &[(&str, &[&str])] = &[
    (
        "filter",
        &[
            "lpf", "cutoff", "ctf", "lp", "hpf", "hcutoff", "hp", "bpf", "bandf", "bp", "lpq",
            "resonance", "hpq", "hresonance", "bpq", "bandq", "vowel", "ftype",
        ],
    ),
    (
        "filter-envelope",
        &[
            "lpenv", "lpe", "lpattack", "lpa", "lpdecay", "lpd", "lpsustain", "lps", "lprelease",
            "lpr", "hpenv", "hpe", "hpattack", "hpdecay", "hpsustain", "hprelease", "bpenv",
            "bpe", "bpattack", "bpdecay", "bpsustain", "bprelease",
        ],
    ),
    (
        "distortion",
        &["distort", "dist", "crush", "coarse", "shape", "waveloss"],
    ),
    (
        "dynamics",
        &["gain", "velocity", "postgain", "compressor", "amp", "xfade"],
    ),
    ("spatial", &["pan", "jux", "juxBy", "superimpose", "off"]),
    (
        "delay",
        &["delay", "delaytime", "delayfeedback", "delayfb", "dt", "dfb"],
    ),
    (
        "reverb",
        &["room", "size", "roomsize", "rsize", "rfade", "rlp", "rdim", "iresponse", "ir"],
    ),
    (
        "modulation",
        &["vib", "vibrato", "vibmod", "tremolo", "phaser", "phaserdepth", "leslie", "lfo"],
    ),
    (
        "envelope",
        &["attack", "att", "decay", "dec", "sustain", "sus", "release", "rel", "adsr", "hold"],
    ),
    (
        "pitch-envelope",
        &["penv", "pattack", "patt", "pdecay", "pdec", "prelease", "prel", "pcurve", "panchor"],
    ),
    (
        "fm-synthesis",
        &["fm", "fmh", "fmi", "fmattack", "fmdecay", "fmsustain", "fmrelease", "fmenv", "fmwave"],
    ),
    (
        "sampler",
        &[
            "begin", "end", "loop", "loopBegin", "loopEnd", "speed", "cut", "chop", "striate",
            "slice", "splice", "fit", "unit", "clip", "legato",
        ],
    ),
    ("routing", &["orbit", "channel", "channels"]),
    ("sidechain", &["duck", "duckorbit", "duckattack", "duckdepth"]),
    (
        "synthesis",
        &["partials", "phases", "unison", "detune", "spread", "noise", "wt", "warp"],
    ),
    (
        "zzfx",
        &[
            "zrand", "curve", "slide", "deltaSlide", "pitchJump", "pitchJumpTime", "lfo",
            "znoise", "zmod", "zcrush", "zdelay", "tremolo",
        ],
    ),
];

/// Structure extracted from a block of pattern code.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedCode {
    pub sounds: Vec<String>,
    pub notes: Vec<String>,
    pub functions: Vec<String>,
    pub variables: Vec<String>,
    pub scales: Vec<String>,
    /// Occurrence count per recognized combinator.
    pub patterns: BTreeMap<String, usize>,
}

impl ParsedCode {
    fn pattern_count(&self, name: &str) -> usize {
        self.patterns.get(name).copied().unwrap_or(0)
    }
}

/// Tags and complexity derived from [`ParsedCode`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CodeAnalysis {
    pub sound_tags: Vec<String>,
    pub effect_tags: Vec<String>,
    pub musical_tags: Vec<String>,
    pub complexity_tags: Vec<String>,
    /// Complexity score in `[0, 10]`.
    pub complexity: u8,
}

/// Parse pattern code into its sounds, notes, functions, variables,
/// scales and combinator counts. Every list keeps first-appearance order
/// and holds no duplicates.
pub fn parse(code: &str) -> ParsedCode {
    let mut parsed = ParsedCode::default();

    for caps in SOUND_RE.captures_iter(code) {
        if let Some(body) = first_group(&caps) {
            for token in sound_tokens(body) {
                push_unique(&mut parsed.sounds, token);
            }
        }
    }

    for caps in NOTE_RE.captures_iter(code) {
        if let Some(body) = first_group(&caps) {
            for token in note_tokens(body) {
                push_unique(&mut parsed.notes, token);
            }
        }
    }

    for caps in TEMPLATE_CALL_RE.captures_iter(code) {
        let body = &caps[1];
        match &caps[2] {
            "s" | "sound" => {
                for token in sound_tokens(body) {
                    push_unique(&mut parsed.sounds, token);
                }
            }
            _ => {
                for token in note_tokens(body) {
                    push_unique(&mut parsed.notes, token);
                }
            }
        }
    }

    for caps in METHOD_RE.captures_iter(code) {
        push_unique(&mut parsed.functions, caps[1].to_string());
    }

    for caps in VARIABLE_RE.captures_iter(code) {
        push_unique(&mut parsed.variables, caps[1].to_string());
    }

    for caps in SCALE_RE.captures_iter(code) {
        if let Some(body) = first_group(&caps) {
            let scale = body.trim();
            if !scale.is_empty() {
                push_unique(&mut parsed.scales, scale.to_string());
            }
        }
    }

    for caps in COMBINATOR_RE.captures_iter(code) {
        *parsed.patterns.entry(caps[1].to_string()).or_insert(0) += 1;
    }

    parsed
}

/// Derive sound, effect, musical and complexity tags plus a complexity
/// score. Empty (or whitespace-only) code yields no tags and complexity 1.
pub fn analyze(code: &str) -> CodeAnalysis {
    if code.trim().is_empty() {
        return CodeAnalysis {
            complexity: 1,
            ..Default::default()
        };
    }

    let parsed = parse(code);
    let mut analysis = CodeAnalysis::default();

    for sound in &parsed.sounds {
        push_unique(&mut analysis.sound_tags, classify_sound(sound).to_string());
    }
    if code.to_lowercase().contains("bass") {
        push_unique(&mut analysis.sound_tags, "bass".to_string());
    }

    for function in &parsed.functions {
        for (category, names) in EFFECT_CATEGORIES {
            if names.contains(&function.as_str()) {
                push_unique(&mut analysis.effect_tags, category.to_string());
            }
        }
    }

    if !parsed.notes.is_empty() || SCALE_CALL_RE.is_match(code) {
        push_unique(&mut analysis.musical_tags, "melody".to_string());
        push_unique(&mut analysis.musical_tags, "melodic".to_string());
    }
    if CHORD_RE.is_match(code) {
        push_unique(&mut analysis.musical_tags, "chords".to_string());
        push_unique(&mut analysis.musical_tags, "harmony".to_string());
    }
    if parsed.pattern_count("fast") > 0 || parsed.pattern_count("slow") > 0 {
        push_unique(&mut analysis.musical_tags, "rhythm".to_string());
    }
    if has_sequence_literal(code) {
        push_unique(&mut analysis.musical_tags, "sequences".to_string());
    }

    let stacks = parsed.pattern_count("stack");
    let arranged = parsed.pattern_count("arrange") > 0;
    let interactive = parsed.pattern_count("slider") > 0;
    let length = code.chars().count();

    if stacks > 0 {
        push_unique(&mut analysis.complexity_tags, "layered".to_string());
    }
    if stacks > 1 {
        push_unique(&mut analysis.complexity_tags, "complex".to_string());
    }
    if arranged {
        push_unique(&mut analysis.complexity_tags, "arranged".to_string());
        push_unique(&mut analysis.complexity_tags, "structured".to_string());
    }
    if parsed.variables.len() > 5 {
        push_unique(&mut analysis.complexity_tags, "advanced".to_string());
    }
    if interactive {
        push_unique(&mut analysis.complexity_tags, "interactive".to_string());
    }
    if length < 200 && stacks == 0 && parsed.variables.is_empty() {
        push_unique(&mut analysis.complexity_tags, "simple".to_string());
        push_unique(&mut analysis.complexity_tags, "beginner-friendly".to_string());
    }

    analysis.complexity = complexity_score(&parsed, length);
    analysis
}

/// Space-separated keywords (sounds, notes, methods, top-level calls such
/// as `setcpm` or `stack`, variables) used to bias retrieval toward what is
/// already in the editor. Empty for empty code.
pub fn extract_keywords(editor_state: &str) -> String {
    let parsed = parse(editor_state);
    let mut keywords: Vec<String> = Vec::new();
    for word in parsed
        .sounds
        .into_iter()
        .chain(parsed.notes)
        .chain(parsed.functions)
        .chain(top_level_calls(editor_state))
        .chain(parsed.variables)
    {
        push_unique(&mut keywords, word);
    }
    keywords.join(" ")
}

/// Bare function calls outside string literals, so mini-notation such as
/// `"bd(3,8)"` is not mistaken for a call.
fn top_level_calls(code: &str) -> Vec<String> {
    let code = STRING_LITERAL_RE.replace_all(code, "\"\"");
    let mut calls = Vec::new();
    for caps in CALL_RE.captures_iter(&code) {
        let name = &caps[1];
        // Method calls (`.lpf(`) are collected by `parse`.
        let is_method = code[..caps.get(1).map_or(0, |m| m.start())]
            .trim_end()
            .ends_with('.');
        if !is_method && !SKIPPED_CALLS.contains(&name) {
            push_unique(&mut calls, name.to_string());
        }
    }
    calls
}

fn complexity_score(parsed: &ParsedCode, length: usize) -> u8 {
    let mut score: usize = match length {
        0..=199 => 1,
        200..=499 => 2,
        500..=1499 => 3,
        _ => 4,
    };
    score += parsed.pattern_count("stack").min(3);
    if parsed.pattern_count("arrange") > 0 {
        score += 1;
    }
    if parsed.variables.len() > 5 {
        score += 1;
    }
    if parsed.functions.len() >= 8 {
        score += 1;
    }
    if parsed.pattern_count("slider") > 0 {
        score += 1;
    }
    score.min(10) as u8
}

fn classify_sound(sound: &str) -> &'static str {
    if sound.starts_with("wt_") {
        return "wavetable";
    }
    SOUND_CATEGORIES
        .iter()
        .find(|(_, names)| names.contains(&sound))
        .map(|(category, _)| *category)
        .unwrap_or("custom")
}

fn has_sequence_literal(code: &str) -> bool {
    NOTE_RE.captures_iter(code).any(|caps| {
        first_group(&caps).is_some_and(|body| {
            let tokens: Vec<String> = split_pattern(body)
                .filter(|t| !is_rest(t))
                .map(str::to_string)
                .collect();
            !tokens.is_empty() && tokens.iter().all(|t| PITCH_TOKEN_RE.is_match(t))
        })
    })
}

fn first_group<'a>(caps: &regex::Captures<'a>) -> Option<&'a str> {
    (1..caps.len()).find_map(|i| caps.get(i)).map(|m| m.as_str())
}

fn split_pattern(body: &str) -> impl Iterator<Item = &str> {
    body.split(|c: char| c.is_whitespace() || PATTERN_SYNTAX.contains(&c))
        .filter(|t| !t.is_empty())
}

fn is_rest(token: &str) -> bool {
    matches!(token, "~" | "-" | "_" | ".")
}

fn sound_tokens(body: &str) -> Vec<String> {
    split_pattern(body)
        .filter(|t| !is_rest(t) && *t != "x" && t.parse::<f64>().is_err())
        .map(|t| t.split(':').next().unwrap_or_default().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn note_tokens(body: &str) -> Vec<String> {
    split_pattern(body)
        .filter(|t| !is_rest(t))
        .map(str::to_string)
        .collect()
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn tags_are_unique(analysis: &CodeAnalysis) -> bool {
        [
            &analysis.sound_tags,
            &analysis.effect_tags,
            &analysis.musical_tags,
            &analysis.complexity_tags,
        ]
        .iter()
        .all(|tags| {
            let mut seen = HashSet::new();
            tags.iter().all(|t| seen.insert(t))
        })
    }

    #[test]
    fn test_parse_sounds_all_delimiters() {
        let code = r#"s("bd*2 [sd hh]") sound('cp:3 ~') s(`oh - x 4`)"#;
        let parsed = parse(code);
        assert_eq!(parsed.sounds, vec!["bd", "sd", "hh", "cp", "oh"]);
    }

    #[test]
    fn test_parse_strips_sample_suffix_and_numerics() {
        let parsed = parse(r#"s("bd:3 0.5 <sd:1 sd:2>")"#);
        assert_eq!(parsed.sounds, vec!["bd", "sd"]);
    }

    #[test]
    fn test_parse_does_not_match_suffix_s_call() {
        let parsed = parse(r#"x.pans("0 1")"#);
        assert!(parsed.sounds.is_empty());
    }

    #[test]
    fn test_parse_notes_and_template_form() {
        let code = "note(\"c3 [e3 g3]\")\n`a2 ~ c3`.note().s(\"sawtooth\")";
        let parsed = parse(code);
        assert_eq!(parsed.notes, vec!["c3", "e3", "g3", "a2"]);
        assert_eq!(parsed.sounds, vec!["sawtooth"]);
    }

    #[test]
    fn test_parse_functions_variables_scales() {
        let code = r#"const drums = s("bd").lpf(800).room(0.3)
let mel = n("0 2 4").scale("C:minor")"#;
        let parsed = parse(code);
        assert_eq!(parsed.functions, vec!["lpf", "room", "scale"]);
        assert_eq!(parsed.variables, vec!["drums", "mel"]);
        assert_eq!(parsed.scales, vec!["C:minor"]);
    }

    #[test]
    fn test_parse_counts_combinators() {
        let code = r#"stack(s("bd").fast(2), s("hh").fast(4)).slow(2)"#;
        let parsed = parse(code);
        assert_eq!(parsed.patterns.get("stack"), Some(&1));
        assert_eq!(parsed.patterns.get("fast"), Some(&2));
        assert_eq!(parsed.patterns.get("slow"), Some(&1));
        assert_eq!(parsed.patterns.get("rev"), None);
    }

    #[test]
    fn test_analyze_empty_code() {
        let analysis = analyze("");
        assert!(analysis.sound_tags.is_empty());
        assert!(analysis.effect_tags.is_empty());
        assert!(analysis.musical_tags.is_empty());
        assert!(analysis.complexity_tags.is_empty());
        assert_eq!(analysis.complexity, 1);
    }

    #[test]
    fn test_analyze_sound_categories() {
        let code = r#"s("bd hh tabla wt_flute mysample white").note("c2").s("z_sine")"#;
        let analysis = analyze(code);
        assert_eq!(
            analysis.sound_tags,
            vec!["drums", "percussion", "wavetable", "custom", "noise", "zzfx"]
        );
    }

    #[test]
    fn test_analyze_detects_bass_word() {
        let analysis = analyze(r#"const Bassline = note("c2")"#);
        assert!(analysis.sound_tags.contains(&"bass".to_string()));
    }

    #[test]
    fn test_analyze_effect_categories() {
        let code = r#"s("bd").lpf(400).lpenv(2).room(0.5).delay(0.25).pan(0.3).attack(0.1).duck(2)"#;
        let analysis = analyze(code);
        assert_eq!(
            analysis.effect_tags,
            vec![
                "filter",
                "filter-envelope",
                "reverb",
                "delay",
                "spatial",
                "envelope",
                "sidechain"
            ]
        );
    }

    #[test]
    fn test_analyze_musical_tags() {
        let code = r#"note("<c3,e3,g3> <a2,c3,e3>").fast(2)
note("0 2 4 7")"#;
        let analysis = analyze(code);
        for tag in ["melody", "melodic", "chords", "harmony", "rhythm", "sequences"] {
            assert!(
                analysis.musical_tags.contains(&tag.to_string()),
                "missing {}",
                tag
            );
        }
    }

    #[test]
    fn test_analyze_scale_is_melodic() {
        let analysis = analyze(r#"n("0 2").scale("D:dorian")"#);
        assert!(analysis.musical_tags.contains(&"melody".to_string()));
    }

    #[test]
    fn test_analyze_simple_code() {
        let analysis = analyze(r#"s("bd sd")"#);
        assert_eq!(analysis.complexity_tags, vec!["simple", "beginner-friendly"]);
        assert_eq!(analysis.complexity, 1);
    }

    #[test]
    fn test_analyze_layered_and_interactive() {
        let code = r#"stack(s("bd"), s("hh")).gain(slider(0.5))
stack(note("c3"), s("cp"))"#;
        let analysis = analyze(code);
        assert!(analysis.complexity_tags.contains(&"layered".to_string()));
        assert!(analysis.complexity_tags.contains(&"complex".to_string()));
        assert!(analysis.complexity_tags.contains(&"interactive".to_string()));
        assert!(!analysis.complexity_tags.contains(&"simple".to_string()));
    }

    #[test]
    fn test_complexity_bounded() {
        let mut code = String::new();
        for i in 0..20 {
            code.push_str(&format!(
                "let v{i} = stack(s(\"bd\").fast(2).lpf(300).room(0.2).delay(0.1).pan(0.5).gain(1).crush(4).speed(2)).arrange(slider(1))\n"
            ));
        }
        let analysis = analyze(&code);
        assert!(analysis.complexity <= 10);
        assert!(analysis.complexity_tags.contains(&"advanced".to_string()));
        assert!(analysis.complexity_tags.contains(&"arranged".to_string()));
        assert!(tags_are_unique(&analysis));
    }

    #[test]
    fn test_extract_keywords_dedupes() {
        let code = r#"s("bd bd sd").lpf(400)
note("c3").lpf(200)
let mel = 1"#;
        assert_eq!(extract_keywords(code), "bd sd c3 lpf mel");
    }

    #[test]
    fn test_extract_keywords_whitespace_stable() {
        let a = extract_keywords("s(\"bd  sd\")\n\n.lpf(400)");
        let b = extract_keywords("s(\"bd sd\") .lpf(400)");
        assert_eq!(a, b);
    }

    #[test]
    fn test_extract_keywords_empty() {
        assert_eq!(extract_keywords(""), "");
        assert_eq!(extract_keywords("  \n"), "");
    }

    #[test]
    fn test_extract_keywords_top_level_calls() {
        assert_eq!(extract_keywords("setcpm(60)"), "setcpm");
        let code = r#"setcpm(30)
$: stack(s("bd"), note("c3")).lpf(400)
if (x) { samples('github:tidalcycles/dirt-samples') }"#;
        assert_eq!(extract_keywords(code), "bd c3 lpf setcpm stack samples");
        // Euclidean mini-notation inside a string is not a call.
        assert_eq!(extract_keywords("s(\"bd(3,8)\")"), "bd");
    }
}
