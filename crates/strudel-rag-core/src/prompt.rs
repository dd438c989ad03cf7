//! System-prompt assembly.
//!
//! [`build_system_prompt`] is a pure function: identical inputs produce a
//! byte-identical prompt. Sections appear in a fixed order and each one is
//! omitted when it has nothing to say.
//!
//! | # | Section | Present when |
//! |---|---------|--------------|
//! | 1 | Quick reference | cheatsheet is non-empty |
//! | 2 | Current editor state | editor is non-blank |
//! | 3 | Relevant documentation | any docs |
//! | 4 | Example programs | any examples |
//! | 5 | Query context | an analysis is supplied |
//! | 6 | Instructions | always |
//! | 7 | Cache note | the turn reused cached retrieval |

use std::fmt::Write as _;

use crate::analysis::QueryAnalysis;
use crate::models::{DocChunk, ExampleProgram, PAGE_EXAMPLES, PAGE_SUMMARY};

/// Cheatsheet compiled into the crate, used when no file override is set.
pub const DEFAULT_CHEATSHEET: &str = include_str!("../assets/cheatsheet.md");

/// Everything the prompt depends on.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub cheatsheet: &'a str,
    pub editor_state: &'a str,
    pub docs: &'a [DocChunk],
    pub examples: &'a [ExampleProgram],
    pub analysis: Option<&'a QueryAnalysis>,
    pub used_rag_cache: bool,
}

fn banner(out: &mut String, title: &str) {
    let _ = writeln!(out, "════════ {} ════════", title);
}

fn banner_end(out: &mut String) {
    out.push_str("════════════════════════════\n\n");
}

/// Assemble the generator's system prompt.
pub fn build_system_prompt(ctx: &PromptContext<'_>) -> String {
    let mut out = String::new();

    let cheatsheet = ctx.cheatsheet.trim();
    if !cheatsheet.is_empty() {
        banner(&mut out, "STRUDEL QUICK REFERENCE");
        out.push_str(cheatsheet);
        out.push('\n');
        banner_end(&mut out);
    }

    if !ctx.editor_state.trim().is_empty() {
        banner(&mut out, "CURRENT EDITOR STATE");
        out.push_str(ctx.editor_state);
        if !ctx.editor_state.ends_with('\n') {
            out.push('\n');
        }
        banner_end(&mut out);
    }

    if !ctx.docs.is_empty() {
        banner(&mut out, "RELEVANT DOCUMENTATION");
        write_docs(&mut out, ctx.docs);
        banner_end(&mut out);
    }

    if !ctx.examples.is_empty() {
        banner(&mut out, "EXAMPLE PROGRAMS");
        write_examples(&mut out, ctx.examples);
        banner_end(&mut out);
    }

    if let Some(analysis) = ctx.analysis {
        banner(&mut out, "QUERY CONTEXT");
        write_query_context(&mut out, analysis);
        banner_end(&mut out);
    }

    out.push_str(INSTRUCTIONS);

    if ctx.used_rag_cache {
        out.push('\n');
        out.push_str(CACHE_NOTE);
    }

    out
}

fn write_docs(out: &mut String, docs: &[DocChunk]) {
    let mut pages: Vec<&str> = Vec::new();
    for doc in docs {
        if !pages.contains(&doc.page_name.as_str()) {
            pages.push(&doc.page_name);
        }
    }
    for page in pages {
        let _ = writeln!(out, "PAGE: {}", page);
        for doc in docs.iter().filter(|d| d.page_name == page) {
            match doc.section_title.as_str() {
                PAGE_SUMMARY => out.push_str("SUMMARY:\n"),
                PAGE_EXAMPLES => out.push_str("EXAMPLES:\n"),
                title => {
                    let _ = writeln!(out, "SECTION: {}", title);
                }
            }
            out.push_str(doc.content.trim_end());
            out.push_str("\n\n");
        }
    }
}

fn write_examples(out: &mut String, examples: &[ExampleProgram]) {
    for (i, example) in examples.iter().enumerate() {
        let _ = writeln!(out, "Example {}: {}", i + 1, example.title);
        if !example.description.trim().is_empty() {
            let _ = writeln!(out, "Description: {}", example.description.trim());
        }
        if !example.tags.is_empty() {
            let _ = writeln!(out, "Tags: {}", example.tags.join(", "));
        }
        out.push_str("Code:\n");
        out.push_str(example.code.trim_end());
        out.push_str("\n\n");
    }
}

fn write_query_context(out: &mut String, analysis: &QueryAnalysis) {
    if analysis.is_code_request {
        out.push_str("REQUEST TYPE: Code generation/modification\n");
    } else {
        out.push_str("REQUEST TYPE: Question/explanation\n");
    }
    if !analysis.concrete_requests.is_empty() {
        out.push_str("REQUESTED CHANGES:\n");
        for request in &analysis.concrete_requests {
            let _ = writeln!(out, "- {}", request);
        }
    }
    if !analysis.is_actionable {
        out.push_str(
            "The request is vague. Ask the user these clarifying questions before writing code:\n",
        );
        for (i, question) in analysis.clarifying_questions.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, question);
        }
    }
}

/// Append the validator's diagnostic so the generator can repair its code.
pub fn retry_system_prompt(system_prompt: &str, previous_code: &str, error: &str) -> String {
    format!(
        "{}\n\n════════ VALIDATION ERROR ════════\n\
         Your previous code failed validation:\n{}\n\n\
         Previous code:\n{}\n\n\
         Return the corrected, complete code only.\n",
        system_prompt.trim_end(),
        error.trim(),
        previous_code.trim_end()
    )
}

const INSTRUCTIONS: &str = r#"════════ INSTRUCTIONS ════════
You write Strudel live-coding patterns.

OUTPUT FORMAT
- Code requests: return ONLY raw Strudel code. No markdown fences, no explanation before or after.
- Questions: answer in prose. Markdown and short code snippets are allowed.

STATE PRESERVATION
- Always return the COMPLETE editor state with the requested change applied.
- Never drop, rename or reorder existing lines unless the user asked for it.
- If the editor is empty, return a complete new program.

REQUEST TYPES
- Additive ("add a hi-hat"): keep every existing line and add the new pattern.
    editor:  setcpm(60)
    result:  setcpm(60)
             $: s("hh*8")
- Modification ("make the drums faster"): change only the affected expression.
    editor:  $: s("bd sd")
    result:  $: s("bd sd").fast(2)
- Deletion ("remove the bass"): delete only the named part, keep the rest.
- Question ("what does lpf do?"): explain in prose; do not rewrite the editor.

Use only functions from the quick reference, the documentation and the examples above.
"#;

const CACHE_NOTE: &str = r#"════════ CACHED CONTEXT ════════
The documentation and examples above were retrieved for an earlier turn of this conversation.
If they do not cover what the current request needs, respond with exactly
[NEED_DOCS: <topic>]
and nothing else, where <topic> names what you need documentation for (e.g. [NEED_DOCS: reverb and delay effects]).
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, page: &str, section: &str, content: &str) -> DocChunk {
        DocChunk {
            id: id.into(),
            page_name: page.into(),
            page_url: format!("https://strudel.cc/{}", page),
            section_title: section.into(),
            content: content.into(),
            similarity: 0.5,
        }
    }

    fn empty_ctx<'a>() -> PromptContext<'a> {
        PromptContext {
            cheatsheet: "",
            editor_state: "",
            docs: &[],
            examples: &[],
            analysis: None,
            used_rag_cache: false,
        }
    }

    #[test]
    fn test_minimal_prompt_is_instructions_only() {
        let prompt = build_system_prompt(&empty_ctx());
        assert_eq!(prompt, INSTRUCTIONS);
    }

    #[test]
    fn test_sections_in_fixed_order() {
        let docs = vec![doc("d1", "effects", "Filters", "lpf(freq)")];
        let examples = vec![ExampleProgram {
            id: "e1".into(),
            title: "Acid".into(),
            description: "squelchy".into(),
            code: "note(\"c2\").s(\"sawtooth\")".into(),
            tags: vec!["acid".into(), "bass".into()],
            ..Default::default()
        }];
        let analysis = QueryAnalysis {
            is_actionable: true,
            is_code_request: true,
            ..Default::default()
        };
        let ctx = PromptContext {
            cheatsheet: DEFAULT_CHEATSHEET,
            editor_state: "setcpm(60)",
            docs: &docs,
            examples: &examples,
            analysis: Some(&analysis),
            used_rag_cache: true,
        };
        let prompt = build_system_prompt(&ctx);

        let order = [
            "STRUDEL QUICK REFERENCE",
            "CURRENT EDITOR STATE",
            "RELEVANT DOCUMENTATION",
            "EXAMPLE PROGRAMS",
            "QUERY CONTEXT",
            "INSTRUCTIONS",
            "CACHED CONTEXT",
        ];
        let positions: Vec<usize> = order.iter().map(|s| prompt.find(s).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(prompt.contains("REQUEST TYPE: Code generation/modification"));
        assert!(prompt.contains("Tags: acid, bass"));
        assert!(prompt.contains("[NEED_DOCS: <topic>]"));
    }

    #[test]
    fn test_docs_grouped_by_page_with_special_labels() {
        let docs = vec![
            doc("s", "effects", PAGE_SUMMARY, "Effects overview"),
            doc("x", "effects", PAGE_EXAMPLES, "s(\"bd\").room(1)"),
            doc("t", "tonal", "Scales", "scale()"),
            doc("f", "effects", "Filters", "lpf()"),
        ];
        let ctx = PromptContext {
            docs: &docs,
            ..empty_ctx()
        };
        let prompt = build_system_prompt(&ctx);
        let effects = prompt.find("PAGE: effects").unwrap();
        let summary = prompt.find("SUMMARY:\nEffects overview").unwrap();
        let examples = prompt.find("EXAMPLES:\ns(\"bd\").room(1)").unwrap();
        let filters = prompt.find("SECTION: Filters").unwrap();
        let tonal = prompt.find("PAGE: tonal").unwrap();
        assert!(effects < summary && summary < examples && examples < filters && filters < tonal);
    }

    #[test]
    fn test_vague_query_lists_questions() {
        let analysis = QueryAnalysis {
            is_actionable: false,
            is_code_request: true,
            clarifying_questions: vec!["Which genre?".into(), "Which tempo?".into()],
            ..Default::default()
        };
        let ctx = PromptContext {
            analysis: Some(&analysis),
            ..empty_ctx()
        };
        let prompt = build_system_prompt(&ctx);
        assert!(prompt.contains("1. Which genre?\n2. Which tempo?"));
    }

    #[test]
    fn test_question_request_type() {
        let analysis = QueryAnalysis {
            is_actionable: true,
            ..Default::default()
        };
        let ctx = PromptContext {
            analysis: Some(&analysis),
            ..empty_ctx()
        };
        assert!(build_system_prompt(&ctx).contains("REQUEST TYPE: Question/explanation"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let docs = vec![doc("a", "p", "s", "c")];
        let ctx = PromptContext {
            cheatsheet: "cheat",
            editor_state: "s(\"bd\")",
            docs: &docs,
            ..empty_ctx()
        };
        assert_eq!(build_system_prompt(&ctx), build_system_prompt(&ctx));
    }

    #[test]
    fn test_retry_prompt_carries_error() {
        let prompt = retry_system_prompt("base", "s(\"bd\"", "E1");
        assert!(prompt.starts_with("base\n"));
        assert!(prompt.contains("E1"));
        assert!(prompt.contains("s(\"bd\""));
    }
}
