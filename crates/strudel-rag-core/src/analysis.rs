//! Query analysis: the analyzer prompt, JSON parsing and normalization.
//!
//! The analyzer model receives [`ANALYZER_SYSTEM_PROMPT`] and the raw user
//! query, and answers with a single JSON object. [`parse_analysis`] turns
//! that answer into a [`QueryAnalysis`] whose invariants hold regardless of
//! how loosely the model followed instructions:
//!
//! - not actionable ⇒ at least one clarifying question
//! - actionable ⇒ no clarifying questions
//! - `concrete_requests` empty unless actionable *and* a code request

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Used when the model flags a query as vague without asking anything.
pub const DEFAULT_CLARIFYING_QUESTION: &str =
    "Could you describe the sound, style or pattern you have in mind in more detail?";

/// Structured classification of one user query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    /// Three to five comma-separated technical keywords.
    #[serde(default)]
    pub transformed_query: String,
    #[serde(default)]
    pub is_actionable: bool,
    #[serde(default)]
    pub is_code_request: bool,
    #[serde(default)]
    pub concrete_requests: Vec<String>,
    #[serde(default)]
    pub clarifying_questions: Vec<String>,
}

impl QueryAnalysis {
    /// Enforce the field invariants on model output.
    pub fn normalized(mut self) -> Self {
        self.transformed_query = self.transformed_query.trim().to_string();
        self.clarifying_questions.retain(|q| !q.trim().is_empty());
        self.concrete_requests.retain(|r| !r.trim().is_empty());

        if self.is_actionable {
            self.clarifying_questions.clear();
        } else if self.clarifying_questions.is_empty() {
            self.clarifying_questions
                .push(DEFAULT_CLARIFYING_QUESTION.to_string());
        }
        if !(self.is_actionable && self.is_code_request) {
            self.concrete_requests.clear();
        }
        self
    }
}

/// `q + " " + analysis.transformed_query`, the keyword-expanded search query.
pub fn compose_transformed_query(query: &str, analysis: &QueryAnalysis) -> String {
    format!("{} {}", query, analysis.transformed_query)
}

/// Instructions for the analyzer model.
pub const ANALYZER_SYSTEM_PROMPT: &str = r#"You analyze requests sent to an assistant that writes Strudel live-coding patterns.

Classify the user's request and extract search keywords.

OUTPUT FORMAT (JSON only, no markdown code blocks):
{
  "transformed_query": "3-5 comma-separated technical keywords, e.g. \"bd, kick drum, drum patterns, sound\"",
  "is_actionable": true,
  "is_code_request": true,
  "concrete_requests": ["add a kick drum on every beat"],
  "clarifying_questions": []
}

RULES:
1. transformed_query uses Strudel vocabulary: function names (s, note, lpf, room, delay, stack, fast), sound names (bd, sd, hh, sawtooth) and concepts (rhythm, scale, effects).
2. is_code_request is true when the user wants code written or changed, false for questions and explanations.
3. is_actionable is false only when the request is too vague to act on ("make it sound good", "do something cool").
4. When is_actionable is false, ask 1-3 short clarifying_questions.
5. concrete_requests lists the individual changes requested; leave it empty for questions or vague requests.
6. Output VALID JSON only - no explanation outside the JSON object."#;

/// The user turn sent to the analyzer model.
pub fn analyzer_user_prompt(query: &str) -> String {
    format!("User request: {}", query.trim())
}

/// Parse the analyzer model's answer.
///
/// Tolerates surrounding markdown fences and leading/trailing prose around a
/// single JSON object. Anything else is an error.
pub fn parse_analysis(content: &str) -> Result<QueryAnalysis> {
    let json_str = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let parsed = match serde_json::from_str::<QueryAnalysis>(json_str) {
        Ok(analysis) => analysis,
        Err(e) => {
            let start = json_str.find('{');
            let end = json_str.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str(&json_str[start..=end])
                        .with_context(|| format!("failed to parse extracted analysis JSON: {}", e))?
                }
                _ => {
                    return Err(anyhow!(
                        "analyzer response is not JSON: {}. Content: {}",
                        e,
                        json_str.chars().take(200).collect::<String>()
                    ))
                }
            }
        }
    };
    Ok(parsed.normalized())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_json() {
        let raw = r#"{
            "transformed_query": "bd, kick, drum patterns",
            "is_actionable": true,
            "is_code_request": true,
            "concrete_requests": ["add kick"],
            "clarifying_questions": []
        }"#;
        let a = parse_analysis(raw).unwrap();
        assert_eq!(a.transformed_query, "bd, kick, drum patterns");
        assert!(a.is_actionable && a.is_code_request);
        assert_eq!(a.concrete_requests, vec!["add kick"]);
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"transformed_query\": \"lpf, filter\", \"is_actionable\": true, \"is_code_request\": false}\n```";
        let a = parse_analysis(raw).unwrap();
        assert_eq!(a.transformed_query, "lpf, filter");
        assert!(!a.is_code_request);
    }

    #[test]
    fn test_parse_json_wrapped_in_prose() {
        let raw = "Sure! {\"transformed_query\": \"room, reverb\", \"is_actionable\": true} hope that helps";
        let a = parse_analysis(raw).unwrap();
        assert_eq!(a.transformed_query, "room, reverb");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_analysis("I cannot help with that").is_err());
        assert!(parse_analysis("{not json}").is_err());
    }

    #[test]
    fn test_vague_query_gets_default_question() {
        let a = parse_analysis(r#"{"transformed_query": "sound", "is_actionable": false, "is_code_request": true, "concrete_requests": ["x"]}"#).unwrap();
        assert!(!a.is_actionable);
        assert_eq!(a.clarifying_questions, vec![DEFAULT_CLARIFYING_QUESTION]);
        assert!(a.concrete_requests.is_empty());
    }

    #[test]
    fn test_actionable_drops_questions() {
        let a = QueryAnalysis {
            is_actionable: true,
            is_code_request: false,
            concrete_requests: vec!["explain".into()],
            clarifying_questions: vec!["why?".into()],
            ..Default::default()
        }
        .normalized();
        assert!(a.clarifying_questions.is_empty());
        assert!(a.concrete_requests.is_empty());
    }

    #[test]
    fn test_compose_transformed_query() {
        let a = QueryAnalysis {
            transformed_query: "lpf, filter".into(),
            ..Default::default()
        };
        assert_eq!(
            compose_transformed_query("how do I use lpf?", &a),
            "how do I use lpf? lpf, filter"
        );
    }
}
