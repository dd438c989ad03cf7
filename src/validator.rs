//! Code validators.
//!
//! | Kind | Type | Checks |
//! |------|------|--------|
//! | `syntax` | [`SyntaxValidator`] | non-empty, balanced brackets, terminated strings |
//! | `http` | [`HttpValidator`] | whatever the remote evaluator checks |
//! | `none` | | nothing; no validator is wired |

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use strudel_rag_core::validate::{CodeValidator, ValidationOutcome};

use crate::config::{HttpConfig, ValidatorConfig};
use crate::error::ConfigError;
use crate::http;

/// Build the configured validator, or `None` for kind `none`.
pub fn create_validator(
    config: &ValidatorConfig,
    http_config: &HttpConfig,
) -> Result<Option<Arc<dyn CodeValidator>>> {
    match config.kind.as_str() {
        "none" => Ok(None),
        "syntax" => Ok(Some(Arc::new(SyntaxValidator))),
        "http" => {
            let url = config
                .url
                .clone()
                .ok_or_else(|| ConfigError::invalid("validator.url is required for kind 'http'"))?;
            Ok(Some(Arc::new(HttpValidator::new(url, http_config)?)))
        }
        other => Err(ConfigError::invalid(format!("Unknown validator kind: {}", other)).into()),
    }
}

// ============ Syntax ============

/// Local structural check. Never executes code.
pub struct SyntaxValidator;

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Check bracket balance and string termination, skipping comments.
/// Diagnostics use 1-based line numbers.
pub fn check_syntax(code: &str) -> ValidationOutcome {
    if code.trim().is_empty() {
        return ValidationOutcome::invalid("empty code");
    }

    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let start = line;
                let mut prev = '\0';
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == '\n' {
                        line += 1;
                    }
                    if prev == '*' && next == '/' {
                        closed = true;
                        break;
                    }
                    prev = next;
                }
                if !closed {
                    return ValidationOutcome::invalid(format!(
                        "line {}: unterminated block comment",
                        start
                    ));
                }
            }
            '"' | '\'' | '`' => {
                let quote = c;
                let start = line;
                let mut closed = false;
                while let Some(next) = chars.next() {
                    match next {
                        '\\' => {
                            if chars.next() == Some('\n') {
                                line += 1;
                            }
                        }
                        '\n' if quote != '`' => break,
                        '\n' => line += 1,
                        n if n == quote => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return ValidationOutcome::invalid(format!(
                        "line {}: unterminated string literal",
                        start
                    ));
                }
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => match stack.pop() {
                Some((open, _)) if closing_for(open) == c => {}
                Some((open, open_line)) => {
                    return ValidationOutcome::invalid(format!(
                        "line {}: '{}' does not match '{}' opened on line {}",
                        line, c, open, open_line
                    ));
                }
                None => {
                    return ValidationOutcome::invalid(format!("line {}: unexpected '{}'", line, c));
                }
            },
            _ => {}
        }
    }

    if let Some((open, open_line)) = stack.pop() {
        return ValidationOutcome::invalid(format!("line {}: unclosed '{}'", open_line, open));
    }
    ValidationOutcome::ok()
}

#[async_trait]
impl CodeValidator for SyntaxValidator {
    async fn validate(&self, code: &str) -> Result<ValidationOutcome> {
        Ok(check_syntax(code))
    }
}

// ============ HTTP ============

/// Sends code to a remote evaluator: `POST {"code": ...}` answered with
/// `{"valid": bool, "error": string}`.
pub struct HttpValidator {
    url: String,
    client: Client,
}

impl HttpValidator {
    pub fn new(url: String, http_config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            url,
            client: http::shared_client(http_config)?,
        })
    }
}

#[async_trait]
impl CodeValidator for HttpValidator {
    async fn validate(&self, code: &str) -> Result<ValidationOutcome> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "code": code }))
            .send()
            .await
            .with_context(|| format!("Validator request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Validator error {}: {}", status, body);
        }
        let outcome: ValidationOutcome = response
            .json()
            .await
            .context("Invalid validator response")?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_program() {
        let code = "setcpm(60)\n$: s(\"bd*4\").gain(0.8)\n$: note(\"<c e g>\").s('piano')";
        assert_eq!(check_syntax(code), ValidationOutcome::ok());
    }

    #[test]
    fn test_empty_code() {
        assert!(!check_syntax("  \n").valid);
    }

    #[test]
    fn test_unclosed_paren_reports_line() {
        let outcome = check_syntax("setcpm(60)\ns(\"bd\".fast(2)\n");
        assert!(!outcome.valid);
        assert_eq!(outcome.error, "line 2: unclosed '('");
    }

    #[test]
    fn test_mismatched_bracket() {
        let outcome = check_syntax("stack(\n  s(\"bd\"]\n)");
        assert_eq!(
            outcome.error,
            "line 2: ']' does not match '(' opened on line 2"
        );
    }

    #[test]
    fn test_unterminated_string() {
        let outcome = check_syntax("s(\"bd sd)\nnote(\"c\")");
        assert_eq!(outcome.error, "line 1: unterminated string literal");
    }

    #[test]
    fn test_brackets_in_strings_and_comments_ignored() {
        let code = "// hits (\ns(\"[bd sd] hh(\") /* ] */\nnote(`<c\ne>`)";
        assert!(check_syntax(code).valid);
    }

    #[test]
    fn test_factory() {
        let http = HttpConfig::default();
        let none = ValidatorConfig {
            kind: "none".into(),
            url: None,
        };
        assert!(create_validator(&none, &http).unwrap().is_none());
        assert!(create_validator(&ValidatorConfig::default(), &http)
            .unwrap()
            .is_some());
        let missing_url = ValidatorConfig {
            kind: "http".into(),
            url: None,
        };
        assert!(create_validator(&missing_url, &http).is_err());
    }
}
