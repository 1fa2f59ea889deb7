//! Strict conversion of a model answer into a [`ReportAnalysis`].
//!
//! The answer is first parsed into a loose [`serde_json::Value`], then every
//! required field is checked for presence and JSON type. Numeric ranges are
//! not checked: a sentiment of `3.5` is accepted and stored as given.

use serde_json::{Map, Value};
use shared::dto::{ReportAnalysis, SentimentAspects};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("answer is not JSON: {0}")]
    Syntax(String),
    #[error("answer is not a JSON object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is not a {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

/// Parse sanitized model output and validate it.
///
/// If the whole text is not JSON, the first balanced `{…}` block in it is
/// tried before giving up.
pub fn parse_analysis(text: &str) -> Result<ReportAnalysis, AnalysisError> {
    let value = match serde_json::from_str::<Value>(text) {
        Ok(v) => v,
        Err(e) => match first_json_object(text) {
            Some(block) => serde_json::from_str::<Value>(block)
                .map_err(|e| AnalysisError::Syntax(format!("invalid JSON after balance: {e}")))?,
            None => return Err(AnalysisError::Syntax(e.to_string())),
        },
    };
    validate_analysis(value)
}

/// Check `value` against the analysis shape. No partial acceptance.
pub fn validate_analysis(value: Value) -> Result<ReportAnalysis, AnalysisError> {
    let obj = value.as_object().ok_or(AnalysisError::NotAnObject)?;

    let sentiment_score = number(obj, "sentiment_score")?;
    let quality_score = number(obj, "quality_score")?;
    let analysis = string(obj, "analysis")?;

    let aspects = match obj.get("sentiment_aspects") {
        None | Some(Value::Null) => return Err(AnalysisError::MissingField("sentiment_aspects")),
        Some(Value::Object(m)) => m,
        Some(_) => {
            return Err(AnalysisError::WrongType {
                field: "sentiment_aspects",
                expected: "object",
            })
        }
    };
    let sentiment_aspects = SentimentAspects {
        speed_satisfaction: number(aspects, "speed_satisfaction")?,
        reliability_satisfaction: number(aspects, "reliability_satisfaction")?,
        value_satisfaction: number(aspects, "value_satisfaction")?,
        service_satisfaction: number(aspects, "service_satisfaction")?,
        aspects_analysis: string(aspects, "aspects_analysis")?,
    };

    Ok(ReportAnalysis {
        sentiment_score,
        quality_score,
        analysis,
        sentiment_aspects,
        details: value,
    })
}

fn number(obj: &Map<String, Value>, field: &'static str) -> Result<f64, AnalysisError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(AnalysisError::MissingField(field)),
        Some(v) => v.as_f64().ok_or(AnalysisError::WrongType {
            field,
            expected: "number",
        }),
    }
}

fn string(obj: &Map<String, Value>, field: &'static str) -> Result<String, AnalysisError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(AnalysisError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(AnalysisError::WrongType {
            field,
            expected: "string",
        }),
    }
}

/// First balanced `{…}` block, skipping braces inside string literals.
fn first_json_object(s: &str) -> Option<&str> {
    let mut in_str = false;
    let mut esc = false;
    let mut depth = 0usize;
    let mut start: Option<usize> = None;

    for (i, ch) in s.char_indices() {
        if in_str {
            if esc {
                esc = false;
            } else if ch == '\\' {
                esc = true;
            } else if ch == '"' {
                in_str = false;
            }
            continue;
        }
        match ch {
            '"' if start.is_some() => in_str = true,
            '{' => {
                if start.is_none() {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|st| &s[st..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
