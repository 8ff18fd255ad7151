use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::models::{Answer, QuestionLimits, Student, SurveyResponse};

/// One admitted friend choice, before deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub source: String,
    pub target: String,
    pub question_key: String,
}

/// Counts of everything the parser recovered from instead of failing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseDiagnostics {
    pub responses_seen: usize,
    pub responses_parsed: usize,
    pub malformed_responses: usize,
    pub unknown_respondents: usize,
    pub malformed_answers: usize,
    pub truncated_selections: usize,
    pub blank_selections: usize,
    pub self_selections: usize,
    pub unknown_targets: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub selections: Vec<Selection>,
    pub diagnostics: ParseDiagnostics,
}

pub fn parse_responses(
    responses: &[SurveyResponse],
    roster: &[Student],
    limits: &QuestionLimits,
) -> ParseOutcome {
    let eligible: HashSet<&str> = roster.iter().map(|student| student.id.as_str()).collect();
    let mut outcome = ParseOutcome::default();

    for response in responses {
        outcome.diagnostics.responses_seen += 1;

        let Some(source) = response
            .student_id
            .as_deref()
            .filter(|id| eligible.contains(id))
        else {
            warn!(
                survey_id = %response.survey_id,
                student_id = ?response.student_id,
                "skipping response from a student outside the roster"
            );
            outcome.diagnostics.unknown_respondents += 1;
            continue;
        };

        let Some(answers) = decode_answers(&response.answers) else {
            warn!(
                survey_id = %response.survey_id,
                student_id = source,
                "skipping response whose answers are not an object"
            );
            outcome.diagnostics.malformed_responses += 1;
            continue;
        };

        for (question_key, value) in &answers {
            if value.is_null() {
                continue;
            }

            let Some(answer) = resolve_answer(value) else {
                warn!(
                    student_id = source,
                    question = %question_key,
                    "ignoring answer that is neither a student id nor a list of ids"
                );
                outcome.diagnostics.malformed_answers += 1;
                continue;
            };

            admit_answer(
                source,
                question_key,
                &answer,
                limits.cap_for(question_key, &answer),
                &eligible,
                &mut outcome,
            );
        }

        outcome.diagnostics.responses_parsed += 1;
    }

    if outcome.diagnostics.truncated_selections > 0 {
        warn!(
            dropped = outcome.diagnostics.truncated_selections,
            "selections beyond the per-question maximum were dropped"
        );
    }
    debug!(diagnostics = ?outcome.diagnostics, "parsed survey responses");

    outcome
}

fn admit_answer(
    source: &str,
    question_key: &str,
    answer: &Answer,
    cap: usize,
    eligible: &HashSet<&str>,
    outcome: &mut ParseOutcome,
) {
    let choices = answer.selections();
    if choices.len() > cap {
        outcome.diagnostics.truncated_selections += choices.len() - cap;
    }

    for target in choices.iter().take(cap) {
        let target = target.trim();
        if target.is_empty() {
            outcome.diagnostics.blank_selections += 1;
        } else if target == source {
            warn!(student_id = source, question = question_key, "ignoring self-selection");
            outcome.diagnostics.self_selections += 1;
        } else if !eligible.contains(target) {
            warn!(
                student_id = source,
                target_id = target,
                question = question_key,
                "ignoring selection of a student outside the roster"
            );
            outcome.diagnostics.unknown_targets += 1;
        } else {
            outcome.selections.push(Selection {
                source: source.to_string(),
                target: target.to_string(),
                question_key: question_key.to_string(),
            });
        }
    }
}

// Some clients submitted the answers object serialized as a JSON string.
fn decode_answers(raw: &Value) -> Option<Map<String, Value>> {
    match raw {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

fn resolve_answer(value: &Value) -> Option<Answer> {
    if let Ok(answer) = Answer::deserialize(value) {
        return Some(answer);
    }

    // Keep positions of non-string entries so the cap counts them like the form did.
    match value {
        Value::Array(items) => Some(Answer::Multi(
            items
                .iter()
                .map(|item| item.as_str().unwrap_or_default().to_string())
                .collect(),
        )),
        _ => None,
    }
}
